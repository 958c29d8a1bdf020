//! Sync-relay session state machine.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connected ┌─────────┐ Snapshot ┌──────┐
//! │ Disconnected │──────────>│ Loading │─────────>│ Live │
//! └──────────────┘           └─────────┘          └──────┘
//!        ↑                        │                   │
//!        └────── disconnected ────┴───────────────────┘
//! ```
//!
//! Every connection performs one full load-then-save exchange: `Hello` and
//! `Load` go out, the relay's `Snapshot` is merged, and the complete local
//! state goes back as `Save`. Writes made while offline are already
//! persisted, so the `Save` carries them. Only once `Live` do local writes go
//! out as individual `Delta`s.
//!
//! The relay only sends a snapshot in answer to `Load`. If relay cells cannot
//! be persisted, the session asks for the link to be dropped so the next
//! connection runs a fresh cycle.

use parley_proto::{CellRecord, SyncMessage};
use tracing::{debug, info, warn};

use super::replicated::{ReplicatedStore, RowChange};
use crate::{error::StoreError, storage::Storage};

/// Sync session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No relay connection
    Disconnected,
    /// `Load` sent, waiting for the snapshot
    Loading,
    /// Snapshot merged and local state saved; deltas flow both ways
    Live,
}

/// Actions returned by the sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Send this message to the relay
    Send(SyncMessage),
    /// Rows changed by remote cells
    Changed(Vec<RowChange>),
    /// Drop the relay link and reconnect
    Reconnect,
}

/// Drives the relay protocol for one [`ReplicatedStore`].
#[derive(Debug, Clone)]
pub struct SyncSession {
    state: SyncState,
    /// Completed load-then-save cycles
    cycles: u64,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    /// Create a disconnected session.
    pub fn new() -> Self {
        Self { state: SyncState::Disconnected, cycles: 0 }
    }

    /// Current state
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Number of load-then-save cycles completed.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Relay connection opened: start the load-then-save cycle.
    pub fn connected<S: Storage>(&mut self, store: &ReplicatedStore<S>) -> Vec<SyncAction> {
        self.state = SyncState::Loading;
        debug!(room = store.room(), "sync connected, loading");
        vec![
            SyncAction::Send(SyncMessage::Hello { room: store.room().to_string(), node: store.node() }),
            SyncAction::Send(SyncMessage::Load),
        ]
    }

    /// Relay connection lost.
    pub fn disconnected(&mut self) {
        if self.state != SyncState::Disconnected {
            debug!("sync disconnected");
        }
        self.state = SyncState::Disconnected;
    }

    /// Message from the relay.
    ///
    /// # Errors
    ///
    /// - `StoreError::Storage` if merged cells cannot be persisted; nothing
    ///   was applied and the caller reports it through [`Self::apply_failed`]
    pub fn handle_message<S: Storage>(
        &mut self,
        message: SyncMessage,
        store: &mut ReplicatedStore<S>,
        wall_millis: u64,
    ) -> Result<Vec<SyncAction>, StoreError> {
        match (self.state, message) {
            (SyncState::Disconnected, message) => {
                debug!(cells = message.cell_count(), "sync message while disconnected ignored");
                Ok(Vec::new())
            },
            (_, SyncMessage::Snapshot { cells }) => {
                let changes = store.merge_remote(&cells, wall_millis)?;
                let mut actions = changed(changes);

                if self.state == SyncState::Loading {
                    let local = store.all_cells();
                    self.state = SyncState::Live;
                    self.cycles += 1;
                    info!(
                        room = store.room(),
                        received = cells.len(),
                        saved = local.len(),
                        "sync cycle complete"
                    );
                    actions.push(SyncAction::Send(SyncMessage::Save { cells: local }));
                }
                Ok(actions)
            },
            (_, SyncMessage::Delta { cells }) => Ok(changed(store.merge_remote(&cells, wall_millis)?)),
            (_, other) => {
                debug!(?other, "unexpected sync message from relay ignored");
                Ok(Vec::new())
            },
        }
    }

    /// A relay message could not be applied.
    ///
    /// The lost cells only come back with another snapshot, so the link has
    /// to be replaced. Returns nothing while disconnected.
    pub fn apply_failed(&mut self) -> Vec<SyncAction> {
        if self.state == SyncState::Disconnected {
            return Vec::new();
        }
        warn!(state = ?self.state, "relay cells not persisted, restarting sync cycle");
        self.state = SyncState::Disconnected;
        vec![SyncAction::Reconnect]
    }

    /// Cells written locally.
    ///
    /// While live they go out as a delta; otherwise the next `Save` carries
    /// them.
    pub fn local_write(&self, cells: Vec<CellRecord>) -> Vec<SyncAction> {
        if self.state == SyncState::Live && !cells.is_empty() {
            vec![SyncAction::Send(SyncMessage::Delta { cells })]
        } else {
            Vec::new()
        }
    }
}

fn changed(changes: Vec<RowChange>) -> Vec<SyncAction> {
    if changes.is_empty() { Vec::new() } else { vec![SyncAction::Changed(changes)] }
}
