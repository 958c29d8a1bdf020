//! Drives the replicated store over its sync channel.
//!
//! Owns the room's [`ReplicatedStore`] and [`SyncSession`] and executes their
//! actions against a transport link. The channel is reconnected forever,
//! spaced by the same floor as the control channel. Local writes keep
//! working while offline: they are persisted immediately and go out with
//! the `Save` that follows the next snapshot.

use std::time::Duration;

use parley_core::{
    Environment, ReplicatedStore, RowChange, Storage, StoreError, SyncAction, SyncSession, Table,
    store::table::RowValues,
};
use parley_proto::{CellValue, ChatEvent, OutboundMessage, SyncMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    runtime::Input,
    transport::{Connector, Link, LinkSender, TransportEvent},
};

/// Requests from the chat runtime.
pub(crate) enum StoreCommand {
    /// Write a chat message as a `messages` row.
    Post {
        message: OutboundMessage,
        sender: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}

pub(crate) struct StoreDriver<S: Storage, C: Connector, E: Environment> {
    store: ReplicatedStore<S>,
    sync: SyncSession,
    connector: C,
    env: E,
    url: String,
    reconnect_floor: Duration,
    commands: mpsc::UnboundedReceiver<StoreCommand>,
    inputs: mpsc::UnboundedSender<Input>,
}

impl<S: Storage, C: Connector, E: Environment> StoreDriver<S, C, E> {
    pub(crate) fn new(
        store: ReplicatedStore<S>,
        connector: C,
        env: E,
        url: String,
        reconnect_floor: Duration,
        commands: mpsc::UnboundedReceiver<StoreCommand>,
        inputs: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self { store, sync: SyncSession::new(), connector, env, url, reconnect_floor, commands, inputs }
    }

    /// Run until the runtime drops its command sender.
    pub(crate) async fn run(mut self) {
        // Persisted rows go through the ordering buffer like any backlog
        let restored: Vec<RowChange> = self
            .store
            .rows(Table::Messages)
            .into_iter()
            .map(|(row, _)| RowChange { table: Table::Messages, row, deleted: false })
            .collect();
        self.announce(&restored);

        loop {
            let started = self.env.now();
            let link = self.connector.connect(&self.url);
            if !self.drive(link).await {
                break;
            }
            self.sync.disconnected();

            let wait = self.reconnect_floor.saturating_sub(self.env.now() - started);
            debug!(room = self.store.room(), wait_ms = wait.as_millis() as u64, "sync channel reconnecting");
            if !self.idle(wait).await {
                break;
            }
        }

        debug!(room = self.store.room(), "store driver stopped");
    }

    /// Serve one link. Returns `false` on shutdown.
    async fn drive(&mut self, mut link: Link) -> bool {
        loop {
            tokio::select! {
                event = link.events.recv() => match event {
                    Some(TransportEvent::Open) => {
                        info!(room = self.store.room(), "sync channel open");
                        let actions = self.sync.connected(&self.store);
                        self.execute(actions, Some(&link.sender));
                    },
                    Some(TransportEvent::Binary(bytes)) => {
                        if !self.handle_frame(&bytes, &link.sender) {
                            // Dropping the link closes the socket
                            return true;
                        }
                    },
                    Some(TransportEvent::Text(_)) => debug!("ignoring text frame on sync channel"),
                    Some(TransportEvent::Closed(close)) => {
                        info!(room = self.store.room(), code = close.code, reason = %close.reason, "sync channel closed");
                        return true;
                    },
                    None => return true,
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command, Some(&link.sender)),
                    None => return false,
                },
            }
        }
    }

    /// Serve commands while offline for `wait`. Returns `false` on shutdown.
    async fn idle(&mut self, wait: Duration) -> bool {
        let env = self.env.clone();
        let sleep = env.sleep(wait);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command, None),
                    None => return false,
                },
            }
        }
    }

    /// Returns `false` if the link has to be replaced.
    fn handle_frame(&mut self, bytes: &[u8], sender: &LinkSender) -> bool {
        let message = match SyncMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping undecodable sync frame");
                return true;
            },
        };

        let wall = self.env.wall_clock_millis();
        let actions = match self.sync.handle_message(message, &mut self.store, wall) {
            Ok(actions) => actions,
            Err(e) => {
                warn!(error = %e, "sync message not applied");
                self.sync.apply_failed()
            },
        };
        self.execute(actions, Some(sender))
    }

    fn handle_command(&mut self, command: StoreCommand, sender: Option<&LinkSender>) {
        match command {
            StoreCommand::Post { message, sender: author, reply } => {
                let result = self.post(&message, &author, sender).map_err(ClientError::from);
                let _ = reply.send(result);
            },
        }
    }

    fn post(&mut self, message: &OutboundMessage, author: &str, sender: Option<&LinkSender>) -> Result<(), StoreError> {
        let timestamp = self.env.wall_clock_millis();

        let mut values = vec![
            ("sender", CellValue::from(author)),
            ("channel", CellValue::from(message.channel.as_str())),
            ("text", CellValue::from(message.text.as_str())),
            ("timestamp", CellValue::Int(timestamp as i64)),
        ];
        if let Some(reply_to) = &message.reply_to {
            values.push(("reply_to", CellValue::from(reply_to.as_str())));
        }
        if let Some(thread) = &message.thread_id {
            values.push(("thread_id", CellValue::from(thread.as_str())));
        }

        let cells = self.store.upsert(Table::Messages, &message.id, values, timestamp)?;
        debug!(id = %message.id, cells = cells.len(), live = sender.is_some(), "message row written");

        self.execute(self.sync.local_write(cells), sender);
        self.announce(&[RowChange { table: Table::Messages, row: message.id.clone(), deleted: false }]);
        Ok(())
    }

    /// Returns `false` if an action asked for a new link.
    fn execute(&self, actions: Vec<SyncAction>, sender: Option<&LinkSender>) -> bool {
        let mut keep = true;
        for action in actions {
            match action {
                SyncAction::Send(message) => {
                    let Some(sender) = sender else {
                        continue;
                    };
                    match message.encode() {
                        Ok(bytes) => {
                            if sender.send_binary(bytes).is_err() {
                                debug!("sync link gone, message dropped");
                            }
                        },
                        Err(e) => warn!(error = %e, "sync message not encoded"),
                    }
                },
                SyncAction::Changed(changes) => self.announce(&changes),
                SyncAction::Reconnect => keep = false,
            }
        }
        keep
    }

    /// Hand changed message rows to the runtime's ordering buffer, oldest
    /// first.
    fn announce(&self, changes: &[RowChange]) {
        let mut events = Vec::new();
        for change in changes.iter().filter(|c| c.table == Table::Messages && !c.deleted) {
            match self
                .store
                .get_row(Table::Messages, &change.row)
                .and_then(|row| message_from_row(&change.row, &row))
            {
                Some(event) => events.push(event),
                None => debug!(row = %change.row, "incomplete message row skipped"),
            }
        }

        events.sort_by_key(|e| e.timestamp);
        for event in events {
            let _ = self.inputs.send(Input::Replicated(event));
        }
    }
}

/// Chat event of a `messages` row. `None` until the row has every required
/// column.
fn message_from_row(id: &str, row: &RowValues) -> Option<ChatEvent> {
    Some(ChatEvent {
        id: id.to_string(),
        sender: row.get("sender")?.as_text()?.to_string(),
        channel: row.get("channel")?.as_text()?.to_string(),
        text: row.get("text")?.as_text()?.to_string(),
        timestamp: u64::try_from(row.get("timestamp")?.as_int()?).ok()?,
        reply_to: row.get("reply_to").and_then(CellValue::as_text).map(str::to_string),
        thread: None,
    })
}
