//! Control-channel session state machine.
//!
//! Manages the WebSocket session lifecycle: join, identity, the `ready`
//! barrier, close classification and the reconnect policy. Uses the action
//! pattern: methods take time as input and return actions for the driver to
//! execute. This keeps the state machine pure (no I/O) and makes testing
//! straightforward.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐ join ┌────────────┐ open  ┌───────────────┐ ready ┌───────┐
//! │ Idle │─────>│ Connecting │──────>│ AwaitingReady │──────>│ Ready │
//! └──────┘      └────────────┘       └───────────────┘       └───────┘
//!                  ↑    │                    │                   │
//!                  │    └────────────────────┴───────────────────┤ close
//!                  │ rejoin (≥ reconnect_floor after last join)  ↓
//!                  │                                        ┌────────┐
//!                  └────────────── Abnormal ────────────────│ Closed │
//!                                                           └────────┘
//! ```
//!
//! A close classified as `Replaced` or `IdentityRejected` stays in `Closed`.
//!
//! # Sessions
//!
//! Every `join` creates a new [`SessionId`]. Transport events carry the id of
//! the session they belong to, and events for any session other than the
//! current one are ignored. This is what makes a replaced session harmless
//! even if its socket takes a while to finish closing.

use std::{ops::Sub, time::Duration};

use parley_proto::{ChatEvent, ClientFrame, CloseInfo, CloseKind, Identity, ServerFrame};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;

/// Minimum spacing between the starts of two successive sessions.
pub const DEFAULT_RECONNECT_FLOOR: Duration = Duration::from_secs(3);

/// How long the "connected" badge stays visible.
pub const DEFAULT_CONNECTED_BADGE_TTL: Duration = Duration::from_secs(2);

/// Notice shown when a newer session from the same identity took over.
pub const REPLACED_NOTICE: &str = "Disconnected: this name connected from another session.";

/// Identifies one transport session.
///
/// Monotonically increasing per manager; a larger id is a newer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identifies one scheduled rejoin timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RejoinTicket(pub u64);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session has been started (or the user left)
    Idle,
    /// Transport is opening
    Connecting,
    /// Identity sent, waiting for `ready`
    AwaitingReady,
    /// Server registered the identity; outbound sends may proceed
    Ready,
    /// Session closed; see the close info for why
    Closed,
}

/// Connection status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Nothing to show
    Idle,
    /// Session became ready (auto-hides after the badge TTL)
    Connected,
    /// Abnormal close; a new session is on its way
    Reconnecting,
    /// Permanent failure for the current identity
    Error,
}

/// Room-level events forwarded to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Someone joined
    Joined {
        /// Display name
        name: String,
    },
    /// Someone left
    Quit {
        /// Display name
        name: String,
    },
    /// Room metadata changed
    RoomInfo {
        /// Known channels
        channels: Vec<String>,
        /// Members online
        members: Vec<String>,
        /// Topic, if set
        topic: Option<String>,
    },
    /// Room destruction scheduled at `at` (ms since epoch)
    DestructionScheduled {
        /// Destruction time
        at: u64,
    },
    /// Scheduled destruction cancelled
    DestructionCancelled,
    /// Room destroyed
    Destroyed,
    /// Pin state changed
    PinUpdate {
        /// Channel of the message
        channel: String,
        /// Message identity
        message_id: String,
        /// New pin state
        pinned: bool,
    },
}

/// Actions returned by the connection state machine.
///
/// The driver executes these in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a transport for `session`
    OpenTransport {
        /// Session the transport belongs to
        session: SessionId,
    },

    /// Close the transport of a superseded or abandoned session
    CloseTransport {
        /// Session to close
        session: SessionId,
    },

    /// Send a frame on `session`'s transport
    SendFrame {
        /// Session to send on
        session: SessionId,
        /// Frame to send
        frame: ClientFrame,
    },

    /// A new session started: inbound messages are buffered until `ready`
    SessionStarted {
        /// The new session
        session: SessionId,
    },

    /// The `ready` barrier was crossed for `session`
    ReadyBarrier {
        /// Session that became ready
        session: SessionId,
    },

    /// Status to display changed
    StatusChanged(ConnectionStatus),

    /// Call [`ConnectionManager::handle_rejoin_timer`] with `ticket` after
    /// `after` has elapsed
    ScheduleRejoin {
        /// Delay before the rejoin
        after: Duration,
        /// Ticket to hand back when the timer fires
        ticket: RejoinTicket,
    },

    /// Remove the persisted identity
    ClearIdentity,

    /// One-line system notice for the user
    Notice(String),

    /// Chat message from the server, to feed the ordering buffer
    Inbound(ChatEvent),

    /// Room-level event for the presentation layer
    Room(RoomEvent),
}

/// Connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Minimum time between the starts of successive sessions
    pub reconnect_floor: Duration,
    /// How long "connected" stays visible before reverting to idle
    pub connected_badge_ttl: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_floor: DEFAULT_RECONNECT_FLOOR,
            connected_badge_ttl: DEFAULT_CONNECTED_BADGE_TTL,
        }
    }
}

/// One transport session.
#[derive(Debug, Clone)]
pub struct Session<I> {
    /// Session identity
    pub id: SessionId,
    /// Display name sent in the identity frame
    pub identity: String,
    /// When `join` created the session
    pub started_at: I,
    /// Whether the server sent `ready`
    pub ready: bool,
    /// Close code and reason, once closed
    pub close: Option<CloseInfo>,
}

/// Control-channel connection manager
///
/// Owns at most one active [`Session`]. Pure state machine: no I/O, time is
/// passed as parameters.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    config: ConnectionConfig,
    state: ConnectionState,
    status: ConnectionStatus,
    identity: Option<String>,
    session: Option<Session<I>>,
    next_session: u64,
    /// Pending rejoin timer. Doubles as the rejoin guard flag.
    rejoin_pending: Option<RejoinTicket>,
    next_ticket: u64,
    /// Start of the most recent session, for the reconnect floor
    last_session_start: Option<I>,
    /// When the connected badge was shown
    connected_at: Option<I>,
}

impl<I> ConnectionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an idle manager.
    ///
    /// `identity` is the persisted display name, if any.
    pub fn new(config: ConnectionConfig, identity: Option<String>) -> Self {
        Self {
            config,
            state: ConnectionState::Idle,
            status: ConnectionStatus::Idle,
            identity,
            session: None,
            next_session: 1,
            rejoin_pending: None,
            next_ticket: 1,
            last_session_start: None,
            connected_at: None,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current display status
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Display name used for new sessions
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Set the display name used by the next `join`.
    pub fn set_identity(&mut self, name: impl Into<String>) {
        self.identity = Some(name.into());
    }

    /// Current session, if any
    pub fn session(&self) -> Option<&Session<I>> {
        self.session.as_ref()
    }

    /// Id of the current session, if any
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Whether the current session crossed the `ready` barrier
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Whether a rejoin timer is outstanding
    pub fn rejoin_pending(&self) -> bool {
        self.rejoin_pending.is_some()
    }

    /// Start a new session.
    ///
    /// Supersedes the current session (its transport is closed and its
    /// events ignored from now on) and cancels any pending rejoin timer.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::NoIdentity` if no display name is set
    pub fn join(&mut self, now: I) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let identity = self.identity.clone().ok_or(ConnectionError::NoIdentity)?;
        let mut actions = Vec::new();

        if let Some(old) = self.session.take()
            && old.close.is_none()
        {
            debug!(session = %old.id, "superseding session");
            actions.push(ConnectionAction::CloseTransport { session: old.id });
        }

        self.rejoin_pending = None;

        let id = SessionId(self.next_session);
        self.next_session += 1;
        self.last_session_start = Some(now);
        self.state = ConnectionState::Connecting;
        self.session =
            Some(Session { id, identity: identity.clone(), started_at: now, ready: false, close: None });

        info!(session = %id, identity = %identity, "joining");

        actions.push(ConnectionAction::SessionStarted { session: id });
        actions.push(ConnectionAction::OpenTransport { session: id });
        Ok(actions)
    }

    /// Transport for `session` finished opening: send the identity frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if the current session is not
    ///   connecting
    pub fn handle_open(&mut self, session: SessionId) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let Some(current) = self.current(session) else {
            return Ok(Vec::new());
        };

        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "handle_open".to_string(),
            });
        }

        let frame = ClientFrame::Identity(Identity { name: current.identity.clone() });
        self.state = ConnectionState::AwaitingReady;

        debug!(session = %session, "transport open, sending identity");
        Ok(vec![ConnectionAction::SendFrame { session, frame }])
    }

    /// Frame received on `session`'s transport.
    pub fn handle_frame(&mut self, session: SessionId, frame: ServerFrame, now: I) -> Vec<ConnectionAction> {
        if self.current(session).is_none() {
            debug!(session = %session, kind = frame.kind(), "dropping frame from stale session");
            return Vec::new();
        }

        match frame {
            ServerFrame::Ready => self.handle_ready(session, now),
            ServerFrame::Message(event) => vec![ConnectionAction::Inbound(event)],
            ServerFrame::Error { message } => {
                warn!(session = %session, error = %message, "server reported error");
                vec![ConnectionAction::Notice(format!("Server error: {message}"))]
            },
            ServerFrame::Joined { name } => vec![ConnectionAction::Room(RoomEvent::Joined { name })],
            ServerFrame::Quit { name } => vec![ConnectionAction::Room(RoomEvent::Quit { name })],
            ServerFrame::RoomInfo { channels, members, topic } => {
                vec![ConnectionAction::Room(RoomEvent::RoomInfo { channels, members, topic })]
            },
            ServerFrame::DestructionScheduled { at } => {
                vec![ConnectionAction::Room(RoomEvent::DestructionScheduled { at })]
            },
            ServerFrame::DestructionCancelled => {
                vec![ConnectionAction::Room(RoomEvent::DestructionCancelled)]
            },
            ServerFrame::Destroyed => vec![ConnectionAction::Room(RoomEvent::Destroyed)],
            ServerFrame::PinUpdate { channel, message_id, pinned } => {
                vec![ConnectionAction::Room(RoomEvent::PinUpdate { channel, message_id, pinned })]
            },
        }
    }

    fn handle_ready(&mut self, session: SessionId, now: I) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Ready {
            debug!(session = %session, "duplicate ready ignored");
            return Vec::new();
        }

        if let Some(current) = self.session.as_mut() {
            current.ready = true;
        }
        self.state = ConnectionState::Ready;
        self.status = ConnectionStatus::Connected;
        self.connected_at = Some(now);

        info!(session = %session, "session ready");
        vec![
            ConnectionAction::ReadyBarrier { session },
            ConnectionAction::StatusChanged(ConnectionStatus::Connected),
        ]
    }

    /// Transport for `session` closed.
    pub fn handle_close(&mut self, session: SessionId, close: CloseInfo, now: I) -> Vec<ConnectionAction> {
        let Some(current) = self.session.as_mut().filter(|s| s.id == session && s.close.is_none())
        else {
            debug!(session = %session, code = close.code, "close from stale session ignored");
            return Vec::new();
        };

        let kind = close.kind();
        current.close = Some(close.clone());
        self.state = ConnectionState::Closed;
        self.connected_at = None;

        match kind {
            CloseKind::Replaced => {
                info!(session = %session, "session replaced by a newer one");
                vec![ConnectionAction::Notice(REPLACED_NOTICE.to_string())]
            },
            CloseKind::IdentityRejected => {
                warn!(session = %session, reason = %close.reason, "identity rejected");
                self.identity = None;
                self.status = ConnectionStatus::Error;

                let notice = if close.reason.is_empty() {
                    "Name rejected by the server. Choose another name.".to_string()
                } else {
                    format!("Name rejected by the server: {}", close.reason)
                };
                vec![
                    ConnectionAction::ClearIdentity,
                    ConnectionAction::Notice(notice),
                    ConnectionAction::StatusChanged(ConnectionStatus::Error),
                ]
            },
            CloseKind::Abnormal => {
                warn!(session = %session, code = close.code, reason = %close.reason, "abnormal close");
                let mut actions = Vec::new();
                if self.status != ConnectionStatus::Reconnecting {
                    self.status = ConnectionStatus::Reconnecting;
                    actions.push(ConnectionAction::StatusChanged(ConnectionStatus::Reconnecting));
                }
                actions.extend(self.rejoin(now));
                actions
            },
        }
    }

    /// Transport for `session` failed (error event, failed open).
    ///
    /// Treated as an abnormal close.
    pub fn handle_transport_error(
        &mut self,
        session: SessionId,
        reason: &str,
        now: I,
    ) -> Vec<ConnectionAction> {
        self.handle_close(session, CloseInfo::abnormal(reason), now)
    }

    /// Replace a dead session, honouring the reconnect floor.
    ///
    /// Joins immediately if at least `reconnect_floor` has passed since the
    /// previous session started, otherwise schedules a timer for the
    /// remainder. Idempotent: while a timer is pending or the current session
    /// is still alive, further calls do nothing, so any number of calls yields
    /// at most one new session.
    pub fn rejoin(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.rejoin_pending.is_some() {
            debug!("rejoin already pending");
            return Vec::new();
        }
        if self.session.as_ref().is_some_and(|s| s.close.is_none()) {
            debug!("rejoin skipped, session alive");
            return Vec::new();
        }
        if self.identity.is_none() {
            debug!("rejoin skipped, no identity");
            return Vec::new();
        }

        let elapsed = self.last_session_start.map_or(self.config.reconnect_floor, |start| now - start);
        if elapsed < self.config.reconnect_floor {
            let after = self.config.reconnect_floor - elapsed;
            let ticket = RejoinTicket(self.next_ticket);
            self.next_ticket += 1;
            self.rejoin_pending = Some(ticket);

            debug!(after_ms = after.as_millis() as u64, "rejoin scheduled");
            return vec![ConnectionAction::ScheduleRejoin { after, ticket }];
        }

        self.join(now).unwrap_or_default()
    }

    /// A rejoin timer fired.
    ///
    /// Ignored unless `ticket` is the outstanding one (a manual `join` or
    /// `leave` in the meantime cancels it).
    pub fn handle_rejoin_timer(&mut self, ticket: RejoinTicket, now: I) -> Vec<ConnectionAction> {
        if self.rejoin_pending != Some(ticket) {
            debug!(ticket = ticket.0, "stale rejoin timer ignored");
            return Vec::new();
        }

        self.rejoin_pending = None;
        self.join(now).unwrap_or_default()
    }

    /// Client-initiated disconnect. Never reconnects.
    pub fn leave(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if let Some(session) = self.session.take()
            && session.close.is_none()
        {
            info!(session = %session.id, "leaving");
            actions.push(ConnectionAction::CloseTransport { session: session.id });
        }

        self.rejoin_pending = None;
        self.state = ConnectionState::Idle;
        self.connected_at = None;
        if self.status != ConnectionStatus::Idle {
            self.status = ConnectionStatus::Idle;
            actions.push(ConnectionAction::StatusChanged(ConnectionStatus::Idle));
        }
        actions
    }

    /// Process time-based events: auto-hide the connected badge.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.connected_at {
            Some(at) if self.status == ConnectionStatus::Connected => {
                if now - at >= self.config.connected_badge_ttl {
                    self.status = ConnectionStatus::Idle;
                    self.connected_at = None;
                    return vec![ConnectionAction::StatusChanged(ConnectionStatus::Idle)];
                }
                Vec::new()
            },
            _ => Vec::new(),
        }
    }

    /// The current session, if `session` is it and it has not closed.
    fn current(&self, session: SessionId) -> Option<&Session<I>> {
        self.session.as_ref().filter(|s| s.id == session && s.close.is_none())
    }
}
