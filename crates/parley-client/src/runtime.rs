//! Chat runtime.
//!
//! [`start`] spawns the runtime task and returns a [`ChatHandle`]. The task
//! owns the Sans-IO state machines and is the only place their actions are
//! executed:
//!
//! ```text
//!              ┌──────────── ChatHandle (commands) ────────────┐
//!              ↓                                               │
//! transport ──> Runtime ──> ConnectionManager ──> actions ──> Runtime
//!   events        │                                            │
//!                 ├──> MessageOrderingBuffer ──> decrypt (pool) ──> Presenter
//!                 └──> StoreDriver (replicated route / sync)
//! ```
//!
//! # Ordering
//!
//! Deliveries are decrypted concurrently on the worker pool but handed to
//! the presenter strictly in delivery order. Within one `send_message`,
//! encryption completes before the frame is queued.
//!
//! # Session readiness
//!
//! Sends wait for the `ready` barrier of the session that was current when
//! they started. If that session is replaced first, the send fails with
//! [`ClientError::SessionSuperseded`] instead of leaking onto the new one.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{
    StreamExt,
    future::{self, BoxFuture},
    stream::FuturesOrdered,
};
use parley_core::{
    ConnectionAction, ConnectionError, ConnectionManager, Delivery, Environment, KeyManager,
    MessageOrderingBuffer, Origin, RejoinTicket, ReplicatedStore, SessionContext, SessionContextHandle,
    SessionId, Storage,
};
use parley_crypto::{CryptoError, NONCE_SIZE, RoomKey, is_encrypted};
use parley_proto::{ChatEvent, ClientFrame, CloseInfo, OutboundMessage, ServerFrame};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    config::{ClientConfig, MessageRoute},
    error::{ClientError, TransportError, WorkerError},
    identity::IdentityStore,
    presenter::{
        DECRYPT_FAILED_PLACEHOLDER, ENCRYPTED_PLACEHOLDER, MessageSummary, Presenter,
        UNREADABLE_PLACEHOLDER,
    },
    store_driver::{StoreCommand, StoreDriver},
    transport::{Connector, Link, LinkSender, TransportEvent},
    worker_pool::CryptoWorkerPool,
};

/// Events from tasks the runtime spawned.
pub(crate) enum Input {
    /// Control transport event, tagged with its session.
    Transport { session: SessionId, event: TransportEvent },
    /// A rejoin timer fired.
    RejoinTimer(RejoinTicket),
    /// Message row from the replicated store.
    Replicated(ChatEvent),
}

enum Command {
    Join { name: Option<String>, reply: oneshot::Sender<Result<(), ClientError>> },
    Post { session: SessionId, message: OutboundMessage, reply: oneshot::Sender<Result<(), ClientError>> },
    SetChannel(String),
    Leave,
    Shutdown { reply: oneshot::Sender<()> },
}

/// Readiness of the current session, published to handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Readiness {
    session: Option<SessionId>,
    ready: bool,
}

enum Presentation {
    Message(MessageSummary),
    Barrier,
}

/// Start a chat client.
///
/// Loads (or derives and persists) the room key, opens the replicated store
/// when sync is enabled, and spawns the runtime. Nothing connects until
/// [`ChatHandle::join`].
///
/// # Errors
///
/// - `ClientError::Config` for a replicated route without sync
/// - `ClientError::Storage` / `ClientError::Store` if the identity or the
///   replicated store cannot be read
pub async fn start<S, C, E, P>(
    config: ClientConfig,
    storage: S,
    connector: C,
    env: E,
    presenter: P,
) -> Result<ChatHandle<S, E>, ClientError>
where
    S: Storage,
    C: Connector,
    E: Environment,
    P: Presenter,
{
    if config.route == MessageRoute::Replicated && !config.sync_enabled {
        return Err(ClientError::Config("replicated route requires sync".to_string()));
    }

    let pool = CryptoWorkerPool::new(config.worker_count);
    let keys = KeyManager::new(storage.clone());
    let key = load_room_key(&keys, &pool, &config.room).await;

    let identity = IdentityStore::new(storage.clone());
    let name = identity.name()?;
    let context = SessionContextHandle::new(SessionContext::new(&config.room, &config.channel));

    let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let store = if config.sync_enabled {
        let node = identity.node_id(&env)?;
        let store = ReplicatedStore::create(&config.room, node, storage.clone(), env.wall_clock_millis())?;
        let (store_tx, store_rx) = mpsc::unbounded_channel();
        let driver = StoreDriver::new(
            store,
            connector.clone(),
            env.clone(),
            config.sync_url(),
            config.connection.reconnect_floor,
            store_rx,
            inputs_tx.clone(),
        );
        tokio::spawn(driver.run());
        Some(store_tx)
    } else {
        None
    };

    let (key_tx, key_rx) = watch::channel(key);
    let (readiness_tx, readiness_rx) = watch::channel(Readiness::default());

    info!(room = %config.room, identity = ?name, route = ?config.route, sync = config.sync_enabled, "client starting");

    let runtime = Runtime {
        conn: ConnectionManager::new(config.connection.clone(), name),
        buffer: MessageOrderingBuffer::new(&config.channel),
        identity,
        connector,
        env: env.clone(),
        presenter,
        pool: pool.clone(),
        key: key_rx,
        readiness: readiness_tx,
        links: HashMap::new(),
        inputs: inputs_tx,
        store,
        presentations: FuturesOrdered::new(),
        config: config.clone(),
    };
    tokio::spawn(runtime.run(commands_rx, inputs_rx));

    Ok(ChatHandle {
        commands: commands_tx,
        readiness: readiness_rx,
        key: Arc::new(key_tx),
        keys,
        pool,
        context,
        env,
        room: config.room,
    })
}

/// Persisted key, or the default key derived (on the pool) from the room id.
///
/// `None` disables encryption: messages go out as plaintext and encrypted
/// ones render as a placeholder.
async fn load_room_key<S: Storage>(keys: &KeyManager<S>, pool: &CryptoWorkerPool, room: &str) -> Option<RoomKey> {
    match keys.get_room_key(room) {
        Ok(Some(key)) => {
            debug!(room, fingerprint = %key.fingerprint(), "using persisted room key");
            return Some(key);
        },
        Ok(None) => {},
        Err(e) => {
            warn!(room, error = %e, "room key unavailable, encryption disabled");
            return None;
        },
    }

    let key = match pool.derive_key(room, room).await {
        Ok(key) => key,
        Err(e) => {
            warn!(room, error = %e, "default room key not derived, encryption disabled");
            return None;
        },
    };
    if let Err(e) = keys.save_derived(room, room, &key) {
        // Usable for this run; derived again next start
        warn!(room, error = %e, "default room key not persisted");
    }
    Some(key)
}

struct Runtime<S, C, E, P>
where
    S: Storage,
    E: Environment,
{
    config: ClientConfig,
    conn: ConnectionManager<E::Instant>,
    buffer: MessageOrderingBuffer,
    identity: IdentityStore<S>,
    connector: C,
    env: E,
    presenter: P,
    pool: CryptoWorkerPool,
    key: watch::Receiver<Option<RoomKey>>,
    readiness: watch::Sender<Readiness>,
    /// Open control links by session
    links: HashMap<SessionId, LinkSender>,
    inputs: mpsc::UnboundedSender<Input>,
    store: Option<mpsc::UnboundedSender<StoreCommand>>,
    /// Deliveries being decrypted, in delivery order
    presentations: FuturesOrdered<BoxFuture<'static, Presentation>>,
}

impl<S, C, E, P> Runtime<S, C, E, P>
where
    S: Storage,
    C: Connector,
    E: Environment,
    P: Presenter,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut inputs: mpsc::UnboundedReceiver<Input>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command),
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                },
                Some(input) = inputs.recv() => self.handle_input(input),
                Some(presentation) = self.presentations.next(), if !self.presentations.is_empty() => {
                    self.present(presentation);
                },
                _ = ticker.tick() => {
                    let actions = self.conn.tick(self.env.now());
                    self.execute(actions);
                },
            }
        }

        let actions = self.conn.leave();
        self.execute(actions);
        info!(room = %self.config.room, "client stopped");
    }

    /// Returns `false` once the runtime should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Join { name, reply } => {
                let _ = reply.send(self.join(name));
            },
            Command::Post { session, message, reply } => self.post(session, message, reply),
            Command::SetChannel(channel) => self.buffer.set_active_channel(channel),
            Command::Leave => {
                let actions = self.conn.leave();
                self.execute(actions);
            },
            Command::Shutdown { reply } => {
                // Dropping the store sender stops the store driver
                self.store = None;
                let _ = reply.send(());
                return false;
            },
        }
        true
    }

    fn join(&mut self, name: Option<String>) -> Result<(), ClientError> {
        if let Some(name) = name {
            if let Err(e) = self.identity.save_name(&name) {
                warn!(error = %e, "identity not persisted");
            }
            self.conn.set_identity(name);
        }

        let actions = self.conn.join(self.env.now())?;
        self.execute(actions);
        Ok(())
    }

    fn post(&mut self, session: SessionId, message: OutboundMessage, reply: oneshot::Sender<Result<(), ClientError>>) {
        if self.conn.session_id() != Some(session) || !self.conn.is_ready() {
            let _ = reply.send(Err(ClientError::SessionSuperseded));
            return;
        }

        match (self.config.route, &self.store) {
            (MessageRoute::Control, _) => {
                let _ = reply.send(self.send_frame(session, &ClientFrame::Message(message)));
            },
            (MessageRoute::Replicated, Some(store)) => {
                let sender = self.conn.identity().unwrap_or_default().to_string();
                if let Err(mpsc::error::SendError(StoreCommand::Post { reply, .. })) =
                    store.send(StoreCommand::Post { message, sender, reply })
                {
                    let _ = reply.send(Err(ClientError::Closed));
                }
            },
            (MessageRoute::Replicated, None) => {
                let _ = reply.send(Err(ClientError::Config("replicated route requires sync".to_string())));
            },
        }
    }

    fn send_frame(&self, session: SessionId, frame: &ClientFrame) -> Result<(), ClientError> {
        let text = frame.encode().map_err(ConnectionError::from)?;
        let link = self.links.get(&session).ok_or(TransportError::Closed)?;
        link.send_text(text)?;
        Ok(())
    }

    fn handle_input(&mut self, input: Input) {
        let now = self.env.now();
        let actions = match input {
            Input::Transport { session, event } => match event {
                TransportEvent::Open => match self.conn.handle_open(session) {
                    Ok(actions) => actions,
                    Err(e) => {
                        warn!(session = %session, error = %e, "unexpected transport open");
                        Vec::new()
                    },
                },
                TransportEvent::Text(text) => match ServerFrame::decode(&text) {
                    Ok(frame) => self.conn.handle_frame(session, frame, now),
                    Err(e) => {
                        warn!(session = %session, error = %e, "dropping malformed control frame");
                        Vec::new()
                    },
                },
                TransportEvent::Binary(_) => {
                    debug!(session = %session, "ignoring binary frame on control channel");
                    Vec::new()
                },
                TransportEvent::Closed(close) => {
                    self.links.remove(&session);
                    self.conn.handle_close(session, close, now)
                },
            },
            Input::RejoinTimer(ticket) => self.conn.handle_rejoin_timer(ticket, now),
            Input::Replicated(event) => {
                self.deliver(Origin::Replicated, event);
                Vec::new()
            },
        };
        self.execute(actions);
    }

    fn execute(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::OpenTransport { session } => self.open_transport(session),
                ConnectionAction::CloseTransport { session } => {
                    // Dropping the sender closes the socket
                    self.links.remove(&session);
                },
                ConnectionAction::SendFrame { session, frame } => {
                    if let Err(e) = self.send_frame(session, &frame) {
                        warn!(session = %session, error = %e, "frame not sent");
                    }
                },
                ConnectionAction::SessionStarted { .. } => self.buffer.begin_initial_load(),
                ConnectionAction::ReadyBarrier { session } => {
                    let backlog = self.buffer.flush();
                    debug!(session = %session, backlog = backlog.len(), "ready barrier crossed");
                    for delivery in backlog {
                        self.present_later(delivery);
                    }
                    self.presentations.push_back(Box::pin(future::ready(Presentation::Barrier)));
                },
                ConnectionAction::StatusChanged(status) => self.presenter.on_connection_status_change(status),
                ConnectionAction::ScheduleRejoin { after, ticket } => self.schedule_rejoin(after, ticket),
                ConnectionAction::ClearIdentity => {
                    if let Err(e) = self.identity.clear_name() {
                        warn!(error = %e, "rejected identity not cleared");
                    }
                },
                ConnectionAction::Notice(notice) => self.presenter.on_notice(&notice),
                ConnectionAction::Inbound(event) => self.deliver(Origin::Session, event),
                ConnectionAction::Room(event) => self.presenter.on_room_event(&event),
            }
        }

        // A closed session counts as none: sends waiting on it fail
        let live = self.conn.session().filter(|s| s.close.is_none()).map(|s| s.id);
        let current = Readiness { session: live, ready: self.conn.is_ready() };
        self.readiness.send_if_modified(|readiness| {
            if *readiness == current {
                return false;
            }
            *readiness = current;
            true
        });
    }

    fn open_transport(&mut self, session: SessionId) {
        let Link { sender, mut events } = self.connector.connect(&self.config.control_url());
        self.links.insert(session, sender);

        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let last = matches!(event, TransportEvent::Closed(_));
                if inputs.send(Input::Transport { session, event }).is_err() || last {
                    return;
                }
            }
            // Link ended without a close event
            let event = TransportEvent::Closed(CloseInfo::abnormal("link dropped"));
            let _ = inputs.send(Input::Transport { session, event });
        });
    }

    fn schedule_rejoin(&self, after: Duration, ticket: RejoinTicket) {
        let env = self.env.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            env.sleep(after).await;
            let _ = inputs.send(Input::RejoinTimer(ticket));
        });
    }

    fn deliver(&mut self, origin: Origin, event: ChatEvent) {
        if let Some(delivery) = self.buffer.receive_from(origin, event) {
            self.present_later(delivery);
        }
    }

    fn present_later(&mut self, delivery: Delivery) {
        let key = self.key.borrow().clone();
        let pool = self.pool.clone();
        self.presentations
            .push_back(Box::pin(async move { Presentation::Message(decode(&pool, key, delivery).await) }));
    }

    fn present(&mut self, presentation: Presentation) {
        match presentation {
            Presentation::Message(message) => self.presenter.on_message_ready(message),
            Presentation::Barrier => self.presenter.on_ready_barrier_crossed(),
        }
    }
}

/// Decrypt a delivery for display. Failures only affect this message.
async fn decode(pool: &CryptoWorkerPool, key: Option<RoomKey>, delivery: Delivery) -> MessageSummary {
    let Delivery { message, inline } = delivery;

    let text = if !is_encrypted(&message.text) {
        message.text
    } else if let Some(key) = key {
        match pool.decrypt(message.text, key).await {
            Ok(text) => text,
            Err(WorkerError::Crypto(CryptoError::MalformedEnvelope)) => UNREADABLE_PLACEHOLDER.to_string(),
            Err(e) => {
                debug!(id = %message.id, error = %e, "message not decrypted");
                DECRYPT_FAILED_PLACEHOLDER.to_string()
            },
        }
    } else {
        ENCRYPTED_PLACEHOLDER.to_string()
    };

    MessageSummary {
        id: message.id,
        sender: message.sender,
        channel: message.channel,
        text,
        timestamp: message.timestamp,
        reply_to: message.reply_to,
        thread: message.thread,
        inline,
    }
}

/// Handle to a running client.
///
/// Cheap to clone; every clone drives the same runtime.
#[derive(Clone)]
pub struct ChatHandle<S: Storage, E: Environment> {
    commands: mpsc::UnboundedSender<Command>,
    readiness: watch::Receiver<Readiness>,
    key: Arc<watch::Sender<Option<RoomKey>>>,
    keys: KeyManager<S>,
    pool: CryptoWorkerPool,
    context: SessionContextHandle,
    env: E,
    room: String,
}

impl<S: Storage, E: Environment> ChatHandle<S, E> {
    /// Start a new session, replacing any current one.
    ///
    /// `name` replaces (and persists) the display name; `None` reuses the
    /// persisted one.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connection` with `NoIdentity` if no name is known
    pub async fn join(&self, name: Option<&str>) -> Result<(), ClientError> {
        let (reply, result) = oneshot::channel();
        self.command(Command::Join { name: name.map(str::to_string), reply })?;
        result.await.map_err(|_| ClientError::Closed)?
    }

    /// Send `text` to the active channel (and open thread, if any).
    ///
    /// Waits for the current session's `ready` barrier, encrypts with the
    /// room key when one is available, then queues the frame. Returns the
    /// new message id.
    pub async fn send_message(&self, text: &str) -> Result<String, ClientError> {
        self.post(text, None).await
    }

    /// Send `text` as a reply to message `reply_to`.
    pub async fn send_reply(&self, text: &str, reply_to: &str) -> Result<String, ClientError> {
        self.post(text, Some(reply_to.to_string())).await
    }

    async fn post(&self, text: &str, reply_to: Option<String>) -> Result<String, ClientError> {
        let session = self.wait_ready().await?;
        let context = self.context.get();

        let body = match self.current_key() {
            Some(key) => {
                let mut nonce = [0u8; NONCE_SIZE];
                self.env.random_bytes(&mut nonce);
                self.pool.encrypt(text, key, nonce).await?
            },
            None => text.to_string(),
        };

        let id = format!("{:032x}", self.env.random_u128());
        let message = OutboundMessage {
            id: id.clone(),
            channel: context.channel,
            text: body,
            reply_to,
            thread_id: context.thread,
        };

        let (reply, result) = oneshot::channel();
        self.command(Command::Post { session, message, reply })?;
        result.await.map_err(|_| ClientError::Closed)??;
        Ok(id)
    }

    /// Wait for the `ready` barrier of the session current at call time.
    async fn wait_ready(&self) -> Result<SessionId, ClientError> {
        let mut readiness = self.readiness.clone();
        let Some(session) = readiness.borrow_and_update().session else {
            return Err(ClientError::NotConnected);
        };

        let reached = *readiness
            .wait_for(|r| r.session != Some(session) || r.ready)
            .await
            .map_err(|_| ClientError::Closed)?;

        if reached.session == Some(session) { Ok(session) } else { Err(ClientError::SessionSuperseded) }
    }

    fn current_key(&self) -> Option<RoomKey> {
        self.key.borrow().clone()
    }

    /// Derive a key from `passphrase` (on the worker pool), persist it and
    /// use it from now on. Returns the key's fingerprint.
    ///
    /// # Errors
    ///
    /// - `ClientError::Worker` if derivation failed
    /// - `ClientError::Keys` if the key was not persisted; the previous key
    ///   stays in use
    pub async fn set_room_password(&self, passphrase: &str) -> Result<String, ClientError> {
        let key = self.pool.derive_key(&self.room, passphrase).await?;
        self.keys.save_derived(&self.room, passphrase, &key)?;

        let fingerprint = key.fingerprint();
        self.key.send_replace(Some(key));
        Ok(fingerprint)
    }

    /// Passphrase of the current key, for display.
    pub fn room_password(&self) -> Result<Option<String>, ClientError> {
        Ok(self.keys.get_room_password(&self.room)?)
    }

    /// Forget the room key. Messages are sent unencrypted until a new
    /// passphrase is set.
    pub fn clear_room_password(&self) -> Result<(), ClientError> {
        self.keys.delete_room_password(&self.room)?;
        self.key.send_replace(None);
        Ok(())
    }

    /// Fingerprint of the key in use.
    pub fn key_fingerprint(&self) -> Option<String> {
        self.key.borrow().as_ref().map(RoomKey::fingerprint)
    }

    /// Switch the active channel, closing any open thread. Clears the
    /// channel's unread count.
    pub fn set_channel(&self, channel: &str) -> Result<(), ClientError> {
        self.context.set_channel(channel);
        self.command(Command::SetChannel(channel.to_string()))
    }

    /// Open or close a thread in the active channel.
    pub fn set_thread(&self, thread: Option<String>) -> bool {
        self.context.set_thread(thread)
    }

    /// Current room, channel and thread.
    pub fn context(&self) -> SessionContext {
        self.context.get()
    }

    /// Receiver notified on every context change.
    pub fn subscribe_context(&self) -> watch::Receiver<SessionContext> {
        self.context.subscribe()
    }

    /// Close the current session. Does not reconnect.
    pub fn leave(&self) -> Result<(), ClientError> {
        self.command(Command::Leave)
    }

    /// Leave and stop the runtime.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (reply, done) = oneshot::channel();
        self.command(Command::Shutdown { reply })?;
        done.await.map_err(|_| ClientError::Closed)
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }
}

impl<S: Storage, E: Environment> std::fmt::Debug for ChatHandle<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHandle").field("room", &self.room).finish_non_exhaustive()
    }
}
