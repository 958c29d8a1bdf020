//! Runtime scenarios
//!
//! End-to-end runs of the client runtime against in-memory peers playing the
//! server. Time is virtual (`start_paused`), so reconnect floors and badge
//! timers elapse instantly while keeping their order.

use std::time::Duration;

use parley_client::{
    ClientConfig, ClientError, ENCRYPTED_PLACEHOLDER, MemoryConnector, MemoryPeer, MessageRoute, MessageSummary,
    Presenter, SystemEnv, UNREADABLE_PLACEHOLDER,
};
use parley_core::{ConnectionStatus, MemoryStorage, ReplicatedStore, RoomEvent, Storage, Table, storage::paths};
use parley_crypto::{ENVELOPE_PREFIX, RoomKey, decrypt_text, derive_room_key, encrypt_text, is_encrypted};
use parley_proto::{
    CellValue, ChatEvent, ClientFrame, CloseInfo, Identity, OutboundMessage, ServerFrame, SyncMessage, close,
};
use tokio::{
    sync::mpsc,
    time::{Instant, timeout},
};

#[derive(Debug)]
enum Seen {
    Status(ConnectionStatus),
    Message(MessageSummary),
    Barrier,
    Notice(String),
    Room(RoomEvent),
}

struct RecordingPresenter(mpsc::UnboundedSender<Seen>);

impl Presenter for RecordingPresenter {
    fn on_connection_status_change(&mut self, status: ConnectionStatus) {
        let _ = self.0.send(Seen::Status(status));
    }

    fn on_message_ready(&mut self, message: MessageSummary) {
        let _ = self.0.send(Seen::Message(message));
    }

    fn on_ready_barrier_crossed(&mut self) {
        let _ = self.0.send(Seen::Barrier);
    }

    fn on_notice(&mut self, notice: &str) {
        let _ = self.0.send(Seen::Notice(notice.to_string()));
    }

    fn on_room_event(&mut self, event: &RoomEvent) {
        let _ = self.0.send(Seen::Room(event.clone()));
    }
}

type Chat = parley_client::ChatHandle<MemoryStorage, SystemEnv>;

struct Harness {
    chat: Chat,
    storage: MemoryStorage,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
    seen: mpsc::UnboundedReceiver<Seen>,
}

fn control_only() -> ClientConfig {
    ClientConfig { sync_enabled: false, ..ClientConfig::default() }
}

async fn start(config: ClientConfig) -> Harness {
    start_with(config, MemoryStorage::new()).await
}

async fn start_with(config: ClientConfig, storage: MemoryStorage) -> Harness {
    let (connector, peers) = MemoryConnector::new();
    let (tx, seen) = mpsc::unbounded_channel();
    let chat = parley_client::start(config, storage.clone(), connector, SystemEnv::new(), RecordingPresenter(tx))
        .await
        .unwrap();
    Harness { chat, storage, peers, seen }
}

fn default_key() -> RoomKey {
    derive_room_key("lobby", "lobby")
}

fn event(id: &str, channel: &str, text: &str, timestamp: u64) -> ServerFrame {
    ServerFrame::Message(ChatEvent {
        id: id.to_string(),
        sender: "bob".to_string(),
        channel: channel.to_string(),
        text: text.to_string(),
        timestamp,
        reply_to: None,
        thread: None,
    })
}

impl Harness {
    /// Accept the control connection and complete the identity handshake.
    async fn accept_control(&mut self) -> MemoryPeer {
        let mut peer = self.peers.recv().await.unwrap();
        assert!(peer.url().ends_with("/room/lobby"), "unexpected url {}", peer.url());
        peer.open();

        let identity = ClientFrame::decode(&peer.recv_text().await.unwrap()).unwrap();
        assert!(matches!(identity, ClientFrame::Identity(Identity { .. })));
        peer
    }

    async fn ready(&mut self) -> MemoryPeer {
        self.chat.join(Some("alice")).await.unwrap();
        let peer = self.accept_control().await;
        peer.send_frame(&ServerFrame::Ready);
        self.until_barrier().await;
        peer
    }

    /// Next presenter callback. Fails instead of waiting forever.
    async fn next_seen(&mut self) -> Seen {
        timeout(Duration::from_secs(60), self.seen.recv())
            .await
            .expect("presenter received nothing for 60s")
            .unwrap()
    }

    /// Messages presented before the next barrier.
    async fn until_barrier(&mut self) -> Vec<MessageSummary> {
        let mut messages = Vec::new();
        loop {
            match self.next_seen().await {
                Seen::Message(message) => messages.push(message),
                Seen::Barrier => return messages,
                _ => {},
            }
        }
    }

    async fn next_message(&mut self) -> MessageSummary {
        loop {
            if let Seen::Message(message) = self.next_seen().await {
                return message;
            }
        }
    }

    async fn next_notice(&mut self) -> String {
        loop {
            if let Seen::Notice(notice) = self.next_seen().await {
                return notice;
            }
        }
    }

    async fn wait_status(&mut self, expected: ConnectionStatus) {
        loop {
            if let Seen::Status(status) = self.next_seen().await
                && status == expected
            {
                return;
            }
        }
    }
}

async fn sent_message(peer: &mut MemoryPeer) -> OutboundMessage {
    match ClientFrame::decode(&peer.recv_text().await.unwrap()).unwrap() {
        ClientFrame::Message(message) => message,
        other => panic!("expected a message frame, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn join_then_send_encrypts_once() {
    let mut h = start(control_only()).await;

    h.chat.join(Some("alice")).await.unwrap();
    assert_eq!(h.storage.get(paths::IDENTITY_NAME).unwrap().as_deref(), Some(&b"alice"[..]));

    let mut peer = h.peers.recv().await.unwrap();
    peer.open();
    let identity = ClientFrame::decode(&peer.recv_text().await.unwrap()).unwrap();
    assert_eq!(identity, ClientFrame::Identity(Identity { name: "alice".to_string() }));

    peer.send_frame(&ServerFrame::Ready);
    let id = h.chat.send_message("hello").await.unwrap();

    let message = sent_message(&mut peer).await;
    assert_eq!(message.id, id);
    assert_eq!(message.channel, "general");
    assert!(is_encrypted(&message.text));
    assert_eq!(decrypt_text(&message.text, &default_key()).unwrap(), "hello");
    assert!(peer.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn backlog_is_presented_in_order_before_the_barrier() {
    let mut h = start(control_only()).await;
    h.chat.join(Some("alice")).await.unwrap();
    let peer = h.accept_control().await;

    let key = default_key();
    for (id, timestamp) in [("c", 300), ("a", 100), ("b", 200)] {
        let text = encrypt_text(&format!("text {id}"), &key, [timestamp as u8; 24]);
        peer.send_frame(&event(id, "general", &text, timestamp));
    }
    peer.send_frame(&event("r", "random", "plain", 250));
    peer.send_frame(&ServerFrame::Ready);

    let backlog = h.until_barrier().await;
    let order: Vec<&str> = backlog.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(order, ["a", "b", "r", "c"]);
    assert_eq!(backlog[0].text, "text a");
    assert_eq!(backlog[3].text, "text c");
    assert!(!backlog[2].inline);
    assert_eq!(backlog[2].text, "plain");

    // Replayed backlog is not presented twice
    peer.send_frame(&event("a", "general", "again", 100));
    peer.send_frame(&event("d", "general", "fresh", 400));
    assert_eq!(h.next_message().await.id, "d");
}

#[tokio::test(start_paused = true)]
async fn undecryptable_messages_get_placeholders() {
    let mut h = start(control_only()).await;
    let peer = h.ready().await;

    peer.send_frame(&event("m1", "general", &format!("{ENVELOPE_PREFIX}garbage"), 10));
    assert_eq!(h.next_message().await.text, UNREADABLE_PLACEHOLDER);

    h.chat.clear_room_password().unwrap();
    assert_eq!(h.chat.key_fingerprint(), None);

    let text = encrypt_text("secret", &default_key(), [1; 24]);
    peer.send_frame(&event("m2", "general", &text, 20));
    assert_eq!(h.next_message().await.text, ENCRYPTED_PLACEHOLDER);
}

#[tokio::test(start_paused = true)]
async fn cleared_key_sends_plaintext_and_new_password_takes_over() {
    let mut h = start(control_only()).await;
    let mut peer = h.ready().await;

    h.chat.clear_room_password().unwrap();
    h.chat.send_message("in the clear").await.unwrap();
    assert_eq!(sent_message(&mut peer).await.text, "in the clear");

    let fingerprint = h.chat.set_room_password("hunter2").await.unwrap();
    assert_eq!(fingerprint, derive_room_key("lobby", "hunter2").fingerprint());
    assert_eq!(h.chat.room_password().unwrap().as_deref(), Some("hunter2"));

    h.chat.send_message("sealed").await.unwrap();
    let message = sent_message(&mut peer).await;
    assert_eq!(decrypt_text(&message.text, &derive_room_key("lobby", "hunter2")).unwrap(), "sealed");
}

#[tokio::test(start_paused = true)]
async fn replies_and_threads_follow_the_context() {
    let mut h = start(control_only()).await;
    let mut peer = h.ready().await;

    h.chat.set_channel("random").unwrap();
    h.chat.set_thread(Some("root".to_string()));
    h.chat.send_reply("me too", "m0").await.unwrap();

    let message = sent_message(&mut peer).await;
    assert_eq!(message.channel, "random");
    assert_eq!(message.thread_id.as_deref(), Some("root"));
    assert_eq!(message.reply_to.as_deref(), Some("m0"));
}

#[tokio::test(start_paused = true)]
async fn abnormal_close_reconnects_after_the_floor() {
    let mut h = start(control_only()).await;
    let joined = Instant::now();
    let first = h.ready().await;

    first.close(CloseInfo::abnormal("server restarted"));
    h.wait_status(ConnectionStatus::Reconnecting).await;

    let second = h.accept_control().await;
    assert!(joined.elapsed() >= Duration::from_secs(3));

    second.send_frame(&ServerFrame::Ready);
    h.until_barrier().await;

    // Badge reverts to idle on its own
    h.wait_status(ConnectionStatus::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn rejected_name_is_forgotten_and_not_retried() {
    let mut h = start(control_only()).await;
    h.chat.join(Some("alice")).await.unwrap();
    let peer = h.accept_control().await;

    peer.close(CloseInfo::new(close::NAME_INVALID, "name taken"));
    assert!(h.next_notice().await.contains("name taken"));
    h.wait_status(ConnectionStatus::Error).await;
    assert_eq!(h.storage.get(paths::IDENTITY_NAME).unwrap(), None);

    assert!(timeout(Duration::from_secs(10), h.peers.recv()).await.is_err());
    assert!(matches!(h.chat.send_message("hi").await, Err(ClientError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn replaced_session_only_notifies() {
    let mut h = start(control_only()).await;
    let peer = h.ready().await;

    peer.close(CloseInfo::new(close::NORMAL, close::REPLACED_REASON));
    h.next_notice().await;
    assert!(timeout(Duration::from_secs(10), h.peers.recv()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn pending_send_fails_when_its_session_is_superseded() {
    let mut h = start(control_only()).await;
    h.chat.join(Some("alice")).await.unwrap();
    let mut first = h.accept_control().await;

    {
        let send = h.chat.send_message("too late");
        tokio::pin!(send);
        assert!(futures::poll!(&mut send).is_pending());

        h.chat.join(None).await.unwrap();
        assert!(matches!(send.await, Err(ClientError::SessionSuperseded)));
    }

    assert!(first.is_closed_by_client());
    assert!(first.try_recv().is_none());

    // The replacement session carries later sends
    let mut second = h.accept_control().await;
    second.send_frame(&ServerFrame::Ready);
    h.chat.send_message("on time").await.unwrap();
    sent_message(&mut second).await;
}

#[tokio::test(start_paused = true)]
async fn send_without_session_is_rejected() {
    let h = start(control_only()).await;
    assert!(matches!(h.chat.send_message("hello").await, Err(ClientError::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn join_without_a_name_fails() {
    let h = start(control_only()).await;
    assert!(matches!(h.chat.join(None).await, Err(ClientError::Connection(_))));
}

#[tokio::test(start_paused = true)]
async fn room_events_reach_the_presenter() {
    let mut h = start(control_only()).await;
    let peer = h.ready().await;

    peer.send_frame(&ServerFrame::Joined { name: "bob".to_string() });
    loop {
        if let Seen::Room(RoomEvent::Joined { name }) = h.next_seen().await {
            assert_eq!(name, "bob");
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn replicated_route_writes_rows_and_syncs() {
    let mut h = start(ClientConfig { route: MessageRoute::Replicated, ..ClientConfig::default() }).await;

    let mut sync = h.peers.recv().await.unwrap();
    assert!(sync.url().ends_with("/sync/lobby"));
    sync.open();
    assert!(matches!(sync.recv_sync().await, Some(SyncMessage::Hello { room, .. }) if room == "lobby"));
    assert_eq!(sync.recv_sync().await, Some(SyncMessage::Load));
    sync.send_sync(&SyncMessage::Snapshot { cells: Vec::new() });
    assert!(matches!(sync.recv_sync().await, Some(SyncMessage::Save { .. })));

    let mut control = h.ready().await;
    let id = h.chat.send_message("over the store").await.unwrap();

    let Some(SyncMessage::Delta { cells }) = sync.recv_sync().await else {
        panic!("expected a delta");
    };
    assert!(cells.iter().all(|c| c.table == "messages" && c.row == id));
    let text = cells.iter().find(|c| c.column == "text").and_then(|c| c.value.as_text()).unwrap();
    assert!(is_encrypted(text));

    let presented = h.next_message().await;
    assert_eq!(presented.id, id);
    assert_eq!(presented.sender, "alice");
    assert_eq!(presented.text, "over the store");
    assert!(control.try_recv().is_none());
}

fn remote_cells(row: &str, text: &str, timestamp: u64) -> Vec<parley_proto::CellRecord> {
    let cell = |column: &str, value: CellValue| parley_proto::CellRecord {
        table: "messages".to_string(),
        row: row.to_string(),
        column: column.to_string(),
        value,
        stamp: parley_proto::Stamp { millis: timestamp, counter: 0, node: 99 },
    };
    vec![
        cell("sender", CellValue::from("carol")),
        cell("channel", CellValue::from("general")),
        cell("text", CellValue::from(text)),
        cell("timestamp", CellValue::Int(timestamp as i64)),
    ]
}

#[tokio::test(start_paused = true)]
async fn relay_rows_synced_before_join_are_presented_at_the_barrier() {
    let mut h = start(ClientConfig::default()).await;
    let mut sync = h.peers.recv().await.unwrap();
    sync.open();
    assert!(matches!(sync.recv_sync().await, Some(SyncMessage::Hello { .. })));
    assert_eq!(sync.recv_sync().await, Some(SyncMessage::Load));

    sync.send_sync(&SyncMessage::Snapshot { cells: remote_cells("remote", "from afar", 5) });
    assert!(matches!(sync.recv_sync().await, Some(SyncMessage::Save { .. })));

    h.chat.join(Some("alice")).await.unwrap();
    let control = h.accept_control().await;
    control.send_frame(&event("backlog", "general", "earlier", 3));
    control.send_frame(&ServerFrame::Ready);

    let backlog = h.until_barrier().await;
    let ids: Vec<&str> = backlog.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["backlog", "remote"]);
    assert_eq!(backlog[1].sender, "carol");
    assert_eq!(backlog[1].text, "from afar");

    // Once live, relay deltas are presented as they arrive
    sync.send_sync(&SyncMessage::Delta { cells: remote_cells("later", "still here", 9) });
    assert_eq!(h.next_message().await.id, "later");
}

#[tokio::test(start_paused = true)]
async fn persisted_rows_are_restored_across_sessions() {
    let storage = MemoryStorage::new();
    {
        let mut store = ReplicatedStore::create("lobby", 7, storage.clone(), 0).unwrap();
        let values = vec![
            ("sender", CellValue::from("alice")),
            ("channel", CellValue::from("general")),
            ("text", CellValue::from("written last time")),
            ("timestamp", CellValue::Int(42)),
        ];
        store.upsert(Table::Messages, "old", values, 42).unwrap();
    }

    let mut h = start_with(ClientConfig::default(), storage).await;
    // Relay never answers; the restored row must not depend on it
    let _sync = h.peers.recv().await.unwrap();

    h.chat.join(Some("alice")).await.unwrap();
    let first = h.accept_control().await;
    // Superseded before ready
    h.chat.join(None).await.unwrap();
    assert!(first.is_closed_by_client());

    let second = h.accept_control().await;
    second.send_frame(&ServerFrame::Ready);
    let backlog = h.until_barrier().await;
    assert_eq!(backlog.len(), 1);
    assert_eq!(backlog[0].id, "old");
    assert_eq!(backlog[0].text, "written last time");
}

#[tokio::test]
async fn replicated_route_requires_sync() {
    let (connector, _peers) = MemoryConnector::new();
    let (tx, _seen) = mpsc::unbounded_channel();
    let config = ClientConfig { route: MessageRoute::Replicated, sync_enabled: false, ..ClientConfig::default() };

    let result =
        parley_client::start(config, MemoryStorage::new(), connector, SystemEnv::new(), RecordingPresenter(tx)).await;
    assert!(matches!(result, Err(ClientError::Config(_))));
}
