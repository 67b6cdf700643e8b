//! Shared helpers for the integration tests: start a relay on a random port
//! and talk to it over WebSocket and HTTP.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::broker::memory::MemoryBroker;
use relay_server::broker::outbox::OutboxPublisher;
use relay_server::broker::BrokerPublisher;
use relay_server::config::{ChatSetMembers, DispatchConfig, KeepaliveConfig};
use relay_server::state::AppState;
use relay_server::subscriptions::memory::MemorySubscriptionStore;
use relay_server::subscriptions::sqlite::SqliteSubscriptionStore;
use relay_server::subscriptions::{user_key, SubscriptionStore};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
    pub store: Arc<dyn SubscriptionStore>,
    pub state: AppState,
    _tmp_dir: Option<tempfile::TempDir>,
}

impl TestServer {
    pub fn ws_url(&self, user_id: &str) -> String {
        format!("ws://{}/ws?userId={}", self.addr, user_id)
    }

    /// Subscribe `user_id` to `chat_id` directly in the store.
    pub async fn seed(&self, user_id: &str, chat_id: &str) {
        self.store
            .add_member(&user_key(user_id), chat_id)
            .await
            .expect("Failed to seed subscription");
    }

    pub async fn is_subscribed(&self, user_id: &str, chat_id: &str) -> bool {
        self.store
            .is_member(&user_key(user_id), chat_id)
            .await
            .expect("Failed to read subscription")
    }
}

/// Start a relay backed by in-memory storage.
pub async fn start_memory_server() -> TestServer {
    start_memory_server_with(ChatSetMembers::ChatId).await
}

pub async fn start_memory_server_with(chat_set_members: ChatSetMembers) -> TestServer {
    start_server(
        Arc::new(MemorySubscriptionStore::new()),
        Arc::new(MemoryBroker::new()),
        chat_set_members,
        KeepaliveConfig::default(),
    )
    .await
}

/// Start a relay over caller-owned backends, so tests can inject failures.
pub async fn start_server(
    store: Arc<dyn SubscriptionStore>,
    broker: Arc<dyn BrokerPublisher>,
    chat_set_members: ChatSetMembers,
    keepalive: KeepaliveConfig,
) -> TestServer {
    let state = AppState::new(
        store.clone(),
        broker,
        chat_set_members,
        &DispatchConfig::default(),
        keepalive,
    );
    serve(state, store, None).await
}

/// Start a relay backed by a SQLite file in a temp dir.
pub async fn start_sqlite_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let db = relay_server::db::init_db(&data_dir).expect("Failed to init DB");

    let store: Arc<dyn SubscriptionStore> = Arc::new(SqliteSubscriptionStore::new(db.clone()));
    let state = AppState::new(
        store.clone(),
        Arc::new(OutboxPublisher::new(db, "chats-queue")),
        ChatSetMembers::ChatId,
        &DispatchConfig::default(),
        KeepaliveConfig::default(),
    );
    serve(state, store, Some(tmp_dir)).await
}

async fn serve(
    state: AppState,
    store: Arc<dyn SubscriptionStore>,
    tmp_dir: Option<tempfile::TempDir>,
) -> TestServer {
    let app = relay_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        store,
        state,
        _tmp_dir: tmp_dir,
    }
}

/// Open a WebSocket as `user_id` and wait until the server has registered it.
pub async fn connect(server: &TestServer, user_id: &str) -> (WsWrite, WsRead) {
    let (ws_stream, _) = tokio_tungstenite::connect_async(server.ws_url(user_id))
        .await
        .expect("WebSocket connect failed");

    for _ in 0..100 {
        if server.state.connections.is_connected(user_id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(
        server.state.connections.is_connected(user_id),
        "{} never registered",
        user_id
    );

    ws_stream.split()
}

pub async fn send_json(write: &mut WsWrite, value: serde_json::Value) {
    write
        .send(Message::text(value.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Next text frame parsed as JSON, skipping control frames.
pub async fn next_json(read: &mut WsRead) -> Option<serde_json::Value> {
    loop {
        match tokio::time::timeout(Duration::from_secs(2), read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                return Some(serde_json::from_str(text.as_str()).expect("Frame is not JSON"));
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

/// Assert nothing but control frames arrives within a short window.
pub async fn expect_silence(read: &mut WsRead) {
    loop {
        match tokio::time::timeout(Duration::from_millis(300), read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected no frames, got {:?}", other),
        }
    }
}
