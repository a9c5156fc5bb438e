#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ConversationRepository, Realtime, RealtimeDependencies, RealtimeSettings, SystemClock,
};
use axum::Router;
use chrono::Utc;
use config::JwtConfig;
use domain::{Conversation, ConversationId, User, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{InMemoryStore, Infrastructure};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestUser {
    pub id: UserId,
    pub token: String,
}

/// 内存存储上组装好的应用，不绑定端口
pub struct TestApp {
    pub app: Router,
    pub store: Arc<InMemoryStore>,
    pub realtime: Arc<Realtime>,
    pub jwt: Arc<JwtService>,
    pub alice: TestUser,
    pub bob: TestUser,
    pub carol: TestUser,
}

impl TestApp {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let infra = Infrastructure::in_memory(store.clone());
        let jwt = Arc::new(JwtService::new(
            &JwtConfig {
                secret: "test-secret-for-integration".to_string(),
                expiration_hours: 1,
            },
            infra.users.clone(),
        ));

        let realtime = Arc::new(Realtime::new(RealtimeDependencies {
            identity: jwt.clone(),
            users: infra.users,
            conversations: infra.conversations,
            messages: infra.messages,
            clock: Arc::new(SystemClock),
            settings: RealtimeSettings {
                handshake_timeout: Duration::from_millis(500),
                ..RealtimeSettings::default()
            },
        }));

        let alice = seed_user(&store, &jwt, "alice").await;
        let bob = seed_user(&store, &jwt, "bob").await;
        let carol = seed_user(&store, &jwt, "carol").await;

        let app = router(AppState::new(realtime.clone()));
        Self {
            app,
            store,
            realtime,
            jwt,
            alice,
            bob,
            carol,
        }
    }

    /// alice 和 `others` 组成的会话
    pub async fn conversation_with(&self, others: &[UserId]) -> ConversationId {
        let conversation = Conversation::new(
            ConversationId::generate(),
            self.alice.id,
            others.to_vec(),
            None,
            others.len() > 1,
            Utc::now(),
        )
        .expect("conversation");
        self.store
            .create(conversation.clone())
            .await
            .expect("store conversation");
        conversation.id
    }
}

/// 跑在随机端口上的完整服务
pub struct TestServer {
    pub addr: SocketAddr,
    inner: TestApp,
    shutdown: Option<oneshot::Sender<()>>,
}

impl std::ops::Deref for TestServer {
    type Target = TestApp;

    fn deref(&self) -> &TestApp {
        &self.inner
    }
}

impl TestServer {
    pub async fn start() -> Self {
        let inner = TestApp::new().await;
        let app = inner.app.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            inner,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/api/v1/ws", self.addr)
    }

    /// 升级请求里带 token 连接，并吃掉第一帧 `users:online`
    pub async fn connect(&self, user: &TestUser) -> (WsClient, Value) {
        let url = format!("{}?token={}", self.ws_url(), user.token);
        let (mut ws, _) = connect_async(url).await.expect("ws connect");
        let snapshot = next_event(&mut ws).await;
        assert_eq!(snapshot["event"], "users:online");
        (ws, snapshot)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn seed_user(store: &InMemoryStore, jwt: &JwtService, name: &str) -> TestUser {
    let user = User::new(UserId::generate(), name, None);
    store.insert_user(user.clone()).await;
    let token = jwt.generate_token(user.id).expect("token");
    TestUser { id: user.id, token }
}

pub async fn send_event(ws: &mut WsClient, event: Value) {
    ws.send(WsMessage::Text(event.to_string().into()))
        .await
        .expect("send frame");
}

/// 下一帧文本事件，跳过控制帧
pub async fn next_event(ws: &mut WsClient) -> Value {
    try_next_event(ws, Duration::from_secs(2))
        .await
        .expect("expected an event")
}

pub async fn try_next_event(ws: &mut WsClient, wait: Duration) -> Option<Value> {
    loop {
        let frame = match timeout(wait, ws.next()).await {
            Ok(Some(Ok(frame))) => frame,
            _ => return None,
        };
        match frame {
            WsMessage::Text(text) => {
                return Some(serde_json::from_str(text.as_str()).expect("json frame"))
            }
            WsMessage::Close(_) => return None,
            _ => continue,
        }
    }
}

/// 一直读到指定名称的事件为止
pub async fn next_named(ws: &mut WsClient, name: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == name {
            return event;
        }
    }
}

/// 短时间内不应该再收到任何事件
pub async fn assert_silent(ws: &mut WsClient) {
    if let Some(event) = try_next_event(ws, Duration::from_millis(150)).await {
        panic!("unexpected event: {event}");
    }
}
