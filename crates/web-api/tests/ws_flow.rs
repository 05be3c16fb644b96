use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use application::Hub;
use config::{HubConfig, JwtConfig};
use domain::UserId;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as TungsteniteMessage},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState, JwtService};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    hub: Hub,
    jwt: Arc<JwtService>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let hub = Hub::spawn(HubConfig::default(), None).expect("valid hub config");
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "test-secret-key-with-at-least-32-characters".to_string(),
            expiration_hours: 1,
        }));
        let app = router(AppState::new(hub.clone(), jwt.clone()));

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
            hub,
            jwt,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    async fn connect(&self, user_id: Uuid) -> Socket {
        let token = self.jwt.generate_token(user_id).expect("token");
        let url = format!("ws://{}/api/v1/ws?token={}", self.addr, token);
        let (socket, _) = connect_async(url).await.expect("connect websocket");
        socket
    }

    async fn wait_for_connections(&self, user_id: Uuid, expected: usize) {
        for _ in 0..100 {
            if self.hub.connection_count(UserId::from(user_id)).await == expected {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("user {user_id} never reached {expected} connections");
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.hub.shutdown().await;
    }
}

async fn next_envelope(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket closed")
            .expect("websocket error");
        match message {
            TungsteniteMessage::Text(payload) => {
                return serde_json::from_str(&payload).expect("envelope json");
            }
            TungsteniteMessage::Ping(_) | TungsteniteMessage::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[tokio::test]
async fn websocket_receives_broadcast_envelope() {
    let server = TestServer::start().await;
    let user_id = Uuid::new_v4();
    let mut socket = server.connect(user_id).await;
    server.wait_for_connections(user_id, 1).await;

    server
        .hub
        .broadcast_to_user(
            UserId::from(user_id),
            "orders.new",
            &json!({ "title": "Fix bug" }),
        )
        .await
        .expect("broadcast");

    let envelope = next_envelope(&mut socket).await;
    assert_eq!(
        envelope,
        json!({ "type": "orders.new", "data": { "title": "Fix bug" } })
    );

    server.stop().await;
}

#[tokio::test]
async fn closed_tab_stops_receiving_while_other_tab_continues() {
    let server = TestServer::start().await;
    let user_id = Uuid::new_v4();
    let mut first = server.connect(user_id).await;
    let mut second = server.connect(user_id).await;
    server.wait_for_connections(user_id, 2).await;

    server
        .hub
        .broadcast_to_user(UserId::from(user_id), "ping.test", &json!({ "n": 1 }))
        .await
        .expect("broadcast");
    assert_eq!(next_envelope(&mut first).await["data"]["n"], 1);
    assert_eq!(next_envelope(&mut second).await["data"]["n"], 1);

    first.close(None).await.expect("close first tab");
    server.wait_for_connections(user_id, 1).await;

    server
        .hub
        .broadcast_to_user(UserId::from(user_id), "ping.test", &json!({ "n": 2 }))
        .await
        .expect("broadcast");
    assert_eq!(next_envelope(&mut second).await["data"]["n"], 2);

    second.send(TungsteniteMessage::Close(None)).await.ok();
    server.wait_for_connections(user_id, 0).await;
    assert!(!server.hub.is_online(UserId::from(user_id)));

    server.stop().await;
}

#[tokio::test]
async fn upgrade_without_valid_token_is_unauthorized() {
    let server = TestServer::start().await;

    for url in [
        format!("ws://{}/api/v1/ws", server.addr),
        format!("ws://{}/api/v1/ws?token=not-a-jwt", server.addr),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("upgrade should have been rejected"),
        }
    }
    assert_eq!(server.hub.user_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn health_reports_online_users() {
    let server = TestServer::start().await;
    let user_id = Uuid::new_v4();
    let _socket = server.connect(user_id).await;
    server.wait_for_connections(user_id, 1).await;

    let body = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .expect("health request")
        .json::<Value>()
        .await
        .expect("health json");
    assert_eq!(body, json!({ "status": "ok", "online_users": 1 }));

    server.stop().await;
}
