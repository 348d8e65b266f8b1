use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use boutique_api::state::AppState;
use boutique_db::Database;
use boutique_gateway::auth::{issue_producer_token, issue_token};
use boutique_gateway::connection::ChannelOptions;
use boutique_gateway::registry::ConnectionRegistry;
use boutique_types::models::{User, UserId};

pub const SECRET: &str = "integration-secret";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub registry: ConnectionRegistry,
}

impl TestServer {
    pub async fn start(allow_client_push: bool) -> Self {
        Self::start_with(ChannelOptions {
            heartbeat_interval: Duration::from_secs(30),
            identify_timeout: Duration::from_secs(2),
            allow_client_push,
        })
        .await
    }

    pub async fn start_with(options: ChannelOptions) -> Self {
        let services = boutique_server::services(Database::open_in_memory().unwrap(), SECRET);
        let app = boutique_server::router(services.state.clone(), options);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state: services.state,
            registry: services.registry,
        }
    }

    /// Create a user and a valid session token for it.
    pub fn user(&self, username: &str) -> (User, String) {
        let user = self.state.db.create_user(username).unwrap();
        let token = issue_token(SECRET, user.id, username, chrono::Duration::hours(1)).unwrap();
        (user, token)
    }

    /// Token for a backend service allowed to notify any user.
    pub fn producer_token(&self) -> String {
        issue_producer_token(SECRET, 0, "order-service", chrono::Duration::hours(1)).unwrap()
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws/notifications/", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Connect presenting the token as a query parameter.
    pub async fn connect(&self, token: &str) -> Client {
        let (ws, _) = connect_async(format!("{}?token={}", self.ws_url(), token))
            .await
            .expect("connect websocket client");
        ws
    }

    /// Connect presenting the token as a bearer header.
    pub async fn connect_with_header(&self, token: &str) -> Client {
        let mut request = self.ws_url().into_client_request().unwrap();
        request
            .headers_mut()
            .insert("authorization", format!("Bearer {token}").parse().unwrap());
        let (ws, _) = connect_async(request).await.expect("connect websocket client");
        ws
    }

    /// Connect without a token; the client must identify itself.
    pub async fn connect_anonymous(&self) -> Client {
        let (ws, _) = connect_async(self.ws_url()).await.expect("connect websocket client");
        ws
    }

    /// Registration completes after the upgrade response, so poll for it.
    pub async fn wait_for_channels(&self, user: UserId, expected: usize) {
        for _ in 0..200 {
            if self.registry.connection_count(user).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "user {} has {} channels, expected {}",
            user,
            self.registry.connection_count(user).await,
            expected
        );
    }
}

pub async fn send_json(ws: &mut Client, value: serde_json::Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next text frame as JSON, skipping control frames.
pub async fn next_json(ws: &mut Client) -> serde_json::Value {
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for a frame")
}

/// Fails if a text frame shows up within `window`.
pub async fn expect_silence(ws: &mut Client, window: Duration) {
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    };
    if let Ok(frame) = tokio::time::timeout(window, read).await {
        panic!("expected no frame, got {frame:?}");
    }
}

/// Waits until the server closes the socket; returns the close code if one was sent.
pub async fn expect_closed(ws: &mut Client) -> Option<u16> {
    let read = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => panic!("unexpected frame before close: {other:?}"),
                Some(Err(_)) | None => return None,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("server did not close the socket")
}
