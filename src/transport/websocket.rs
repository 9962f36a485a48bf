//! WebSocket broker client
//!
//! Implements `BrokerClient` over a single WebSocket connection:
//! - `connect` dials the broker and, when credentials are configured, runs
//!   the `login -> login_response -> auth -> authenticated` handshake; an
//!   `error` frame there is a `Rejected`, anything else unexpected is a
//!   `Handshake` failure
//! - `send` writes one `publish` frame; a completed write counts as accepted
//! - a reader task drains incoming frames, logs broker errors, and marks the
//!   link dead when the socket closes so later sends fail fast
//!
//! The write half sits behind an async mutex so concurrent sends are
//! serialized onto the socket. Reconnecting closes the previous link with a
//! close frame and replaces it wholesale.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::client::BrokerClient;
use crate::config::BrokerSettings;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::BrokerError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct Link {
    sink: SplitSink<WsStream, WsMessage>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

pub struct WsBrokerClient {
    url: String,
    credentials: Option<(String, String)>,
    link: Mutex<Option<Link>>,
}

impl WsBrokerClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            link: Mutex::new(None),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        let client = Self::new(settings.url.clone());
        match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => client.with_credentials(username, password),
            _ => client,
        }
    }

    async fn authenticate(ws: &mut WsStream, username: &str, password: &str) -> Result<(), BrokerError> {
        let login = ClientMessage::Login {
            username: username.to_string(),
            password: password.to_string(),
        };
        ws.send(WsMessage::text(serde_json::to_string(&login)?)).await?;

        let token = match next_server_message(ws).await? {
            ServerMessage::LoginResponse { token } => token,
            ServerMessage::Error { message } => return Err(BrokerError::Rejected(message)),
            other => {
                return Err(BrokerError::Handshake(format!(
                    "expected login_response, got {other:?}"
                )));
            }
        };

        let auth = ClientMessage::Auth { token };
        ws.send(WsMessage::text(serde_json::to_string(&auth)?)).await?;

        match next_server_message(ws).await? {
            ServerMessage::Authenticated {} => Ok(()),
            ServerMessage::Error { message } => Err(BrokerError::Rejected(message)),
            other => Err(BrokerError::Handshake(format!(
                "expected authenticated, got {other:?}"
            ))),
        }
    }
}

/// Next text frame from the broker, skipping control frames.
async fn next_server_message(ws: &mut WsStream) -> Result<ServerMessage, BrokerError> {
    while let Some(frame) = ws.next().await {
        match frame? {
            WsMessage::Text(text) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| BrokerError::Handshake(format!("unexpected frame: {e}")));
            }
            WsMessage::Close(_) => break,
            _ => continue,
        }
    }
    Err(BrokerError::Handshake(
        "connection closed during handshake".to_string(),
    ))
}

async fn read_loop(mut stream: SplitStream<WsStream>, alive: Arc<AtomicBool>, endpoint: String) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                Ok(ServerMessage::Error { message }) => {
                    warn!(%endpoint, "broker reported error: {message}");
                }
                Ok(other) => debug!(%endpoint, ?other, "ignoring broker frame"),
                Err(_) => debug!(%endpoint, "ignoring unrecognised broker frame"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%endpoint, "broker connection error: {e}");
                break;
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
    info!(%endpoint, "broker connection closed");
}

#[async_trait]
impl BrokerClient for WsBrokerClient {
    async fn connect(&self) -> Result<(), BrokerError> {
        let (mut ws, _response) = connect_async(self.url.as_str()).await?;

        if let Some((username, password)) = &self.credentials {
            tokio::time::timeout(
                HANDSHAKE_TIMEOUT,
                Self::authenticate(&mut ws, username, password),
            )
            .await
            .map_err(|_| BrokerError::Handshake("timed out".to_string()))??;
        }

        let (sink, stream) = ws.split();
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(stream, alive.clone(), self.url.clone()));

        let mut link = self.link.lock().await;
        if let Some(mut old) = link.take() {
            // best effort; the old socket may already be gone
            if let Err(e) = old.sink.close().await {
                debug!(endpoint = %self.url, "closing previous broker link failed: {e}");
            }
            old.reader.abort();
        }
        *link = Some(Link {
            sink,
            alive,
            reader,
        });
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &str) -> Result<(), BrokerError> {
        let mut guard = self.link.lock().await;

        let dead = guard
            .as_ref()
            .is_none_or(|link| !link.alive.load(Ordering::SeqCst));
        if dead {
            if let Some(link) = guard.take() {
                link.reader.abort();
            }
            return Err(BrokerError::NotConnected);
        }
        let Some(link) = guard.as_mut() else {
            return Err(BrokerError::NotConnected);
        };

        let frame = ClientMessage::Publish {
            topic: topic.to_string(),
            payload: payload.to_string(),
            message_id: Some(Uuid::new_v4().to_string()),
            qos: Some(0),
        };
        let text = serde_json::to_string(&frame)?;

        if let Err(e) = link.sink.send(WsMessage::text(text)).await {
            link.alive.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let link = self.link.lock().await.take();
        match link {
            Some(mut link) => {
                let closed = link.sink.close().await;
                link.reader.abort();
                closed.map_err(Into::into)
            }
            None => Ok(()),
        }
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

impl std::fmt::Debug for WsBrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsBrokerClient")
            .field("url", &self.url)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}
