//! Transport seams and the WebSocket implementation.
//!
//! The connection manager only talks to the [`Connector`], [`FrameSink`] and
//! [`FrameStream`] traits, so tests can drive it with an in-memory transport.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use sn_core::config::AppConfig;
use sn_core::constants;
use sn_core::error::{SnError, SnResult};

/// Event read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text message (one or more newline-separated frames).
    Text(String),
    /// The peer closed the connection.
    Closed { code: Option<u16>, reason: String },
    /// Read failure; the connection is unusable.
    Error(String),
}

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text message. An error means the connection is gone.
    async fn send_text(&mut self, text: String) -> SnResult<()>;

    /// Graceful close with a normal close code.
    async fn close(&mut self) -> SnResult<()>;
}

/// Read half of a transport.
#[async_trait]
pub trait FrameStream: Send {
    /// Next event, or `None` once the stream is exhausted.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// Both halves of an established connection.
pub struct TransportPair {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

impl TransportPair {
    pub fn new(sink: impl FrameSink + 'static, stream: impl FrameStream + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            stream: Box::new(stream),
        }
    }
}

/// Establishes authenticated transports for a session.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, session_token: &str) -> SnResult<TransportPair>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector authenticating with the session cookie.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    /// Build a connector for the configured server.
    pub fn from_config(config: &AppConfig) -> SnResult<Self> {
        Ok(Self::new(
            config.server.websocket_url()?,
            config.realtime.connect_timeout(),
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_request(
        &self,
        session_token: &str,
    ) -> SnResult<tungstenite::handshake::client::Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SnError::Config(format!("invalid websocket url {}: {e}", self.url)))?;

        if !session_token.is_empty() {
            let cookie = format!("{}={session_token}", constants::SESSION_COOKIE_NAME);
            let value = HeaderValue::from_str(&cookie)
                .map_err(|e| SnError::AuthFailed(format!("invalid session token: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, session_token: &str) -> SnResult<TransportPair> {
        let request = self.build_request(session_token)?;
        debug!("connecting to {}", self.url);

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| {
                SnError::Timeout(format!(
                    "websocket connect to {} exceeded {}ms",
                    self.url,
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(classify_ws_error)?;

        info!("websocket connected to {}", self.url);
        let (sink, stream) = ws.split();
        Ok(TransportPair::new(WsSink { inner: sink }, WsFrameStream { inner: stream }))
    }
}

/// Map a handshake failure to an error category.
fn classify_ws_error(err: tungstenite::Error) -> SnError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            match status {
                401 | 403 => SnError::AuthFailed(format!("websocket upgrade rejected ({status})")),
                _ => SnError::ServerError {
                    status,
                    message: "websocket upgrade rejected".into(),
                },
            }
        }
        other => SnError::Transport(other.to_string()),
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> SnResult<()> {
        trace!("ws send: {text}");
        self.inner
            .send(Message::text(text))
            .await
            .map_err(|e| SnError::Transport(format!("send failed: {e}")))
    }

    async fn close(&mut self) -> SnResult<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| SnError::Transport(format!("close failed: {e}")))?;
        let _ = self.inner.close().await;
        Ok(())
    }
}

struct WsFrameStream {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(TransportEvent::Error(e.to_string())),
            };

            match message {
                Message::Text(text) => return Some(TransportEvent::Text(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(TransportEvent::Text(text)),
                    Err(_) => debug!("ignoring non-utf8 binary message ({} bytes)", bytes.len()),
                },
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                    return Some(TransportEvent::Closed { code, reason });
                }
                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
