//! Duplex transport seam.
//!
//! The connection manager talks to the server through [`Connector`] and
//! [`Transport`] so tests can drive it with scripted fakes. [`WsConnector`]
//! is the production implementation on tokio-tungstenite.

use std::fmt;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::ClientError;
use crate::domain::UserId;

/// Bearer credential plus the identity it belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub user_id: UserId,
}

impl Credential {
    pub fn new(token: impl Into<String>, user_id: UserId) -> Self {
        Self {
            token: token.into(),
            user_id,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Source of the current credential. Consulted on every connect attempt so a
/// refreshed token is picked up by the next reconnect.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Option<Credential>;
}

/// A fixed credential.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub Option<Credential>);

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}

/// Inbound event from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// The connection ended. `code` is `None` when no close frame arrived.
    Closed { code: Option<u16>, reason: String },
}

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), ClientError>;

    /// Next text frame or the end of the connection. Must be cancel-safe.
    async fn recv(&mut self) -> Frame;

    /// Send a close frame and release the connection.
    async fn close(&mut self, code: u16, reason: &str);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<Box<dyn Transport>, ClientError>;
}

/// tokio-tungstenite connector sending the credential as a bearer header.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        credential: &Credential,
    ) -> Result<Box<dyn Transport>, ClientError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.token))
            .map_err(|_| ClientError::MissingCredential)?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    ClientError::Rejected(response.status().as_u16())
                }
                other => ClientError::Transport(other.to_string()),
            })?;

        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), ClientError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Frame {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Frame::Text(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => {
                    return Frame::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    }
                }
                // Pings are answered by tungstenite on the next read/write.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Frame::Closed {
                        code: None,
                        reason: e.to_string(),
                    }
                }
                None => {
                    return Frame::Closed {
                        code: None,
                        reason: "stream ended".into(),
                    }
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!(error = %e, "Close handshake failed");
        }
    }
}
