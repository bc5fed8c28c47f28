//! Client error types.

use std::time::Duration;

/// Failure of a single client operation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake rejected with HTTP {0}")]
    Rejected(u16),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("no credential available")]
    MissingCredential,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collaboration client has shut down")]
    Shutdown,
}

impl ClientError {
    /// The server refused the credential; retrying with the same one is
    /// pointless.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, ClientError::Rejected(401 | 403))
    }
}

/// Terminal connection failure, observable until the next explicit connect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("no credential available")]
    MissingCredential,

    #[error("credential rejected by server (HTTP {0})")]
    Unauthorized(u16),

    #[error("connection lost after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}
