//! # Client Core
//!
//! Everything a grading UI needs to take part in a collaboration room:
//!
//! - **connection**: the Connection Manager state machine with reconnect backoff
//! - **router**: dispatch of inbound envelopes by `type`
//! - **store**: the local projection of the session
//! - **lock**: grader lock envelopes and the `can_grade` predicate
//! - **status**: the request/response snapshot query
//! - **transport**: the duplex transport seam and its tokio-tungstenite implementation

pub mod connection;
pub mod error;
pub mod lock;
pub mod router;
pub mod status;
pub mod store;
pub mod transport;

pub use connection::{
    ClientConfig, ClientEvent, ClientView, CollaborationClient, ConnectionState, ReconnectPolicy,
};
pub use error::{ClientError, ConnectionError};
pub use lock::LockCoordinator;
pub use router::{EnvelopeHandler, MessageRouter, Routed};
pub use status::StatusClient;
pub use store::{SessionStore, StoreChange};
pub use transport::{
    Connector, Credential, CredentialProvider, Frame, StaticCredential, Transport, WsConnector,
};
