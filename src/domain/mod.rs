//! # Domain Layer
//!
//! Types shared by the session server and the client core. Nothing in this
//! layer performs I/O.
//!
//! ## Structure
//!
//! - **entities**: `Session` and `CollaborationUser` with their invariants
//! - **value_objects**: identifiers and roles
//! - **envelope**: the wire contract exchanged over the duplex connection
//!
//! ## Design Principles
//!
//! - No dependencies on infrastructure or presentation layers
//! - Invariants live on the entity methods, not in callers

pub mod entities;
pub mod envelope;
pub mod value_objects;

// Re-export commonly used types
pub use entities::*;
pub use envelope::{Envelope, EnvelopeError, StatusEvent};
pub use value_objects::*;
