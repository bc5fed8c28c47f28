//! # Domain Value Objects
//!
//! Immutable value types that represent domain concepts without identity.
//!
//! ## Value Objects
//!
//! - **AssignmentId / UserId / SessionId**: string identifiers used on the wire
//! - **ConnectionId**: server-local identity of one socket
//! - **Role**: the platform role carried in the access token
//! - **timestamp**: lenient parsing of wire timestamps

mod ids;
mod role;
pub mod timestamp;

pub use ids::*;
pub use role::*;
