//! Collaboration WebSocket
//!
//! The duplex endpoint of a grading room.

pub mod handler;
pub mod session;

pub use handler::collaboration_ws;
pub use session::{ScopeGuard, SocketSession};
