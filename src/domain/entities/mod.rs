//! # Domain Entities
//!
//! Core domain entities of the collaboration subsystem.
//!
//! - **Session**: one live collaboration room bound to an assignment
//! - **CollaborationUser**: a participant present in a room; exists only while
//!   at least one of the participant's sockets is open

mod session;

pub use session::{CollaborationUser, Departure, Session, SessionError, SessionStatus};
