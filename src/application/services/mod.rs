//! Application Services
//!
//! ## Available Services
//!
//! - **Room**: authoritative state of one room and its lock arbitration
//! - **RoomRegistry**: one actor task per live room, keyed by assignment

pub mod registry;
pub mod room;

pub use registry::{LockReply, Outbound, RoomError, RoomHandle, RoomRegistry, OUTBOX_CAPACITY};
pub use room::{fault, Delivery, LockOutcome, Recipients, Room, RoomPolicy};
