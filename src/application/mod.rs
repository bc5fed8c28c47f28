//! Application Layer
//!
//! Room orchestration. This layer owns the authoritative collaboration state
//! and sits between the presentation layer (sockets and REST) and the pure
//! domain types.

pub mod services;
