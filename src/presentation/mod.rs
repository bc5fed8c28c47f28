//! Presentation Layer
//!
//! HTTP routes and the collaboration WebSocket endpoint.

pub mod http;
pub mod middleware;
pub mod websocket;
