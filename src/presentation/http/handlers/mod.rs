//! HTTP Handlers
//!
//! Request handlers for all HTTP endpoints.

pub mod collaboration;
pub mod health;
