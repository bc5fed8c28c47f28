//! Infrastructure Layer
//!
//! Process-level concerns shared by the server and the client core:
//! - Prometheus metrics

pub mod metrics;
