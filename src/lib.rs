//! # Grading Collaboration Library
//!
//! Real-time coordination for graders looking at the same submission:
//! - Presence per assignment room
//! - A server-arbitrated, exclusive grader lock
//! - Live relay of scores, comments and annotations
//! - A reconnecting client core that mirrors the room state locally
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Session entity, identifiers and the wire envelope
//! - **Application Layer**: Room state machine and per-room actors
//! - **Infrastructure Layer**: Prometheus metrics
//! - **Presentation Layer**: HTTP handlers and the collaboration WebSocket
//! - **Client**: connection manager, router, state store and lock coordinator
//!
//! ## Module Structure
//!
//! ```text
//! grading_collab/
//! +-- config/         Configuration management
//! +-- domain/         Entities, value objects, envelope
//! +-- application/    Room and RoomRegistry
//! +-- infrastructure/ Metrics
//! +-- presentation/   HTTP routes and WebSocket handler
//! +-- client/         Client core
//! +-- shared/         Common utilities (errors)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Room coordination
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Client core
pub mod client;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
