//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::domain::Role;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Collaboration room policy
    pub collaboration: CollaborationSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on (0 picks a free port)
    pub port: u16,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key used to verify HS256 access tokens
    pub secret: String,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Maximum frame size in bytes (default: 16KB)
    pub max_frame_size: usize,

    /// Ping interval in milliseconds. A socket silent for two intervals is dropped.
    pub heartbeat_interval_ms: u64,
}

/// Collaboration room policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CollaborationSettings {
    /// Roles allowed to join a grading room
    pub allowed_roles: Vec<Role>,

    /// Reject `grade_update` from participants who do not hold the lock
    /// while someone else does
    pub enforce_grader_lock: bool,

    /// Clear the grader lock after this many idle seconds (0 disables)
    pub lock_idle_timeout_secs: u64,

    /// Frames queued per socket before a slow socket is dropped
    pub outbox_capacity: usize,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        // Determine the running environment
        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            // WebSocket settings - security limits to prevent DoS
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.max_frame_size", 16384_i64)? // 16KB
            .set_default("websocket.heartbeat_interval_ms", 30000_i64)?
            .set_default("collaboration.allowed_roles", vec!["professor", "ta"])?
            .set_default("collaboration.enforce_grader_lock", true)?
            .set_default("collaboration.lock_idle_timeout_secs", 0_i64)?
            .set_default("collaboration.outbox_capacity", 256_i64)?
            // Load from config files
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Load from environment variables
            // APP__SERVER__PORT=8000 -> server.port = 8000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .with_list_parse_key("collaboration.allowed_roles")
                    .try_parsing(true),
            )
            // Map simple environment variables
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| {
                settings.validate()?;
                Ok(settings)
            })
    }

    /// Check invariants that the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate JWT secret length for security
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters for security. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.collaboration.outbox_capacity == 0 {
            return Err(ConfigError::Message(
                "collaboration.outbox_capacity must be greater than zero".into(),
            ));
        }
        if self.websocket.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Message(
                "websocket.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl CollaborationSettings {
    /// Whether users with `role` may join a room.
    pub fn allows(&self, role: &Role) -> bool {
        self.allowed_roles.contains(role)
    }
}

impl Default for CollaborationSettings {
    fn default() -> Self {
        Self {
            allowed_roles: vec![Role::Professor, Role::Ta],
            enforce_grader_lock: true,
            lock_idle_timeout_secs: 0,
            outbox_capacity: 256,
        }
    }
}
