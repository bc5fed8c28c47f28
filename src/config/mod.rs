//! # Configuration Module
//!
//! Server settings, layered from lowest to highest priority:
//! - built-in defaults
//! - `config/default.toml` and `config/{RUN_ENV}.toml`
//! - `APP__SECTION__KEY` environment variables (`.env` is read through dotenvy)
//! - `SERVER_HOST`, `SERVER_PORT` and `JWT_SECRET`
//!
//! The client core has its own, much smaller `ClientConfig`.
//!
//! ```rust,ignore
//! use grading_collab::config::Settings;
//!
//! let settings = Settings::load()?;
//! assert!(settings.collaboration.allows(&Role::Ta));
//! ```

mod settings;

pub use settings::*;
