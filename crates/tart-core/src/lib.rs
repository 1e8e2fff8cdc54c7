//! tart-core — shared vocabulary for the pushtart orchestrator.
//!
//! Holds the pieces every other crate needs but none of them owns:
//! the server configuration file, the acting [`Principal`] of a command,
//! and the rules for what counts as a valid push URL.

pub mod config;
pub mod principal;
pub mod push_url;

pub use config::{ConfigError, ServerConfig};
pub use principal::Principal;
pub use push_url::{PushUrlError, validate_push_url};
