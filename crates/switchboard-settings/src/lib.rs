//! # switchboard-settings
//!
//! Server configuration: compiled defaults, optionally deep-merged with a
//! JSON settings file and explicit caller overrides, then environment
//! variable overrides on top.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_config, load_config_from_path};
pub use types::AppConfig;
