//! StageKit Settings Crate
//!
//! Stage configuration: which controller to drive, how to reach it, and
//! logging preferences, persisted as TOML or JSON.

pub mod config;
pub mod error;

pub use config::{Config, LoggingSettings, StageSettings, TimeoutSettings};
pub use error::{SettingsError, SettingsResult};
