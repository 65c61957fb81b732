//! Configuration loading
//!
//! Defaults, then `.fleetline/config.yaml` and `.fleetline/local.yaml` (or an
//! explicit file), then `FLEETLINE_*` environment overrides, merged with
//! figment and validated before use.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
