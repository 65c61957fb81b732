//! Infrastructure layer module
//!
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Signed HTTP control channel to Agent-Servers

pub mod agent_server;
pub mod config;
pub mod logging;
