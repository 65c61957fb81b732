//! Synchronous control channel to remote Agent-Servers.

pub mod auth;
pub mod client;

pub use auth::{sign, signing_path, verify, verify_request, AuthError};
pub use client::{AgentServerClient, ControlAction, ControlChannelError};
