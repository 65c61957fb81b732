//! Domain layer for the fleetline control plane
//!
//! This module contains the core models, the port traits adapters implement,
//! and the domain error type.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
