//! Infrastructure adapters for external systems.

pub mod memory;
pub mod redis_store;
pub mod sqlite;
