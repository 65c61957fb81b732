//! Domain errors for the fleetline control plane.

use thiserror::Error;

/// Domain-level errors raised by repositories and services.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(i64),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution step not found: {0}")]
    StepNotFound(i64),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Log buffer error: {0}")]
    LogBufferError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<redis::RedisError> for DomainError {
    fn from(err: redis::RedisError) -> Self {
        DomainError::LogBufferError(err.to_string())
    }
}
