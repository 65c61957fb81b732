//! Agent repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Agent, AgentStatus, HeartbeatUpdate};

/// Repository interface for agent records.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Insert or replace an agent record.
    async fn upsert(&self, agent: &Agent) -> DomainResult<()>;

    /// Get an agent by id.
    async fn get(&self, agent_id: i64) -> DomainResult<Option<Agent>>;

    /// List every agent, optionally excluding one administrative status.
    async fn list(&self, exclude_status: Option<AgentStatus>) -> DomainResult<Vec<Agent>>;

    /// Apply a heartbeat. Returns `false` when the agent does not exist.
    async fn apply_heartbeat(&self, update: &HeartbeatUpdate) -> DomainResult<bool>;

    /// Persist an operator-set status.
    async fn set_status(&self, agent_id: i64, status: AgentStatus, at: DateTime<Utc>) -> DomainResult<()>;
}
