//! Agent task statistics port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentTaskStats;

#[async_trait]
pub trait TaskStatsRepository: Send + Sync {
    /// Replace the counters row of an agent. Returns `false` when the agent does not exist.
    async fn upsert(&self, stats: &AgentTaskStats) -> DomainResult<bool>;

    async fn get(&self, agent_id: i64) -> DomainResult<Option<AgentTaskStats>>;
}
