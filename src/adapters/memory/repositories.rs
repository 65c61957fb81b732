//! In-memory repositories with the same semantics as the SQLite adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::adapters::sqlite::execution_repository::GENERIC_FAILURE_MESSAGE;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Agent, AgentStatus, AgentTaskStats, ExecutionProgress, ExecutionRecord, ExecutionStatus, ExecutionStep,
    ExecutionTransition, HeartbeatUpdate, LogLine, ResultApplication, StepStatus, StepTransition, TaskResult,
};
use crate::domain::ports::{AgentRepository, ExecutionLogRepository, ExecutionRepository, TaskStatsRepository};

#[derive(Clone, Default)]
pub struct InMemoryAgentRepository {
    agents: Arc<RwLock<BTreeMap<i64, Agent>>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn upsert(&self, agent: &Agent) -> DomainResult<()> {
        self.agents.write().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get(&self, agent_id: i64) -> DomainResult<Option<Agent>> {
        Ok(self.agents.read().await.get(&agent_id).cloned())
    }

    async fn list(&self, exclude_status: Option<AgentStatus>) -> DomainResult<Vec<Agent>> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .filter(|a| Some(a.status) != exclude_status)
            .cloned()
            .collect())
    }

    async fn apply_heartbeat(&self, update: &HeartbeatUpdate) -> DomainResult<bool> {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.get_mut(&update.agent_id) else {
            return Ok(false);
        };
        agent.status = update.status;
        agent.last_heartbeat_at = Some(update.last_heartbeat_at);
        agent.last_error_code.clone_from(&update.last_error_code);
        agent.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_status(&self, agent_id: i64, status: AgentStatus, at: DateTime<Utc>) -> DomainResult<()> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(&agent_id).ok_or(DomainError::AgentNotFound(agent_id))?;
        agent.status = status;
        agent.updated_at = at;
        Ok(())
    }
}

#[derive(Default)]
struct ExecutionState {
    records: HashMap<String, ExecutionRecord>,
    steps: BTreeMap<i64, ExecutionStep>,
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    state: Arc<RwLock<ExecutionState>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn require_terminal(is_terminal: bool, to: &str) -> DomainResult<()> {
    if is_terminal {
        return Ok(());
    }
    Err(DomainError::InvalidStateTransition {
        from: "running".to_string(),
        to: to.to_string(),
        reason: "only terminal targets are allowed".to_string(),
    })
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn upsert_execution(&self, record: &ExecutionRecord) -> DomainResult<()> {
        self.state
            .write()
            .await
            .records
            .insert(record.execution_id.clone(), record.clone());
        Ok(())
    }

    async fn upsert_step(&self, step: &ExecutionStep) -> DomainResult<()> {
        let mut state = self.state.write().await;
        if !state.records.contains_key(&step.execution_id) {
            return Err(DomainError::ExecutionNotFound(step.execution_id.clone()));
        }
        state.steps.insert(step.id, step.clone());
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> DomainResult<Option<ExecutionRecord>> {
        Ok(self.state.read().await.records.get(execution_id).cloned())
    }

    async fn get_step(&self, step_id: i64) -> DomainResult<Option<ExecutionStep>> {
        Ok(self.state.read().await.steps.get(&step_id).cloned())
    }

    async fn list_steps(&self, execution_id: &str) -> DomainResult<Vec<ExecutionStep>> {
        let state = self.state.read().await;
        let mut steps: Vec<ExecutionStep> = state
            .steps
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| (s.step_order, s.id));
        Ok(steps)
    }

    async fn get_running_executions_for_agent(
        &self,
        host_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<ExecutionRecord> = state
            .records
            .values()
            .filter(|r| r.status == ExecutionStatus::Running && r.created_at >= since && r.targets_host(host_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn get_running_steps_for_agent(
        &self,
        host_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionStep>> {
        let state = self.state.read().await;
        let recent: HashSet<&str> = state
            .records
            .values()
            .filter(|r| r.created_at >= since)
            .map(|r| r.execution_id.as_str())
            .collect();
        Ok(state
            .steps
            .values()
            .filter(|s| {
                s.status == StepStatus::Running
                    && s.addresses_host(host_id)
                    && recent.contains(s.execution_id.as_str())
            })
            .cloned()
            .collect())
    }

    async fn find_long_running_executions(
        &self,
        started_before: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<ExecutionRecord> = state
            .records
            .values()
            .filter(|r| {
                r.status == ExecutionStatus::Running && r.started_at.unwrap_or(r.created_at) < started_before
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn find_stale_steps(&self, created_before: DateTime<Utc>) -> DomainResult<Vec<ExecutionStep>> {
        let state = self.state.read().await;
        let mut steps: Vec<ExecutionStep> = state
            .steps
            .values()
            .filter(|s| s.status.is_active() && s.created_at < created_before)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.created_at);
        Ok(steps)
    }

    async fn count_active_steps_for_host(&self, host_id: i64) -> DomainResult<i64> {
        let state = self.state.read().await;
        let count = state
            .steps
            .values()
            .filter(|s| s.status.is_active() && s.addresses_host(host_id))
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn transition_execution(&self, transition: &ExecutionTransition) -> DomainResult<bool> {
        require_terminal(transition.to.is_terminal(), transition.to.as_str())?;

        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(&transition.execution_id) else {
            return Ok(false);
        };
        if record.status != ExecutionStatus::Running {
            return Ok(false);
        }
        record.status = transition.to;
        record.finished_at = Some(transition.finished_at);
        if let Some(message) = &transition.error_message {
            record.error_message = Some(message.clone());
        }
        Ok(true)
    }

    async fn transition_step(&self, transition: &StepTransition) -> DomainResult<bool> {
        require_terminal(transition.to.is_terminal(), transition.to.as_str())?;

        let mut state = self.state.write().await;
        let Some(step) = state.steps.get_mut(&transition.step_id) else {
            return Ok(false);
        };
        if step.status != StepStatus::Running {
            return Ok(false);
        }
        step.status = transition.to;
        step.finished_at = Some(transition.finished_at);
        if let Some(message) = &transition.error_message {
            step.error_message = Some(message.clone());
        }
        Ok(true)
    }

    async fn apply_task_result(
        &self,
        execution_id: &str,
        result: &TaskResult,
        progress: Option<&ExecutionProgress>,
    ) -> DomainResult<ResultApplication> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(execution_id) else {
            return Ok(ResultApplication::NotFound);
        };

        if let Some(status) = result.status.filter(ExecutionStatus::is_terminal) {
            record.status = status;
            record.finished_at = Some(result.finished_at.unwrap_or_else(Utc::now));
            if status == ExecutionStatus::Failed && result.error_msg.is_none() {
                record.error_message = Some(GENERIC_FAILURE_MESSAGE.to_string());
            }
        }
        if let Some(started_at) = result.started_at {
            record.started_at = Some(started_at);
        }
        if let Some(exit_code) = result.exit_code {
            record.exit_code = Some(exit_code);
        }
        if let Some(error_code) = &result.error_code {
            record.error_code = Some(error_code.clone());
        }
        if let Some(error_msg) = &result.error_msg {
            record.error_message = Some(error_msg.clone());
        }
        if let Some(log_size) = result.log_size {
            record.log_size = Some(log_size);
        }
        if let Some(log_pointer) = &result.log_pointer {
            record.log_pointer = Some(log_pointer.clone());
        }
        if let Some(progress) = progress.filter(|p| !p.is_empty()) {
            record.progress = Some(progress.clone());
        }
        Ok(ResultApplication::Applied)
    }
}

#[derive(Default)]
struct LogState {
    lines: Vec<LogLine>,
    seen: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionLogRepository {
    state: Arc<RwLock<LogState>>,
}

impl InMemoryExecutionLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLogRepository for InMemoryExecutionLogRepository {
    async fn insert_batch(&self, lines: &[LogLine]) -> DomainResult<u64> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for line in lines {
            if state.seen.insert(line.message_id.clone()) {
                state.lines.push(line.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_for_execution(&self, execution_id: &str) -> DomainResult<Vec<LogLine>> {
        Ok(self
            .state
            .read()
            .await
            .lines
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

/// Task statistics bound to an agent repository so unknown agents are rejected.
#[derive(Clone)]
pub struct InMemoryTaskStatsRepository {
    agents: Arc<dyn AgentRepository>,
    stats: Arc<RwLock<HashMap<i64, AgentTaskStats>>>,
}

impl InMemoryTaskStatsRepository {
    pub fn new(agents: Arc<dyn AgentRepository>) -> Self {
        Self {
            agents,
            stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl TaskStatsRepository for InMemoryTaskStatsRepository {
    async fn upsert(&self, stats: &AgentTaskStats) -> DomainResult<bool> {
        if self.agents.get(stats.agent_id).await?.is_none() {
            return Ok(false);
        }
        let mut stored = stats.clone();
        stored.updated_at = Some(stats.updated_at.unwrap_or_else(Utc::now));
        self.stats.write().await.insert(stats.agent_id, stored);
        Ok(true)
    }

    async fn get(&self, agent_id: i64) -> DomainResult<Option<AgentTaskStats>> {
        Ok(self.stats.read().await.get(&agent_id).cloned())
    }
}
