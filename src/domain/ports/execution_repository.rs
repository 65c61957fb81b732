//! Execution store port.
//!
//! The reconciliation engine and the result handler only see executions
//! through this interface. Transitions are conditional on the record still
//! being `running`, so applying one twice is a no-op.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ExecutionProgress, ExecutionRecord, ExecutionStep, ExecutionTransition, ResultApplication,
    StepTransition, TaskResult,
};

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert or replace an execution record.
    async fn upsert_execution(&self, record: &ExecutionRecord) -> DomainResult<()>;

    /// Insert or replace a step.
    async fn upsert_step(&self, step: &ExecutionStep) -> DomainResult<()>;

    async fn get_execution(&self, execution_id: &str) -> DomainResult<Option<ExecutionRecord>>;

    async fn get_step(&self, step_id: i64) -> DomainResult<Option<ExecutionStep>>;

    /// Steps of an execution ordered by `step_order`.
    async fn list_steps(&self, execution_id: &str) -> DomainResult<Vec<ExecutionStep>>;

    /// Running executions targeting `host_id` created at or after `since`.
    async fn get_running_executions_for_agent(
        &self,
        host_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionRecord>>;

    /// Running steps addressed to `host_id` whose execution was created at or after `since`.
    async fn get_running_steps_for_agent(
        &self,
        host_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionStep>>;

    /// Executions still `running` that started before `started_before`.
    async fn find_long_running_executions(
        &self,
        started_before: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionRecord>>;

    /// Steps `running` or `pending` created before `created_before`.
    async fn find_stale_steps(&self, created_before: DateTime<Utc>) -> DomainResult<Vec<ExecutionStep>>;

    /// Count of `running`/`pending` steps addressed to `host_id`.
    async fn count_active_steps_for_host(&self, host_id: i64) -> DomainResult<i64>;

    /// Move a `running` execution to a terminal status together with
    /// `finished_at` and the error message. Returns `false` when the record
    /// was not `running` (already resolved or moved on).
    async fn transition_execution(&self, transition: &ExecutionTransition) -> DomainResult<bool>;

    /// Same as `transition_execution` for a step.
    async fn transition_step(&self, transition: &StepTransition) -> DomainResult<bool>;

    /// Merge a result and optional progress into an execution in one update.
    async fn apply_task_result(
        &self,
        execution_id: &str,
        result: &TaskResult,
        progress: Option<&ExecutionProgress>,
    ) -> DomainResult<ResultApplication>;
}
