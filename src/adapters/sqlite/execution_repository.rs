//! SQLite implementation of the ExecutionRepository.
//!
//! Every transition is one conditional `UPDATE ... WHERE status = 'running'`
//! carrying status, `finished_at` and the error message together.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExecutionProgress, ExecutionRecord, ExecutionStatus, ExecutionStep, ExecutionTransition,
    ResultApplication, StepStatus, StepTransition, TaskResult,
};
use crate::domain::ports::ExecutionRepository;

use super::{format_datetime, format_optional_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime};

/// Error message recorded for a failed result that carries none.
pub const GENERIC_FAILURE_MESSAGE: &str = "Task failed";

#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn upsert_execution(&self, record: &ExecutionRecord) -> DomainResult<()> {
        let hosts_json = serde_json::to_string(&record.target_host_ids)?;
        let progress_json = record.progress.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r"INSERT INTO execution_records (execution_id, status, created_at, started_at, finished_at,
               timeout_secs, target_host_ids, error_message, exit_code, error_code, log_pointer, log_size, progress)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(execution_id) DO UPDATE SET
                 status = excluded.status,
                 created_at = excluded.created_at,
                 started_at = excluded.started_at,
                 finished_at = excluded.finished_at,
                 timeout_secs = excluded.timeout_secs,
                 target_host_ids = excluded.target_host_ids,
                 error_message = excluded.error_message,
                 exit_code = excluded.exit_code,
                 error_code = excluded.error_code,
                 log_pointer = excluded.log_pointer,
                 log_size = excluded.log_size,
                 progress = excluded.progress",
        )
        .bind(&record.execution_id)
        .bind(record.status.as_str())
        .bind(format_datetime(&record.created_at))
        .bind(format_optional_datetime(record.started_at.as_ref()))
        .bind(format_optional_datetime(record.finished_at.as_ref()))
        .bind(record.timeout_secs)
        .bind(&hosts_json)
        .bind(&record.error_message)
        .bind(record.exit_code)
        .bind(&record.error_code)
        .bind(&record.log_pointer)
        .bind(record.log_size)
        .bind(&progress_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_step(&self, step: &ExecutionStep) -> DomainResult<()> {
        let hosts_json = serde_json::to_string(&step.host_ids)?;

        sqlx::query(
            r"INSERT INTO execution_steps (id, execution_id, step_order, name, status, created_at,
               started_at, finished_at, timeout_secs, host_ids, error_message)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 execution_id = excluded.execution_id,
                 step_order = excluded.step_order,
                 name = excluded.name,
                 status = excluded.status,
                 created_at = excluded.created_at,
                 started_at = excluded.started_at,
                 finished_at = excluded.finished_at,
                 timeout_secs = excluded.timeout_secs,
                 host_ids = excluded.host_ids,
                 error_message = excluded.error_message",
        )
        .bind(step.id)
        .bind(&step.execution_id)
        .bind(step.step_order)
        .bind(&step.name)
        .bind(step.status.as_str())
        .bind(format_datetime(&step.created_at))
        .bind(format_optional_datetime(step.started_at.as_ref()))
        .bind(format_optional_datetime(step.finished_at.as_ref()))
        .bind(step.timeout_secs)
        .bind(&hosts_json)
        .bind(&step.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> DomainResult<Option<ExecutionRecord>> {
        let row: Option<ExecutionRow> = sqlx::query_as("SELECT * FROM execution_records WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_step(&self, step_id: i64) -> DomainResult<Option<ExecutionStep>> {
        let row: Option<StepRow> = sqlx::query_as("SELECT * FROM execution_steps WHERE id = ?")
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_steps(&self, execution_id: &str) -> DomainResult<Vec<ExecutionStep>> {
        let rows: Vec<StepRow> =
            sqlx::query_as("SELECT * FROM execution_steps WHERE execution_id = ? ORDER BY step_order, id")
                .bind(execution_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_running_executions_for_agent(
        &self,
        host_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionRecord>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r"SELECT * FROM execution_records
               WHERE status = 'running'
                 AND created_at >= ?
                 AND EXISTS (SELECT 1 FROM json_each(execution_records.target_host_ids) WHERE value = ?)
               ORDER BY created_at",
        )
        .bind(format_datetime(&since))
        .bind(host_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_running_steps_for_agent(
        &self,
        host_id: i64,
        since: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionStep>> {
        let rows: Vec<StepRow> = sqlx::query_as(
            r"SELECT s.* FROM execution_steps s
               JOIN execution_records e ON e.execution_id = s.execution_id
               WHERE s.status = 'running'
                 AND e.created_at >= ?
                 AND EXISTS (SELECT 1 FROM json_each(s.host_ids) WHERE value = ?)
               ORDER BY s.id",
        )
        .bind(format_datetime(&since))
        .bind(host_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_long_running_executions(
        &self,
        started_before: DateTime<Utc>,
    ) -> DomainResult<Vec<ExecutionRecord>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            r"SELECT * FROM execution_records
               WHERE status = 'running' AND COALESCE(started_at, created_at) < ?
               ORDER BY created_at",
        )
        .bind(format_datetime(&started_before))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_stale_steps(&self, created_before: DateTime<Utc>) -> DomainResult<Vec<ExecutionStep>> {
        let rows: Vec<StepRow> = sqlx::query_as(
            r"SELECT * FROM execution_steps
               WHERE status IN ('running', 'pending') AND created_at < ?
               ORDER BY created_at",
        )
        .bind(format_datetime(&created_before))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_active_steps_for_host(&self, host_id: i64) -> DomainResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r"SELECT COUNT(*) FROM execution_steps
               WHERE status IN ('running', 'pending')
                 AND EXISTS (SELECT 1 FROM json_each(execution_steps.host_ids) WHERE value = ?)",
        )
        .bind(host_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn transition_execution(&self, transition: &ExecutionTransition) -> DomainResult<bool> {
        ensure_terminal(transition.to.is_terminal(), transition.to.as_str())?;

        let result = sqlx::query(
            r"UPDATE execution_records
               SET status = ?, finished_at = ?, error_message = COALESCE(?, error_message)
               WHERE execution_id = ? AND status = 'running'",
        )
        .bind(transition.to.as_str())
        .bind(format_datetime(&transition.finished_at))
        .bind(&transition.error_message)
        .bind(&transition.execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition_step(&self, transition: &StepTransition) -> DomainResult<bool> {
        ensure_terminal(transition.to.is_terminal(), transition.to.as_str())?;

        let result = sqlx::query(
            r"UPDATE execution_steps
               SET status = ?, finished_at = ?, error_message = COALESCE(?, error_message)
               WHERE id = ? AND status = 'running'",
        )
        .bind(transition.to.as_str())
        .bind(format_datetime(&transition.finished_at))
        .bind(&transition.error_message)
        .bind(transition.step_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn apply_task_result(
        &self,
        execution_id: &str,
        result: &TaskResult,
        progress: Option<&ExecutionProgress>,
    ) -> DomainResult<ResultApplication> {
        let status = result.status.filter(ExecutionStatus::is_terminal);
        let finished_at = status.map(|_| result.finished_at.unwrap_or_else(Utc::now));
        let error_message = match (status, &result.error_msg) {
            (_, Some(msg)) => Some(msg.clone()),
            (Some(ExecutionStatus::Failed), None) => Some(GENERIC_FAILURE_MESSAGE.to_string()),
            _ => None,
        };
        let progress_json = progress
            .filter(|p| !p.is_empty())
            .map(serde_json::to_string)
            .transpose()?;

        let outcome = sqlx::query(
            r"UPDATE execution_records SET
                 status = COALESCE(?, status),
                 finished_at = COALESCE(?, finished_at),
                 started_at = COALESCE(?, started_at),
                 exit_code = COALESCE(?, exit_code),
                 error_code = COALESCE(?, error_code),
                 error_message = COALESCE(?, error_message),
                 log_size = COALESCE(?, log_size),
                 log_pointer = COALESCE(?, log_pointer),
                 progress = COALESCE(?, progress)
               WHERE execution_id = ?",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(format_optional_datetime(finished_at.as_ref()))
        .bind(format_optional_datetime(result.started_at.as_ref()))
        .bind(result.exit_code)
        .bind(&result.error_code)
        .bind(&error_message)
        .bind(result.log_size)
        .bind(&result.log_pointer)
        .bind(&progress_json)
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Ok(ResultApplication::NotFound);
        }
        Ok(ResultApplication::Applied)
    }
}

fn ensure_terminal(is_terminal: bool, to: &str) -> DomainResult<()> {
    if is_terminal {
        return Ok(());
    }
    Err(DomainError::InvalidStateTransition {
        from: "running".to_string(),
        to: to.to_string(),
        reason: "only terminal targets are allowed".to_string(),
    })
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    execution_id: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    timeout_secs: Option<i64>,
    target_host_ids: Option<String>,
    error_message: Option<String>,
    exit_code: Option<i64>,
    error_code: Option<String>,
    log_pointer: Option<String>,
    log_size: Option<i64>,
    progress: Option<String>,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = DomainError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let status = ExecutionStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid execution status: {}", row.status)))?;
        let progress = row
            .progress
            .map(|p| serde_json::from_str::<ExecutionProgress>(&p))
            .transpose()?;

        Ok(ExecutionRecord {
            execution_id: row.execution_id,
            status,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            finished_at: parse_optional_datetime(row.finished_at)?,
            timeout_secs: row.timeout_secs,
            target_host_ids: parse_json_or_default(row.target_host_ids)?,
            error_message: row.error_message,
            exit_code: row.exit_code,
            error_code: row.error_code,
            log_pointer: row.log_pointer,
            log_size: row.log_size,
            progress,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: i64,
    execution_id: String,
    step_order: i64,
    name: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    timeout_secs: Option<i64>,
    host_ids: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<StepRow> for ExecutionStep {
    type Error = DomainError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        let status = StepStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid step status: {}", row.status)))?;

        Ok(ExecutionStep {
            id: row.id,
            execution_id: row.execution_id,
            step_order: row.step_order,
            name: row.name,
            status,
            created_at: parse_datetime(&row.created_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            finished_at: parse_optional_datetime(row.finished_at)?,
            timeout_secs: row.timeout_secs,
            host_ids: parse_json_or_default(row.host_ids)?,
            error_message: row.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::initialize_test_database;
    use chrono::Duration;

    async fn setup() -> SqliteExecutionRepository {
        let pool = initialize_test_database().await.unwrap();
        SqliteExecutionRepository::new(pool)
    }

    #[tokio::test]
    async fn test_running_queries_filter_by_host_and_window() {
        let repo = setup().await;
        let now = Utc::now();

        let recent = ExecutionRecord::new("e-recent", vec![10, 11]).running_since(now - Duration::minutes(5));
        let old = ExecutionRecord::new("e-old", vec![10]).running_since(now - Duration::hours(48));
        let other = ExecutionRecord::new("e-other", vec![12]).running_since(now - Duration::minutes(5));
        for record in [&recent, &old, &other] {
            repo.upsert_execution(record).await.unwrap();
        }
        repo.upsert_step(&ExecutionStep::new(1, "e-recent", 1, vec![10]).running_since(now))
            .await
            .unwrap();
        repo.upsert_step(&ExecutionStep::new(2, "e-recent", 2, vec![11]).running_since(now))
            .await
            .unwrap();

        let since = now - Duration::hours(24);
        let executions = repo.get_running_executions_for_agent(10, since).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].execution_id, "e-recent");

        let steps = repo.get_running_steps_for_agent(10, since).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, 1);
        assert_eq!(repo.count_active_steps_for_host(11).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transition_is_conditional_on_running() {
        let repo = setup().await;
        let record = ExecutionRecord::new("e-1", vec![1]).running_since(Utc::now());
        repo.upsert_execution(&record).await.unwrap();

        let transition = ExecutionTransition {
            execution_id: "e-1".to_string(),
            to: ExecutionStatus::Success,
            error_message: None,
            finished_at: Utc::now(),
        };
        assert!(repo.transition_execution(&transition).await.unwrap());
        assert!(!repo.transition_execution(&transition).await.unwrap());

        let loaded = repo.get_execution("e-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Success);
        assert!(loaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_rejects_non_terminal_target() {
        let repo = setup().await;
        let transition = StepTransition {
            step_id: 1,
            to: StepStatus::Pending,
            error_message: None,
            finished_at: Utc::now(),
        };
        assert!(matches!(
            repo.transition_step(&transition).await,
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_apply_task_result_merges_fields() {
        let repo = setup().await;
        repo.upsert_execution(&ExecutionRecord::new("42", vec![1]).running_since(Utc::now()))
            .await
            .unwrap();

        let result = TaskResult {
            status: Some(ExecutionStatus::Failed),
            exit_code: Some(1),
            ..Default::default()
        };
        let progress = ExecutionProgress {
            progress: Some(100),
            total_hosts: Some(1),
            failed_hosts: Some(1),
            ..Default::default()
        };
        let applied = repo.apply_task_result("42", &result, Some(&progress)).await.unwrap();
        assert_eq!(applied, ResultApplication::Applied);

        let loaded = repo.get_execution("42").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(loaded.exit_code, Some(1));
        assert_eq!(loaded.error_message.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert!(loaded.finished_at.is_some());
        assert_eq!(loaded.progress.and_then(|p| p.failed_hosts), Some(1));

        let missing = repo.apply_task_result("nope", &result, None).await.unwrap();
        assert_eq!(missing, ResultApplication::NotFound);
    }

    #[tokio::test]
    async fn test_non_terminal_result_keeps_status() {
        let repo = setup().await;
        repo.upsert_execution(&ExecutionRecord::new("7", vec![1]).running_since(Utc::now()))
            .await
            .unwrap();

        let result = TaskResult {
            status: Some(ExecutionStatus::Running),
            log_pointer: Some("s3://logs/7".to_string()),
            ..Default::default()
        };
        repo.apply_task_result("7", &result, None).await.unwrap();

        let loaded = repo.get_execution("7").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Running);
        assert_eq!(loaded.log_pointer.as_deref(), Some("s3://logs/7"));
        assert!(loaded.finished_at.is_none());
    }
}
