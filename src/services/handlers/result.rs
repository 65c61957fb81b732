use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use super::parse_timestamp;
use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ExecutionProgress, ExecutionStatus, HandlerOutcome, ResultApplication, StreamMessage, TaskResult,
};
use crate::domain::ports::{ExecutionLogRepository, ExecutionRepository, LogBuffer, StreamHandler};

/// Applies task results after flushing the execution's buffered logs.
pub struct ResultHandler {
    executions: Arc<dyn ExecutionRepository>,
    logs: Arc<dyn ExecutionLogRepository>,
    buffer: Arc<dyn LogBuffer>,
}

impl ResultHandler {
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        logs: Arc<dyn ExecutionLogRepository>,
        buffer: Arc<dyn LogBuffer>,
    ) -> Self {
        Self {
            executions,
            logs,
            buffer,
        }
    }

    /// Move buffered lines into durable storage. Only the loaded snapshot is
    /// discarded, and only once the insert succeeded; re-flushing is idempotent.
    pub async fn flush_logs(&self, execution_id: &str) -> DomainResult<u64> {
        let snapshot = self.buffer.load(execution_id).await?;
        if snapshot.is_empty() {
            return Ok(0);
        }

        let inserted = if snapshot.lines.is_empty() {
            0
        } else {
            self.logs.insert_batch(&snapshot.lines).await?
        };
        if let Err(err) = self.buffer.discard(execution_id, snapshot.entries).await {
            tracing::warn!(execution_id, error = %err, "flushed log buffer could not be discarded");
        }

        tracing::debug!(
            execution_id,
            buffered = snapshot.entries,
            decoded = snapshot.lines.len(),
            inserted,
            "flushed execution logs"
        );
        Ok(inserted)
    }

    fn parse_result(message: &StreamMessage) -> TaskResult {
        TaskResult {
            status: message.field("status").and_then(ExecutionStatus::from_str),
            exit_code: message.parse_i64("exit_code"),
            error_msg: message.field("error_msg").map(str::to_string),
            error_code: message.field("error_code").map(str::to_string),
            log_size: message.parse_i64("log_size"),
            log_pointer: message.field("log_pointer").map(str::to_string),
            started_at: message.field("started_at").and_then(parse_timestamp),
            finished_at: message.field("finished_at").and_then(parse_timestamp),
        }
    }

    fn parse_progress(message: &StreamMessage) -> Option<ExecutionProgress> {
        let progress = ExecutionProgress {
            progress: message.parse_i64("progress"),
            total_hosts: message.parse_i64("total_hosts"),
            success_hosts: message.parse_i64("success_hosts"),
            failed_hosts: message.parse_i64("failed_hosts"),
            running_hosts: message.parse_i64("running_hosts"),
            pending_hosts: message.parse_i64("pending_hosts"),
            updated_at: Some(Utc::now()),
        };
        (!progress.is_empty()).then_some(progress)
    }
}

#[async_trait]
impl StreamHandler for ResultHandler {
    fn name(&self) -> &'static str {
        "result"
    }

    async fn handle(&self, message: &StreamMessage) -> DomainResult<HandlerOutcome> {
        let Some(execution_id) = message.field("execution_id") else {
            return Ok(HandlerOutcome::skipped("missing execution_id"));
        };

        // Logs must be durable no later than the result that closes them.
        if let Err(err) = self.flush_logs(execution_id).await {
            return Ok(HandlerOutcome::failed(format!("log flush failed: {err}")));
        }

        let result = Self::parse_result(message);
        let progress = Self::parse_progress(message);

        match self
            .executions
            .apply_task_result(execution_id, &result, progress.as_ref())
            .await?
        {
            ResultApplication::Applied => {
                tracing::info!(
                    execution_id,
                    status = result.status.map_or("unchanged", |s| s.as_str()),
                    exit_code = ?result.exit_code,
                    "applied task result"
                );
                Ok(HandlerOutcome::Processed)
            }
            ResultApplication::NotFound => Ok(HandlerOutcome::failed(format!(
                "execution {execution_id} not found"
            ))),
        }
    }
}
