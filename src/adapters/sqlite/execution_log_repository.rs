//! SQLite implementation of the ExecutionLogRepository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::LogLine;
use crate::domain::ports::ExecutionLogRepository;

use super::{format_datetime, parse_datetime};

const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct SqliteExecutionLogRepository {
    pool: SqlitePool,
    batch_size: usize,
}

impl SqliteExecutionLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Rows per multi-row insert.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[async_trait]
impl ExecutionLogRepository for SqliteExecutionLogRepository {
    async fn insert_batch(&self, lines: &[LogLine]) -> DomainResult<u64> {
        if lines.is_empty() {
            return Ok(0);
        }

        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for chunk in lines.chunks(self.batch_size) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO execution_logs (message_id, execution_id, timestamp, task_id, host_id, \
                 host_name, host_ip, log_type, content, step_name, step_order, step_id, agent_id, received_at) ",
            );
            builder.push_values(chunk, |mut row, line| {
                row.push_bind(&line.message_id)
                    .push_bind(&line.execution_id)
                    .push_bind(&line.timestamp)
                    .push_bind(&line.task_id)
                    .push_bind(line.host_id)
                    .push_bind(&line.host_name)
                    .push_bind(&line.host_ip)
                    .push_bind(&line.log_type)
                    .push_bind(&line.content)
                    .push_bind(&line.step_name)
                    .push_bind(line.step_order)
                    .push_bind(&line.step_id)
                    .push_bind(&line.agent_id)
                    .push_bind(format_datetime(&line.received_at));
            });

            let result = builder.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_for_execution(&self, execution_id: &str) -> DomainResult<Vec<LogLine>> {
        let rows: Vec<LogRow> = sqlx::query_as("SELECT * FROM execution_logs WHERE execution_id = ? ORDER BY id")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    message_id: String,
    execution_id: String,
    timestamp: String,
    task_id: Option<String>,
    host_id: Option<i64>,
    host_name: String,
    host_ip: String,
    log_type: String,
    content: String,
    step_name: String,
    step_order: i64,
    step_id: Option<String>,
    agent_id: Option<String>,
    received_at: String,
}

impl TryFrom<LogRow> for LogLine {
    type Error = DomainError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(LogLine {
            message_id: row.message_id,
            execution_id: row.execution_id,
            timestamp: row.timestamp,
            task_id: row.task_id,
            host_id: row.host_id,
            host_name: row.host_name,
            host_ip: row.host_ip,
            log_type: row.log_type,
            content: row.content,
            step_name: row.step_name,
            step_order: row.step_order,
            step_id: row.step_id,
            agent_id: row.agent_id,
            received_at: parse_datetime(&row.received_at)?,
        })
    }
}
