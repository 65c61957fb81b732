//! Composition root: builds adapters and services from the resolved config.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::memory::{
    InMemoryAgentRepository, InMemoryExecutionLogRepository, InMemoryExecutionRepository,
    InMemoryStreamLog, InMemoryTaskStatsRepository, MokaLogBuffer,
};
use crate::adapters::redis_store::{RedisLogBuffer, RedisStreamLogConnector};
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteAgentRepository, SqliteExecutionLogRepository,
    SqliteExecutionRepository, SqliteTaskStatsRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{
    AgentRepository, ExecutionLogRepository, ExecutionRepository, LogBuffer, StreamLog, StreamLogConnector,
    TaskStatsRepository,
};
use crate::services::{DeadLetterService, LivenessService, ReconciliationService};

const SECS_PER_DAY: u64 = 86_400;

/// Every collaborator a command may need, wired once per process.
pub struct Runtime {
    pub config: Config,
    pub agents: Arc<dyn AgentRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub execution_logs: Arc<dyn ExecutionLogRepository>,
    pub task_stats: Arc<dyn TaskStatsRepository>,
    pub log_buffer: Arc<dyn LogBuffer>,
    pub connector: Arc<dyn StreamLogConnector>,
    pub liveness: Arc<LivenessService>,
}

impl Runtime {
    /// SQLite + Redis, or process-local adapters when `in_memory` is set.
    pub async fn build(config: Config, in_memory: bool) -> Result<Self> {
        if in_memory {
            Ok(Self::in_memory(config))
        } else {
            Self::persistent(config).await
        }
    }

    pub fn in_memory(config: Config) -> Self {
        let agents: Arc<dyn AgentRepository> = Arc::new(InMemoryAgentRepository::new());
        let retention = Duration::from_secs(config.log_buffer.retention_days * SECS_PER_DAY);

        Self::assemble(
            config,
            agents.clone(),
            Arc::new(InMemoryExecutionRepository::new()),
            Arc::new(InMemoryExecutionLogRepository::new()),
            Arc::new(InMemoryTaskStatsRepository::new(agents)),
            Arc::new(MokaLogBuffer::new(retention)),
            Arc::new(InMemoryStreamLog::new()),
        )
    }

    async fn persistent(config: Config) -> Result<Self> {
        let url = database_url(&config.database.path);
        let pool = initialize_database(&url, Some(PoolConfig::from(&config.database)))
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;

        let connector = RedisStreamLogConnector::new(
            &config.redis.url,
            Duration::from_secs(config.redis.connect_timeout_secs),
        )
        .context("Invalid Redis configuration")?;
        // The buffer connects on first use; SQLite-only commands never reach Redis.
        let log_buffer = RedisLogBuffer::new(
            connector.clone(),
            config.log_buffer.key_prefix.clone(),
            Duration::from_secs(config.log_buffer.retention_days * SECS_PER_DAY),
        );

        Ok(Self::assemble(
            config.clone(),
            Arc::new(SqliteAgentRepository::new(pool.clone())),
            Arc::new(SqliteExecutionRepository::new(pool.clone())),
            Arc::new(SqliteExecutionLogRepository::new(pool.clone()).with_batch_size(config.log_buffer.flush_batch_size)),
            Arc::new(SqliteTaskStatsRepository::new(pool)),
            Arc::new(log_buffer),
            Arc::new(connector),
        ))
    }

    fn assemble(
        config: Config,
        agents: Arc<dyn AgentRepository>,
        executions: Arc<dyn ExecutionRepository>,
        execution_logs: Arc<dyn ExecutionLogRepository>,
        task_stats: Arc<dyn TaskStatsRepository>,
        log_buffer: Arc<dyn LogBuffer>,
        connector: Arc<dyn StreamLogConnector>,
    ) -> Self {
        let liveness = Arc::new(LivenessService::new(agents.clone(), config.liveness.clone()));
        Self {
            config,
            agents,
            executions,
            execution_logs,
            task_stats,
            log_buffer,
            connector,
            liveness,
        }
    }

    pub fn reconciliation(&self) -> ReconciliationService {
        ReconciliationService::new(
            self.agents.clone(),
            self.executions.clone(),
            self.liveness.clone(),
            self.config.reconciliation.clone(),
        )
    }

    pub async fn stream_log(&self) -> Result<Arc<dyn StreamLog>> {
        self.connector.connect().await.context("Failed to connect to the event log")
    }

    pub async fn dead_letters(&self) -> Result<DeadLetterService> {
        Ok(DeadLetterService::new(self.stream_log().await?))
    }
}
