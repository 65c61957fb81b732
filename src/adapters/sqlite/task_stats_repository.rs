//! SQLite implementation of the TaskStatsRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentTaskStats;
use crate::domain::ports::TaskStatsRepository;

use super::{format_datetime, parse_optional_datetime};

#[derive(Clone)]
pub struct SqliteTaskStatsRepository {
    pool: SqlitePool,
}

impl SqliteTaskStatsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStatsRepository for SqliteTaskStatsRepository {
    async fn upsert(&self, stats: &AgentTaskStats) -> DomainResult<bool> {
        let updated_at = stats.updated_at.unwrap_or_else(Utc::now);

        // Insert only when the agent exists; the select yields no row otherwise.
        let result = sqlx::query(
            r"INSERT INTO agent_task_stats (agent_id, total, success, failed, cancelled, avg_duration_ms, updated_at)
               SELECT id, ?, ?, ?, ?, ?, ? FROM agents WHERE id = ?
               ON CONFLICT(agent_id) DO UPDATE SET
                 total = excluded.total,
                 success = excluded.success,
                 failed = excluded.failed,
                 cancelled = excluded.cancelled,
                 avg_duration_ms = excluded.avg_duration_ms,
                 updated_at = excluded.updated_at",
        )
        .bind(stats.total)
        .bind(stats.success)
        .bind(stats.failed)
        .bind(stats.cancelled)
        .bind(stats.avg_duration_ms)
        .bind(format_datetime(&updated_at))
        .bind(stats.agent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, agent_id: i64) -> DomainResult<Option<AgentTaskStats>> {
        let row: Option<StatsRow> = sqlx::query_as("SELECT * FROM agent_task_stats WHERE agent_id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            Ok(AgentTaskStats {
                agent_id: r.agent_id,
                total: r.total,
                success: r.success,
                failed: r.failed,
                cancelled: r.cancelled,
                avg_duration_ms: r.avg_duration_ms,
                updated_at: parse_optional_datetime(Some(r.updated_at))?,
            })
        })
        .transpose()
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    agent_id: i64,
    total: i64,
    success: i64,
    failed: i64,
    cancelled: i64,
    avg_duration_ms: f64,
    updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{initialize_test_database, SqliteAgentRepository};
    use crate::domain::models::Agent;
    use crate::domain::ports::AgentRepository;

    #[tokio::test]
    async fn test_upsert_requires_agent_and_replaces_counters() {
        let pool = initialize_test_database().await.unwrap();
        let agents = SqliteAgentRepository::new(pool.clone());
        let repo = SqliteTaskStatsRepository::new(pool);

        let stats = AgentTaskStats {
            agent_id: 5,
            total: 10,
            success: 8,
            failed: 2,
            ..Default::default()
        };
        assert!(!repo.upsert(&stats).await.unwrap());

        agents.upsert(&Agent::new(5, 50, "h")).await.unwrap();
        assert!(repo.upsert(&stats).await.unwrap());

        let updated = AgentTaskStats {
            total: 12,
            success: 9,
            ..stats
        };
        assert!(repo.upsert(&updated).await.unwrap());

        let loaded = repo.get(5).await.unwrap().unwrap();
        assert_eq!(loaded.total, 12);
        assert_eq!(loaded.success, 9);
        assert_eq!(loaded.failed, 2);
    }
}
