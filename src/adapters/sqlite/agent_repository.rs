//! SQLite implementation of the AgentRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Agent, AgentStatus, AgentType, HeartbeatUpdate};
use crate::domain::ports::AgentRepository;

use super::{format_datetime, format_optional_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime};

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn upsert(&self, agent: &Agent) -> DomainResult<()> {
        let tags_json = serde_json::to_string(&agent.tags)?;

        sqlx::query(
            r"INSERT INTO agents (id, host_id, host_name, agent_type, status, last_heartbeat_at,
               last_error_code, tags, endpoint, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 host_id = excluded.host_id,
                 host_name = excluded.host_name,
                 agent_type = excluded.agent_type,
                 status = excluded.status,
                 last_heartbeat_at = excluded.last_heartbeat_at,
                 last_error_code = excluded.last_error_code,
                 tags = excluded.tags,
                 endpoint = excluded.endpoint,
                 updated_at = excluded.updated_at",
        )
        .bind(agent.id)
        .bind(agent.host_id)
        .bind(&agent.host_name)
        .bind(agent.agent_type.as_str())
        .bind(agent.status.as_str())
        .bind(format_optional_datetime(agent.last_heartbeat_at.as_ref()))
        .bind(&agent.last_error_code)
        .bind(&tags_json)
        .bind(&agent.endpoint)
        .bind(format_datetime(&agent.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, agent_id: i64) -> DomainResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, exclude_status: Option<AgentStatus>) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = match exclude_status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM agents WHERE status != ? ORDER BY id")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM agents ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn apply_heartbeat(&self, update: &HeartbeatUpdate) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE agents SET status = ?, last_heartbeat_at = ?, last_error_code = ?, updated_at = ? WHERE id = ?",
        )
        .bind(update.status.as_str())
        .bind(format_datetime(&update.last_heartbeat_at))
        .bind(&update.last_error_code)
        .bind(format_datetime(&Utc::now()))
        .bind(update.agent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, agent_id: i64, status: AgentStatus, at: DateTime<Utc>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE agents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(format_datetime(&at))
            .bind(agent_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AgentNotFound(agent_id));
        }

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: i64,
    host_id: i64,
    host_name: String,
    agent_type: String,
    status: String,
    last_heartbeat_at: Option<String>,
    last_error_code: String,
    tags: Option<String>,
    endpoint: Option<String>,
    updated_at: String,
}

impl TryFrom<AgentRow> for Agent {
    type Error = DomainError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let status = AgentStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid agent status: {}", row.status)))?;
        let agent_type = AgentType::from_str(&row.agent_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid agent type: {}", row.agent_type)))?;

        Ok(Agent {
            id: row.id,
            host_id: row.host_id,
            host_name: row.host_name,
            agent_type,
            status,
            last_heartbeat_at: parse_optional_datetime(row.last_heartbeat_at)?,
            last_error_code: row.last_error_code,
            tags: parse_json_or_default(row.tags)?,
            endpoint: row.endpoint,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
