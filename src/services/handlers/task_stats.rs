use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentTaskStats, HandlerOutcome, StreamMessage};
use crate::domain::ports::{StreamHandler, TaskStatsRepository};

/// Upserts the per-agent task counters row.
pub struct TaskStatsHandler {
    stats: Arc<dyn TaskStatsRepository>,
}

impl TaskStatsHandler {
    pub fn new(stats: Arc<dyn TaskStatsRepository>) -> Self {
        Self { stats }
    }
}

fn counter(message: &StreamMessage, agent_id: i64, name: &str) -> i64 {
    match message.field(name) {
        None => 0,
        Some(raw) => message.parse_i64(name).unwrap_or_else(|| {
            tracing::warn!(agent_id, field = name, value = raw, "unparseable task counter, using 0");
            0
        }),
    }
}

#[async_trait]
impl StreamHandler for TaskStatsHandler {
    fn name(&self) -> &'static str {
        "task_stats"
    }

    async fn handle(&self, message: &StreamMessage) -> DomainResult<HandlerOutcome> {
        let Some(raw_id) = message.field("agent_id") else {
            return Ok(HandlerOutcome::skipped("missing agent_id"));
        };
        let Ok(agent_id) = raw_id.parse::<i64>() else {
            return Ok(HandlerOutcome::skipped(format!("non-numeric agent_id {raw_id:?}")));
        };

        let avg_duration_ms = match message.field("avg_duration_ms") {
            None => 0.0,
            Some(raw) => message.parse_f64("avg_duration_ms").unwrap_or_else(|| {
                tracing::warn!(agent_id, value = raw, "unparseable avg_duration_ms, using 0");
                0.0
            }),
        };

        let stats = AgentTaskStats {
            agent_id,
            total: counter(message, agent_id, "total"),
            success: counter(message, agent_id, "success"),
            failed: counter(message, agent_id, "failed"),
            cancelled: counter(message, agent_id, "cancelled"),
            avg_duration_ms,
            updated_at: Some(Utc::now()),
        };

        if !self.stats.upsert(&stats).await? {
            // The agent may have been deleted since it reported.
            return Ok(HandlerOutcome::skipped(format!("agent {agent_id} not found")));
        }
        Ok(HandlerOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryAgentRepository, InMemoryTaskStatsRepository};
    use crate::domain::models::Agent;
    use crate::domain::ports::AgentRepository;
    use std::collections::BTreeMap;

    fn message(pairs: &[(&str, &str)]) -> StreamMessage {
        let fields: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StreamMessage::new("4-0", fields)
    }

    async fn fixture() -> (Arc<InMemoryTaskStatsRepository>, TaskStatsHandler) {
        let agents = Arc::new(InMemoryAgentRepository::new());
        agents.upsert(&Agent::new(5, 50, "db-1")).await.unwrap();
        let stats = Arc::new(InMemoryTaskStatsRepository::new(agents));
        (stats.clone(), TaskStatsHandler::new(stats))
    }

    #[tokio::test]
    async fn test_counters_are_upserted() {
        let (stats, handler) = fixture().await;
        let msg = message(&[
            ("agent_id", "5"),
            ("total", "10"),
            ("success", "8"),
            ("failed", "1"),
            ("cancelled", "1"),
            ("avg_duration_ms", "1250.5"),
        ]);
        assert_eq!(handler.handle(&msg).await.unwrap(), HandlerOutcome::Processed);
        // Replaying the same message converges to the same row.
        assert_eq!(handler.handle(&msg).await.unwrap(), HandlerOutcome::Processed);

        let row = stats.get(5).await.unwrap().unwrap();
        assert_eq!(row.total, 10);
        assert_eq!(row.success, 8);
        assert!((row.avg_duration_ms - 1250.5).abs() < f64::EPSILON);
        assert!((row.success_rate() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_garbage_counters_default_to_zero() {
        let (stats, handler) = fixture().await;
        handler
            .handle(&message(&[("agent_id", "5"), ("total", "many"), ("success", "3")]))
            .await
            .unwrap();

        let row = stats.get(5).await.unwrap().unwrap();
        assert_eq!(row.total, 0);
        assert_eq!(row.success, 3);
    }

    #[tokio::test]
    async fn test_missing_agent_is_skipped() {
        let (_, handler) = fixture().await;
        let outcome = handler.handle(&message(&[("agent_id", "404")])).await.unwrap();
        assert!(matches!(outcome, HandlerOutcome::Skipped(_)));
    }
}
