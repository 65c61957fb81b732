use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use super::parse_timestamp;
use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentStatus, HandlerOutcome, HeartbeatUpdate, StreamMessage};
use crate::domain::ports::{AgentRepository, StreamHandler};
use crate::services::liveness::LivenessService;

/// Applies agent heartbeats and refreshes the liveness cache.
pub struct HeartbeatHandler {
    agents: Arc<dyn AgentRepository>,
    liveness: Arc<LivenessService>,
}

impl HeartbeatHandler {
    pub fn new(agents: Arc<dyn AgentRepository>, liveness: Arc<LivenessService>) -> Self {
        Self { agents, liveness }
    }
}

#[async_trait]
impl StreamHandler for HeartbeatHandler {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    async fn handle(&self, message: &StreamMessage) -> DomainResult<HandlerOutcome> {
        let Some(raw_id) = message.first_field(&["agent_id", "id"]) else {
            return Ok(HandlerOutcome::skipped("missing agent_id"));
        };
        let Ok(agent_id) = raw_id.parse::<i64>() else {
            return Ok(HandlerOutcome::skipped(format!("non-numeric agent_id {raw_id:?}")));
        };

        let status = match message.field("status") {
            None => AgentStatus::Online,
            Some(raw) => match AgentStatus::from_str(raw) {
                Some(status) => status,
                None => {
                    tracing::warn!(agent_id, status = raw, "ignoring heartbeat with unknown status");
                    return Ok(HandlerOutcome::skipped(format!("unknown status {raw:?}")));
                }
            },
        };

        let received_at = Utc::now();
        let last_heartbeat_at = match message.first_field(&["timestamp", "last_heartbeat"]) {
            None => received_at,
            Some(raw) => parse_timestamp(raw).unwrap_or_else(|| {
                tracing::warn!(agent_id, timestamp = raw, "unparseable heartbeat timestamp, using receive time");
                received_at
            }),
        };

        let update = HeartbeatUpdate {
            agent_id,
            status,
            last_heartbeat_at,
            last_error_code: message.field("error_code").unwrap_or_default().to_string(),
        };
        if !self.agents.apply_heartbeat(&update).await? {
            return Ok(HandlerOutcome::skipped(format!("agent {agent_id} not found")));
        }

        if let Err(err) = self.liveness.compute_and_cache(agent_id).await {
            tracing::warn!(agent_id, error = %err, "liveness refresh failed after heartbeat");
        }

        tracing::debug!(agent_id, status = %status, "applied heartbeat");
        Ok(HandlerOutcome::Processed)
    }
}
