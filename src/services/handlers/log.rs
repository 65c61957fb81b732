use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{HandlerOutcome, LogLine, StreamMessage};
use crate::domain::ports::{LogBuffer, StreamHandler};

/// Buffers agent log lines per execution until the closing result flushes them.
pub struct LogHandler {
    buffer: Arc<dyn LogBuffer>,
}

impl LogHandler {
    pub fn new(buffer: Arc<dyn LogBuffer>) -> Self {
        Self { buffer }
    }

    fn normalize(message: &StreamMessage, execution_id: &str) -> LogLine {
        let received_at = Utc::now();
        let text = |name: &str| message.field(name).unwrap_or_default().to_string();

        LogLine {
            message_id: message.id.clone(),
            execution_id: execution_id.to_string(),
            timestamp: message
                .field("timestamp")
                .map_or_else(|| received_at.to_rfc3339(), str::to_string),
            task_id: message.field("task_id").map(str::to_string),
            host_id: message.parse_i64("host_id"),
            host_name: text("host_name"),
            host_ip: text("host_ip"),
            log_type: message
                .first_field(&["log_type", "stream"])
                .unwrap_or("info")
                .to_string(),
            content: text("content"),
            step_name: text("step_name"),
            step_order: message.parse_i64("step_order").unwrap_or(0),
            step_id: message.field("step_id").map(str::to_string),
            agent_id: message.field("agent_id").map(str::to_string),
            received_at,
        }
    }
}

#[async_trait]
impl StreamHandler for LogHandler {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn handle(&self, message: &StreamMessage) -> DomainResult<HandlerOutcome> {
        let Some(execution_id) = message.field("execution_id") else {
            return Ok(HandlerOutcome::skipped("missing execution_id"));
        };

        let line = Self::normalize(message, execution_id);
        if let Err(err) = self.buffer.append(&line).await {
            return Ok(HandlerOutcome::failed(format!("log buffer append failed: {err}")));
        }

        tracing::trace!(message_id = %message.id, execution_id, "buffered log line");
        Ok(HandlerOutcome::Processed)
    }
}
