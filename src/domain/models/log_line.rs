//! Normalized execution log lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One log line emitted by an agent while running a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Id of the stream message that carried this line; unique in durable storage.
    pub message_id: String,
    pub execution_id: String,
    /// Agent-side timestamp, as sent (ISO-8601 or epoch).
    pub timestamp: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub host_id: Option<i64>,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub host_ip: String,
    pub log_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub step_name: String,
    #[serde(default)]
    pub step_order: i64,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl LogLine {
    pub fn new(
        message_id: impl Into<String>,
        execution_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let received_at = Utc::now();
        Self {
            message_id: message_id.into(),
            execution_id: execution_id.into(),
            timestamp: received_at.to_rfc3339(),
            task_id: None,
            host_id: None,
            host_name: String::new(),
            host_ip: String::new(),
            log_type: "info".to_string(),
            content: content.into(),
            step_name: String::new(),
            step_order: 0,
            step_id: None,
            agent_id: None,
            received_at,
        }
    }
}

/// A snapshot of an execution's buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedLogs {
    /// Lines that decoded, oldest first.
    pub lines: Vec<LogLine>,
    /// Buffer entries the snapshot covers, including undecodable ones.
    pub entries: usize,
}

impl BufferedLogs {
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
