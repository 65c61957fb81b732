//! Event log messages and consumer bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field added to a dead-letter entry with the failure reason.
pub const DLQ_ERROR_FIELD: &str = "error";
/// Field added to a dead-letter entry with the stream the message came from.
pub const DLQ_ORIGIN_STREAM_FIELD: &str = "origin_stream";
/// Field added to a dead-letter entry with the original message id.
pub const DLQ_ORIGIN_ID_FIELD: &str = "origin_id";

/// Default dead-letter key for a stream.
pub fn dead_letter_key(stream: &str) -> String {
    format!("{stream}:dlq")
}

/// A message read from the event log.
///
/// Ids are assigned by the log, are monotonic within a stream and never
/// reused. All field values are strings at the wire level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub id: String,
    pub fields: BTreeMap<String, String>,
}

impl StreamMessage {
    pub fn new(id: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Field value with surrounding whitespace removed; blank values read as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First present field among `names`.
    pub fn first_field(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.field(name))
    }

    /// Parse a numeric field; unparseable values read as absent.
    pub fn parse_i64(&self, name: &str) -> Option<i64> {
        let raw = self.field(name)?;
        raw.parse::<i64>().ok().or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
    }

    pub fn parse_f64(&self, name: &str) -> Option<f64> {
        self.field(name)?.parse::<f64>().ok().filter(|f| f.is_finite())
    }
}

/// A failed message copied to the dead-letter log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Id of the entry inside the dead-letter log.
    pub id: String,
    pub origin_stream: String,
    pub origin_id: String,
    pub error: String,
    /// The original message fields, without the dead-letter bookkeeping.
    pub fields: BTreeMap<String, String>,
}

impl DeadLetterEntry {
    /// Fields written to the dead-letter log for `message`.
    pub fn encode(origin_stream: &str, message: &StreamMessage, error: &str) -> BTreeMap<String, String> {
        let mut fields = message.fields.clone();
        fields.insert(DLQ_ERROR_FIELD.to_string(), error.to_string());
        fields.insert(DLQ_ORIGIN_STREAM_FIELD.to_string(), origin_stream.to_string());
        fields.insert(DLQ_ORIGIN_ID_FIELD.to_string(), message.id.clone());
        fields
    }

    /// Split a raw dead-letter message back into bookkeeping and original fields.
    pub fn decode(message: StreamMessage) -> Self {
        let mut fields = message.fields;
        let error = fields.remove(DLQ_ERROR_FIELD).unwrap_or_default();
        let origin_stream = fields.remove(DLQ_ORIGIN_STREAM_FIELD).unwrap_or_default();
        let origin_id = fields.remove(DLQ_ORIGIN_ID_FIELD).unwrap_or_default();
        Self {
            id: message.id,
            origin_stream,
            origin_id,
            error,
            fields,
        }
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Effect applied; acknowledge.
    Processed,
    /// The message can never succeed (e.g. missing correlation id); acknowledge.
    Skipped(String),
    /// Retryable failure; dead-letter and leave pending.
    Failed(String),
}

impl HandlerOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn should_ack(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processed => f.write_str("processed"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// An entry of a consumer group's pending set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// Counters for one `read_and_process` cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub read: usize,
    pub acked: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Counters for one `reclaim_pending` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimStats {
    pub checked: usize,
    pub claimed: usize,
    pub acked: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(pairs: &[(&str, &str)]) -> StreamMessage {
        StreamMessage::new(
            "1-0",
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        )
    }

    #[test]
    fn test_blank_fields_read_as_absent() {
        let msg = message(&[("execution_id", "  "), ("id", "7")]);
        assert_eq!(msg.field("execution_id"), None);
        assert_eq!(msg.first_field(&["agent_id", "id"]), Some("7"));
    }

    #[test]
    fn test_numeric_parsing_is_lenient() {
        let msg = message(&[("a", "12"), ("b", "3.9"), ("c", "abc")]);
        assert_eq!(msg.parse_i64("a"), Some(12));
        assert_eq!(msg.parse_i64("b"), Some(3));
        assert_eq!(msg.parse_i64("c"), None);
        assert_eq!(msg.parse_i64("missing"), None);
    }

    #[test]
    fn test_dead_letter_encode_decode() {
        let msg = message(&[("execution_id", "42")]);
        let encoded = DeadLetterEntry::encode("agent_results", &msg, "db down");
        assert_eq!(encoded.get("origin_stream").map(String::as_str), Some("agent_results"));
        assert_eq!(encoded.get("origin_id").map(String::as_str), Some("1-0"));

        let entry = DeadLetterEntry::decode(StreamMessage::new("9-0", encoded));
        assert_eq!(entry.id, "9-0");
        assert_eq!(entry.error, "db down");
        assert_eq!(entry.fields, msg.fields);
    }

    #[test]
    fn test_outcome_ack_policy() {
        assert!(HandlerOutcome::Processed.should_ack());
        assert!(HandlerOutcome::skipped("no id").should_ack());
        assert!(!HandlerOutcome::failed("db").should_ack());
    }

    #[test]
    fn test_dead_letter_key() {
        assert_eq!(dead_letter_key("agent_logs"), "agent_logs:dlq");
    }
}
