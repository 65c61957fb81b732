//! Per-event-type stream handlers.
//!
//! Each handler turns one raw message into a domain effect and reports a
//! [`HandlerOutcome`](crate::domain::models::HandlerOutcome). Malformed
//! messages are skipped; only persistence failures are reported as failed.

pub mod heartbeat;
pub mod log;
pub mod result;
pub mod task_stats;

pub use heartbeat::HeartbeatHandler;
pub use log::LogHandler;
pub use result::ResultHandler;
pub use task_stats::TaskStatsHandler;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Epoch values above this are milliseconds.
const EPOCH_MILLIS_CUTOFF: f64 = 1e12;

/// Parse an agent timestamp: epoch seconds, epoch milliseconds, RFC 3339
/// (with `Z` or an offset) or a naive ISO-8601 value taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(epoch) = raw.parse::<f64>() {
        if !epoch.is_finite() || epoch < 0.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let millis = if epoch > EPOCH_MILLIS_CUTOFF {
            epoch as i64
        } else {
            (epoch * 1000.0) as i64
        };
        return DateTime::from_timestamp_millis(millis);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_epoch_seconds_and_millis() {
        assert_eq!(parse_timestamp("1700000000"), Some(at(1_700_000_000)));
        assert_eq!(parse_timestamp("1700000000000"), Some(at(1_700_000_000)));
        assert_eq!(
            parse_timestamp("1700000000.5"),
            DateTime::from_timestamp_millis(1_700_000_000_500)
        );
    }

    #[test]
    fn test_iso_variants() {
        let expected = at(1_700_000_000);
        assert_eq!(parse_timestamp("2023-11-14T22:13:20Z"), Some(expected));
        assert_eq!(parse_timestamp("2023-11-15T06:13:20+08:00"), Some(expected));
        assert_eq!(parse_timestamp("2023-11-14T22:13:20"), Some(expected));
        assert_eq!(parse_timestamp("2023-11-14 22:13:20.000"), Some(expected));
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("-5"), None);
    }
}
