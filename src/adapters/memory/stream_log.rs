//! In-process event log with consumer-group semantics.
//!
//! Mirrors the subset of Redis Streams used by the consumer: ids are
//! `{millis}-{seq}`, groups track a delivery cursor and a pending set, and
//! blocking reads wake up on append.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};

use crate::domain::models::{PendingEntry, StreamMessage};
use crate::domain::ports::{StreamError, StreamLog, StreamLogConnector, StreamResult};

type EntryId = (u64, u64);

fn format_id(id: EntryId) -> String {
    format!("{}-{}", id.0, id.1)
}

fn parse_id(raw: &str) -> Option<EntryId> {
    let (ms, seq) = raw.split_once('-').unwrap_or((raw, "0"));
    Some((ms.parse().ok()?, seq.parse().ok()?))
}

#[derive(Debug)]
struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingState>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, BTreeMap<String, String>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&mut self) -> EntryId {
        let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let id = if now_ms > self.last_id.0 {
            (now_ms, 0)
        } else {
            (self.last_id.0, self.last_id.1 + 1)
        };
        self.last_id = id;
        id
    }

    fn message(&self, id: EntryId) -> Option<StreamMessage> {
        self.entries
            .get(&id)
            .map(|fields| StreamMessage::new(format_id(id), fields.clone()))
    }
}

#[derive(Default)]
struct Shared {
    streams: Mutex<HashMap<String, StreamState>>,
    appended: Notify,
    unavailable: AtomicBool,
    reject_appends: AtomicBool,
}

/// Cloneable handle; clones share the same log.
#[derive(Clone, Default)]
pub struct InMemoryStreamLog {
    shared: Arc<Shared>,
}

impl InMemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the log being unreachable: every call fails with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.shared.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `append` fail while reads and acks keep working.
    pub fn set_reject_appends(&self, reject: bool) {
        self.shared.reject_appends.store(reject, Ordering::SeqCst);
    }

    /// Number of messages in a stream.
    pub async fn len(&self, stream: &str) -> usize {
        let streams = self.shared.streams.lock().await;
        streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Ids currently pending in a group.
    pub async fn pending_ids(&self, stream: &str, group: &str) -> Vec<String> {
        let streams = self.shared.streams.lock().await;
        streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.keys().copied().map(format_id).collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> StreamResult<()> {
        if self.shared.unavailable.load(Ordering::SeqCst) {
            return Err(StreamError::Transport("event log unavailable".to_string()));
        }
        Ok(())
    }

    async fn try_read(&self, stream: &str, group: &str, consumer: &str, count: usize) -> StreamResult<Vec<StreamMessage>> {
        let mut streams = self.shared.streams.lock().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| StreamError::Protocol(format!("NOGROUP no such key '{stream}'")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| StreamError::Protocol(format!("NOGROUP no such consumer group '{group}'")))?;

        let ids: Vec<EntryId> = state
            .entries
            .range((std::ops::Bound::Excluded(group_state.last_delivered), std::ops::Bound::Unbounded))
            .take(count)
            .map(|(id, _)| *id)
            .collect();

        let now = Instant::now();
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            group_state.last_delivered = id;
            group_state.pending.insert(
                id,
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            if let Some(fields) = state.entries.get(&id) {
                messages.push(StreamMessage::new(format_id(id), fields.clone()));
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl StreamLog for InMemoryStreamLog {
    async fn ensure_group(&self, stream: &str, group: &str) -> StreamResult<()> {
        self.check_available()?;
        let mut streams = self.shared.streams.lock().await;
        streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StreamResult<Vec<StreamMessage>> {
        let deadline = Instant::now() + block;
        loop {
            self.check_available()?;

            let notified = self.shared.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let messages = self.try_read(stream, group, consumer, count).await?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> StreamResult<u64> {
        self.check_available()?;
        let mut streams = self.shared.streams.lock().await;
        let Some(group_state) = streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) else {
            return Ok(0);
        };

        let acked = ids
            .iter()
            .filter_map(|id| parse_id(id))
            .filter(|id| group_state.pending.remove(id).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> StreamResult<Vec<PendingEntry>> {
        self.check_available()?;
        let streams = self.shared.streams.lock().await;
        let group_state = streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| StreamError::Protocol(format!("NOGROUP no such consumer group '{group}'")))?;

        let now = Instant::now();
        Ok(group_state
            .pending
            .iter()
            .take(count)
            .map(|(id, p)| PendingEntry {
                id: format_id(*id),
                consumer: p.consumer.clone(),
                idle_ms: u64::try_from(now.duration_since(p.delivered_at).as_millis()).unwrap_or(u64::MAX),
                delivery_count: p.delivery_count,
            })
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        ids: &[String],
    ) -> StreamResult<Vec<StreamMessage>> {
        self.check_available()?;
        let mut streams = self.shared.streams.lock().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Err(StreamError::Protocol(format!("NOGROUP no such consumer group '{group}'")));
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        for id in ids.iter().filter_map(|id| parse_id(id)) {
            let Some(pending) = group_state.pending.get_mut(&id) else {
                continue;
            };
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            if !state.entries.contains_key(&id) {
                // Deleted while pending.
                group_state.pending.remove(&id);
                continue;
            }
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.delivery_count += 1;
            claimed.push(id);
        }

        Ok(claimed.into_iter().filter_map(|id| state.message(id)).collect())
    }

    async fn append(&self, stream: &str, fields: &BTreeMap<String, String>) -> StreamResult<String> {
        self.check_available()?;
        if self.shared.reject_appends.load(Ordering::SeqCst) {
            return Err(StreamError::Protocol(format!("append to {stream} rejected")));
        }

        let id = {
            let mut streams = self.shared.streams.lock().await;
            let state = streams.entry(stream.to_string()).or_default();
            let id = state.next_id();
            state.entries.insert(id, fields.clone());
            id
        };
        self.shared.appended.notify_waiters();
        Ok(format_id(id))
    }

    async fn range(&self, stream: &str, count: usize) -> StreamResult<Vec<StreamMessage>> {
        self.check_available()?;
        let streams = self.shared.streams.lock().await;
        Ok(streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .take(count)
                    .map(|(id, fields)| StreamMessage::new(format_id(*id), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, stream: &str, id: &str) -> StreamResult<Option<StreamMessage>> {
        self.check_available()?;
        let streams = self.shared.streams.lock().await;
        Ok(parse_id(id).and_then(|id| streams.get(stream).and_then(|s| s.message(id))))
    }

    async fn delete(&self, stream: &str, ids: &[String]) -> StreamResult<u64> {
        self.check_available()?;
        let mut streams = self.shared.streams.lock().await;
        let Some(state) = streams.get_mut(stream) else {
            return Ok(0);
        };
        let deleted = ids
            .iter()
            .filter_map(|id| parse_id(id))
            .filter(|id| state.entries.remove(id).is_some())
            .count();
        Ok(deleted as u64)
    }
}

#[async_trait]
impl StreamLogConnector for InMemoryStreamLog {
    async fn connect(&self) -> StreamResult<Arc<dyn StreamLog>> {
        self.check_available()?;
        Ok(Arc::new(self.clone()))
    }
}
