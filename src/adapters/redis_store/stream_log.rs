//! Redis Streams implementation of the StreamLog port.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{PendingEntry, StreamMessage};
use crate::domain::ports::{StreamError, StreamLog, StreamLogConnector, StreamResult};

/// Groups are created at the start of the stream so nothing written before
/// the first consumer came up is skipped.
const GROUP_START_ID: &str = "0";

#[derive(Clone)]
pub struct RedisStreamLog {
    conn: ConnectionManager,
}

impl RedisStreamLog {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl From<RedisError> for StreamError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
            StreamError::Transport(err.to_string())
        } else {
            StreamError::Protocol(err.to_string())
        }
    }
}

/// Field values are text by contract. Anything else is decoded lossily, so
/// one malformed producer cannot wedge the group; `None` flags the loss.
fn field_text(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::SimpleString(text) => Some(text.clone()),
        redis::Value::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

fn to_message(entry: StreamId) -> StreamMessage {
    let mut fields = BTreeMap::new();
    for (key, value) in &entry.map {
        let text = field_text(value).unwrap_or_else(|| {
            tracing::warn!(id = %entry.id, field = %key, "stream field is not valid text, decoded lossily");
            match value {
                redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                other => format!("{other:?}"),
            }
        });
        fields.insert(key.clone(), text);
    }
    StreamMessage::new(entry.id, fields)
}

fn block_millis(block: Duration) -> usize {
    usize::try_from(block.as_millis()).unwrap_or(usize::MAX)
}

#[async_trait]
impl StreamLog for RedisStreamLog {
    async fn ensure_group(&self, stream: &str, group: &str) -> StreamResult<()> {
        let mut conn = self.conn.clone();
        let created: Result<(), RedisError> = conn.xgroup_create_mkstream(stream, group, GROUP_START_ID).await;
        match created {
            Ok(()) => {
                tracing::info!(stream, group, "consumer group created");
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> StreamResult<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let mut options = StreamReadOptions::default().group(group, consumer).count(count);
        if !block.is_zero() {
            options = options.block(block_millis(block));
        }

        let reply: Option<StreamReadReply> = conn.xread_options(&[stream], &[">"], &options).await?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        Ok(reply
            .keys
            .into_iter()
            .flat_map(|key| key.ids)
            .map(to_message)
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> StreamResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let acked: u64 = conn.xack(stream, group, ids).await?;
        Ok(acked)
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> StreamResult<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn.xpending_count(stream, group, "-", "+", count).await?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| PendingEntry {
                id: p.id,
                consumer: p.consumer,
                idle_ms: p.last_delivered_ms as u64,
                delivery_count: p.times_delivered as u64,
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
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let reply: StreamClaimReply = conn
            .xclaim(stream, group, consumer, block_millis(min_idle), ids)
            .await?;

        Ok(reply.ids.into_iter().map(to_message).collect())
    }

    async fn append(&self, stream: &str, fields: &BTreeMap<String, String>) -> StreamResult<String> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd_map(stream, "*", fields).await?;
        Ok(id)
    }

    async fn range(&self, stream: &str, count: usize) -> StreamResult<Vec<StreamMessage>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange_count(stream, "-", "+", count).await?;
        Ok(reply.ids.into_iter().map(to_message).collect())
    }

    async fn get(&self, stream: &str, id: &str) -> StreamResult<Option<StreamMessage>> {
        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange_count(stream, id, id, 1).await?;
        Ok(reply.ids.into_iter().next().map(to_message))
    }

    async fn delete(&self, stream: &str, ids: &[String]) -> StreamResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.xdel(stream, ids).await?;
        Ok(deleted)
    }
}

/// Opens a dedicated Redis connection per consumption loop.
#[derive(Clone)]
pub struct RedisStreamLogConnector {
    client: redis::Client,
    connect_timeout: Duration,
}

impl RedisStreamLogConnector {
    pub fn new(url: &str, connect_timeout: Duration) -> StreamResult<Self> {
        let client = redis::Client::open(url).map_err(|e| StreamError::Protocol(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    /// Open a connection manager on the same client.
    pub async fn connection(&self) -> StreamResult<ConnectionManager> {
        let connecting = ConnectionManager::new(self.client.clone());
        match tokio::time::timeout(self.connect_timeout, connecting).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(StreamError::Transport(format!(
                "connect timed out after {}ms",
                self.connect_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl StreamLogConnector for RedisStreamLogConnector {
    async fn connect(&self) -> StreamResult<Arc<dyn StreamLog>> {
        let conn = self.connection().await?;
        Ok(Arc::new(RedisStreamLog::new(conn)))
    }
}
