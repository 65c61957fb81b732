//! Redis adapters: Streams for the event log, lists for the log buffer.

pub mod log_buffer;
pub mod stream_log;

pub use log_buffer::RedisLogBuffer;
pub use stream_log::{RedisStreamLog, RedisStreamLogConnector};
