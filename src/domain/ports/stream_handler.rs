//! Stream message handler port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{HandlerOutcome, StreamMessage};

/// Translates one event into a domain effect.
///
/// Handlers must be idempotent: a reclaimed message may be handled again
/// after its effect was already applied. An `Err` is treated like
/// `HandlerOutcome::Failed`.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, message: &StreamMessage) -> DomainResult<HandlerOutcome>;
}
