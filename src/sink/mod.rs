//! Downstream bus adapters
//!
//! The session hands decoded outbox rows to the publish pipeline, which
//! turns them into `BusRecord`s and pushes them through a `RecordSink`.
//! Kafka is the sink shipped here; the trait is the seam a NATS or other
//! bus binding would implement.

pub mod kafka;
pub mod pipeline;

use crate::core::errors::ConnectorResult;
use async_trait::async_trait;

pub use kafka::KafkaSink;
pub use pipeline::Publisher;

/// A record bound for the downstream bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
}

/// The narrow publish contract the pipeline needs from a broker.
///
/// `publish` resolves only once the broker has durably accepted the
/// record; retries and backoff are the broker client's business.
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, record: &BusRecord) -> ConnectorResult<()>;
}
