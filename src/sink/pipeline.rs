//! Publish pipeline: decoded rows → bus records → broker
//!
//! `Publisher::deliver` runs inside the session's blocking receive loop
//! and resolves each publish on the async runtime before returning, so a
//! returned `Ok` means the broker has the record. The session uses that to
//! gate ack advancement: a commit's end position is confirmed only after
//! every one of its rows came back `Ok`.

use crate::core::errors::ConnectorResult;
use crate::replication::decoder::OutboxRecord;
use crate::sink::{BusRecord, RecordSink};
use crate::utils::binary::format_lsn;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tracing::warn;

pub struct Publisher {
    sink: Arc<dyn RecordSink>,
    handle: Handle,
    published: Arc<AtomicU64>,
}

impl Publisher {
    pub fn new(sink: Arc<dyn RecordSink>, handle: Handle) -> Self {
        Self {
            sink,
            handle,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of records the broker has accepted, read by the
    /// stats reporter.
    pub fn published_counter(&self) -> Arc<AtomicU64> {
        self.published.clone()
    }

    /// Publish one decoded row.
    ///
    /// Invalid rows are consumed with a warning; the session may still
    /// confirm their commit. A broker error is returned as-is and stops
    /// the session before the commit is confirmed.
    pub fn deliver(&self, record: &OutboxRecord) -> ConnectorResult<()> {
        if !record.is_publishable() {
            warn!(
                stream_name = %record.stream_name,
                stream_id = %record.stream_id,
                commit_lsn = %format_lsn(record.commit_lsn),
                "invalid gulfstream.outbox row dropped"
            );
            return Ok(());
        }

        let bus_record = BusRecord {
            topic: record.stream_name.clone(),
            key: format!("{}{}", record.stream_name, record.stream_id),
            value: record.raw_data.clone(),
        };

        self.handle.block_on(self.sink.publish(&bus_record))?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ConnectorError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every publish; fails from `fail_from` (0-based) onward.
    struct RecordingSink {
        records: Mutex<Vec<BusRecord>>,
        fail_from: Option<usize>,
        attempts: AtomicU64,
    }

    impl RecordingSink {
        fn new(fail_from: Option<usize>) -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                fail_from,
                attempts: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn publish(&self, record: &BusRecord) -> ConnectorResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_from.is_some_and(|n| attempt >= n as u64) {
                return Err(ConnectorError::publish("broker unavailable"));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn record(stream_name: &str, stream_id: &str, data: &[u8]) -> OutboxRecord {
        OutboxRecord {
            stream_name: stream_name.into(),
            stream_id: stream_id.into(),
            version: 7,
            raw_data: data.to_vec(),
            commit_lsn: 0x120,
            ..Default::default()
        }
    }

    fn publisher_with(sink: Arc<RecordingSink>, rt: &tokio::runtime::Runtime) -> Publisher {
        Publisher::new(sink, rt.handle().clone())
    }

    #[test]
    fn test_deliver_builds_topic_key_value() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sink = Arc::new(RecordingSink::new(None));
        let publisher = publisher_with(sink.clone(), &rt);

        publisher.deliver(&record("orders", "o-1", b"\xde\xad")).unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "orders");
        assert_eq!(records[0].key, "orderso-1");
        assert_eq!(records[0].value, b"\xde\xad");
        assert_eq!(publisher.published_counter().load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_deliver_keeps_order() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sink = Arc::new(RecordingSink::new(None));
        let publisher = publisher_with(sink.clone(), &rt);

        publisher.deliver(&record("orders", "a", b"A")).unwrap();
        publisher.deliver(&record("orders", "b", b"B")).unwrap();

        let keys: Vec<_> = sink
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.key.clone())
            .collect();
        assert_eq!(keys, ["ordersa", "ordersb"]);
    }

    #[test]
    fn test_invalid_rows_are_consumed_not_published() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sink = Arc::new(RecordingSink::new(None));
        let publisher = publisher_with(sink.clone(), &rt);

        // both identifiers empty
        publisher.deliver(&record("", "", b"\xde\xad")).unwrap();
        // payload empty
        publisher.deliver(&record("orders", "o-1", b"")).unwrap();

        assert!(sink.records.lock().unwrap().is_empty());
        assert_eq!(publisher.published_counter().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_broker_error_propagates_and_counter_stays() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let sink = Arc::new(RecordingSink::new(Some(1)));
        let publisher = publisher_with(sink.clone(), &rt);

        publisher.deliver(&record("orders", "a", b"A")).unwrap();
        let err = publisher.deliver(&record("orders", "b", b"B")).unwrap_err();

        assert!(err.to_string().contains("broker unavailable"));
        assert_eq!(sink.records.lock().unwrap().len(), 1);
        assert_eq!(publisher.published_counter().load(Ordering::Relaxed), 1);
    }
}
