//! Kafka sink
//!
//! Wraps an rdkafka `FutureProducer`; each publish awaits the broker's
//! delivery report, so a resolved publish means the record is accepted
//! under the configured ack level.

use crate::core::config::KafkaConfig;
use crate::core::errors::{ConnectorError, ConnectorResult};
use crate::sink::{BusRecord, RecordSink};
use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::debug;

pub struct KafkaSink {
    producer: FutureProducer,
}

impl KafkaSink {
    pub fn new(config: &KafkaConfig) -> ConnectorResult<Self> {
        let producer = Self::client_config(config)
            .create()
            .map_err(|e| ConnectorError::setup(format!("kafka producer: {e}")))?;
        Ok(Self { producer })
    }

    /// Map the connector's kafka section onto librdkafka properties.
    /// Zero / unset values fall back to librdkafka defaults, matching the
    /// original option-by-option behaviour.
    fn client_config(config: &KafkaConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", config.brokers.join(","));
        client_config.set("client.id", config.client_id());
        client_config.set(
            "acks",
            if config.required_acks == "local" {
                "1"
            } else {
                "all"
            },
        );
        if config.retry_max > 0 {
            client_config.set("message.send.max.retries", config.retry_max.to_string());
        }
        if let Some(backoff) = config.retry_backoff {
            client_config.set("retry.backoff.ms", backoff.as_millis().to_string());
        }
        if config.max_message_bytes > 0 {
            client_config.set("message.max.bytes", config.max_message_bytes.to_string());
        }
        if let Some(timeout) = config.timeout {
            client_config.set("message.timeout.ms", timeout.as_millis().to_string());
        }
        client_config
    }
}

#[async_trait]
impl RecordSink for KafkaSink {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn publish(&self, record: &BusRecord) -> ConnectorResult<()> {
        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.value);

        match self.producer.send(future_record, Timeout::Never).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %record.topic,
                    partition,
                    offset,
                    "record delivered"
                );
                Ok(())
            }
            Err((err, _)) => Err(ConnectorError::publish(format!(
                "kafka delivery failed for topic {}: {err}",
                record.topic
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn full_config() -> KafkaConfig {
        KafkaConfig {
            brokers: vec!["127.0.0.1:9092".into(), "127.0.0.2:9092".into()],
            client_id: "bridge".into(),
            retry_max: 5,
            retry_backoff: Some(Duration::from_millis(250)),
            required_acks: "local".into(),
            max_message_bytes: 1_000_000,
            timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn test_client_config_maps_every_option() {
        let cc = KafkaSink::client_config(&full_config());
        assert_eq!(
            cc.get("bootstrap.servers"),
            Some("127.0.0.1:9092,127.0.0.2:9092")
        );
        assert_eq!(cc.get("client.id"), Some("bridge"));
        assert_eq!(cc.get("acks"), Some("1"));
        assert_eq!(cc.get("message.send.max.retries"), Some("5"));
        assert_eq!(cc.get("retry.backoff.ms"), Some("250"));
        assert_eq!(cc.get("message.max.bytes"), Some("1000000"));
        assert_eq!(cc.get("message.timeout.ms"), Some("5000"));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = KafkaConfig {
            brokers: vec!["127.0.0.1:9092".into()],
            ..Default::default()
        };
        let cc = KafkaSink::client_config(&config);
        assert_eq!(cc.get("client.id"), Some("postgres2kafka"));
        // anything but "local" waits for all in-sync replicas
        assert_eq!(cc.get("acks"), Some("all"));
        assert_eq!(cc.get("message.send.max.retries"), None);
        assert_eq!(cc.get("retry.backoff.ms"), None);
        assert_eq!(cc.get("message.max.bytes"), None);
        assert_eq!(cc.get("message.timeout.ms"), None);
    }
}
