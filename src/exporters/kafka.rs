use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use rdkafka::config::ClientConfig;
use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::{ClientContext, Message};
use serde::Deserialize;
use uuid::Uuid;

use super::errors::ExporterError;
use super::exporter::Export;
use crate::flow::FlowMetadata;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KafkaSettings {
    /// Comma separated list of brokers
    pub brokers: String,
    pub topic: String,

    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_message_timeout_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    100
}

/// Serializes a record and derives its partition key.
pub fn encode(flow: &FlowMetadata) -> Result<(String, Vec<u8>), ExporterError> {
    let payload = serde_json::to_vec(flow)?;
    Ok((flow.partition_key(), payload))
}

/// Collects delivery reports from the producer's polling thread.
#[derive(Debug, Default)]
pub struct DeliveryContext {
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub failed: u64,
}

impl DeliveryContext {
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match delivery_result {
            Ok(msg) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Event saved at partition: {}\toffset: {}",
                    msg.partition(),
                    msg.offset()
                );
            }
            Err((e, msg)) => {
                let failed = self.failed.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    "Unable to deliver message to {} ({} failed so far): {}",
                    msg.topic(),
                    failed,
                    e
                );
            }
        }
    }
}

pub struct KafkaExporter {
    settings: KafkaSettings,
    identifier: String,
    producer: ThreadedProducer<DeliveryContext>,
    closed: AtomicBool,
}

impl fmt::Debug for KafkaExporter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.settings)
    }
}

impl KafkaExporter {
    pub fn new(settings: KafkaSettings, identifier: &str) -> Result<KafkaExporter, ExporterError> {
        let producer: ThreadedProducer<DeliveryContext> = ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", settings.message_timeout_ms.to_string())
            .set("linger.ms", "10")
            .create_with_context(DeliveryContext::default())?;

        info!(
            "created kafka producer for topic {} [brokers: {}]",
            settings.topic, settings.brokers
        );

        Ok(KafkaExporter {
            settings,
            identifier: identifier.to_owned(),
            producer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.producer.context().stats()
    }

    fn context(&self) -> &Arc<DeliveryContext> {
        self.producer.context()
    }

    fn ensure_open(&self) -> Result<(), ExporterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExporterError::Closed);
        }
        Ok(())
    }

    fn headers(&self) -> OwnedHeaders {
        OwnedHeaders::new()
            .add::<str>("host-identifier-x", &self.identifier)
            .add::<str>("message-id-x", &Uuid::new_v4().to_string())
            .add::<str>("timestamp-x", &Utc::now().timestamp_millis().to_string())
    }

    /// Queues one encoded record, the delivery report arrives on the context.
    fn enqueue(&self, key: &str, payload: &[u8]) -> Result<(), ExporterError> {
        let record = BaseRecord::to(&self.settings.topic)
            .payload(payload)
            .key(key)
            .headers(self.headers());

        self.producer.send(record).map_err(|(e, _)| {
            error!("Unable to queue message with key {}: {}", key, e);
            ExporterError::from(e)
        })
    }
}

#[async_trait]
impl Export for KafkaExporter {
    async fn send(&self, flow: FlowMetadata) -> Result<(), ExporterError> {
        self.ensure_open()?;
        let (key, payload) = encode(&flow)?;
        self.enqueue(&key, &payload)
    }

    async fn send_batch(&self, flows: Vec<FlowMetadata>) -> Result<usize, ExporterError> {
        self.ensure_open()?;

        let total = flows.len();
        let mut queued = 0;
        for flow in flows.iter() {
            let (key, payload) = match encode(flow) {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping record in batch: {}", e);
                    continue;
                }
            };

            if self.enqueue(&key, &payload).is_ok() {
                queued += 1;
            }
        }

        if queued == 0 && total > 0 {
            return Err(ExporterError::BatchIncomplete {
                failed: total,
                total,
            });
        }
        if queued < total {
            warn!(
                "{} of {} records not queued, {} deliveries failed so far",
                total - queued,
                total,
                self.context().stats().failed
            );
        }
        Ok(queued)
    }

    fn close(&self) -> Result<(), ExporterError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("flushing kafka producer for topic {}", self.settings.topic);
        self.producer.flush(FLUSH_TIMEOUT);

        let stats = self.delivery_stats();
        info!(
            "kafka producer closed [delivered: {}, failed: {}]",
            stats.delivered, stats.failed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::tests::flow;
    use pretty_assertions::assert_eq;

    fn settings() -> KafkaSettings {
        KafkaSettings {
            brokers: "localhost:9092".to_owned(),
            topic: "flows".to_owned(),
            message_timeout_ms: default_message_timeout_ms(),
            batch_size: default_batch_size(),
        }
    }

    #[test]
    fn test_records_are_keyed_by_five_tuple() {
        let first = flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9);
        let second = flow("10.0.0.1", 443, "10.0.0.2", 51000, 3.1);

        let (first_key, first_payload) = encode(&first).expect("flow should encode");
        let (second_key, _) = encode(&second).expect("flow should encode");

        assert_eq!(first_key, "10.0.0.1:443-10.0.0.2:51000-TCP");
        assert_eq!(first_key, second_key);

        let decoded: FlowMetadata =
            serde_json::from_slice(&first_payload).expect("payload should be json");
        assert_eq!(decoded, first);
        assert_eq!(decoded.entropy, 7.9);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let exporter = KafkaExporter::new(settings(), "test-host").expect("producer should build");

        exporter.close().expect("close should succeed");
        exporter.close().expect("second close is a no-op");

        let single = exporter
            .send(flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9))
            .await;
        let batch = exporter
            .send_batch(vec![flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9)])
            .await;

        assert!(matches!(single, Err(ExporterError::Closed)));
        assert!(matches!(batch, Err(ExporterError::Closed)));
    }

    #[tokio::test]
    async fn test_batch_is_queued_without_waiting_for_delivery() {
        let exporter = KafkaExporter::new(
            KafkaSettings {
                brokers: "127.0.0.1:1".to_owned(),
                message_timeout_ms: 200,
                ..settings()
            },
            "test-host",
        )
        .expect("producer should build");

        let batch = vec![
            flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.9),
            flow("10.0.0.1", 443, "10.0.0.2", 51000, 7.2),
            flow("10.0.0.3", 53, "10.0.0.4", 40000, 2.5),
        ];

        let queued = tokio::time::timeout(Duration::from_secs(1), exporter.send_batch(batch))
            .await
            .expect("queueing must not wait for broker acks")
            .expect("records should be queued");

        assert_eq!(queued, 3);
        assert_eq!(exporter.delivery_stats().delivered, 0);

        exporter.close().expect("close should succeed");
        assert_eq!(exporter.delivery_stats().failed, 3);
    }

    #[test]
    fn test_settings_defaults() {
        let parsed: KafkaSettings = serde_yaml::from_str(
            "
            brokers: localhost:9092,localhost:9093
            topic: flows
            ",
        )
        .expect("settings should parse");

        assert_eq!(parsed, KafkaSettings {
            brokers: "localhost:9092,localhost:9093".to_owned(),
            ..settings()
        });
    }
}
