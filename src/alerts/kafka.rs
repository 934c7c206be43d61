use super::consumer::AlertSource;
use super::context::AlertsContext;
use super::errors::ConsumerError;
use super::messages::AlertMessage;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use log::info;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Comma separated list of brokers
    pub brokers: String,
    pub topic: String,

    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_group_id() -> String {
    "plankton-core".to_owned()
}

pub fn get_consumer(settings: &ConsumerSettings) -> Result<StreamConsumer<AlertsContext>, ConsumerError> {
    let consumer: StreamConsumer<AlertsContext> = ClientConfig::new()
        .set("bootstrap.servers", &settings.brokers)
        .set("group.id", &settings.group_id)
        .set("enable.partition.eof", "false")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set_log_level(RDKafkaLogLevel::Info)
        .create_with_context(AlertsContext)?;

    Ok(consumer)
}

/// Alert topic subscription committing offsets by hand.
pub struct KafkaAlertSource {
    consumer: StreamConsumer<AlertsContext>,
    topic: String,
    closed: AtomicBool,
}

impl KafkaAlertSource {
    pub fn new(settings: &ConsumerSettings) -> Result<KafkaAlertSource, ConsumerError> {
        let consumer = get_consumer(settings)?;
        consumer.subscribe(&[settings.topic.as_str()])?;

        info!(
            "Subscribed to topic {} as {} [brokers: {}]",
            settings.topic, settings.group_id, settings.brokers
        );

        Ok(KafkaAlertSource {
            consumer,
            topic: settings.topic.clone(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), ConsumerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConsumerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSource for KafkaAlertSource {
    async fn fetch(&self) -> Result<AlertMessage, ConsumerError> {
        self.ensure_open()?;
        let msg = self.consumer.recv().await?;

        Ok(AlertMessage {
            topic: msg.topic().to_owned(),
            partition: msg.partition(),
            offset: msg.offset(),
            payload: msg.payload().map(|p| p.to_vec()),
        })
    }

    fn commit(&self, message: &AlertMessage) -> Result<(), ConsumerError> {
        self.ensure_open()?;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &message.topic,
            message.partition,
            Offset::Offset(message.offset + 1),
        )?;

        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Unsubscribing from topic {}", self.topic);
        self.consumer.unsubscribe();
    }
}
