use derive_more::Display;
use rdkafka::error::KafkaError;

#[derive(Debug, Display)]
pub enum ExporterError {
    #[display(fmt = "kafka error: {}", _0)]
    KafkaErr(KafkaError),
    #[display(fmt = "unable to serialize flow metadata: {}", _0)]
    Serialization(serde_json::Error),
    #[display(fmt = "{} of {} records in the batch were not queued", failed, total)]
    BatchIncomplete { failed: usize, total: usize },
    #[display(fmt = "exporter is closed")]
    Closed,
}

impl std::error::Error for ExporterError {}

impl From<KafkaError> for ExporterError {
    fn from(error: KafkaError) -> ExporterError {
        ExporterError::KafkaErr(error)
    }
}

impl From<serde_json::Error> for ExporterError {
    fn from(error: serde_json::Error) -> ExporterError {
        ExporterError::Serialization(error)
    }
}
