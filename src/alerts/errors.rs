use crate::storage::StorageError;

use derive_more::Display;
use rdkafka::error::KafkaError;

#[derive(Debug, Display)]
pub enum ConsumerError {
    #[display(fmt = "kafka error: {}", _0)]
    KafkaErr(KafkaError),

    #[display(fmt = "unable to decode alert: {}", _0)]
    Decode(serde_json::Error),

    #[display(fmt = "invalid alert: {}", _0)]
    Invalid(String),

    #[display(fmt = "message without payload")]
    EmptyPayload,

    #[display(fmt = "unable to persist alert: {}", _0)]
    Storage(StorageError),

    #[display(fmt = "consumer was already started")]
    AlreadyStarted,

    #[display(fmt = "alert source is closed")]
    Closed,
}

impl std::error::Error for ConsumerError {}

impl From<KafkaError> for ConsumerError {
    fn from(e: KafkaError) -> Self {
        Self::KafkaErr(e)
    }
}

impl From<serde_json::Error> for ConsumerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e)
    }
}

impl From<StorageError> for ConsumerError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
