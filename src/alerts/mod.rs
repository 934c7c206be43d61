pub mod consumer;
pub mod kafka;
pub mod messages;

mod context;
mod errors;

pub use consumer::{AlertConsumer, AlertSource, ConsumerState};
pub use errors::ConsumerError;
pub use kafka::{ConsumerSettings, KafkaAlertSource};
pub use messages::{AlertEvent, AlertMessage};
