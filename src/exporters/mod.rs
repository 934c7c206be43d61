pub mod kafka;
mod errors;
mod exporter;
pub use errors::ExporterError;
pub use exporter::{run, Export};
pub use kafka::{KafkaExporter, KafkaSettings};
