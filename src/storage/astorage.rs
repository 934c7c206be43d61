use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Display;
use uuid::Uuid;

#[derive(Debug, Display)]
pub enum StorageError {
    #[display(fmt = "database error: {}", _0)]
    Database(String),
    #[display(fmt = "timed out while acquiring a database handle")]
    Timeout,
}

impl std::error::Error for StorageError {}

/// Persisted projection of an alert event, append only.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: String,
    pub score: f64,
    /// Feature snapshot serialized as a JSON object
    pub features: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertStore: Send + Sync + 'static {
    async fn create_alert(&self, alert: &Alert) -> Result<(), StorageError>;
}
