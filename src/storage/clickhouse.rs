use super::astorage::{Alert, AlertStore, StorageError};

use async_trait::async_trait;
use clickhouse_rs::{row, types::Block, Pool};
use log::{debug, error, info};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const HANDLE_TIMEOUT: Duration = Duration::from_secs(3);

const ALERTS_TABLE: &str = "alerts";

const CREATE_ALERTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS alerts (
    id          String,
    timestamp   DateTime('UTC'),
    src_ip      String,
    dst_ip      String,
    src_port    UInt16,
    dst_port    UInt16,
    protocol    String,
    score       Float64,
    features    String,
    created_at  DateTime('UTC')
) ENGINE = MergeTree()
ORDER BY (timestamp, id)";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClickhouseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Display for ClickhouseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "tcp://{}:{}@{}:{}/default?compression=lz4&send_retries=0",
            self.user, self.password, self.host, self.port
        )
    }
}

pub struct ClickhouseState {
    pub settings: ClickhouseSettings,
    pub pool: Arc<Pool>,
}

impl From<ClickhouseSettings> for ClickhouseState {
    fn from(settings: ClickhouseSettings) -> ClickhouseState {
        ClickhouseState::new(settings)
    }
}

impl ClickhouseState {
    pub fn new(settings: ClickhouseSettings) -> Self {
        let pool = Arc::new(Pool::new(settings.to_string()));

        Self { settings, pool }
    }

    async fn handle(&self) -> Result<clickhouse_rs::ClientHandle, StorageError> {
        match tokio::time::timeout(HANDLE_TIMEOUT, self.pool.get_handle()).await {
            Ok(res) => res.map_err(|e| StorageError::Database(e.to_string())),
            Err(_) => Err(StorageError::Timeout),
        }
    }

    /// Creates the alerts table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut client = self.handle().await?;
        client
            .execute(CREATE_ALERTS_TABLE)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;

        info!(
            "table {} is ready on {}:{}",
            ALERTS_TABLE, self.settings.host, self.settings.port
        );
        Ok(())
    }
}

#[async_trait]
impl AlertStore for ClickhouseState {
    async fn create_alert(&self, alert: &Alert) -> Result<(), StorageError> {
        let mut client = self.handle().await?;

        let id = alert.id.to_string();
        let mut block = Block::with_capacity(1);
        block
            .push(row! {
                id:         id.as_str(),
                timestamp:  alert.timestamp,
                src_ip:     alert.src_ip.as_str(),
                dst_ip:     alert.dst_ip.as_str(),
                src_port:   alert.src_port,
                dst_port:   alert.dst_port,
                protocol:   alert.protocol.as_str(),
                score:      alert.score,
                features:   alert.features.as_str(),
                created_at: alert.created_at
            })
            .map_err(|e| StorageError::Database(e.to_string()))?;

        match client.insert(ALERTS_TABLE, block).await {
            Ok(()) => {
                debug!("alert {} saved", id);
                Ok(())
            }
            Err(e) => {
                error!("unable to insert alert to clickhouse: {}", e);
                Err(StorageError::Database(e.to_string()))
            }
        }
    }
}
