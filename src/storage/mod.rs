pub mod astorage;
pub mod clickhouse;

pub use astorage::{Alert, AlertStore, StorageError};
pub use self::clickhouse::{ClickhouseSettings, ClickhouseState};
