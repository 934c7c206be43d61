use crate::alerts::ConsumerSettings;
use crate::capture::CaptureSettings;
use crate::exporters::KafkaSettings;
use crate::hub::{HubSettings, ServerSettings};
use crate::storage::ClickhouseSettings;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Configuration {
    pub capture: CaptureSettings,

    pub exporter: KafkaSettings,

    pub consumer: ConsumerSettings,

    pub storage: ClickhouseSettings,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub server: ServerSettings,

    /// Interval of the periodic statistics line
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_stats_interval_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_yaml;
    use test_case::test_case;

    fn storage_yaml() -> &'static str {
        "
        storage:
          host: clickhouse
          port: 9000
          user: default
          password: secret
        "
    }

    fn storage() -> ClickhouseSettings {
        ClickhouseSettings {
            host: "clickhouse".to_owned(),
            port: 9000,
            user: "default".to_owned(),
            password: "secret".to_owned(),
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg: Configuration = serde_yaml::from_str(&format!(
            "
        capture:
          interface: eth0
        exporter:
          brokers: localhost:9092
          topic: flows
        consumer:
          brokers: localhost:9092
          topic: alerts
        {}
        ",
            storage_yaml()
        ))
        .expect("unable to deserialize config");

        assert_eq!(
            cfg,
            Configuration {
                capture: CaptureSettings::new("eth0"),
                exporter: KafkaSettings {
                    brokers: "localhost:9092".to_owned(),
                    topic: "flows".to_owned(),
                    message_timeout_ms: 5000,
                    batch_size: 100,
                },
                consumer: ConsumerSettings {
                    brokers: "localhost:9092".to_owned(),
                    topic: "alerts".to_owned(),
                    group_id: "plankton-core".to_owned(),
                },
                storage: storage(),
                hub: HubSettings::default(),
                server: ServerSettings::default(),
                stats_interval_secs: 30,
            }
        );
    }

    #[test_case(256, 64, 1600 ; "defaults spelled out")]
    #[test_case(16, 4, 96 ; "small queues and short snapshots")]
    fn test_tunables_deserialization(broadcast_capacity: usize, observer_capacity: usize, snapshot_len: i32) {
        let cfg: Configuration = serde_yaml::from_str(&format!(
            "
        capture:
          interface: any
          snapshot_len: {snapshot_len}
          promiscuous: false
        exporter:
          brokers: kafka:9092
          topic: flows
          batch_size: 10
        consumer:
          brokers: kafka:9092
          topic: alerts
          group_id: other
        hub:
          broadcast_capacity: {broadcast_capacity}
          observer_capacity: {observer_capacity}
        server:
          host: 127.0.0.1
          port: 8081
        stats_interval_secs: 5
        {}
        ",
            storage_yaml()
        ))
        .expect("unable to deserialize config");

        assert_eq!(cfg.capture.snapshot_len, snapshot_len);
        assert!(!cfg.capture.promiscuous);
        assert_eq!(cfg.exporter.batch_size, 10);
        assert_eq!(cfg.consumer.group_id, "other");
        assert_eq!(
            cfg.hub,
            HubSettings {
                broadcast_capacity,
                observer_capacity,
            }
        );
        assert_eq!(
            cfg.server,
            ServerSettings {
                host: "127.0.0.1".to_owned(),
                port: 8081,
            }
        );
        assert_eq!(cfg.stats_interval_secs, 5);
    }

    #[test]
    fn test_missing_section_is_rejected() {
        let cfg = serde_yaml::from_str::<Configuration>(
            "
        capture:
          interface: eth0
        ",
        );

        assert!(cfg.is_err());
    }
}
