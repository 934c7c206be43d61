use crate::consts::{ENV_VAR_PREFIX, ENV_VAR_SEPARATOR};

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, Map};
use derive_more::Display;
use serde::Deserialize;

#[derive(Debug, Display)]
pub enum ConfigErr {
    #[display(fmt = "unable to read configuration: {}", _0)]
    Read(config::ConfigError),
}

impl std::error::Error for ConfigErr {}

pub struct ConfigCache {
    config: Config,
    config_path: String,
}

impl ConfigCache {
    pub fn new(global_config_path: &str) -> Result<Self, ConfigErr> {
        Self::with_env(global_config_path, None)
    }

    /// Same as [`ConfigCache::new`] but reads variables from `env` instead
    /// of the process environment when given.
    pub fn with_env(
        global_config_path: &str,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigErr> {
        Ok(Self {
            config: Self::load_config(global_config_path, env)?,
            config_path: global_config_path.to_owned(),
        })
    }

    fn load_config(
        global_config_path: &str,
        env: Option<Map<String, String>>,
    ) -> Result<Config, ConfigErr> {
        let base_config_builder = ConfigBuilder::<DefaultState>::default();
        base_config_builder
            .add_source(File::with_name(global_config_path).required(false))
            .add_source(
                Environment::with_prefix(ENV_VAR_PREFIX)
                    .separator(ENV_VAR_SEPARATOR)
                    .source(env),
            )
            .build()
            .map_err(ConfigErr::Read)
    }

    pub fn path(&self) -> &str {
        &self.config_path
    }

    pub fn get_config<'d, T: Deserialize<'d>>(&self) -> Result<T, ConfigErr> {
        self.config
            .clone()
            .try_deserialize()
            .map_err(ConfigErr::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Configuration;
    use pretty_assertions::assert_eq;
    use std::fs;

    const YAML: &str = "
capture:
  interface: eth0
exporter:
  brokers: localhost:9092
  topic: flows
consumer:
  brokers: localhost:9092
  topic: alerts
storage:
  host: localhost
  port: 9000
  user: default
  password: ''
";

    fn env(vars: &[(&str, &str)]) -> Option<Map<String, String>> {
        Some(
            vars.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = std::env::temp_dir().join(format!("plankton-{}.yaml", uuid::Uuid::new_v4()));
        fs::write(&path, YAML).expect("temp file should be writable");
        let path = path.to_string_lossy().to_string();

        let cache = ConfigCache::with_env(
            &path,
            env(&[
                ("PLANKTON__EXPORTER__TOPIC", "packets"),
                ("PLANKTON__CAPTURE__INTERFACE", "wlan0"),
            ]),
        )
        .expect("config should load");
        let config: Configuration = cache.get_config().expect("config should deserialize");
        let _ = fs::remove_file(&path);

        assert_eq!(cache.path(), path);
        assert_eq!(config.exporter.topic, "packets");
        assert_eq!(config.capture.interface, "wlan0");
        assert_eq!(config.consumer.topic, "alerts");
    }

    #[test]
    fn test_missing_file_and_sections_fail_to_deserialize() {
        let cache = ConfigCache::with_env("./does-not-exist.yaml", env(&[]))
            .expect("missing file is not an error");

        assert!(cache.get_config::<Configuration>().is_err());
    }
}
