use actix_web::{middleware, web, App, HttpServer};
use derive_more::Display;
use log::{error, info};
use std::fmt;
use tokio::sync::watch;
use tokio::task;
use tokio::time::{self, Duration};

use crate::alerts::{AlertConsumer, ConsumerError, KafkaAlertSource};
use crate::capture::{CaptureError, Capturer};
use crate::config::{ConfigCache, ConfigErr};
use crate::exporters::{self, ExporterError, KafkaExporter};
use crate::hub::{self, Hub};
use crate::settings::Configuration;
use crate::storage::{ClickhouseState, StorageError};

pub struct ApplicationState {
    pub config: ConfigCache,
}

#[derive(Debug, Display)]
pub enum AppInitErr {
    #[display(fmt = "{}", _0)]
    Config(ConfigErr),
    #[display(fmt = "capture: {}", _0)]
    Capture(CaptureError),
    #[display(fmt = "exporter: {}", _0)]
    Exporter(ExporterError),
    #[display(fmt = "consumer: {}", _0)]
    Consumer(ConsumerError),
    #[display(fmt = "storage: {}", _0)]
    Storage(StorageError),
    #[display(fmt = "http server: {}", _0)]
    Server(std::io::Error),
}

impl std::error::Error for AppInitErr {}

#[derive(Debug)]
pub struct HostIdentifier {
    hostname: String,
    os_release: String,
}

impl Default for HostIdentifier {
    fn default() -> Self {
        let os_release = match sys_info::os_release() {
            Ok(r) => r,
            Err(e) => {
                error!("unable to acquire os release ({}), setting it to unknown", e);
                String::from("unknown")
            }
        };

        let hostname = match sys_info::hostname() {
            Ok(h) => h,
            Err(e) => {
                error!("unable to acquire hostname ({}), setting it to unknown", e);
                String::from("unknown")
            }
        };

        HostIdentifier {
            hostname,
            os_release,
        }
    }
}

impl fmt::Display for HostIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.hostname, self.os_release)
    }
}

impl ApplicationState {
    pub fn new(config_cache: ConfigCache) -> Self {
        Self {
            config: config_cache,
        }
    }

    pub fn config(&self) -> Result<Configuration, ConfigErr> {
        self.config.get_config::<Configuration>()
    }

    /// Wires capture, export, alert relay and the observer server together
    /// and runs them until the server stops.
    pub async fn init_components(config: Configuration) -> Result<(), AppInitErr> {
        let identifier = HostIdentifier::default();
        let (shutdown_tx, shutdown) = watch::channel(false);

        let store = ClickhouseState::new(config.storage.clone());
        store.ensure_schema().await.map_err(AppInitErr::Storage)?;

        let (hub, hub_handle) = Hub::new(&config.hub);
        let hub_task = task::spawn(hub.run(shutdown.clone()));

        let exporter = KafkaExporter::new(config.exporter.clone(), &identifier.to_string())
            .map_err(AppInitErr::Exporter)?;
        let source = KafkaAlertSource::new(&config.consumer).map_err(AppInitErr::Consumer)?;

        let mut capturer = Capturer::new(config.capture.clone());
        let mut packets = capturer
            .packets()
            .ok_or(AppInitErr::Capture(CaptureError::AlreadyStarted))?;
        capturer
            .start(shutdown.clone())
            .map_err(AppInitErr::Capture)?;

        let batch_size = config.exporter.batch_size;
        let exporter_task = task::spawn({
            let shutdown = shutdown.clone();
            async move { exporters::run(exporter, &mut packets, batch_size, shutdown).await }
        });

        let mut consumer = AlertConsumer::new(source, store, hub_handle.clone());
        let consumer_task = task::spawn({
            let shutdown = shutdown.clone();
            async move { consumer.run(shutdown).await }
        });

        let server = {
            let hub_handle = hub_handle.clone();
            HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(hub_handle.clone()))
                    .wrap(middleware::Logger::default())
                    .configure(hub::routes)
            })
        }
        .bind((config.server.host.as_str(), config.server.port))
        .map_err(AppInitErr::Server)?
        .run();
        info!(
            "serving observers on {}:{}",
            config.server.host, config.server.port
        );

        let mut stats = time::interval(Duration::from_secs(config.stats_interval_secs.max(1)));
        tokio::pin!(server);
        let served = loop {
            tokio::select! {
                res = &mut server => break res,
                _ = stats.tick() => {
                    let capture = capturer.stats();
                    info!(
                        "capture [decoded: {}, discarded: {}, dropped: {}] observers: {}",
                        capture.decoded,
                        capture.discarded,
                        capture.dropped,
                        hub_handle.observer_count()
                    );
                }
            }
        };

        info!("Shutting down...");
        let _ = shutdown_tx.send(true);
        capturer.stop();

        if let Err(e) = task::spawn_blocking(move || capturer.join()).await {
            error!("unable to join capture thread: {}", e);
        }
        if let Err(e) = exporter_task.await {
            error!("exporter task failed: {}", e);
        }
        match consumer_task.await {
            Ok(Err(e)) => error!("alert consumer failed: {}", e),
            Err(e) => error!("alert consumer task failed: {}", e),
            Ok(Ok(())) => {}
        }
        if let Err(e) = hub_task.await {
            error!("hub task failed: {}", e);
        }

        served.map_err(AppInitErr::Server)
    }
}

pub fn init_config(path: &str) -> Result<(ConfigCache, Configuration), AppInitErr> {
    let config_cache = ConfigCache::new(path).map_err(AppInitErr::Config)?;
    let configuration = config_cache
        .get_config::<Configuration>()
        .map_err(AppInitErr::Config)?;

    Ok((config_cache, configuration))
}
