use super::errors::ConsumerError;
use super::messages::{notification, AlertEvent, AlertMessage};
use crate::hub::Broadcast;
use crate::storage::AlertStore;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::watch;

/// Ordered log of alerts with explicit acknowledgements.
#[async_trait]
pub trait AlertSource: Send + Sync {
    /// Waits for the next message.
    async fn fetch(&self) -> Result<AlertMessage, ConsumerError>;

    /// Marks the message and everything before it in its partition as processed.
    fn commit(&self, message: &AlertMessage) -> Result<(), ConsumerError>;

    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    Stopping,
    Closed,
}

pub struct AlertConsumer<S, St, B> {
    source: S,
    store: St,
    broadcaster: B,
    state: ConsumerState,
}

impl<S, St, B> AlertConsumer<S, St, B>
where
    S: AlertSource,
    St: AlertStore,
    B: Broadcast,
{
    pub fn new(source: S, store: St, broadcaster: B) -> Self {
        Self {
            source,
            store,
            broadcaster,
            state: ConsumerState::Idle,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Consumes alerts until shutdown is signalled. Every fetched message is
    /// committed, including those that fail to decode or persist.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsumerError> {
        if self.state != ConsumerState::Idle {
            return Err(ConsumerError::AlreadyStarted);
        }
        self.state = ConsumerState::Running;
        info!("Spawned alert consumer...");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                m = self.source.fetch() => m,
            };

            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    error!("unable to fetch alert: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.process(&message).await {
                warn!(
                    "alert at {}[{}]@{} was not relayed: {}",
                    message.topic, message.partition, message.offset, e
                );
            }

            if let Err(e) = self.source.commit(&message) {
                warn!(
                    "unable to commit {}[{}]@{}: {}",
                    message.topic, message.partition, message.offset, e
                );
            }
        }

        self.state = ConsumerState::Stopping;
        self.source.close();
        self.state = ConsumerState::Closed;
        info!("Closing alert consumer...");

        Ok(())
    }

    async fn process(&self, message: &AlertMessage) -> Result<(), ConsumerError> {
        let alert = AlertEvent::decode(message.payload.as_deref())?.into_alert();

        self.store.create_alert(&alert).await?;
        self.broadcaster.broadcast("alert", notification(&alert));

        info!(
            "[alert] score={:.3} {}:{} -> {}:{}",
            alert.score, alert.src_ip, alert.src_port, alert.dst_ip, alert.dst_port
        );
        Ok(())
    }
}
