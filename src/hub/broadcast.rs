use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use uuid::Uuid;

type Registry = HashMap<Uuid, Sender<Arc<str>>>;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HubSettings {
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_observer_capacity() -> usize {
    64
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            broadcast_capacity: default_broadcast_capacity(),
            observer_capacity: default_observer_capacity(),
        }
    }
}

/// Wire shape of every message pushed to observers
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    data: serde_json::Value,
    ts: i64,
}

/// Anything able to fan an event out to the connected observers.
pub trait Broadcast: Send + Sync + 'static {
    /// Returns false when the event was dropped.
    fn broadcast(&self, event_type: &str, data: serde_json::Value) -> bool;
}

/// Registration half of an observer, the hub keeps the sender and the
/// session drains the paired receiver.
#[derive(Debug)]
pub struct Observer {
    id: Uuid,
    tx: Sender<Arc<str>>,
}

impl Observer {
    pub fn new(capacity: usize) -> (Observer, Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Observer {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

fn read(registry: &RwLock<Registry>) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(registry: &RwLock<Registry>) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owner of the observer registry. Only the task running [`Hub::run`] mutates it.
pub struct Hub {
    observers: Arc<RwLock<Registry>>,
    register_rx: UnboundedReceiver<Observer>,
    unregister_rx: UnboundedReceiver<Uuid>,
    broadcast_rx: Receiver<Arc<str>>,
}

/// Cloneable front of the hub handed to producers and sessions.
#[derive(Clone)]
pub struct HubHandle {
    observers: Arc<RwLock<Registry>>,
    observer_capacity: usize,
    register_tx: UnboundedSender<Observer>,
    unregister_tx: UnboundedSender<Uuid>,
    broadcast_tx: Sender<Arc<str>>,
}

impl Hub {
    pub fn new(settings: &HubSettings) -> (Hub, HubHandle) {
        let observers = Arc::new(RwLock::new(HashMap::new()));
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(settings.broadcast_capacity.max(1));

        let hub = Hub {
            observers: observers.clone(),
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        let handle = HubHandle {
            observers,
            observer_capacity: settings.observer_capacity,
            register_tx,
            unregister_tx,
            broadcast_tx,
        };

        (hub, handle)
    }

    /// Serves registrations and broadcasts until shutdown is signalled or
    /// every handle is gone. Membership changes are served before queued
    /// broadcasts.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Spawned broadcast hub...");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(observer) = self.register_rx.recv() => self.add(observer),
                Some(id) = self.unregister_rx.recv() => self.remove(&id),
                Some(message) = self.broadcast_rx.recv() => self.fan_out(message),
                else => break,
            }
        }

        // dropping the senders ends every session stream
        let mut observers = write(&self.observers);
        info!("Closing broadcast hub with {} observers", observers.len());
        observers.clear();
    }

    fn add(&self, observer: Observer) {
        let mut observers = write(&self.observers);
        observers.insert(observer.id, observer.tx);
        info!(
            "observer {} registered, {} connected",
            observer.id,
            observers.len()
        );
    }

    fn remove(&self, id: &Uuid) {
        let mut observers = write(&self.observers);
        if observers.remove(id).is_some() {
            info!("observer {} unregistered, {} connected", id, observers.len());
        }
    }

    fn fan_out(&self, message: Arc<str>) {
        let mut observers = write(&self.observers);
        observers.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("observer {} is not keeping up, disconnecting", id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("observer {} is gone, removing", id);
                false
            }
        });
    }
}

impl HubHandle {
    /// Creates an observer sized with the configured queue capacity.
    pub fn observer(&self) -> (Observer, Receiver<Arc<str>>) {
        Observer::new(self.observer_capacity)
    }

    pub fn register(&self, observer: Observer) {
        if self.register_tx.send(observer).is_err() {
            debug!("hub is closed, registration ignored");
        }
    }

    /// Idempotent. The observer's queue is closed by the hub at most once.
    pub fn unregister(&self, id: Uuid) {
        if self.unregister_tx.send(id).is_err() {
            debug!("hub is closed, unregistration of {} ignored", id);
        }
    }

    pub fn observer_count(&self) -> usize {
        read(&self.observers).len()
    }
}

impl Broadcast for HubHandle {
    fn broadcast(&self, event_type: &str, data: serde_json::Value) -> bool {
        let envelope = Envelope {
            event_type,
            data,
            ts: Utc::now().timestamp_millis(),
        };

        let message: Arc<str> = match serde_json::to_string(&envelope) {
            Ok(m) => m.into(),
            Err(e) => {
                error!("unable to serialize {} event: {}", event_type, e);
                return false;
            }
        };

        match self.broadcast_tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("broadcast queue is full, dropping {} event", event_type);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("hub is closed, dropping {} event", event_type);
                false
            }
        }
    }
}
