use super::errors::ExporterError;
use crate::flow::FlowMetadata;

use async_trait::async_trait;
use log::{debug, error, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tokio::task;
use tokio::time::Duration;

const RATE_REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Export: Sync + Send {
    /// Hands a single record keyed by its five-tuple to the producer. Returns
    /// once the record is queued, delivery is reported asynchronously.
    async fn send(&self, flow: FlowMetadata) -> Result<(), ExporterError>;

    /// Queues every record that serializes, returns how many were queued.
    async fn send_batch(&self, flows: Vec<FlowMetadata>) -> Result<usize, ExporterError>;

    /// Flushes pending records, later sends fail.
    fn close(&self) -> Result<(), ExporterError>;
}

/// Drains the capture queue into the exporter until the queue closes or
/// shutdown is signalled. Records already waiting in the queue are grouped into
/// a single batch of at most `batch_size`.
pub async fn run(
    exporter: impl Export,
    rx: &mut Receiver<FlowMetadata>,
    batch_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Spawned exporter...");
    let batch_size = batch_size.max(1);

    let exported = Arc::new(AtomicUsize::new(0));
    let timer = task::spawn({
        let exported = exported.clone();
        async move {
            let mut interval = tokio::time::interval(RATE_REPORT_INTERVAL);
            interval.tick().await;

            loop {
                interval.tick().await;
                let current = exported.swap(0, Ordering::Relaxed);
                info!(
                    "Exporting events with a speed of: {} events per second",
                    current as u64 / RATE_REPORT_INTERVAL.as_secs()
                );
            }
        }
    });

    loop {
        if *shutdown.borrow() {
            break;
        }

        let first = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            m = rx.recv() => match m {
                Some(m) => m,
                None => break,
            },
        };

        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(m) => batch.push(m),
                Err(_) => break,
            }
        }

        let result = if batch.len() == 1 {
            match batch.pop() {
                Some(flow) => exporter.send(flow).await.map(|_| 1),
                None => continue,
            }
        } else {
            exporter.send_batch(batch).await
        };

        match result {
            Ok(n) => {
                exported.fetch_add(n, Ordering::Relaxed);
            }
            Err(e) => debug!("Exporter is losing messages: {}", e),
        }
    }

    timer.abort();
    if let Err(e) = exporter.close() {
        error!("unable to close exporter: {}", e);
    }
    info!("Closing exporter...");
}
