use super::decoder::{decode, LinkLayer};
use super::errors::CaptureError;
use crate::flow::FlowMetadata;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use pcap::{Active, Capture, Device};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;

/// Enough for IP/TCP/UDP headers plus a payload sample of a full sized frame.
pub const DEFAULT_SNAPSHOT_LEN: i32 = 1600;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaptureSettings {
    pub interface: String,

    #[serde(default = "default_snapshot_len")]
    pub snapshot_len: i32,

    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Upper bound on how long a read may block, it also bounds how quickly
    /// cancellation is observed by the capture thread
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: i32,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_snapshot_len() -> i32 {
    DEFAULT_SNAPSHOT_LEN
}

fn default_promiscuous() -> bool {
    true
}

fn default_read_timeout_ms() -> i32 {
    500
}

fn default_queue_capacity() -> usize {
    4096
}

impl CaptureSettings {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_owned(),
            snapshot_len: default_snapshot_len(),
            promiscuous: default_promiscuous(),
            read_timeout_ms: default_read_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Raw bytes of one captured frame.
pub struct RawFrame<'a> {
    pub timestamp: DateTime<Utc>,
    pub data: &'a [u8],
}

/// Blocking source of captured frames.
///
/// `Ok(None)` means the read timed out without a frame; any error ends the capture.
pub trait FrameSource: Send {
    fn link_layer(&self) -> LinkLayer;
    fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError>;
}

pub struct PcapSource {
    capture: Capture<Active>,
    link: LinkLayer,
}

impl PcapSource {
    pub fn open(settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let open_err = |e: pcap::Error| CaptureError::Open {
            interface: settings.interface.clone(),
            reason: e.to_string(),
        };

        let capture = Capture::from_device(settings.interface.as_str())
            .map_err(open_err)?
            .promisc(settings.promiscuous)
            .snaplen(settings.snapshot_len)
            .timeout(settings.read_timeout_ms)
            .open()
            .map_err(open_err)?;

        let dlt = capture.get_datalink().0;
        let link = LinkLayer::from_dlt(dlt).ok_or(CaptureError::UnsupportedLinkType(dlt))?;

        info!(
            "opened capture handle on {} [snaplen: {}, promiscuous: {}, link: {:?}]",
            settings.interface, settings.snapshot_len, settings.promiscuous, link
        );

        Ok(Self { capture, link })
    }
}

impl FrameSource for PcapSource {
    fn link_layer(&self) -> LinkLayer {
        self.link
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame<'_>>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let timestamp =
                    DateTime::<Utc>::from_timestamp(ts.tv_sec as i64, ts.tv_usec as u32 * 1000)
                        .unwrap_or_else(Utc::now);

                Ok(Some(RawFrame {
                    timestamp,
                    data: packet.data,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Names of the devices pcap is able to capture on.
pub fn list_interfaces() -> Result<Vec<String>, CaptureError> {
    Device::list()
        .map(|devices| devices.into_iter().map(|d| d.name).collect())
        .map_err(|e| CaptureError::Interfaces(e.to_string()))
}

#[derive(Debug, Default)]
struct CaptureCounters {
    decoded: AtomicU64,
    discarded: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames decoded and handed to the queue
    pub decoded: u64,
    /// Non-IP or undecodable frames
    pub discarded: u64,
    /// Frames decoded but lost because the queue was full
    pub dropped: u64,
}

pub struct Capturer {
    settings: CaptureSettings,
    running: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    tx: Option<mpsc::Sender<FlowMetadata>>,
    rx: Option<mpsc::Receiver<FlowMetadata>>,
    worker: Option<JoinHandle<()>>,
}

impl Capturer {
    pub fn new(settings: CaptureSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);

        Self {
            settings,
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            tx: Some(tx),
            rx: Some(rx),
            worker: None,
        }
    }

    /// Opens the live capture handle and spawns the decode loop.
    pub fn start(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), CaptureError> {
        if self.tx.is_none() {
            return Err(CaptureError::AlreadyStarted);
        }
        let source = PcapSource::open(&self.settings)?;
        self.start_with_source(source, shutdown)
    }

    pub fn start_with_source<S>(
        &mut self,
        source: S,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), CaptureError>
    where
        S: FrameSource + 'static,
    {
        let tx = self.tx.take().ok_or(CaptureError::AlreadyStarted)?;
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let counters = self.counters.clone();
        let worker = thread::Builder::new()
            .name(format!("capture-{}", self.settings.interface))
            .spawn(move || capture_loop(source, tx, running, counters, shutdown))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Spawn(e.to_string())
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    /// Signals the decode loop to release the capture handle. Safe to call
    /// repeatedly and before [`Capturer::start`].
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("stopping capture on {}", self.settings.interface);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Takes the receiving end of the capture queue, available once.
    ///
    /// The stream ends when the decode loop exits.
    pub fn packets(&mut self) -> Option<mpsc::Receiver<FlowMetadata>> {
        self.rx.take()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            decoded: self.counters.decoded.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Waits for the decode loop thread to finish.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("capture thread panicked");
            }
        }
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<S: FrameSource>(
    mut source: S,
    tx: mpsc::Sender<FlowMetadata>,
    running: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    shutdown: watch::Receiver<bool>,
) {
    info!("Spawned capture loop...");
    let link = source.link_layer();

    while running.load(Ordering::SeqCst) && !*shutdown.borrow() {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                error!("capture terminated: {}", e);
                break;
            }
        };

        let meta = match decode(link, frame.timestamp, frame.data) {
            Some(meta) => meta,
            None => {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        // never wait for the consumer, a stalled capture loop loses packets in the kernel instead
        match tx.try_send(meta) {
            Ok(()) => {
                counters.decoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                let dropped = counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("capture queue full, dropping packet (dropped so far: {})", dropped);
            }
            Err(TrySendError::Closed(_)) => {
                warn!("capture queue receiver is gone");
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    info!("Closing capture loop...");
}
