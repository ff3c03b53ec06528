//! # Collector
//!
//! One [`Collector`] runs per network interface. It owns the interface's
//! capture handle, classifies every decoded frame as upstream or downstream by
//! comparing hardware addresses, and keeps a running byte counter per remote
//! `(ip, port)` endpoint.
//!
//! Counters only ever leave through [`Collector::export_and_reset`], which
//! swaps them out under the lock. Each counter is exported at most once.
//!
//! ```text
//! capture thread ──frame──▶ parse ─▶ filter ─▶ direction ─▶ add_sample
//!                                                              │
//! AggregationStore ◀──────────── export_and_reset ◀─────────────┘
//! ```

use std::collections::HashMap;
use std::net::IpAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::backend::{CaptureBackend, CaptureSource};
use super::capture_filter::CaptureFilter;
use super::frame_parser::parse_frame;
use super::types::{now_millis, Direction, NetworkInterface, Sample};
use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::CaptureError;

const READ_ERROR_PAUSE: Duration = Duration::from_millis(100);

struct CollectorState {
    stats: HashMap<(IpAddr, u16), Sample>,
    /// Window start handed to counters created before the next export
    last_export: i64,
}

pub struct Collector {
    interface: NetworkInterface,
    config: CaptureConfig,
    state: Mutex<CollectorState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    pub fn new(interface: NetworkInterface, config: CaptureConfig) -> Self {
        Self {
            interface,
            config,
            state: Mutex::new(CollectorState {
                stats: HashMap::new(),
                last_export: now_millis(),
            }),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    pub fn interface(&self) -> &NetworkInterface {
        &self.interface
    }

    /// Compiles the filter, opens a promiscuous capture handle and spawns the
    /// capture thread.
    ///
    /// Filter and open failures are returned to the caller; nothing is spawned
    /// in that case.
    pub fn start(self: &Arc<Self>, backend: &dyn CaptureBackend) -> Result<(), CaptureError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("[{}] collector already started", self.interface.name);
            return Ok(());
        }

        let filter = CaptureFilter::parse(&self.config.filter)?;
        let source = backend.open(&self.interface, &self.config)?;

        let collector = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.interface.name))
            .spawn(move || collector.run(source, filter))
            .map_err(|e| {
                CaptureError::OpenFailed(format!("{}: spawn failed: {}", self.interface.name, e))
            })?;
        *worker = Some(handle);

        info!(
            "[{}] capture started (mac {}, filter '{}')",
            self.interface.name, self.interface.mac, self.config.filter
        );
        Ok(())
    }

    /// Signals the capture thread to exit. The capture handle is released
    /// once the thread observes the signal, at the latest after one read
    /// timeout. Calling it again is a no-op.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        // detach; the thread drops its handle on its own
        self.worker.lock().take();
        info!("[{}] capture stopped", self.interface.name);
    }

    fn run(self: Arc<Self>, source: Box<dyn CaptureSource>, filter: CaptureFilter) {
        let name = self.interface.name.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.capture_loop(source, &filter)));
        if let Err(payload) = outcome {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("[{}] capture loop panicked, interface abandoned: {}", name, reason);
        }
    }

    fn capture_loop(&self, mut source: Box<dyn CaptureSource>, filter: &CaptureFilter) {
        let mut buf = vec![0u8; self.config.snapshot_len];
        while !self.cancel.is_cancelled() {
            match source.next_frame(&mut buf) {
                Ok(Some(len)) => self.handle_frame(&buf[..len], filter),
                Ok(None) => {}
                Err(e) => {
                    warn!("[{}] {}", self.interface.name, CaptureError::ReadFailed(e));
                    thread::sleep(READ_ERROR_PAUSE);
                }
            }
        }
        debug!("[{}] capture loop exited", self.interface.name);
    }

    fn handle_frame(&self, frame: &[u8], filter: &CaptureFilter) {
        let Some(parsed) = parse_frame(frame) else {
            return;
        };
        if !filter.matches(&parsed) {
            return;
        }
        let len = frame.len() as u64;
        if parsed.dst_mac == self.interface.mac {
            self.add_sample(len, parsed.src_ip, parsed.src_port, Direction::Downstream);
        } else if parsed.src_mac == self.interface.mac {
            self.add_sample(len, parsed.dst_ip, parsed.dst_port, Direction::Upstream);
        }
    }

    /// Adds `len` bytes to the counter of the remote endpoint `(ip, port)`,
    /// creating it with the last export time as its window start.
    pub fn add_sample(&self, len: u64, ip: IpAddr, port: u16, direction: Direction) {
        let mut state = self.state.lock();
        let window_start = state.last_export;
        let mac = self.interface.mac;
        state
            .stats
            .entry((ip, port))
            .or_insert_with(|| Sample {
                mac_address: mac,
                ip,
                port,
                up_bytes: 0,
                down_bytes: 0,
                window_start,
                window_end: window_start,
            })
            .add_bytes(len, direction);
    }

    /// Snapshots every counter stamped with the current time as window end,
    /// then starts a fresh, empty window.
    pub fn export_and_reset(&self) -> Vec<Sample> {
        let mut state = self.state.lock();
        let now = now_millis();
        state.last_export = now;
        state
            .stats
            .drain()
            .map(|(_, mut sample)| {
                sample.window_end = now;
                sample
            })
            .collect()
    }
}
