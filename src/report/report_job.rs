//! # Report Job
//!
//! The delivery pipeline shared by every report task. Records flow through
//! three places, always oldest first:
//!
//! ```text
//!             add()                                   delivery loop
//!   task ──────────────▶ ┌────────────┐  peek/send/dequeue  ┌────────┐
//!          queue-only    │ RingQueue  │ ───────────────────▶│ client │
//!          mode          └────────────┘                     └────────┘
//!             │               ▲   ▲
//!             │ otherwise     │   │ backfill when the queue runs empty
//!             ▼               │   │
//!   ┌──────────────┐ flush  ┌─┴───┴──────┐
//!   │ overflow Vec │───────▶│ DurableLog │
//!   └──────────────┘        └────────────┘
//! ```
//!
//! "Queue-only" mode means nothing is waiting on disk or in overflow, so a new
//! record may go straight into the queue without overtaking older ones. The
//! first record that cannot be queued directly ends that mode until a backfill
//! empties both the log and the overflow list again.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ReportClient;
use crate::configuration::types::ReportConfig;
use crate::error_handling::types::{ReportError, StorageError};
use crate::storage::durable_log::DurableLog;
use crate::storage::record::{encode_frame, Record};
use crate::storage::ring_queue::RingQueue;

struct JobState<R> {
    overflow: Vec<R>,
    log: DurableLog<R>,
}

pub struct ReportJob<R: Record + Clone> {
    client: Arc<dyn ReportClient<R>>,
    queue: RingQueue<R>,
    state: Mutex<JobState<R>>,
    queue_only: AtomicBool,
    running: AtomicBool,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    retry_backoff: Duration,
    poll_interval: Duration,
}

impl<R: Record + Clone> ReportJob<R> {
    pub fn new(client: Arc<dyn ReportClient<R>>, config: &ReportConfig) -> Self {
        Self {
            client,
            queue: RingQueue::new(config.queue_capacity),
            state: Mutex::new(JobState {
                overflow: Vec::new(),
                log: DurableLog::new(&config.spool_path, config.compact_threshold_bytes),
            }),
            queue_only: AtomicBool::new(false),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Opens the durable log, replays as much backlog as fits in the queue
    /// and launches the delivery loop.
    pub fn start(self: &Arc<Self>) -> Result<(), ReportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            if let Err(e) = state.log.open() {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
            let replayed = match state.log.load(self.queue.free_capacity()) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Failed to replay durable log: {}", e);
                    Vec::new()
                }
            };
            info!("Replaying {} persisted report(s)", replayed.len());
            for record in replayed {
                self.do_add(&mut state, record, true);
            }
            let backlog_drained = matches!(state.log.pending_bytes(), Ok(0));
            if backlog_drained && self.queue.free_capacity() > 0 {
                self.queue_only.store(true, Ordering::SeqCst);
            }
        }

        let job = Arc::clone(self);
        *self.supervisor.lock() = Some(tokio::spawn(job.supervise()));
        info!(
            "Report job started (queue {}/{})",
            self.queue.len(),
            self.queue.capacity()
        );
        Ok(())
    }

    /// Stops delivery, then persists whatever is still queued followed by the
    /// overflow list, and closes the log.
    pub async fn stop(&self) -> Result<(), ReportError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let supervisor = self.supervisor.lock().take();
        if let Some(handle) = supervisor {
            if let Err(e) = handle.await {
                warn!("Delivery supervisor ended abnormally: {}", e);
            }
        }

        let mut state = self.state.lock();
        let queued = self.queue.drain();
        let overflow = mem::take(&mut state.overflow);
        let result = state
            .log
            .compact(&queued, &overflow)
            .and_then(|_| state.log.close());
        match result {
            Ok(()) => {
                info!(
                    "Report job stopped, persisted {} queued and {} overflow report(s)",
                    queued.len(),
                    overflow.len()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to persist {} pending report(s) on shutdown: {}",
                    queued.len() + overflow.len(),
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Admits a record for delivery.
    ///
    /// `force` is only meant for replaying persisted records: it tries the
    /// queue even when queue-only mode is off. A record that cannot be encoded
    /// into a single frame is dropped.
    pub fn add(&self, record: R, force: bool) {
        if let Err(e) = encode_frame(&record) {
            error!("Dropping report that can never be delivered: {}", e);
            return;
        }
        let mut state = self.state.lock();
        self.do_add(&mut state, record, force);
    }

    fn do_add(&self, state: &mut JobState<R>, record: R, force: bool) {
        let record = if self.queue_only.load(Ordering::SeqCst) || force {
            match self.queue.enqueue(record) {
                Ok(()) => return,
                Err(record) => record,
            }
        } else {
            record
        };

        state.overflow.push(record);
        if state.overflow.len() >= self.queue.capacity() {
            match state.log.store(&state.overflow) {
                Ok(()) => state.overflow.clear(),
                Err(e) => warn!(
                    "Failed to spill {} report(s) to disk, keeping them in memory: {}",
                    state.overflow.len(),
                    e
                ),
            }
        }
        self.queue_only.store(false, Ordering::SeqCst);
    }

    /// Refills free queue slots from the log first, then from the overflow
    /// list. Overflow is only touched once the log is fully read. Re-enters
    /// queue-only mode once both are empty.
    fn try_load_data(&self) {
        let mut state = self.state.lock();
        let free = self.queue.free_capacity();
        if free == 0 {
            return;
        }

        match state.log.load(free) {
            Ok(records) => {
                if !records.is_empty() {
                    debug!("Backfilled {} report(s) from disk", records.len());
                }
                for record in records {
                    self.do_add(&mut state, record, true);
                }
            }
            Err(e) => {
                warn!("Failed to backfill from disk: {}", e);
                return;
            }
        }
        if !matches!(state.log.pending_bytes(), Ok(0)) {
            return;
        }

        let mut moved = 0;
        while moved < state.overflow.len() && self.queue.free_capacity() > 0 {
            let record = state.overflow[moved].clone();
            if self.queue.enqueue(record).is_err() {
                break;
            }
            moved += 1;
        }
        state.overflow.drain(..moved);

        if state.overflow.is_empty() {
            self.queue_only.store(true, Ordering::SeqCst);
        }
    }

    /// Runs the delivery loop, restarting it after a panic for as long as the
    /// job is running.
    async fn supervise(self: Arc<Self>) {
        loop {
            let job = Arc::clone(&self);
            match tokio::spawn(job.deliver()).await {
                Ok(()) => break,
                Err(e) if e.is_panic() => {
                    error!("Delivery loop panicked: {}", e);
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    info!("Restarting delivery loop");
                }
                Err(e) => {
                    warn!("Delivery loop cancelled: {}", e);
                    break;
                }
            }
        }
    }

    async fn deliver(self: Arc<Self>) {
        while !self.cancel.is_cancelled() {
            let Some(record) = self.queue.peek() else {
                self.try_load_data();
                if self.pause(self.poll_interval).await {
                    break;
                }
                continue;
            };

            let sent = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.client.send(std::slice::from_ref(&record)) => result,
            };
            match sent {
                Ok(()) => {
                    self.queue.dequeue();
                }
                Err(ReportError::StorageError(
                    e @ (StorageError::EncodeFailed(_) | StorageError::FrameTooLarge(_)),
                )) => {
                    error!("Dropping report that can never be delivered: {}", e);
                    self.queue.dequeue();
                }
                Err(e) => {
                    warn!("Report delivery failed, retrying in {:?}: {}", self.retry_backoff, e);
                    if self.pause(self.retry_backoff).await {
                        break;
                    }
                }
            }
        }
        debug!("Delivery loop exited");
    }

    /// Sleeps for `period`. Returns `true` when cancelled meanwhile.
    async fn pause(&self, period: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(period) => false,
        }
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn overflowed(&self) -> usize {
        self.state.lock().overflow.len()
    }

    pub fn is_queue_only(&self) -> bool {
        self.queue_only.load(Ordering::SeqCst)
    }
}
