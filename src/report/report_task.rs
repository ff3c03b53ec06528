use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::report_job::ReportJob;
use super::types::{BandwidthReport, Usage};
use crate::aggregation::aggregation_store::AggregationStore;
use crate::data_capture::types::{now_millis, sum_bytes};
use crate::session_management::session::{Session, SessionKey};

/// Whoever keeps track of running tasks; told when a task stops.
pub trait TaskRegistry: Send + Sync {
    /// Forgets `task_id` if it is still the task registered under `key`.
    fn remove_task(&self, key: &SessionKey, task_id: Uuid);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Stopped,
}

struct Progress {
    last_sample_time: i64,
    sequence: u32,
}

/// Periodic usage reporting for one session.
pub struct ReportTask {
    id: Uuid,
    session: Session,
    store: Arc<AggregationStore>,
    job: Arc<ReportJob<BandwidthReport>>,
    registry: Weak<dyn TaskRegistry>,
    interval: Duration,
    progress: Mutex<Progress>,
    status: Mutex<TaskStatus>,
    cancel: CancellationToken,
}

impl ReportTask {
    pub fn new(
        session: Session,
        store: Arc<AggregationStore>,
        job: Arc<ReportJob<BandwidthReport>>,
        registry: Weak<dyn TaskRegistry>,
        interval: Duration,
    ) -> Self {
        let last_sample_time = session.start_time.timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            session,
            store,
            job,
            registry,
            interval,
            progress: Mutex::new(Progress {
                last_sample_time,
                sequence: 0,
            }),
            status: Mutex::new(TaskStatus::Created),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock()
    }

    /// Schedules a tick every interval, the first one interval from now.
    pub fn start(self: &Arc<Self>) {
        {
            let mut status = self.status.lock();
            if *status != TaskStatus::Created {
                return;
            }
            *status = TaskStatus::Running;
        }

        let task = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + task.interval, task.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => task.guarded_tick(),
                }
            }
            debug!("[{}] report loop exited", task.session.key());
        });
        info!(
            "[{}] reporting started (flow {}, stream ip {:?}, {} port(s))",
            self.session.key(),
            self.session.flow_id,
            self.session.stream_ip,
            self.session.stream_ports.len()
        );
    }

    /// Moves to `Stopped`, cancels scheduling and deregisters. Idempotent.
    pub fn stop(&self) {
        {
            let mut status = self.status.lock();
            if *status == TaskStatus::Stopped {
                return;
            }
            *status = TaskStatus::Stopped;
        }
        self.cancel.cancel();
        let sequence = self.progress.lock().sequence;
        info!(
            "[{}] reporting stopped after {} report(s)",
            self.session.key(),
            sequence
        );
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_task(&self.session.key(), self.id);
        }
    }

    fn guarded_tick(&self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.tick_at(now_millis())));
        if outcome.is_err() {
            error!("[{}] report tick panicked, skipping", self.session.key());
        }
    }

    /// Reports the usage seen in `[last_sample_time, now)`. Returns whether a
    /// report was handed to the job.
    pub fn tick_at(&self, now: i64) -> bool {
        let mut progress = self.progress.lock();
        let samples = self.store.query(
            |s| self.session.has_stream_ip(&s.ip),
            progress.last_sample_time,
            now,
        );
        if samples.is_empty() {
            return false;
        }
        // any returned batch moves the window forward, even a silent one
        let window_start = progress.last_sample_time;
        progress.last_sample_time = now;

        let (total_up, total_down) = sum_bytes(&samples);
        if total_up.saturating_add(total_down) == 0 {
            return false;
        }
        let (stream_up, stream_down) = sum_bytes(
            samples
                .iter()
                .filter(|s| self.session.has_stream_port(s.port)),
        );
        if stream_up.saturating_add(stream_down) == 0 {
            debug!("[{}] no traffic on stream ports", self.session.key());
            return false;
        }

        let usage = Usage {
            total_up,
            total_down,
            stream_up,
            stream_down,
        };
        let report = BandwidthReport::new(&self.session, window_start, now, usage, progress.sequence);
        progress.sequence += 1;
        debug!(
            "[{}] report #{}: up {} down {}",
            self.session.key(),
            report.sequence,
            stream_up,
            stream_down
        );
        self.job.add(report, false);
        true
    }
}
