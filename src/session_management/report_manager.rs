use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use super::session::{Session, SessionKey};
use crate::aggregation::aggregation_store::AggregationStore;
use crate::configuration::config::Config;
use crate::data_capture::backend::CaptureBackend;
use crate::data_capture::capture_filter::CaptureFilter;
use crate::data_capture::collector::Collector;
use crate::error_handling::types::ManagerError;
use crate::report::report_job::ReportJob;
use crate::report::report_task::{ReportTask, TaskRegistry};
use crate::report::types::BandwidthReport;

/// Collectors plus the store harvesting them. Exists only while at least one
/// session is reporting.
struct Engine {
    collectors: Vec<Arc<Collector>>,
    store: Arc<AggregationStore>,
}

impl Engine {
    fn stop(&self) {
        for collector in &self.collectors {
            collector.stop();
        }
        self.store.stop();
    }
}

#[derive(Default)]
struct ManagerState {
    engine: Option<Engine>,
    tasks: HashMap<SessionKey, Arc<ReportTask>>,
}

/// The structure coordinating bandwidth reporting for sessions
///
/// # Fields Overview
///
/// - `config`: capture, store and report settings handed to what it builds
/// - `job`: the delivery pipeline every task submits to
/// - `backend`: opens the capture handles when the engine starts
/// - `state`: the running engine (if any) and one task per session key
/// - `this`: weak handle to itself, given to tasks so they can deregister
pub struct ReportManager {
    config: Config,
    job: Arc<ReportJob<BandwidthReport>>,
    backend: Arc<dyn CaptureBackend>,
    state: Mutex<ManagerState>,
    this: Weak<ReportManager>,
}

impl ReportManager {
    pub fn new(
        config: Config,
        job: Arc<ReportJob<BandwidthReport>>,
        backend: Arc<dyn CaptureBackend>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            job,
            backend,
            state: Mutex::new(ManagerState::default()),
            this: this.clone(),
        })
    }

    /// Starts reporting for `session`, replacing any task already running
    /// under the same key. The first session brings up capture and
    /// aggregation.
    pub fn start_report(&self, session: Session) -> Result<(), ManagerError> {
        let key = session.key();
        let (started, previous) = {
            let mut state = self.state.lock();
            // unregistered before its stop so the engine stays up
            let previous = state.tasks.remove(&key);
            (self.start_task(&mut state, session), previous)
        };
        if let Some(previous) = previous {
            info!("[{}] restarting report task", key);
            previous.stop();
        }
        started
    }

    fn start_task(&self, state: &mut ManagerState, session: Session) -> Result<(), ManagerError> {
        let store = match &state.engine {
            Some(engine) => Arc::clone(&engine.store),
            None => {
                let engine = self.start_engine()?;
                let store = Arc::clone(&engine.store);
                state.engine = Some(engine);
                store
            }
        };

        let registry: Weak<dyn TaskRegistry> = self.this.clone();
        let task = Arc::new(ReportTask::new(
            session,
            store,
            Arc::clone(&self.job),
            registry,
            Duration::from_secs(self.config.report.report_interval_secs),
        ));
        task.start();
        state.tasks.insert(task.session().key(), task);
        Ok(())
    }

    /// Stops the task reporting for `key`, if one is running.
    pub fn end_report(&self, key: &SessionKey) {
        let task = self.state.lock().tasks.get(key).cloned();
        match task {
            Some(task) => task.stop(),
            None => debug!("[{}] no report task to end", key),
        }
    }

    pub fn active_sessions(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.state.lock().tasks.keys().cloned().collect();
        keys.sort_by(|a, b| (&a.instance_id, a.vm_id).cmp(&(&b.instance_id, b.vm_id)));
        keys
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().engine.is_some()
    }

    /// Stops every task and tears the engine down.
    pub fn shutdown(&self) {
        let tasks: Vec<Arc<ReportTask>> = {
            let mut state = self.state.lock();
            state.tasks.drain().map(|(_, task)| task).collect()
        };
        for task in &tasks {
            task.stop();
        }
        if let Some(engine) = self.state.lock().engine.take() {
            engine.stop();
        }
        info!("report manager shut down ({} task(s) stopped)", tasks.len());
    }

    fn start_engine(&self) -> Result<Engine, ManagerError> {
        let capture = &self.config.capture;
        // a bad filter fails every interface alike, so report it as such
        CaptureFilter::parse(&capture.filter)?;

        let interfaces = self.backend.interfaces(capture)?;
        let mut collectors = Vec::new();
        for interface in interfaces {
            let collector = Arc::new(Collector::new(interface, capture.clone()));
            match collector.start(self.backend.as_ref()) {
                Ok(()) => collectors.push(collector),
                Err(e) => error!(
                    "[{}] capture unavailable, skipping: {}",
                    collector.interface().name,
                    e
                ),
            }
        }
        if collectors.is_empty() {
            return Err(ManagerError::NoInterfaces);
        }

        let store = Arc::new(AggregationStore::new(collectors.clone(), &self.config.store));
        store.start();
        info!("capture engine started on {} interface(s)", collectors.len());
        Ok(Engine { collectors, store })
    }
}

impl TaskRegistry for ReportManager {
    fn remove_task(&self, key: &SessionKey, task_id: Uuid) {
        let mut state = self.state.lock();
        match state.tasks.get(key) {
            Some(task) if task.id() == task_id => {
                state.tasks.remove(key);
            }
            // already replaced or removed
            _ => return,
        }
        if state.tasks.is_empty() {
            if let Some(engine) = state.engine.take() {
                engine.stop();
                warn!("no session left, capture engine stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::backend::mock::MockBackend;
    use crate::data_capture::types::{MacAddr, NetworkInterface};
    use crate::error_handling::types::CaptureError;
    use crate::report::report_task::TaskStatus;
    use crate::report::testing::CapturingClient;
    use crate::report::ReportClient;
    use tempfile::TempDir;

    fn interface(name: &str, last: u8) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            mac: MacAddr([2, 0, 0, 0, 0, last]),
        }
    }

    fn session(instance: &str, vm_id: i64) -> Session {
        serde_json::from_str(&format!(
            r#"{{"instance_id": "{}", "vm_id": {}}}"#,
            instance, vm_id
        ))
        .unwrap()
    }

    fn build_manager(dir: &TempDir, backend: MockBackend, filter: &str) -> Arc<ReportManager> {
        let mut config = Config::default();
        config.capture.filter = filter.to_string();
        config.report.spool_path = dir.path().join("report.log");
        let client: Arc<dyn ReportClient<BandwidthReport>> = Arc::new(CapturingClient::default());
        let job = Arc::new(ReportJob::new(client, &config.report));
        ReportManager::new(config, job, Arc::new(backend))
    }

    #[tokio::test]
    async fn test_first_session_starts_engine_last_one_stops_it() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(
            &dir,
            MockBackend::new(vec![interface("eth0", 1)]),
            "udp or tcp",
        );
        assert!(!manager.is_capturing());

        manager.start_report(session("ins-1", 1)).unwrap();
        manager.start_report(session("ins-2", 2)).unwrap();
        assert!(manager.is_capturing());
        assert_eq!(manager.active_sessions().len(), 2);

        manager.end_report(&session("ins-1", 1).key());
        assert!(manager.is_capturing());
        assert_eq!(manager.active_sessions(), vec![session("ins-2", 2).key()]);

        manager.end_report(&session("ins-2", 2).key());
        assert!(!manager.is_capturing());
        assert!(manager.active_sessions().is_empty());

        // ending an unknown session is harmless
        manager.end_report(&session("ins-9", 9).key());
    }

    #[tokio::test]
    async fn test_restart_replaces_task_without_stopping_engine() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(
            &dir,
            MockBackend::new(vec![interface("eth0", 1)]),
            "udp or tcp",
        );

        let store = |m: &ReportManager| Arc::clone(&m.state.lock().engine.as_ref().unwrap().store);
        manager.start_report(session("ins-1", 1)).unwrap();
        let first = manager.state.lock().tasks[&session("ins-1", 1).key()].id();
        let store_before = store(&manager);
        manager.start_report(session("ins-1", 1)).unwrap();
        let second = manager.state.lock().tasks[&session("ins-1", 1).key()].id();

        assert_ne!(first, second);
        assert!(Arc::ptr_eq(&store_before, &store(&manager)));
        assert_eq!(manager.active_sessions().len(), 1);
        assert!(manager.is_capturing());

        // a stale task id does not evict its replacement
        manager.remove_task(&session("ins-1", 1).key(), first);
        assert_eq!(manager.active_sessions().len(), 1);
        manager.shutdown();
        assert!(!manager.is_capturing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_restarts_leave_one_running_task() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(
            &dir,
            MockBackend::new(vec![interface("eth0", 1)]),
            "udp or tcp",
        );
        let key = session("ins-1", 1).key();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            let key = key.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let mut seen = Vec::new();
                for _ in 0..20 {
                    manager.start_report(session("ins-1", 1)).unwrap();
                    seen.push(Arc::clone(&manager.state.lock().tasks[&key]));
                }
                seen
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.extend(handle.await.unwrap());
        }

        let current = Arc::clone(&manager.state.lock().tasks[&key]);
        assert_eq!(manager.active_sessions(), vec![key]);
        assert_eq!(current.status(), TaskStatus::Running);
        for task in seen.iter().filter(|t| t.id() != current.id()) {
            assert_eq!(task.status(), TaskStatus::Stopped);
        }
        assert!(manager.is_capturing());
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_unavailable_interfaces_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::new(vec![interface("eth0", 1), interface("eth1", 2)]);
        backend.failing = vec!["eth0".to_string()];
        let manager = build_manager(&dir, backend, "udp or tcp");

        manager.start_report(session("ins-1", 1)).unwrap();
        let collectors = manager.state.lock().engine.as_ref().unwrap().collectors.len();
        assert_eq!(collectors, 1);
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_start_fails_without_any_capture() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockBackend::new(vec![interface("eth0", 1)]);
        backend.failing = vec!["eth0".to_string()];
        let manager = build_manager(&dir, backend, "udp or tcp");
        assert!(matches!(
            manager.start_report(session("ins-1", 1)),
            Err(ManagerError::NoInterfaces)
        ));
        assert!(manager.active_sessions().is_empty());

        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, MockBackend::new(Vec::new()), "udp or tcp");
        assert!(matches!(
            manager.start_report(session("ins-1", 1)),
            Err(ManagerError::NoInterfaces)
        ));
    }

    #[tokio::test]
    async fn test_bad_filter_propagates() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(
            &dir,
            MockBackend::new(vec![interface("eth0", 1)]),
            "icmp",
        );
        assert!(matches!(
            manager.start_report(session("ins-1", 1)),
            Err(ManagerError::CaptureError(CaptureError::InvalidFilter(_)))
        ));
        assert!(!manager.is_capturing());
    }
}
