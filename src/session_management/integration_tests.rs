//! End-to-end runs of the pipeline: frames in through an in-memory capture
//! backend, bandwidth reports out through a capturing client.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::aggregation::aggregation_store::AggregationStore;
use crate::configuration::config::Config;
use crate::data_capture::backend::mock::{MockBackend, Step};
use crate::data_capture::backend::CaptureBackend;
use crate::data_capture::collector::Collector;
use crate::data_capture::frame_parser::test_frames::tcp_frame;
use crate::data_capture::types::{now_millis, MacAddr, NetworkInterface};
use crate::report::report_job::ReportJob;
use crate::report::report_task::{ReportTask, TaskRegistry};
use crate::report::testing::CapturingClient;
use crate::report::types::BandwidthReport;
use crate::report::ReportClient;
use crate::session_management::report_manager::ReportManager;
use crate::session_management::session::{Session, SessionKey};

const LOCAL: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
const GATEWAY: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 2]);

fn eth0() -> NetworkInterface {
    NetworkInterface {
        name: "eth0".to_string(),
        mac: LOCAL,
    }
}

/// 1000 bytes from the streaming peer to this host.
fn downstream_frame() -> Step {
    Step::Frame(tcp_frame(
        GATEWAY,
        LOCAL,
        (Ipv4Addr::new(10, 0, 0, 5), 443),
        (Ipv4Addr::new(192, 168, 1, 10), 50000),
        1000,
    ))
}

fn streaming_session() -> Session {
    serde_json::from_str(
        r#"{"instance_id": "ins-7", "vm_id": 42, "flow_id": "flow-1",
            "stream_ip": "10.0.0.5", "stream_ports": [{"name": "rtp", "port": 443}]}"#,
    )
    .unwrap()
}

fn poll_until<T, F: FnMut() -> Option<T>>(mut attempt: F) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = attempt() {
            return value;
        }
        assert!(Instant::now() < deadline, "nothing captured in time");
        thread::sleep(Duration::from_millis(10));
    }
}

struct NoRegistry;

impl TaskRegistry for NoRegistry {
    fn remove_task(&self, _key: &SessionKey, _task_id: uuid::Uuid) {}
}

#[tokio::test]
async fn test_downstream_frame_becomes_one_report() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.report.spool_path = dir.path().join("report.log");

    let backend = MockBackend::new(vec![eth0()]);
    let collector = Arc::new(Collector::new(eth0(), config.capture.clone()));
    collector.start(&backend).unwrap();

    // the collector counts the frame against the remote endpoint
    backend.push("eth0", downstream_frame());
    let samples = poll_until(|| {
        let samples = collector.export_and_reset();
        (!samples.is_empty()).then_some(samples)
    });
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(samples[0].port, 443);
    assert_eq!((samples[0].up_bytes, samples[0].down_bytes), (0, 1000));

    // the same traffic again, this time through a harvest
    let store = Arc::new(AggregationStore::new(
        vec![Arc::clone(&collector)],
        &config.store,
    ));
    backend.push("eth0", downstream_frame());
    poll_until(|| (store.harvest() > 0).then_some(()));

    let client = Arc::new(CapturingClient::default());
    let job = Arc::new(ReportJob::new(
        Arc::clone(&client) as Arc<dyn ReportClient<BandwidthReport>>,
        &config.report,
    ));
    job.start().unwrap();

    let mut session = streaming_session();
    session.start_time = chrono::Utc::now() - chrono::Duration::minutes(1);
    let registry: Arc<dyn TaskRegistry> = Arc::new(NoRegistry);
    let task = ReportTask::new(
        session,
        Arc::clone(&store),
        Arc::clone(&job),
        Arc::downgrade(&registry),
        Duration::from_secs(10),
    );

    let now = now_millis() + 1;
    assert!(task.tick_at(now));
    assert!(!task.tick_at(now + 1));

    let reports = client.wait_for(1).await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].session_key, "ins-7-42");
    assert_eq!(reports[0].stream_down_bytes, 1000);
    assert_eq!(reports[0].stream_up_bytes, 0);

    collector.stop();
    job.stop().await.unwrap();
}

#[tokio::test]
async fn test_manager_reports_until_session_ends() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.report.spool_path = dir.path().join("report.log");
    config.store.harvest_interval_secs = 1;
    config.report.report_interval_secs = 1;
    config.report.poll_interval_secs = 1;

    let client = Arc::new(CapturingClient::default());
    let job = Arc::new(ReportJob::new(
        Arc::clone(&client) as Arc<dyn ReportClient<BandwidthReport>>,
        &config.report,
    ));
    job.start().unwrap();

    let backend = Arc::new(MockBackend::new(vec![eth0()]));
    let manager = ReportManager::new(
        config,
        Arc::clone(&job),
        Arc::clone(&backend) as Arc<dyn CaptureBackend>,
    );
    let session = streaming_session();
    manager.start_report(session.clone()).unwrap();
    backend.push("eth0", downstream_frame());

    let reports = client.wait_for(1).await;
    assert_eq!(reports[0].stream_down_bytes, 1000);
    assert_eq!(reports[0].total_down_bytes, 1000);
    assert!(reports[0].window_start < reports[0].window_end);

    manager.end_report(&session.key());
    assert!(manager.active_sessions().is_empty());
    assert!(!manager.is_capturing());
    job.stop().await.unwrap();
}
