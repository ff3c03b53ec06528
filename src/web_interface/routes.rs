use std::sync::Arc;

use log::{error, info};
use serde::Serialize;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use crate::session_management::report_manager::ReportManager;
use crate::session_management::session::{Session, SessionKey};

/// Response body of the lifecycle endpoints
#[derive(Debug, Serialize, PartialEq)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Starting the first session opens capture handles and spawns threads, so it
/// runs on the blocking pool.
pub async fn start_session(
    manager: Arc<ReportManager>,
    session: Session,
) -> (StatusCode, ApiMessage) {
    let key = session.key();
    let started = tokio::task::spawn_blocking(move || manager.start_report(session)).await;
    match started {
        Ok(Ok(())) => {
            info!("[{}] session started", key);
            (StatusCode::OK, ApiMessage::new(format!("reporting {}", key)))
        }
        Ok(Err(e)) => {
            error!("[{}] unable to start reporting: {}", key, e);
            (StatusCode::INTERNAL_SERVER_ERROR, ApiMessage::new(e.to_string()))
        }
        Err(e) => {
            error!("[{}] session start aborted: {}", key, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiMessage::new("session start aborted"),
            )
        }
    }
}

pub fn end_session(manager: &ReportManager, key: &SessionKey) -> (StatusCode, ApiMessage) {
    manager.end_report(key);
    info!("[{}] session ended", key);
    (StatusCode::OK, ApiMessage::new(format!("ended {}", key)))
}

pub fn list_sessions(manager: &ReportManager) -> Vec<String> {
    manager
        .active_sessions()
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// POST /sessions/start
pub fn start_session_route(
    manager: Arc<ReportManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / "start")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(move |session: Session| {
            let manager = manager.clone();
            async move {
                let (status, body) = start_session(manager, session).await;
                Ok::<_, Rejection>(reply::with_status(reply::json(&body), status))
            }
        })
}

/// POST /sessions/end
pub fn end_session_route(
    manager: Arc<ReportManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / "end")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(move |key: SessionKey| {
            let manager = manager.clone();
            async move {
                let (status, body) = end_session(&manager, &key);
                Ok::<_, Rejection>(reply::with_status(reply::json(&body), status))
            }
        })
}

/// GET /sessions
pub fn list_sessions_route(
    manager: Arc<ReportManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("sessions")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(move || {
            let manager = manager.clone();
            async move { Ok::<_, Rejection>(reply::json(&list_sessions(&manager))) }
        })
}

pub fn routes(
    manager: Arc<ReportManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    start_session_route(manager.clone())
        .or(end_session_route(manager.clone()))
        .or(list_sessions_route(manager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;
    use crate::data_capture::backend::mock::MockBackend;
    use crate::data_capture::types::{MacAddr, NetworkInterface};
    use crate::report::report_job::ReportJob;
    use crate::report::testing::CapturingClient;
    use crate::report::types::BandwidthReport;
    use crate::report::ReportClient;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, interfaces: Vec<NetworkInterface>) -> Arc<ReportManager> {
        let mut config = Config::default();
        config.report.spool_path = dir.path().join("report.log");
        let client: Arc<dyn ReportClient<BandwidthReport>> = Arc::new(CapturingClient::default());
        let job = Arc::new(ReportJob::new(client, &config.report));
        ReportManager::new(config, job, Arc::new(MockBackend::new(interfaces)))
    }

    fn session() -> Session {
        serde_json::from_str(r#"{"instance_id": "ins-1", "vm_id": 7}"#).unwrap()
    }

    #[tokio::test]
    async fn test_start_list_end() {
        let dir = TempDir::new().unwrap();
        let eth0 = NetworkInterface {
            name: "eth0".to_string(),
            mac: MacAddr([2, 0, 0, 0, 0, 1]),
        };
        let manager = manager(&dir, vec![eth0]);

        let (status, _) = start_session(Arc::clone(&manager), session()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list_sessions(&manager), vec!["ins-1-7".to_string()]);

        let (status, body) = end_session(&manager, &session().key());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.message, "ended ins-1-7");
        assert!(list_sessions(&manager).is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_500_with_message() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir, Vec::new());

        let (status, body) = start_session(Arc::clone(&manager), session()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "No capturable network interface found");
        assert!(list_sessions(&manager).is_empty());
    }
}
