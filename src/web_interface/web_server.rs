use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::routes::routes;
use crate::error_handling::types::WebError;
use crate::session_management::report_manager::ReportManager;

/// HTTP front of the session lifecycle API
pub struct WebServer {
    manager: Arc<ReportManager>,
    address: SocketAddr,
    cancel: CancellationToken,
}

impl WebServer {
    pub fn new(manager: Arc<ReportManager>, address: SocketAddr) -> Self {
        Self {
            manager,
            address,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawns the server on the current runtime. It runs until [`stop`].
    ///
    /// [`stop`]: WebServer::stop
    pub fn start(&self) -> Result<JoinHandle<()>, WebError> {
        // warp panics when it cannot bind, so probe the address first
        std::net::TcpListener::bind(self.address)
            .map_err(|e| WebError::BindFailed(format!("{}: {}", self.address, e)))?;

        let routes = routes(self.manager.clone());
        let address = self.address;
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = warp::serve(routes).run(address) => {}
            }
            info!("web server on {} stopped", address);
        });
        info!("web server listening on {}", self.address);
        Ok(handle)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;
    use crate::data_capture::backend::mock::MockBackend;
    use crate::report::report_job::ReportJob;
    use crate::report::testing::CapturingClient;
    use crate::report::types::BandwidthReport;
    use crate::report::ReportClient;

    #[tokio::test]
    async fn test_occupied_address_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client: Arc<dyn ReportClient<BandwidthReport>> = Arc::new(CapturingClient::default());
        let config = Config::default();
        let job = Arc::new(ReportJob::new(client, &config.report));
        let manager = ReportManager::new(config, job, Arc::new(MockBackend::default()));

        let server = WebServer::new(manager, taken.local_addr().unwrap());
        assert!(matches!(server.start(), Err(WebError::BindFailed(_))));
    }
}
