use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bandwidth_reporter::configuration::config::Config;
use bandwidth_reporter::data_capture::packet_socket::PacketSocketBackend;
use bandwidth_reporter::report::{BandwidthReport, ReportClient, ReportJob, TcpReportClient};
use bandwidth_reporter::session_management::ReportManager;
use bandwidth_reporter::web_interface::WebServer;
use clap::Parser;
use log::{error, info, warn, LevelFilter};

#[derive(Parser)]
#[command(name = "bandwidth-reporter")]
#[command(version)]
#[command(about = "Per-session bandwidth capture and reporting agent")]
struct Args {
    config_file: String,

    /// One of off, error, warn, info, debug, trace
    #[arg(long, env = "BWR_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = LevelFilter::from_str(&args.log_level).unwrap_or(LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_target(false)
        .init();

    info!("Importing configuration");
    let config = match Config::from_file(Path::new(&args.config_file)) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };
    let collector_address = match config.collector_address() {
        Ok(address) => address,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let client: Arc<dyn ReportClient<BandwidthReport>> =
        Arc::new(TcpReportClient::new(collector_address, &config.collector));
    let job = Arc::new(ReportJob::new(client, &config.report));
    if let Err(e) = job.start() {
        error!("Unable to start report delivery: {}, exiting...", e);
        std::process::exit(1);
    }

    let web_enabled = config.web.enabled;
    let web_address = config.web_bind_address();
    let manager = ReportManager::new(config, Arc::clone(&job), Arc::new(PacketSocketBackend));

    let web = if web_enabled {
        let server = match web_address {
            Ok(address) => WebServer::new(Arc::clone(&manager), address),
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = server.start() {
            error!("{}, exiting...", e);
            std::process::exit(1);
        }
        Some(server)
    } else {
        warn!("Web interface disabled; sessions can only be driven through the library API");
        None
    };

    info!("Bandwidth reporter running, reporting to {}", collector_address);
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    if let Some(web) = &web {
        web.stop();
    }
    manager.shutdown();
    if let Err(e) = job.stop().await {
        error!("Unable to persist pending reports: {}", e);
    }
}
