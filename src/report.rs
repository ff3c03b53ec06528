//! Report production and delivery.
//!
//! A [`ReportTask`](report_task::ReportTask) per session turns aggregated
//! samples into [`BandwidthReport`](types::BandwidthReport)s and hands them to
//! the shared [`ReportJob`](report_job::ReportJob), which delivers them through
//! a [`ReportClient`] at least once and in order.

use async_trait::async_trait;

use crate::error_handling::types::ReportError;
use crate::storage::record::Record;

pub mod report_job;
pub mod report_task;
pub mod tcp_client;
pub mod types;

pub use report_job::ReportJob;
pub use report_task::ReportTask;
pub use tcp_client::TcpReportClient;
pub use types::BandwidthReport;

/// Transport to the remote report collector.
///
/// Errors are treated as transient and the batch is retried, except a
/// record that cannot be encoded into a frame, which is dropped.
#[async_trait]
pub trait ReportClient<R: Record>: Send + Sync {
    async fn send(&self, records: &[R]) -> Result<(), ReportError>;
}
