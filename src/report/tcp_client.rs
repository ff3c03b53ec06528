//! Length-prefixed TCP transport to the report collector.
//!
//! One batch on the wire:
//!
//! ```text
//! client ─▶ [count: u32 LE] ([len: u16 LE][payload]) * count
//! client ◀─ [ack: u8]        0 = accepted, anything else = rejected
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::ReportClient;
use crate::configuration::types::CollectorConfig;
use crate::error_handling::types::ReportError;
use crate::storage::record::{encode_frame, Record};

const ACK_ACCEPTED: u8 = 0;

pub struct TcpReportClient {
    address: SocketAddr,
    connect_timeout: Duration,
    io_timeout: Duration,
    connection: Mutex<Option<TcpStream>>,
}

impl TcpReportClient {
    pub fn new(address: SocketAddr, config: &CollectorConfig) -> Self {
        Self {
            address,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            io_timeout: Duration::from_secs(config.io_timeout_secs),
            connection: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, ReportError> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(self.address))
            .await
            .map_err(|_| ReportError::Timeout)?
            .map_err(ReportError::ConnectionFailed)?;
        stream
            .set_nodelay(true)
            .map_err(ReportError::ConnectionFailed)?;
        info!("Connected to report collector at {}", self.address);
        Ok(stream)
    }
}

#[async_trait]
impl<R: Record> ReportClient<R> for TcpReportClient {
    async fn send(&self, records: &[R]) -> Result<(), ReportError> {
        let mut connection = self.connection.lock().await;
        let mut stream = match connection.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        match timeout(self.io_timeout, send_batch(&mut stream, records)).await {
            Ok(Ok(())) => {
                *connection = Some(stream);
                debug!("Delivered {} report(s) to {}", records.len(), self.address);
                Ok(())
            }
            // a rejection is an application answer, the connection stays good
            Ok(Err(ReportError::Rejected(code))) => {
                *connection = Some(stream);
                Err(ReportError::Rejected(code))
            }
            Ok(Err(e)) => {
                warn!("Dropping connection to {}: {}", self.address, e);
                Err(e)
            }
            Err(_) => {
                warn!("Dropping connection to {}: timed out", self.address);
                Err(ReportError::Timeout)
            }
        }
    }
}

/// Writes one batch to `stream` and waits for its acknowledgement.
pub async fn send_batch<S, R>(stream: &mut S, records: &[R]) -> Result<(), ReportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: Record,
{
    let mut frame = Vec::new();
    frame.extend_from_slice(&(records.len() as u32).to_le_bytes());
    for record in records {
        let payload = encode_frame(record)?;
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(&payload);
    }

    stream
        .write_all(&frame)
        .await
        .map_err(ReportError::ConnectionFailed)?;
    stream.flush().await.map_err(ReportError::ConnectionFailed)?;

    let ack = stream.read_u8().await.map_err(ReportError::ConnectionFailed)?;
    if ack != ACK_ACCEPTED {
        return Err(ReportError::Rejected(ack));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::StorageError;
    use crate::report::types::BandwidthReport;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    #[derive(Debug, Clone, PartialEq)]
    struct Raw(Vec<u8>);

    impl Record for Raw {
        fn encode(&self) -> Result<Vec<u8>, StorageError> {
            Ok(self.0.clone())
        }

        fn decode(data: &[u8]) -> Result<Self, StorageError> {
            Ok(Raw(data.to_vec()))
        }
    }

    #[tokio::test]
    async fn test_send_batch_wire_format() {
        let mut mock = Builder::new()
            .write(&[2, 0, 0, 0, 2, 0, b'h', b'i', 1, 0, b'!'])
            .read(&[0])
            .build();
        let records = vec![Raw(b"hi".to_vec()), Raw(b"!".to_vec())];
        send_batch(&mut mock, &records).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_batch_rejected() {
        let mut mock = Builder::new()
            .write(&[1, 0, 0, 0, 1, 0, b'x'])
            .read(&[7])
            .build();
        assert!(matches!(
            send_batch(&mut mock, &[Raw(b"x".to_vec())]).await,
            Err(ReportError::Rejected(7))
        ));
    }

    #[tokio::test]
    async fn test_send_batch_connection_closed_before_ack() {
        let mut mock = Builder::new().write(&[0, 0, 0, 0]).build();
        assert!(matches!(
            send_batch::<_, Raw>(&mut mock, &[]).await,
            Err(ReportError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_record_is_refused() {
        let mut mock = Builder::new().build();
        let huge = Raw(vec![0u8; 70_000]);
        assert!(matches!(
            send_batch(&mut mock, &[huge]).await,
            Err(ReportError::StorageError(StorageError::FrameTooLarge(70_000)))
        ));
    }

    /// Reads one batch the way the collector does and answers `ack`.
    async fn serve_batch(stream: &mut TcpStream, ack: u8) -> Vec<BandwidthReport> {
        let count = stream.read_u32_le().await.unwrap();
        let mut reports = Vec::new();
        for _ in 0..count {
            let len = stream.read_u16_le().await.unwrap() as usize;
            let mut payload = vec![0u8; len];
            stream.read_exact(&mut payload).await.unwrap();
            reports.push(BandwidthReport::decode(&payload).unwrap());
        }
        stream.write_u8(ack).await.unwrap();
        reports
    }

    fn report(sequence: u32) -> BandwidthReport {
        let session = serde_json::from_str(r#"{"instance_id": "ins-1", "vm_id": 1}"#).unwrap();
        BandwidthReport::new(&session, 0, 10, Default::default(), sequence)
    }

    #[tokio::test]
    async fn test_client_reuses_and_reestablishes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let client = TcpReportClient::new(address, &CollectorConfig::default());

        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let a = serve_batch(&mut first, 0).await;
            let b = serve_batch(&mut first, 3).await;
            drop(first);
            let (mut second, _) = listener.accept().await.unwrap();
            let c = serve_batch(&mut second, 0).await;
            (a, b, c)
        });

        client.send(&[report(0)]).await.unwrap();
        assert!(matches!(
            client.send(&[report(1)]).await,
            Err(ReportError::Rejected(3))
        ));
        // the server hung up: this attempt fails and drops the connection
        let mut result = client.send(&[report(2)]).await;
        if result.is_err() {
            result = client.send(&[report(2)]).await;
        }
        result.unwrap();

        let (a, b, c) = server.await.unwrap();
        assert_eq!(a[0].sequence, 0);
        assert_eq!(b[0].sequence, 1);
        assert_eq!(c[0].sequence, 2);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // bind then drop to get a port nobody listens on
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let client = TcpReportClient::new(address, &CollectorConfig::default());
        assert!(matches!(
            ReportClient::<Raw>::send(&client, &[Raw(vec![1])]).await,
            Err(ReportError::ConnectionFailed(_))
        ));
    }
}
