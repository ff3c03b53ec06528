use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::session::Session;
use crate::storage::record::Record;

/// One reporting interval's usage for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthReport {
    /// Unique per record, lets the collector drop re-deliveries
    pub report_id: Uuid,
    pub session_key: String,
    pub instance_id: String,
    pub vm_id: i64,
    pub flow_id: String,
    pub biz_id: i64,
    pub gid: i64,
    pub area_type: i32,
    pub idc: String,
    pub window_start: i64,
    pub window_end: i64,
    /// Bytes exchanged with the stream IP on any port
    pub total_up_bytes: u64,
    pub total_down_bytes: u64,
    /// Bytes exchanged on the declared stream ports only
    pub stream_up_bytes: u64,
    pub stream_down_bytes: u64,
    pub sequence: u32,
}

/// Byte totals computed by one task tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub total_up: u64,
    pub total_down: u64,
    pub stream_up: u64,
    pub stream_down: u64,
}

impl BandwidthReport {
    pub fn new(
        session: &Session,
        window_start: i64,
        window_end: i64,
        usage: Usage,
        sequence: u32,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            session_key: session.key().to_string(),
            instance_id: session.instance_id.clone(),
            vm_id: session.vm_id,
            flow_id: session.flow_id.clone(),
            biz_id: session.biz_id,
            gid: session.gid,
            area_type: session.area_type,
            idc: session.idc.clone(),
            window_start,
            window_end,
            total_up_bytes: usage.total_up,
            total_down_bytes: usage.total_down,
            stream_up_bytes: usage.stream_up,
            stream_down_bytes: usage.stream_down,
            sequence,
        }
    }
}

impl Record for BandwidthReport {
    fn encode(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(self).map_err(|e| StorageError::EncodeFailed(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<Self, StorageError> {
        serde_json::from_slice(data).map_err(|e| StorageError::DecodeFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_carries_session_identity() {
        let session: Session = serde_json::from_str(
            r#"{"instance_id": "ins-7", "vm_id": 42, "flow_id": "f", "biz_id": 3, "gid": 9}"#,
        )
        .unwrap();
        let usage = Usage {
            total_up: 10,
            total_down: 20,
            stream_up: 1,
            stream_down: 2,
        };
        let report = BandwidthReport::new(&session, 100, 200, usage, 4);
        assert_eq!(report.session_key, "ins-7-42");
        assert_eq!((report.biz_id, report.gid), (3, 9));
        assert_eq!(report.stream_down_bytes, 2);

        let other = BandwidthReport::new(&session, 100, 200, usage, 4);
        assert_ne!(report.report_id, other.report_id);

        let decoded = BandwidthReport::decode(&report.encode().unwrap()).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            BandwidthReport::decode(b"\x00\x01not json"),
            Err(StorageError::DecodeFailed(_))
        ));
    }
}
