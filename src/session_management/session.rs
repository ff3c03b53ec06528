use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a session: the workload instance plus the VM it runs in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub instance_id: String,
    pub vm_id: i64,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.instance_id, self.vm_id)
    }
}

/// A port the session streams on, as declared by the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPort {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol_type: String,
    pub port: u16,
}

/// Descriptor of a running workload, supplied by session management.
///
/// Read-only to the reporting pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub instance_id: String,
    pub vm_id: i64,
    #[serde(default)]
    pub flow_id: String,
    #[serde(default)]
    pub biz_id: i64,
    #[serde(default)]
    pub gid: i64,
    #[serde(default)]
    pub area_type: i32,
    /// Machine room the host sits in
    #[serde(default)]
    pub idc: String,
    /// Remote endpoint the session streams to. `None` counts every endpoint
    #[serde(default)]
    pub stream_ip: Option<IpAddr>,
    #[serde(default)]
    pub stream_ports: Vec<StreamPort>,
    #[serde(default = "Utc::now")]
    pub start_time: DateTime<Utc>,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            instance_id: self.instance_id.clone(),
            vm_id: self.vm_id,
        }
    }

    /// Whether traffic on `port` belongs to the stream. No declared ports
    /// means every port does.
    pub fn has_stream_port(&self, port: u16) -> bool {
        self.stream_ports.is_empty() || self.stream_ports.iter().any(|p| p.port == port)
    }

    pub fn has_stream_ip(&self, ip: &IpAddr) -> bool {
        self.stream_ip.map_or(true, |stream_ip| stream_ip == *ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_from_json() {
        let session: Session = serde_json::from_str(
            r#"{
                "instance_id": "ins-7",
                "vm_id": 42,
                "flow_id": "flow-1",
                "stream_ip": "10.0.0.5",
                "stream_ports": [{"name": "video", "protocol_type": "udp", "port": 443}],
                "start_time": "2024-05-01T12:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(session.key().to_string(), "ins-7-42");
        assert_eq!(session.stream_ip, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(session.start_time.timestamp(), 1_714_564_800);
        assert!(session.has_stream_port(443));
        assert!(!session.has_stream_port(80));
        assert_eq!(session.biz_id, 0);
    }

    #[test]
    fn test_unset_filters_match_everything() {
        let session: Session =
            serde_json::from_str(r#"{"instance_id": "ins-1", "vm_id": 1}"#).unwrap();
        assert!(session.has_stream_ip(&"192.0.2.1".parse().unwrap()));
        assert!(session.has_stream_port(1));
    }
}
