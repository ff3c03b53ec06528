//! Live packet capture and per-endpoint byte accounting.

pub mod backend;
pub mod capture_filter;
pub mod collector;
pub mod frame_parser;
pub mod packet_socket;
pub mod types;

pub use backend::{CaptureBackend, CaptureSource};
pub use capture_filter::CaptureFilter;
pub use collector::Collector;
pub use packet_socket::PacketSocketBackend;
pub use types::{Direction, MacAddr, NetworkInterface, Sample};
