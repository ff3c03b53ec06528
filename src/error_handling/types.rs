use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures raised while opening or running a packet capture.
///
/// `OpenFailed` and `InvalidFilter` are startup failures and are reported to
/// whoever asked for the collector to start. `ReadFailed` only ever shows up
/// in logs: the capture loop skips the packet and keeps going.
#[derive(Debug)]
pub enum CaptureError {
    OpenFailed(String),
    InvalidFilter(String),
    InterfaceDiscovery(std::io::Error),
    Unsupported,
    ReadFailed(std::io::Error),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::OpenFailed(e) => write!(f, "Capture open failed: {}", e),
            CaptureError::InvalidFilter(e) => write!(f, "Invalid capture filter: {}", e),
            CaptureError::InterfaceDiscovery(e) => write!(f, "Interface discovery failed: {}", e),
            CaptureError::Unsupported => {
                write!(f, "Packet capture is not supported on this platform")
            }
            CaptureError::ReadFailed(e) => write!(f, "Packet read failed: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum StorageError {
    NotOpen,
    IoError(std::io::Error),
    EncodeFailed(String),
    DecodeFailed(String),
    FrameTooLarge(usize),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotOpen => write!(f, "Storage is not open"),
            StorageError::IoError(e) => write!(f, "Storage IO error: {}", e),
            StorageError::EncodeFailed(e) => write!(f, "Record encoding failed: {}", e),
            StorageError::DecodeFailed(e) => write!(f, "Record decoding failed: {}", e),
            StorageError::FrameTooLarge(len) => {
                write!(f, "Encoded record of {} bytes does not fit in a frame", len)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ReportError {
    SendFailed(String),
    ConnectionFailed(std::io::Error),
    Rejected(u8),
    Timeout,
    StorageError(StorageError),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::SendFailed(e) => write!(f, "Report send failed: {}", e),
            ReportError::ConnectionFailed(e) => write!(f, "Collector connection failed: {}", e),
            ReportError::Rejected(code) => write!(f, "Collector rejected batch (code {})", code),
            ReportError::Timeout => write!(f, "Collector timed out"),
            ReportError::StorageError(e) => write!(f, "Report storage error: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<StorageError> for ReportError {
    fn from(err: StorageError) -> Self {
        ReportError::StorageError(err)
    }
}

#[derive(Debug)]
pub enum ManagerError {
    CaptureError(CaptureError),
    NoInterfaces,
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::CaptureError(e) => write!(f, "Capture error: {}", e),
            ManagerError::NoInterfaces => write!(f, "No capturable network interface found"),
        }
    }
}

impl std::error::Error for ManagerError {}

impl From<CaptureError> for ManagerError {
    fn from(err: CaptureError) -> Self {
        ManagerError::CaptureError(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}
