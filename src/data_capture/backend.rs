//! Seam between collectors and the platform capture facility.
//!
//! A [`CaptureBackend`] enumerates interfaces and opens one
//! [`CaptureSource`] per interface. The production backend is the raw packet
//! socket in [`super::packet_socket`]; tests substitute an in-memory one.

use std::io;

use super::types::NetworkInterface;
use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::CaptureError;

/// An open, promiscuous capture handle bound to one interface.
pub trait CaptureSource: Send {
    /// Copies the next frame into `buf` and returns its length.
    ///
    /// `Ok(None)` means the read timed out with nothing captured; callers use
    /// it as a chance to observe cancellation.
    fn next_frame(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

pub trait CaptureBackend: Send + Sync {
    fn interfaces(&self, config: &CaptureConfig) -> Result<Vec<NetworkInterface>, CaptureError>;

    fn open(
        &self,
        interface: &NetworkInterface,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureSource>, CaptureError>;
}
