//! Common data types used across the data_capture subsystem.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Direction of a frame relative to the capturing interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Frame sent by this host (source hardware address is ours).
    Upstream,
    /// Frame addressed to this host (destination hardware address is ours).
    Downstream,
}

/// 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| format!("hardware address '{}' is too short", s))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid octet '{}' in hardware address '{}'", part, s))?;
        }
        if parts.next().is_some() {
            return Err(format!("hardware address '{}' is too long", s));
        }
        Ok(MacAddr(octets))
    }
}

/// A network interface eligible for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub mac: MacAddr,
}

/// Byte counters for one remote endpoint over one collection window.
///
/// Timestamps are unix milliseconds. The window is `[window_start, window_end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub mac_address: MacAddr,
    pub ip: IpAddr,
    pub port: u16,
    pub up_bytes: u64,
    pub down_bytes: u64,
    pub window_start: i64,
    pub window_end: i64,
}

impl Sample {
    pub fn add_bytes(&mut self, len: u64, direction: Direction) {
        match direction {
            Direction::Upstream => self.up_bytes = self.up_bytes.saturating_add(len),
            Direction::Downstream => self.down_bytes = self.down_bytes.saturating_add(len),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.up_bytes.saturating_add(self.down_bytes)
    }
}

/// Sums `(upstream, downstream)` over a batch of samples.
pub fn sum_bytes<'a, I>(samples: I) -> (u64, u64)
where
    I: IntoIterator<Item = &'a Sample>,
{
    samples.into_iter().fold((0u64, 0u64), |(up, down), s| {
        (up.saturating_add(s.up_bytes), down.saturating_add(s.down_bytes))
    })
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
