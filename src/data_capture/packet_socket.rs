//! Raw `AF_PACKET` capture on Linux, plus interface discovery from sysfs.

use std::fs;
use std::io;
use std::path::Path;

use log::debug;

use super::backend::{CaptureBackend, CaptureSource};
use super::types::{MacAddr, NetworkInterface};
use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::CaptureError;

const SYS_CLASS_NET: &str = "/sys/class/net";
const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;

/// Production backend: one promiscuous raw socket per interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct PacketSocketBackend;

impl CaptureBackend for PacketSocketBackend {
    fn interfaces(&self, config: &CaptureConfig) -> Result<Vec<NetworkInterface>, CaptureError> {
        discover_interfaces(Path::new(SYS_CLASS_NET), &config.interfaces)
            .map_err(CaptureError::InterfaceDiscovery)
    }

    fn open(
        &self,
        interface: &NetworkInterface,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureSource>, CaptureError> {
        open_socket(interface, config)
    }
}

/// Lists capture-eligible interfaces under `root` (normally `/sys/class/net`).
///
/// Loopback, administratively down and address-less interfaces are skipped.
/// A non-empty `wanted` list restricts the result to those names.
pub fn discover_interfaces(root: &Path, wanted: &[String]) -> io::Result<Vec<NetworkInterface>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !wanted.is_empty() && !wanted.contains(&name) {
            continue;
        }

        let dir = entry.path();
        let flags = match read_flags(&dir) {
            Some(flags) => flags,
            None => {
                debug!("[{}] unreadable flags, skipping", name);
                continue;
            }
        };
        if flags & IFF_LOOPBACK != 0 || flags & IFF_UP == 0 {
            debug!("[{}] loopback or down, skipping", name);
            continue;
        }

        let mac = match fs::read_to_string(dir.join("address"))
            .ok()
            .and_then(|s| s.trim().parse::<MacAddr>().ok())
        {
            Some(mac) if !mac.is_zero() => mac,
            _ => {
                debug!("[{}] no hardware address, skipping", name);
                continue;
            }
        };
        found.push(NetworkInterface { name, mac });
    }
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

fn read_flags(dir: &Path) -> Option<u32> {
    let raw = fs::read_to_string(dir.join("flags")).ok()?;
    let raw = raw.trim();
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(target_os = "linux")]
fn open_socket(
    interface: &NetworkInterface,
    config: &CaptureConfig,
) -> Result<Box<dyn CaptureSource>, CaptureError> {
    linux::PacketSocket::open(&interface.name, config.read_timeout_ms)
        .map(|socket| Box::new(socket) as Box<dyn CaptureSource>)
        .map_err(|e| CaptureError::OpenFailed(format!("{}: {}", interface.name, e)))
}

#[cfg(not(target_os = "linux"))]
fn open_socket(
    _interface: &NetworkInterface,
    _config: &CaptureConfig,
) -> Result<Box<dyn CaptureSource>, CaptureError> {
    Err(CaptureError::Unsupported)
}

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::CString;
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

    use super::CaptureSource;

    pub struct PacketSocket {
        fd: OwnedFd,
    }

    impl PacketSocket {
        pub fn open(iface: &str, read_timeout_ms: u64) -> io::Result<Self> {
            let protocol = (libc::ETH_P_ALL as u16).to_be();
            let fd = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                    protocol as libc::c_int,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            // closes the descriptor on every early return below
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };

            let ifindex = bind_interface(fd.as_raw_fd(), iface, protocol)?;
            enable_promiscuous(fd.as_raw_fd(), ifindex)?;
            set_read_timeout(fd.as_raw_fd(), read_timeout_ms)?;
            Ok(Self { fd })
        }
    }

    impl CaptureSource for PacketSocket {
        fn next_frame(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if n >= 0 {
                return Ok(Some(n as usize));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                    Ok(None)
                }
                _ => Err(err),
            }
        }
    }

    fn bind_interface(fd: RawFd, iface: &str, protocol: u16) -> io::Result<libc::c_int> {
        let ifname = CString::new(iface)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let ifindex = unsafe { libc::if_nametoindex(ifname.as_ptr()) };
        if ifindex == 0 {
            return Err(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex as libc::c_int;

        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ifindex as libc::c_int)
    }

    fn enable_promiscuous(fd: RawFd, ifindex: libc::c_int) -> io::Result<()> {
        let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
        mreq.mr_ifindex = ifindex;
        mreq.mr_type = libc::PACKET_MR_PROMISC as libc::c_ushort;
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const _ as *const libc::c_void,
                mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_read_timeout(fd: RawFd, timeout_ms: u64) -> io::Result<()> {
        let tv = libc::timeval {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const _ as *const libc::c_void,
                mem::size_of_val(&tv) as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
