//! Minimal link/network/transport header decoding.
//!
//! Only what the collector needs is decoded: hardware addresses, IP
//! addresses and TCP/UDP ports. Anything that does not reach a TCP or UDP
//! header yields `None` and is dropped by the caller.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::types::MacAddr;

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub transport: Transport,
    pub src_port: u16,
    pub dst_port: u16,
}

pub fn parse_frame(frame: &[u8]) -> Option<ParsedFrame> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let dst_mac = MacAddr(frame[0..6].try_into().ok()?);
    let src_mac = MacAddr(frame[6..12].try_into().ok()?);
    let mut ether_type = u16::from_be_bytes([frame[12], frame[13]]);
    let mut offset = ETH_HEADER_LEN;
    if ether_type == ETHERTYPE_VLAN {
        if frame.len() < offset + VLAN_TAG_LEN {
            return None;
        }
        ether_type = u16::from_be_bytes([frame[offset + 2], frame[offset + 3]]);
        offset += VLAN_TAG_LEN;
    }

    let (src_ip, dst_ip, protocol, l4) = match ether_type {
        ETHERTYPE_IPV4 => parse_ipv4(&frame[offset..])?,
        ETHERTYPE_IPV6 => parse_ipv6(&frame[offset..])?,
        _ => return None,
    };

    let transport = match protocol {
        IPPROTO_TCP => Transport::Tcp,
        IPPROTO_UDP => Transport::Udp,
        _ => return None,
    };
    let min_len = match transport {
        Transport::Tcp => 20,
        Transport::Udp => 8,
    };
    if l4.len() < min_len {
        return None;
    }

    Some(ParsedFrame {
        src_mac,
        dst_mac,
        src_ip,
        dst_ip,
        transport,
        src_port: u16::from_be_bytes([l4[0], l4[1]]),
        dst_port: u16::from_be_bytes([l4[2], l4[3]]),
    })
}

fn parse_ipv4(packet: &[u8]) -> Option<(IpAddr, IpAddr, u8, &[u8])> {
    if packet.len() < IPV4_MIN_HEADER {
        return None;
    }
    let version_ihl = packet[0];
    if version_ihl >> 4 != 4 {
        return None;
    }
    let ihl = ((version_ihl & 0x0f) as usize) * 4;
    if ihl < IPV4_MIN_HEADER || packet.len() < ihl {
        return None;
    }
    // non-first fragments carry no transport header
    let fragment_offset = u16::from_be_bytes([packet[6], packet[7]]) & 0x1fff;
    if fragment_offset != 0 {
        return None;
    }
    let protocol = packet[9];
    let src: [u8; 4] = packet[12..16].try_into().ok()?;
    let dst: [u8; 4] = packet[16..20].try_into().ok()?;
    Some((
        IpAddr::V4(Ipv4Addr::from(src)),
        IpAddr::V4(Ipv4Addr::from(dst)),
        protocol,
        &packet[ihl..],
    ))
}

fn parse_ipv6(packet: &[u8]) -> Option<(IpAddr, IpAddr, u8, &[u8])> {
    if packet.len() < IPV6_HEADER_LEN {
        return None;
    }
    if packet[0] >> 4 != 6 {
        return None;
    }
    let next_header = packet[6];
    let src: [u8; 16] = packet[8..24].try_into().ok()?;
    let dst: [u8; 16] = packet[24..40].try_into().ok()?;
    Some((
        IpAddr::V6(Ipv6Addr::from(src)),
        IpAddr::V6(Ipv6Addr::from(dst)),
        next_header,
        &packet[IPV6_HEADER_LEN..],
    ))
}
