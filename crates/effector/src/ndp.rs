//! Unsolicited Neighbor Advertisement (RFC 4861 section 7.2.6) for VIP
//! takeover announcements on IPv6.

use std::net::Ipv6Addr;

use common::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

const ICMPV6_TYPE_NA: u8 = 136;
const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

const NA_FLAG_ROUTER: u8 = 0x80;
const NA_FLAG_OVERRIDE: u8 = 0x20;
const NA_OPT_TARGET_LINK_ADDR: u8 = 2;

fn icmp6_checksum(src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in src.octets().chunks(2).chain(dst.octets().chunks(2)) {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    sum += (payload.len() as u32) & 0xFFFF;
    sum += 58; // next header = ICMPv6

    let mut i = 0;
    while i < payload.len() {
        let word = if i + 1 < payload.len() {
            u16::from_be_bytes([payload[i], payload[i + 1]])
        } else {
            u16::from_be_bytes([payload[i], 0])
        };
        sum += word as u32;
        i += 2;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build an unsolicited NA ICMPv6 payload (no IPv6 header; the kernel
/// fills that in for an `IPPROTO_ICMPV6` raw socket).
pub fn build_unsolicited_na(src_mac: [u8; 6], vip: Ipv6Addr, router_flag: bool) -> Vec<u8> {
    let mut body = vec![0u8; 4 + 16]; // flags+reserved, target address
    let mut flags = NA_FLAG_OVERRIDE;
    if router_flag {
        flags |= NA_FLAG_ROUTER;
    }
    body[0] = flags;
    body[4..20].copy_from_slice(&vip.octets());

    body.push(NA_OPT_TARGET_LINK_ADDR);
    body.push(1); // option length in units of 8 bytes
    body.extend_from_slice(&src_mac);

    let mut packet = vec![ICMPV6_TYPE_NA, 0, 0, 0];
    packet.extend_from_slice(&body);

    let src = vip; // source address of an unsolicited NA is the target itself
    let checksum = icmp6_checksum(src, ALL_NODES, &packet);
    packet[2] = (checksum >> 8) as u8;
    packet[3] = (checksum & 0xFF) as u8;

    packet
}

/// A raw ICMPv6 socket bound to one interface for sending unsolicited NAs.
pub struct NdpSocket {
    socket: Socket,
    ifindex: u32,
}

impl NdpSocket {
    pub fn bind(ifindex: u32) -> Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))
            .map_err(|e| Error::other(format!("failed to open ICMPv6 socket: {e}")))?;
        socket
            .set_multicast_if_v6(ifindex)
            .map_err(|e| Error::other(format!("failed to bind ICMPv6 socket to interface: {e}")))?;
        socket
            .set_unicast_hops_v6(255)
            .map_err(|e| Error::other(format!("failed to set hop limit: {e}")))?;
        Ok(Self { socket, ifindex })
    }

    pub fn send_unsolicited_na(&self, src_mac: [u8; 6], vip: Ipv6Addr, router_flag: bool) -> Result<()> {
        let payload = build_unsolicited_na(src_mac, vip, router_flag);
        debug!(ifindex = self.ifindex, %vip, "sending unsolicited NA");
        let dst = std::net::SocketAddrV6::new(ALL_NODES, 0, 0, self.ifindex);
        self.socket
            .send_to(&payload, &dst.into())
            .map_err(|e| Error::other(format!("failed to send NA: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_flag_is_always_set() {
        let mac = [0x02, 0, 0, 0, 0, 1];
        let vip = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let pkt = build_unsolicited_na(mac, vip, false);
        assert_eq!(pkt[4] & NA_FLAG_OVERRIDE, NA_FLAG_OVERRIDE);
        assert_eq!(pkt[4] & NA_FLAG_ROUTER, 0);
    }

    #[test]
    fn router_flag_set_when_requested() {
        let mac = [0x02, 0, 0, 0, 0, 1];
        let vip = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let pkt = build_unsolicited_na(mac, vip, true);
        assert_eq!(pkt[4] & NA_FLAG_ROUTER, NA_FLAG_ROUTER);
    }
}
