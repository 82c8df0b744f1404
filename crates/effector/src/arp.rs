//! Gratuitous ARP (RFC 826) for VIP takeover announcements.

use std::net::Ipv4Addr;

use common::{Error, Result};
use tracing::debug;

const ETH_P_ARP: u16 = 0x0806;
const ARP_HTYPE_ETHER: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_OP_REPLY: u16 = 2;
const BROADCAST_MAC: [u8; 6] = [0xff; 6];

/// Build a full Ethernet + ARP-reply frame announcing that `vip` now
/// belongs to `src_mac`. Both sender and target protocol address are set
/// to `vip`, per the gratuitous-ARP convention.
pub fn build_gratuitous_arp(src_mac: [u8; 6], vip: Ipv4Addr) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + 28);

    frame.extend_from_slice(&BROADCAST_MAC);
    frame.extend_from_slice(&src_mac);
    frame.extend_from_slice(&ETH_P_ARP.to_be_bytes());

    frame.extend_from_slice(&ARP_HTYPE_ETHER.to_be_bytes());
    frame.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    frame.push(6); // hardware address length
    frame.push(4); // protocol address length
    frame.extend_from_slice(&ARP_OP_REPLY.to_be_bytes());
    frame.extend_from_slice(&src_mac); // sender hardware address
    frame.extend_from_slice(&vip.octets()); // sender protocol address
    frame.extend_from_slice(&BROADCAST_MAC); // target hardware address
    frame.extend_from_slice(&vip.octets()); // target protocol address

    frame
}

/// A raw AF_PACKET socket bound to one interface, used to send gratuitous
/// ARP frames at layer 2.
pub struct ArpSocket {
    fd: std::os::fd::OwnedFd,
    ifindex: i32,
}

impl ArpSocket {
    pub fn bind(ifindex: i32) -> Result<Self> {
        use std::os::fd::FromRawFd;

        let raw = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW, (ETH_P_ARP as u16).to_be() as i32) };
        if raw < 0 {
            return Err(Error::other(format!(
                "failed to open AF_PACKET socket: {}",
                std::io::Error::last_os_error()
            )));
        }
        let fd = unsafe { std::os::fd::OwnedFd::from_raw_fd(raw) };

        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as u16;
        addr.sll_protocol = (ETH_P_ARP as u16).to_be();
        addr.sll_ifindex = ifindex;

        let rc = unsafe {
            libc::bind(
                std::os::fd::AsRawFd::as_raw_fd(&fd),
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as u32,
            )
        };
        if rc < 0 {
            return Err(Error::other(format!(
                "failed to bind AF_PACKET socket: {}",
                std::io::Error::last_os_error()
            )));
        }

        Ok(Self { fd, ifindex })
    }

    pub fn send_gratuitous(&self, src_mac: [u8; 6], vip: Ipv4Addr) -> Result<()> {
        let frame = build_gratuitous_arp(src_mac, vip);
        debug!(ifindex = self.ifindex, %vip, "sending gratuitous ARP");
        let rc = unsafe {
            libc::send(
                std::os::fd::AsRawFd::as_raw_fd(&self.fd),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if rc < 0 {
            return Err(Error::other(format!(
                "failed to send gratuitous ARP: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_has_sender_and_target_set_to_vip() {
        let mac = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
        let vip = Ipv4Addr::new(10, 0, 0, 100);
        let frame = build_gratuitous_arp(mac, vip);
        assert_eq!(frame.len(), 42);
        assert_eq!(&frame[14 + 14..14 + 18], &vip.octets()); // sender protocol addr
        assert_eq!(&frame[14 + 24..14 + 28], &vip.octets()); // target protocol addr
    }
}
