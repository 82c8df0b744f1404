//! Side effects of MASTER state: VIP programming, gratuitous ARP /
//! unsolicited NA announcements, and nftables blackhole programming.
//!
//! Kept deliberately dumb: the state machine decides *when* to call
//! these, this crate only knows *how*.

mod arp;
mod ndp;
mod nftables;
mod vip;

pub use arp::{build_gratuitous_arp, ArpSocket};
pub use ndp::{build_unsolicited_na, NdpSocket};
pub use nftables::{AddressFamily, NftSocket};
pub use vip::{Vip, VipTable};

use std::net::IpAddr;
use std::time::Duration;

use common::Result;
use netlink::NetlinkSocket;
use tracing::warn;

/// Default gratuitous ARP / NA announcement behavior (RFC 3768 suggests
/// 5 repeats at 1 s intervals; configurable per instance in practice).
pub struct AnnounceConfig {
    pub count: u32,
    pub interval: Duration,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            count: 5,
            interval: Duration::from_secs(1),
        }
    }
}

/// Owns the sockets needed to effect one interface's MASTER/BACKUP
/// transitions: the shared netlink command socket, an AF_PACKET socket
/// for ARP, an ICMPv6 socket for NA, and the nftables programming socket.
pub struct Effector {
    vips: VipTable,
    nft: Option<NftSocket>,
}

impl Effector {
    pub fn new(enable_nftables: bool) -> Result<Self> {
        let nft = if enable_nftables {
            Some(NftSocket::new()?)
        } else {
            None
        };
        Ok(Self {
            vips: VipTable::new(),
            nft,
        })
    }

    /// Runs the "enter MASTER" procedure for one instance's VIPs. VIP
    /// programming and set-membership are idempotent, satisfying the
    /// "enter MASTER twice == enter once" law; the accept-mode nftables
    /// rule added below that law is not, so callers should only reach
    /// this on a genuine MASTER transition, not a retry of one already in
    /// progress.
    ///
    /// Never short-circuits on the first failure: every VIP is attempted,
    /// and the addresses of the ones that failed with `dont_track == false`
    /// are returned so the caller can force FAULT. A `dont_track` VIP's
    /// failure is only logged.
    pub fn enter_master(&mut self, netlink_socket: &mut NetlinkSocket, vips: &[Vip]) -> Result<Vec<IpAddr>> {
        if let Some(nft) = &mut self.nft {
            for vip in vips {
                let family = match vip.address {
                    IpAddr::V4(_) => AddressFamily::V4,
                    IpAddr::V6(_) => AddressFamily::V6,
                };
                nft.ensure_ruleset(family)?;
                nft.add_vip(vip.address)?;
                if !vip.accept_mode {
                    nft.ensure_accept_chain(family)?;
                    nft.add_accept_mode_rule(family, vip.address, vip.interface_index)?;
                }
            }
        }

        let mut failed = Vec::new();
        for vip in vips {
            if let Err(e) = self.vips.add(netlink_socket, *vip) {
                warn!(address = %vip.address, dont_track = vip.dont_track, error = %e, "failed to program VIP");
                if !vip.dont_track {
                    failed.push(vip.address);
                }
            }
        }

        Ok(failed)
    }

    /// Runs the "leave MASTER" procedure: removes VIPs from the kernel
    /// and drops their blackhole entries. Removing something already
    /// absent is success, satisfying idempotent leave.
    pub fn leave_master(&mut self, netlink_socket: &mut NetlinkSocket, vips: &[Vip]) -> Result<()> {
        for vip in vips {
            self.vips.remove(netlink_socket, *vip)?;
        }
        if let Some(nft) = &mut self.nft {
            for vip in vips {
                nft.remove_vip(vip.address)?;
            }
        }
        Ok(())
    }

    pub fn announce_v4(&self, socket: &ArpSocket, src_mac: [u8; 6], vip: std::net::Ipv4Addr) -> Result<()> {
        socket.send_gratuitous(src_mac, vip)
    }

    pub fn announce_v6(&self, socket: &NdpSocket, src_mac: [u8; 6], vip: std::net::Ipv6Addr, router_flag: bool) -> Result<()> {
        socket.send_unsolicited_na(src_mac, vip, router_flag)
    }
}
