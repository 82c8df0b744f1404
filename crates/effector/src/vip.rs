//! VIP programming: track which addresses are already "owned" so the
//! first one added to an interface is primary and the rest carry
//! `IFA_F_SECONDARY`, and so removal is a no-op when nothing is present.

use std::collections::HashSet;
use std::net::IpAddr;

use common::Result;
use netlink::NetlinkSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vip {
    pub address: IpAddr,
    pub prefix_len: u8,
    pub interface_index: u32,
    /// Mirrors the owning instance's VIP-level `dont_track`: a programming
    /// failure for this address is logged but must not force FAULT.
    pub dont_track: bool,
    /// Mirrors the owning instance's `accept_mode`; when false this VIP
    /// gets a sibling nftables rule rejecting non-VRRP traffic arriving on
    /// any interface other than the one it's programmed on.
    pub accept_mode: bool,
}

/// Tracks which VIPs this process has programmed, independent of kernel
/// state, so "enter MASTER" run twice doesn't try to add the same
/// address as primary twice.
#[derive(Default)]
pub struct VipTable {
    programmed: HashSet<Vip>,
}

impl VipTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_primary(&self, interface_index: u32) -> bool {
        self.programmed.iter().any(|v| v.interface_index == interface_index)
    }

    /// Idempotent add: if `vip` is already programmed, this is a no-op.
    pub fn add(&mut self, socket: &mut NetlinkSocket, vip: Vip) -> Result<()> {
        if self.programmed.contains(&vip) {
            return Ok(());
        }
        let secondary = self.has_primary(vip.interface_index);
        netlink::add_address(socket, vip.interface_index, vip.address, vip.prefix_len, secondary)?;
        self.programmed.insert(vip);
        Ok(())
    }

    /// Idempotent remove: removing something not tracked is a success.
    pub fn remove(&mut self, socket: &mut NetlinkSocket, vip: Vip) -> Result<()> {
        if !self.programmed.remove(&vip) {
            return Ok(());
        }
        netlink::remove_address(socket, vip.interface_index, vip.address, vip.prefix_len)
    }

    pub fn is_programmed(&self, vip: &Vip) -> bool {
        self.programmed.contains(vip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn second_vip_on_same_interface_is_secondary() {
        let table = VipTable::new();
        assert!(!table.has_primary(3));
    }

    #[test]
    fn vip_equality_is_by_address_prefix_and_interface() {
        let a = Vip { address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), prefix_len: 24, interface_index: 2, dont_track: false, accept_mode: true };
        let b = Vip { address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), prefix_len: 24, interface_index: 2, dont_track: false, accept_mode: true };
        assert_eq!(a, b);
    }
}
