//! Link/address command builders sent over a [`crate::socket::NetlinkSocket`].

use std::net::IpAddr;

use common::Result;
use netlink_packet_route::address::{AddressAttribute, AddressHeaderFlag, AddressMessage, AddressScope};
use netlink_packet_route::link::LinkMessage;
use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};

use crate::socket::NetlinkSocket;

fn family_of(addr: IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    }
}

fn address_message(index: u32, addr: IpAddr, prefix_len: u8, secondary: bool) -> AddressMessage {
    let mut msg = AddressMessage::default();
    msg.header.family = family_of(addr);
    msg.header.prefix_len = prefix_len;
    msg.header.index = index;
    msg.header.scope = AddressScope::Universe;
    if secondary {
        msg.header.flags = vec![AddressHeaderFlag::Secondary];
    }
    msg.attributes.push(AddressAttribute::Address(addr));
    if let IpAddr::V4(v4) = addr {
        msg.attributes.push(AddressAttribute::Local(IpAddr::V4(v4)));
        msg.attributes.push(AddressAttribute::Broadcast(v4));
    }
    msg
}

/// Add a VIP to `index`. `secondary` must be set for every VIP after the
/// first on a given interface, matching `IFA_F_SECONDARY` semantics;
/// otherwise the kernel replaces the primary address instead of adding a
/// new one.
pub fn add_address(socket: &mut NetlinkSocket, index: u32, addr: IpAddr, prefix_len: u8, secondary: bool) -> Result<()> {
    let msg = address_message(index, addr, prefix_len, secondary);
    socket.request_ack(RouteNetlinkMessage::NewAddress(msg))
}

pub fn remove_address(socket: &mut NetlinkSocket, index: u32, addr: IpAddr, prefix_len: u8) -> Result<()> {
    let msg = address_message(index, addr, prefix_len, false);
    socket.request_ack(RouteNetlinkMessage::DelAddress(msg))
}

/// Full interface dump, used at startup to learn link indices before the
/// event listener is subscribed.
pub fn dump_links(socket: &mut NetlinkSocket) -> Result<Vec<LinkMessage>> {
    let messages = socket.dump(RouteNetlinkMessage::GetLink(LinkMessage::default()))?;
    Ok(messages
        .into_iter()
        .filter_map(|m| match m {
            RouteNetlinkMessage::NewLink(link) => Some(link),
            _ => None,
        })
        .collect())
}

/// Full address dump, used at startup to reconcile already-present VIPs
/// (e.g. surviving a daemon restart with addresses still configured).
pub fn dump_addresses(socket: &mut NetlinkSocket) -> Result<Vec<AddressMessage>> {
    let messages = socket.dump(RouteNetlinkMessage::GetAddress(AddressMessage::default()))?;
    Ok(messages
        .into_iter()
        .filter_map(|m| match m {
            RouteNetlinkMessage::NewAddress(addr) => Some(addr),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn secondary_flag_set_for_non_primary_vips() {
        let msg = address_message(3, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 24, true);
        assert!(msg.header.flags.contains(&AddressHeaderFlag::Secondary));
    }

    #[test]
    fn primary_vip_has_no_secondary_flag() {
        let msg = address_message(3, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 24, false);
        assert!(!msg.header.flags.contains(&AddressHeaderFlag::Secondary));
    }
}
