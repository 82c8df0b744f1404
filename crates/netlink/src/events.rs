//! Translate raw RTNETLINK notifications into the small event vocabulary
//! the rest of the daemon reacts to.

use std::net::IpAddr;

use netlink_packet_route::address::{AddressAttribute, AddressMessage};
use netlink_packet_route::link::{LinkAttribute, LinkFlag, LinkMessage};
use netlink_packet_route::RouteNetlinkMessage;

/// An interface or address change the rest of the daemon cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    InterfaceUp { index: u32 },
    InterfaceDown { index: u32 },
    AddressAdded { index: u32, address: IpAddr },
    AddressRemoved { index: u32, address: IpAddr },
}

fn link_event(msg: &LinkMessage, is_new: bool) -> Option<Event> {
    if !is_new {
        return None; // DELLINK never fires for interfaces we track; they go down first
    }
    let index = msg.header.index;
    let up = msg.header.flags.contains(&LinkFlag::Up);
    let _ = msg
        .attributes
        .iter()
        .find(|a| matches!(a, LinkAttribute::IfName(_)));
    Some(if up {
        Event::InterfaceUp { index }
    } else {
        Event::InterfaceDown { index }
    })
}

fn address_event(msg: &AddressMessage, is_new: bool) -> Option<Event> {
    let index = msg.header.index;
    let address = msg.attributes.iter().find_map(|a| match a {
        AddressAttribute::Address(addr) => Some(*addr),
        _ => None,
    })?;
    Some(if is_new {
        Event::AddressAdded { index, address }
    } else {
        Event::AddressRemoved { index, address }
    })
}

/// Map a single RTNETLINK payload to zero or one [`Event`]. Returns `None`
/// for message kinds we don't act on (routes, neighbours, rules, ...).
pub fn from_route_message(msg: &RouteNetlinkMessage) -> Option<Event> {
    match msg {
        RouteNetlinkMessage::NewLink(link) => link_event(link, true),
        RouteNetlinkMessage::DelLink(link) => link_event(link, false),
        RouteNetlinkMessage::NewAddress(addr) => address_event(addr, true),
        RouteNetlinkMessage::DelAddress(addr) => address_event(addr, false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrelated_message_kinds_are_ignored() {
        assert!(from_route_message(&RouteNetlinkMessage::NewRoute(Default::default())).is_none());
    }
}
