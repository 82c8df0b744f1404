//! VRRP wire protocol (RFC 3768 / RFC 5798): advertisement framing,
//! authentication and checksum.
//!
//! This crate only knows about bytes on the wire. It has no notion of
//! sockets, timers or state machines — those live in the `vrrp` crate.

mod auth;
mod checksum;
mod packet;
mod types;

pub use auth::Auth;
pub use checksum::{pseudo_header_sum_v4, pseudo_header_sum_v6};
pub use packet::{DecodeError, Advertisement};
pub use types::{
    Interval, Version, VRRP_MULTICAST_ADDR_V4, VRRP_MULTICAST_ADDR_V6, VRRP_PROTOCOL,
    VRRP_TYPE_ADVERTISEMENT,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn v2_round_trip() {
        let advert = Advertisement {
            version: Version::V2,
            vrid: 51,
            priority: 150,
            addresses: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 100))],
            interval: Interval::Seconds(1),
            auth: Auth::None,
        };
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let dst = IpAddr::V4(Ipv4Addr::new(224, 0, 0, 18));
        let bytes = advert.encode(src, dst);
        let decoded = Advertisement::decode(&bytes, src, dst).unwrap();
        assert_eq!(decoded, advert);
    }
}
