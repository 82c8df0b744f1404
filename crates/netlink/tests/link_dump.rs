//! Exercises the real kernel netlink interface; requires CAP_NET_ADMIN.

use netlink::{dump_links, NetlinkSocket};

macro_rules! skip_unless_enabled {
    () => {
        if std::env::var("NETLINK_TEST_ENABLED").is_err() {
            eprintln!("skipping (requires NETLINK_TEST_ENABLED=1 and CAP_NET_ADMIN)");
            return;
        }
    };
}

#[test]
fn dump_links_includes_loopback() {
    skip_unless_enabled!();

    let mut socket = NetlinkSocket::new_command_only().expect("open netlink socket");
    let links = dump_links(&mut socket).expect("dump links");
    assert!(links.iter().any(|l| l.header.index == 1), "expected loopback at index 1");
}
