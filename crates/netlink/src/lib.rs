//! RTNETLINK plumbing: a command socket for link/address changes plus a
//! background listener that turns multicast notifications into [`Event`]s.
//!
//! Mirrors the split the rest of this workspace uses elsewhere between a
//! thin synchronous socket wrapper and an async task that owns it.

mod commands;
mod events;
mod socket;

pub use commands::{add_address, dump_addresses, dump_links, remove_address};
pub use events::Event;
pub use socket::NetlinkSocket;

use common::{Error, Result};
use netlink_packet_core::NetlinkMessage;
use netlink_packet_route::RouteNetlinkMessage;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Spawn the background listener and return the command socket plus the
/// channel it will publish [`Event`]s on. Call [`dump_links`]/
/// [`dump_addresses`] on the returned command socket *before* consuming
/// events, so the initial reconciliation sees a consistent snapshot.
pub fn spawn(mut notify_socket: NetlinkSocket) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; 8192];
        loop {
            let len = match notify_socket.recv_raw(&mut buf) {
                Ok(len) => len,
                Err(e) => {
                    warn!(error = %e, "netlink listener read failed, stopping");
                    return;
                }
            };

            let message = match NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[..len]) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "failed to parse netlink notification, dropping");
                    continue;
                }
            };

            if let netlink_packet_core::NetlinkPayload::InnerMessage(inner) = message.payload {
                if let Some(event) = events::from_route_message(&inner) {
                    trace!(?event, "netlink event");
                    if tx.send(event).is_err() {
                        return; // receiver dropped, daemon is shutting down
                    }
                }
            }
        }
    });

    rx
}

/// Open the pair of sockets the daemon needs: one subscribed to
/// notifications, one left clean for request/ack command exchanges.
pub fn open() -> Result<(NetlinkSocket, NetlinkSocket)> {
    let notify = NetlinkSocket::new()?;
    let commands = NetlinkSocket::new_command_only()
        .map_err(|e| Error::netlink(format!("failed to open command socket: {e}")))?;
    Ok((notify, commands))
}
