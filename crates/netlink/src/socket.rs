//! Low-level NETLINK_ROUTE socket: send a request, match the response by
//! sequence number, retry once on timeout.

use std::time::Duration;

use bytes::BytesMut;
use common::{Error, Result};
use netlink_packet_core::{NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_REQUEST};
use netlink_packet_route::RouteNetlinkMessage;
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tracing::{debug, trace, warn};

/// How long to wait for a kernel ack before retrying once.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 2;

/// Multicast groups this daemon needs to hear about link and address
/// changes. Bit positions per `include/uapi/linux/rtnetlink.h`.
const RTNLGRP_LINK: u32 = 1;
const RTNLGRP_IPV4_IFADDR: u32 = 5;
const RTNLGRP_IPV6_IFADDR: u32 = 9;

fn group_mask(group: u32) -> u32 {
    1 << (group - 1)
}

/// A NETLINK_ROUTE socket used both to issue link/address commands and to
/// listen for the kernel's multicast notifications.
pub struct NetlinkSocket {
    socket: Socket,
    sequence: u32,
}

impl NetlinkSocket {
    /// Open a socket bound to the link/address multicast groups so the
    /// same handle can both send commands and receive notifications.
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::netlink(format!("failed to create netlink socket: {e}")))?;

        let groups = group_mask(RTNLGRP_LINK) | group_mask(RTNLGRP_IPV4_IFADDR) | group_mask(RTNLGRP_IPV6_IFADDR);
        let addr = SocketAddr::new(0, groups);
        socket
            .bind(&addr)
            .map_err(|e| Error::netlink(format!("failed to bind netlink socket: {e}")))?;

        Ok(Self { socket, sequence: 0 })
    }

    /// A second socket used purely for synchronous request/ack exchanges,
    /// left unsubscribed from multicast groups so acks aren't confused
    /// with notification traffic.
    pub fn new_command_only() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::netlink(format!("failed to create netlink socket: {e}")))?;
        socket
            .bind(&SocketAddr::new(0, 0))
            .map_err(|e| Error::netlink(format!("failed to bind netlink socket: {e}")))?;
        Ok(Self { socket, sequence: 0 })
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn send(&mut self, message: &NetlinkMessage<RouteNetlinkMessage>) -> Result<()> {
        let mut buf = BytesMut::with_capacity(message.buffer_len());
        message.serialize(&mut buf);
        trace!(?message, "sending netlink message");
        self.socket
            .send(&buf[..], 0)
            .map_err(|e| Error::netlink(format!("failed to send netlink message: {e}")))?;
        Ok(())
    }

    fn recv_one(&mut self) -> Result<NetlinkMessage<RouteNetlinkMessage>> {
        let mut buf = vec![0u8; 8192];
        let len = self
            .socket
            .recv(&mut buf, 0)
            .map_err(|e| Error::netlink(format!("failed to receive netlink message: {e}")))?;
        let message = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&buf[..len])
            .map_err(|e| Error::netlink(format!("failed to parse netlink message: {e}")))?;
        trace!(?message, "received netlink message");
        Ok(message)
    }

    /// Receive raw bytes off the wire, used by the notification listener
    /// which dispatches on message type rather than matching a sequence.
    pub fn recv_raw(&mut self, mut buf: &mut [u8]) -> Result<usize> {
        self.socket
            .recv(&mut buf, 0)
            .map_err(|e| Error::netlink(format!("failed to receive netlink message: {e}")))
    }

    /// Send a request and block for its ack/error, retrying once after
    /// `ACK_TIMEOUT` if nothing came back.
    pub fn request_ack(&mut self, payload: RouteNetlinkMessage) -> Result<()> {
        let seq = self.next_sequence();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut message = NetlinkMessage::from(payload.clone());
            message.header.flags = NLM_F_REQUEST | NLM_F_ACK;
            message.header.sequence_number = seq;
            message.finalize();

            self.send(&message)?;

            socket2::SockRef::from(&self.socket)
                .set_read_timeout(Some(ACK_TIMEOUT))
                .map_err(|e| Error::netlink(format!("failed to set recv timeout: {e}")))?;

            match self.recv_one() {
                Ok(reply) if reply.header.sequence_number == seq => {
                    return match reply.payload {
                        NetlinkPayload::Error(e) if e.code.is_none() => Ok(()),
                        NetlinkPayload::Error(e) => Err(Error::netlink(format!(
                            "netlink request failed: {:?}",
                            e.code
                        ))),
                        other => Err(Error::netlink(format!(
                            "unexpected netlink reply payload: {other:?}"
                        ))),
                    };
                }
                Ok(_) => {
                    // Stray notification or stale reply; ignore and keep waiting
                    // within this attempt's timeout budget.
                    continue;
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %e, "netlink ack timed out, retrying once");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::netlink("netlink request exhausted retries"))
    }

    pub fn dump(&mut self, payload: RouteNetlinkMessage) -> Result<Vec<RouteNetlinkMessage>> {
        let seq = self.next_sequence();
        let mut message = NetlinkMessage::from(payload);
        message.header.flags = NLM_F_REQUEST | netlink_packet_core::NLM_F_DUMP;
        message.header.sequence_number = seq;
        message.finalize();
        self.send(&message)?;

        let mut out = Vec::new();
        loop {
            let reply = self.recv_one()?;
            if reply.header.sequence_number != seq {
                continue;
            }
            match reply.payload {
                NetlinkPayload::Done(_) => break,
                NetlinkPayload::Error(e) => {
                    return Err(Error::netlink(format!("netlink dump failed: {:?}", e.code)))
                }
                NetlinkPayload::InnerMessage(inner) => out.push(inner),
                other => debug!(?other, "ignoring unexpected dump reply payload"),
            }
        }
        Ok(out)
    }
}
