//! Advertisement framing (RFC 3768 section 5.1, RFC 5798 section 5.2).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::auth::Auth;
use crate::checksum;
use crate::types::{Interval, Version, VRRP_TYPE_ADVERTISEMENT};

/// Minimum header length shared by both versions: version_type, vrid,
/// priority, count_ip, auth_type/rsvd+interval, checksum.
const HEADER_LEN: usize = 8;
const V2_AUTH_TRAILER_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("unsupported version nibble: {0}")]
    BadVersion(u8),
    #[error("unsupported packet type: {0}")]
    BadType(u8),
    #[error("address count {0} does not match IP family for this version")]
    AddressFamilyMismatch(u8),
    #[error("packet length {actual} does not match the {expected} bytes the header implies")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("unknown v2 auth type: {0}")]
    UnknownAuthType(u8),
    #[error("checksum mismatch: computed {computed:#06x}, header said {header:#06x}")]
    BadChecksum { computed: u16, header: u16 },
    #[error("source/destination address family does not match advertised addresses")]
    AddressFamilyConflict,
}

/// A single VRRP advertisement, version-agnostic once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub version: Version,
    pub vrid: u8,
    pub priority: u8,
    pub addresses: Vec<IpAddr>,
    pub interval: Interval,
    pub auth: Auth,
}

impl Advertisement {
    fn address_len(&self) -> usize {
        match self.addresses.first() {
            Some(IpAddr::V4(_)) | None => 4,
            Some(IpAddr::V6(_)) => 16,
        }
    }

    /// Serialize this advertisement, computing the checksum against the
    /// supplied IP source/destination (required for VRRPv3's pseudo-header,
    /// unused for VRRPv2).
    pub fn encode(&self, src: IpAddr, dst: IpAddr) -> Bytes {
        let addr_len = self.address_len();
        let body_len = HEADER_LEN + self.addresses.len() * addr_len;
        let trailer_len = match (self.version, &self.auth) {
            (Version::V2, Auth::Simple(_)) | (Version::V2, Auth::None) | (Version::V2, Auth::IpsecAh) => {
                V2_AUTH_TRAILER_LEN
            }
            (Version::V3, _) => 0,
        };
        let mut buf = BytesMut::with_capacity(body_len + trailer_len);

        buf.extend_from_slice(&[(self.version.as_nibble() << 4) | VRRP_TYPE_ADVERTISEMENT, self.vrid, self.priority, self.addresses.len() as u8]);

        match self.version {
            Version::V2 => {
                buf.extend_from_slice(&[self.auth.type_byte()]);
                let secs = match self.interval {
                    Interval::Seconds(s) => s,
                    Interval::Centiseconds(cs) => (cs / 100).max(1) as u8,
                };
                buf.extend_from_slice(&[secs, 0, 0]); // checksum placeholder
            }
            Version::V3 => {
                let cs = match self.interval {
                    Interval::Centiseconds(cs) => cs,
                    Interval::Seconds(s) => s as u16 * 100,
                } & 0x0FFF;
                buf.extend_from_slice(&cs.to_be_bytes());
                buf.extend_from_slice(&[0, 0]); // checksum placeholder
            }
        }

        for addr in &self.addresses {
            match addr {
                IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
                IpAddr::V6(v6) => buf.extend_from_slice(&v6.octets()),
            }
        }

        if self.version == Version::V2 {
            if let Auth::Simple(secret) = &self.auth {
                buf.extend_from_slice(secret);
            } else {
                buf.extend_from_slice(&[0u8; V2_AUTH_TRAILER_LEN]);
            }
        }

        let pseudo = match self.version {
            Version::V2 => 0,
            Version::V3 => pseudo_header_sum(src, dst, buf.len()),
        };
        let cksum = checksum::compute(&buf, pseudo);
        buf[6] = (cksum >> 8) as u8;
        buf[7] = (cksum & 0xFF) as u8;

        buf.freeze()
    }

    /// Parse an advertisement from `data`, validating length, version,
    /// type and checksum. `src`/`dst` are the IP addresses the datagram
    /// arrived on, needed for the VRRPv3 pseudo-header checksum.
    pub fn decode(data: &[u8], src: IpAddr, dst: IpAddr) -> Result<Self, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(data.len()));
        }

        let version = Version::from_nibble(data[0] >> 4).ok_or(DecodeError::BadVersion(data[0] >> 4))?;
        let packet_type = data[0] & 0x0F;
        if packet_type != VRRP_TYPE_ADVERTISEMENT {
            return Err(DecodeError::BadType(packet_type));
        }

        let vrid = data[1];
        let priority = data[2];
        let count_ip = data[3] as usize;

        let src_is_v6 = matches!(src, IpAddr::V6(_));
        let dst_is_v6 = matches!(dst, IpAddr::V6(_));
        if src_is_v6 != dst_is_v6 {
            return Err(DecodeError::AddressFamilyConflict);
        }
        let addr_len = if src_is_v6 { 16 } else { 4 };

        let (auth, interval) = match version {
            Version::V2 => {
                let auth_type = data[4];
                let secs = data[5];
                let auth = Auth::from_type_byte(auth_type, None).ok_or(DecodeError::UnknownAuthType(auth_type))?;
                (auth, Interval::Seconds(secs.max(1)))
            }
            Version::V3 => {
                let raw = u16::from_be_bytes([data[4], data[5]]) & 0x0FFF;
                (Auth::None, Interval::Centiseconds(raw))
            }
        };

        let header_checksum = u16::from_be_bytes([data[6], data[7]]);

        let expected_trailer = if version == Version::V2 { V2_AUTH_TRAILER_LEN } else { 0 };
        let expected_len = HEADER_LEN + count_ip * addr_len + expected_trailer;
        if data.len() != expected_len {
            return Err(DecodeError::LengthMismatch {
                expected: expected_len,
                actual: data.len(),
            });
        }
        if count_ip == 0 {
            return Err(DecodeError::AddressFamilyMismatch(data[3]));
        }

        let pseudo = match version {
            Version::V2 => 0,
            Version::V3 => pseudo_header_sum(src, dst, HEADER_LEN + count_ip * addr_len),
        };
        let body_end = HEADER_LEN + count_ip * addr_len;
        let computed = checksum::compute(&data[..body_end], pseudo);
        if computed != header_checksum {
            return Err(DecodeError::BadChecksum {
                computed,
                header: header_checksum,
            });
        }

        let mut addresses = Vec::with_capacity(count_ip);
        let mut offset = HEADER_LEN;
        for _ in 0..count_ip {
            let addr = if addr_len == 4 {
                IpAddr::V4(Ipv4Addr::new(data[offset], data[offset + 1], data[offset + 2], data[offset + 3]))
            } else {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&data[offset..offset + 16]);
                IpAddr::V6(Ipv6Addr::from(octets))
            };
            addresses.push(addr);
            offset += addr_len;
        }

        let auth = if version == Version::V2 {
            let trailer_start = offset;
            let mut trailer = [0u8; V2_AUTH_TRAILER_LEN];
            trailer.copy_from_slice(&data[trailer_start..trailer_start + V2_AUTH_TRAILER_LEN]);
            match auth {
                Auth::Simple(_) => Auth::Simple(trailer),
                other => other,
            }
        } else {
            auth
        };

        Ok(Advertisement {
            version,
            vrid,
            priority,
            addresses,
            interval,
            auth,
        })
    }
}

fn pseudo_header_sum(src: IpAddr, dst: IpAddr, vrrp_len: usize) -> u32 {
    match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => checksum::pseudo_header_sum_v4(s, d, vrrp_len),
        (IpAddr::V6(s), IpAddr::V6(d)) => checksum::pseudo_header_sum_v6(s, d, vrrp_len),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn v3_round_trip_v6() {
        let advert = Advertisement {
            version: Version::V3,
            vrid: 7,
            priority: 100,
            addresses: vec![IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))],
            interval: Interval::Centiseconds(100),
            auth: Auth::None,
        };
        let src = IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2));
        let dst = IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x12));
        let bytes = advert.encode(src, dst);
        let decoded = Advertisement::decode(&bytes, src, dst).unwrap();
        assert_eq!(decoded, advert);
    }

    #[test]
    fn v2_auth_mismatch_breaks_decode() {
        let advert = Advertisement {
            version: Version::V2,
            vrid: 1,
            priority: 200,
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1))],
            interval: Interval::Seconds(1),
            auth: Auth::simple_from_password("hunter2"),
        };
        let src = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 2));
        let dst = IpAddr::V4(Ipv4Addr::new(224, 0, 0, 18));
        let mut bytes = advert.encode(src, dst).to_vec();
        bytes[4] = 99; // corrupt auth type
        let err = Advertisement::decode(&bytes, src, dst).unwrap_err();
        assert_eq!(err, DecodeError::UnknownAuthType(99));
    }

    #[test]
    fn rejects_truncated_packet() {
        let data = [0x21, 0x01, 100, 1, 0, 1, 0, 0];
        let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let dst = IpAddr::V4(Ipv4Addr::new(224, 0, 0, 18));
        let err = Advertisement::decode(&data, src, dst).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { .. }));
    }
}
