//! VRRP wire constants and small value types.

/// VRRP IP protocol number (assigned by IANA).
pub const VRRP_PROTOCOL: u8 = 112;

/// VRRP packet type field (always 1 = ADVERTISEMENT).
pub const VRRP_TYPE_ADVERTISEMENT: u8 = 1;

/// VRRP multicast address for IPv4.
pub const VRRP_MULTICAST_ADDR_V4: &str = "224.0.0.18";

/// VRRP multicast address for IPv6.
pub const VRRP_MULTICAST_ADDR_V6: &str = "ff02::12";

/// Protocol version carried in an advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// RFC 3768.
    V2,
    /// RFC 5798.
    V3,
}

impl Version {
    pub fn as_nibble(self) -> u8 {
        match self {
            Version::V2 => 2,
            Version::V3 => 3,
        }
    }

    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            2 => Some(Version::V2),
            3 => Some(Version::V3),
            _ => None,
        }
    }
}

/// Advertisement interval, unit depends on protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    /// v2: whole seconds, 1 byte on the wire (RFC 3768 Adver_Int).
    Seconds(u8),
    /// v3: centiseconds, 12 bits on the wire (RFC 5798 Max_Adver_Int).
    Centiseconds(u16),
}

impl Interval {
    /// Interval expressed in milliseconds, regardless of version.
    pub fn as_millis(self) -> u64 {
        match self {
            Interval::Seconds(s) => s as u64 * 1000,
            Interval::Centiseconds(cs) => cs as u64 * 10,
        }
    }
}
