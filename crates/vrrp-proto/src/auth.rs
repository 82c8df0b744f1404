//! VRRPv2 authentication (RFC 3768 section 5.3.6).
//!
//! Only `None` and `Simple` are supported on the wire; `IpsecAh` is a
//! recognized but rejected value (kept so decode can report the right
//! error rather than treating it as garbage).

/// Authentication mode carried in a v2 header. Ignored for v3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    Simple([u8; 8]),
    /// Type 2 (IPSec-AH) is recognized but never produced or accepted.
    IpsecAh,
}

impl Auth {
    pub fn type_byte(&self) -> u8 {
        match self {
            Auth::None => 0,
            Auth::Simple(_) => 1,
            Auth::IpsecAh => 2,
        }
    }

    pub fn from_type_byte(byte: u8, trailer: Option<[u8; 8]>) -> Option<Auth> {
        match byte {
            0 => Some(Auth::None),
            1 => Some(Auth::Simple(trailer.unwrap_or([0u8; 8]))),
            2 => Some(Auth::IpsecAh),
            _ => None,
        }
    }

    /// Pack a plaintext password into the 8-byte simple-password field,
    /// null-padded/truncated per RFC 3768.
    pub fn simple_from_password(password: &str) -> Auth {
        let mut buf = [0u8; 8];
        let bytes = password.as_bytes();
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        Auth::Simple(buf)
    }
}
