//! Raw IPv4/IPv6 VRRP socket: multicast join/leave, TTL/hop-limit pinning,
//! and send/receive of [`vrrp_proto::Advertisement`] frames.

use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::AsRawFd;

use common::{Error, Result};
use socket2::{Domain, Protocol, Socket, Type};
use vrrp_proto::{Advertisement, VRRP_MULTICAST_ADDR_V4, VRRP_MULTICAST_ADDR_V6, VRRP_PROTOCOL};

/// One raw socket per (interface, family), shared across every instance
/// configured on that interface/family pair.
pub struct VrrpSocket {
    socket: Socket,
    interface_index: u32,
    is_ipv6: bool,
}

impl VrrpSocket {
    pub fn new(interface_name: &str, interface_index: u32, is_ipv6: bool) -> Result<Self> {
        let domain = if is_ipv6 { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::RAW, Some(Protocol::from(VRRP_PROTOCOL as i32)))
            .map_err(|e| Error::vrrp(format!("failed to create raw VRRP socket: {e}")))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| Error::vrrp(format!("failed to set non-blocking: {e}")))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::vrrp(format!("failed to set SO_REUSEADDR: {e}")))?;

        let fd = socket.as_raw_fd();
        unsafe {
            if is_ipv6 {
                set_sockopt(fd, libc::IPPROTO_IPV6, libc::IPV6_UNICAST_HOPS, 255)?;
                set_sockopt(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_HOPS, 255)?;
                set_sockopt(fd, libc::IPPROTO_IPV6, libc::IPV6_MULTICAST_LOOP, 0)?;
                set_sockopt(fd, libc::IPPROTO_IPV6, libc::IPV6_RECVHOPLIMIT, 1)?;
            } else {
                set_sockopt(fd, libc::IPPROTO_IP, libc::IP_TTL, 255)?;
                set_sockopt(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_TTL, 255)?;
                set_sockopt(fd, libc::IPPROTO_IP, libc::IP_MULTICAST_LOOP, 0)?;
                set_sockopt(fd, libc::IPPROTO_IP, libc::IP_RECVTTL, 1)?;
            }
        }

        let _ = interface_name; // kept for diagnostics/logging by callers

        Ok(Self {
            socket,
            interface_index,
            is_ipv6,
        })
    }

    pub fn join_multicast(&self) -> Result<()> {
        let fd = self.socket.as_raw_fd();
        unsafe {
            if self.is_ipv6 {
                let mcast: Ipv6Addr = VRRP_MULTICAST_ADDR_V6.parse().unwrap();
                let mreq = libc::ipv6_mreq {
                    ipv6mr_multiaddr: libc::in6_addr { s6_addr: mcast.octets() },
                    ipv6mr_interface: self.interface_index,
                };
                setsockopt_struct(fd, libc::IPPROTO_IPV6, libc::IPV6_ADD_MEMBERSHIP, &mreq)?;
            } else {
                let mcast: Ipv4Addr = VRRP_MULTICAST_ADDR_V4.parse().unwrap();
                let mreq = libc::ip_mreqn {
                    imr_multiaddr: libc::in_addr { s_addr: u32::from_be_bytes(mcast.octets()) },
                    imr_address: libc::in_addr { s_addr: 0 },
                    imr_ifindex: self.interface_index as i32,
                };
                setsockopt_struct(fd, libc::IPPROTO_IP, libc::IP_ADD_MEMBERSHIP, &mreq)?;
            }
        }
        Ok(())
    }

    pub fn leave_multicast(&self) -> Result<()> {
        let fd = self.socket.as_raw_fd();
        unsafe {
            if self.is_ipv6 {
                let mcast: Ipv6Addr = VRRP_MULTICAST_ADDR_V6.parse().unwrap();
                let mreq = libc::ipv6_mreq {
                    ipv6mr_multiaddr: libc::in6_addr { s6_addr: mcast.octets() },
                    ipv6mr_interface: self.interface_index,
                };
                setsockopt_struct(fd, libc::IPPROTO_IPV6, libc::IPV6_DROP_MEMBERSHIP, &mreq)?;
            } else {
                let mcast: Ipv4Addr = VRRP_MULTICAST_ADDR_V4.parse().unwrap();
                let mreq = libc::ip_mreqn {
                    imr_multiaddr: libc::in_addr { s_addr: u32::from_be_bytes(mcast.octets()) },
                    imr_address: libc::in_addr { s_addr: 0 },
                    imr_ifindex: self.interface_index as i32,
                };
                setsockopt_struct(fd, libc::IPPROTO_IP, libc::IP_DROP_MEMBERSHIP, &mreq)?;
            }
        }
        Ok(())
    }

    fn multicast_dst(&self) -> IpAddr {
        if self.is_ipv6 {
            VRRP_MULTICAST_ADDR_V6.parse().unwrap()
        } else {
            VRRP_MULTICAST_ADDR_V4.parse().unwrap()
        }
    }

    pub fn send(&self, advert: &Advertisement, src_ip: IpAddr) -> Result<()> {
        let dst = self.multicast_dst();
        let bytes = advert.encode(src_ip, dst);
        let dst_addr: SocketAddr = (dst, 0).into();
        self.socket
            .send_to(&bytes, &dst_addr.into())
            .map_err(|e| Error::vrrp(format!("failed to send VRRP advertisement: {e}")))?;
        Ok(())
    }

    /// Receive one datagram without blocking. Returns `(payload, src_ip,
    /// ttl_or_hop_limit)`, the TTL/hop-limit read from ancillary control
    /// data (`IP_RECVTTL` / `IPV6_RECVHOPLIMIT`, enabled in [`Self::new`]).
    /// If the kernel doesn't attach the control message for some reason,
    /// 255 is reported rather than failing validation for a platform
    /// limitation unrelated to the peer's packet.
    pub fn try_recv(&self) -> Result<Option<(Vec<u8>, IpAddr, u8)>> {
        let fd = self.socket.as_raw_fd();
        let mut buf = [0u8; 1500];
        let mut cmsg_buf = [0u8; 128];
        let mut name_buf: libc::sockaddr_storage = unsafe { std::mem::zeroed() };

        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };

        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = &mut name_buf as *mut _ as *mut libc::c_void;
        msg.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as u32;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_buf.len() as _;

        let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(Error::vrrp(format!("failed to receive VRRP datagram: {err}")));
        }

        let src_ip = unsafe { sockaddr_storage_to_ip(&name_buf) }
            .ok_or_else(|| Error::vrrp("received datagram with no usable source address"))?;
        let ttl = unsafe { extract_ttl(&msg) }.unwrap_or(255);

        Ok(Some((buf[..n as usize].to_vec(), src_ip, ttl)))
    }
}

impl Drop for VrrpSocket {
    fn drop(&mut self) {
        let _ = self.leave_multicast();
    }
}

unsafe fn sockaddr_storage_to_ip(storage: &libc::sockaddr_storage) -> Option<IpAddr> {
    match storage.ss_family as i32 {
        libc::AF_INET => {
            let addr: libc::sockaddr_in = std::ptr::read(storage as *const _ as *const libc::sockaddr_in);
            Some(IpAddr::V4(Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr))))
        }
        libc::AF_INET6 => {
            let addr: libc::sockaddr_in6 = std::ptr::read(storage as *const _ as *const libc::sockaddr_in6);
            Some(IpAddr::V6(Ipv6Addr::from(addr.sin6_addr.s6_addr)))
        }
        _ => None,
    }
}

/// Walk the control-message buffer for `IP_TTL` / `IPV6_HOPLIMIT`, each
/// delivered as a single `c_int` once `IP(V6)_RECV{TTL,HOPLIMIT}` is set
/// on the socket (done in [`VrrpSocket::new`]).
unsafe fn extract_ttl(msg: &libc::msghdr) -> Option<u8> {
    let mut cmsg = libc::CMSG_FIRSTHDR(msg);
    while !cmsg.is_null() {
        let hdr = &*cmsg;
        let is_ttl = (hdr.cmsg_level == libc::IPPROTO_IP && hdr.cmsg_type == libc::IP_TTL)
            || (hdr.cmsg_level == libc::IPPROTO_IPV6 && hdr.cmsg_type == libc::IPV6_HOPLIMIT);
        if is_ttl {
            let data = libc::CMSG_DATA(cmsg) as *const libc::c_int;
            return Some((*data) as u8);
        }
        cmsg = libc::CMSG_NXTHDR(msg as *const libc::msghdr as *mut libc::msghdr, cmsg);
    }
    None
}

unsafe fn set_sockopt(fd: i32, level: i32, name: i32, value: i32) -> Result<()> {
    let rc = libc::setsockopt(
        fd,
        level,
        name,
        &value as *const _ as *const libc::c_void,
        std::mem::size_of::<i32>() as libc::socklen_t,
    );
    if rc < 0 {
        return Err(Error::vrrp(format!("setsockopt failed: {}", io::Error::last_os_error())));
    }
    Ok(())
}

unsafe fn setsockopt_struct<T>(fd: i32, level: i32, name: i32, value: &T) -> Result<()> {
    let rc = libc::setsockopt(
        fd,
        level,
        name,
        value as *const _ as *const libc::c_void,
        std::mem::size_of::<T>() as libc::socklen_t,
    );
    if rc < 0 {
        return Err(Error::vrrp(format!("setsockopt failed: {}", io::Error::last_os_error())));
    }
    Ok(())
}

pub fn interface_index(name: &str) -> Result<u32> {
    use std::ffi::CString;
    let c_name = CString::new(name).map_err(|e| Error::vrrp(format!("invalid interface name: {e}")))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(Error::vrrp(format!("interface {name} not found")));
    }
    Ok(index)
}
