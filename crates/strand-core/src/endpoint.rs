//! Socket endpoint value type.
//!
//! [`Endpoint`] is an IP address plus port with the exact memory layout of
//! the kernel's `sockaddr_in` / `sockaddr_in6`, so a pointer to it can be
//! handed to socket calls without conversion. Port, flowinfo and scope id
//! are stored in wire order; accessors convert on the way in and out.

use std::fmt;
use std::mem;

use crate::ip::IpAddress;

#[repr(C)]
#[derive(Clone, Copy)]
struct V4Part {
    address: [u8; 4],
    zero: [u8; 8],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct V6Part {
    flowinfo: u32,
    address: [u8; 16],
    scope_id: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
union AddrPart {
    v4: V4Part,
    v6: V6Part,
}

/// An Internet socket address, layout-compatible with `sockaddr_in` and
/// `sockaddr_in6`.
///
/// A zeroed endpoint (from [`Endpoint::default`]) carries family 0 and is
/// only useful as an output slot for accept-style calls.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Endpoint {
    family: u16,
    /// Wire order.
    port: u16,
    addr: AddrPart,
}

// Layout checks against the kernel structures.
const _: () = assert!(mem::size_of::<Endpoint>() == mem::size_of::<libc::sockaddr_in6>());
const _: () = assert!(mem::size_of::<V4Part>() + 4 == mem::size_of::<libc::sockaddr_in>());

impl Endpoint {
    /// Build an endpoint from an IP address and a host-endian port.
    pub fn new(ip: IpAddress, port: u16) -> Self {
        let mut endpoint = Self::default();
        endpoint.set_ip_address(ip);
        endpoint.set_port(port);
        endpoint
    }

    #[inline]
    pub fn is_ipv4(&self) -> bool {
        self.family == libc::AF_INET as u16
    }

    #[inline]
    pub fn is_ipv6(&self) -> bool {
        self.family == libc::AF_INET6 as u16
    }

    /// Raw address family (`AF_INET` / `AF_INET6`).
    #[inline]
    pub fn family(&self) -> u16 {
        self.family
    }

    /// The IP address stored in this endpoint. Meaningless for a zeroed
    /// endpoint that has not been filled in.
    pub fn ip_address(&self) -> IpAddress {
        if self.is_ipv6() {
            // Safety: family selects the active union variant.
            let v6 = unsafe { self.addr.v6 };
            IpAddress::v6_from_bytes(v6.address)
        } else {
            let v4 = unsafe { self.addr.v4 };
            IpAddress::v4(v4.address[0], v4.address[1], v4.address[2], v4.address[3])
        }
    }

    /// Replace the IP address, switching family if needed. The v6 flowinfo
    /// and scope id are cleared when switching into IPv6.
    pub fn set_ip_address(&mut self, ip: IpAddress) {
        if ip.is_ipv6() {
            self.family = libc::AF_INET6 as u16;
            let mut v6 = V6Part {
                flowinfo: 0,
                address: [0; 16],
                scope_id: 0,
            };
            v6.address.copy_from_slice(ip.as_bytes());
            self.addr = AddrPart { v6 };
        } else {
            self.family = libc::AF_INET as u16;
            let mut v4 = V4Part {
                address: [0; 4],
                zero: [0; 8],
            };
            v4.address.copy_from_slice(ip.as_bytes());
            self.addr = AddrPart { v4 };
        }
    }

    /// Port in host endian.
    #[inline]
    pub fn port(&self) -> u16 {
        u16::from_be(self.port)
    }

    /// Set the port from a host-endian value.
    #[inline]
    pub fn set_port(&mut self, port: u16) {
        self.port = port.to_be();
    }

    /// IPv6 flow information in host endian. Meaningful only for IPv6.
    #[inline]
    pub fn flowinfo(&self) -> u32 {
        debug_assert!(self.is_ipv6());
        u32::from_be(unsafe { self.addr.v6.flowinfo })
    }

    /// Set the IPv6 flow information from a host-endian value.
    #[inline]
    pub fn set_flowinfo(&mut self, flowinfo: u32) {
        debug_assert!(self.is_ipv6());
        // Safety: family guards the active variant.
        unsafe {
            self.addr.v6.flowinfo = flowinfo.to_be();
        }
    }

    /// IPv6 scope id in host endian. Meaningful only for IPv6.
    #[inline]
    pub fn scope_id(&self) -> u32 {
        debug_assert!(self.is_ipv6());
        u32::from_be(unsafe { self.addr.v6.scope_id })
    }

    /// Set the IPv6 scope id from a host-endian value.
    #[inline]
    pub fn set_scope_id(&mut self, scope_id: u32) {
        debug_assert!(self.is_ipv6());
        // Safety: family guards the active variant.
        unsafe {
            self.addr.v6.scope_id = scope_id.to_be();
        }
    }

    /// Pointer for passing this endpoint to socket calls.
    #[inline]
    pub fn as_sockaddr(&self) -> *const libc::sockaddr {
        self as *const Endpoint as *const libc::sockaddr
    }

    /// Mutable pointer for accept-style calls that fill the endpoint in.
    #[inline]
    pub fn as_sockaddr_mut(&mut self) -> *mut libc::sockaddr {
        self as *mut Endpoint as *mut libc::sockaddr
    }

    /// Byte length matching the active family, as expected by the kernel.
    #[inline]
    pub fn socklen(&self) -> libc::socklen_t {
        if self.is_ipv6() {
            mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        } else {
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
    }

    /// Full storage length, for output slots whose family is not yet known.
    #[inline]
    pub fn capacity() -> libc::socklen_t {
        mem::size_of::<Endpoint>() as libc::socklen_t
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        // Safety: Endpoint is plain old data; all-zero is a valid (empty)
        // representation.
        unsafe { mem::zeroed() }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        if self.family != other.family || self.port != other.port {
            return false;
        }

        if self.is_ipv6() {
            let (a, b) = unsafe { (self.addr.v6, other.addr.v6) };
            a.flowinfo == b.flowinfo && a.address == b.address && a.scope_id == b.scope_id
        } else {
            let (a, b) = unsafe { (self.addr.v4, other.addr.v4) };
            a.address == b.address
        }
    }
}

impl Eq for Endpoint {}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{:?}]:{}", self.ip_address(), self.port())
        } else {
            write!(f, "{:?}:{}", self.ip_address(), self.port())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::{IPV4_LOOPBACK, IPV6_LOOPBACK};

    #[test]
    fn v4_roundtrip() {
        let endpoint = Endpoint::new(IPV4_LOOPBACK, 8080);

        assert!(endpoint.is_ipv4());
        assert!(!endpoint.is_ipv6());
        assert_eq!(endpoint.port(), 8080);
        assert_eq!(endpoint.ip_address(), IPV4_LOOPBACK);
        assert_eq!(endpoint.ip_address(), "127.0.0.1".parse().unwrap());
        assert_eq!(endpoint, Endpoint::new(IPV4_LOOPBACK, 8080));
    }

    #[test]
    fn v6_roundtrip() {
        let mut endpoint = Endpoint::new(IPV6_LOOPBACK, 23333);

        assert!(endpoint.is_ipv6());
        assert_eq!(endpoint.port(), 23333);
        assert_eq!(endpoint.ip_address(), IPV6_LOOPBACK);

        endpoint.set_flowinfo(7);
        endpoint.set_scope_id(3);
        assert_eq!(endpoint.flowinfo(), 7);
        assert_eq!(endpoint.scope_id(), 3);
    }

    #[test]
    fn inequality() {
        let base = Endpoint::new(IPV4_LOOPBACK, 8080);

        assert_ne!(base, Endpoint::new(IPV4_LOOPBACK, 8081));
        assert_ne!(base, Endpoint::new("127.0.0.2".parse().unwrap(), 8080));
        // Same port, different family.
        assert_ne!(base, Endpoint::new(IPV6_LOOPBACK, 8080));
    }

    #[test]
    fn v6_extras_participate_in_equality() {
        let base = Endpoint::new(IPV6_LOOPBACK, 8080);
        let mut scoped = base;
        scoped.set_scope_id(2);
        assert_ne!(base, scoped);
    }

    #[test]
    fn port_is_stored_in_wire_order() {
        let endpoint = Endpoint::new(IPV4_LOOPBACK, 0x1234);
        // First two bytes after the family are the big-endian port.
        let raw: [u8; 4] = unsafe {
            std::slice::from_raw_parts(endpoint.as_sockaddr() as *const u8, 4)
                .try_into()
                .unwrap()
        };
        assert_eq!(raw[2], 0x12);
        assert_eq!(raw[3], 0x34);
    }

    #[test]
    fn socklen_matches_family() {
        let v4 = Endpoint::new(IPV4_LOOPBACK, 1);
        let v6 = Endpoint::new(IPV6_LOOPBACK, 1);
        assert_eq!(v4.socklen() as usize, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(v6.socklen() as usize, mem::size_of::<libc::sockaddr_in6>());
    }
}
