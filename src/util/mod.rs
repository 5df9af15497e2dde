//! Local network enumeration for discovery.

use std::net::Ipv4Addr;

/// A local IPv4 address usable as a discovery source, with the subnet
/// broadcast address the hello packet is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddress {
    pub addr: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

/// Compute the subnet broadcast address for an address/netmask pair.
pub fn subnet_broadcast(addr: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr) | !u32::from(netmask))
}

/// Enumerate local IPv4 addresses suitable for subnet discovery: up,
/// not loopback, not link-local, not multicast.
#[cfg(unix)]
pub fn local_ipv4_addresses() -> Vec<LocalAddress> {
    let mut out = Vec::new();

    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(std::ptr::addr_of_mut!(ifaddrs)) != 0 {
            return out;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;
            current = ifa.ifa_next;

            if ifa.ifa_addr.is_null() {
                continue;
            }
            let flags = ifa.ifa_flags as i32;
            if (flags & libc::IFF_UP) == 0 || (flags & libc::IFF_LOOPBACK) != 0 {
                continue;
            }
            if i32::from((*ifa.ifa_addr).sa_family) != libc::AF_INET {
                continue;
            }

            #[allow(clippy::cast_ptr_alignment)]
            let addr = {
                let sockaddr = ifa.ifa_addr.cast::<libc::sockaddr_in>();
                Ipv4Addr::from(u32::from_be((*sockaddr).sin_addr.s_addr))
            };

            if !usable(addr) {
                continue;
            }

            #[allow(clippy::cast_ptr_alignment)]
            let netmask = if ifa.ifa_netmask.is_null() {
                Ipv4Addr::new(255, 255, 255, 0)
            } else {
                let mask = ifa.ifa_netmask.cast::<libc::sockaddr_in>();
                Ipv4Addr::from(u32::from_be((*mask).sin_addr.s_addr))
            };

            let candidate = LocalAddress {
                addr,
                broadcast: subnet_broadcast(addr, netmask),
            };
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }

        libc::freeifaddrs(ifaddrs);
    }

    out
}

#[cfg(not(unix))]
pub fn local_ipv4_addresses() -> Vec<LocalAddress> {
    vec![]
}

fn usable(addr: Ipv4Addr) -> bool {
    !addr.is_loopback() && !addr.is_link_local() && !addr.is_multicast() && !addr.is_unspecified()
}
