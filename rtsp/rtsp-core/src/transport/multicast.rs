use super::udp::bind_udp_socket;
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Hands out multicast group addresses from a configured CIDR range
pub(crate) struct GroupAllocator {
    base: u32,
    host_bits: u32,
    next: Mutex<u32>,
}

impl GroupAllocator {
    pub(crate) fn new(base: Ipv4Addr, prefix: u8) -> Self {
        Self {
            base: u32::from(base),
            host_bits: 32 - u32::from(prefix),
            next: Mutex::new(0),
        }
    }

    /// Parse a CIDR string like `224.1.0.0/16`
    pub(crate) fn parse(range: &str) -> Option<Self> {
        let (base, prefix) = range.split_once('/')?;

        let base: Ipv4Addr = base.trim().parse().ok()?;
        let prefix: u8 = prefix.trim().parse().ok()?;

        if !(4..=31).contains(&prefix) || !base.is_multicast() {
            return None;
        }

        Some(Self::new(base, prefix))
    }

    pub(crate) fn allocate(&self) -> Ipv4Addr {
        let mut next = self.next.lock();

        // skip the network address, wrap inside the range
        *next = (*next % ((1u32 << self.host_bits) - 1)) + 1;

        Ipv4Addr::from(self.base | *next)
    }
}

/// Socket used by the server to publish one media's RTP or RTCP packets to
/// a multicast group
pub(crate) fn multicast_send_socket(ttl: u32) -> io::Result<UdpSocket> {
    let socket = bind_udp_socket(
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        false,
    )?;

    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;

    Ok(socket)
}

/// Socket used by a client to receive one media's multicast packets.
///
/// The group is joined on the default interface; kernel level fan-out to
/// every interface is left to the host.
pub(crate) fn multicast_recv_socket(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = bind_udp_socket(
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        true,
    )?;

    socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;

    Ok(socket)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_range() {
        assert!(GroupAllocator::parse("224.1.0.0/16").is_some());
        assert!(GroupAllocator::parse("not-a-range").is_none());
        assert!(GroupAllocator::parse("10.0.0.0/16").is_none());
    }

    #[test]
    fn allocate_skips_network_address() {
        let allocator = GroupAllocator::parse("224.1.0.0/24").unwrap();

        assert_eq!(allocator.allocate(), Ipv4Addr::new(224, 1, 0, 1));
        assert_eq!(allocator.allocate(), Ipv4Addr::new(224, 1, 0, 2));
    }

    #[test]
    fn allocate_wraps() {
        let allocator = GroupAllocator::parse("224.1.0.0/30").unwrap();

        assert_eq!(allocator.allocate(), Ipv4Addr::new(224, 1, 0, 1));
        assert_eq!(allocator.allocate(), Ipv4Addr::new(224, 1, 0, 2));
        assert_eq!(allocator.allocate(), Ipv4Addr::new(224, 1, 0, 3));
        assert_eq!(allocator.allocate(), Ipv4Addr::new(224, 1, 0, 1));
    }
}
