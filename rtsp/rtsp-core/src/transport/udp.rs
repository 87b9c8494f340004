use crate::error::RtspError;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Maximum size of a UDP RTP/RTCP payload we accept
pub(crate) const MAX_PACKET_SIZE: usize = 65_535;

const RECV_BUFFER_SIZE: usize = 1 << 20;

const PORT_RANGE: std::ops::Range<u16> = 10_000..65_534;

const RANDOM_BIND_ATTEMPTS: usize = 64;

/// The RTP/RTCP socket pair of one media: RTP on an even port, RTCP on the
/// following odd port
pub(crate) struct UdpPair {
    pub(crate) rtp: Arc<UdpSocket>,
    pub(crate) rtcp: Arc<UdpSocket>,
    pub(crate) rtp_port: u16,
    pub(crate) rtcp_port: u16,
}

impl UdpPair {
    /// Bind a socket pair on `bind_ip`.
    ///
    /// With `preferred` the exact ports are used; otherwise random even
    /// ports are drawn until a free adjacent pair is found.
    pub(crate) async fn bind(
        bind_ip: IpAddr,
        preferred: Option<(u16, u16)>,
    ) -> Result<Self, RtspError> {
        if let Some((rtp_port, rtcp_port)) = preferred {
            let rtp = bind_udp_socket(SocketAddr::new(bind_ip, rtp_port), false)?;
            let rtcp = bind_udp_socket(SocketAddr::new(bind_ip, rtcp_port), false)?;

            return Ok(Self {
                rtp: Arc::new(rtp),
                rtcp: Arc::new(rtcp),
                rtp_port,
                rtcp_port,
            });
        }

        let mut rng = rand::rng();

        for _ in 0..RANDOM_BIND_ATTEMPTS {
            let rtp_port = rng.random_range(PORT_RANGE) & !1;
            let rtcp_port = rtp_port + 1;

            let Ok(rtp) = bind_udp_socket(SocketAddr::new(bind_ip, rtp_port), false) else {
                continue;
            };

            let Ok(rtcp) = bind_udp_socket(SocketAddr::new(bind_ip, rtcp_port), false) else {
                continue;
            };

            return Ok(Self {
                rtp: Arc::new(rtp),
                rtcp: Arc::new(rtcp),
                rtp_port,
                rtcp_port,
            });
        }

        Err(RtspError::NoUdpPortsAvailable)
    }
}

/// Bind a UDP socket with an enlarged receive buffer.
///
/// A failure to enlarge the buffer is logged and ignored, some systems cap
/// it below 1 MiB.
pub(crate) fn bind_udp_socket(
    addr: SocketAddr,
    reuse_address: bool,
) -> io::Result<UdpSocket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        log::warn!("unable to set UDP receive buffer size: {e}");
    }

    if reuse_address {
        socket.set_reuse_address(true)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn bind_random_pair() {
        let pair = UdpPair::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), None)
            .await
            .unwrap();

        assert_eq!(pair.rtp_port % 2, 0);
        assert_eq!(pair.rtcp_port, pair.rtp_port + 1);
    }

    #[tokio::test]
    async fn bind_preferred_pair() {
        // draw a free pair first, then re-bind it explicitly
        let (rtp_port, rtcp_port) = {
            let pair = UdpPair::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), None)
                .await
                .unwrap();

            (pair.rtp_port, pair.rtcp_port)
        };

        let pair = UdpPair::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), Some((rtp_port, rtcp_port)))
            .await
            .unwrap();

        assert_eq!(pair.rtp_port, rtp_port);
    }
}
