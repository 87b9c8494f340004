//! RTSP server engine.
//!
//! A [`Server`] accepts connections, keeps the session table and dispatches
//! requests to a [`ServerHandler`]. Playback data flows through
//! [`ServerStream`], which fans published packets out to all readers.

use crate::error::{Result, RtspError};
use crate::transport::multicast::GroupAllocator;
use crate::transport::udp::{MAX_PACKET_SIZE, bind_udp_socket};
use bytes::Bytes;
use parking_lot::RwLock;
use session::ServerSession;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

mod conn;
mod handler;
mod session;
mod stream;

pub use handler::{ConnCtx, RequestCtx, ServerHandler};
pub use stream::ServerStream;

#[derive(Clone)]
pub struct ServerConfig {
    /// Listen address of the RTSP control connection
    pub rtsp_address: String,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Bind address of the shared RTP socket; `None` disables UDP transport
    pub udp_rtp_address: Option<String>,
    /// Bind address of the shared RTCP socket
    pub udp_rtcp_address: Option<String>,
    /// Multicast group pool in CIDR form, e.g. `224.1.0.0/16`; `None`
    /// disables multicast
    pub multicast_ip_range: Option<String>,
    pub multicast_rtp_port: u16,
    pub multicast_rtcp_port: u16,
    pub multicast_ttl: u32,
    /// Capacity of each reader's write queue
    pub write_queue_size: usize,
    pub session_timeout: Duration,
    pub disable_rtcp_sender_reports: bool,
    /// Realm of the per-connection credential validators
    pub auth_realm: String,
    /// Value of the stamped `Server` header
    pub server_header: String,
    /// Terminate incoming connections with TLS when set
    #[cfg(feature = "tls-native-tls")]
    pub tls_acceptor: Option<tokio_native_tls::native_tls::TlsAcceptor>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rtsp_address: "0.0.0.0:8554".into(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            udp_rtp_address: None,
            udp_rtcp_address: None,
            multicast_ip_range: None,
            multicast_rtp_port: 8002,
            multicast_rtcp_port: 8003,
            multicast_ttl: 16,
            write_queue_size: 256,
            session_timeout: Duration::from_secs(60),
            disable_rtcp_sender_reports: false,
            auth_realm: "strobe".into(),
            server_header: "strobe".into(),
            #[cfg(feature = "tls-native-tls")]
            tls_acceptor: None,
        }
    }
}

/// The shared UDP socket pair, demultiplexing incoming datagrams to
/// sessions by their source address
pub(crate) struct ServerUdp {
    pub(crate) rtp_socket: Arc<UdpSocket>,
    pub(crate) rtcp_socket: Arc<UdpSocket>,
    pub(crate) rtp_port: u16,
    pub(crate) rtcp_port: u16,

    rtp_sources: RwLock<HashMap<SocketAddr, (Weak<ServerSession>, usize)>>,
    rtcp_sources: RwLock<HashMap<SocketAddr, (Weak<ServerSession>, usize)>>,
}

impl ServerUdp {
    pub(crate) fn register(
        &self,
        session: &Arc<ServerSession>,
        media_idx: usize,
        rtp_peer: SocketAddr,
        rtcp_peer: SocketAddr,
    ) {
        self.rtp_sources
            .write()
            .insert(rtp_peer, (Arc::downgrade(session), media_idx));
        self.rtcp_sources
            .write()
            .insert(rtcp_peer, (Arc::downgrade(session), media_idx));
    }

    pub(crate) fn forget_session(&self, session_id: &str) {
        for sources in [&self.rtp_sources, &self.rtcp_sources] {
            sources.write().retain(|_, (session, _)| {
                session
                    .upgrade()
                    .is_some_and(|session| session.id != session_id)
            });
        }
    }

    fn lookup(&self, src: SocketAddr, rtcp: bool) -> Option<(Arc<ServerSession>, usize)> {
        let sources = if rtcp {
            &self.rtcp_sources
        } else {
            &self.rtp_sources
        };

        let (session, media_idx) = sources.read().get(&src)?.clone();

        Some((session.upgrade()?, media_idx))
    }
}

pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) handler: Arc<dyn ServerHandler>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) sessions: RwLock<HashMap<String, Arc<ServerSession>>>,
    pub(crate) udp: Option<ServerUdp>,
    pub(crate) multicast: Option<GroupAllocator>,
    pub(crate) closed: CancellationToken,
    next_conn_id: AtomicU64,
}

impl ServerInner {
    pub(crate) fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// An RTSP server
pub struct Server {
    pub(crate) inner: Arc<ServerInner>,
}

impl Server {
    /// Bind all configured sockets and start accepting connections
    pub async fn new(config: ServerConfig, handler: Arc<dyn ServerHandler>) -> Result<Server> {
        let listener = TcpListener::bind(&config.rtsp_address).await?;
        let local_addr = listener.local_addr()?;

        let udp = match (&config.udp_rtp_address, &config.udp_rtcp_address) {
            (Some(rtp_address), Some(rtcp_address)) => {
                let rtp_address: SocketAddr = rtp_address
                    .parse()
                    .map_err(|_| RtspError::Protocol("invalid udp_rtp_address"))?;
                let rtcp_address: SocketAddr = rtcp_address
                    .parse()
                    .map_err(|_| RtspError::Protocol("invalid udp_rtcp_address"))?;

                let rtp_socket = bind_udp_socket(rtp_address, false)?;
                let rtcp_socket = bind_udp_socket(rtcp_address, false)?;

                Some(ServerUdp {
                    rtp_port: rtp_socket.local_addr()?.port(),
                    rtcp_port: rtcp_socket.local_addr()?.port(),
                    rtp_socket: Arc::new(rtp_socket),
                    rtcp_socket: Arc::new(rtcp_socket),
                    rtp_sources: RwLock::new(HashMap::new()),
                    rtcp_sources: RwLock::new(HashMap::new()),
                })
            }
            (None, None) => None,
            _ => {
                return Err(RtspError::Protocol(
                    "udp_rtp_address and udp_rtcp_address must both be set",
                ));
            }
        };

        let multicast = match &config.multicast_ip_range {
            Some(range) => Some(
                GroupAllocator::parse(range)
                    .ok_or(RtspError::Protocol("invalid multicast_ip_range"))?,
            ),
            None => None,
        };

        let inner = Arc::new(ServerInner {
            config,
            handler,
            local_addr,
            sessions: RwLock::new(HashMap::new()),
            udp,
            multicast,
            closed: CancellationToken::new(),
            next_conn_id: AtomicU64::new(1),
        });

        if inner.udp.is_some() {
            spawn_udp_demux(&inner, false);
            spawn_udp_demux(&inner, true);
        }

        tokio::spawn(accept_loop(inner.clone(), listener));

        Ok(Server { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Stop accepting connections and close every session
    pub async fn close(&self) {
        self.inner.closed.cancel();

        let sessions: Vec<Arc<ServerSession>> =
            self.inner.sessions.write().drain().map(|(_, s)| s).collect();

        for session in sessions {
            session.close("server shutdown").await;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.closed.cancel();
    }
}

async fn accept_loop(inner: Arc<ServerInner>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = inner.closed.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                log::debug!("accepted connection from {peer_addr}");

                let span = tracing::info_span!("rtsp_conn", %peer_addr);

                tokio::spawn(
                    conn::conn_task(inner.clone(), stream, peer_addr).instrument(span),
                );
            }
            Err(e) => {
                log::warn!("accept error: {e}");
            }
        }
    }
}

fn spawn_udp_demux(inner: &Arc<ServerInner>, rtcp: bool) {
    let Some(udp) = &inner.udp else {
        return;
    };

    let socket = if rtcp {
        udp.rtcp_socket.clone()
    } else {
        udp.rtp_socket.clone()
    };

    let inner = inner.clone();

    tokio::spawn(async move {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];

        loop {
            let received = tokio::select! {
                _ = inner.closed.cancelled() => return,
                received = socket.recv_from(&mut buffer) => received,
            };

            let (len, src) = match received {
                Ok(received) => received,
                Err(e) => {
                    log::warn!("UDP receive error: {e}");
                    continue;
                }
            };

            let Some(udp) = &inner.udp else {
                return;
            };

            // unknown sources are silently dropped
            let Some((session, media_idx)) = udp.lookup(src, rtcp) else {
                continue;
            };

            let Some(media) = session.media_by_idx(media_idx) else {
                continue;
            };

            let payload = Bytes::copy_from_slice(&buffer[..len]);

            if rtcp {
                session.handle_rtcp(&media, payload);
            } else {
                session.handle_rtp(&media, payload);
            }
        }
    });
}
