use super::Inner;
use crate::error::DecodeError;
use crate::format::Format;
use crate::media::{MediaRx, MediaTx};
use crate::transport::monotonic_ms;
use crate::transport::udp::MAX_PACKET_SIZE;
use bytes::Bytes;
use parking_lot::Mutex;
use rtsp_types::RtspUrl;
use rtsp_types::msg::InterleavedFrame;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Negotiated transport of a single set-up media
pub(super) enum MediaTransport {
    Tcp {
        channels: (u8, u8),
    },
    Udp(UdpTransport),
}

pub(super) struct UdpTransport {
    pub(super) rtp_socket: Arc<UdpSocket>,
    pub(super) rtcp_socket: Arc<UdpSocket>,
    pub(super) rtp_port: u16,
    pub(super) rtcp_port: u16,

    /// Expected source address of incoming packets, updated by the first
    /// packet in any-port mode
    pub(super) rtp_peer: Mutex<Option<SocketAddr>>,
    pub(super) rtcp_peer: Mutex<Option<SocketAddr>>,

    /// Source filter; `None` for multicast delivery
    pub(super) expected_ip: Option<IpAddr>,

    pub(super) any_port: bool,
}

/// One set-up media of a client session
pub(super) struct ClientMedia {
    pub(super) idx: usize,
    pub(super) url: RtspUrl,
    pub(super) formats: Vec<Arc<dyn Format>>,
    pub(super) transport: MediaTransport,
    pub(super) rx: Mutex<MediaRx>,
    pub(super) tx: Mutex<MediaTx>,

    /// Monotonic timestamp of the last received RTP packet, 0 until the
    /// first one
    pub(super) last_packet_ms: AtomicU64,

    pub(super) cancel: CancellationToken,
}

impl ClientMedia {
    pub(super) fn pts_equals_dts(&self, packet: &rtp::RtpPacket) -> bool {
        self.formats
            .iter()
            .find(|format| format.payload_type() == packet.pt)
            .is_some_and(|format| format.pts_equals_dts(packet))
    }

    /// Handle an incoming RTP payload, regardless of the transport it
    /// arrived on
    pub(super) fn handle_rtp(&self, inner: &Inner, payload: Bytes) {
        self.last_packet_ms.store(monotonic_ms(), Ordering::Relaxed);

        inner
            .bytes_received
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let result = self.rx.lock().process_rtp(Instant::now(), payload);

        match result {
            Ok((delivered, lost)) => {
                if lost > 0 {
                    inner.handler_on_packets_lost(self.idx, lost);
                }

                for packet in delivered {
                    inner.handler_on_packet_rtp(self.idx, packet);
                }
            }
            Err(error) => inner.handler_on_decode_error(self.idx, error),
        }
    }

    pub(super) fn handle_rtcp(&self, inner: &Inner, payload: Bytes) {
        inner
            .bytes_received
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        if let Err(error) = self.rx.lock().process_rtcp(Instant::now(), &payload) {
            inner.handler_on_decode_error(self.idx, error);
            return;
        }

        inner.handler_on_packet_rtcp(self.idx, payload);
    }
}

fn source_allowed(udp: &UdpTransport, src: SocketAddr, rtcp: bool) -> bool {
    let peer = if rtcp { &udp.rtcp_peer } else { &udp.rtp_peer };

    if udp.any_port {
        let mut peer = peer.lock();

        if peer.is_none() {
            // lock onto the first seen source
            *peer = Some(src);
        }

        return true;
    }

    match udp.expected_ip {
        Some(expected) => src.ip() == expected,
        None => true,
    }
}

/// Spawn the reader and report tasks of one UDP media
pub(super) fn spawn_udp_tasks(inner: &Arc<Inner>, media: &Arc<ClientMedia>) {
    let MediaTransport::Udp(udp) = &media.transport else {
        return;
    };

    for rtcp in [false, true] {
        let inner = inner.clone();
        let media = media.clone();
        let socket = if rtcp {
            udp.rtcp_socket.clone()
        } else {
            udp.rtp_socket.clone()
        };

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];

            loop {
                let received = tokio::select! {
                    _ = media.cancel.cancelled() => return,
                    received = socket.recv_from(&mut buffer) => received,
                };

                let (len, src) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        log::debug!("UDP receive error: {e}");
                        return;
                    }
                };

                let MediaTransport::Udp(udp) = &media.transport else {
                    return;
                };

                if !source_allowed(udp, src, rtcp) {
                    continue;
                }

                if len >= MAX_PACKET_SIZE {
                    inner.handler_on_decode_error(media.idx, DecodeError::OversizedPayload(len));
                    continue;
                }

                let payload = Bytes::copy_from_slice(&buffer[..len]);

                if rtcp {
                    media.handle_rtcp(&inner, payload);
                } else {
                    media.handle_rtp(&inner, payload);
                }
            }
        });
    }
}

/// Spawn the periodic receiver report task of a playing media
pub(super) fn spawn_receiver_report_task(inner: &Arc<Inner>, media: &Arc<ClientMedia>) {
    let inner = inner.clone();
    let media = media.clone();
    let period = inner.config.receiver_report_period;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // the first tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = media.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            let report = media.rx.lock().generate_report(Instant::now());

            if let Some(report) = report {
                let _ = send_rtcp(&inner, &media, Bytes::from(report)).await;
            }
        }
    });
}

/// Spawn the periodic sender report task of a recording media
pub(super) fn spawn_sender_report_task(inner: &Arc<Inner>, media: &Arc<ClientMedia>) {
    let inner = inner.clone();
    let media = media.clone();
    let period = inner.config.sender_report_period;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        interval.tick().await;

        loop {
            tokio::select! {
                _ = media.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }

            let report = media.tx.lock().generate_report(Instant::now());

            if let Some(report) = report {
                let _ = send_rtcp(&inner, &media, Bytes::from(report)).await;
            }
        }
    });
}

/// Send an RTCP payload over the media's negotiated transport
pub(super) async fn send_rtcp(
    inner: &Inner,
    media: &ClientMedia,
    payload: Bytes,
) -> crate::error::Result<()> {
    inner
        .bytes_sent
        .fetch_add(payload.len() as u64, Ordering::Relaxed);

    match &media.transport {
        MediaTransport::Tcp { channels } => {
            let frame = InterleavedFrame {
                channel: channels.1,
                payload,
            };

            inner.write_to_conn(frame.to_bytes()).await
        }
        MediaTransport::Udp(udp) => {
            let peer = *udp.rtcp_peer.lock();

            if let Some(peer) = peer {
                udp.rtcp_socket
                    .send_to(&payload, peer)
                    .await
                    .map_err(crate::error::RtspError::Io)?;
            }

            Ok(())
        }
    }
}
