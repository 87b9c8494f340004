use super::session::{ServerSession, SessionMediaTransport, WriteJob};
use super::{Server, ServerInner};
use crate::description::Track;
use crate::error::{Result, RtspError};
use crate::media::{MediaTx, SENDER_REPORT_PERIOD};
use crate::transport::multicast::multicast_send_socket;
use bytes::Bytes;
use parking_lot::Mutex;
use rtp::RtpPacket;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Queue capacity of one multicast send socket
const MULTICAST_QUEUE_SIZE: usize = 256;

/// Last observed RTP state of a media, feeding the `RTP-Info` header
#[derive(Debug, Clone, Copy)]
pub(crate) struct RtpInfoCache {
    pub(crate) seq: u16,
    pub(crate) rtptime: u32,
}

struct Reader {
    session: Arc<ServerSession>,
    active: bool,
}

struct MulticastWriter {
    group: Ipv4Addr,
    rtp_tx: mpsc::Sender<Bytes>,
    rtcp_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

/// A stream published by the host application and fanned out to any number
/// of concurrent readers.
///
/// Every packet is marshaled once; each reader gets it through its session's
/// bounded write queue, so one slow reader never blocks the publisher or the
/// other readers.
pub struct ServerStream {
    server: Weak<ServerInner>,
    tracks: Vec<Track>,

    readers: Mutex<HashMap<String, Reader>>,
    multicast: Mutex<HashMap<usize, Arc<MulticastWriter>>>,

    rtp_info: Vec<Mutex<Option<RtpInfoCache>>>,
    tx: Vec<Mutex<Option<MediaTx>>>,

    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ServerStream {
    pub fn new(server: &Server, tracks: Vec<Track>) -> Result<Arc<ServerStream>> {
        if tracks.is_empty() {
            return Err(RtspError::Sdp("stream without tracks"));
        }

        for track in &tracks {
            if track.formats.is_empty() {
                return Err(RtspError::Sdp("track without formats"));
            }
        }

        // control-less tracks get positional controls so SETUP URLs stay
        // unambiguous
        let tracks: Vec<Track> = tracks
            .into_iter()
            .enumerate()
            .map(|(i, mut track)| {
                if track.control.is_empty() {
                    track.control = format!("trackID={i}");
                }
                track
            })
            .collect();

        let count = tracks.len();

        let stream = Arc::new(ServerStream {
            server: Arc::downgrade(&server.inner),
            tracks,
            readers: Mutex::new(HashMap::new()),
            multicast: Mutex::new(HashMap::new()),
            rtp_info: (0..count).map(|_| Mutex::new(None)).collect(),
            tx: (0..count).map(|_| Mutex::new(None)).collect(),
            closed: AtomicBool::new(false),
            cancel: server.inner.closed.child_token(),
        });

        stream.spawn_sender_report_task();

        Ok(stream)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Publish one RTP packet on `media_idx`
    pub fn write_packet_rtp(&self, media_idx: usize, packet: &RtpPacket) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        let Some(track) = self.tracks.get(media_idx) else {
            return;
        };

        // marshal once, every transport below shares the buffer
        let payload = packet.to_bytes();

        let pts_equals_dts = track
            .format_by_payload_type(packet.pt)
            .is_none_or(|format| format.pts_equals_dts(packet));

        {
            let mut tx = self.tx[media_idx].lock();

            if tx.is_none() {
                let clock_rate = track
                    .formats
                    .first()
                    .map(|format| format.clock_rate())
                    .unwrap_or(90_000);

                let enabled = self
                    .server
                    .upgrade()
                    .map(|server| !server.config.disable_rtcp_sender_reports)
                    .unwrap_or(false);

                if let Ok(created) = MediaTx::new(packet.ssrc, clock_rate, enabled) {
                    *tx = Some(created);
                }
            }

            if let Some(tx) = tx.as_mut() {
                tx.process_rtp(Instant::now(), packet, pts_equals_dts);
            }
        }

        *self.rtp_info[media_idx].lock() = Some(RtpInfoCache {
            seq: packet.sequence_number.0,
            rtptime: packet.timestamp.0,
        });

        self.distribute(media_idx, payload, false);
    }

    /// Publish one raw RTCP packet on `media_idx`
    pub fn write_packet_rtcp(&self, media_idx: usize, payload: Bytes) {
        if self.closed.load(Ordering::Relaxed) || media_idx >= self.tracks.len() {
            return;
        }

        self.distribute(media_idx, payload, true);
    }

    /// Remove every reader and shut the multicast writers down
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();

        let readers: Vec<Arc<ServerSession>> = self
            .readers
            .lock()
            .drain()
            .map(|(_, reader)| reader.session)
            .collect();

        for session in readers {
            tokio::spawn(async move { session.close("stream closed").await });
        }

        for (_, writer) in self.multicast.lock().drain() {
            writer.cancel.cancel();
        }
    }

    fn distribute(&self, media_idx: usize, payload: Bytes, rtcp: bool) {
        let readers: Vec<Arc<ServerSession>> = self
            .readers
            .lock()
            .values()
            .filter(|reader| reader.active)
            .map(|reader| reader.session.clone())
            .collect();

        for session in readers {
            let Some(media) = session.media_by_idx(media_idx) else {
                continue;
            };

            let job = match &media.transport {
                SessionMediaTransport::Tcp { channels } => {
                    let frame = rtsp_types::msg::InterleavedFrame {
                        channel: if rtcp { channels.1 } else { channels.0 },
                        payload: payload.clone(),
                    };

                    WriteJob::Conn(frame.to_bytes())
                }
                SessionMediaTransport::Udp {
                    rtp_peer,
                    rtcp_peer,
                    ..
                } => {
                    if rtcp {
                        WriteJob::UdpRtcp(*rtcp_peer, payload.clone())
                    } else {
                        WriteJob::UdpRtp(*rtp_peer, payload.clone())
                    }
                }
                SessionMediaTransport::Multicast => continue,
            };

            if !session.try_enqueue(job) {
                if let Some(server) = self.server.upgrade() {
                    server.handler.on_stream_write_error(&session.id, media_idx);
                }
            }
        }

        let writer = self.multicast.lock().get(&media_idx).cloned();

        if let Some(writer) = writer {
            let tx = if rtcp { &writer.rtcp_tx } else { &writer.rtp_tx };

            if tx.try_send(payload).is_err() {
                log::debug!("multicast queue of media {media_idx} is full, packet dropped");
            }
        }
    }

    // ==== READER MANAGEMENT ====

    pub(crate) fn add_reader(&self, session: &Arc<ServerSession>) {
        self.readers.lock().insert(
            session.id.clone(),
            Reader {
                session: session.clone(),
                active: false,
            },
        );
    }

    pub(crate) fn set_reader_active(&self, session_id: &str, active: bool) {
        if let Some(reader) = self.readers.lock().get_mut(session_id) {
            reader.active = active;
        }
    }

    pub(crate) fn remove_reader(&self, session_id: &str) {
        self.readers.lock().remove(session_id);
    }

    pub(crate) fn rtp_info_cache(&self, media_idx: usize) -> Option<RtpInfoCache> {
        *self.rtp_info.get(media_idx)?.lock()
    }

    // ==== MULTICAST ====

    /// Get or create the multicast writer of `media_idx`, returning its
    /// group address
    pub(crate) fn multicast_group(&self, media_idx: usize) -> Result<Ipv4Addr> {
        let server = self
            .server
            .upgrade()
            .ok_or(RtspError::ConnectionClosed)?;

        let Some(allocator) = &server.multicast else {
            return Err(RtspError::Protocol("multicast is not configured"));
        };

        let mut multicast = self.multicast.lock();

        if let Some(writer) = multicast.get(&media_idx) {
            return Ok(writer.group);
        }

        let group = allocator.allocate();

        let rtp_socket = multicast_send_socket(server.config.multicast_ttl)?;
        let rtcp_socket = multicast_send_socket(server.config.multicast_ttl)?;

        let (rtp_tx, rtp_rx) = mpsc::channel(MULTICAST_QUEUE_SIZE);
        let (rtcp_tx, rtcp_rx) = mpsc::channel(MULTICAST_QUEUE_SIZE);

        let cancel = self.cancel.child_token();

        spawn_multicast_sender(
            rtp_socket,
            (group, server.config.multicast_rtp_port).into(),
            rtp_rx,
            cancel.clone(),
        );
        spawn_multicast_sender(
            rtcp_socket,
            (group, server.config.multicast_rtcp_port).into(),
            rtcp_rx,
            cancel.clone(),
        );

        multicast.insert(
            media_idx,
            Arc::new(MulticastWriter {
                group,
                rtp_tx,
                rtcp_tx,
                cancel,
            }),
        );

        Ok(group)
    }

    // ==== RTCP ====

    fn spawn_sender_report_task(self: &Arc<Self>) {
        let stream = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SENDER_REPORT_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            interval.tick().await;

            loop {
                tokio::select! {
                    _ = stream.cancel.cancelled() => return,
                    _ = interval.tick() => {}
                }

                for media_idx in 0..stream.tracks.len() {
                    let report = stream.tx[media_idx].lock().as_mut().and_then(|tx| {
                        tx.generate_report(Instant::now())
                    });

                    if let Some(report) = report {
                        stream.distribute(media_idx, Bytes::from(report), true);
                    }
                }
            }
        });
    }
}

fn spawn_multicast_sender(
    socket: tokio::net::UdpSocket,
    target: std::net::SocketAddr,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => return,
                payload = rx.recv() => payload,
            };

            let Some(payload) = payload else {
                return;
            };

            if let Err(e) = socket.send_to(&payload, target).await {
                log::debug!("multicast send error: {e}");
            }
        }
    });
}
