use super::ServerInner;
use crate::conn::Conn;
use crate::media::MediaRx;
use crate::transport::monotonic_ms;
use bytes::Bytes;
use parking_lot::Mutex;
use rtsp_types::Method;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Initial,
    PrePlay,
    Play,
    PreRecord,
    Record,
}

impl SessionState {
    /// Method legality table of the server session state machine
    pub(crate) fn allows(self, method: Method) -> bool {
        match method {
            Method::Options | Method::GetParameter | Method::SetParameter => true,
            Method::Describe => matches!(self, Self::Initial | Self::PrePlay),
            Method::Announce => matches!(self, Self::Initial),
            Method::Setup => {
                matches!(self, Self::Initial | Self::PrePlay | Self::PreRecord)
            }
            Method::Play => matches!(self, Self::PrePlay | Self::Play),
            Method::Record => matches!(self, Self::PreRecord),
            Method::Pause => matches!(self, Self::Play | Self::Record),
            Method::Teardown => !matches!(self, Self::Initial),
            Method::Redirect => false,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionMode {
    Play,
    Record,
}

/// Negotiated transport of one set-up media inside a session
pub(crate) enum SessionMediaTransport {
    Tcp {
        channels: (u8, u8),
    },
    Udp {
        rtp_peer: SocketAddr,
        rtcp_peer: SocketAddr,
        /// Liveness stamp of incoming packets on a record session
        last_packet_ms: Arc<AtomicU64>,
    },
    Multicast,
}

pub(crate) struct SessionMedia {
    /// Index into the stream's (or announced) tracks
    pub(crate) media_idx: usize,
    pub(crate) transport: SessionMediaTransport,
    /// Receive pipeline, present on record sessions
    pub(crate) rx: Option<Mutex<MediaRx>>,
}

/// A queued write of the session's writer task
pub(crate) enum WriteJob {
    Conn(Bytes),
    UdpRtp(SocketAddr, Bytes),
    UdpRtcp(SocketAddr, Bytes),
}

pub(crate) struct ServerSession {
    pub(crate) id: String,
    pub(crate) server: Weak<ServerInner>,

    pub(crate) state: Mutex<SessionState>,
    pub(crate) mode: Mutex<Option<SessionMode>>,
    pub(crate) base_path: Mutex<Option<String>>,
    pub(crate) medias: Mutex<Vec<Arc<SessionMedia>>>,
    pub(crate) stream: Mutex<Option<Arc<super::stream::ServerStream>>>,

    /// Write side of the owning connection; `None` after the connection went
    /// away (a UDP session survives that until its timeout)
    pub(crate) conn: Mutex<Option<Arc<Conn>>>,
    pub(crate) conn_id: Mutex<Option<u64>>,

    writer_tx: mpsc::Sender<WriteJob>,
    writer_rx: Mutex<Option<mpsc::Receiver<WriteJob>>>,

    pub(crate) last_activity: Mutex<Instant>,
    pub(crate) timeout: Duration,

    pub(crate) bytes_sent: AtomicU64,
    pub(crate) bytes_received: AtomicU64,

    pub(crate) cancel: CancellationToken,
}

impl ServerSession {
    pub(crate) fn new(
        id: String,
        server: &Arc<ServerInner>,
        conn: Arc<Conn>,
        conn_id: u64,
        queue_size: usize,
        timeout: Duration,
    ) -> Arc<Self> {
        let (writer_tx, writer_rx) = mpsc::channel(queue_size);

        let session = Arc::new(Self {
            id,
            server: Arc::downgrade(server),
            state: Mutex::new(SessionState::Initial),
            mode: Mutex::new(None),
            base_path: Mutex::new(None),
            medias: Mutex::new(vec![]),
            stream: Mutex::new(None),
            conn: Mutex::new(Some(conn)),
            conn_id: Mutex::new(Some(conn_id)),
            writer_tx,
            writer_rx: Mutex::new(Some(writer_rx)),
            last_activity: Mutex::new(Instant::now()),
            timeout,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            cancel: server.closed.child_token(),
        });

        session.spawn_writer();
        session.spawn_checker();

        session
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub(crate) fn media_by_idx(&self, media_idx: usize) -> Option<Arc<SessionMedia>> {
        self.medias
            .lock()
            .iter()
            .find(|media| media.media_idx == media_idx)
            .cloned()
    }

    pub(crate) fn media_by_channel(&self, channel: u8) -> Option<(Arc<SessionMedia>, bool)> {
        self.medias.lock().iter().find_map(|media| {
            let SessionMediaTransport::Tcp { channels } = &media.transport else {
                return None;
            };

            if channel == channels.0 {
                Some((media.clone(), false))
            } else if channel == channels.1 {
                Some((media.clone(), true))
            } else {
                None
            }
        })
    }

    /// First free even/odd interleaved channel pair
    pub(crate) fn allocate_channels(&self) -> (u8, u8) {
        let medias = self.medias.lock();

        let mut first = 0u8;

        loop {
            let taken = medias.iter().any(|media| {
                matches!(
                    &media.transport,
                    SessionMediaTransport::Tcp { channels } if channels.0 == first
                )
            });

            if !taken {
                return (first, first + 1);
            }

            first += 2;
        }
    }

    /// Enqueue a write without blocking the caller.
    ///
    /// Returns `false` when the queue is full, in which case the packet is
    /// dropped for this session only.
    pub(crate) fn try_enqueue(&self, job: WriteJob) -> bool {
        self.writer_tx.try_send(job).is_ok()
    }

    fn spawn_writer(self: &Arc<Self>) {
        let session = self.clone();

        let Some(mut rx) = self.writer_rx.lock().take() else {
            return;
        };

        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = session.cancel.cancelled() => return,
                    job = rx.recv() => job,
                };

                let Some(job) = job else {
                    return;
                };

                let error = match job {
                    WriteJob::Conn(bytes) => {
                        let conn = session.conn.lock().clone();

                        match conn {
                            Some(conn) => {
                                session
                                    .bytes_sent
                                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);

                                conn.write(bytes).await.err()
                            }
                            None => None,
                        }
                    }
                    WriteJob::UdpRtp(target, bytes) => {
                        session.send_udp(target, bytes, false).await
                    }
                    WriteJob::UdpRtcp(target, bytes) => {
                        session.send_udp(target, bytes, true).await
                    }
                };

                if let Some(e) = error {
                    log::debug!("session {} write error: {e}", session.id);
                    session.close("write error").await;
                    return;
                }
            }
        });
    }

    async fn send_udp(
        &self,
        target: SocketAddr,
        bytes: Bytes,
        rtcp: bool,
    ) -> Option<crate::error::RtspError> {
        let server = self.server.upgrade()?;

        let udp = server.udp.as_ref()?;

        let socket = if rtcp {
            &udp.rtcp_socket
        } else {
            &udp.rtp_socket
        };

        self.bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        socket
            .send_to(&bytes, target)
            .await
            .err()
            .map(crate::error::RtspError::Io)
    }

    fn spawn_checker(self: &Arc<Self>) {
        let session = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = session.cancel.cancelled() => return,
                    _ = interval.tick() => {}
                }

                if session.last_activity.lock().elapsed() > session.timeout {
                    log::debug!("session {} timed out", session.id);
                    session.close("session timeout").await;
                    return;
                }

                // UDP record liveness
                if *session.mode.lock() == Some(SessionMode::Record) {
                    let Some(server) = session.server.upgrade() else {
                        return;
                    };

                    let udp_timeout = server.config.read_timeout.as_millis() as u64;
                    let now = monotonic_ms();

                    let expired = session.medias.lock().iter().any(|media| {
                        matches!(
                            &media.transport,
                            SessionMediaTransport::Udp { last_packet_ms, .. }
                                if {
                                    let last = last_packet_ms.load(Ordering::Relaxed);
                                    last > 0 && now.saturating_sub(last) > udp_timeout
                                }
                        )
                    });

                    if expired {
                        log::debug!("session {}: UDP timeout", session.id);
                        session.close("UDP timeout").await;
                        return;
                    }
                }
            }
        });
    }

    /// Process an incoming RTP payload of a record session
    pub(crate) fn handle_rtp(&self, media: &SessionMedia, payload: Bytes) {
        self.touch();

        if let SessionMediaTransport::Udp { last_packet_ms, .. } = &media.transport {
            last_packet_ms.store(monotonic_ms(), Ordering::Relaxed);
        }

        self.bytes_received
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let Some(server) = self.server.upgrade() else {
            return;
        };

        let Some(rx) = &media.rx else {
            return;
        };

        let result = rx.lock().process_rtp(Instant::now(), payload);

        match result {
            Ok((delivered, lost)) => {
                if lost > 0 {
                    server
                        .handler
                        .on_packets_lost(&self.id, media.media_idx, lost);
                }

                for packet in delivered {
                    server.handler.on_packet_rtp(&self.id, media.media_idx, packet);
                }
            }
            Err(error) => {
                server
                    .handler
                    .on_decode_error(&self.id, media.media_idx, error);
            }
        }
    }

    /// Process an incoming RTCP payload
    pub(crate) fn handle_rtcp(&self, media: &SessionMedia, payload: Bytes) {
        self.touch();

        self.bytes_received
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let Some(server) = self.server.upgrade() else {
            return;
        };

        if let Some(rx) = &media.rx {
            if let Err(error) = rx.lock().process_rtcp(Instant::now(), &payload) {
                server
                    .handler
                    .on_decode_error(&self.id, media.media_idx, error);
                return;
            }
        }

        server
            .handler
            .on_packet_rtcp(&self.id, media.media_idx, payload);
    }

    /// Remove the session everywhere and cancel its tasks
    pub(crate) async fn close(&self, reason: &str) {
        if self.cancel.is_cancelled() {
            return;
        }

        log::debug!("closing session {} ({reason})", self.id);

        self.cancel.cancel();

        if let Some(server) = self.server.upgrade() {
            server.sessions.write().remove(&self.id);

            if let Some(udp) = &server.udp {
                udp.forget_session(&self.id);
            }

            server.handler.on_session_close(&self.id).await;
        }

        if let Some(stream) = self.stream.lock().take() {
            stream.remove_reader(&self.id);
        }

        // a TCP interleaved session takes its connection with it
        let uses_tcp = self
            .medias
            .lock()
            .iter()
            .any(|media| matches!(media.transport, SessionMediaTransport::Tcp { .. }));

        if uses_tcp {
            if let Some(conn) = self.conn.lock().take() {
                conn.cancel.cancel();
            }
        }
    }

    /// Detach from a closed connection.
    ///
    /// UDP sessions keep running until their timeout; interleaved sessions
    /// cannot survive and are closed.
    pub(crate) async fn conn_closed(&self) {
        let uses_tcp = self
            .medias
            .lock()
            .iter()
            .any(|media| matches!(media.transport, SessionMediaTransport::Tcp { .. }));

        *self.conn.lock() = None;
        *self.conn_id.lock() = None;

        if uses_tcp || self.medias.lock().is_empty() {
            self.close("connection closed").await;
        }
    }
}
