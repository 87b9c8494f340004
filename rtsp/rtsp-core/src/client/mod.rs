//! RTSP client engine.
//!
//! A [`Client`] owns one RTSP connection plus the per-media transports that
//! were negotiated over it. Control operations are async methods; media
//! packets and non-fatal events are delivered through a [`ClientHandler`].

use crate::codec::{Item, RtspDecoder};
use crate::conn::{BoxedIo, Conn};
use crate::description::{Track, tracks_from_sdp, tracks_to_sdp};
use crate::error::{DecodeError, Result, RtspError};
use crate::media::{MediaRx, MediaTx};
use crate::transport::monotonic_ms;
use crate::transport::multicast::multicast_recv_socket;
use crate::transport::udp::UdpPair;
use bytes::Bytes;
use bytesstr::BytesStr;
use media::{ClientMedia, MediaTransport, UdpTransport};
use parking_lot::{Mutex, RwLock};
use rtp::rtcp_types::{ReceiverReport, RtcpPacketWriter};
use rtp::{RtpPacket, RtpTimestamp, SequenceNumber, Ssrc};
use rtsp_auth::{Authenticator, Credentials};
use rtsp_types::header::typed::{
    CSeq, Challenge, ContentBase, Delivery, Public, Range, Session as SessionHeader, Transport,
    TransportMode, TransportProtocol,
};
use rtsp_types::msg::{InterleavedFrame, Request, Response};
use rtsp_types::{Method, Name, RtspUrl, StatusCode};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::ReadHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

mod media;

const MAX_REDIRECTS: usize = 5;

const DEFAULT_SESSION_TIMEOUT: u64 = 60;

/// Callbacks invoked by the client's reader tasks.
///
/// All callbacks are non-blocking notifications; fatal errors end up in
/// [`Client::wait`] instead.
pub trait ClientHandler: Send + Sync + 'static {
    fn on_packet_rtp(&self, media_idx: usize, packet: RtpPacket) {
        let _ = (media_idx, packet);
    }

    fn on_packet_rtcp(&self, media_idx: usize, payload: Bytes) {
        let _ = (media_idx, payload);
    }

    fn on_packets_lost(&self, media_idx: usize, count: u64) {
        log::warn!("media {media_idx}: {count} RTP packets lost");
    }

    fn on_decode_error(&self, media_idx: usize, error: DecodeError) {
        log::warn!("media {media_idx}: {error}");
    }
}

/// Requested media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientTransport {
    /// Try UDP first, fall back to TCP on 461 or missing packets
    #[default]
    Auto,
    Udp,
    UdpMulticast,
    Tcp,
}

#[derive(Clone)]
pub struct ClientConfig {
    pub transport: ClientTransport,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// How long to wait for the first UDP packet before falling back to TCP
    pub initial_udp_timeout: Duration,
    pub read_buffer_size: usize,
    /// Accept UDP packets from any source port, locking onto the first seen
    pub any_port_enable: bool,
    pub disable_rtcp_sender_reports: bool,
    pub redirect_disable: bool,
    /// How often RTCP receiver reports are emitted while playing
    pub receiver_report_period: Duration,
    /// How often RTCP sender reports are emitted while recording
    pub sender_report_period: Duration,
    pub user_agent: String,
    /// Credentials override; user info in the URL is used otherwise
    pub credentials: Option<Credentials>,
    #[cfg(feature = "tls-native-tls")]
    pub tls_connector: Option<tokio_native_tls::native_tls::TlsConnector>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: ClientTransport::Auto,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            initial_udp_timeout: Duration::from_secs(3),
            read_buffer_size: 16 * 1024,
            any_port_enable: false,
            disable_rtcp_sender_reports: false,
            redirect_disable: false,
            receiver_report_period: crate::media::RECEIVER_REPORT_PERIOD,
            sender_report_period: crate::media::SENDER_REPORT_PERIOD,
            user_agent: "strobe".into(),
            credentials: None,
            #[cfg(feature = "tls-native-tls")]
            tls_connector: None,
        }
    }
}

/// Byte counters of a client
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Initial,
    PrePlay,
    Play,
    PreRecord,
    Record,
}

impl ClientState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::PrePlay => "pre-play",
            Self::Play => "play",
            Self::PreRecord => "pre-record",
            Self::Record => "record",
        }
    }

    /// Method legality table of the client state machine
    fn allows(self, method: Method) -> bool {
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
enum SessionMode {
    Play,
    Record,
}

#[derive(Clone)]
struct DescribeInfo {
    tracks: Vec<Track>,
    base: RtspUrl,
    mode: SessionMode,
}

struct SessionState {
    id: BytesStr,
    timeout: u64,
}

/// An RTSP client session
pub struct Client {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    config: ClientConfig,
    credentials: Option<Credentials>,

    url: Mutex<RtspUrl>,
    handler: RwLock<Option<Arc<dyn ClientHandler>>>,

    state: Mutex<ClientState>,
    conn: Mutex<Option<Arc<Conn>>>,
    cseq: AtomicU32,
    pending: Mutex<Option<(u32, oneshot::Sender<Response>)>>,
    request_lock: tokio::sync::Mutex<()>,

    authenticator: Mutex<Option<Authenticator>>,
    session: Mutex<Option<SessionState>>,
    describe: Mutex<Option<DescribeInfo>>,
    medias: Mutex<Vec<Arc<ClientMedia>>>,
    session_protocol: Mutex<Option<TransportProtocol>>,
    next_channel: AtomicU32,
    server_public: Mutex<Option<Public>>,

    play_range: Mutex<Option<Range>>,
    played_at: Mutex<Option<Instant>>,
    keepalive_spawned: AtomicBool,
    checker_spawned: AtomicBool,
    tcp_fallback_done: AtomicBool,

    pub(crate) bytes_sent: AtomicU64,
    pub(crate) bytes_received: AtomicU64,

    closed: CancellationToken,
    fatal: Mutex<Option<Arc<RtspError>>>,
}

impl Client {
    /// Dial `url` and confirm the server with an OPTIONS request
    pub async fn connect(url: &str, config: ClientConfig) -> Result<Client> {
        let url = RtspUrl::parse(url)?;

        let credentials = config.credentials.clone().or_else(|| {
            url.username()
                .map(|user| Credentials::new(user, url.password().unwrap_or_default()))
        });

        let inner = Arc::new(Inner {
            config,
            credentials,
            url: Mutex::new(url),
            handler: RwLock::new(None),
            state: Mutex::new(ClientState::Initial),
            conn: Mutex::new(None),
            cseq: AtomicU32::new(1),
            pending: Mutex::new(None),
            request_lock: tokio::sync::Mutex::new(()),
            authenticator: Mutex::new(None),
            session: Mutex::new(None),
            describe: Mutex::new(None),
            medias: Mutex::new(vec![]),
            session_protocol: Mutex::new(None),
            next_channel: AtomicU32::new(0),
            server_public: Mutex::new(None),
            play_range: Mutex::new(None),
            played_at: Mutex::new(None),
            keepalive_spawned: AtomicBool::new(false),
            checker_spawned: AtomicBool::new(false),
            tcp_fallback_done: AtomicBool::new(false),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            closed: CancellationToken::new(),
            fatal: Mutex::new(None),
        });

        inner.connect_conn().await?;
        inner.options().await?;

        Ok(Client { inner })
    }

    /// Install the packet/event handler. Must happen before media flows.
    pub fn set_handler(&self, handler: Arc<dyn ClientHandler>) {
        *self.inner.handler.write() = Some(handler);
    }

    pub async fn options(&self) -> Result<Response> {
        self.inner.options().await
    }

    /// Fetch and parse the stream description
    pub async fn describe(&self) -> Result<Vec<Track>> {
        self.inner.describe().await
    }

    /// Publish a stream description, switching the session into record mode
    pub async fn announce(&self, tracks: Vec<Track>) -> Result<()> {
        self.inner.announce(tracks).await
    }

    /// Set up a single media by its index in the described tracks
    pub async fn setup(&self, media_idx: usize) -> Result<()> {
        self.inner.setup_media(media_idx).await
    }

    /// Set up every described media
    pub async fn setup_all(&self) -> Result<()> {
        let count = {
            let describe = self.inner.describe.lock();

            describe
                .as_ref()
                .ok_or(RtspError::Protocol("setup before describe"))?
                .tracks
                .len()
        };

        for media_idx in 0..count {
            self.inner.setup_media(media_idx).await?;
        }

        Ok(())
    }

    pub async fn play(&self, range: Option<Range>) -> Result<Response> {
        self.inner.play(range).await
    }

    /// Seek inside the stream while playing
    pub async fn seek(&self, range: Range) -> Result<Response> {
        self.inner.play(Some(range)).await
    }

    pub async fn record(&self) -> Result<Response> {
        self.inner.record().await
    }

    pub async fn pause(&self) -> Result<Response> {
        self.inner.pause().await
    }

    /// Tear the session down and close the client
    pub async fn teardown(&self) -> Result<()> {
        self.inner.teardown().await
    }

    /// Send an RTP packet on a media set up in record mode
    pub async fn send_packet_rtp(&self, media_idx: usize, packet: &RtpPacket) -> Result<()> {
        self.inner.send_packet_rtp(media_idx, packet).await
    }

    /// Send a raw RTCP packet on a set up media
    pub async fn send_packet_rtcp(&self, media_idx: usize, payload: Bytes) -> Result<()> {
        let media = self.inner.media_by_idx(media_idx)?;

        media::send_rtcp(&self.inner, &media, payload).await
    }

    /// The tracks of the current describe/announce, if any
    pub fn tracks(&self) -> Option<Vec<Track>> {
        self.inner
            .describe
            .lock()
            .as_ref()
            .map(|info| info.tracks.clone())
    }

    pub fn stats(&self) -> Stats {
        Stats {
            bytes_sent: self.inner.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Wait until the client is closed, returning the fatal error if one
    /// occurred
    pub async fn wait(&self) -> Option<Arc<RtspError>> {
        self.inner.closed.cancelled().await;

        self.inner.fatal.lock().clone()
    }

    pub async fn close(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl Inner {
    // ==== CONNECTION ====

    async fn connect_conn(self: &Arc<Self>) -> Result<()> {
        let url = self.url.lock().clone();

        let stream = timeout(
            self.config.read_timeout,
            TcpStream::connect((url.host().to_string(), url.port())),
        )
        .await
        .map_err(|_| RtspError::ReadTimeout)??;

        let _ = stream.set_nodelay(true);

        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        let io: BoxedIo = if url.is_secure() {
            self.tls_connect(stream, url.host()).await?
        } else {
            Box::new(stream)
        };

        let cancel = self.closed.child_token();
        let (conn, read_half) = Conn::new(
            io,
            peer_addr,
            local_addr,
            self.config.write_timeout,
            cancel,
        );
        let conn = Arc::new(conn);

        *self.conn.lock() = Some(conn.clone());

        tokio::spawn(reader_task(self.clone(), conn, read_half));

        Ok(())
    }

    #[cfg(feature = "tls-native-tls")]
    async fn tls_connect(&self, stream: TcpStream, host: &str) -> Result<BoxedIo> {
        let connector = match &self.config.tls_connector {
            Some(connector) => connector.clone(),
            None => tokio_native_tls::native_tls::TlsConnector::new()
                .map_err(|e| RtspError::Io(std::io::Error::other(e)))?,
        };

        let connector = tokio_native_tls::TlsConnector::from(connector);

        let tls = connector
            .connect(host, stream)
            .await
            .map_err(|e| RtspError::Io(std::io::Error::other(e)))?;

        Ok(Box::new(tls))
    }

    #[cfg(not(feature = "tls-native-tls"))]
    async fn tls_connect(&self, _stream: TcpStream, _host: &str) -> Result<BoxedIo> {
        Err(RtspError::TlsUnavailable)
    }

    async fn reconnect(self: &Arc<Self>) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.cancel.cancel();
        }

        *self.pending.lock() = None;
        *self.authenticator.lock() = None;

        self.connect_conn().await
    }

    fn current_conn(&self) -> Result<Arc<Conn>> {
        self.conn
            .lock()
            .clone()
            .ok_or(RtspError::ConnectionClosed)
    }

    pub(crate) async fn write_to_conn(&self, bytes: Bytes) -> Result<()> {
        self.bytes_sent
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        self.current_conn()?.write(bytes).await
    }

    fn shutdown(&self) {
        for media in self.medias.lock().iter() {
            media.cancel.cancel();
        }

        if let Some(conn) = self.conn.lock().take() {
            conn.cancel.cancel();
        }

        self.closed.cancel();
    }

    pub(crate) fn fatal(&self, error: RtspError) {
        {
            let mut fatal = self.fatal.lock();

            if fatal.is_none() {
                *fatal = Some(Arc::new(error));
            }
        }

        self.shutdown();
    }

    /// Fatal error caused by the reader of `conn`, ignored when the
    /// connection was already replaced
    fn conn_lost(&self, conn: &Arc<Conn>, error: RtspError) {
        let is_current = self
            .conn
            .lock()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, conn));

        if is_current {
            self.fatal(error);
        }
    }

    // ==== HANDLER DISPATCH ====

    pub(crate) fn handler_on_packet_rtp(&self, media_idx: usize, packet: RtpPacket) {
        if let Some(handler) = self.handler.read().clone() {
            handler.on_packet_rtp(media_idx, packet);
        }
    }

    pub(crate) fn handler_on_packet_rtcp(&self, media_idx: usize, payload: Bytes) {
        if let Some(handler) = self.handler.read().clone() {
            handler.on_packet_rtcp(media_idx, payload);
        }
    }

    pub(crate) fn handler_on_packets_lost(&self, media_idx: usize, count: u64) {
        if let Some(handler) = self.handler.read().clone() {
            handler.on_packets_lost(media_idx, count);
        }
    }

    pub(crate) fn handler_on_decode_error(&self, media_idx: usize, error: DecodeError) {
        if let Some(handler) = self.handler.read().clone() {
            handler.on_decode_error(media_idx, error);
        }
    }

    // ==== REQUESTS ====

    fn ensure_state_for(&self, method: Method) -> Result<()> {
        let state = *self.state.lock();

        if state.allows(method) {
            Ok(())
        } else {
            Err(RtspError::InvalidState {
                method,
                state: state.as_str(),
            })
        }
    }

    async fn request(self: &Arc<Self>, template: Request) -> Result<Response> {
        let _guard = self.request_lock.lock().await;

        self.request_unlocked(template).await
    }

    async fn request_unlocked(self: &Arc<Self>, template: Request) -> Result<Response> {
        let mut auth_retried = false;

        loop {
            let mut request = template.clone();

            let cseq = self.cseq.fetch_add(1, Ordering::SeqCst);
            request.headers.insert_front(Name::CSEQ, cseq.to_string());

            if !request.headers.contains(&Name::USER_AGENT) {
                request
                    .headers
                    .insert(Name::USER_AGENT, self.config.user_agent.as_str());
            }

            if let Some(session) = self.session.lock().as_ref() {
                request.headers.insert_type(&SessionHeader::new(session.id.clone()));
            }

            if let Some(authenticator) = self.authenticator.lock().as_ref() {
                authenticator.authorize_request(
                    request.method,
                    &request.url,
                    &mut request.headers,
                );
            }

            let (tx, rx) = oneshot::channel();
            *self.pending.lock() = Some((cseq, tx));

            let bytes = request.to_bytes();

            if let Err(e) = self.write_to_conn(bytes).await {
                *self.pending.lock() = None;
                return Err(e);
            }

            let response = match timeout(self.config.read_timeout, rx).await {
                Err(_) => {
                    *self.pending.lock() = None;
                    return Err(RtspError::ReadTimeout);
                }
                Ok(Err(_)) => return Err(RtspError::ConnectionClosed),
                Ok(Ok(response)) => response,
            };

            if let Some(Ok(session)) = response.headers.try_get::<SessionHeader>() {
                let mut stored = self.session.lock();

                match stored.as_mut() {
                    Some(stored) => {
                        if let Some(timeout) = session.timeout {
                            stored.timeout = timeout;
                        }
                    }
                    None => {
                        *stored = Some(SessionState {
                            id: session.id,
                            timeout: session.timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT),
                        });
                    }
                }
            }

            if response.status == StatusCode::UNAUTHORIZED && !auth_retried {
                let Some(credentials) = self.credentials.clone() else {
                    return Ok(response);
                };

                let challenges = response.headers.get_all::<Challenge>()?;

                {
                    let mut authenticator = self.authenticator.lock();

                    authenticator
                        .get_or_insert_with(|| Authenticator::new(credentials))
                        .handle_rejection(challenges)?;
                }

                auth_retried = true;
                continue;
            }

            return Ok(response);
        }
    }

    fn route_response(&self, response: Response) -> Result<()> {
        let cseq: CSeq = response
            .headers
            .get()
            .map_err(|_| RtspError::Protocol("response without CSeq"))?;

        let mut pending = self.pending.lock();

        match pending.take() {
            Some((expected, tx)) if expected == cseq.0 => {
                let _ = tx.send(response);
                Ok(())
            }
            Some(_) => Err(RtspError::CSeqMismatch),
            None => {
                log::debug!("dropping unsolicited response with CSeq {}", cseq.0);
                Ok(())
            }
        }
    }

    async fn handle_server_request(&self, request: Request, conn: &Arc<Conn>) {
        let status = match request.method {
            Method::Options | Method::GetParameter => StatusCode::OK,
            _ => StatusCode::NOT_IMPLEMENTED,
        };

        let mut response = Response::new(status);

        if let Some(cseq) = request.headers.value(&Name::CSEQ) {
            response.headers.insert(Name::CSEQ, cseq.clone());
        }

        let _ = conn.write(response.to_bytes()).await;
    }

    fn route_frame(&self, frame: InterleavedFrame) {
        let media = self.medias.lock().iter().find_map(|media| {
            let MediaTransport::Tcp { channels } = &media.transport else {
                return None;
            };

            if frame.channel == channels.0 {
                Some((media.clone(), false))
            } else if frame.channel == channels.1 {
                Some((media.clone(), true))
            } else {
                None
            }
        });

        // frames on channels that were never set up are ignored
        let Some((media, is_rtcp)) = media else {
            return;
        };

        if is_rtcp {
            media.handle_rtcp(self, frame.payload);
        } else {
            media.handle_rtp(self, frame.payload);
        }
    }

    // ==== OPERATIONS ====

    async fn options(self: &Arc<Self>) -> Result<Response> {
        let url = self.url.lock().clone().without_credentials();

        let response = self.request(Request::new(Method::Options, url)).await?;

        if !response.status.is_success() {
            return Err(RtspError::bad_status(
                response.status,
                response.reason.as_deref(),
            ));
        }

        if let Some(Ok(public)) = response.headers.try_get::<Public>() {
            *self.server_public.lock() = Some(public);
        }

        Ok(response)
    }

    async fn describe(self: &Arc<Self>) -> Result<Vec<Track>> {
        self.ensure_state_for(Method::Describe)?;

        let mut redirects = 0;

        loop {
            let url = self.url.lock().clone();

            let mut request = Request::new(Method::Describe, url.without_credentials());
            request.headers.insert(Name::ACCEPT, "application/sdp");

            let response = self.request(request).await?;

            if response.status.is_redirection() {
                if self.config.redirect_disable {
                    return Err(RtspError::bad_status(
                        response.status,
                        response.reason.as_deref(),
                    ));
                }

                redirects += 1;

                if redirects > MAX_REDIRECTS {
                    return Err(RtspError::TooManyRedirects);
                }

                let location = response
                    .headers
                    .value(&Name::LOCATION)
                    .ok_or(RtspError::RedirectWithoutLocation)?;

                let mut new_url = RtspUrl::parse(location.as_str())?;

                // the redirect target inherits credentials
                if new_url.username().is_none() {
                    if let Some(user) = url.username() {
                        new_url =
                            new_url.with_credentials(user, url.password().unwrap_or_default());
                    }
                }

                log::debug!("following redirect to {new_url}");

                *self.url.lock() = new_url;

                self.reconnect().await?;
                self.options().await?;

                continue;
            }

            if !response.status.is_success() {
                return Err(RtspError::bad_status(
                    response.status,
                    response.reason.as_deref(),
                ));
            }

            let base = match response.headers.try_get::<ContentBase>() {
                Some(Ok(base)) => {
                    let mut base = RtspUrl::parse(base.0.as_str())?;

                    if base.username().is_none() {
                        if let Some(user) = url.username() {
                            base = base.with_credentials(user, url.password().unwrap_or_default());
                        }
                    }

                    base
                }
                _ => url.clone(),
            };

            let tracks = tracks_from_sdp(&response.body)?;

            *self.describe.lock() = Some(DescribeInfo {
                tracks: tracks.clone(),
                base,
                mode: SessionMode::Play,
            });

            return Ok(tracks);
        }
    }

    async fn announce(self: &Arc<Self>, tracks: Vec<Track>) -> Result<()> {
        self.ensure_state_for(Method::Announce)?;

        let url = self.url.lock().clone();

        let local_ip = self
            .current_conn()?
            .local_addr
            .ip();

        let sdp = tracks_to_sdp(&tracks, local_ip).to_string();

        let mut request = Request::new(Method::Announce, url.without_credentials());
        request.headers.insert(Name::CONTENT_TYPE, "application/sdp");
        request.body = Bytes::from(sdp);

        let response = self.request(request).await?;

        if !response.status.is_success() {
            return Err(RtspError::bad_status(
                response.status,
                response.reason.as_deref(),
            ));
        }

        // give control-less tracks the controls the SDP carried
        let tracks = tracks
            .into_iter()
            .enumerate()
            .map(|(i, mut track)| {
                if track.control.is_empty() {
                    track.control = format!("trackID={i}");
                }
                track
            })
            .collect();

        *self.describe.lock() = Some(DescribeInfo {
            tracks,
            base: url,
            mode: SessionMode::Record,
        });

        Ok(())
    }

    async fn setup_media(self: &Arc<Self>, media_idx: usize) -> Result<()> {
        self.ensure_state_for(Method::Setup)?;

        let info = self
            .describe
            .lock()
            .clone()
            .ok_or(RtspError::Protocol("setup before describe"))?;

        if self
            .medias
            .lock()
            .iter()
            .any(|media| media.idx == media_idx)
        {
            return Err(RtspError::Protocol("media already set up"));
        }

        let track = info
            .tracks
            .get(media_idx)
            .ok_or(RtspError::Protocol("invalid media index"))?
            .clone();

        let media_url = track.url(&info.base)?;

        let mode = info.mode;

        let session_protocol = *self.session_protocol.lock();

        let mut protocol = session_protocol.unwrap_or(match self.config.transport {
            ClientTransport::Tcp => TransportProtocol::Tcp,
            _ => TransportProtocol::Udp,
        });

        loop {
            let multicast = matches!(self.config.transport, ClientTransport::UdpMulticast)
                && protocol == TransportProtocol::Udp;

            let mut request_transport = Transport::new(protocol);

            let mut udp_pair = None;
            let mut channels = None;

            match protocol {
                TransportProtocol::Udp if multicast => {
                    request_transport.delivery = Some(Delivery::Multicast);
                }
                TransportProtocol::Udp => {
                    let bind_ip = unspecified_ip_for(self.current_conn()?.peer_addr.ip());
                    let pair = UdpPair::bind(bind_ip, None).await?;

                    request_transport.delivery = Some(Delivery::Unicast);
                    request_transport.client_ports = Some((pair.rtp_port, pair.rtcp_port));

                    udp_pair = Some(pair);
                }
                TransportProtocol::Tcp => {
                    let first = (self.next_channel.load(Ordering::Relaxed) * 2) as u8;

                    request_transport.delivery = Some(Delivery::Unicast);
                    request_transport.interleaved = Some((first, first + 1));

                    channels = Some((first, first + 1));
                }
            }

            if mode == SessionMode::Record {
                request_transport.mode = Some(TransportMode::Record);
            }

            let mut request = Request::new(Method::Setup, media_url.without_credentials());
            request.headers.insert_type(&request_transport);

            let response = self.request(request).await?;

            if response.status == StatusCode::UNSUPPORTED_TRANSPORT
                && protocol == TransportProtocol::Udp
                && matches!(self.config.transport, ClientTransport::Auto)
            {
                log::debug!("server rejected UDP, retrying SETUP over TCP");

                protocol = TransportProtocol::Tcp;
                continue;
            }

            if !response.status.is_success() {
                return Err(RtspError::bad_status(
                    response.status,
                    response.reason.as_deref(),
                ));
            }

            let response_transport: Transport = response.headers.get()?;

            let clock_rate = track
                .formats
                .first()
                .map(|format| format.clock_rate())
                .unwrap_or(90_000);

            let rr_ssrc = Ssrc(rand::random::<u32>());

            let cancel = self.closed.child_token();

            let transport = match protocol {
                TransportProtocol::Tcp => {
                    self.next_channel.fetch_add(1, Ordering::Relaxed);

                    MediaTransport::Tcp {
                        channels: response_transport.interleaved.or(channels).ok_or(
                            RtspError::Protocol("SETUP response without interleaved channels"),
                        )?,
                    }
                }
                TransportProtocol::Udp if multicast => {
                    let group = match response_transport.destination {
                        Some(IpAddr::V4(group)) if group.is_multicast() => group,
                        _ => {
                            return Err(RtspError::Protocol(
                                "multicast SETUP response without group destination",
                            ));
                        }
                    };

                    let (rtp_port, rtcp_port) = response_transport
                        .ports
                        .or(response_transport.server_ports)
                        .ok_or(RtspError::Protocol(
                            "multicast SETUP response without ports",
                        ))?;

                    // join before PLAY so no leading packets are missed
                    let rtp_socket = multicast_recv_socket(group, rtp_port)?;
                    let rtcp_socket = multicast_recv_socket(group, rtcp_port)?;

                    MediaTransport::Udp(UdpTransport {
                        rtp_socket: Arc::new(rtp_socket),
                        rtcp_socket: Arc::new(rtcp_socket),
                        rtp_port,
                        rtcp_port,
                        rtp_peer: Mutex::new(Some(SocketAddr::new(
                            IpAddr::V4(group),
                            rtp_port,
                        ))),
                        rtcp_peer: Mutex::new(Some(SocketAddr::new(
                            IpAddr::V4(group),
                            rtcp_port,
                        ))),
                        expected_ip: None,
                        any_port: false,
                    })
                }
                TransportProtocol::Udp => {
                    let pair = udp_pair.take().expect("pair bound above");

                    let peer_ip = response_transport
                        .source
                        .unwrap_or(self.current_conn()?.peer_addr.ip());

                    let server_ports = response_transport
                        .server_ports
                        .filter(|(rtp_port, _)| *rtp_port != 0);

                    if server_ports.is_none() && !self.config.any_port_enable {
                        return Err(RtspError::Protocol(
                            "SETUP response without server ports",
                        ));
                    }

                    let rtp_peer =
                        server_ports.map(|(port, _)| SocketAddr::new(peer_ip, port));
                    let rtcp_peer =
                        server_ports.map(|(_, port)| SocketAddr::new(peer_ip, port));

                    let transport = UdpTransport {
                        rtp_socket: pair.rtp,
                        rtcp_socket: pair.rtcp,
                        rtp_port: pair.rtp_port,
                        rtcp_port: pair.rtcp_port,
                        rtp_peer: Mutex::new(rtp_peer),
                        rtcp_peer: Mutex::new(rtcp_peer),
                        expected_ip: Some(peer_ip),
                        any_port: self.config.any_port_enable,
                    };

                    if mode == SessionMode::Record {
                        punch_firewall(&transport).await;
                    }

                    MediaTransport::Udp(transport)
                }
            };

            let rx = match (&transport, mode) {
                (MediaTransport::Tcp { .. }, _) => MediaRx::new_tcp(rr_ssrc, clock_rate)?,
                _ => MediaRx::new_udp(rr_ssrc, clock_rate)?,
            };

            let tx = MediaTx::new(
                response_transport.ssrc.map(Ssrc).unwrap_or(rr_ssrc),
                clock_rate,
                !self.config.disable_rtcp_sender_reports,
            )?;

            let media = Arc::new(ClientMedia {
                idx: media_idx,
                url: media_url,
                formats: track.formats.clone(),
                transport,
                rx: Mutex::new(rx),
                tx: Mutex::new(tx),
                last_packet_ms: AtomicU64::new(0),
                cancel,
            });

            media::spawn_udp_tasks(self, &media);

            match mode {
                SessionMode::Play => media::spawn_receiver_report_task(self, &media),
                SessionMode::Record => media::spawn_sender_report_task(self, &media),
            }

            self.medias.lock().push(media);

            *self.session_protocol.lock() = Some(protocol);

            let mut state = self.state.lock();

            if *state == ClientState::Initial {
                *state = match mode {
                    SessionMode::Play => ClientState::PrePlay,
                    SessionMode::Record => ClientState::PreRecord,
                };
            }

            return Ok(());
        }
    }

    async fn play(self: &Arc<Self>, range: Option<Range>) -> Result<Response> {
        self.ensure_state_for(Method::Play)?;

        let base = self
            .describe
            .lock()
            .as_ref()
            .map(|info| info.base.clone())
            .ok_or(RtspError::Protocol("play before setup"))?;

        let mut request = Request::new(Method::Play, base.without_credentials());

        if let Some(range) = &range {
            request.headers.insert_type(range);
        }

        let response = self.request(request).await?;

        if !response.status.is_success() {
            return Err(RtspError::bad_status(
                response.status,
                response.reason.as_deref(),
            ));
        }

        *self.play_range.lock() = range;
        *self.played_at.lock() = Some(Instant::now());
        *self.state.lock() = ClientState::Play;

        self.spawn_keepalive_once();
        self.spawn_udp_checker_once();

        Ok(response)
    }

    async fn record(self: &Arc<Self>) -> Result<Response> {
        self.ensure_state_for(Method::Record)?;

        let base = self
            .describe
            .lock()
            .as_ref()
            .map(|info| info.base.clone())
            .ok_or(RtspError::Protocol("record before setup"))?;

        let request = Request::new(Method::Record, base.without_credentials());

        let response = self.request(request).await?;

        if !response.status.is_success() {
            return Err(RtspError::bad_status(
                response.status,
                response.reason.as_deref(),
            ));
        }

        *self.state.lock() = ClientState::Record;

        self.spawn_keepalive_once();

        Ok(response)
    }

    async fn pause(self: &Arc<Self>) -> Result<Response> {
        self.ensure_state_for(Method::Pause)?;

        let base = self
            .describe
            .lock()
            .as_ref()
            .map(|info| info.base.clone())
            .ok_or(RtspError::Protocol("pause before setup"))?;

        let request = Request::new(Method::Pause, base.without_credentials());

        let response = self.request(request).await?;

        if !response.status.is_success() {
            return Err(RtspError::bad_status(
                response.status,
                response.reason.as_deref(),
            ));
        }

        let mut state = self.state.lock();

        *state = match *state {
            ClientState::Play => ClientState::PrePlay,
            ClientState::Record => ClientState::PreRecord,
            other => other,
        };

        Ok(response)
    }

    async fn teardown(self: &Arc<Self>) -> Result<()> {
        self.ensure_state_for(Method::Teardown)?;

        let base = self
            .describe
            .lock()
            .as_ref()
            .map(|info| info.base.clone())
            .unwrap_or_else(|| self.url.lock().clone());

        let request = Request::new(Method::Teardown, base.without_credentials());

        let result = self.request(request).await;

        self.shutdown();

        result.map(|_| ())
    }

    async fn send_packet_rtp(self: &Arc<Self>, media_idx: usize, packet: &RtpPacket) -> Result<()> {
        let media = self.media_by_idx(media_idx)?;

        media
            .tx
            .lock()
            .process_rtp(Instant::now(), packet, media.pts_equals_dts(packet));

        let payload = packet.to_bytes();

        self.bytes_sent
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        match &media.transport {
            MediaTransport::Tcp { channels } => {
                let frame = InterleavedFrame {
                    channel: channels.0,
                    payload,
                };

                self.write_to_conn(frame.to_bytes()).await
            }
            MediaTransport::Udp(udp) => {
                let peer = *udp.rtp_peer.lock();

                if let Some(peer) = peer {
                    udp.rtp_socket.send_to(&payload, peer).await?;
                }

                Ok(())
            }
        }
    }

    fn media_by_idx(&self, media_idx: usize) -> Result<Arc<ClientMedia>> {
        self.medias
            .lock()
            .iter()
            .find(|media| media.idx == media_idx)
            .cloned()
            .ok_or(RtspError::MediaNotSetup(media_idx))
    }

    // ==== BACKGROUND TASKS ====

    fn spawn_keepalive_once(self: &Arc<Self>) {
        if self.keepalive_spawned.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.clone();

        tokio::spawn(async move {
            loop {
                let period = {
                    let session = inner.session.lock();
                    let timeout = session
                        .as_ref()
                        .map(|session| session.timeout)
                        .unwrap_or(DEFAULT_SESSION_TIMEOUT);

                    Duration::from_secs((timeout / 2).max(1))
                };

                tokio::select! {
                    _ = inner.closed.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }

                let method = match inner.server_public.lock().as_ref() {
                    Some(public) if public.contains(Method::GetParameter) => Method::GetParameter,
                    _ => Method::Options,
                };

                let url = inner.url.lock().clone().without_credentials();

                if let Err(e) = inner.request(Request::new(method, url)).await {
                    inner.fatal(e);
                    return;
                }
            }
        });
    }

    fn spawn_udp_checker_once(self: &Arc<Self>) {
        let has_udp = self
            .medias
            .lock()
            .iter()
            .any(|media| matches!(media.transport, MediaTransport::Udp(_)));

        if !has_udp || self.checker_spawned.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = inner.closed.cancelled() => return,
                    _ = interval.tick() => {}
                }

                let Some(played_at) = *inner.played_at.lock() else {
                    continue;
                };

                let medias = inner.medias.lock().clone();

                let any_received = medias
                    .iter()
                    .any(|media| media.last_packet_ms.load(Ordering::Relaxed) > 0);

                if !any_received {
                    let waited = played_at.elapsed();

                    if waited >= inner.config.initial_udp_timeout
                        && matches!(inner.config.transport, ClientTransport::Auto)
                        && !inner.tcp_fallback_done.swap(true, Ordering::SeqCst)
                    {
                        log::info!("no UDP packets received, switching to TCP");

                        if let Err(e) = inner.fallback_to_tcp().await {
                            inner.fatal(e);
                        }

                        // TCP delivery needs no liveness checks
                        return;
                    }

                    if waited >= inner.config.read_timeout {
                        inner.fatal(RtspError::UdpTimeout);
                        return;
                    }
                } else {
                    let now = monotonic_ms();

                    for media in &medias {
                        let last = media.last_packet_ms.load(Ordering::Relaxed);

                        if last > 0
                            && now.saturating_sub(last)
                                > inner.config.read_timeout.as_millis() as u64
                        {
                            inner.fatal(RtspError::UdpTimeout);
                            return;
                        }
                    }
                }
            }
        });
    }

    /// One-shot automatic switch to TCP after a silent UDP session: rebuild
    /// the whole session over a fresh connection
    async fn fallback_to_tcp(self: &Arc<Self>) -> Result<()> {
        let media_idxs: Vec<usize> = {
            let mut medias = self.medias.lock();

            for media in medias.iter() {
                media.cancel.cancel();
            }

            medias.drain(..).map(|media| media.idx).collect()
        };

        let range = self.play_range.lock().clone();

        *self.session.lock() = None;
        *self.state.lock() = ClientState::Initial;
        *self.session_protocol.lock() = Some(TransportProtocol::Tcp);
        self.next_channel.store(0, Ordering::Relaxed);
        *self.played_at.lock() = None;

        self.reconnect().await?;
        self.options().await?;

        for media_idx in media_idxs {
            self.setup_media(media_idx).await?;
        }

        self.play(range).await?;

        Ok(())
    }
}

fn unspecified_ip_for(peer: IpAddr) -> IpAddr {
    match peer {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Open the NAT on both legs by sending an empty RTP packet and an empty
/// receiver report to the negotiated server ports
async fn punch_firewall(udp: &UdpTransport) {
    let rtp_peer = *udp.rtp_peer.lock();
    let rtcp_peer = *udp.rtcp_peer.lock();

    if let Some(peer) = rtp_peer {
        let empty = RtpPacket {
            pt: 0,
            marker: false,
            sequence_number: SequenceNumber(0),
            ssrc: Ssrc(0),
            timestamp: RtpTimestamp(0),
            payload: Bytes::new(),
        };

        let _ = udp.rtp_socket.send_to(&empty.to_vec(), peer).await;
    }

    if let Some(peer) = rtcp_peer {
        let report = ReceiverReport::builder(0);
        let size = report.calculate_size().unwrap_or(8);
        let mut buf = vec![0u8; size];
        let len = report.write_into_unchecked(&mut buf);
        buf.truncate(len);

        let _ = udp.rtcp_socket.send_to(&buf, peer).await;
    }
}

async fn reader_task(inner: Arc<Inner>, conn: Arc<Conn>, read_half: ReadHalf<BoxedIo>) {
    let mut framed = FramedRead::with_capacity(
        read_half,
        RtspDecoder::default(),
        inner.config.read_buffer_size,
    );

    loop {
        let item = tokio::select! {
            _ = conn.cancel.cancelled() => return,
            item = framed.next() => item,
        };

        match item {
            None => {
                inner.conn_lost(&conn, RtspError::ConnectionClosed);
                return;
            }
            Some(Err(e)) => {
                log::debug!("connection read error: {e}");
                inner.conn_lost(&conn, RtspError::Protocol("malformed message"));
                return;
            }
            Some(Ok(Item::Response(response))) => {
                inner
                    .bytes_received
                    .fetch_add(response.body.len() as u64, Ordering::Relaxed);

                if let Err(e) = inner.route_response(response) {
                    inner.conn_lost(&conn, e);
                    return;
                }
            }
            Some(Ok(Item::Request(request))) => {
                inner.handle_server_request(request, &conn).await;
            }
            Some(Ok(Item::Interleaved(frame))) => {
                inner.route_frame(frame);
            }
        }
    }
}
