use super::stream::ServerStream;
use crate::description::Track;
use crate::error::DecodeError;
use bytes::Bytes;
use rtp::RtpPacket;
use rtsp_auth::{Credentials, ValidateError, Validator};
use rtsp_types::header::typed::Challenge;
use rtsp_types::msg::{Request, Response};
use rtsp_types::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;

/// Information about an accepted connection
#[derive(Debug, Clone)]
pub struct ConnCtx {
    pub id: u64,
    pub peer_addr: SocketAddr,
}

/// Context of a dispatched request.
///
/// Handlers answer with either a payload (per method) or a ready [`Response`]
/// which the engine stamps and sends as-is.
pub struct RequestCtx {
    pub conn_id: u64,
    pub peer_addr: SocketAddr,
    pub request: Request,
    pub session_id: Option<String>,
    /// Credential validator bound to the connection (its nonce is
    /// per-connection)
    pub validator: Arc<Validator>,
}

impl RequestCtx {
    /// Path and query of the request URL
    pub fn path(&self) -> String {
        self.request.url.path_and_query()
    }

    /// Validate the request's credentials, producing the ready 401 response
    /// on failure
    pub fn authenticate(&self, credentials: &Credentials) -> Result<(), Response> {
        match self.validator.validate(&self.request, credentials) {
            Ok(()) => Ok(()),
            Err(error) => {
                let stale = matches!(error, ValidateError::StaleNonce);

                if !matches!(error, ValidateError::MissingAuthorization) {
                    log::debug!("authentication failed: {error}");
                }

                let mut response = Response::new(StatusCode::UNAUTHORIZED);

                for challenge in self.validator.challenges(stale) {
                    response.headers.insert_type::<Challenge>(&challenge);
                }

                Err(response)
            }
        }
    }
}

/// Server callbacks.
///
/// The `on_<method>` callbacks decide the payload of a response while the
/// engine negotiates transports, stamps headers and keeps the session state
/// machine; `Err(Response)` short-circuits with that response. The packet
/// callbacks are invoked synchronously from reader tasks.
#[async_trait::async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    async fn on_connection_open(&self, ctx: &ConnCtx) {
        let _ = ctx;
    }

    async fn on_connection_close(&self, ctx: &ConnCtx) {
        let _ = ctx;
    }

    async fn on_session_open(&self, session_id: &str) {
        let _ = session_id;
    }

    async fn on_session_close(&self, session_id: &str) {
        let _ = session_id;
    }

    /// Answer an OPTIONS request; `None` lets the engine advertise every
    /// implemented method
    async fn on_options(&self, ctx: &RequestCtx) -> Option<Response> {
        let _ = ctx;
        None
    }

    /// Return the stream to describe; its tracks become the SDP body
    async fn on_describe(&self, ctx: &RequestCtx) -> Result<Arc<ServerStream>, Response> {
        let _ = ctx;
        Err(Response::new(StatusCode::NOT_IMPLEMENTED))
    }

    /// Accept or reject an incoming publish
    async fn on_announce(&self, ctx: &RequestCtx, tracks: &[Track]) -> Result<(), Response> {
        let _ = (ctx, tracks);
        Err(Response::new(StatusCode::NOT_IMPLEMENTED))
    }

    /// Accept a SETUP.
    ///
    /// Playback sessions must return the stream being read; record sessions
    /// return `Ok(None)`.
    async fn on_setup(&self, ctx: &RequestCtx) -> Result<Option<Arc<ServerStream>>, Response> {
        let _ = ctx;
        Err(Response::new(StatusCode::NOT_IMPLEMENTED))
    }

    async fn on_play(&self, ctx: &RequestCtx) -> Result<(), Response> {
        let _ = ctx;
        Ok(())
    }

    async fn on_record(&self, ctx: &RequestCtx) -> Result<(), Response> {
        let _ = ctx;
        Ok(())
    }

    async fn on_pause(&self, ctx: &RequestCtx) -> Result<(), Response> {
        let _ = ctx;
        Ok(())
    }

    /// `None` yields an empty 200, which keeps GET_PARAMETER usable as a
    /// keep-alive without handler support
    async fn on_get_parameter(&self, ctx: &RequestCtx) -> Option<Response> {
        let _ = ctx;
        None
    }

    async fn on_set_parameter(&self, ctx: &RequestCtx) -> Option<Response> {
        let _ = ctx;
        None
    }

    /// RTP packet received on a record session
    fn on_packet_rtp(&self, session_id: &str, media_idx: usize, packet: RtpPacket) {
        let _ = (session_id, media_idx, packet);
    }

    /// RTCP packet received on a session
    fn on_packet_rtcp(&self, session_id: &str, media_idx: usize, payload: Bytes) {
        let _ = (session_id, media_idx, payload);
    }

    fn on_packets_lost(&self, session_id: &str, media_idx: usize, count: u64) {
        log::warn!("session {session_id} media {media_idx}: {count} RTP packets lost");
    }

    fn on_decode_error(&self, session_id: &str, media_idx: usize, error: DecodeError) {
        log::warn!("session {session_id} media {media_idx}: {error}");
    }

    /// A reader's write queue was full; the packet was dropped for that
    /// reader only
    fn on_stream_write_error(&self, session_id: &str, media_idx: usize) {
        log::warn!("session {session_id} media {media_idx}: write queue full, packet dropped");
    }
}
