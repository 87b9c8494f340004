use rtsp_types::header::HeaderError;
use rtsp_types::{Method, StatusCode};
use std::io;

/// Fatal errors of a connection or session
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("{method} is not valid in state {state}")]
    InvalidState { method: Method, state: &'static str },

    #[error("server responded with {status} {reason}")]
    BadStatus { status: StatusCode, reason: String },

    #[error("response CSeq does not match the request")]
    CSeqMismatch,

    #[error(transparent)]
    Auth(#[from] rtsp_auth::AuthError),

    #[error("read timeout")]
    ReadTimeout,

    #[error("write timeout")]
    WriteTimeout,

    #[error("UDP timeout")]
    UdpTimeout,

    #[error("session timed out")]
    SessionTimeout,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("redirect without a Location header")]
    RedirectWithoutLocation,

    #[error(transparent)]
    Url(#[from] rtsp_types::UrlError),

    #[error("invalid session description: {0}")]
    Sdp(&'static str),

    #[error("no UDP ports available")]
    NoUdpPortsAvailable,

    #[error("media {0} was not set up")]
    MediaNotSetup(usize),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("rtsps is not supported without the tls feature")]
    TlsUnavailable,

    #[error(transparent)]
    Rtp(#[from] rtp::InvalidClockRate),
}

impl RtspError {
    pub(crate) fn bad_status(status: StatusCode, reason: Option<&str>) -> Self {
        Self::BadStatus {
            status,
            reason: reason
                .or_else(|| status.text())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// Non-fatal decode problems reported through the `on_decode_error` callbacks
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid RTP packet: {0}")]
    Rtp(String),

    #[error("invalid RTCP packet: {0}")]
    Rtcp(String),

    #[error("UDP payload of {0} bytes is too large")]
    OversizedPayload(usize),

    #[error("packet for unknown channel {0}")]
    UnknownChannel(u8),
}

pub type Result<T, E = RtspError> = std::result::Result<T, E>;
