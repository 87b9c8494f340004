//! Typed header implementations

mod auth;
mod content;
mod cseq;
mod public;
mod range;
mod rtp_info;
mod session;
mod transport;

pub use auth::{
    Algorithm, AuthParam, Authorization, BasicChallenge, Challenge, DigestAuthorization,
    DigestChallenge,
};
pub use content::{ContentBase, ContentLength, ContentType};
pub use cseq::CSeq;
pub use public::Public;
pub use range::{NptRange, NptTime, Range, SmpteRange, SmpteTime};
pub use rtp_info::{RtpInfo, RtpInfoEntry};
pub use session::Session;
pub use transport::{Delivery, Transport, TransportMode, TransportProtocol};
