//! Types for RTSP 1.0 messages, headers and URLs.
//!
//! This crate contains the wire-level model shared by the client and server
//! engines: [`Method`], [`StatusCode`], the [`Headers`] multimap with its
//! typed header implementations, [`RtspUrl`] and the message types
//! ([`Request`], [`Response`], [`InterleavedFrame`]).

pub mod header;
pub mod msg;
pub mod parse;

mod method;
mod status;
mod url;

pub use header::Name;
pub use header::headers::Headers;
pub use method::Method;
pub use status::{StatusCode, StatusCodeKind};
pub use self::url::{RtspUrl, UrlError};
