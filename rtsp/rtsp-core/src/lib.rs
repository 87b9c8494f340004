//! RTSP core: client and server engines over the shared wire model.
//!
//! The [`client`] module drives outgoing sessions (play and publish), the
//! [`server`] module accepts sessions and fans streams out to readers.
//! Media-format knowledge stays behind the opaque [`Format`] trait; SDP
//! handling is delegated to the external `sdp-types` crate.

pub mod client;
pub mod server;

mod codec;
mod conn;
mod description;
mod error;
mod format;
mod media;
mod transport;

pub use client::{Client, ClientConfig, ClientHandler, ClientTransport, Stats};
pub use description::{MediaKind, Track, tracks_from_sdp, tracks_to_sdp};
pub use error::{DecodeError, Result, RtspError};
pub use format::{Format, GenericFormat};
pub use server::{ConnCtx, RequestCtx, Server, ServerConfig, ServerHandler, ServerStream};

pub use rtp;
pub use rtsp_auth;
pub use rtsp_types;
