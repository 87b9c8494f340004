//! Contains RTSP message parts and parsers

use crate::header::typed::ContentLength;
use crate::parse::{IResult, token, whitespace, ws};
use crate::{Headers, Method, Name, RtspUrl, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use bytesstr::BytesStr;
use nom::AsChar;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::char;
use nom::combinator::{map, map_res, opt, rest};
use std::fmt;
use std::str::{FromStr, from_utf8};

mod pull_parser;

pub use pull_parser::{Incomplete, PullParser};

/// Leading byte of an interleaved frame
pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Size of the interleaved frame header
pub const INTERLEAVED_HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("message is incomplete")]
    Incomplete,
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

/// A complete RTSP request
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: RtspUrl,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: RtspUrl) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn print(&self, dst: &mut BytesMut) {
        use std::fmt::Write;

        dst.reserve(64 + self.headers.printed_len() + self.body.len());

        let _ = write!(dst, "{} {} RTSP/1.0\r\n", self.method, self.url);
        let _ = write!(dst, "{}", self.headers);

        if !self.body.is_empty() && !self.headers.contains(&Name::CONTENT_LENGTH) {
            let _ = write!(dst, "Content-Length: {}\r\n", self.body.len());
        }

        dst.put_slice(b"\r\n");
        dst.put_slice(&self.body);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.print(&mut dst);
        dst.freeze()
    }
}

/// A complete RTSP response
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub reason: Option<BytesStr>,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    /// New response with the canonical reason phrase for `status`
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.text().map(BytesStr::from_static),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Self {
        let mut response = Self::new(status);
        response.headers.insert(Name::CONTENT_TYPE, content_type);
        response.body = body;
        response
    }

    pub fn print(&self, dst: &mut BytesMut) {
        use std::fmt::Write;

        dst.reserve(64 + self.headers.printed_len() + self.body.len());

        let _ = write!(dst, "RTSP/1.0 {}", self.status);

        if let Some(reason) = &self.reason {
            let _ = write!(dst, " {reason}");
        }

        dst.put_slice(b"\r\n");
        let _ = write!(dst, "{}", self.headers);

        if !self.body.is_empty() && !self.headers.contains(&Name::CONTENT_LENGTH) {
            let _ = write!(dst, "Content-Length: {}\r\n", self.body.len());
        }

        dst.put_slice(b"\r\n");
        dst.put_slice(&self.body);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.print(&mut dst);
        dst.freeze()
    }
}

/// A raw RTP or RTCP packet multiplexed onto the RTSP TCP connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedFrame {
    pub channel: u8,
    pub payload: Bytes,
}

impl InterleavedFrame {
    pub fn print(&self, dst: &mut BytesMut) {
        dst.reserve(INTERLEAVED_HEADER_LEN + self.payload.len());

        dst.put_u8(INTERLEAVED_MAGIC);
        dst.put_u8(self.channel);
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.print(&mut dst);
        dst.freeze()
    }
}

/// The leading line of any RTSP message
#[derive(Debug, Clone)]
pub enum MessageLine {
    Request(RequestLine),
    Response(StatusLine),
}

impl MessageLine {
    pub fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            alt((
                map(StatusLine::parse(src), MessageLine::Response),
                map(RequestLine::parse, MessageLine::Request),
            ))(i)
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(..))
    }
}

/// The leading line of an RTSP request message
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: Method,
    pub url: RtspUrl,
}

impl RequestLine {
    fn parse(i: &str) -> IResult<&str, Self> {
        map(
            ws((
                Method::parse,
                map_res(take_while1(|c| !whitespace(c)), RtspUrl::parse),
                tag("RTSP/1.0"),
            )),
            |(method, url, _)| RequestLine { method, url },
        )(i)
    }
}

/// The leading line of an RTSP response message
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub status: StatusCode,
    pub reason: Option<BytesStr>,
}

impl StatusLine {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                ws((
                    tag("RTSP/1.0"),
                    map_res(take_while1(|c: char| c.is_dec_digit()), u16::from_str),
                    opt(rest),
                )),
                move |(_, status, reason): (_, _, Option<&str>)| StatusLine {
                    status: StatusCode::from(status),
                    reason: reason.and_then(|reason| match reason.trim() {
                        "" => None,
                        s => Some(BytesStr::from_parse(src, s)),
                    }),
                },
            )(i)
        }
    }
}

/// A `header-name: header-value` line inside a message head
pub struct Line {
    pub name: Name,
    pub value: BytesStr,
}

impl Line {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map_res(
            ws((take_while1(token), char(':'), rest)),
            |(name, _, value): (&str, _, &str)| -> Result<Line, &'static str> {
                if name.len() > 255 {
                    return Err("header name too long");
                }

                let value = value.trim();

                if value.len() > 2047 {
                    return Err("header value too long");
                }

                Ok(Line {
                    name: BytesStr::from_parse(src, name).into(),
                    value: BytesStr::from_parse(src, value),
                })
            },
        )(i)
    }
}

/// Message head parsed from a complete head buffer
pub struct Head {
    pub line: MessageLine,
    pub headers: Headers,
    pub head_end: usize,
}

/// Parse a message head out of `src`.
///
/// `src` must contain the complete head (terminated by an empty line);
/// [`PullParser::check_complete`] can be used to verify that beforehand.
/// Malformed header lines are skipped with a log entry; a malformed leading
/// line is an error.
pub fn parse_head(src: &Bytes) -> Result<Head, MessageError> {
    let mut parser = PullParser::new(src, 0);

    let mut line = None;
    let mut headers = Headers::new();

    for item in &mut parser {
        let item = item.map_err(|_| MessageError::Incomplete)?;

        let item = from_utf8(item).map_err(|_| MessageError::Malformed("invalid utf8"))?;

        if line.is_none() {
            match MessageLine::parse(src)(item) {
                Ok((_, parsed)) => line = Some(parsed),
                Err(_) => return Err(MessageError::Malformed("invalid message line")),
            }
        } else {
            match Line::parse(src, item) {
                Ok((_, header_line)) => headers.insert(header_line.name, header_line.value),
                Err(e) => {
                    log::warn!("skipping malformed header line: {e}");
                }
            }
        }
    }

    Ok(Head {
        line: line.ok_or(MessageError::Malformed("empty message"))?,
        headers,
        head_end: parser.head_end(),
    })
}

/// A parsed RTSP text message (request or response)
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum RtspMessage {
    Request(Request),
    Response(Response),
}

impl RtspMessage {
    /// Parse a complete message, body included
    pub fn parse(src: &Bytes) -> Result<Self, MessageError> {
        let head = parse_head(src)?;

        let content_length = match head.headers.try_get::<ContentLength>() {
            Some(Ok(content_length)) => content_length.0,
            Some(Err(_)) => return Err(MessageError::Malformed("invalid content-length")),
            None => 0,
        };

        if src.len() < head.head_end + content_length {
            return Err(MessageError::Incomplete);
        }

        let body = src.slice(head.head_end..head.head_end + content_length);

        Ok(match head.line {
            MessageLine::Request(line) => RtspMessage::Request(Request {
                method: line.method,
                url: line.url,
                headers: head.headers,
                body,
            }),
            MessageLine::Response(line) => RtspMessage::Response(Response {
                status: line.status,
                reason: line.reason,
                headers: head.headers,
                body,
            }),
        })
    }
}

macro_rules! fmt_via_print {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut dst = BytesMut::new();
            self.print(&mut dst);
            f.write_str(from_utf8(&dst).map_err(|_| fmt::Error)?)
        }
    };
}

impl fmt::Display for Request {
    fmt_via_print!();
}

impl fmt::Display for Response {
    fmt_via_print!();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::typed::CSeq;

    #[test]
    fn request_roundtrip() {
        let mut request = Request::new(
            Method::Describe,
            RtspUrl::parse("rtsp://host:8554/s").unwrap(),
        );
        request.headers.insert_type(&CSeq(2));
        request.headers.insert(Name::ACCEPT, "application/sdp");

        let bytes = request.to_bytes();

        let RtspMessage::Request(parsed) = RtspMessage::parse(&bytes).unwrap() else {
            panic!("expected request")
        };

        assert_eq!(parsed, request);
    }

    #[test]
    fn request_roundtrip_with_body() {
        let mut request = Request::new(
            Method::Announce,
            RtspUrl::parse("rtsp://host/publish").unwrap(),
        );
        request.headers.insert_type(&CSeq(1));
        request.headers.insert(Name::CONTENT_TYPE, "application/sdp");
        request.headers.insert(Name::CONTENT_LENGTH, "5");
        request.body = Bytes::from_static(b"v=0\r\n");

        let bytes = request.to_bytes();

        let RtspMessage::Request(parsed) = RtspMessage::parse(&bytes).unwrap() else {
            panic!("expected request")
        };

        assert_eq!(parsed, request);
    }

    #[test]
    fn response_roundtrip() {
        let mut response = Response::new(StatusCode::OK);
        response.headers.insert_type(&CSeq(3));

        let bytes = response.to_bytes();

        let RtspMessage::Response(parsed) = RtspMessage::parse(&bytes).unwrap() else {
            panic!("expected response")
        };

        assert_eq!(parsed, response);
    }

    #[test]
    fn response_without_reason() {
        let bytes = Bytes::from_static(b"RTSP/1.0 551\r\nCSeq: 4\r\n\r\n");

        let RtspMessage::Response(parsed) = RtspMessage::parse(&bytes).unwrap() else {
            panic!("expected response")
        };

        assert_eq!(parsed.status, StatusCode::OPTION_NOT_SUPPORTED);
        assert_eq!(parsed.reason, None);
    }

    #[test]
    fn incomplete_body() {
        let bytes = Bytes::from_static(b"RTSP/1.0 200 OK\r\nContent-Length: 10\r\n\r\nabc");

        assert!(matches!(
            RtspMessage::parse(&bytes),
            Err(MessageError::Incomplete)
        ));
    }

    #[test]
    fn invalid_method_is_rejected() {
        let bytes = Bytes::from_static(b"FETCH rtsp://host/s RTSP/1.0\r\nCSeq: 1\r\n\r\n");

        assert!(RtspMessage::parse(&bytes).is_err());
    }

    #[test]
    fn interleaved_frame_print() {
        let frame = InterleavedFrame {
            channel: 0,
            payload: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
        };

        assert_eq!(
            frame.to_bytes().as_ref(),
            &[0x24, 0x00, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04]
        );
    }
}
