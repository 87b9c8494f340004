use bytes::{Buf, Bytes, BytesMut};
use rtsp_types::header::typed::ContentLength;
use rtsp_types::msg::{
    INTERLEAVED_HEADER_LEN, INTERLEAVED_MAGIC, InterleavedFrame, MessageLine, PullParser, Request,
    Response, parse_head,
};
use std::io;
use tokio_util::codec::Decoder;

/// Upper bound for a message head, anything larger is a protocol violation
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Default upper bound for a message body
pub(crate) const DEFAULT_MAX_BODY_SIZE: usize = 128 * 1024;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("received message too large")]
    MessageTooLarge,
    #[error("received message is malformed")]
    Malformed,
}

/// Any of the three interleaved message kinds an RTSP connection carries
#[allow(clippy::large_enum_variant)]
pub(crate) enum Item {
    Request(Request),
    Response(Response),
    Interleaved(InterleavedFrame),
}

/// Streaming decoder for the RTSP byte stream.
///
/// The first byte decides the message kind: `$` starts an interleaved frame,
/// anything else a text message whose head is scanned incrementally until the
/// terminating empty line.
pub(crate) struct RtspDecoder {
    head_progress: usize,
    max_body_size: usize,
}

impl RtspDecoder {
    pub(crate) fn new(max_body_size: usize) -> Self {
        Self {
            head_progress: 0,
            max_body_size,
        }
    }
}

impl Default for RtspDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BODY_SIZE)
    }
}

impl Decoder for RtspDecoder {
    type Item = Item;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if src[0] == INTERLEAVED_MAGIC {
            if src.len() < INTERLEAVED_HEADER_LEN {
                return Ok(None);
            }

            let channel = src[1];
            let len = usize::from(u16::from_be_bytes([src[2], src[3]]));

            if src.len() < INTERLEAVED_HEADER_LEN + len {
                src.reserve(INTERLEAVED_HEADER_LEN + len - src.len());
                return Ok(None);
            }

            src.advance(INTERLEAVED_HEADER_LEN);
            let payload = src.split_to(len).freeze();

            return Ok(Some(Item::Interleaved(InterleavedFrame {
                channel,
                payload,
            })));
        }

        // strip leading newlines between messages
        let newline_count = src
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        if newline_count > 0 {
            src.advance(newline_count);
            self.head_progress = 0;
            return self.decode(src);
        }

        if src.len() > MAX_HEAD_SIZE + self.max_body_size {
            src.clear();

            return Err(Error::MessageTooLarge);
        }

        let mut parser = PullParser::new(src, self.head_progress);

        if parser.check_complete().is_err() {
            // cannot parse the complete message head yet
            if parser.progress() > MAX_HEAD_SIZE {
                return Err(Error::MessageTooLarge);
            }

            self.head_progress = parser.progress();
            return Ok(None);
        }

        let head_end = parser.head_end();

        // the head is complete, parse it and find the body length
        let head_bytes = Bytes::copy_from_slice(&src[..head_end]);

        let head = parse_head(&head_bytes).map_err(|_| Error::Malformed)?;

        let content_length = match head.headers.try_get::<ContentLength>() {
            Some(Ok(content_length)) => content_length.0,
            Some(Err(_)) => return Err(Error::Malformed),
            None => 0,
        };

        if content_length > self.max_body_size {
            return Err(Error::MessageTooLarge);
        }

        if src.len() < head_end + content_length {
            // body not fully received yet
            src.reserve(head_end + content_length - src.len());
            return Ok(None);
        }

        src.advance(head_end);
        let body = src.split_to(content_length).freeze();

        // reset state for the next message
        self.head_progress = 0;

        Ok(Some(match head.line {
            MessageLine::Request(line) => Item::Request(Request {
                method: line.method,
                url: line.url,
                headers: head.headers,
                body,
            }),
            MessageLine::Response(line) => Item::Response(Response {
                status: line.status,
                reason: line.reason,
                headers: head.headers,
                body,
            }),
        }))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rtsp_types::{Method, Name, StatusCode};

    fn decode_all(decoder: &mut RtspDecoder, src: &mut BytesMut) -> Vec<Item> {
        let mut items = vec![];

        while let Some(item) = decoder.decode(src).unwrap() {
            items.push(item);
        }

        items
    }

    #[test]
    fn decode_request() {
        let mut decoder = RtspDecoder::default();
        let mut src = BytesMut::from(
            &b"OPTIONS rtsp://host/s RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: test\r\n\r\n"[..],
        );

        let items = decode_all(&mut decoder, &mut src);

        assert_eq!(items.len(), 1);

        let Item::Request(request) = &items[0] else {
            panic!("expected request")
        };

        assert_eq!(request.method, Method::Options);
        assert_eq!(request.headers.value(&Name::CSEQ).unwrap(), "1");
    }

    #[test]
    fn decode_partial_then_complete() {
        let mut decoder = RtspDecoder::default();
        let full = b"RTSP/1.0 200 OK\r\nCSeq: 4\r\nContent-Length: 4\r\n\r\nbody";

        let mut src = BytesMut::from(&full[..20]);
        assert!(decoder.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&full[20..]);

        let Item::Response(response) = decoder.decode(&mut src).unwrap().unwrap() else {
            panic!("expected response")
        };

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body.as_ref(), b"body");
    }

    #[test]
    fn decode_interleaved_between_messages() {
        let mut decoder = RtspDecoder::default();

        let mut src = BytesMut::new();
        src.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 1\r\n\r\n");
        src.extend_from_slice(&[0x24, 0x02, 0x00, 0x03, 0xAA, 0xBB, 0xCC]);
        src.extend_from_slice(b"RTSP/1.0 200 OK\r\nCSeq: 2\r\n\r\n");

        let items = decode_all(&mut decoder, &mut src);

        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], Item::Response(_)));

        let Item::Interleaved(frame) = &items[1] else {
            panic!("expected interleaved frame")
        };

        assert_eq!(frame.channel, 2);
        assert_eq!(frame.payload.as_ref(), &[0xAA, 0xBB, 0xCC]);

        assert!(matches!(items[2], Item::Response(_)));
    }

    #[test]
    fn incomplete_interleaved() {
        let mut decoder = RtspDecoder::default();

        let mut src = BytesMut::from(&[0x24u8, 0x00, 0x00, 0x10, 0x01][..]);

        assert!(decoder.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn oversized_body_rejected() {
        let mut decoder = RtspDecoder::new(16);

        let mut src = BytesMut::from(
            &b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nContent-Length: 999999\r\n\r\n"[..],
        );

        assert!(decoder.decode(&mut src).is_err());
    }

    #[test]
    fn malformed_message_line_rejected() {
        let mut decoder = RtspDecoder::default();

        let mut src = BytesMut::from(&b"NONSENSE nonsense\r\nCSeq: 1\r\n\r\n"[..]);

        assert!(decoder.decode(&mut src).is_err());
    }
}
