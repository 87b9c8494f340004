use crate::{RtpTimestamp, SequenceNumber, Ssrc};
use bytes::Bytes;
use rtp_types::{RtpPacketBuilder, prelude::RtpPacketWriter};

/// An owned RTP packet.
///
/// RTSP carries no header extensions, so only the fixed header fields are
/// modeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub pt: u8,
    pub marker: bool,
    pub sequence_number: SequenceNumber,
    pub ssrc: Ssrc,
    pub timestamp: RtpTimestamp,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn write_vec(&self, vec: &mut Vec<u8>) {
        let header_start = vec.len();

        {
            let builder = RtpPacketBuilder::<_, Vec<u8>>::new()
                .payload_type(self.pt)
                .sequence_number(self.sequence_number.0)
                .ssrc(self.ssrc.0)
                .timestamp(self.timestamp.0)
                .payload(&self.payload[..]);

            vec.reserve(builder.calculate_size().unwrap_or(0));

            let mut writer = RtpPacketWriterVec {
                output: vec,
                padding: None,
            };
            let _ = builder.write(&mut writer);
        }

        // second header byte carries the marker bit in front of the payload type
        if self.marker && vec.len() > header_start + 1 {
            vec[header_start + 1] |= 0x80;
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(1500);
        self.write_vec(&mut vec);
        vec
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_vec())
    }

    pub fn parse(bytes: impl Into<Bytes>) -> Result<Self, rtp_types::RtpParseError> {
        let packet: Bytes = bytes.into();

        let parsed = rtp_types::RtpPacket::parse(&packet[..])?;

        Ok(Self {
            pt: parsed.payload_type(),
            marker: packet[1] & 0x80 != 0,
            sequence_number: SequenceNumber(parsed.sequence_number()),
            ssrc: Ssrc(parsed.ssrc()),
            timestamp: RtpTimestamp(parsed.timestamp()),
            payload: packet.slice_ref(parsed.payload()),
        })
    }
}

struct RtpPacketWriterVec<'a> {
    output: &'a mut Vec<u8>,
    padding: Option<u8>,
}

impl<'a> RtpPacketWriter for RtpPacketWriterVec<'a> {
    type Output = ();
    type Payload = &'a [u8];
    type Extension = Vec<u8>;

    fn reserve(&mut self, size: usize) {
        if self.output.len() < size {
            self.output.reserve(size - self.output.len());
        }
    }

    fn push(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data)
    }

    fn push_extension(&mut self, extension_data: &Self::Extension) {
        self.push(extension_data)
    }

    fn push_payload(&mut self, data: &Self::Payload) {
        self.push(data)
    }

    fn padding(&mut self, size: u8) {
        self.padding = Some(size);
    }

    fn finish(&mut self) -> Self::Output {
        if let Some(padding) = self.padding.take() {
            self.output
                .resize(self.output.len() + padding as usize - 1, 0);
            self.output.push(padding);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let packet = RtpPacket {
            pt: 97,
            marker: true,
            sequence_number: SequenceNumber(4102),
            ssrc: Ssrc(0x38F2_7A2F),
            timestamp: RtpTimestamp(54352),
            payload: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
        };

        let bytes = packet.to_bytes();

        assert_eq!(bytes[0] >> 6, 2);
        assert_eq!(bytes[1], 0x80 | 97);

        let parsed = RtpPacket::parse(bytes).unwrap();

        assert_eq!(parsed, packet);
    }

    #[test]
    fn parse_without_marker() {
        let packet = RtpPacket {
            pt: 96,
            marker: false,
            sequence_number: SequenceNumber(1),
            ssrc: Ssrc(1),
            timestamp: RtpTimestamp(0),
            payload: Bytes::new(),
        };

        let parsed = RtpPacket::parse(packet.to_bytes()).unwrap();

        assert!(!parsed.marker);
    }

    #[test]
    fn reject_truncated() {
        assert!(RtpPacket::parse(Bytes::from_static(&[0x80, 0x60, 0x00])).is_err());
    }
}
