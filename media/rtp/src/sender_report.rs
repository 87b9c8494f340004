use crate::{InvalidClockRate, NtpTimestamp, RtpPacket, RtpTimestamp, Ssrc};
use rtcp_types::{CompoundBuilder, RtcpPacket, RtcpPacketWriter, SenderReport};
use std::time::Instant;

/// RTCP sender report generator for the record side of a stream.
///
/// The NTP/RTP timestamp mapping is anchored at the most recent packet whose
/// format reported equal PTS and DTS; packets in between only advance the
/// running packet and octet counters.
pub struct SenderReportGenerator {
    ssrc: Ssrc,
    clock_rate: u32,

    packet_count: u32,
    octet_count: u32,

    anchor: Option<Anchor>,
}

struct Anchor {
    at: Instant,
    rtp_timestamp: RtpTimestamp,
    ntp_timestamp: NtpTimestamp,
}

impl SenderReportGenerator {
    pub fn new(ssrc: Ssrc, clock_rate: u32) -> Result<Self, InvalidClockRate> {
        if clock_rate == 0 {
            return Err(InvalidClockRate);
        }

        Ok(Self {
            ssrc,
            clock_rate,
            packet_count: 0,
            octet_count: 0,
            anchor: None,
        })
    }

    /// Register a sent RTP packet.
    ///
    /// `pts_equals_dts` is the format's verdict for this packet; only such
    /// packets can anchor the wall-clock mapping.
    pub fn process_rtp(&mut self, now: Instant, packet: &RtpPacket, pts_equals_dts: bool) {
        self.packet_count = self.packet_count.wrapping_add(1);
        self.octet_count = self.octet_count.wrapping_add(packet.payload.len() as u32);

        if pts_equals_dts {
            self.anchor = Some(Anchor {
                at: now,
                rtp_timestamp: packet.timestamp,
                ntp_timestamp: NtpTimestamp::now(),
            });
        }
    }

    /// Generate a sender report.
    ///
    /// Returns `None` until a packet with `pts_equals_dts` anchored the
    /// timestamp mapping.
    pub fn generate(&mut self, now: Instant) -> Option<Vec<u8>> {
        let anchor = self.anchor.as_ref()?;

        let elapsed = now.duration_since(anchor.at);

        let rtp_timestamp = anchor
            .rtp_timestamp
            .0
            .wrapping_add((elapsed.as_secs_f64() * f64::from(self.clock_rate)) as u32);

        let ntp = NtpTimestamp::from_fixed_u64(
            anchor.ntp_timestamp.to_fixed_u64() + ((elapsed.as_secs_f64()
                * (u64::from(u32::MAX) + 1) as f64) as u64),
        );

        let compound = CompoundBuilder::default().add_packet(
            SenderReport::builder(self.ssrc.0)
                .ntp_timestamp(ntp.to_fixed_u64())
                .rtp_timestamp(rtp_timestamp)
                .packet_count(self.packet_count)
                .octet_count(self.octet_count),
        );

        let size = compound.calculate_size().ok()?;
        let mut buf = vec![0u8; size];
        let len = compound.write_into_unchecked(&mut buf);
        buf.truncate(len);

        Some(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::SequenceNumber;
    use bytes::Bytes;
    use rtcp_types::{Compound, Packet};
    use std::time::Duration;

    fn make_packet(seq: u16, payload: &'static [u8]) -> RtpPacket {
        RtpPacket {
            pt: 96,
            marker: false,
            sequence_number: SequenceNumber(seq),
            ssrc: Ssrc(0x38F2_7A2F),
            timestamp: RtpTimestamp(54352),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn rejects_zero_clock_rate() {
        assert!(SenderReportGenerator::new(Ssrc(1), 0).is_err());
    }

    #[test]
    fn no_report_without_anchor() {
        let mut generator = SenderReportGenerator::new(Ssrc(1), 90_000).unwrap();

        generator.process_rtp(Instant::now(), &make_packet(1, &[0x05]), false);

        assert!(generator.generate(Instant::now()).is_none());
    }

    #[test]
    fn report_counts() {
        let mut generator = SenderReportGenerator::new(Ssrc(0x38F2_7A2F), 90_000).unwrap();

        let now = Instant::now();

        generator.process_rtp(now, &make_packet(1, &[0x05]), true);
        generator.process_rtp(now + Duration::from_millis(10), &make_packet(2, &[0x05]), true);

        let report = generator.generate(now + Duration::from_millis(20)).unwrap();

        let mut compound = Compound::parse(&report).unwrap();

        let Packet::Sr(sr) = compound.next().unwrap().unwrap() else {
            panic!("expected sender report")
        };

        assert_eq!(sr.ssrc(), 0x38F2_7A2F);
        assert_eq!(sr.packet_count(), 2);
        assert_eq!(sr.octet_count(), 2);
    }
}
