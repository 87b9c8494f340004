use crate::{
    ExtendedSequenceNumber, InvalidClockRate, NtpTimestamp, RtpPacket, RtpTimestamp, Ssrc,
};
use rtcp_types::{CompoundBuilder, ReceiverReport, ReportBlock, RtcpPacket, RtcpPacketWriter};
use std::time::Instant;

/// RTCP receiver report generator for the play side of a stream.
///
/// Fed with every received RTP packet and the NTP timestamps of incoming
/// sender reports, it produces the RFC 3550 receiver report: highest extended
/// sequence number, cumulative and fraction lost, smoothed interarrival
/// jitter and the LSR/DLSR pair.
pub struct ReceiverReportGenerator {
    ssrc: Ssrc,
    clock_rate: u32,

    remote_ssrc: Option<Ssrc>,

    highest_seq: Option<ExtendedSequenceNumber>,
    first_seq: Option<ExtendedSequenceNumber>,

    received: u64,
    expected_prior: u64,
    received_prior: u64,

    jitter: f32,
    last_arrival: Option<(Instant, RtpTimestamp)>,

    last_sr: Option<(Instant, u32)>,
}

impl ReceiverReportGenerator {
    pub fn new(ssrc: Ssrc, clock_rate: u32) -> Result<Self, InvalidClockRate> {
        if clock_rate == 0 {
            return Err(InvalidClockRate);
        }

        Ok(Self {
            ssrc,
            clock_rate,
            remote_ssrc: None,
            highest_seq: None,
            first_seq: None,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter: 0.0,
            last_arrival: None,
            last_sr: None,
        })
    }

    /// Register a received RTP packet
    pub fn process_rtp(&mut self, now: Instant, packet: &RtpPacket) {
        self.remote_ssrc = Some(packet.ssrc);
        self.received += 1;

        match self.highest_seq {
            Some(highest) => {
                let extended = highest.guess_extended(packet.sequence_number);

                if extended > highest {
                    self.highest_seq = Some(extended);
                }
            }
            None => {
                let extended = ExtendedSequenceNumber(u64::from(packet.sequence_number.0));

                self.highest_seq = Some(extended);
                self.first_seq = Some(extended);
            }
        };

        // RFC 3550 jitter estimator, smoothed by 1/16 per packet
        if let Some((last_instant, last_timestamp)) = self.last_arrival {
            let arrival_delta = now.duration_since(last_instant).as_secs_f32();
            let arrival_delta = (arrival_delta * self.clock_rate as f32) as i64;

            let timestamp_delta =
                i64::from(packet.timestamp.0) - i64::from(last_timestamp.0);

            let d = arrival_delta.abs_diff(timestamp_delta);

            self.jitter += (d as f32 - self.jitter) / 16.0;
        }

        self.last_arrival = Some((now, packet.timestamp));
    }

    /// Register the NTP timestamp of a received sender report
    pub fn process_sender_report(&mut self, now: Instant, ntp: NtpTimestamp) {
        self.last_sr = Some((now, ntp.to_fixed_u32()));
    }

    /// Total number of packets expected so far
    fn expected(&self) -> u64 {
        match (self.first_seq, self.highest_seq) {
            (Some(first), Some(highest)) => highest.0 - first.0 + 1,
            _ => 0,
        }
    }

    /// Cumulative number of packets lost
    pub fn lost(&self) -> u64 {
        self.expected().saturating_sub(self.received)
    }

    /// Generate a receiver report.
    ///
    /// Returns `None` until the first RTP packet was seen.
    pub fn generate(&mut self, now: Instant) -> Option<Vec<u8>> {
        let remote_ssrc = self.remote_ssrc?;
        let highest_seq = self.highest_seq?;

        let expected = self.expected();

        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.received.saturating_sub(self.received_prior);
        let lost_interval = expected_interval.saturating_sub(received_interval);

        self.expected_prior = expected;
        self.received_prior = self.received;

        let fraction_lost = if expected_interval > 0 {
            ((lost_interval * 256) / expected_interval).min(255) as u8
        } else {
            0
        };

        let (last_sr, delay) = match self.last_sr {
            Some((at, middle)) => {
                let delay = now.duration_since(at).as_secs_f64();

                (middle, (delay * 65536.0) as u32)
            }
            None => (0, 0),
        };

        let report_block = ReportBlock::builder(remote_ssrc.0)
            .fraction_lost(fraction_lost)
            .cumulative_lost(self.lost() as u32)
            .extended_sequence_number((highest_seq.0 & u64::from(u32::MAX)) as u32)
            .interarrival_jitter(self.jitter as u32)
            .last_sender_report_timestamp(last_sr)
            .delay_since_last_sender_report_timestamp(delay);

        let compound = CompoundBuilder::default()
            .add_packet(ReceiverReport::builder(self.ssrc.0).add_report_block(report_block));

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

    fn make_packet(seq: u16, timestamp: u32) -> RtpPacket {
        RtpPacket {
            pt: 96,
            marker: false,
            sequence_number: SequenceNumber(seq),
            ssrc: Ssrc(0xAABBCCDD),
            timestamp: RtpTimestamp(timestamp),
            payload: Bytes::from_static(&[0x00]),
        }
    }

    #[test]
    fn rejects_zero_clock_rate() {
        assert!(ReceiverReportGenerator::new(Ssrc(1), 0).is_err());
    }

    #[test]
    fn no_report_before_first_packet() {
        let mut generator = ReceiverReportGenerator::new(Ssrc(1), 90_000).unwrap();

        assert!(generator.generate(Instant::now()).is_none());
    }

    #[test]
    fn report_counts_loss() {
        let mut generator = ReceiverReportGenerator::new(Ssrc(1), 90_000).unwrap();

        let now = Instant::now();

        generator.process_rtp(now, &make_packet(100, 0));
        generator.process_rtp(now + Duration::from_millis(40), &make_packet(101, 3600));
        // 102 and 103 lost
        generator.process_rtp(now + Duration::from_millis(160), &make_packet(104, 14400));

        assert_eq!(generator.lost(), 2);

        let report = generator.generate(now + Duration::from_millis(200)).unwrap();

        let mut compound = Compound::parse(&report).unwrap();

        let Packet::Rr(rr) = compound.next().unwrap().unwrap() else {
            panic!("expected receiver report")
        };

        assert_eq!(rr.ssrc(), 1);

        let block = rr.report_blocks().next().unwrap();

        assert_eq!(block.ssrc(), 0xAABBCCDD);
        assert_eq!(block.cumulative_lost(), 2);
        assert_eq!(block.extended_sequence_number(), 104);
    }
}
