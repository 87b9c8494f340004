use crate::error::DecodeError;
use bytes::Bytes;
use rtp::rtcp_types::{Compound, Packet};
use rtp::{
    InvalidClockRate, LossDetector, NtpTimestamp, ReceiverReportGenerator, Reorderer, RtpPacket,
    SenderReportGenerator, Ssrc,
};
use std::time::Instant;

/// How often receiver reports are generated on the receive side
pub(crate) const RECEIVER_REPORT_PERIOD: std::time::Duration = std::time::Duration::from_secs(10);

/// How often sender reports are generated on the send side
pub(crate) const SENDER_REPORT_PERIOD: std::time::Duration = std::time::Duration::from_secs(10);

enum Ordering {
    /// UDP delivery may reorder, run a reorder buffer
    Reorder(Reorderer),
    /// TCP preserves order, only detect gaps
    DetectLoss(LossDetector),
}

/// Receive pipeline of one media: packet ordering, loss accounting and
/// receiver report generation.
///
/// Used by the playing client and the recording server alike.
pub(crate) struct MediaRx {
    ordering: Ordering,
    rr: ReceiverReportGenerator,
}

impl MediaRx {
    pub(crate) fn new_udp(rr_ssrc: Ssrc, clock_rate: u32) -> Result<Self, InvalidClockRate> {
        Ok(Self {
            ordering: Ordering::Reorder(Reorderer::new()),
            rr: ReceiverReportGenerator::new(rr_ssrc, clock_rate)?,
        })
    }

    pub(crate) fn new_tcp(rr_ssrc: Ssrc, clock_rate: u32) -> Result<Self, InvalidClockRate> {
        Ok(Self {
            ordering: Ordering::DetectLoss(LossDetector::new()),
            rr: ReceiverReportGenerator::new(rr_ssrc, clock_rate)?,
        })
    }

    /// Process a raw RTP payload.
    ///
    /// Returns the packets to hand to the host in order, plus the number of
    /// packets detected as lost.
    pub(crate) fn process_rtp(
        &mut self,
        now: Instant,
        payload: Bytes,
    ) -> Result<(Vec<RtpPacket>, u64), DecodeError> {
        let packet = RtpPacket::parse(payload).map_err(|e| DecodeError::Rtp(e.to_string()))?;

        let (delivered, lost) = match &mut self.ordering {
            Ordering::Reorder(reorderer) => reorderer.process(packet),
            Ordering::DetectLoss(detector) => {
                let lost = detector.process(packet.sequence_number);
                (vec![packet], lost)
            }
        };

        for packet in &delivered {
            self.rr.process_rtp(now, packet);
        }

        Ok((delivered, lost))
    }

    /// Process a raw RTCP payload, feeding sender report timestamps into the
    /// receiver report state
    pub(crate) fn process_rtcp(&mut self, now: Instant, payload: &[u8]) -> Result<(), DecodeError> {
        let compound = Compound::parse(payload).map_err(|e| DecodeError::Rtcp(format!("{e:?}")))?;

        for packet in compound {
            let packet = packet.map_err(|e| DecodeError::Rtcp(format!("{e:?}")))?;

            if let Packet::Sr(sr) = packet {
                self.rr
                    .process_sender_report(now, NtpTimestamp::from_fixed_u64(sr.ntp_timestamp()));
            }
        }

        Ok(())
    }

    pub(crate) fn generate_report(&mut self, now: Instant) -> Option<Vec<u8>> {
        self.rr.generate(now)
    }
}

/// Send pipeline of one media: sender report generation over the stream of
/// outgoing packets
pub(crate) struct MediaTx {
    sr: SenderReportGenerator,
    enabled: bool,
}

impl MediaTx {
    pub(crate) fn new(
        ssrc: Ssrc,
        clock_rate: u32,
        enabled: bool,
    ) -> Result<Self, InvalidClockRate> {
        Ok(Self {
            sr: SenderReportGenerator::new(ssrc, clock_rate)?,
            enabled,
        })
    }

    pub(crate) fn process_rtp(&mut self, now: Instant, packet: &RtpPacket, pts_equals_dts: bool) {
        self.sr.process_rtp(now, packet, pts_equals_dts);
    }

    pub(crate) fn generate_report(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.enabled {
            return None;
        }

        self.sr.generate(now)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rtp::{RtpTimestamp, SequenceNumber};

    fn make_packet(seq: u16) -> RtpPacket {
        RtpPacket {
            pt: 96,
            marker: false,
            sequence_number: SequenceNumber(seq),
            ssrc: Ssrc(7),
            timestamp: RtpTimestamp(0),
            payload: Bytes::from_static(&[0x01]),
        }
    }

    #[test]
    fn udp_rx_reorders() {
        let mut rx = MediaRx::new_udp(Ssrc(1), 90_000).unwrap();
        let now = Instant::now();

        let (delivered, _) = rx.process_rtp(now, make_packet(10).to_bytes()).unwrap();
        assert_eq!(delivered.len(), 1);

        let (delivered, _) = rx.process_rtp(now, make_packet(12).to_bytes()).unwrap();
        assert!(delivered.is_empty());

        let (delivered, _) = rx.process_rtp(now, make_packet(11).to_bytes()).unwrap();
        assert_eq!(delivered.len(), 2);
    }

    #[test]
    fn tcp_rx_reports_gap() {
        let mut rx = MediaRx::new_tcp(Ssrc(1), 90_000).unwrap();
        let now = Instant::now();

        rx.process_rtp(now, make_packet(10).to_bytes()).unwrap();

        let (delivered, lost) = rx.process_rtp(now, make_packet(13).to_bytes()).unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(lost, 2);
    }

    #[test]
    fn rx_rejects_garbage() {
        let mut rx = MediaRx::new_udp(Ssrc(1), 90_000).unwrap();

        assert!(
            rx.process_rtp(Instant::now(), Bytes::from_static(&[0x00, 0x01]))
                .is_err()
        );
    }

    #[test]
    fn tx_reports_when_enabled() {
        let now = Instant::now();

        let mut tx = MediaTx::new(Ssrc(1), 90_000, true).unwrap();
        tx.process_rtp(now, &make_packet(1), true);
        assert!(tx.generate_report(now).is_some());

        let mut tx = MediaTx::new(Ssrc(1), 90_000, false).unwrap();
        tx.process_rtp(now, &make_packet(1), true);
        assert!(tx.generate_report(now).is_none());
    }
}
