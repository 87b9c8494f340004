use crate::{RtpPacket, SequenceNumber};

const BUFFER_SIZE: u16 = 16;

/// Fixed-window reorder buffer for RTP packets received over UDP.
///
/// Packets are delivered strictly in sequence-number order. A packet ahead of
/// the next expected sequence number is buffered; once the gap closes, all
/// consecutive packets are flushed. When the window overflows, the buffer is
/// advanced and the skipped sequence numbers are reported as lost. Duplicates
/// and packets behind the window are dropped.
pub struct Reorderer {
    buffer: [Option<RtpPacket>; BUFFER_SIZE as usize],

    /// Next sequence number to be delivered, `None` until the first packet
    next: Option<SequenceNumber>,
}

impl Default for Reorderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reorderer {
    pub fn new() -> Self {
        Self {
            buffer: [const { None }; BUFFER_SIZE as usize],
            next: None,
        }
    }

    /// Process a received packet.
    ///
    /// Returns the packets that became deliverable (possibly empty) and the
    /// number of packets that are now known to be lost.
    pub fn process(&mut self, packet: RtpPacket) -> (Vec<RtpPacket>, u64) {
        let seq = packet.sequence_number;

        let Some(next) = self.next else {
            self.next = Some(SequenceNumber(seq.0.wrapping_add(1)));
            return (vec![packet], 0);
        };

        let mut next = next;
        let mut delivered = vec![];
        let mut lost = 0u64;

        let rel = seq.0.wrapping_sub(next.0);

        if rel >= u16::MAX / 2 {
            // behind the window: duplicate or late packet
            return (vec![], 0);
        }

        if rel >= BUFFER_SIZE {
            // window overflow: flush everything buffered, every sequence
            // number before the new packet that never arrived is lost
            let mut cursor = next;

            while cursor != seq {
                match self.take_slot(cursor) {
                    Some(buffered) => delivered.push(buffered),
                    None => lost += 1,
                }

                cursor = SequenceNumber(cursor.0.wrapping_add(1));
            }

            next = seq;
        }

        let rel = seq.0.wrapping_sub(next.0);

        if rel == 0 {
            delivered.push(packet);
            next = SequenceNumber(next.0.wrapping_add(1));

            // flush consecutive packets
            while let Some(buffered) = self.take_slot(next) {
                delivered.push(buffered);
                next = SequenceNumber(next.0.wrapping_add(1));
            }
        } else {
            let slot = self.slot_mut(seq);

            if slot.is_none() {
                *slot = Some(packet);
            }
            // duplicate of a buffered packet is dropped
        }

        self.next = Some(next);

        (delivered, lost)
    }

    fn slot_mut(&mut self, seq: SequenceNumber) -> &mut Option<RtpPacket> {
        &mut self.buffer[usize::from(seq.0 % BUFFER_SIZE)]
    }

    fn take_slot(&mut self, seq: SequenceNumber) -> Option<RtpPacket> {
        self.slot_mut(seq)
            .take_if(|packet| packet.sequence_number == seq)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{RtpTimestamp, Ssrc};
    use bytes::Bytes;

    fn make_packet(seq: u16) -> RtpPacket {
        RtpPacket {
            pt: 96,
            marker: false,
            sequence_number: SequenceNumber(seq),
            ssrc: Ssrc(0),
            timestamp: RtpTimestamp(0),
            payload: Bytes::new(),
        }
    }

    fn seqs(packets: &[RtpPacket]) -> Vec<u16> {
        packets.iter().map(|p| p.sequence_number.0).collect()
    }

    #[test]
    fn in_order_passthrough() {
        let mut reorderer = Reorderer::new();

        for seq in [100u16, 101, 102] {
            let (delivered, lost) = reorderer.process(make_packet(seq));
            assert_eq!(seqs(&delivered), vec![seq]);
            assert_eq!(lost, 0);
        }
    }

    #[test]
    fn reordered_pair() {
        let mut reorderer = Reorderer::new();

        reorderer.process(make_packet(100));

        let (delivered, lost) = reorderer.process(make_packet(102));
        assert!(delivered.is_empty());
        assert_eq!(lost, 0);

        let (delivered, lost) = reorderer.process(make_packet(101));
        assert_eq!(seqs(&delivered), vec![101, 102]);
        assert_eq!(lost, 0);
    }

    #[test]
    fn duplicate_dropped() {
        let mut reorderer = Reorderer::new();

        reorderer.process(make_packet(100));

        let (delivered, lost) = reorderer.process(make_packet(100));
        assert!(delivered.is_empty());
        assert_eq!(lost, 0);

        // duplicate of a buffered packet
        reorderer.process(make_packet(102));
        let (delivered, _) = reorderer.process(make_packet(102));
        assert!(delivered.is_empty());

        let (delivered, _) = reorderer.process(make_packet(101));
        assert_eq!(seqs(&delivered), vec![101, 102]);
    }

    #[test]
    fn window_overflow_reports_loss() {
        let mut reorderer = Reorderer::new();

        reorderer.process(make_packet(100));

        // 101..=116 never arrive, 117 is one past the window
        let (delivered, lost) = reorderer.process(make_packet(117));
        assert_eq!(seqs(&delivered), vec![117]);
        assert_eq!(lost, 16);
    }

    #[test]
    fn wraparound() {
        let mut reorderer = Reorderer::new();

        reorderer.process(make_packet(65535));

        let (delivered, lost) = reorderer.process(make_packet(0));
        assert_eq!(seqs(&delivered), vec![0]);
        assert_eq!(lost, 0);
    }

    #[test]
    fn late_packet_dropped() {
        let mut reorderer = Reorderer::new();

        reorderer.process(make_packet(100));
        reorderer.process(make_packet(101));

        let (delivered, lost) = reorderer.process(make_packet(90));
        assert!(delivered.is_empty());
        assert_eq!(lost, 0);
    }
}
