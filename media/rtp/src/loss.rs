use crate::SequenceNumber;

/// Gap detector for RTP packets received over TCP.
///
/// The interleaved transport preserves order, so only adjacent sequence
/// numbers are compared. Reordered or duplicated packets report no loss.
#[derive(Debug, Default)]
pub struct LossDetector {
    last: Option<SequenceNumber>,
}

impl LossDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a received packet, returning the number of packets lost
    /// between it and its predecessor
    pub fn process(&mut self, seq: SequenceNumber) -> u64 {
        let last = self.last.replace(seq);

        let Some(last) = last else {
            return 0;
        };

        let gap = seq.0.wrapping_sub(last.0.wrapping_add(1));

        if gap < u16::MAX / 2 {
            u64::from(gap)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn contiguous() {
        let mut detector = LossDetector::new();

        assert_eq!(detector.process(SequenceNumber(10)), 0);
        assert_eq!(detector.process(SequenceNumber(11)), 0);
        assert_eq!(detector.process(SequenceNumber(12)), 0);
    }

    #[test]
    fn gap() {
        let mut detector = LossDetector::new();

        detector.process(SequenceNumber(10));
        assert_eq!(detector.process(SequenceNumber(14)), 3);
    }

    #[test]
    fn gap_across_rollover() {
        let mut detector = LossDetector::new();

        detector.process(SequenceNumber(65534));
        assert_eq!(detector.process(SequenceNumber(2)), 3);
    }

    #[test]
    fn duplicate_reports_nothing() {
        let mut detector = LossDetector::new();

        detector.process(SequenceNumber(10));
        assert_eq!(detector.process(SequenceNumber(10)), 0);
    }
}
