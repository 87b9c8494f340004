use std::ops::Sub;

/// Wall clock timestamp in the NTP era used by RTCP sender reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NtpTimestamp {
    // Duration since 01.01.1900
    inner: time::Duration,
}

impl NtpTimestamp {
    pub const ZERO: Self = Self {
        inner: time::Duration::ZERO,
    };

    pub fn now() -> Self {
        let epoch = time::Date::from_calendar_date(1900, time::Month::January, 1)
            .expect("valid ntp epoch date");
        let epoch = time::OffsetDateTime::new_utc(epoch, time::Time::MIDNIGHT);

        Self {
            inner: time::OffsetDateTime::now_utc() - epoch,
        }
    }

    pub fn as_seconds_f64(self) -> f64 {
        self.inner.as_seconds_f64()
    }

    /// 32.32 fixed point representation, as carried in a sender report
    pub fn to_fixed_u64(self) -> u64 {
        let seconds = self.inner.whole_seconds() as u64;
        let subseconds =
            (self.inner.subsec_nanoseconds() as f64 / 1_000_000_000.) * u32::MAX as f64;

        (seconds << 32) | subseconds as u64
    }

    /// The middle 32 bits of the 32.32 representation, as carried in the
    /// LSR field of a report block
    pub fn to_fixed_u32(self) -> u32 {
        ((self.to_fixed_u64() >> 16) & u64::from(u32::MAX)) as u32
    }

    pub fn from_fixed_u64(fixed: u64) -> Self {
        let seconds = (fixed >> 32) as i64;

        let subseconds = (fixed & u64::from(u32::MAX)) as u32;
        let subseconds = subseconds as f64 / (u32::MAX as f64);

        Self {
            inner: time::Duration::new(seconds, (subseconds * 1_000_000_000.) as i32),
        }
    }

    pub fn from_fixed_u32(fixed: u32) -> Self {
        let seconds = (fixed >> 16) as i64;

        let subseconds = (fixed & u32::from(u16::MAX)) as u16;
        let subseconds = subseconds as f64 / (u16::MAX as f64);

        Self {
            inner: time::Duration::new(seconds, (subseconds * 1_000_000_000.) as i32),
        }
    }
}

impl Sub for NtpTimestamp {
    type Output = time::Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        self.inner - rhs.inner
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_point_roundtrip() {
        let ts = NtpTimestamp::from_fixed_u64((1234u64 << 32) | (u32::MAX as u64 / 2));
        let fixed = ts.to_fixed_u64();

        assert_eq!(fixed >> 32, 1234);
        // subsecond part survives within rounding error
        assert!((fixed as u32).abs_diff(u32::MAX / 2) < 1000);
    }

    #[test]
    fn middle_bits() {
        let ts = NtpTimestamp::from_fixed_u64(0x0123_4567_89AB_CDEF);
        assert_eq!(ts.to_fixed_u32() >> 24, 0x45);
    }
}
