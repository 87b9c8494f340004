use crate::header::{Header, HeaderError, Name};
use bytesstr::BytesStr;
use std::fmt::Write;
use std::time::Duration;

/// `Range` header with one variant per supported time format
#[derive(Debug, Clone, PartialEq)]
pub enum Range {
    Npt(NptRange),
    Smpte(SmpteRange),
}

/// Normal Play Time range, e.g. `npt=0.5-` or `npt=0:00:02.25-0:00:10`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NptRange {
    pub start: NptTime,
    pub end: Option<NptTime>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NptTime {
    Now,
    Time(Duration),
}

impl NptRange {
    pub fn from_start(start: Duration) -> Self {
        Self {
            start: NptTime::Time(start),
            end: None,
        }
    }
}

/// SMPTE timestamp range, e.g. `smpte=10:07:00-10:07:33:05.01`
#[derive(Debug, Clone, PartialEq)]
pub struct SmpteRange {
    /// Time format as transmitted, e.g. `smpte` or `smpte-30-drop`
    pub format: BytesStr,
    pub start: SmpteTime,
    pub end: Option<SmpteTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmpteTime {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    /// Frames and optional subframes
    pub frames: Option<(u8, Option<u8>)>,
}

fn parse_npt_time(i: &str) -> Option<NptTime> {
    let i = i.trim();

    if i.eq_ignore_ascii_case("now") {
        return Some(NptTime::Now);
    }

    let mut parts = i.rsplit(':');

    let seconds: f64 = parts.next()?.parse().ok()?;
    let minutes: u64 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    let hours: u64 = match parts.next() {
        Some(h) => h.parse().ok()?,
        None => 0,
    };

    if parts.next().is_some() || seconds < 0.0 {
        return None;
    }

    let secs = Duration::from_secs_f64(seconds);

    Some(NptTime::Time(
        Duration::from_secs(hours * 3600 + minutes * 60) + secs,
    ))
}

fn print_npt_time(out: &mut String, time: NptTime) {
    match time {
        NptTime::Now => out.push_str("now"),
        NptTime::Time(time) => {
            let secs = time.as_secs_f64();

            if secs.fract() == 0.0 {
                let _ = write!(out, "{}", secs as u64);
            } else {
                let _ = write!(out, "{secs:.3}");
            }
        }
    }
}

fn parse_smpte_time(i: &str) -> Option<SmpteTime> {
    let mut parts = i.trim().split(':');

    let hours = parts.next()?.parse().ok()?;
    let minutes = parts.next()?.parse().ok()?;
    let seconds = parts.next()?.parse().ok()?;

    let frames = match parts.next() {
        Some(frames) => match frames.split_once('.') {
            Some((frames, sub)) => Some((frames.parse().ok()?, Some(sub.parse().ok()?))),
            None => Some((frames.parse().ok()?, None)),
        },
        None => None,
    };

    if parts.next().is_some() {
        return None;
    }

    Some(SmpteTime {
        hours,
        minutes,
        seconds,
        frames,
    })
}

fn print_smpte_time(out: &mut String, time: &SmpteTime) {
    let _ = write!(out, "{}:{:02}:{:02}", time.hours, time.minutes, time.seconds);

    if let Some((frames, sub)) = time.frames {
        let _ = write!(out, ":{frames:02}");

        if let Some(sub) = sub {
            let _ = write!(out, ".{sub:02}");
        }
    }
}

impl Header for Range {
    fn name() -> &'static Name {
        &Name::RANGE
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = |message: &str| HeaderError::malformed(Self::name().clone(), message);

        // a `Range: npt=...;time=<utc>` suffix is ignored
        let value_str = value.split(';').next().unwrap_or_default().trim();

        let (format, range) = value_str
            .split_once('=')
            .ok_or_else(|| malformed("missing time format"))?;

        let (start, end) = match range.split_once('-') {
            Some((start, end)) => (start, end.trim()),
            None => (range, ""),
        };

        if format.trim().eq_ignore_ascii_case("npt") {
            let start = parse_npt_time(start).ok_or_else(|| malformed("invalid npt start"))?;

            let end = if end.is_empty() {
                None
            } else {
                Some(parse_npt_time(end).ok_or_else(|| malformed("invalid npt end"))?)
            };

            Ok(Range::Npt(NptRange { start, end }))
        } else if format.trim().to_ascii_lowercase().starts_with("smpte") {
            let start = parse_smpte_time(start).ok_or_else(|| malformed("invalid smpte start"))?;

            let end = if end.is_empty() {
                None
            } else {
                Some(parse_smpte_time(end).ok_or_else(|| malformed("invalid smpte end"))?)
            };

            Ok(Range::Smpte(SmpteRange {
                format: value.slice_ref(format.trim()),
                start,
                end,
            }))
        } else {
            Err(malformed("unsupported time format"))
        }
    }

    fn print(&self) -> BytesStr {
        let mut out = String::new();

        match self {
            Range::Npt(range) => {
                out.push_str("npt=");
                print_npt_time(&mut out, range.start);
                out.push('-');

                if let Some(end) = range.end {
                    print_npt_time(&mut out, end);
                }
            }
            Range::Smpte(range) => {
                let _ = write!(out, "{}=", range.format);
                print_smpte_time(&mut out, &range.start);
                out.push('-');

                if let Some(end) = &range.end {
                    print_smpte_time(&mut out, end);
                }
            }
        }

        out.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_npt_open_end() {
        let range = Range::parse(&BytesStr::from_static("npt=0.000-")).unwrap();

        assert_eq!(
            range,
            Range::Npt(NptRange {
                start: NptTime::Time(Duration::ZERO),
                end: None
            })
        );
    }

    #[test]
    fn parse_npt_now() {
        let range = Range::parse(&BytesStr::from_static("npt=now-")).unwrap();

        assert_eq!(
            range,
            Range::Npt(NptRange {
                start: NptTime::Now,
                end: None
            })
        );
    }

    #[test]
    fn parse_npt_clock_form() {
        let range = Range::parse(&BytesStr::from_static("npt=0:01:02.500-0:02:00")).unwrap();

        let Range::Npt(range) = range else {
            panic!("expected npt")
        };

        assert_eq!(range.start, NptTime::Time(Duration::from_millis(62_500)));
        assert_eq!(range.end, Some(NptTime::Time(Duration::from_secs(120))));
    }

    #[test]
    fn parse_smpte() {
        let range =
            Range::parse(&BytesStr::from_static("smpte=10:07:00-10:07:33:05.01")).unwrap();

        let Range::Smpte(range) = range else {
            panic!("expected smpte")
        };

        assert_eq!(range.format, "smpte");
        assert_eq!(
            range.start,
            SmpteTime {
                hours: 10,
                minutes: 7,
                seconds: 0,
                frames: None
            }
        );
        assert_eq!(
            range.end,
            Some(SmpteTime {
                hours: 10,
                minutes: 7,
                seconds: 33,
                frames: Some((5, Some(1)))
            })
        );
    }

    #[test]
    fn roundtrip_npt() {
        let range = Range::Npt(NptRange {
            start: NptTime::Time(Duration::from_millis(2500)),
            end: Some(NptTime::Time(Duration::from_secs(60))),
        });

        assert_eq!(Range::parse(&range.print()).unwrap(), range);
    }

    #[test]
    fn reject_unknown_format() {
        assert!(Range::parse(&BytesStr::from_static("clock=19961108T143720Z-")).is_err());
    }
}
