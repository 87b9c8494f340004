use rtp::RtpPacket;
use std::fmt;

/// A media format inside a track.
///
/// Formats are opaque to the engines: they only expose the RTP payload type,
/// the media clock rate, the PTS/DTS verdict used to anchor sender reports
/// and their SDP attribute representation.
pub trait Format: Send + Sync + 'static {
    fn payload_type(&self) -> u8;

    fn clock_rate(&self) -> u32;

    /// Whether the presentation timestamp of `packet` equals its decode
    /// timestamp. Only such packets anchor the RTCP sender report mapping.
    fn pts_equals_dts(&self, packet: &RtpPacket) -> bool {
        let _ = packet;
        true
    }

    /// The `a=rtpmap` value without the payload type, e.g. `H264/90000`
    fn rtpmap(&self) -> Option<String>;

    /// The `a=fmtp` parameters without the payload type
    fn fmtp(&self) -> Option<String>;
}

impl fmt::Debug for dyn Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Format")
            .field("payload_type", &self.payload_type())
            .field("clock_rate", &self.clock_rate())
            .finish_non_exhaustive()
    }
}

/// Format constructed from the SDP attributes of a media description.
///
/// Attribute contents are kept verbatim; nothing beyond the rtpmap shape is
/// required to be present or well-formed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericFormat {
    pub payload_type: u8,
    /// Encoding name from rtpmap, e.g. `H264`
    pub encoding: Option<String>,
    pub clock_rate: u32,
    /// Encoding parameters from rtpmap (typically the channel count)
    pub params: Option<String>,
    /// fmtp parameters, verbatim
    pub fmtp: Option<String>,
}

impl GenericFormat {
    pub fn new(payload_type: u8, clock_rate: u32) -> Self {
        Self {
            payload_type,
            encoding: None,
            clock_rate,
            params: None,
            fmtp: None,
        }
    }

    /// Build a format from parsed SDP attributes.
    ///
    /// Without an rtpmap the clock rate falls back to the static payload
    /// type assignments, or 90 kHz when the payload type is unknown.
    pub fn from_sdp_attrs(
        payload_type: u8,
        rtpmap: Option<(&str, u32, Option<&str>)>,
        fmtp: Option<&str>,
    ) -> Self {
        let (encoding, clock_rate, params) = match rtpmap {
            Some((encoding, clock_rate, params)) => (
                Some(encoding.to_string()),
                clock_rate,
                params.map(str::to_string),
            ),
            None => {
                let clock_rate = static_clock_rate(payload_type).unwrap_or_else(|| {
                    log::warn!(
                        "no rtpmap and unknown static payload type {payload_type}, assuming 90000"
                    );
                    90_000
                });

                (None, clock_rate, None)
            }
        };

        Self {
            payload_type,
            encoding,
            clock_rate,
            params,
            fmtp: fmtp.map(str::to_string),
        }
    }
}

impl Format for GenericFormat {
    fn payload_type(&self) -> u8 {
        self.payload_type
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn rtpmap(&self) -> Option<String> {
        let encoding = self.encoding.as_ref()?;

        match &self.params {
            Some(params) => Some(format!("{encoding}/{}/{params}", self.clock_rate)),
            None => Some(format!("{encoding}/{}", self.clock_rate)),
        }
    }

    fn fmtp(&self) -> Option<String> {
        self.fmtp.clone()
    }
}

/// Clock rates of the static payload type assignments (RFC 3551)
fn static_clock_rate(payload_type: u8) -> Option<u32> {
    match payload_type {
        // audio
        0 | 3 | 4 | 5 | 7 | 8 | 9 | 12 | 13 | 15 | 18 => Some(8000),
        6 => Some(16_000),
        10 | 11 => Some(44_100),
        16 => Some(11_025),
        17 => Some(22_050),
        14 => Some(90_000),
        // video
        25 | 26 | 28 | 31 | 32 | 33 | 34 => Some(90_000),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_rtpmap() {
        let format = GenericFormat::from_sdp_attrs(
            97,
            Some(("H264", 90_000, None)),
            Some("packetization-mode=1"),
        );

        assert_eq!(format.payload_type(), 97);
        assert_eq!(format.clock_rate(), 90_000);
        assert_eq!(format.rtpmap().unwrap(), "H264/90000");
        assert_eq!(format.fmtp().unwrap(), "packetization-mode=1");
    }

    #[test]
    fn static_payload_type() {
        let format = GenericFormat::from_sdp_attrs(0, None, None);

        assert_eq!(format.clock_rate(), 8000);
        assert_eq!(format.rtpmap(), None);
    }

    #[test]
    fn rtpmap_with_channels() {
        let format = GenericFormat::from_sdp_attrs(96, Some(("opus", 48_000, Some("2"))), None);

        assert_eq!(format.rtpmap().unwrap(), "opus/48000/2");
    }
}
