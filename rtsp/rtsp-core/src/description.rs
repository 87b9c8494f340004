use crate::error::RtspError;
use crate::format::{Format, GenericFormat};
use bytesstr::BytesStr;
use rtsp_types::{RtspUrl, UrlError};
use sdp_types::{
    Connection, Direction, Fmtp, IceOptions, Media, MediaDescription, MediaType, Origin, RtpMap,
    SessionDescription, TaggedAddress, Time, TransportProtocol, UnknownAttribute,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Application,
}

/// A single media of a stream description: its kind, the formats it may
/// carry and the control path its per-media URL is derived from.
#[derive(Debug, Clone)]
pub struct Track {
    pub kind: MediaKind,
    pub formats: Vec<Arc<dyn Format>>,
    pub control: String,
}

impl Track {
    pub fn new(kind: MediaKind, formats: Vec<Arc<dyn Format>>) -> Self {
        Self {
            kind,
            formats,
            control: String::new(),
        }
    }

    /// Resolve this track's URL against the session base URL
    pub fn url(&self, base: &RtspUrl) -> Result<RtspUrl, UrlError> {
        base.resolve_control(&self.control)
    }

    /// Find the format matching an RTP payload type
    pub fn format_by_payload_type(&self, payload_type: u8) -> Option<&Arc<dyn Format>> {
        self.formats
            .iter()
            .find(|format| format.payload_type() == payload_type)
    }
}

/// Parse the SDP body of a DESCRIBE response or ANNOUNCE request into tracks
pub fn tracks_from_sdp(body: &[u8]) -> Result<Vec<Track>, RtspError> {
    let text = std::str::from_utf8(body).map_err(|_| RtspError::Sdp("invalid utf8"))?;

    let description = SessionDescription::parse(&BytesStr::from(text))
        .map_err(|_| RtspError::Sdp("invalid session description"))?;

    let mut tracks = vec![];

    for media in &description.media_descriptions {
        let kind = match media.media.media_type {
            MediaType::Video => MediaKind::Video,
            MediaType::Audio => MediaKind::Audio,
            MediaType::App | MediaType::Text => MediaKind::Application,
        };

        let control = media
            .attributes
            .iter()
            .find(|attr| attr.name == "control")
            .and_then(|attr| attr.value.as_ref())
            .map(|value| value.to_string())
            .unwrap_or_default();

        let mut formats: Vec<Arc<dyn Format>> = vec![];

        let mut payload_types: Vec<u8> = media.media.fmts.clone();

        // some descriptions omit the format list in the m= line
        for rtpmap in &media.rtpmap {
            if !payload_types.contains(&rtpmap.payload) {
                payload_types.push(rtpmap.payload);
            }
        }

        for payload_type in payload_types {
            let rtpmap = media
                .rtpmap
                .iter()
                .find(|rtpmap| rtpmap.payload == payload_type);

            let fmtp = media
                .fmtp
                .iter()
                .find(|fmtp| fmtp.format == payload_type);

            formats.push(Arc::new(GenericFormat::from_sdp_attrs(
                payload_type,
                rtpmap.map(|rtpmap| {
                    (
                        rtpmap.encoding.as_str(),
                        rtpmap.clock_rate,
                        rtpmap.params.as_deref(),
                    )
                }),
                fmtp.map(|fmtp| fmtp.params.as_str()),
            )));
        }

        if formats.is_empty() {
            return Err(RtspError::Sdp("media without formats"));
        }

        tracks.push(Track {
            kind,
            formats,
            control,
        });
    }

    if tracks.is_empty() {
        return Err(RtspError::Sdp("no media descriptions"));
    }

    Ok(tracks)
}

/// Serialize tracks into the SDP body of a DESCRIBE response or ANNOUNCE
/// request.
///
/// Tracks without a control attribute get a generated `trackID=<n>`.
pub fn tracks_to_sdp(tracks: &[Track], origin_address: IpAddr) -> SessionDescription {
    let mut media_descriptions = vec![];

    for (i, track) in tracks.iter().enumerate() {
        let media_type = match track.kind {
            MediaKind::Video => MediaType::Video,
            MediaKind::Audio => MediaType::Audio,
            MediaKind::Application => MediaType::App,
        };

        let mut rtpmap = vec![];
        let mut fmtp = vec![];

        for format in &track.formats {
            if let Some(value) = format.rtpmap() {
                // value is "<encoding>/<clock>[/<params>]"
                let mut parts = value.splitn(3, '/');

                let encoding = parts.next().unwrap_or_default().to_string();
                let clock_rate = parts
                    .next()
                    .and_then(|clock_rate| clock_rate.parse().ok())
                    .unwrap_or_else(|| format.clock_rate());

                rtpmap.push(RtpMap {
                    payload: format.payload_type(),
                    encoding: encoding.into(),
                    clock_rate,
                    params: parts.next().map(BytesStr::from),
                });
            }

            if let Some(params) = format.fmtp() {
                fmtp.push(Fmtp {
                    format: format.payload_type(),
                    params: params.into(),
                });
            }
        }

        let control = if track.control.is_empty() {
            format!("trackID={i}")
        } else {
            track.control.clone()
        };

        media_descriptions.push(MediaDescription {
            media: Media {
                media_type,
                port: 0,
                ports_num: None,
                proto: TransportProtocol::RtpAvp,
                fmts: track
                    .formats
                    .iter()
                    .map(|format| format.payload_type())
                    .collect(),
            },
            connection: None,
            bandwidth: vec![],
            direction: Direction::SendRecv,
            rtcp: None,
            rtcp_mux: false,
            mid: None,
            rtpmap,
            fmtp,
            ice_ufrag: None,
            ice_pwd: None,
            ice_candidates: vec![],
            ice_end_of_candidates: false,
            crypto: vec![],
            extmap: vec![],
            extmap_allow_mixed: false,
            ssrc: vec![],
            setup: None,
            fingerprint: vec![],
            attributes: vec![UnknownAttribute {
                name: "control".into(),
                value: Some(control.into()),
            }],
        });
    }

    SessionDescription {
        origin: Origin {
            username: "-".into(),
            session_id: "0".into(),
            session_version: "0".into(),
            address: origin_address.into(),
        },
        name: "-".into(),
        connection: Some(Connection {
            address: TaggedAddress::IP4(Ipv4Addr::UNSPECIFIED),
            ttl: None,
            num: None,
        }),
        bandwidth: vec![],
        time: Time { start: 0, stop: 0 },
        direction: Direction::SendRecv,
        group: vec![],
        extmap: vec![],
        extmap_allow_mixed: false,
        ice_lite: false,
        ice_options: IceOptions::default(),
        ice_ufrag: None,
        ice_pwd: None,
        setup: None,
        fingerprint: vec![],
        attributes: vec![],
        media_descriptions,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SDP: &[u8] = b"v=0\r\n\
        o=- 0 0 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=video 0 RTP/AVP 97\r\n\
        a=control:trackID=0\r\n\
        a=rtpmap:97 H264/90000\r\n\
        a=fmtp:97 packetization-mode=1\r\n\
        m=audio 0 RTP/AVP 0\r\n\
        a=control:trackID=1\r\n";

    #[test]
    fn parse_two_tracks() {
        let tracks = tracks_from_sdp(SDP).unwrap();

        assert_eq!(tracks.len(), 2);

        assert_eq!(tracks[0].kind, MediaKind::Video);
        assert_eq!(tracks[0].control, "trackID=0");
        assert_eq!(tracks[0].formats.len(), 1);
        assert_eq!(tracks[0].formats[0].payload_type(), 97);
        assert_eq!(tracks[0].formats[0].clock_rate(), 90_000);

        assert_eq!(tracks[1].kind, MediaKind::Audio);
        assert_eq!(tracks[1].formats[0].payload_type(), 0);
        assert_eq!(tracks[1].formats[0].clock_rate(), 8000);
    }

    #[test]
    fn track_url_resolution() {
        let tracks = tracks_from_sdp(SDP).unwrap();
        let base = RtspUrl::parse("rtsp://host/s/").unwrap();

        assert_eq!(
            tracks[0].url(&base).unwrap().as_str(),
            "rtsp://host/s/trackID=0"
        );
    }

    #[test]
    fn roundtrip_through_sdp() {
        let tracks = tracks_from_sdp(SDP).unwrap();

        let serialized = tracks_to_sdp(&tracks, IpAddr::V4(Ipv4Addr::LOCALHOST)).to_string();

        let reparsed = tracks_from_sdp(serialized.as_bytes()).unwrap();

        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[0].control, "trackID=0");
        assert_eq!(reparsed[0].formats[0].payload_type(), 97);
    }

    #[test]
    fn rejects_garbage() {
        assert!(tracks_from_sdp(b"not sdp").is_err());
    }
}
