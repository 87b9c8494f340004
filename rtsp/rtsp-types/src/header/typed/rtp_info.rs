use crate::header::{Header, HeaderError, Name};
use bytesstr::BytesStr;
use std::fmt::Write;

/// `RTP-Info` header on a PLAY response, one entry per played media
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtpInfo(pub Vec<RtpInfoEntry>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpInfoEntry {
    pub url: BytesStr,
    pub seq: Option<u16>,
    pub rtptime: Option<u32>,
}

impl Header for RtpInfo {
    fn name() -> &'static Name {
        &Name::RTP_INFO
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = |message: &str| HeaderError::malformed(Self::name().clone(), message);

        let mut entries = vec![];

        for entry in value.split(',') {
            let entry = entry.trim();

            if entry.is_empty() {
                continue;
            }

            let mut url = None;
            let mut seq = None;
            let mut rtptime = None;

            for param in entry.split(';') {
                let param = param.trim();

                let Some((key, param_value)) = param.split_once('=') else {
                    continue;
                };

                match key.trim().to_ascii_lowercase().as_str() {
                    "url" => url = Some(value.slice_ref(param_value.trim())),
                    "seq" => {
                        seq = Some(
                            param_value
                                .trim()
                                .parse()
                                .map_err(|_| malformed("invalid seq"))?,
                        )
                    }
                    "rtptime" => {
                        rtptime = Some(
                            param_value
                                .trim()
                                .parse()
                                .map_err(|_| malformed("invalid rtptime"))?,
                        )
                    }
                    _ => {}
                }
            }

            entries.push(RtpInfoEntry {
                url: url.ok_or_else(|| malformed("missing url"))?,
                seq,
                rtptime,
            });
        }

        Ok(Self(entries))
    }

    fn print(&self) -> BytesStr {
        let mut out = String::new();

        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }

            let _ = write!(out, "url={}", entry.url);

            if let Some(seq) = entry.seq {
                let _ = write!(out, ";seq={seq}");
            }

            if let Some(rtptime) = entry.rtptime {
                let _ = write!(out, ";rtptime={rtptime}");
            }
        }

        out.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_two_entries() {
        let rtp_info = RtpInfo::parse(&BytesStr::from_static(
            "url=rtsp://host/s/trackID=0;seq=45102;rtptime=12345678,url=rtsp://host/s/trackID=1;seq=30211",
        ))
        .unwrap();

        assert_eq!(rtp_info.0.len(), 2);
        assert_eq!(rtp_info.0[0].url, "rtsp://host/s/trackID=0");
        assert_eq!(rtp_info.0[0].seq, Some(45102));
        assert_eq!(rtp_info.0[0].rtptime, Some(12345678));
        assert_eq!(rtp_info.0[1].seq, Some(30211));
        assert_eq!(rtp_info.0[1].rtptime, None);
    }

    #[test]
    fn missing_url_is_an_error() {
        assert!(RtpInfo::parse(&BytesStr::from_static("seq=45102")).is_err());
    }

    #[test]
    fn roundtrip() {
        let rtp_info = RtpInfo(vec![RtpInfoEntry {
            url: BytesStr::from_static("rtsp://host/s/trackID=0"),
            seq: Some(100),
            rtptime: Some(200),
        }]);

        assert_eq!(RtpInfo::parse(&rtp_info.print()).unwrap(), rtp_info);
    }
}
