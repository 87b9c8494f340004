use crate::header::{Header, HeaderError, Name};
use bytesstr::BytesStr;
use std::fmt::Write;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Unicast,
    Multicast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Play,
    Record,
}

/// The `Transport` header carried on SETUP requests and responses.
///
/// The writer emits a single canonical semicolon-delimited value. The reader
/// accepts the variants RFC 2326 allows plus common server quirks: quoted
/// modes, `mode=receive` (normalized to record), single ports promoted to an
/// adjacent pair, unknown parameters and trailing semicolons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transport {
    pub protocol: TransportProtocol,
    pub delivery: Option<Delivery>,
    pub mode: Option<TransportMode>,
    pub client_ports: Option<(u16, u16)>,
    pub server_ports: Option<(u16, u16)>,
    /// Multicast port pair (`port=`)
    pub ports: Option<(u16, u16)>,
    pub interleaved: Option<(u8, u8)>,
    pub destination: Option<IpAddr>,
    pub source: Option<IpAddr>,
    pub ttl: Option<u8>,
    pub ssrc: Option<u32>,
}

impl Transport {
    pub fn new(protocol: TransportProtocol) -> Self {
        Self {
            protocol,
            delivery: None,
            mode: None,
            client_ports: None,
            server_ports: None,
            ports: None,
            interleaved: None,
            destination: None,
            source: None,
            ttl: None,
            ssrc: None,
        }
    }
}

fn parse_pair<T: Copy + std::str::FromStr>(
    value: &str,
    promote: impl Fn(T) -> T,
) -> Option<(T, T)> {
    match value.split_once('-') {
        Some((first, second)) => {
            let first = first.trim().parse().ok()?;
            let second = second.trim().parse().ok()?;
            Some((first, second))
        }
        None => {
            let first: T = value.trim().parse().ok()?;
            Some((first, promote(first)))
        }
    }
}

fn port_pair(value: &str) -> Option<(u16, u16)> {
    parse_pair::<u16>(value, |n| n.saturating_add(1))
}

fn channel_pair(value: &str) -> Option<(u8, u8)> {
    parse_pair::<u8>(value, |n| n.saturating_add(1))
}

impl Header for Transport {
    fn name() -> &'static Name {
        &Name::TRANSPORT
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = |message: &str| HeaderError::malformed(Self::name().clone(), message);

        let mut parts = value.split(';');

        let spec = parts.next().map(str::trim).unwrap_or_default();

        let protocol = if spec.eq_ignore_ascii_case("RTP/AVP")
            || spec.eq_ignore_ascii_case("RTP/AVP/UDP")
        {
            TransportProtocol::Udp
        } else if spec.eq_ignore_ascii_case("RTP/AVP/TCP") {
            TransportProtocol::Tcp
        } else {
            return Err(malformed("unknown transport specifier"));
        };

        let mut transport = Transport::new(protocol);

        for part in parts {
            let part = part.trim();

            if part.is_empty() {
                continue;
            }

            let (key, param) = match part.split_once('=') {
                Some((key, param)) => (key.trim(), Some(param.trim())),
                None => (part, None),
            };

            match (key.to_ascii_lowercase().as_str(), param) {
                ("unicast", _) => transport.delivery = Some(Delivery::Unicast),
                ("multicast", _) => transport.delivery = Some(Delivery::Multicast),
                ("client_port", Some(param)) => {
                    transport.client_ports =
                        Some(port_pair(param).ok_or_else(|| malformed("invalid client_port"))?);
                }
                ("server_port", Some(param)) => {
                    transport.server_ports =
                        Some(port_pair(param).ok_or_else(|| malformed("invalid server_port"))?);
                }
                ("port", Some(param)) => {
                    transport.ports =
                        Some(port_pair(param).ok_or_else(|| malformed("invalid port"))?);
                }
                ("interleaved", Some(param)) => {
                    transport.interleaved =
                        Some(channel_pair(param).ok_or_else(|| malformed("invalid interleaved"))?);
                }
                ("destination", Some(param)) => {
                    // some servers put a hostname here, which is ignored
                    transport.destination = param.parse().ok();
                }
                ("source", Some(param)) => {
                    transport.source = param.parse().ok();
                }
                ("ttl", Some(param)) => {
                    transport.ttl = Some(
                        param
                            .parse()
                            .map_err(|_| malformed("invalid ttl"))?,
                    );
                }
                ("ssrc", Some(param)) => {
                    let param = param.trim_start_matches("0x");
                    transport.ssrc = Some(
                        u32::from_str_radix(param, 16).map_err(|_| malformed("invalid ssrc"))?,
                    );
                }
                ("mode", Some(param)) => {
                    let mode = param.trim_matches('"');

                    if mode.eq_ignore_ascii_case("play") {
                        transport.mode = Some(TransportMode::Play);
                    } else if mode.eq_ignore_ascii_case("record")
                        || mode.eq_ignore_ascii_case("receive")
                    {
                        transport.mode = Some(TransportMode::Record);
                    } else {
                        return Err(malformed("invalid mode"));
                    }
                }
                // tolerate unknown parameters
                _ => {}
            }
        }

        Ok(transport)
    }

    fn print(&self) -> BytesStr {
        let mut out = String::from(match self.protocol {
            TransportProtocol::Udp => "RTP/AVP",
            TransportProtocol::Tcp => "RTP/AVP/TCP",
        });

        match self.delivery {
            Some(Delivery::Unicast) => out.push_str(";unicast"),
            Some(Delivery::Multicast) => out.push_str(";multicast"),
            None => {}
        }

        if let Some(destination) = self.destination {
            let _ = write!(out, ";destination={destination}");
        }

        if let Some(source) = self.source {
            let _ = write!(out, ";source={source}");
        }

        if let Some(ttl) = self.ttl {
            let _ = write!(out, ";ttl={ttl}");
        }

        if let Some((first, second)) = self.client_ports {
            let _ = write!(out, ";client_port={first}-{second}");
        }

        if let Some((first, second)) = self.server_ports {
            let _ = write!(out, ";server_port={first}-{second}");
        }

        if let Some((first, second)) = self.ports {
            let _ = write!(out, ";port={first}-{second}");
        }

        if let Some((first, second)) = self.interleaved {
            let _ = write!(out, ";interleaved={first}-{second}");
        }

        if let Some(ssrc) = self.ssrc {
            let _ = write!(out, ";ssrc={ssrc:08X}");
        }

        match self.mode {
            Some(TransportMode::Play) => out.push_str(";mode=play"),
            Some(TransportMode::Record) => out.push_str(";mode=record"),
            None => {}
        }

        out.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_udp_setup() {
        let transport = Transport::parse(&BytesStr::from_static(
            "RTP/AVP;unicast;client_port=35466-35467",
        ))
        .unwrap();

        assert_eq!(transport.protocol, TransportProtocol::Udp);
        assert_eq!(transport.delivery, Some(Delivery::Unicast));
        assert_eq!(transport.client_ports, Some((35466, 35467)));
    }

    #[test]
    fn parse_tcp_interleaved() {
        let transport = Transport::parse(&BytesStr::from_static(
            "RTP/AVP/TCP;unicast;interleaved=0-1;mode=record",
        ))
        .unwrap();

        assert_eq!(transport.protocol, TransportProtocol::Tcp);
        assert_eq!(transport.interleaved, Some((0, 1)));
        assert_eq!(transport.mode, Some(TransportMode::Record));
    }

    #[test]
    fn single_port_promoted_to_pair() {
        let transport =
            Transport::parse(&BytesStr::from_static("RTP/AVP;client_port=30000")).unwrap();

        assert_eq!(transport.client_ports, Some((30000, 30001)));
    }

    #[test]
    fn mode_receive_normalized() {
        let transport =
            Transport::parse(&BytesStr::from_static("RTP/AVP;mode=receive")).unwrap();

        assert_eq!(transport.mode, Some(TransportMode::Record));
    }

    #[test]
    fn quoted_mode() {
        let transport =
            Transport::parse(&BytesStr::from_static("RTP/AVP;mode=\"PLAY\"")).unwrap();

        assert_eq!(transport.mode, Some(TransportMode::Play));
    }

    #[test]
    fn tolerates_trailing_semicolon_and_unknown_params() {
        let transport = Transport::parse(&BytesStr::from_static(
            "RTP/AVP;unicast;client_port=1000-1001;x-dynamic;",
        ))
        .unwrap();

        assert_eq!(transport.client_ports, Some((1000, 1001)));
    }

    #[test]
    fn parse_multicast_response() {
        let transport = Transport::parse(&BytesStr::from_static(
            "RTP/AVP;multicast;destination=224.1.0.1;ttl=16;port=554",
        ))
        .unwrap();

        assert_eq!(transport.delivery, Some(Delivery::Multicast));
        assert_eq!(transport.destination, Some("224.1.0.1".parse().unwrap()));
        assert_eq!(transport.ttl, Some(16));
        assert_eq!(transport.ports, Some((554, 555)));
    }

    #[test]
    fn roundtrip() {
        let mut transport = Transport::new(TransportProtocol::Udp);
        transport.delivery = Some(Delivery::Unicast);
        transport.client_ports = Some((35466, 35467));
        transport.server_ports = Some((34556, 34557));
        transport.ssrc = Some(0x38F2_7A2F);
        transport.mode = Some(TransportMode::Play);
        transport.source = Some("10.0.0.1".parse().unwrap());

        assert_eq!(Transport::parse(&transport.print()).unwrap(), transport);

        let mut transport = Transport::new(TransportProtocol::Tcp);
        transport.interleaved = Some((2, 3));
        transport.mode = Some(TransportMode::Record);

        assert_eq!(Transport::parse(&transport.print()).unwrap(), transport);
    }
}
