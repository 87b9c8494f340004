use crate::header::{Header, HeaderError, Name, parse_value};
use crate::parse::ws;
use bytesstr::BytesStr;
use nom::character::complete::digit1;
use nom::combinator::{map, map_res};
use std::str::FromStr;

/// The sequence number pairing a request with its response.
///
/// Unlike its SIP sibling the RTSP `CSeq` carries no method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CSeq(pub u32);

impl Header for CSeq {
    fn name() -> &'static Name {
        &Name::CSEQ
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        parse_value(
            Self::name(),
            value,
            map(ws((map_res(digit1, u32::from_str),)), |(cseq,)| CSeq(cseq)),
        )
    }

    fn print(&self) -> BytesStr {
        self.0.to_string().into()
    }
}

impl From<u32> for CSeq {
    fn from(cseq: u32) -> Self {
        Self(cseq)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() {
        let cseq = CSeq::parse(&BytesStr::from_static("42")).unwrap();
        assert_eq!(cseq, CSeq(42));
    }

    #[test]
    fn parse_leading_whitespace() {
        let cseq = CSeq::parse(&BytesStr::from_static(" 7")).unwrap();
        assert_eq!(cseq, CSeq(7));
    }

    #[test]
    fn print() {
        assert_eq!(CSeq(42).print(), "42");
    }
}
