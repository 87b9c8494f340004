use crate::header::{Header, HeaderError, Name, parse_value};
use crate::parse::ws;
use bytesstr::BytesStr;
use nom::character::complete::digit1;
use nom::combinator::{map, map_res};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLength(pub usize);

impl Header for ContentLength {
    fn name() -> &'static Name {
        &Name::CONTENT_LENGTH
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        parse_value(
            Self::name(),
            value,
            map(ws((map_res(digit1, usize::from_str),)), |(len,)| {
                ContentLength(len)
            }),
        )
    }

    fn print(&self) -> BytesStr {
        self.0.to_string().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType(pub BytesStr);

impl Header for ContentType {
    fn name() -> &'static Name {
        &Name::CONTENT_TYPE
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        Ok(Self(value.slice_ref(value.trim())))
    }

    fn print(&self) -> BytesStr {
        self.0.clone()
    }
}

/// `Content-Base` on a DESCRIBE response: the absolute URL control paths are
/// resolved against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBase(pub BytesStr);

impl Header for ContentBase {
    fn name() -> &'static Name {
        &Name::CONTENT_BASE
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        Ok(Self(value.slice_ref(value.trim())))
    }

    fn print(&self) -> BytesStr {
        self.0.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn content_length() {
        assert_eq!(
            ContentLength::parse(&BytesStr::from_static("128")).unwrap(),
            ContentLength(128)
        );
        assert!(ContentLength::parse(&BytesStr::from_static("many")).is_err());
    }

    #[test]
    fn content_type_trimmed() {
        assert_eq!(
            ContentType::parse(&BytesStr::from_static(" application/sdp ")).unwrap(),
            ContentType(BytesStr::from_static("application/sdp"))
        );
    }
}
