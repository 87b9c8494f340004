use crate::header::{Header, HeaderError, Name};
use bytesstr::BytesStr;

/// `Session` header: session id plus the optional keep-alive timeout.
///
/// Readers tolerate whitespace around the separator and trailing semicolons,
/// both of which appear in the wild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: BytesStr,
    pub timeout: Option<u64>,
}

impl Session {
    pub fn new(id: impl Into<BytesStr>) -> Self {
        Self {
            id: id.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(id: impl Into<BytesStr>, timeout: u64) -> Self {
        Self {
            id: id.into(),
            timeout: Some(timeout),
        }
    }
}

impl Header for Session {
    fn name() -> &'static Name {
        &Name::SESSION
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        let mut parts = value.split(';');

        let id = parts
            .next()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| HeaderError::malformed(Self::name().clone(), "empty session id"))?;

        let mut timeout = None;

        for part in parts {
            let part = part.trim();

            if part.is_empty() {
                continue;
            }

            if let Some((key, param)) = part.split_once('=') {
                if key.trim().eq_ignore_ascii_case("timeout") {
                    timeout = Some(param.trim().parse().map_err(|_| {
                        HeaderError::malformed(Self::name().clone(), "invalid timeout")
                    })?);
                }
            }
        }

        Ok(Self {
            id: value.slice_ref(id),
            timeout,
        })
    }

    fn print(&self) -> BytesStr {
        match self.timeout {
            Some(timeout) => format!("{};timeout={}", self.id, timeout).into(),
            None => self.id.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_plain() {
        let session = Session::parse(&BytesStr::from_static("A3eqwsafae3fFASDf")).unwrap();

        assert_eq!(session.id, "A3eqwsafae3fFASDf");
        assert_eq!(session.timeout, None);
    }

    #[test]
    fn parse_with_timeout() {
        let session = Session::parse(&BytesStr::from_static("12345678; timeout=30")).unwrap();

        assert_eq!(session.id, "12345678");
        assert_eq!(session.timeout, Some(30));
    }

    #[test]
    fn parse_trailing_semicolon() {
        let session = Session::parse(&BytesStr::from_static("12345678;")).unwrap();

        assert_eq!(session.id, "12345678");
    }

    #[test]
    fn roundtrip() {
        let session = Session::with_timeout("90a1b2c3", 60);

        assert_eq!(Session::parse(&session.print()).unwrap(), session);
    }
}
