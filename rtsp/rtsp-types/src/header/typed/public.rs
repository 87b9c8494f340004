use crate::Method;
use crate::header::{Header, HeaderError, Name};
use bytesstr::BytesStr;
use std::fmt::Write;

/// `Public` header advertising the methods a server supports.
///
/// Unknown method tokens are skipped instead of failing the parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Public(pub Vec<Method>);

impl Public {
    pub fn contains(&self, method: Method) -> bool {
        self.0.contains(&method)
    }
}

impl Header for Public {
    fn name() -> &'static Name {
        &Name::PUBLIC
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        Ok(Self(
            value
                .split(',')
                .filter_map(|token| Method::from_token(token.trim()))
                .collect(),
        ))
    }

    fn print(&self) -> BytesStr {
        let mut out = String::new();

        for (i, method) in self.0.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }

            let _ = write!(out, "{method}");
        }

        out.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() {
        let public =
            Public::parse(&BytesStr::from_static("OPTIONS, DESCRIBE, SETUP, PLAY")).unwrap();

        assert_eq!(
            public.0,
            vec![Method::Options, Method::Describe, Method::Setup, Method::Play]
        );
        assert!(public.contains(Method::Play));
        assert!(!public.contains(Method::Record));
    }

    #[test]
    fn skips_unknown_tokens() {
        let public = Public::parse(&BytesStr::from_static("OPTIONS, X_VENDOR, PLAY")).unwrap();

        assert_eq!(public.0, vec![Method::Options, Method::Play]);
    }

    #[test]
    fn roundtrip() {
        let public = Public(vec![Method::Options, Method::GetParameter]);

        assert_eq!(Public::parse(&public.print()).unwrap(), public);
    }
}
