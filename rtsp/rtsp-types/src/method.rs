use crate::parse::{IResult, token};
use nom::bytes::complete::take_while1;
use nom::combinator::map_opt;
use std::fmt;
use std::str::FromStr;

macro_rules! methods {
    ($($(#[$comments:meta])* $print:literal, $ident:ident;)+) => {
        /// Represents an RTSP method.
        ///
        /// RTSP defines a closed method set; tokens outside of it are treated
        /// as a framing error by the message parsers.
        #[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub enum Method {
            $($(#[$comments])* $ident,)+
        }

        impl Method {
            pub const ALL: &'static [Method] = &[$(Method::$ident,)+];

            /// Match a method token case-insensitively, returning `None` for
            /// tokens outside the RTSP method set
            pub fn from_token(slice: &str) -> Option<Self> {
                $(
                if slice.eq_ignore_ascii_case($print) {
                    return Some(Method::$ident);
                }
                )+

                None
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Method::$ident => $print,)+
                }
            }
        }

        impl fmt::Display for Method {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

methods! {
    "OPTIONS",       Options;
    "DESCRIBE",      Describe;
    "ANNOUNCE",      Announce;
    "SETUP",         Setup;
    "PLAY",          Play;
    "RECORD",        Record;
    "PAUSE",         Pause;
    "TEARDOWN",      Teardown;
    "GET_PARAMETER", GetParameter;
    "SET_PARAMETER", SetParameter;
    "REDIRECT",      Redirect;
}

impl Method {
    pub fn parse(i: &str) -> IResult<&str, Self> {
        map_opt(take_while1(token), Method::from_token)(i)
    }
}

impl FromStr for Method {
    type Err = InvalidMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::from_token(s).ok_or(InvalidMethod)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid RTSP method")]
pub struct InvalidMethod;

#[cfg(test)]
mod test {
    use super::Method;
    use std::str::FromStr;

    #[test]
    fn known_method() {
        assert_eq!(Method::from_str("SETUP").unwrap(), Method::Setup);
        assert_eq!(Method::Setup.to_string(), "SETUP");
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(Method::from_token("get_parameter"), Some(Method::GetParameter));
    }

    #[test]
    fn unknown_method() {
        assert!(Method::from_str("SOMEOBSCUREMETHOD").is_err());
    }
}
