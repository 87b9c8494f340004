use crate::header::{Header, HeaderError, Name};
use crate::parse::{IResult, parse_quoted, token, ws};
use bytes::Bytes;
use bytesstr::BytesStr;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::map;
use nom::multi::separated_list0;
use std::fmt::Write;

/// Single `name=value` parameter inside an authentication header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthParam {
    pub name: BytesStr,
    pub value: BytesStr,
}

impl AuthParam {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                ws((
                    take_while1(token),
                    tag("="),
                    alt((parse_quoted, take_while(token))),
                )),
                move |(name, _, value)| AuthParam {
                    name: BytesStr::from_parse(src, name),
                    value: BytesStr::from_parse(src, value),
                },
            )(i)
        }
    }
}

fn parse_scheme_params(
    src: &Bytes,
) -> impl Fn(&str) -> IResult<&str, (BytesStr, Vec<AuthParam>)> + '_ {
    move |i| {
        map(
            ws((take_while1(token), separated_list0(
                ws((tag(","),)),
                AuthParam::parse(src),
            ))),
            |(scheme, params)| (BytesStr::from_parse(src, scheme), params),
        )(i)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha256,
}

impl Algorithm {
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("MD5") {
            Some(Self::Md5)
        } else if token.eq_ignore_ascii_case("SHA-256") {
            Some(Self::Sha256)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }
}

/// A single `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Digest(DigestChallenge),
    Basic(BasicChallenge),
    Other {
        scheme: BytesStr,
        params: Vec<AuthParam>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub opaque: Option<BytesStr>,
    pub stale: Option<bool>,
    /// `None` means the challenge did not name an algorithm, which implies MD5
    pub algorithm: Option<Algorithm>,
}

impl DigestChallenge {
    pub fn algorithm_or_default(&self) -> Algorithm {
        self.algorithm.unwrap_or(Algorithm::Md5)
    }

    fn from_params(
        params: Vec<AuthParam>,
        malformed: impl Fn(&str) -> HeaderError,
    ) -> Result<Self, HeaderError> {
        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut stale = None;
        let mut algorithm = None;

        for param in params {
            match param.name.as_ref() {
                "realm" => realm = Some(param.value),
                "nonce" => nonce = Some(param.value),
                "opaque" => opaque = Some(param.value),
                "stale" => stale = Some(param.value.eq_ignore_ascii_case("true")),
                "algorithm" => {
                    algorithm = Some(
                        Algorithm::from_token(&param.value)
                            .ok_or_else(|| malformed("unsupported digest algorithm"))?,
                    )
                }
                _ => {}
            }
        }

        Ok(Self {
            realm: realm.ok_or_else(|| malformed("missing realm"))?,
            nonce: nonce.ok_or_else(|| malformed("missing nonce"))?,
            opaque,
            stale,
            algorithm,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicChallenge {
    pub realm: Option<BytesStr>,
}

impl Header for Challenge {
    fn name() -> &'static Name {
        &Name::WWW_AUTHENTICATE
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = |message: &str| HeaderError::malformed(Self::name().clone(), message);

        let (_, (scheme, params)) = parse_scheme_params(value.as_ref())(value.as_str())
            .map_err(|_| malformed("invalid challenge"))?;

        if scheme.eq_ignore_ascii_case("Digest") {
            Ok(Self::Digest(DigestChallenge::from_params(
                params, malformed,
            )?))
        } else if scheme.eq_ignore_ascii_case("Basic") {
            let realm = params
                .into_iter()
                .find(|param| param.name == "realm")
                .map(|param| param.value);

            Ok(Self::Basic(BasicChallenge { realm }))
        } else {
            Ok(Self::Other { scheme, params })
        }
    }

    fn print(&self) -> BytesStr {
        match self {
            Challenge::Digest(digest) => {
                let mut out = format!(
                    r#"Digest realm="{}", nonce="{}""#,
                    digest.realm, digest.nonce
                );

                if let Some(opaque) = &digest.opaque {
                    let _ = write!(out, r#", opaque="{opaque}""#);
                }

                if let Some(stale) = digest.stale {
                    let _ = write!(out, r#", stale="{}""#, if stale { "TRUE" } else { "FALSE" });
                }

                if let Some(algorithm) = digest.algorithm {
                    let _ = write!(out, ", algorithm={}", algorithm.as_str());
                }

                out.into()
            }
            Challenge::Basic(basic) => match &basic.realm {
                Some(realm) => format!(r#"Basic realm="{realm}""#).into(),
                None => BytesStr::from_static("Basic"),
            },
            Challenge::Other { scheme, params } => {
                let mut out = scheme.to_string();

                for (i, param) in params.iter().enumerate() {
                    let sep = if i == 0 { ' ' } else { ',' };
                    let _ = write!(out, r#"{sep}{}="{}""#, param.name, param.value);
                }

                out.into()
            }
        }
    }
}

/// An `Authorization` header sent by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Digest(DigestAuthorization),
    /// The base64 user:pass blob of a Basic authorization
    Basic(BytesStr),
    Other {
        scheme: BytesStr,
        params: Vec<AuthParam>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestAuthorization {
    pub username: BytesStr,
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub uri: BytesStr,
    pub response: BytesStr,
    pub algorithm: Option<Algorithm>,
    pub opaque: Option<BytesStr>,
}

impl Header for Authorization {
    fn name() -> &'static Name {
        &Name::AUTHORIZATION
    }

    fn parse(value: &BytesStr) -> Result<Self, HeaderError> {
        let malformed = |message: &str| HeaderError::malformed(Self::name().clone(), message);

        let trimmed = value.trim();

        if let Some(blob) = trimmed
            .split_once(char::is_whitespace)
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Basic"))
            .map(|(_, blob)| blob.trim())
        {
            return Ok(Self::Basic(value.slice_ref(blob)));
        }

        let (_, (scheme, params)) = parse_scheme_params(value.as_ref())(value.as_str())
            .map_err(|_| malformed("invalid authorization"))?;

        if scheme.eq_ignore_ascii_case("Digest") {
            let mut username = None;
            let mut realm = None;
            let mut nonce = None;
            let mut uri = None;
            let mut response = None;
            let mut algorithm = None;
            let mut opaque = None;

            for param in params {
                match param.name.as_ref() {
                    "username" => username = Some(param.value),
                    "realm" => realm = Some(param.value),
                    "nonce" => nonce = Some(param.value),
                    "uri" => uri = Some(param.value),
                    "response" => response = Some(param.value),
                    "opaque" => opaque = Some(param.value),
                    "algorithm" => {
                        algorithm = Some(
                            Algorithm::from_token(&param.value)
                                .ok_or_else(|| malformed("unsupported digest algorithm"))?,
                        )
                    }
                    _ => {}
                }
            }

            Ok(Self::Digest(DigestAuthorization {
                username: username.ok_or_else(|| malformed("missing username"))?,
                realm: realm.ok_or_else(|| malformed("missing realm"))?,
                nonce: nonce.ok_or_else(|| malformed("missing nonce"))?,
                uri: uri.ok_or_else(|| malformed("missing uri"))?,
                response: response.ok_or_else(|| malformed("missing response"))?,
                algorithm,
                opaque,
            }))
        } else {
            Ok(Self::Other { scheme, params })
        }
    }

    fn print(&self) -> BytesStr {
        match self {
            Authorization::Digest(digest) => {
                let mut out = format!(
                    r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
                    digest.username, digest.realm, digest.nonce, digest.uri, digest.response
                );

                if let Some(algorithm) = digest.algorithm {
                    let _ = write!(out, ", algorithm={}", algorithm.as_str());
                }

                if let Some(opaque) = &digest.opaque {
                    let _ = write!(out, r#", opaque="{opaque}""#);
                }

                out.into()
            }
            Authorization::Basic(blob) => format!("Basic {blob}").into(),
            Authorization::Other { scheme, params } => {
                let mut out = scheme.to_string();

                for (i, param) in params.iter().enumerate() {
                    let sep = if i == 0 { ' ' } else { ',' };
                    let _ = write!(out, r#"{sep}{}="{}""#, param.name, param.value);
                }

                out.into()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_digest_challenge() {
        let challenge = Challenge::parse(&BytesStr::from_static(
            r#"Digest realm="IPCAM", nonce="cc", algorithm=MD5"#,
        ))
        .unwrap();

        let Challenge::Digest(digest) = challenge else {
            panic!("expected digest challenge")
        };

        assert_eq!(digest.realm, "IPCAM");
        assert_eq!(digest.nonce, "cc");
        assert_eq!(digest.algorithm, Some(Algorithm::Md5));
    }

    #[test]
    fn parse_basic_challenge() {
        let challenge =
            Challenge::parse(&BytesStr::from_static(r#"Basic realm="4419b63f5e51""#)).unwrap();

        assert_eq!(
            challenge,
            Challenge::Basic(BasicChallenge {
                realm: Some(BytesStr::from_static("4419b63f5e51"))
            })
        );
    }

    #[test]
    fn parse_digest_authorization() {
        let authorization = Authorization::parse(&BytesStr::from_static(
            r#"Digest username="u", realm="IPCAM", nonce="cc", uri="rtsp://host/s", response="abcdef""#,
        ))
        .unwrap();

        let Authorization::Digest(digest) = authorization else {
            panic!("expected digest authorization")
        };

        assert_eq!(digest.username, "u");
        assert_eq!(digest.uri, "rtsp://host/s");
        assert_eq!(digest.response, "abcdef");
        assert_eq!(digest.algorithm, None);
    }

    #[test]
    fn parse_basic_authorization() {
        let authorization =
            Authorization::parse(&BytesStr::from_static("Basic dXNlcjpwYXNz")).unwrap();

        assert_eq!(
            authorization,
            Authorization::Basic(BytesStr::from_static("dXNlcjpwYXNz"))
        );
    }

    #[test]
    fn challenge_roundtrip() {
        let challenge = Challenge::Digest(DigestChallenge {
            realm: "IPCAM".into(),
            nonce: "31fc37d08cf22f27".into(),
            opaque: None,
            stale: Some(false),
            algorithm: Some(Algorithm::Sha256),
        });

        assert_eq!(Challenge::parse(&challenge.print()).unwrap(), challenge);
    }

    #[test]
    fn authorization_roundtrip() {
        let authorization = Authorization::Digest(DigestAuthorization {
            username: "u".into(),
            realm: "IPCAM".into(),
            nonce: "cc".into(),
            uri: "rtsp://host/s".into(),
            response: "0123456789abcdef".into(),
            algorithm: Some(Algorithm::Md5),
            opaque: None,
        });

        assert_eq!(
            Authorization::parse(&authorization.print()).unwrap(),
            authorization
        );
    }
}
