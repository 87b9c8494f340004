//! RTSP authentication.
//!
//! [`Authenticator`] drives the client side: it consumes the challenges of a
//! 401 response and stamps an `Authorization` header onto every following
//! request. [`Validator`] drives the server side: it generates the challenge
//! set for a connection and validates incoming credentials.
//!
//! RTSP digest is the RFC 2069 subset (no qop, no cnonce), MD5 by default
//! with SHA-256 when negotiated.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytesstr::BytesStr;
use rtsp_types::header::typed::{Algorithm, Authorization, Challenge, DigestAuthorization};
use rtsp_types::{Headers, Method, RtspUrl};

mod digest;
mod validate;

pub use validate::{ValidateError, Validator};

pub(crate) use digest::digest_response;

/// Plain user/password credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no supported authentication scheme offered")]
    NoSupportedChallenge,
    #[error("authentication failed for realm {0:?}")]
    FailedToAuthenticate(String),
}

enum Scheme {
    Digest {
        algorithm: Algorithm,
        realm: BytesStr,
        nonce: BytesStr,
        opaque: Option<BytesStr>,
    },
    Basic,
}

/// Solves authenticate challenges in 401 RTSP responses.
///
/// After [`handle_rejection`](Self::handle_rejection) accepted a challenge,
/// [`authorize_request`](Self::authorize_request) adds the matching
/// `Authorization` header to a request. A repeated challenge carrying the
/// same nonce means the credentials were rejected and is surfaced as an
/// error, which bounds the retry loop to a single attempt.
pub struct Authenticator {
    credentials: Credentials,
    scheme: Option<Scheme>,
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            scheme: None,
        }
    }

    /// Consume the `WWW-Authenticate` challenges of a 401 response.
    ///
    /// Digest is preferred over Basic; among digest challenges SHA-256 wins
    /// over MD5.
    pub fn handle_rejection(&mut self, challenges: Vec<Challenge>) -> Result<(), AuthError> {
        let mut best: Option<Scheme> = None;

        for challenge in challenges {
            match challenge {
                Challenge::Digest(digest) => {
                    if let Some(Scheme::Digest {
                        realm,
                        nonce,
                        ..
                    }) = &self.scheme
                    {
                        // same nonce challenged again: the previous response
                        // was rejected
                        if *nonce == digest.nonce {
                            return Err(AuthError::FailedToAuthenticate(realm.to_string()));
                        }
                    }

                    let algorithm = digest.algorithm_or_default();

                    let replace = match &best {
                        Some(Scheme::Digest {
                            algorithm: existing,
                            ..
                        }) => {
                            *existing == Algorithm::Md5 && algorithm == Algorithm::Sha256
                        }
                        Some(Scheme::Basic) | None => true,
                    };

                    if replace {
                        best = Some(Scheme::Digest {
                            algorithm,
                            realm: digest.realm,
                            nonce: digest.nonce,
                            opaque: digest.opaque,
                        });
                    }
                }
                Challenge::Basic(_) => {
                    if best.is_none() {
                        best = Some(Scheme::Basic);
                    }
                }
                Challenge::Other { scheme, .. } => {
                    log::debug!("ignoring unsupported authentication scheme {scheme}");
                }
            }
        }

        match best {
            Some(scheme) => {
                self.scheme = Some(scheme);
                Ok(())
            }
            None => Err(AuthError::NoSupportedChallenge),
        }
    }

    /// Add an `Authorization` header for `method` on `url`, if a challenge
    /// was accepted before
    pub fn authorize_request(&self, method: Method, url: &RtspUrl, headers: &mut Headers) {
        let Some(scheme) = &self.scheme else {
            return;
        };

        let authorization = match scheme {
            Scheme::Digest {
                algorithm,
                realm,
                nonce,
                opaque,
            } => {
                let uri = url.without_credentials().to_string();

                let response = digest_response(
                    *algorithm,
                    &self.credentials.user,
                    &self.credentials.pass,
                    realm,
                    nonce,
                    method,
                    &uri,
                );

                Authorization::Digest(DigestAuthorization {
                    username: self.credentials.user.as_str().into(),
                    realm: realm.clone(),
                    nonce: nonce.clone(),
                    uri: uri.into(),
                    response: response.into(),
                    algorithm: Some(*algorithm),
                    opaque: opaque.clone(),
                })
            }
            Scheme::Basic => {
                let blob = BASE64.encode(format!(
                    "{}:{}",
                    self.credentials.user, self.credentials.pass
                ));

                Authorization::Basic(blob.into())
            }
        };

        headers.replace_type(&authorization);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rtsp_types::header::typed::{BasicChallenge, DigestChallenge};

    fn digest_challenge(nonce: &'static str, algorithm: Option<Algorithm>) -> Challenge {
        Challenge::Digest(DigestChallenge {
            realm: "IPCAM".into(),
            nonce: nonce.into(),
            opaque: None,
            stale: None,
            algorithm,
        })
    }

    #[test]
    fn digest_preferred_over_basic() {
        let mut authenticator = Authenticator::new(Credentials::new("u", "p"));

        authenticator
            .handle_rejection(vec![
                Challenge::Basic(BasicChallenge::default()),
                digest_challenge("cc", None),
            ])
            .unwrap();

        let mut headers = Headers::new();
        let url = RtspUrl::parse("rtsp://host/s").unwrap();

        authenticator.authorize_request(Method::Describe, &url, &mut headers);

        let authorization: Authorization = headers.get().unwrap();

        let Authorization::Digest(digest) = authorization else {
            panic!("expected digest authorization")
        };

        assert_eq!(digest.realm, "IPCAM");
        assert_eq!(digest.nonce, "cc");
        assert_eq!(digest.uri, "rtsp://host/s");
        assert_eq!(
            digest.response,
            digest_response(
                Algorithm::Md5,
                "u",
                "p",
                "IPCAM",
                "cc",
                Method::Describe,
                "rtsp://host/s"
            )
            .as_str()
        );
    }

    #[test]
    fn sha256_preferred_over_md5() {
        let mut authenticator = Authenticator::new(Credentials::new("u", "p"));

        authenticator
            .handle_rejection(vec![
                digest_challenge("cc", Some(Algorithm::Md5)),
                digest_challenge("cc", Some(Algorithm::Sha256)),
            ])
            .unwrap();

        let mut headers = Headers::new();
        let url = RtspUrl::parse("rtsp://host/s").unwrap();

        authenticator.authorize_request(Method::Describe, &url, &mut headers);

        let Authorization::Digest(digest) = headers.get().unwrap() else {
            panic!("expected digest authorization")
        };

        assert_eq!(digest.algorithm, Some(Algorithm::Sha256));
    }

    #[test]
    fn basic_fallback() {
        let mut authenticator = Authenticator::new(Credentials::new("user", "pass"));

        authenticator
            .handle_rejection(vec![Challenge::Basic(BasicChallenge::default())])
            .unwrap();

        let mut headers = Headers::new();
        let url = RtspUrl::parse("rtsp://host/s").unwrap();

        authenticator.authorize_request(Method::Options, &url, &mut headers);

        assert_eq!(
            headers.get::<Authorization>().unwrap(),
            Authorization::Basic("dXNlcjpwYXNz".into())
        );
    }

    #[test]
    fn repeated_nonce_is_an_error() {
        let mut authenticator = Authenticator::new(Credentials::new("u", "p"));

        authenticator
            .handle_rejection(vec![digest_challenge("cc", None)])
            .unwrap();

        assert!(matches!(
            authenticator.handle_rejection(vec![digest_challenge("cc", None)]),
            Err(AuthError::FailedToAuthenticate(_))
        ));
    }

    #[test]
    fn no_challenge_is_an_error() {
        let mut authenticator = Authenticator::new(Credentials::new("u", "p"));

        assert!(matches!(
            authenticator.handle_rejection(vec![]),
            Err(AuthError::NoSupportedChallenge)
        ));
    }
}
