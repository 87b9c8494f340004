use crate::digest::{constant_time_eq, digest_response};
use crate::Credentials;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rtsp_types::header::typed::{Algorithm, Authorization, BasicChallenge, Challenge, DigestChallenge};
use rtsp_types::msg::Request;
use std::fmt::Write;

#[derive(Debug, thiserror::Error)]
pub enum ValidateError {
    #[error("no authorization header")]
    MissingAuthorization,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authorization nonce does not match")]
    StaleNonce,
    #[error("authorization uri {0:?} does not match the request")]
    UriMismatch(String),
    #[error("unsupported authorization scheme")]
    UnsupportedScheme,
}

/// Server side credential validator.
///
/// One validator is created per connection; its nonce is bound to that
/// connection and a stale nonce yields [`ValidateError::StaleNonce`] so the
/// handler can reply 401 with `stale="FALSE"`.
pub struct Validator {
    realm: String,
    nonce: String,
    algorithms: Vec<Algorithm>,
    offer_basic: bool,
}

impl Validator {
    /// New validator offering Digest (MD5 and SHA-256) and Basic
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            nonce: random_nonce(),
            algorithms: vec![Algorithm::Md5, Algorithm::Sha256],
            offer_basic: true,
        }
    }

    /// Restrict the offered digest algorithms
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Disable the Basic scheme
    pub fn without_basic(mut self) -> Self {
        self.offer_basic = false;
        self
    }

    /// The challenges to put into a 401 response, one `WWW-Authenticate`
    /// value each.
    ///
    /// `stale` is set on every digest challenge when the rejected request
    /// carried an outdated nonce.
    pub fn challenges(&self, stale: bool) -> Vec<Challenge> {
        let mut challenges = vec![];

        for &algorithm in &self.algorithms {
            challenges.push(Challenge::Digest(DigestChallenge {
                realm: self.realm.as_str().into(),
                nonce: self.nonce.as_str().into(),
                opaque: None,
                stale: stale.then_some(false),
                algorithm: Some(algorithm),
            }));
        }

        if self.offer_basic {
            challenges.push(Challenge::Basic(BasicChallenge {
                realm: Some(self.realm.as_str().into()),
            }));
        }

        challenges
    }

    /// Validate the authorization carried by `request` against `credentials`
    pub fn validate(
        &self,
        request: &Request,
        credentials: &Credentials,
    ) -> Result<(), ValidateError> {
        let authorization: Authorization = request
            .headers
            .try_get()
            .ok_or(ValidateError::MissingAuthorization)?
            .map_err(|_| ValidateError::UnsupportedScheme)?;

        match authorization {
            Authorization::Basic(blob) => {
                let expected = format!("{}:{}", credentials.user, credentials.pass);

                let decoded = BASE64
                    .decode(blob.as_str())
                    .map_err(|_| ValidateError::InvalidCredentials)?;

                if constant_time_eq(&decoded, expected.as_bytes()) {
                    Ok(())
                } else {
                    Err(ValidateError::InvalidCredentials)
                }
            }
            Authorization::Digest(digest) => {
                if digest.nonce != self.nonce.as_str() {
                    return Err(ValidateError::StaleNonce);
                }

                if digest.username != credentials.user.as_str() {
                    return Err(ValidateError::InvalidCredentials);
                }

                let algorithm = digest.algorithm.unwrap_or(Algorithm::Md5);

                if !self.algorithms.contains(&algorithm) {
                    return Err(ValidateError::UnsupportedScheme);
                }

                // some clients (e.g. VLC) compute the digest over the base
                // control URL instead of the request URL, accept both
                let request_url = request.url.without_credentials().to_string();
                let base_url = base_url_of(&request_url);

                if !uri_matches(&digest.uri, &request_url)
                    && !uri_matches(&digest.uri, &base_url)
                {
                    return Err(ValidateError::UriMismatch(digest.uri.to_string()));
                }

                let expected = digest_response(
                    algorithm,
                    &credentials.user,
                    &credentials.pass,
                    &self.realm,
                    &self.nonce,
                    request.method,
                    &digest.uri,
                );

                if constant_time_eq(expected.as_bytes(), digest.response.as_bytes()) {
                    Ok(())
                } else {
                    Err(ValidateError::InvalidCredentials)
                }
            }
            Authorization::Other { .. } => Err(ValidateError::UnsupportedScheme),
        }
    }
}

fn uri_matches(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

/// Strip the last path segment, yielding the base control URL
fn base_url_of(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');

    match trimmed.rfind('/') {
        // don't strip the authority's slashes
        Some(i) if !trimmed[..i].ends_with('/') => trimmed[..i].to_string(),
        _ => trimmed.to_string(),
    }
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);

    let mut nonce = String::with_capacity(32);

    for byte in bytes {
        let _ = write!(nonce, "{byte:02x}");
    }

    nonce
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Authenticator;
    use rtsp_types::msg::Request;
    use rtsp_types::{Method, RtspUrl};

    fn request(method: Method, url: &str) -> Request {
        Request::new(method, RtspUrl::parse(url).unwrap())
    }

    fn authorize(validator: &Validator, request: &mut Request, credentials: Credentials) {
        let mut authenticator = Authenticator::new(credentials);

        authenticator
            .handle_rejection(validator.challenges(false))
            .unwrap();

        authenticator.authorize_request(request.method, &request.url, &mut request.headers);
    }

    #[test]
    fn digest_roundtrip() {
        let validator = Validator::new("IPCAM");
        let credentials = Credentials::new("u", "p");

        let mut request = request(Method::Describe, "rtsp://host/s");

        authorize(&validator, &mut request, credentials.clone());

        validator.validate(&request, &credentials).unwrap();
    }

    #[test]
    fn wrong_password_rejected() {
        let validator = Validator::new("IPCAM");

        let mut request = request(Method::Describe, "rtsp://host/s");

        authorize(&validator, &mut request, Credentials::new("u", "wrong"));

        assert!(matches!(
            validator.validate(&request, &Credentials::new("u", "p")),
            Err(ValidateError::InvalidCredentials)
        ));
    }

    #[test]
    fn missing_authorization() {
        let validator = Validator::new("IPCAM");

        let request = request(Method::Describe, "rtsp://host/s");

        assert!(matches!(
            validator.validate(&request, &Credentials::new("u", "p")),
            Err(ValidateError::MissingAuthorization)
        ));
    }

    #[test]
    fn stale_nonce_detected() {
        let old_validator = Validator::new("IPCAM");
        let new_validator = Validator::new("IPCAM");
        let credentials = Credentials::new("u", "p");

        let mut request = request(Method::Describe, "rtsp://host/s");

        authorize(&old_validator, &mut request, credentials.clone());

        assert!(matches!(
            new_validator.validate(&request, &credentials),
            Err(ValidateError::StaleNonce)
        ));
    }

    #[test]
    fn basic_roundtrip() {
        let validator = Validator::new("IPCAM").with_algorithms(vec![]);
        let credentials = Credentials::new("user", "pass");

        let mut request = request(Method::Setup, "rtsp://host/s/trackID=0");

        authorize(&validator, &mut request, credentials.clone());

        validator.validate(&request, &credentials).unwrap();
    }

    #[test]
    fn stripped_track_uri_accepted() {
        // VLC computes the digest over the base URL on SETUP
        let validator = Validator::new("IPCAM");
        let credentials = Credentials::new("u", "p");

        let mut setup = request(Method::Setup, "rtsp://host/s/trackID=0");

        // authorize as if the request was for the base path
        let mut authenticator = Authenticator::new(credentials.clone());
        authenticator
            .handle_rejection(validator.challenges(false))
            .unwrap();
        authenticator.authorize_request(
            Method::Setup,
            &RtspUrl::parse("rtsp://host/s").unwrap(),
            &mut setup.headers,
        );

        validator.validate(&setup, &credentials).unwrap();
    }
}
