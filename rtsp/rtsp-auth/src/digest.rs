use rtsp_types::Method;
use rtsp_types::header::typed::Algorithm;
use sha2::Digest;

pub(crate) type HashFn = fn(&[u8]) -> String;

pub(crate) fn hash_fn(algorithm: Algorithm) -> HashFn {
    match algorithm {
        Algorithm::Md5 => hash_md5,
        Algorithm::Sha256 => hash_sha256,
    }
}

fn hash_md5(i: &[u8]) -> String {
    format!("{:x}", md5::compute(i))
}

fn hash_sha256(i: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(i);
    format!("{:x}", hasher.finalize())
}

/// Compute the RFC 2069 style digest response:
/// `H(H(user:realm:pass):nonce:H(method:uri))`
pub(crate) fn digest_response(
    algorithm: Algorithm,
    user: &str,
    pass: &str,
    realm: &str,
    nonce: &str,
    method: Method,
    uri: &str,
) -> String {
    let hash = hash_fn(algorithm);

    let ha1 = hash(format!("{user}:{realm}:{pass}").as_bytes());
    let ha2 = hash(format!("{method}:{uri}").as_bytes());

    hash(format!("{ha1}:{nonce}:{ha2}").as_bytes())
}

/// Byte-wise comparison without an early exit, for digest responses and
/// basic credentials
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_response() {
        // H(H("u:IPCAM:p"):"cc":H("DESCRIBE:rtsp://host/s"))
        let response = digest_response(
            Algorithm::Md5,
            "u",
            "p",
            "IPCAM",
            "cc",
            Method::Describe,
            "rtsp://host/s",
        );

        let ha1 = format!("{:x}", md5::compute(b"u:IPCAM:p"));
        let ha2 = format!("{:x}", md5::compute(b"DESCRIBE:rtsp://host/s"));
        let expected = format!("{:x}", md5::compute(format!("{ha1}:cc:{ha2}").as_bytes()));

        assert_eq!(response, expected);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
