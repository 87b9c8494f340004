use std::fmt;
use std::str::FromStr;

type Repr = u16;

/// StatusCode is a representation of an RTSP status code encoded in an u16
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StatusCode(Repr);

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_tuple("StatusCode");
        tuple.field(&self.0);
        if let Some(text) = self.text() {
            tuple.field(&text);
        }
        tuple.finish()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// StatusCodeKind represents the kind of status code for broader handling
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum StatusCodeKind {
    /// Represents code 100..=199
    Informational,

    /// Represents code 200..=299
    Success,

    /// Represents code 300..=399
    Redirection,

    /// Represents code 400..=499
    ClientError,

    /// Represents code 500..=599
    ServerError,

    /// Represents all other codes
    Custom,
}

impl StatusCode {
    /// Returns the [StatusCodeKind] of the code
    #[inline]
    pub fn kind(self) -> StatusCodeKind {
        match self.0 {
            100..=199 => StatusCodeKind::Informational,
            200..=299 => StatusCodeKind::Success,
            300..=399 => StatusCodeKind::Redirection,
            400..=499 => StatusCodeKind::ClientError,
            500..=599 => StatusCodeKind::ServerError,
            _ => StatusCodeKind::Custom,
        }
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self.kind() == StatusCodeKind::Success
    }

    #[inline]
    pub fn is_redirection(self) -> bool {
        self.kind() == StatusCodeKind::Redirection
    }

    /// Returns the number that the code represents
    pub fn into_u16(self) -> Repr {
        self.0
    }
}

impl FromStr for StatusCode {
    type Err = <Repr as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StatusCode(Repr::from_str(s)?))
    }
}

impl From<Repr> for StatusCode {
    fn from(r: Repr) -> StatusCode {
        StatusCode(r)
    }
}

macro_rules! codes {
    ($($(#[$comments:meta])* [$code:expr => $name:ident, $text:literal];)*) => {
        impl StatusCode {
            /// Returns the canonical reason phrase for a known code
            pub fn text(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some($text),)*
                    _ => None
                }
            }

            $(
            $(#[$comments])*
            pub const $name: StatusCode = StatusCode($code);
            )*
        }
    };
}

codes! {
    // ==== INFORMATIONAL 1XX ====

    /// 100 Continue
    [100 => CONTINUE, "Continue"];

    // ==== SUCCESS 2XX ====

    /// 200 OK
    [200 => OK, "OK"];

    /// 201 Created
    [201 => CREATED, "Created"];

    /// 250 Low on Storage Space
    [250 => LOW_ON_STORAGE_SPACE, "Low on Storage Space"];

    // ==== REDIRECTION 3XX ====

    /// 300 Multiple Choices
    [300 => MULTIPLE_CHOICES, "Multiple Choices"];

    /// 301 Moved Permanently
    [301 => MOVED_PERMANENTLY, "Moved Permanently"];

    /// 302 Moved Temporarily
    [302 => MOVED_TEMPORARILY, "Moved Temporarily"];

    /// 303 See Other
    [303 => SEE_OTHER, "See Other"];

    /// 304 Not Modified
    [304 => NOT_MODIFIED, "Not Modified"];

    /// 305 Use Proxy
    [305 => USE_PROXY, "Use Proxy"];

    // ==== CLIENT ERROR 4XX ====

    /// 400 Bad Request
    [400 => BAD_REQUEST, "Bad Request"];

    /// 401 Unauthorized
    [401 => UNAUTHORIZED, "Unauthorized"];

    /// 402 Payment Required
    [402 => PAYMENT_REQUIRED, "Payment Required"];

    /// 403 Forbidden
    [403 => FORBIDDEN, "Forbidden"];

    /// 404 Not Found
    [404 => NOT_FOUND, "Not Found"];

    /// 405 Method Not Allowed
    [405 => METHOD_NOT_ALLOWED, "Method Not Allowed"];

    /// 406 Not Acceptable
    [406 => NOT_ACCEPTABLE, "Not Acceptable"];

    /// 407 Proxy Authentication Required
    [407 => PROXY_AUTHENTICATION_REQUIRED, "Proxy Authentication Required"];

    /// 408 Request Time-out
    [408 => REQUEST_TIMEOUT, "Request Time-out"];

    /// 410 Gone
    [410 => GONE, "Gone"];

    /// 411 Length Required
    [411 => LENGTH_REQUIRED, "Length Required"];

    /// 412 Precondition Failed
    [412 => PRECONDITION_FAILED, "Precondition Failed"];

    /// 413 Request Entity Too Large
    [413 => REQUEST_ENTITY_TOO_LARGE, "Request Entity Too Large"];

    /// 414 Request-URI Too Large
    [414 => REQUEST_URI_TOO_LARGE, "Request-URI Too Large"];

    /// 415 Unsupported Media Type
    [415 => UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type"];

    /// 451 Parameter Not Understood
    [451 => PARAMETER_NOT_UNDERSTOOD, "Parameter Not Understood"];

    /// 452 Conference Not Found
    [452 => CONFERENCE_NOT_FOUND, "Conference Not Found"];

    /// 453 Not Enough Bandwidth
    [453 => NOT_ENOUGH_BANDWIDTH, "Not Enough Bandwidth"];

    /// 454 Session Not Found
    [454 => SESSION_NOT_FOUND, "Session Not Found"];

    /// 455 Method Not Valid in This State
    [455 => METHOD_NOT_VALID_IN_THIS_STATE, "Method Not Valid in This State"];

    /// 456 Header Field Not Valid for Resource
    [456 => HEADER_FIELD_NOT_VALID_FOR_RESOURCE, "Header Field Not Valid for Resource"];

    /// 457 Invalid Range
    [457 => INVALID_RANGE, "Invalid Range"];

    /// 458 Parameter Is Read-Only
    [458 => PARAMETER_IS_READ_ONLY, "Parameter Is Read-Only"];

    /// 459 Aggregate Operation Not Allowed
    [459 => AGGREGATE_OPERATION_NOT_ALLOWED, "Aggregate Operation Not Allowed"];

    /// 460 Only Aggregate Operation Allowed
    [460 => ONLY_AGGREGATE_OPERATION_ALLOWED, "Only Aggregate Operation Allowed"];

    /// 461 Unsupported Transport
    [461 => UNSUPPORTED_TRANSPORT, "Unsupported Transport"];

    /// 462 Destination Unreachable
    [462 => DESTINATION_UNREACHABLE, "Destination Unreachable"];

    // ==== SERVER ERROR 5XX ====

    /// 500 Internal Server Error
    [500 => INTERNAL_SERVER_ERROR, "Internal Server Error"];

    /// 501 Not Implemented
    [501 => NOT_IMPLEMENTED, "Not Implemented"];

    /// 502 Bad Gateway
    [502 => BAD_GATEWAY, "Bad Gateway"];

    /// 503 Service Unavailable
    [503 => SERVICE_UNAVAILABLE, "Service Unavailable"];

    /// 504 Gateway Time-out
    [504 => GATEWAY_TIMEOUT, "Gateway Time-out"];

    /// 505 RTSP Version Not Supported
    [505 => RTSP_VERSION_NOT_SUPPORTED, "RTSP Version Not Supported"];

    /// 551 Option Not Supported
    [551 => OPTION_NOT_SUPPORTED, "Option Not Supported"];

    /// 553 Proxy Unavailable
    [553 => PROXY_UNAVAILABLE, "Proxy Unavailable"];
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind() {
        assert_eq!(StatusCode::OK.kind(), StatusCodeKind::Success);
        assert_eq!(StatusCode::UNSUPPORTED_TRANSPORT.kind(), StatusCodeKind::ClientError);
        assert_eq!(StatusCode::from(700).kind(), StatusCodeKind::Custom);
    }

    #[test]
    fn text() {
        assert_eq!(StatusCode::SESSION_NOT_FOUND.text(), Some("Session Not Found"));
        assert_eq!(StatusCode::from(499).text(), None);
    }
}
