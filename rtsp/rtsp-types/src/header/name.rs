use bytesstr::BytesStr;

/// Represents an RTSP header's name. It is used as key inside [Headers].
///
/// Comparison is case-insensitive; the case received on the wire is kept for
/// printing unknown names.
///
/// [Headers]: crate::Headers
#[derive(Debug, Clone)]
pub struct Name(Repr);

impl Name {
    /// Returns a Name which contains the given name.
    ///
    /// This function will be called by parsers when they encounter a name not
    /// implemented by this library.
    pub const fn unknown(name: BytesStr) -> Self {
        Self(Repr::Unknown(name))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.eq(other.as_print_str())
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_print_str().eq_ignore_ascii_case(other)
    }
}

impl<T> From<T> for Name
where
    T: Into<BytesStr> + AsRef<[u8]>,
{
    fn from(name: T) -> Self {
        Name::from_bytes(name)
    }
}

macro_rules! header_names {
    ($($(#[$comments:meta])* $print:literal, $ident:ident, $konst:ident;)+) => {
        #[derive(Debug, Clone)]
        enum Repr {
            $($ident,)+
            Unknown(BytesStr),
        }

        static NAMES: &[(&str, Name)] = &[
            $(($print, Name::$konst),)*
        ];

        impl Name {
            $(
            $(#[$comments])*
            pub const $konst: Name = Name(Repr::$ident);
            )+

            fn from_bytes(name: impl Into<BytesStr> + AsRef<[u8]>) -> Name {
                let slice: &[u8] = name.as_ref();

                for (print, known) in NAMES {
                    if print.as_bytes().eq_ignore_ascii_case(slice) {
                        return known.clone();
                    }
                }

                Name::unknown(name.into())
            }

            pub fn as_print_str(&self) -> &str {
                match &self.0 {
                    $(Repr::$ident => $print,)*
                    Repr::Unknown(name) => name.as_ref(),
                }
            }
        }
    };
}

header_names! {
    "Accept",           Accept,          ACCEPT;
    "Authorization",    Authorization,   AUTHORIZATION;
    "Content-Base",     ContentBase,     CONTENT_BASE;
    "Content-Length",   ContentLength,   CONTENT_LENGTH;
    "Content-Location", ContentLocation, CONTENT_LOCATION;
    "Content-Type",     ContentType,     CONTENT_TYPE;
    "CSeq",             CSeq,            CSEQ;
    "Date",             Date,            DATE;
    "Location",         Location,        LOCATION;
    "Public",           Public,          PUBLIC;
    "Range",            Range,           RANGE;
    "Require",          Require,         REQUIRE;
    "RTP-Info",         RtpInfo,         RTP_INFO;
    "Server",           Server,          SERVER;
    "Session",          Session,         SESSION;
    "Transport",        Transport,       TRANSPORT;
    "Unsupported",      Unsupported,     UNSUPPORTED;
    "User-Agent",       UserAgent,       USER_AGENT;
    "WWW-Authenticate", WwwAuthenticate, WWW_AUTHENTICATE;
}

#[cfg(test)]
mod test {
    use super::Name;

    #[test]
    fn known_name_case_insensitive() {
        assert_eq!(Name::from("cseq"), Name::CSEQ);
        assert_eq!(Name::from("CSEQ"), Name::CSEQ);
        assert_eq!(Name::CSEQ.as_print_str(), "CSeq");
    }

    #[test]
    fn unknown_name_preserves_case() {
        let name = Name::from("X-Custom");
        assert_eq!(name.as_print_str(), "X-Custom");
        assert!(name == *"x-custom");
    }
}
