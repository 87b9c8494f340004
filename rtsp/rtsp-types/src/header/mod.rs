//! Contains everything header related

use crate::parse::{Finish, IResult};
use bytesstr::BytesStr;

pub mod headers;
pub(crate) mod name;
pub mod typed;

pub use name::Name;

/// A typed RTSP header.
///
/// Every RTSP header is carried in a single value; implementations parse one
/// value with nom and print the canonical form. Headers appearing multiple
/// times (e.g. `WWW-Authenticate`) are handled with
/// [`Headers::get_all`](headers::Headers::get_all).
pub trait Header: Sized {
    fn name() -> &'static Name;

    fn parse(value: &BytesStr) -> Result<Self, HeaderError>;

    fn print(&self) -> BytesStr;
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("missing header {}", .0.as_print_str())]
    Missing(Name),
    #[error("malformed header {}: {message}", name.as_print_str())]
    Malformed { name: Name, message: String },
}

impl HeaderError {
    pub fn missing(name: Name) -> Self {
        Self::Missing(name)
    }

    pub fn malformed(name: Name, message: impl Into<String>) -> Self {
        Self::Malformed {
            name,
            message: message.into(),
        }
    }
}

/// Run a nom parser over a header value, mapping failures into [`HeaderError`]
pub(crate) fn parse_value<'i, O, P>(
    name: &Name,
    value: &'i BytesStr,
    parser: P,
) -> Result<O, HeaderError>
where
    P: FnMut(&'i str) -> IResult<&'i str, O>,
{
    let mut parser = parser;

    match parser(value.as_str()).finish() {
        Ok((_, output)) => Ok(output),
        Err(e) => Err(HeaderError::malformed(name.clone(), format!("{e:?}"))),
    }
}
