//! HTTP protocol versions.

use std::fmt;
use std::str::FromStr;

use crate::parser::error::Error;

/// HTTP protocol versions accepted on the request line.
///
/// Only HTTP/1.x is spoken on the wire; `HTTP/2` on a plain-text request line
/// is recognised so it can be answered instead of rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Http20,
}

impl HttpVersion {
    /// Whether the version requires a `Host` header.
    pub fn requires_host(&self) -> bool {
        !matches!(self, HttpVersion::Http10)
    }
}

impl FromStr for HttpVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/1.0" => Ok(HttpVersion::Http10),
            "HTTP/1.1" => Ok(HttpVersion::Http11),
            "HTTP/2" | "HTTP/2.0" => Ok(HttpVersion::Http20),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::Http20 => write!(f, "HTTP/2"),
        }
    }
}
