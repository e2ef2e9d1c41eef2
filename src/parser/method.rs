//! HTTP request methods.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::parser::error::Error;

/// HTTP request methods as defined in RFC 7231 and common extensions.
///
/// Parsing is case-insensitive, so `"get"`, `"Get"` and `"GET"` all normalize
/// to [`Method::GET`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// GET method: Requests a representation of the specified resource.
    GET,
    /// POST method: Submits data to be processed to the identified resource.
    POST,
    /// PUT method: Replaces all current representations of the target resource with the request payload.
    PUT,
    /// DELETE method: Deletes the specified resource.
    DELETE,
    /// HEAD method: Same as GET but only transfers the status line and header section.
    HEAD,
    /// OPTIONS method: Describes the communication options for the target resource.
    OPTIONS,
    /// PATCH method: Applies partial modifications to a resource.
    PATCH,
    /// CONNECT method: Establishes a tunnel to the server identified by the target resource.
    CONNECT,
    /// TRACE method: Performs a message loop-back test along the path to the target resource.
    TRACE,
}

impl Method {
    /// The canonical upper-case name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::CONNECT => "CONNECT",
            Method::TRACE => "TRACE",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "OPTIONS" => Ok(Method::OPTIONS),
            "PATCH" => Ok(Method::PATCH),
            "CONNECT" => Ok(Method::CONNECT),
            "TRACE" => Ok(Method::TRACE),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
