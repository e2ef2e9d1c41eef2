//! Error types for the HTTP parser.

use thiserror::Error;

/// Errors that can occur during HTTP request parsing.
#[derive(Debug, Error)]
pub enum Error {
    /// The HTTP method in the request is not supported.
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// The request path is invalid or missing.
    #[error("Invalid HTTP path")]
    InvalidPath,

    /// The request line is malformed (wrong format or missing components).
    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    /// The HTTP version in the request is not supported.
    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    /// A required header is missing from the request.
    #[error("Required header is missing: {0}")]
    MissingHeader(String),

    /// A header in the request has an invalid format.
    #[error("Invalid header format")]
    InvalidHeaderFormat,

    /// The request is empty.
    #[error("Empty request")]
    EmptyRequest,

    /// The header section grew past the configured limit before the blank line.
    #[error("Request headers exceed {0} bytes")]
    HeadersTooLarge(usize),

    /// The declared body is larger than the configured limit.
    #[error("Request body of {0} bytes exceeds the limit of {1} bytes")]
    BodyTooLarge(usize, usize),

    /// The Content-Length header is not a valid length.
    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// The request uses a transfer coding this server does not decode.
    #[error("Unsupported Transfer-Encoding: {0}")]
    UnsupportedTransferEncoding(String),

    /// The peer closed the connection before a complete request arrived.
    #[error("Incomplete request")]
    Incomplete,

    /// Error parsing JSON.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}
