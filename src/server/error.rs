//! Error types for the HTTP server.

use thiserror::Error;

use crate::parser::Error as ParserError;

/// Errors that can occur during HTTP server operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Error parsing an HTTP request.
    #[error("Parse error: {0}")]
    ParseError(#[from] ParserError),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Building the TLS context or completing a handshake failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A status code outside 100..=599 was assigned to a response.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// A route pattern could not be compiled.
    #[error("Invalid route pattern {0}: {1}")]
    InvalidRoutePattern(String, String),

    /// `start` was called on a server that is already running.
    #[error("Server is already running")]
    AlreadyRunning,

    /// A task was submitted to a dispatcher that is not running.
    #[error("Dispatcher is not running")]
    DispatcherStopped,

    /// The peer did not complete its request within the connection timeout.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Requested resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("Internal server error: {0}")]
    InternalError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
