//! HTTP parser module.
//!
//! This module turns raw bytes read off a connection into [`HttpRequest`]
//! values: incremental framing first, then request-line, header, cookie and
//! query parsing.

mod request;
mod method;
mod version;
mod error;
mod framer;

// Re-export public items
pub use request::HttpRequest;
pub use method::Method;
pub use version::HttpVersion;
pub use error::Error;
pub use framer::{find_head_end, FrameStatus, RequestFramer};

// Re-export the parse_request function
pub use request::parse_request;
