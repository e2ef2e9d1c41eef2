//! An embeddable HTTP/1.1 server.
//!
//! corehttp-rs serves HTTP or HTTPS (TLS 1.3 only) from inside a host
//! application: requests are routed by method and path pattern, rate limited
//! per client IP, and files are served from a document root with path
//! traversal ruled out.
//!
//! # Features
//!
//! - Incremental request parsing with header and body size limits
//! - Routing with `{name}` path parameters, middleware and fallback handlers
//! - Per-client sliding rate limiting
//! - Static files with MIME detection and per-host document roots
//! - A bounded worker pool for connection handling
//! - TLS via rustls, with optional client certificate verification
//!
//! # Examples
//!
//! ## Parsing a request
//!
//! ```
//! use corehttp::parse_request;
//!
//! let request_bytes = b"GET /index.html?lang=en HTTP/1.1\r\nHost: example.com\r\n\r\n";
//!
//! match parse_request(request_bytes) {
//!     Ok(request) => {
//!         println!("Method: {}", request.method);
//!         println!("Path: {}", request.path);
//!         println!("Query: {:?}", request.query_params);
//!     },
//!     Err(err) => {
//!         println!("Error parsing request: {}", err);
//!     }
//! }
//! ```
//!
//! ## Serving routes
//!
//! ```no_run
//! use corehttp::{HttpResponse, HttpServer, Method, ServerConfig, StatusCode};
//!
//! # async fn run() -> Result<(), corehttp::ServerError> {
//! let server = HttpServer::new(ServerConfig::default().with_port(8080));
//!
//! server.add_route("/users/{id}", Method::GET, |req| async move {
//!     let id = req.param("id").cloned().unwrap_or_default();
//!     Ok(HttpResponse::text(StatusCode::OK, format!("user:{id}")))
//! }).await?;
//!
//! server.start().await
//! # }
//! ```
//!
//! ## Path sanitization
//!
//! ```
//! use corehttp::sanitize_path;
//!
//! assert_eq!(sanitize_path("/static/../../etc/passwd"), "/etc/passwd");
//! assert_eq!(sanitize_path("/../.."), "/");
//! ```
//!
//! See the `demos` directory for complete programs, including a TLS server.

// Export the parser module
pub mod parser;

// Export the server module
pub mod server;

// Re-export commonly used items for convenience
pub use parser::{Error as ParserError, HttpRequest, HttpVersion, Method, parse_request};
pub use server::{
    Cookie, Dispatcher, Error as ServerError, HttpResponse, HttpServer, MimeResolver, RateLimiter, Router,
    SameSite, ServerConfig, ServerContext, StatusCode, TlsConfig, VirtualHostConfig, sanitize_path,
};
