//! HTTP server implementation for corehttp-rs.
//!
//! [`HttpServer`] accepts plain or TLS connections and hands each one to a
//! [`Dispatcher`] worker. A connection carries one request, which is rate
//! limited per client IP, matched against static files and then against the
//! [`Router`].

mod config;
mod connection;
mod context;
mod cookie;
mod dispatcher;
mod error;
mod handler;
mod http_server;
mod mime;
mod rate_limiter;
mod response;
mod router;
mod static_files;
mod tls;

// Re-export public items
pub use config::{ServerConfig, TlsConfig, VirtualHostConfig};
pub use connection::{ActiveClient, ActiveClients, ClientGuard};
pub use context::ServerContext;
pub use cookie::{Cookie, SameSite};
pub use dispatcher::{Dispatcher, Task};
pub use error::Error;
pub use handler::{handler_fn, ExceptionHandler, HandlerFn, HandlerFuture, Middleware, NotFoundHandler};
pub use http_server::{parse_error_response, ConnectionHandler, HttpServer, PANIC_MESSAGE, RATE_LIMIT_MESSAGE};
pub use mime::{DefaultMimeResolver, MimeResolver, DEFAULT_MIME_TYPE};
pub use rate_limiter::{RateLimiter, DEFAULT_WINDOW};
pub use response::{HttpResponse, StatusCode};
pub use router::{normalize_path, Router};
pub use static_files::{sanitize_path, StaticFiles};
pub use tls::{build_tls_acceptor, crypto_provider};
