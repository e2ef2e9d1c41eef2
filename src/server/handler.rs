//! Handler, middleware and fallback function types.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::parser::HttpRequest;
use crate::server::{Error, HttpResponse};

/// Type alias for a boxed future that returns a Result<HttpResponse, Error>.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HttpResponse, Error>> + Send>>;

/// Type alias for a handler function that takes an HttpRequest and returns a HandlerFuture.
pub type HandlerFn = Arc<dyn Fn(HttpRequest) -> HandlerFuture + Send + Sync>;

/// Post-processing step applied to a matched route's response.
pub type Middleware = Arc<dyn Fn(&HttpRequest, &mut HttpResponse) + Send + Sync>;

/// Builds the response for a request no route matched.
pub type NotFoundHandler = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Builds the response for a handler that returned an error.
pub type ExceptionHandler = Arc<dyn Fn(&HttpRequest, &Error) -> HttpResponse + Send + Sync>;

/// Box an async closure into a [`HandlerFn`].
pub fn handler_fn<F, Fut>(handler: F) -> HandlerFn
where
    F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
{
    Arc::new(move |req: HttpRequest| -> HandlerFuture { Box::pin(handler(req)) })
}
