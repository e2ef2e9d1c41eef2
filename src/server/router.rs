//! Method + path-pattern routing.
//!
//! Patterns are literal segments mixed with `{name}` placeholders; a
//! placeholder matches exactly one non-empty path segment. Routes are kept in
//! an ordered list per method. When several patterns match the same path the
//! most specific one wins: segments are compared left to right and, at the
//! first position where they differ, a literal segment outranks one containing
//! a placeholder. Remaining ties go to the route registered first.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use regex::Regex;

use crate::parser::{HttpRequest, Method};
use crate::server::handler::{handler_fn, ExceptionHandler, HandlerFn, Middleware, NotFoundHandler};
use crate::server::{Error, HttpResponse, StatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Literal,
    Param,
}

struct Route {
    pattern: String,
    regex: Regex,
    param_names: Vec<String>,
    segments: Vec<Segment>,
    handler: HandlerFn,
}

impl Route {
    /// Whether this route's pattern should win over `other` when both match.
    fn outranks(&self, other: &Route) -> bool {
        for (mine, theirs) in self.segments.iter().zip(&other.segments) {
            match (mine, theirs) {
                (Segment::Literal, Segment::Param) => return true,
                (Segment::Param, Segment::Literal) => return false,
                _ => {}
            }
        }
        false
    }
}

/// Maps (method, path) to handlers and applies middleware.
#[derive(Default)]
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
    middleware: Vec<Middleware>,
    not_found: Option<NotFoundHandler>,
    exception: Option<ExceptionHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for `method` and `path`.
    ///
    /// Registering the same method and (normalized) pattern again replaces
    /// the earlier handler in place.
    pub fn add_route<F, Fut>(&mut self, path: &str, method: Method, handler: F) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.add_handler(path, method, handler_fn(handler))
    }

    /// Register one handler under several paths.
    pub fn add_routes<F, Fut>(&mut self, paths: &[&str], method: Method, handler: F) -> Result<(), Error>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        let handler = handler_fn(handler);
        for path in paths {
            self.add_handler(path, method, Arc::clone(&handler))?;
        }
        Ok(())
    }

    /// Register an already boxed handler.
    pub fn add_handler(&mut self, path: &str, method: Method, handler: HandlerFn) -> Result<(), Error> {
        let pattern = normalize_path(path);
        let (regex, param_names, segments) = compile_pattern(&pattern)?;
        let route = Route {
            pattern,
            regex,
            param_names,
            segments,
            handler,
        };

        let routes = self.routes.entry(method).or_default();
        match routes.iter_mut().find(|r| r.pattern == route.pattern) {
            Some(existing) => *existing = route,
            None => routes.push(route),
        }
        Ok(())
    }

    /// Append a middleware. Middleware runs in registration order on the
    /// response of every matched route, after its handler has returned.
    pub fn add_middleware<F>(&mut self, middleware: F)
    where
        F: Fn(&HttpRequest, &mut HttpResponse) + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(middleware));
    }

    pub fn set_not_found_handler<F>(&mut self, handler: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.not_found = Some(Arc::new(handler));
    }

    pub fn set_exception_handler<F>(&mut self, handler: F)
    where
        F: Fn(&HttpRequest, &Error) -> HttpResponse + Send + Sync + 'static,
    {
        self.exception = Some(Arc::new(handler));
    }

    /// Whether `path` is registered as a pattern under any method.
    pub fn has_route(&self, path: &str) -> bool {
        let pattern = normalize_path(path);
        self.routes
            .values()
            .any(|routes| routes.iter().any(|r| r.pattern == pattern))
    }

    /// Number of registered (method, pattern) pairs.
    pub fn route_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Registered endpoints, sorted by method then registration order.
    pub fn endpoints(&self) -> Vec<(Method, String)> {
        let mut methods: Vec<_> = self.routes.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
            .into_iter()
            .flat_map(|m| self.routes[&m].iter().map(move |r| (m, r.pattern.clone())))
            .collect()
    }

    /// Dispatch a request to its handler and build the response.
    ///
    /// Path parameters are written into `request.path_params` before the
    /// handler runs. A `HEAD` request with no `HEAD` route is served by the
    /// `GET` route for the same path.
    pub async fn route_request(&self, mut request: HttpRequest) -> HttpResponse {
        let path = normalize_path(&request.path);

        let found = self
            .find(request.method, &path)
            .or_else(|| (request.method == Method::HEAD).then(|| self.find(Method::GET, &path)).flatten());

        let Some((route, params)) = found else {
            debug!("No route for {} {}", request.method, path);
            return match &self.not_found {
                Some(handler) => handler(&request),
                None => default_not_found(&request),
            };
        };

        request.path_params = params;
        match (route.handler)(request.clone()).await {
            Ok(mut response) => {
                for middleware in &self.middleware {
                    middleware(&request, &mut response);
                }
                response
            }
            Err(e) => {
                warn!("Handler for {} {} failed: {e}", request.method, route.pattern);
                match &self.exception {
                    Some(handler) => handler(&request, &e),
                    None => default_internal_error(),
                }
            }
        }
    }

    fn find(&self, method: Method, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        let routes = self.routes.get(&method)?;

        let mut best: Option<(&Route, regex::Captures<'_>)> = None;
        for route in routes {
            let Some(captures) = route.regex.captures(path) else {
                continue;
            };
            let better = match &best {
                Some((current, _)) => route.outranks(current),
                None => true,
            };
            if better {
                best = Some((route, captures));
            }
        }

        best.map(|(route, captures)| {
            let params = route
                .param_names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    captures.get(i + 1).map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect();
            (route, params)
        })
    }
}

/// Normalize a path for registration and lookup: ensure a leading slash and
/// strip trailing slashes. The root normalizes to `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Compile a normalized pattern to an anchored regex, its parameter names and
/// the literal/parameter shape of each segment.
fn compile_pattern(pattern: &str) -> Result<(Regex, Vec<String>, Vec<Segment>), Error> {
    let invalid = |reason: &str| Error::InvalidRoutePattern(pattern.to_string(), reason.to_string());

    if pattern == "/" {
        let regex = Regex::new(r"^/$").map_err(|e| invalid(&e.to_string()))?;
        return Ok((regex, Vec::new(), Vec::new()));
    }

    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut param_names = Vec::new();
    let mut seen = HashSet::new();
    let mut segments = Vec::new();

    for segment in pattern.split('/').skip(1) {
        if segment.is_empty() {
            return Err(invalid("empty segment"));
        }
        regex.push('/');

        let mut kind = Segment::Literal;
        let mut rest = segment;
        while let Some(open) = rest.find(|c| c == '{' || c == '}') {
            if rest.as_bytes()[open] == b'}' {
                return Err(invalid("unmatched '}'"));
            }
            regex.push_str(&regex::escape(&rest[..open]));

            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unmatched '{'"))?;
            let name = &after[..close];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid("placeholder names must be non-empty identifiers"));
            }
            if !seen.insert(name.to_string()) {
                return Err(invalid("duplicate placeholder name"));
            }

            regex.push_str("([^/]+)");
            param_names.push(name.to_string());
            kind = Segment::Param;
            rest = &after[close + 1..];
        }
        regex.push_str(&regex::escape(rest));
        segments.push(kind);
    }

    regex.push('$');
    let regex = Regex::new(&regex).map_err(|e| invalid(&e.to_string()))?;
    Ok((regex, param_names, segments))
}

/// The built-in 404 page.
pub(crate) fn default_not_found(request: &HttpRequest) -> HttpResponse {
    HttpResponse::html(
        StatusCode::NOT_FOUND,
        format!(
            "<html><head><title>404 Not Found</title></head><body><h1>404 Not Found</h1>\
             <p>The requested URL {} was not found on this server.</p></body></html>",
            escape_html(&request.path)
        ),
    )
}

/// The built-in 500 page.
pub(crate) fn default_internal_error() -> HttpResponse {
    HttpResponse::html(
        StatusCode::INTERNAL_SERVER_ERROR,
        "<html><head><title>500 Internal Server Error</title></head>\
         <body><h1>500 Internal Server Error</h1></body></html>",
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::parser::parse_request;

    fn get(path: &str) -> HttpRequest {
        request(Method::GET, path)
    }

    fn request(method: Method, path: &str) -> HttpRequest {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        parse_request(raw.as_bytes()).unwrap()
    }

    fn echo_params(req: HttpRequest) -> impl Future<Output = Result<HttpResponse, Error>> {
        async move {
            let mut params: Vec<_> = req.path_params.iter().map(|(k, v)| format!("{k}={v}")).collect();
            params.sort();
            Ok(HttpResponse::text(StatusCode::OK, params.join(",")))
        }
    }

    #[tokio::test]
    async fn test_path_parameter_extraction() {
        let mut router = Router::new();
        router.add_route("/users/{id}", Method::GET, |req| async move {
            let id = req.param("id").cloned().unwrap_or_default();
            Ok(HttpResponse::text(StatusCode::OK, format!("user:{id}")))
        }).unwrap();

        let response = router.route_request(get("/users/42")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_str(), Some("user:42"));
    }

    #[tokio::test]
    async fn test_multiple_parameters_in_order() {
        let mut router = Router::new();
        router.add_route("/orgs/{org}/repos/{repo}", Method::GET, echo_params).unwrap();

        let response = router.route_request(get("/orgs/rust-lang/repos/cargo")).await;
        assert_eq!(response.body_str(), Some("org=rust-lang,repo=cargo"));
    }

    #[tokio::test]
    async fn test_placeholder_inside_segment() {
        let mut router = Router::new();
        router.add_route("/files/{name}.txt", Method::GET, echo_params).unwrap();

        let response = router.route_request(get("/files/notes.txt")).await;
        assert_eq!(response.body_str(), Some("name=notes"));

        let response = router.route_request(get("/files/notes.md")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_placeholder_does_not_span_segments() {
        let mut router = Router::new();
        router.add_route("/users/{id}", Method::GET, echo_params).unwrap();

        let response = router.route_request(get("/users/1/2")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_literal_segments_outrank_parameters() {
        for literal_first in [true, false] {
            let mut router = Router::new();
            let literal = |_req: HttpRequest| async { Ok(HttpResponse::text(StatusCode::OK, "new")) };
            if literal_first {
                router.add_route("/users/new", Method::GET, literal).unwrap();
                router.add_route("/users/{id}", Method::GET, echo_params).unwrap();
            } else {
                router.add_route("/users/{id}", Method::GET, echo_params).unwrap();
                router.add_route("/users/new", Method::GET, literal).unwrap();
            }

            let response = router.route_request(get("/users/new")).await;
            assert_eq!(response.body_str(), Some("new"));
            let response = router.route_request(get("/users/7")).await;
            assert_eq!(response.body_str(), Some("id=7"));
        }
    }

    #[tokio::test]
    async fn test_earlier_differing_segment_decides() {
        let mut router = Router::new();
        router.add_route("/{a}/b", Method::GET, |_req| async { Ok(HttpResponse::text(StatusCode::OK, "param-first")) }).unwrap();
        router.add_route("/a/{b}", Method::GET, |_req| async { Ok(HttpResponse::text(StatusCode::OK, "literal-first")) }).unwrap();

        let response = router.route_request(get("/a/b")).await;
        assert_eq!(response.body_str(), Some("literal-first"));
    }

    #[tokio::test]
    async fn test_equal_shapes_use_registration_order() {
        let mut router = Router::new();
        router.add_route("/x/{first}", Method::GET, echo_params).unwrap();
        router.add_route("/x/{second}", Method::GET, echo_params).unwrap();

        let response = router.route_request(get("/x/1")).await;
        assert_eq!(response.body_str(), Some("first=1"));
    }

    #[tokio::test]
    async fn test_trailing_slash_normalization() {
        let mut router = Router::new();
        router.add_route("/about/", Method::GET, |_req| async { Ok(HttpResponse::text(StatusCode::OK, "about")) }).unwrap();
        router.add_route("/", Method::GET, |_req| async { Ok(HttpResponse::text(StatusCode::OK, "root")) }).unwrap();

        assert_eq!(router.route_request(get("/about")).await.body_str(), Some("about"));
        assert_eq!(router.route_request(get("/about/")).await.body_str(), Some("about"));
        assert_eq!(router.route_request(get("/")).await.body_str(), Some("root"));
        assert!(router.has_route("/about"));
        assert!(router.has_route(""));
    }

    #[tokio::test]
    async fn test_method_buckets() {
        let mut router = Router::new();
        router.add_route("/items", Method::POST, |_req| async { Ok(HttpResponse::text(StatusCode::CREATED, "made")) }).unwrap();
        let method: Method = "post".parse().unwrap();

        assert_eq!(router.route_request(request(method, "/items")).await.status(), StatusCode::CREATED);
        assert_eq!(router.route_request(get("/items")).await.status(), StatusCode::NOT_FOUND);
        assert!(router.has_route("/items"));
        assert!(!router.has_route("/other"));
    }

    #[tokio::test]
    async fn test_head_falls_back_to_get() {
        let mut router = Router::new();
        router.add_route("/page", Method::GET, |_req| async { Ok(HttpResponse::text(StatusCode::OK, "page")) }).unwrap();

        let response = router.route_request(request(Method::HEAD, "/page")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_default_not_found() {
        let router = Router::new();
        let response = router.route_request(get("/missing")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.content_type.as_deref().unwrap().starts_with("text/html"));
        assert!(response.body_str().unwrap().contains("404 Not Found"));
    }

    #[tokio::test]
    async fn test_not_found_escapes_path() {
        let router = Router::new();
        let response = router.route_request(get("/<script>")).await;
        assert!(response.body_str().unwrap().contains("&lt;script&gt;"));
    }

    #[tokio::test]
    async fn test_custom_not_found() {
        let mut router = Router::new();
        router.set_not_found_handler(|req| HttpResponse::text(StatusCode::NOT_FOUND, format!("nothing at {}", req.path)));

        let response = router.route_request(get("/missing")).await;
        assert_eq!(response.body_str(), Some("nothing at /missing"));
    }

    #[tokio::test]
    async fn test_middleware_runs_after_handler_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();

        let handler_log = Arc::clone(&log);
        router.add_route("/", Method::GET, move |_req| {
            let log = Arc::clone(&handler_log);
            async move {
                log.lock().unwrap().push("handler");
                Ok(HttpResponse::text(StatusCode::OK, "body"))
            }
        }).unwrap();

        let first = Arc::clone(&log);
        router.add_middleware(move |_req, response| {
            first.lock().unwrap().push("first");
            let body = response.body_str().unwrap_or_default().to_string();
            response.set_header("X-Seen", body);
        });
        let second = Arc::clone(&log);
        router.add_middleware(move |_req, response| {
            second.lock().unwrap().push("second");
            let seen = response.get_header("X-Seen").cloned().unwrap_or_default();
            response.set_header("X-Seen", format!("{seen}+second"));
        });

        let response = router.route_request(get("/")).await;
        assert_eq!(*log.lock().unwrap(), vec!["handler", "first", "second"]);
        assert_eq!(response.get_header("X-Seen").unwrap(), "body+second");
    }

    #[tokio::test]
    async fn test_middleware_skipped_for_not_found() {
        let calls = Arc::new(Mutex::new(0));
        let mut router = Router::new();
        let counter = Arc::clone(&calls);
        router.add_middleware(move |_req, _response| *counter.lock().unwrap() += 1);

        router.route_request(get("/missing")).await;
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_middleware_sees_path_params() {
        let mut router = Router::new();
        router.add_route("/users/{id}", Method::GET, |_req| async { Ok(HttpResponse::new(StatusCode::OK)) }).unwrap();
        router.add_middleware(|req, response| {
            response.set_header("X-User", req.param("id").cloned().unwrap_or_default());
        });

        let response = router.route_request(get("/users/9")).await;
        assert_eq!(response.get_header("X-User").unwrap(), "9");
    }

    #[tokio::test]
    async fn test_handler_error_uses_default_exception_response() {
        let mut router = Router::new();
        router.add_route("/boom", Method::GET, |_req| async {
            Err(Error::InternalError("kaboom".to_string()))
        }).unwrap();

        let response = router.route_request(get("/boom")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body_str().unwrap().contains("500 Internal Server Error"));
        assert!(!response.body_str().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_custom_exception_handler() {
        let mut router = Router::new();
        router.add_route("/boom", Method::GET, |_req| async {
            Err(Error::InternalError("kaboom".to_string()))
        }).unwrap();
        router.set_exception_handler(|_req, err| HttpResponse::text(StatusCode::SERVICE_UNAVAILABLE, err.to_string()));

        let response = router.route_request(get("/boom")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body_str(), Some("Internal server error: kaboom"));
    }

    #[tokio::test]
    async fn test_add_routes_shares_handler() {
        let mut router = Router::new();
        router.add_routes(&["/a", "/b/{x}"], Method::GET, echo_params).unwrap();

        assert_eq!(router.route_count(), 2);
        assert_eq!(router.route_request(get("/a")).await.status(), StatusCode::OK);
        assert_eq!(router.route_request(get("/b/1")).await.body_str(), Some("x=1"));
    }

    #[tokio::test]
    async fn test_reregistration_replaces_handler() {
        let mut router = Router::new();
        router.add_route("/v", Method::GET, |_req| async { Ok(HttpResponse::text(StatusCode::OK, "one")) }).unwrap();
        router.add_route("/v/", Method::GET, |_req| async { Ok(HttpResponse::text(StatusCode::OK, "two")) }).unwrap();

        assert_eq!(router.route_count(), 1);
        assert_eq!(router.route_request(get("/v")).await.body_str(), Some("two"));
    }

    #[test]
    fn test_literal_text_is_escaped() {
        let (regex, _, _) = compile_pattern("/a.b").unwrap();
        assert!(regex.is_match("/a.b"));
        assert!(!regex.is_match("/aXb"));
    }

    #[test]
    fn test_invalid_patterns() {
        let mut router = Router::new();
        for pattern in ["/users/{id", "/users/id}", "/users/{}", "/a/{x}/{x}", "/a//b", "/a/{x-y}"] {
            let result = router.add_route(pattern, Method::GET, echo_params);
            assert!(matches!(result, Err(Error::InvalidRoutePattern(..))), "{pattern} should be rejected");
        }
        assert_eq!(router.route_count(), 0);
    }

    #[test]
    fn test_endpoints_listing() {
        let mut router = Router::new();
        router.add_route("/b", Method::POST, echo_params).unwrap();
        router.add_route("/a", Method::GET, echo_params).unwrap();
        router.add_route("/c", Method::GET, echo_params).unwrap();

        assert_eq!(
            router.endpoints(),
            vec![
                (Method::GET, "/a".to_string()),
                (Method::GET, "/c".to_string()),
                (Method::POST, "/b".to_string()),
            ]
        );
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("//"), "/");
        assert_eq!(normalize_path("/a/"), "/a");
        assert_eq!(normalize_path("a"), "/a");
    }
}
