//! HTTP request parsing and representation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use serde::de::DeserializeOwned;

use crate::parser::error::Error;
use crate::parser::framer::find_head_end;
use crate::parser::method::Method;
use crate::parser::version::HttpVersion;

/// Represents an HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request path, without the query string
    pub path: String,
    /// The raw request target as it appeared on the request line
    pub target: String,
    /// The HTTP version
    pub version: HttpVersion,
    /// The HTTP headers
    pub headers: HashMap<String, String>,
    /// The request body
    pub body: Vec<u8>,
    /// Query parameters parsed from the target
    pub query_params: HashMap<String, String>,
    /// Cookies sent by the client
    pub cookies: HashMap<String, String>,
    /// Named path segments captured by the router
    pub path_params: HashMap<String, String>,
    /// Address of the peer, when the request came off a socket
    pub peer_addr: Option<SocketAddr>,
}

impl HttpRequest {
    /// Create a new HTTP request.
    ///
    /// # Arguments
    ///
    /// * `method` - The HTTP method
    /// * `target` - The request target, optionally with a query string
    /// * `version` - The HTTP version
    /// * `headers` - The HTTP headers
    ///
    /// # Returns
    ///
    /// A new HTTP request with an empty body
    pub fn new(method: Method, target: String, version: HttpVersion, headers: HashMap<String, String>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query)),
            None => (target.clone(), None),
        };

        let query_params: HashMap<String, String> = query
            .map(|query| query
                .split('&')
                .filter(|s| !s.is_empty())
                .map(|pair| {
                    if let Some((k, v)) = pair.split_once('=') {
                        (k.to_string(), v.to_string())
                    } else {
                        (pair.to_string(), String::new())
                    }
                })
                .collect())
            .unwrap_or_default();

        let cookies = headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("Cookie"))
            .flat_map(|(_, v)| parse_cookie_header(v))
            .collect();

        Self {
            method,
            path,
            target,
            version,
            headers,
            body: Vec::new(),
            query_params,
            cookies,
            path_params: HashMap::new(),
            peer_addr: None,
        }
    }

    /// Create a new HTTP request with a body.
    pub fn with_body(method: Method, target: String, version: HttpVersion, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        let mut request = Self::new(method, target, version, headers);
        request.body = body;
        request
    }

    /// Get a header value.
    ///
    /// # Arguments
    ///
    /// * `name` - The header name
    ///
    /// # Returns
    ///
    /// The header value, if it exists
    pub fn get_header(&self, name: &str) -> Option<&String> {
        // Headers are case-insensitive, so we need to do a case-insensitive lookup
        self.headers.iter().find_map(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                Some(v)
            } else {
                None
            }
        })
    }

    /// Check if a header exists.
    pub fn has_header(&self, name: &str) -> bool {
        self.get_header(name).is_some()
    }

    /// The host the client addressed, lower-cased and without a port.
    pub fn host(&self) -> Option<String> {
        let host = self.get_header("Host")?;
        let name = match host.rsplit_once(':') {
            // Bracketed IPv6 literals keep their colons.
            Some((name, port)) if !name.is_empty() && !port.contains(']') => name,
            _ => host.as_str(),
        };
        Some(name.to_ascii_lowercase())
    }

    /// The body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Parse the request body as JSON.
    ///
    /// # Returns
    ///
    /// The parsed JSON value, or an error if the body is not valid JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        // Check if the Content-Type header is application/json
        if !self.is_json() {
            return Err(Error::MissingHeader("Content-Type: application/json".to_string()));
        }

        let json = serde_json::from_slice(&self.body)?;
        Ok(json)
    }

    /// Check if the request has a JSON body.
    pub fn is_json(&self) -> bool {
        if let Some(content_type) = self.get_header("Content-Type") {
            content_type.starts_with("application/json")
        } else {
            false
        }
    }

    /// Get a query parameter value.
    pub fn get_query_param(&self, name: &str) -> Option<&String> {
        self.query_params.get(name)
    }

    /// Check if a query parameter exists.
    pub fn has_query_param(&self, name: &str) -> bool {
        self.query_params.contains_key(name)
    }

    /// Get a cookie sent by the client.
    pub fn cookie(&self, name: &str) -> Option<&String> {
        self.cookies.get(name)
    }

    /// Get a path parameter captured by the router, e.g. `id` for `/users/{id}`.
    pub fn param(&self, name: &str) -> Option<&String> {
        self.path_params.get(name)
    }
}

/// Split a `Cookie` header value into name/value pairs.
fn parse_cookie_header(value: &str) -> Vec<(String, String)> {
    value
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// Parse an HTTP request from a byte slice.
///
/// Everything after the blank line that terminates the header section is the
/// body. When a `Content-Length` header is present the body is cut to that
/// length; use [`RequestFramer`](crate::parser::RequestFramer) to make sure the
/// whole body has arrived first.
///
/// # Arguments
///
/// * `input` - A byte slice containing the HTTP request to parse
///
/// # Returns
///
/// The parsed HTTP request, or an error if the request is invalid
pub fn parse_request(input: &[u8]) -> Result<HttpRequest, Error> {
    let (head, body) = match find_head_end(input) {
        Some(end) => (&input[..end], &input[end..]),
        None => (input, &input[input.len()..]),
    };

    let head_str = match std::str::from_utf8(head) {
        Ok(s) => s,
        Err(_) => return Err(Error::MalformedRequestLine("Invalid UTF-8".to_string())),
    };

    let mut lines = head_str.lines();

    let request_line = match lines.next() {
        Some(line) if !line.trim().is_empty() => line,
        _ => return Err(Error::EmptyRequest),
    };

    // Split the request line into method, path, and version
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(Error::MalformedRequestLine(request_line.to_string()));
    }

    let method = Method::from_str(parts[0])?;

    let target = parts[1].to_string();
    if !target.starts_with('/') && target != "*" {
        return Err(Error::InvalidPath);
    }

    let version = HttpVersion::from_str(parts[2])?;

    let mut headers = HashMap::new();
    for line in lines {
        // Empty line indicates the end of headers
        if line.is_empty() {
            break;
        }

        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => return Err(Error::InvalidHeaderFormat),
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeaderFormat);
        }

        // Last write wins, whatever the case of the repeated name.
        headers.retain(|k: &String, _| !k.eq_ignore_ascii_case(name));
        headers.insert(name.to_string(), value.trim().to_string());
    }

    if version.requires_host() && !headers.keys().any(|k| k.eq_ignore_ascii_case("Host")) {
        return Err(Error::MissingHeader("Host".to_string()));
    }

    let body = match content_length(&headers)? {
        Some(len) => &body[..len.min(body.len())],
        None => body,
    };

    Ok(HttpRequest::with_body(method, target, version, headers, body.to_vec()))
}

/// The declared Content-Length, if any.
fn content_length(headers: &HashMap<String, String>) -> Result<Option<usize>, Error> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| {
            v.parse::<usize>()
                .map_err(|_| Error::InvalidContentLength(v.clone()))
        })
        .transpose()
}
