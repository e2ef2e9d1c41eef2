//! HTTP response types and utilities.

use std::collections::HashMap;
use std::fmt;
use serde::Serialize;

use crate::server::cookie::Cookie;
use crate::server::error::Error;

/// An HTTP status code, guaranteed to lie in `100..=599`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const PAYLOAD_TOO_LARGE: StatusCode = StatusCode(413);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: StatusCode = StatusCode(431);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Validate a numeric status code.
    pub fn new(code: u16) -> Result<Self, Error> {
        if (100..=599).contains(&code) {
            Ok(StatusCode(code))
        } else {
            Err(Error::InvalidStatusCode(code))
        }
    }

    /// The numeric value.
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Get the reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            _ => "Unknown Status",
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.0)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        StatusCode::new(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// Represents an HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    /// The Content-Type of the body, if any
    pub content_type: Option<String>,
    /// Additional headers
    pub headers: HashMap<String, String>,
    /// Cookies to set on the client
    pub cookies: Vec<Cookie>,
    /// The response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a new HTTP response with the given status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            headers: HashMap::new(),
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A `text/plain` response.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_content_type("text/plain; charset=utf-8")
            .with_body_string(body)
    }

    /// A `text/html` response.
    pub fn html(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_content_type("text/html; charset=utf-8")
            .with_body_string(body)
    }

    /// The status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Replace the status code, rejecting values outside `100..=599`.
    pub fn set_status(&mut self, code: u16) -> Result<(), Error> {
        self.status = StatusCode::new(code)?;
        Ok(())
    }

    /// Set the response body with a string.
    pub fn with_body_string(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Set the response body with bytes.
    pub fn with_body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Add or replace a header.
    ///
    /// `Content-Type` is routed to [`content_type`](Self::content_type) and
    /// `Content-Length` is ignored; it is always computed from the body.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Add or replace a header in place.
    ///
    /// CR and LF are removed from both the name and the value so a header
    /// can never end early or start another one.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = strip_line_breaks(name.into());
        let value = strip_line_breaks(value.into());
        if name.is_empty() {
            return;
        }
        if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = Some(value);
        } else if !name.eq_ignore_ascii_case("Content-Length") {
            self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
            self.headers.insert(name, value);
        }
    }

    /// Get a header value (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&String> {
        if name.eq_ignore_ascii_case("Content-Type") {
            return self.content_type.as_ref();
        }
        self.headers.iter().find_map(|(k, v)| k.eq_ignore_ascii_case(name).then_some(v))
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(strip_line_breaks(content_type.into()));
        self
    }

    /// Attach a cookie; each one becomes its own `Set-Cookie` line.
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    /// Set the response body with a JSON value.
    ///
    /// This method serializes the provided value to JSON and sets it as the response body.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(value).map_err(Error::JsonError)?;
        Ok(self
            .with_content_type("application/json")
            .with_body_bytes(json))
    }

    /// The body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Convert the response to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_bytes_head();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Serialize the status line and headers only, as sent for `HEAD`.
    ///
    /// `Content-Length` still reflects the full body.
    pub fn to_bytes_head(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(128 + self.body.len());

        let status_line = format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), self.status.reason_phrase());
        bytes.extend_from_slice(status_line.as_bytes());

        // The fields are public, so line breaks are stripped again on the way out.
        if let Some(content_type) = &self.content_type {
            let content_type = strip_line_breaks(content_type.clone());
            bytes.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        bytes.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());

        let mut headers: Vec<_> = self.headers.iter().collect();
        headers.sort();
        for (name, value) in headers {
            let name = strip_line_breaks(name.clone());
            if name.is_empty() {
                continue;
            }
            let value = strip_line_breaks(value.clone());
            bytes.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        for cookie in &self.cookies {
            let cookie = strip_line_breaks(cookie.to_header_value());
            bytes.extend_from_slice(format!("Set-Cookie: {cookie}\r\n").as_bytes());
        }

        // Add the empty line that separates headers from body
        bytes.extend_from_slice(b"\r\n");
        bytes
    }
}

fn strip_line_breaks(mut text: String) -> String {
    text.retain(|c| c != '\r' && c != '\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_bounds() {
        assert!(StatusCode::new(99).is_err());
        assert!(StatusCode::new(100).is_ok());
        assert!(StatusCode::new(599).is_ok());
        assert!(matches!(StatusCode::new(600), Err(Error::InvalidStatusCode(600))));
        assert!(StatusCode::try_from(0).is_err());
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(StatusCode::OK.reason_phrase(), "OK");
        assert_eq!(StatusCode::BAD_REQUEST.reason_phrase(), "Bad Request");
        assert_eq!(StatusCode::NOT_FOUND.reason_phrase(), "Not Found");
        assert_eq!(StatusCode::TOO_MANY_REQUESTS.reason_phrase(), "Too Many Requests");
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR.reason_phrase(), "Internal Server Error");
        assert_eq!(StatusCode::new(418).unwrap().reason_phrase(), "Unknown Status");
        assert_eq!(StatusCode::NOT_FOUND.to_string(), "404 Not Found");
    }

    #[test]
    fn test_set_status_rejects_out_of_range() {
        let mut response = HttpResponse::new(StatusCode::OK);
        assert!(matches!(response.set_status(1000), Err(Error::InvalidStatusCode(1000))));
        assert_eq!(response.status(), StatusCode::OK);

        response.set_status(201).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.to_bytes().starts_with(b"HTTP/1.1 201 Created\r\n"));
    }

    #[test]
    fn test_serialization_layout() {
        let response = HttpResponse::new(StatusCode::OK)
            .with_content_type("text/plain")
            .with_header("X-B", "2")
            .with_header("X-A", "1")
            .with_body_string("hello");

        let text = String::from_utf8(response.to_bytes()).unwrap();
        assert_eq!(
            text,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nX-A: 1\r\nX-B: 2\r\n\r\nhello"
        );
    }

    #[test]
    fn test_content_headers_are_not_duplicated() {
        let response = HttpResponse::new(StatusCode::OK)
            .with_header("content-type", "text/css")
            .with_header("Content-Length", "999")
            .with_body_string("a{}");

        let text = String::from_utf8(response.to_bytes()).unwrap();
        assert_eq!(text.matches("Content-Type").count(), 1);
        assert!(text.contains("Content-Type: text/css\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(!text.contains("999"));
    }

    #[test]
    fn test_line_breaks_cannot_split_headers() {
        let mut response = HttpResponse::new(StatusCode::OK)
            .with_header("X-Next", "/home\r\nSet-Cookie: admin=1")
            .with_header("X-Bad\r\nInjected", "1")
            .with_header("\r\n", "dropped")
            .with_content_type("text/plain\nX-Sneaky: yes");
        assert_eq!(response.get_header("X-Next"), Some(&"/homeSet-Cookie: admin=1".to_string()));

        response.headers.insert("X-Raw".to_string(), "a\r\n\r\nbody".to_string());

        let text = String::from_utf8(response.to_bytes_head()).unwrap();
        let lines: Vec<&str> = text.split("\r\n").collect();
        assert_eq!(
            lines,
            [
                "HTTP/1.1 200 OK",
                "Content-Type: text/plainX-Sneaky: yes",
                "Content-Length: 0",
                "X-BadInjected: 1",
                "X-Next: /homeSet-Cookie: admin=1",
                "X-Raw: abody",
                "",
                "",
            ]
        );
    }

    #[test]
    fn test_header_replacement_is_case_insensitive() {
        let response = HttpResponse::new(StatusCode::OK)
            .with_header("x-token", "old")
            .with_header("X-Token", "new");
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.get_header("X-TOKEN").unwrap(), "new");
    }

    #[test]
    fn test_head_serialization_omits_body() {
        let response = HttpResponse::text(StatusCode::OK, "hidden");
        let text = String::from_utf8(response.to_bytes_head()).unwrap();
        assert!(text.contains("Content-Length: 6\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(!text.contains("hidden"));
    }

    #[test]
    fn test_cookies_get_separate_lines() {
        let response = HttpResponse::new(StatusCode::OK)
            .with_cookie(Cookie::new("a", "1"))
            .with_cookie(Cookie::new("b", "2").http_only(true));

        let text = String::from_utf8(response.to_bytes()).unwrap();
        assert!(text.contains("Set-Cookie: a=1\r\n"));
        assert!(text.contains("Set-Cookie: b=2; HttpOnly\r\n"));
    }

    #[test]
    fn test_with_json() {
        #[derive(Serialize)]
        struct Item {
            id: u32,
        }

        let response = HttpResponse::new(StatusCode::OK).with_json(&Item { id: 3 }).unwrap();
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.body_str(), Some(r#"{"id":3}"#));
    }
}
