//! Incremental request framing.
//!
//! A request may arrive split over any number of reads. [`RequestFramer`]
//! accumulates bytes until the header section is complete and then until
//! exactly `Content-Length` body bytes are buffered.

use crate::parser::error::Error;

/// Outcome of feeding bytes into a [`RequestFramer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// More bytes are needed.
    Partial,
    /// A whole request is buffered.
    Complete,
}

/// Accumulates raw bytes until they form one complete request.
#[derive(Debug)]
pub struct RequestFramer {
    buf: Vec<u8>,
    max_header_bytes: usize,
    max_body_bytes: usize,
    head_len: Option<usize>,
    content_length: usize,
}

impl RequestFramer {
    /// Create a framer enforcing the given header and body limits.
    pub fn new(max_header_bytes: usize, max_body_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_header_bytes,
            max_body_bytes,
            head_len: None,
            content_length: 0,
        }
    }

    /// Feed bytes read from the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<FrameStatus, Error> {
        self.buf.extend_from_slice(data);

        if self.head_len.is_none() {
            match find_head_end(&self.buf) {
                Some(end) => {
                    if end > self.max_header_bytes {
                        return Err(Error::HeadersTooLarge(self.max_header_bytes));
                    }
                    self.content_length = declared_body_length(&self.buf[..end])?;
                    if self.content_length > self.max_body_bytes {
                        return Err(Error::BodyTooLarge(self.content_length, self.max_body_bytes));
                    }
                    self.head_len = Some(end);
                }
                None if self.buf.len() > self.max_header_bytes => {
                    return Err(Error::HeadersTooLarge(self.max_header_bytes));
                }
                None => return Ok(FrameStatus::Partial),
            }
        }

        let total = self.head_len.unwrap_or(0) + self.content_length;
        if self.buf.len() >= total {
            // Anything past the declared body is a pipelined request we do not serve.
            self.buf.truncate(total);
            Ok(FrameStatus::Complete)
        } else {
            Ok(FrameStatus::Partial)
        }
    }

    /// Bytes buffered so far.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Whether the header section has been seen in full.
    pub fn headers_complete(&self) -> bool {
        self.head_len.is_some()
    }

    /// Consume the framer, returning the buffered bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Offset just past the blank line ending the header section, if present.
///
/// Accepts both `\r\n\r\n` and bare `\n\n` terminators.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Scan a raw header section for the body length it declares.
fn declared_body_length(head: &[u8]) -> Result<usize, Error> {
    let head = String::from_utf8_lossy(head);
    let mut length = 0;

    for line in head.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("Content-Length") {
            length = value
                .parse::<usize>()
                .map_err(|_| Error::InvalidContentLength(value.to_string()))?;
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") && !value.eq_ignore_ascii_case("identity") {
            return Err(Error::UnsupportedTransferEncoding(value.to_string()));
        }
    }

    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_split_across_reads() {
        let mut framer = RequestFramer::new(1024, 1024);
        assert_eq!(framer.push(b"GET / HTTP/1.1\r\nHo").unwrap(), FrameStatus::Partial);
        assert!(!framer.headers_complete());
        assert_eq!(framer.push(b"st: a\r\n\r\n").unwrap(), FrameStatus::Complete);
        assert!(framer.headers_complete());
    }

    #[test]
    fn test_waits_for_full_body() {
        let mut framer = RequestFramer::new(1024, 1024);
        let head = b"POST /x HTTP/1.1\r\nHost: a\r\nContent-Length: 10\r\n\r\n";
        assert_eq!(framer.push(head).unwrap(), FrameStatus::Partial);
        assert_eq!(framer.push(b"01234").unwrap(), FrameStatus::Partial);
        assert_eq!(framer.push(b"56789extra").unwrap(), FrameStatus::Complete);
        assert!(framer.buffered().ends_with(b"0123456789"));
        assert_eq!(framer.into_bytes().len(), head.len() + 10);
    }

    #[test]
    fn test_header_limit() {
        let mut framer = RequestFramer::new(16, 1024);
        let result = framer.push(b"GET /a-very-long-path HTTP/1.1\r\n");
        assert!(matches!(result, Err(Error::HeadersTooLarge(16))));
    }

    #[test]
    fn test_body_limit() {
        let mut framer = RequestFramer::new(1024, 4);
        let result = framer.push(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\n");
        assert!(matches!(result, Err(Error::BodyTooLarge(5, 4))));
    }

    #[test]
    fn test_invalid_content_length() {
        let mut framer = RequestFramer::new(1024, 1024);
        let result = framer.push(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: ten\r\n\r\n");
        assert!(matches!(result, Err(Error::InvalidContentLength(ref v)) if v == "ten"));
    }

    #[test]
    fn test_chunked_rejected() {
        let mut framer = RequestFramer::new(1024, 1024);
        let result = framer.push(b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\n");
        assert!(matches!(result, Err(Error::UnsupportedTransferEncoding(_))));
    }

    #[test]
    fn test_find_head_end_variants() {
        assert_eq!(find_head_end(b"GET / HTTP/1.0\r\n\r\nbody"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.0\n\nbody"), Some(16));
        assert_eq!(find_head_end(b"GET / HTTP/1.0\r\n"), None);
    }
}
