//! Static file serving and request path sanitization.

use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::server::mime::MimeResolver;
use crate::server::{Error, HttpResponse, StatusCode};

/// Normalize a client-supplied path so it cannot climb above the root.
///
/// The query string and fragment are dropped, percent-encoded dots and
/// slashes are decoded, `/` and `\` both separate segments, empty and `.` segments are removed and `..` removes the previous
/// segment (never going above the root). The result always starts with `/`;
/// if nothing is left it is `/`.
///
/// The function is idempotent and never returns a `..` segment.
pub fn sanitize_path(requested: &str) -> String {
    let path = requested.split(['?', '#']).next().unwrap_or_default();
    let path = decode_path_chars(path);

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Decode `%2e`, `%2f` and `%5c` in either case. Other escapes are left alone,
/// and none of the decoded characters can form a new escape.
fn decode_path_chars(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3).map(str::to_ascii_lowercase);
        let decoded = match escape.as_deref() {
            Some("%2e") => Some('.'),
            Some("%2f") => Some('/'),
            Some("%5c") => Some('\\'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[pos + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decode every `%XX` escape once. Malformed escapes are kept as written;
/// `None` when the decoded bytes are not UTF-8.
fn percent_decode(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = path.get(i + 1..i + 3).and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = hex {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok()
}

/// Files under a document root.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    document_root: PathBuf,
    static_prefix: String,
    index_file: String,
}

impl StaticFiles {
    pub fn new(document_root: impl Into<PathBuf>, static_prefix: impl Into<String>, index_file: impl Into<String>) -> Self {
        Self {
            document_root: document_root.into(),
            static_prefix: static_prefix.into(),
            index_file: index_file.into(),
        }
    }

    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    /// Sanitize `requested` and, for paths under the static prefix, confirm
    /// the file it names really lies under the document root once symlinks
    /// are resolved. Paths that escape, and paths whose resolution fails for
    /// any reason other than the file not existing, become `/`.
    pub async fn sanitize(&self, requested: &str) -> String {
        let sanitized = sanitize_path(requested);
        if !sanitized.starts_with(&self.static_prefix) {
            return sanitized;
        }

        let Some(decoded) = percent_decode(&sanitized) else {
            return sanitized;
        };
        match self.contained(&self.document_root.join(decoded.trim_start_matches('/'))).await {
            Ok(_) => sanitized,
            Err(e) if e.kind() == io::ErrorKind::NotFound => sanitized,
            Err(e) => {
                warn!("Rejecting static path {requested}: {e}");
                "/".to_string()
            }
        }
    }

    /// The file a sanitized path refers to, if it exists under the document
    /// root. `/` refers to the index file. Remaining percent escapes are
    /// decoded here, so `/static/my%20file.css` names `my file.css`.
    pub async fn resolve(&self, sanitized: &str) -> Option<PathBuf> {
        let relative = if sanitized == "/" {
            self.index_file.clone()
        } else {
            percent_decode(sanitized.trim_start_matches('/'))?
        };
        if relative.contains('\0') {
            return None;
        }

        let path = self.contained(&self.document_root.join(relative)).await.ok()?;
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        metadata.is_file().then_some(path)
    }

    /// Read a resolved file into a 200 response typed by its extension.
    pub async fn serve(&self, path: &Path, mime: &dyn MimeResolver) -> Result<HttpResponse, Error> {
        let body = tokio::fs::read(path).await?;
        debug!("Serving {} ({} bytes)", path.display(), body.len());
        Ok(HttpResponse::new(StatusCode::OK)
            .with_content_type(mime.mime_type_for(path))
            .with_body_bytes(body))
    }

    /// Canonicalize `path` and check it is inside the canonical document root.
    async fn contained(&self, path: &Path) -> io::Result<PathBuf> {
        let root = tokio::fs::canonicalize(&self.document_root).await?;
        let resolved = tokio::fs::canonicalize(path).await?;
        if resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is outside the document root", resolved.display()),
            ))
        }
    }
}
