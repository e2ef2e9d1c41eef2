//! File-extension to MIME type lookup.

use std::path::Path;

/// Type returned for unknown or missing extensions.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Resolves a file extension (without the dot) to a MIME type.
pub trait MimeResolver: Send + Sync {
    fn mime_type(&self, extension: &str) -> String;

    /// MIME type for a file path, based on its extension.
    fn mime_type_for(&self, path: &Path) -> String {
        match path.extension().and_then(|e| e.to_str()) {
            Some(extension) => self.mime_type(extension),
            None => DEFAULT_MIME_TYPE.to_string(),
        }
    }
}

/// Built-in table of common web types.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMimeResolver;

impl MimeResolver for DefaultMimeResolver {
    fn mime_type(&self, extension: &str) -> String {
        let mime = match extension.to_ascii_lowercase().as_str() {
            "html" | "htm" => "text/html; charset=utf-8",
            "css" => "text/css; charset=utf-8",
            "js" | "mjs" => "text/javascript; charset=utf-8",
            "json" => "application/json",
            "map" => "application/json",
            "txt" => "text/plain; charset=utf-8",
            "csv" => "text/csv; charset=utf-8",
            "xml" => "application/xml",
            "md" => "text/markdown; charset=utf-8",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "svg" => "image/svg+xml",
            "ico" => "image/x-icon",
            "webp" => "image/webp",
            "avif" => "image/avif",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            "ttf" => "font/ttf",
            "otf" => "font/otf",
            "mp3" => "audio/mpeg",
            "ogg" => "audio/ogg",
            "wav" => "audio/wav",
            "mp4" => "video/mp4",
            "webm" => "video/webm",
            "pdf" => "application/pdf",
            "zip" => "application/zip",
            "gz" => "application/gzip",
            "wasm" => "application/wasm",
            _ => DEFAULT_MIME_TYPE,
        };
        mime.to_string()
    }
}
