//! Shared, read-only state handed to every connection.

use std::sync::Arc;

use crate::server::config::ServerConfig;
use crate::server::mime::{DefaultMimeResolver, MimeResolver};
use crate::server::static_files::StaticFiles;

/// Configuration plus the collaborators the server was built with.
#[derive(Clone)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub mime: Arc<dyn MimeResolver>,
}

impl ServerContext {
    /// A context using the built-in MIME table.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            mime: Arc::new(DefaultMimeResolver),
        }
    }

    /// Replace the MIME resolver.
    pub fn with_mime(mut self, mime: impl MimeResolver + 'static) -> Self {
        self.mime = Arc::new(mime);
        self
    }

    /// Static files under the configured document root.
    pub fn static_files(&self) -> StaticFiles {
        StaticFiles::new(
            &self.config.document_root,
            self.config.static_prefix.clone(),
            self.config.index_file.clone(),
        )
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext").field("config", &self.config).finish_non_exhaustive()
    }
}
