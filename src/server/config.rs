//! Server configuration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::server::error::Error;

/// TLS settings. Presence of a `TlsConfig` in [`ServerConfig::tls`] enables HTTPS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM file with the server certificate chain.
    pub cert_path: PathBuf,
    /// PEM file with the server private key.
    pub key_path: PathBuf,
    /// PEM file with the CA used to check client certificates.
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    /// Require clients to present a certificate signed by `ca_path`.
    #[serde(default)]
    pub verify_peer: bool,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: None,
            verify_peer: false,
        }
    }

    pub fn with_ca(mut self, ca_path: impl Into<PathBuf>, verify_peer: bool) -> Self {
        self.ca_path = Some(ca_path.into());
        self.verify_peer = verify_peer;
        self
    }
}

/// Per-hostname overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHostConfig {
    /// Document root used for static files requested under this host.
    pub document_root: PathBuf,
    /// Status code to error page. Relative paths are resolved against `document_root`.
    #[serde(default)]
    pub error_pages: HashMap<u16, PathBuf>,
}

impl VirtualHostConfig {
    pub fn new(document_root: impl Into<PathBuf>) -> Self {
        Self {
            document_root: document_root.into(),
            error_pages: HashMap::new(),
        }
    }

    pub fn with_error_page(mut self, status: u16, page: impl Into<PathBuf>) -> Self {
        self.error_pages.insert(status, page.into());
        self
    }

    /// The file to serve for `status`, if one is configured.
    pub fn error_page(&self, status: u16) -> Option<PathBuf> {
        let page = self.error_pages.get(&status)?;
        if page.is_absolute() {
            Some(page.clone())
        } else {
            Some(self.document_root.join(page))
        }
    }
}

/// HTTP server configuration.
///
/// Every field has a default, so a configuration document only needs to name
/// what it changes. Settings are read once at [`start`](crate::HttpServer::start).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address to bind to.
    pub addr: SocketAddr,
    /// Directory static files are served from.
    pub document_root: PathBuf,
    /// URL prefix of the static asset tree.
    pub static_prefix: String,
    /// File served for `/`.
    pub index_file: String,
    /// Requests allowed per client IP per minute. 0 disables rate limiting.
    pub max_requests_per_minute: u32,
    /// The read buffer size.
    pub read_buffer_size: usize,
    /// Largest accepted request header section.
    pub max_header_bytes: usize,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Deadline for the TLS handshake and for receiving a complete request.
    pub connection_timeout_secs: u64,
    /// Number of dispatcher workers, i.e. connections handled concurrently.
    pub workers: usize,
    /// Value of the `Server` response header.
    pub server_name: String,
    /// TLS settings; `None` serves plain HTTP.
    pub tls: Option<TlsConfig>,
    /// Hostname to per-host overrides.
    #[serde(deserialize_with = "lowercase_host_keys")]
    pub virtual_hosts: HashMap<String, VirtualHostConfig>,

    // Passive settings kept for the embedding application. The server stores
    // and reports them but does not act on them.
    pub enable_http2: bool,
    pub enable_http3: bool,
    pub compression: bool,
    pub load_balancing: String,
    pub backend_servers: Vec<String>,
    pub cdn_url: Option<String>,
    pub proxy_target: Option<String>,
    pub session_lifetime_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            document_root: PathBuf::from("public"),
            static_prefix: "/static/".to_string(),
            index_file: "index.html".to_string(),
            max_requests_per_minute: 120,
            read_buffer_size: 8192,
            max_header_bytes: 16 * 1024,
            max_body_bytes: 1024 * 1024,
            connection_timeout_secs: 30,
            workers: 4,
            server_name: "corehttp-rs".to_string(),
            tls: None,
            virtual_hosts: HashMap::new(),
            enable_http2: false,
            enable_http3: false,
            compression: false,
            load_balancing: "round_robin".to_string(),
            backend_servers: Vec::new(),
            cdn_url: None,
            proxy_target: None,
            session_lifetime_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// Load a configuration from a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    pub fn with_document_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.document_root = root.into();
        self
    }

    pub fn with_static_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.static_prefix = prefix.into();
        self
    }

    pub fn with_rate_limit(mut self, max_requests_per_minute: u32) -> Self {
        self.max_requests_per_minute = max_requests_per_minute;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_virtual_host(mut self, hostname: impl Into<String>, host: VirtualHostConfig) -> Self {
        self.virtual_hosts.insert(hostname.into().to_ascii_lowercase(), host);
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Look up the overrides for a request's host.
    pub fn virtual_host(&self, host: &str) -> Option<&VirtualHostConfig> {
        self.virtual_hosts.get(&host.to_ascii_lowercase()).or_else(|| {
            // Entries inserted into the public map directly may keep their case.
            self.virtual_hosts
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(host))
                .map(|(_, vhost)| vhost)
        })
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be at least 1".to_string()));
        }
        if self.connection_timeout_secs == 0 {
            return Err(Error::Config("connection_timeout_secs must be at least 1".to_string()));
        }
        if !self.static_prefix.starts_with('/') {
            return Err(Error::Config(format!("static_prefix must start with '/': {}", self.static_prefix)));
        }
        if let Some(tls) = &self.tls {
            if tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty() {
                return Err(Error::Config("TLS requires both cert_path and key_path".to_string()));
            }
            if tls.verify_peer && tls.ca_path.is_none() {
                return Err(Error::Config("verify_peer requires ca_path".to_string()));
            }
        }
        Ok(())
    }
}

/// Host names compare case-insensitively, so stored keys are lower-cased.
fn lowercase_host_keys<'de, D>(deserializer: D) -> Result<HashMap<String, VirtualHostConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let hosts = HashMap::<String, VirtualHostConfig>::deserialize(deserializer)?;
    Ok(hosts.into_iter().map(|(name, host)| (name.to_ascii_lowercase(), host)).collect())
}
