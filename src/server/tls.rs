//! TLS context construction.
//!
//! Only TLS 1.3 is offered, with the AES-256-GCM and ChaCha20-Poly1305 suites.
//! When a CA file is configured, client certificates are checked against it;
//! `verify_peer` decides whether presenting one is mandatory.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::version::TLS13;
use tokio_rustls::rustls::{RootCertStore, ServerConfig as RustlsServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::server::config::TlsConfig;
use crate::server::Error;

/// The crypto provider restricted to the allowed cipher suites.
pub fn crypto_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: vec![
            ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        ],
        ..ring::default_provider()
    }
}

/// Load the certificate, key and optional CA named by `tls` and build an acceptor.
pub fn build_tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, Error> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;
    let provider = Arc::new(crypto_provider());

    let builder = RustlsServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&TLS13])
        .map_err(tls_error)?;

    let builder = match &tls.ca_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_path)? {
                roots.add(cert).map_err(tls_error)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if tls.verify_peer {
                verifier
            } else {
                verifier.allow_unauthenticated()
            };
            debug!("Client certificates checked against {} (required: {})", ca_path.display(), tls.verify_peer);
            builder.with_client_cert_verifier(verifier.build().map_err(tls_error)?)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder.with_single_cert(certs, key).map_err(tls_error)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!("TLS enabled with certificate {}", tls.cert_path.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("invalid certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, Error> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("invalid private key in {}: {e}", path.display())))?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", path.display())))
}

fn open(path: &Path) -> Result<BufReader<File>, Error> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Tls(format!("cannot open {}: {e}", path.display())))
}

fn tls_error(e: impl std::fmt::Display) -> Error {
    Error::Tls(e.to_string())
}
