//! An HTTPS server.
//!
//! Usage: `tls_server <cert.pem> <key.pem> [ca.pem]`. With a CA file, clients
//! must present a certificate signed by it.

use std::sync::Arc;

use corehttp::{HttpResponse, HttpServer, Method, ServerConfig, StatusCode, TlsConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let (Some(cert), Some(key)) = (args.next(), args.next()) else {
        eprintln!("usage: tls_server <cert.pem> <key.pem> [ca.pem]");
        std::process::exit(2);
    };

    let mut tls = TlsConfig::new(cert, key);
    if let Some(ca) = args.next() {
        tls = tls.with_ca(ca, true);
    }

    let server = Arc::new(HttpServer::new(ServerConfig::default().with_port(8443).with_tls(tls)));

    server.add_route("/", Method::GET, |req| async move {
        let peer = req.peer_addr.map(|a| a.to_string()).unwrap_or_default();
        Ok(HttpResponse::text(StatusCode::OK, format!("Hello over TLS, {peer}")))
    }).await?;

    server.stop_on_ctrl_c();
    server.start().await?;
    Ok(())
}
