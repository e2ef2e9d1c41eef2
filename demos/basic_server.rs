//! A basic server: a few routes, a path parameter and Ctrl+C shutdown.

use std::sync::Arc;

use corehttp::{HttpResponse, HttpServer, Method, ServerConfig, StatusCode};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::default().with_addr("127.0.0.1:8081".parse()?);
    let server = Arc::new(HttpServer::new(config));

    server.add_route("/", Method::GET, |_req| async move {
        Ok(HttpResponse::text(StatusCode::OK, "Hello, World!"))
    }).await?;

    server.add_route("/hello", Method::GET, |req| async move {
        let name = req.get_query_param("name").map_or("World", |s| s.as_str());
        Ok(HttpResponse::text(StatusCode::OK, format!("Hello, {name}!")))
    }).await?;

    server.add_route("/users/{id}", Method::GET, |req| async move {
        let id = req.param("id").cloned().unwrap_or_default();
        Ok(HttpResponse::text(StatusCode::OK, format!("user:{id}")))
    }).await?;

    // Responds with whatever status the `code` query parameter names.
    server.add_route("/status", Method::GET, |req| async move {
        let code = req.get_query_param("code").and_then(|c| c.parse::<u16>().ok()).unwrap_or(200);
        let status = StatusCode::new(code)?;
        Ok(HttpResponse::text(status, format!("Status: {status}")))
    }).await?;

    server.stop_on_ctrl_c();
    info!("Press Ctrl+C to stop");
    server.start().await?;

    Ok(())
}
