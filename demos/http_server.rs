//! A fuller server: JSON, cookies, middleware, static files, rate limiting
//! and a virtual host with its own error page.
//!
//! Configuration is read from the JSON file named by the first argument, if any.

use std::sync::Arc;

use corehttp::{
    Cookie, HttpResponse, HttpServer, Method, SameSite, ServerConfig, ServerError, StatusCode, VirtualHostConfig,
};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Item {
    name: String,
    quantity: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::default()
            .with_port(8080)
            .with_document_root("public")
            .with_rate_limit(60)
            .with_virtual_host(
                "docs.localhost",
                VirtualHostConfig::new("public/docs").with_error_page(404, "404.html"),
            ),
    };
    let server = Arc::new(HttpServer::new(config));

    server.add_route("/api/items/{name}", Method::GET, |req| async move {
        let item = Item {
            name: req.param("name").cloned().unwrap_or_default(),
            quantity: 1,
        };
        HttpResponse::new(StatusCode::OK).with_json(&item)
    }).await?;

    server.add_route("/api/items", Method::POST, |req| async move {
        if !req.is_json() {
            return Ok(HttpResponse::text(StatusCode::BAD_REQUEST, "Expected a JSON body"));
        }
        let item: Item = req.json().map_err(ServerError::ParseError)?;
        HttpResponse::new(StatusCode::CREATED).with_json(&item)
    }).await?;

    server.add_route("/login", Method::POST, |_req| async move {
        let session = Cookie::new("session", "demo-token")
            .with_path("/")
            .http_only(true)
            .secure(true)
            .with_same_site(SameSite::Strict);
        Ok(HttpResponse::text(StatusCode::OK, "Logged in").with_cookie(session))
    }).await?;

    server.add_route("/logout", Method::POST, |_req| async move {
        Ok(HttpResponse::text(StatusCode::OK, "Logged out").with_cookie(Cookie::removal("session")))
    }).await?;

    server.add_route("/headers", Method::GET, |req| async move {
        let mut body = String::from("Request Headers:\n\n");
        for (name, value) in &req.headers {
            body.push_str(&format!("{name}: {value}\n"));
        }
        Ok(HttpResponse::text(StatusCode::OK, body))
    }).await?;

    server.add_middleware(|_req, response| {
        response.set_header("X-Content-Type-Options", "nosniff");
    }).await;

    server.set_not_found_handler(|req| {
        HttpResponse::text(StatusCode::NOT_FOUND, format!("Nothing at {}", req.path))
    }).await;

    server.stop_on_ctrl_c();
    info!("Serving {}", server.config().document_root.display());
    server.start().await?;

    Ok(())
}
