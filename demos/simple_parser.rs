//! Parsing raw requests without running a server.

use corehttp::{parse_request, sanitize_path};

fn main() {
    let request_bytes = b"POST /search?q=rust&page=2 HTTP/1.1\r\nHost: example.com\r\n\
        Cookie: theme=dark; lang=en\r\nContent-Length: 5\r\n\r\nhello";

    match parse_request(request_bytes) {
        Ok(request) => {
            println!("Successfully parsed HTTP request:");
            println!("Method: {}", request.method);
            println!("Path: {}", request.path);
            println!("Target: {}", request.target);
            println!("Version: {}", request.version);
            println!("Host: {:?}", request.host());
            println!("Query: {:?}", request.query_params);
            println!("Cookies: {:?}", request.cookies);
            println!("Body: {:?}", request.body_str());
        }
        Err(err) => {
            println!("Error parsing request: {err}");
        }
    }

    let invalid_request = b"INVALID /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n";
    match parse_request(invalid_request) {
        Ok(_) => println!("\nUnexpectedly parsed invalid request!"),
        Err(err) => println!("\nExpected error parsing invalid request: {err}"),
    }

    for path in ["/static/../../etc/passwd", "/a/./b//c/", "/static/%2e%2e/secret"] {
        println!("{path} -> {}", sanitize_path(path));
    }
}
