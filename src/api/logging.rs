//! Request logging middleware: method, path, status and latency per request.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use log::{debug, info, warn};
use std::time::Instant;

pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let start = Instant::now();
    let response = next.run(request).await;
    let latency_ms = start.elapsed().as_millis();
    let status = response.status().as_u16();

    // Health probes and the polled status endpoint would drown everything else.
    if path == "/health" || (path == "/api/sensor_status" && status < 400) {
        debug!("{method} {path} {status} {latency_ms}ms");
    } else if status >= 500 {
        warn!("{method} {path} {status} {latency_ms}ms");
    } else {
        info!("{method} {path} {status} {latency_ms}ms");
    }

    response
}
