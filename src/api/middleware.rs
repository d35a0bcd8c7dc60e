//! Cross-cutting HTTP middleware: request IDs, structured request logging,
//! security headers, and CORS. Rate limiting is applied per-route in
//! `handlers` rather than as generic middleware, since read and write
//! routes are governed by different limiters.

use axum::{
    extract::Request,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Attach a request id (reusing an inbound one if present) to every request
/// and echo it back on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Structured request/response logging via `tracing`, plus a response-time header.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<String>()
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    tracing::info!(request_id = %request_id, %method, %uri, "incoming request");

    let mut response = next.run(request).await;

    let duration = start.elapsed();
    tracing::info!(
        request_id = %request_id,
        %method,
        %uri,
        status = response.status().as_u16(),
        duration_ms = duration.as_millis() as u64,
        "request completed",
    );

    if let Ok(v) = HeaderValue::from_str(&duration.as_millis().to_string()) {
        response.headers_mut().insert("X-Response-Time", v);
    }
    response
}

/// Baseline security headers appropriate for a JSON API with no embedded UI.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderValue::from_static("x-request-id")])
        .expose_headers([HeaderValue::from_static("x-request-id")])
        .max_age(Duration::from_secs(3600))
}

/// Uniform 404 body for unmatched routes, used as the router fallback.
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cors_layer_builds() {
        let _ = cors_layer();
    }
}
