//! HTTP request handlers for the URL-shortening surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ratelimit::RateLimiter;
use crate::service::UrlService;

use super::responses::{ApiError, ComponentHealth, HealthResponse, HealthStatus};

/// Shared handler state.
pub struct AppState {
    pub service: UrlService,
    pub read_limiter: Arc<dyn RateLimiter>,
    pub write_limiter: Arc<dyn RateLimiter>,
    pub domain: String,
    pub readonly: bool,
}

fn client_key(headers: &axum::http::HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string())
}

/// `GET /{short}` — redirect to the long URL, or 404/400.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Path(short): Path<String>,
) -> Result<Response, ApiError> {
    if !state.read_limiter.take(&client_key(&headers)).await {
        return Err(Error::rate_limited("too many requests").into());
    }
    let long_url = state.service.retrieve(&short).await?;
    Ok((
        StatusCode::FOUND,
        [(axum::http::header::LOCATION, long_url)],
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ShortenRequest {
    pub long_url: String,
}

#[derive(Debug, Serialize)]
pub struct ShortenResponse {
    pub short_url: String,
    pub long_url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: String,
}

impl ShortenResponse {
    fn from_record(domain: &str, record: crate::service::UrlRecord) -> Self {
        Self {
            short_url: format!("{}/{}", domain.trim_end_matches('/'), record.short),
            long_url: record.long_url,
            created_at: record.created_at,
            deleted_at: record.deleted_at,
            error: String::new(),
        }
    }
}

/// `POST /api/shorten` — create a short code for a long URL.
pub async fn create_shorten(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<ShortenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if state.readonly {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "READONLY",
            "this instance does not accept writes",
        ));
    }
    if !state.write_limiter.take(&client_key(&headers)).await {
        return Err(Error::rate_limited("too many requests").into());
    }
    let record = state.service.create(&body.long_url).await?;
    Ok((
        StatusCode::OK,
        Json(ShortenResponse::from_record(&state.domain, record)),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub long_url: String,
}

/// `GET /api/shorten?long_url=...` — find the existing record for a long URL.
pub async fn get_shorten(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LookupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.service.lookup(&params.long_url).await?;
    Ok(Json(ShortenResponse::from_record(&state.domain, record)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteShortenRequest {
    pub short_url: String,
}

/// `DELETE /api/shorten` — soft-delete a short code.
pub async fn delete_shorten(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteShortenRequest>,
) -> Result<StatusCode, ApiError> {
    if state.readonly {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "READONLY",
            "this instance does not accept writes",
        ));
    }
    let short = extract_short(&body.short_url, &state.domain);
    state.service.delete(&short).await?;
    Ok(StatusCode::OK)
}

/// Accept either a bare short code or a full `{domain}/{short}` URL.
fn extract_short(input: &str, domain: &str) -> String {
    let trimmed = input.trim_start_matches(domain).trim_start_matches('/');
    trimmed.to_string()
}

/// `GET /healthcheck`.
pub async fn health_check() -> impl IntoResponse {
    let mut checks = HashMap::new();
    checks.insert("service".to_string(), ComponentHealth::healthy());

    Json(HealthResponse {
        status: HealthStatus::Healthy,
        version: crate::VERSION.to_string(),
        checks,
        timestamp: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_short_strips_domain_and_slash() {
        assert_eq!(extract_short("http://x.io/abc", "http://x.io"), "abc");
        assert_eq!(extract_short("abc", "http://x.io"), "abc");
    }
}
