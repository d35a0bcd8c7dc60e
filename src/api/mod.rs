//! # URL shortener REST API
//!
//! The HTTP surface for the service: a redirect endpoint, a small JSON API
//! for creating/looking-up/deleting short codes, and a health check.
//!
//! ## Endpoints
//!
//! - `GET /{short}` — 302 redirect to the long URL
//! - `POST /api/shorten` — create a short code for `long_url`
//! - `GET /api/shorten?long_url=...` — find the short code for a long URL
//! - `DELETE /api/shorten` — soft-delete a short code
//! - `GET /healthcheck` — liveness probe
//!
//! `POST`/`DELETE /api/shorten` are not mounted at all when the instance is
//! configured `readonly`, rather than mounted and rejecting per request.
//!
//! ## Middleware
//!
//! Every request passes through, in order: `tower_http`'s `TraceLayer`,
//! CORS, a request-id tag, structured request/response logging, and a
//! baseline security-header set. Rate limiting is applied per-route inside
//! `handlers` rather than as generic middleware, since the redirect path and
//! the write path are governed by different limiters with different keys.
//!
//! ## Error format
//!
//! Errors are RFC 7807 Problem Details bodies; see [`responses::ApiError`]
//! for the single point that maps an internal [`crate::error::ErrorKind`]
//! onto an HTTP status.

pub mod handlers;
pub mod middleware;
pub mod responses;
pub mod routes;

pub use handlers::AppState;
pub use responses::{ApiError, ComponentHealth, HealthResponse, HealthStatus};
pub use routes::create_router;
