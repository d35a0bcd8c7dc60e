//! REST API route definitions.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};
use super::middleware::{
    cors_layer, not_found, request_id_middleware, request_logging_middleware,
    security_headers_middleware,
};

/// Build the full router. Write routes (`POST`/`DELETE /api/shorten`) are
/// omitted entirely when the instance is running read-only, rather than
/// mounted and rejecting at request time, so they never show up as a route
/// a client could discover.
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/healthcheck", get(handlers::health_check))
        .route("/:short", get(handlers::redirect));

    router = if state.readonly {
        router.route("/api/shorten", get(handlers::get_shorten))
    } else {
        router.route(
            "/api/shorten",
            get(handlers::get_shorten)
                .post(handlers::create_shorten)
                .delete(handlers::delete_shorten),
        )
    };

    router
        .fallback(not_found)
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(axum::middleware::from_fn(request_logging_middleware))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::local::LocalCache;
    use crate::cache::remote::{tests::InMemoryRemote, RemoteCache};
    use crate::config::Config;
    use crate::ratelimit::local::BucketLimiter;
    use crate::ratelimit::remote::RemoteTokenBucketLimiter;
    use crate::sequence::Allocator;
    use crate::service::UrlService;
    use crate::storage::tests::make_memory_store;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn make_state(readonly: bool) -> Arc<AppState> {
        let store = make_memory_store().await;
        let allocator = Allocator::new(store.clone(), "routes-test", 100, 1)
            .await
            .unwrap();
        let cache = crate::cache::CacheProxy::new(
            LocalCache::new(1000, 10_000_000, Duration::from_secs(60)),
            RemoteCache::from_backend(InMemoryRemote::new()),
        );
        let service = UrlService::new(store, cache, allocator, Duration::from_secs(2));
        let backend = Arc::new(InMemoryRemote::new());
        Arc::new(AppState {
            service,
            read_limiter: Arc::new(BucketLimiter::new(1000.0, 1000)),
            write_limiter: Arc::new(RemoteTokenBucketLimiter::new(backend, 100.0, 100)),
            domain: Config::default().domain,
            readonly,
        })
    }

    #[tokio::test]
    async fn health_check_returns_200() {
        let state = make_state(false).await;
        let router = create_router(state);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/healthcheck")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn readonly_instance_has_no_write_routes() {
        let state = make_state(true).await;
        let router = create_router(state);
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/shorten")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"long_url":"https://a.io"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            axum::http::StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
