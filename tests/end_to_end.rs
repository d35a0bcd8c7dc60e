//! End-to-end HTTP scenarios exercised directly against the router, without
//! a running Redis or Postgres.

use std::sync::Arc;
use std::time::Duration;

use tower::ServiceExt;
use turlsvc::api::{self, AppState};
use turlsvc::cache::local::LocalCache;
use turlsvc::cache::remote::{tests::InMemoryRemote, RemoteCache};
use turlsvc::cache::CacheProxy;
use turlsvc::ratelimit::{BucketLimiter, RemoteTokenBucketLimiter};
use turlsvc::sequence::Allocator;
use turlsvc::service::UrlService;
use turlsvc::storage::tests::make_memory_store;

async fn test_state(name: &str, readonly: bool) -> Arc<AppState> {
    let store = make_memory_store().await;
    let allocator = Allocator::new(store.clone(), name, 100, 1).await.unwrap();
    let cache = CacheProxy::new(
        LocalCache::new(1000, 10_000_000, Duration::from_secs(60)),
        RemoteCache::from_backend(InMemoryRemote::new()),
    );
    let service = UrlService::new(store, cache, allocator, Duration::from_secs(2));
    Arc::new(AppState {
        service,
        read_limiter: Arc::new(BucketLimiter::new(1000.0, 1000)),
        write_limiter: Arc::new(RemoteTokenBucketLimiter::new(
            Arc::new(InMemoryRemote::new()),
            100.0,
            100,
        )),
        domain: "http://localhost:8080".to_string(),
        readonly,
    })
}

fn json_body(body: &str) -> axum::body::Body {
    axum::body::Body::from(body.to_string())
}

#[tokio::test]
async fn shorten_then_redirect_then_delete() {
    let router = api::create_router(test_state("e2e-1", false).await);

    let create = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/shorten")
                .header("content-type", "application/json")
                .body(json_body(r#"{"long_url":"https://example.com/article"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status(), axum::http::StatusCode::OK);
    let body = axum::body::to_bytes(create.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let short_url = parsed["short_url"].as_str().unwrap().to_string();
    let short_code = short_url.rsplit('/').next().unwrap().to_string();

    let redirect = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/{short_code}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(redirect.status(), axum::http::StatusCode::FOUND);
    assert_eq!(
        redirect.headers().get("location").unwrap(),
        "https://example.com/article"
    );

    let delete = router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .method("DELETE")
                .uri("/api/shorten")
                .header("content-type", "application/json")
                .body(json_body(&format!(r#"{{"short_url":"{short_url}"}}"#)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), axum::http::StatusCode::OK);

    let after_delete = router
        .oneshot(
            axum::http::Request::builder()
                .uri(format!("/{short_code}"))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(after_delete.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn shortening_the_same_url_twice_is_idempotent() {
    let router = api::create_router(test_state("e2e-2", false).await);

    let mut short_urls = Vec::new();
    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/shorten")
                    .header("content-type", "application/json")
                    .body(json_body(r#"{"long_url":"https://example.com/dup"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        short_urls.push(parsed["short_url"].as_str().unwrap().to_string());
    }
    assert_eq!(short_urls[0], short_urls[1]);
}

#[tokio::test]
async fn invalid_long_url_is_rejected() {
    let router = api::create_router(test_state("e2e-3", false).await);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/shorten")
                .header("content-type", "application/json")
                .body(json_body(r#"{"long_url":"not-a-url"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_short_code_redirects_to_not_found() {
    let router = api::create_router(test_state("e2e-4", false).await);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/zzzzzzzz")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn readonly_instance_rejects_shorten_writes() {
    let router = api::create_router(test_state("e2e-5", true).await);

    let response = router
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/shorten")
                .header("content-type", "application/json")
                .body(json_body(r#"{"long_url":"https://example.com/ro"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.status(),
        axum::http::StatusCode::METHOD_NOT_ALLOWED
    );
}

#[tokio::test]
async fn healthcheck_reports_healthy() {
    let router = api::create_router(test_state("e2e-6", false).await);

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
