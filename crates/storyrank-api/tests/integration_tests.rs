//! Integration tests for the Storyrank API.
//!
//! Each test builds its own router over an in-memory store seeded with
//! embeddings from the same mock provider the handlers query with, so a
//! query equal to a stored title ranks that story first.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use storyrank_api::handlers::{HealthResponse, SearchResponse};
use storyrank_api::{create_router, serve, AppState};
use storyrank_core::config::StoryrankConfig;
use storyrank_core::shutdown::ShutdownSignal;
use storyrank_core::types::{Embedding, Item, StoredRecord};
use storyrank_storage::Database;
use storyrank_vector::{
    DynEmbeddingProvider, EmbedError, EmbeddingProvider, MemoryVectorStore, MockEmbedding,
    SqliteVectorStore, VectorStore,
};

// =============================================================================
// Helpers
// =============================================================================

const TITLES: [&str; 4] = [
    "Show HN: A tiny SQLite vector store",
    "Why Rust async is hard",
    "The history of the Unix shell",
    "Ask HN: Favourite debugging stories?",
];

async fn seed(store: &dyn VectorStore, embedder: &MockEmbedding) {
    for (i, title) in TITLES.iter().enumerate() {
        let id = i as i64 + 1;
        let mut item = Item::new(id, *title);
        item.url = Some(format!("https://example.com/{}", id));
        item.score = Some(100 - id);
        let embedding = embedder.embed(title).await.unwrap();
        store.upsert(StoredRecord::new(item, embedding)).await.unwrap();
    }
}

struct TestApp {
    router: axum::Router,
    embedder: MockEmbedding,
}

async fn make_app_with(config: StoryrankConfig) -> TestApp {
    let embedder = MockEmbedding::with_dimensions(64);
    let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
    seed(store.as_ref(), &embedder).await;
    let state = AppState::new(config, Arc::new(embedder.clone()), store);
    TestApp {
        router: create_router(state),
        embedder,
    }
}

async fn make_app() -> TestApp {
    make_app_with(StoryrankConfig::default()).await
}

fn app_with_embedder(embedder: Arc<dyn DynEmbeddingProvider>, config: StoryrankConfig) -> axum::Router {
    create_router(AppState::new(config, embedder, Arc::new(MemoryVectorStore::new())))
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

/// Helper to collect a response body as bytes.
async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Fails every call with the configured error.
struct FailingEmbedder(EmbedError);

impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding, EmbedError> {
        Err(self.0.clone())
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Never answers within any sane deadline.
struct StalledEmbedder;

impl EmbeddingProvider for StalledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Embedding, EmbedError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![1.0])
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

// =============================================================================
// /health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = make_app().await;
    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(health.stored_items, TITLES.len() as u64);
}

// =============================================================================
// /search happy paths
// =============================================================================

#[tokio::test]
async fn test_search_exact_title_ranks_first() {
    let app = make_app().await;
    let uri = "/search?q=Why%20Rust%20async%20is%20hard&limit=3";
    let response = app.router.oneshot(get(uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: SearchResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.query, "Why Rust async is hard");
    assert_eq!(body.results.len(), 3);
    assert_eq!(body.results[0].id.0, 2);
    assert_eq!(body.results[0].title, "Why Rust async is hard");
    assert!((body.results[0].similarity - 1.0).abs() < 1e-5);
    for pair in body.results.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[tokio::test]
async fn test_search_result_shape() {
    let app = make_app().await;
    let response = app.router.oneshot(get("/search?q=unix&limit=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let result = &body["results"][0];
    for key in ["id", "title", "url", "score", "text", "similarity"] {
        assert!(result.get(key).is_some(), "missing {}", key);
    }
    assert!(result.get("embedding").is_none());
}

#[tokio::test]
async fn test_search_default_limit() {
    let mut config = StoryrankConfig::default();
    config.search.default_limit = 2;
    let app = make_app_with(config).await;

    let response = app.router.oneshot(get("/search?q=stories")).await.unwrap();
    let body: SearchResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.results.len(), 2);
}

#[tokio::test]
async fn test_search_limit_clamped_to_max() {
    let mut config = StoryrankConfig::default();
    config.search.default_limit = 1;
    config.search.max_limit = 3;
    let app = make_app_with(config).await;

    let response = app.router.oneshot(get("/search?q=stories&limit=50")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: SearchResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.results.len(), 3);
}

#[tokio::test]
async fn test_search_sqlite_backed() {
    let embedder = MockEmbedding::with_dimensions(32);
    let db = Arc::new(Database::in_memory().unwrap());
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(db).unwrap());
    seed(store.as_ref(), &embedder).await;
    let router = create_router(AppState::new(
        StoryrankConfig::default(),
        Arc::new(embedder),
        store,
    ));

    let uri = "/search?q=The%20history%20of%20the%20Unix%20shell&limit=2";
    let response = router.oneshot(get(uri)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: SearchResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.results[0].id.0, 3);
    assert_eq!(body.results[0].url.as_deref(), Some("https://example.com/3"));
    assert_eq!(body.results[0].score, Some(97));
}

// =============================================================================
// /search client errors
// =============================================================================

#[tokio::test]
async fn test_search_missing_query() {
    let app = make_app().await;
    let response = app.router.oneshot(get("/search")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"], "bad_request");
    assert!(body["message"].as_str().unwrap().contains("'q'"));
    assert_eq!(app.embedder.calls(), 0);
}

#[tokio::test]
async fn test_search_blank_query_never_embeds() {
    let app = make_app().await;
    let response = app.router.oneshot(get("/search?q=%20%20")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.embedder.calls(), 0);
}

#[tokio::test]
async fn test_search_non_positive_limit() {
    for uri in ["/search?q=rust&limit=0", "/search?q=rust&limit=-5"] {
        let app = make_app().await;
        let response = app.router.oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(app.embedder.calls(), 0);
    }
}

#[tokio::test]
async fn test_search_malformed_limit() {
    let app = make_app().await;
    let response = app.router.oneshot(get("/search?q=rust&limit=lots")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "bad_request");
}

// =============================================================================
// /search downstream failures
// =============================================================================

#[tokio::test]
async fn test_search_quota_is_service_unavailable() {
    let router = app_with_embedder(
        Arc::new(FailingEmbedder(EmbedError::QuotaExceeded("429".into()))),
        StoryrankConfig::default(),
    );
    let response = router.oneshot(get("/search?q=rust")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "service_unavailable");
}

#[tokio::test]
async fn test_search_provider_failure_is_server_error() {
    let router = app_with_embedder(
        Arc::new(FailingEmbedder(EmbedError::Other("model missing".into()))),
        StoryrankConfig::default(),
    );
    let response = router.oneshot(get("/search?q=rust")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "internal_error");
}

#[tokio::test(start_paused = true)]
async fn test_search_deadline_is_gateway_timeout() {
    let mut config = StoryrankConfig::default();
    config.search.request_timeout_secs = 2;
    let router = app_with_embedder(Arc::new(StalledEmbedder), config);

    let response = router.oneshot(get("/search?q=rust")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

// =============================================================================
// Middleware
// =============================================================================

#[tokio::test]
async fn test_search_rate_limited() {
    let mut config = StoryrankConfig::default();
    config.api.rate_limit_per_sec = 1;
    let app = make_app_with(config).await;

    let mut statuses = Vec::new();
    for _ in 0..5 {
        let response = app.router.clone().oneshot(get("/search?q=rust")).await.unwrap();
        statuses.push(response.status());
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            assert_eq!(body_json(response).await["error"], "too_many_requests");
        }
    }
    assert!(statuses.contains(&StatusCode::TOO_MANY_REQUESTS));

    // Health is exempt.
    let response = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let app = make_app().await;
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/search?q=rust")
        .header("origin", "https://somewhere.example")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = make_app().await;
    let response = app.router.oneshot(get("/items")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_write_method_not_allowed() {
    let app = make_app().await;
    let request = Request::post("/search?q=rust").body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// =============================================================================
// Server lifecycle
// =============================================================================

#[tokio::test]
async fn test_serve_stops_on_shutdown() {
    let embedder = MockEmbedding::with_dimensions(8);
    let state = AppState::new(
        StoryrankConfig::default(),
        Arc::new(embedder),
        Arc::new(MemoryVectorStore::new()),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let shutdown = ShutdownSignal::new();

    let server = tokio::spawn(serve(listener, state, shutdown.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
