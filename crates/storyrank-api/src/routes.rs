//! Router setup and server lifecycle.

use axum::http::{header, Method};
use axum::routing::get;
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use storyrank_core::config::ApiConfig;
use storyrank_core::error::StoryrankError;
use storyrank_core::shutdown::ShutdownSignal;

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
///
/// `/search` is rate limited; `/health` is not.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let limiter = RateLimiter::new(state.config.api.rate_limit_per_sec);
    let search_routes = Router::new()
        .route("/search", get(handlers::search))
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(Extension(limiter));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(search_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
        .with_state(state)
}

/// Bind the configured address and serve until `shutdown` fires.
pub async fn start_server(
    config: &ApiConfig,
    state: AppState,
    shutdown: ShutdownSignal,
) -> Result<(), StoryrankError> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| StoryrankError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    serve(listener, state, shutdown).await
}

/// Serve on an already-bound listener. In-flight requests are drained after
/// `shutdown` fires; new connections are refused.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: ShutdownSignal,
) -> Result<(), StoryrankError> {
    let addr = listener.local_addr()?;
    info!(%addr, "API server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| StoryrankError::Api(format!("Server error: {}", e)))?;

    info!("API server stopped");
    Ok(())
}
