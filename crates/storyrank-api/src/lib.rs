//! Storyrank API crate - axum HTTP server exposing semantic search over
//! ingested stories.
//!
//! One read endpoint (`GET /search`) plus a health check. No pagination,
//! authentication or write endpoints.

pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, serve, start_server};
pub use state::AppState;
