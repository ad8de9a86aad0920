//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use storyrank_core::config::StoryrankConfig;
use storyrank_vector::{DynEmbeddingProvider, RetrievalService, VectorStore};

/// Shared application state. Cheap to clone; everything sits behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StoryrankConfig>,
    pub retrieval: Arc<RetrievalService>,
    pub store: Arc<dyn VectorStore>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: StoryrankConfig,
        embedder: Arc<dyn DynEmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let retrieval = RetrievalService::from_config(embedder, Arc::clone(&store), &config.search);
        Self {
            config: Arc::new(config),
            retrieval: Arc::new(retrieval),
            store,
            start_time: Instant::now(),
        }
    }
}
