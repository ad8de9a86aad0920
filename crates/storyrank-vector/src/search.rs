//! Retrieval service: query text in, ranked items out.
//!
//! The query is embedded with the same provider used at ingestion, then the
//! store ranks the corpus against it. The whole operation is bounded by a
//! request deadline.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use storyrank_core::config::SearchConfig;
use storyrank_core::error::StoryrankError;
use storyrank_core::types::RankedItem;

use crate::embedding::DynEmbeddingProvider;
use crate::store::VectorStore;

pub struct RetrievalService {
    embedder: Arc<dyn DynEmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    timeout: Duration,
}

impl RetrievalService {
    pub fn new(
        embedder: Arc<dyn DynEmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            timeout,
        }
    }

    pub fn from_config(
        embedder: Arc<dyn DynEmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: &SearchConfig,
    ) -> Self {
        Self::new(embedder, store, config.request_timeout())
    }

    /// Rank stored items against `query`, best first, at most `limit`.
    ///
    /// A blank query or a zero limit is rejected before the provider is
    /// called. Provider and store failures propagate unchanged in kind.
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn rank(&self, query: &str, limit: usize) -> Result<Vec<RankedItem>, StoryrankError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(StoryrankError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        if limit == 0 {
            return Err(StoryrankError::InvalidArgument(
                "limit must be positive".to_string(),
            ));
        }

        let work = async {
            let embedding = self.embedder.embed_boxed(query).await?;
            let scored = self.store.search(&embedding, limit).await?;
            Ok::<_, StoryrankError>(scored.into_iter().map(RankedItem::from).collect::<Vec<_>>())
        };

        let results = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| StoryrankError::Timeout(self.timeout))??;
        debug!(results = results.len(), "Query ranked");
        Ok(results)
    }
}
