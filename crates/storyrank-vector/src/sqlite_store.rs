//! SQLite-backed vector store.
//!
//! Search streams every stored embedding through a bounded top-K, then
//! fetches item metadata for the winners only. Both steps run inside one
//! [`ItemRepository::read`] so a concurrent write cannot land between them.
//! Blocking SQLite work is moved off the async runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use storyrank_core::error::StoryrankError;
use storyrank_core::types::{ScoredItem, StoredRecord};
use storyrank_storage::{Database, ItemRepository};

use crate::similarity::{cosine_similarity, Hit, TopK};
use crate::store::{check_embedding, check_limit, DimensionWatch, VectorStore};

/// Production vector store over the `items` table.
#[derive(Debug)]
pub struct SqliteVectorStore {
    repo: Arc<ItemRepository>,
    dims: DimensionWatch,
}

impl SqliteVectorStore {
    pub fn new(db: Arc<Database>) -> Result<Self, StoryrankError> {
        let repo = ItemRepository::new(db);
        let dims = DimensionWatch::default();
        if let Some(existing) = repo.corpus_dimensions()? {
            dims.seed(existing);
        }
        info!(dimensions = ?dims.current(), "Opened SQLite vector store");
        Ok(Self {
            repo: Arc::new(repo),
            dims,
        })
    }

    pub fn repository(&self) -> &ItemRepository {
        &self.repo
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoryrankError>
    where
        F: FnOnce(&ItemRepository) -> Result<T, StoryrankError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| StoryrankError::Storage(format!("Storage task failed: {}", e)))?
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, record: StoredRecord) -> Result<(), StoryrankError> {
        check_embedding(&record)?;
        self.dims.observe(record.id(), record.embedding.len());
        self.blocking(move |repo| repo.upsert(&record)).await
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredItem>, StoryrankError> {
        check_limit(limit)?;
        let query = query.to_vec();

        self.blocking(move |repo| {
            repo.read(|snapshot| {
                let mut top = TopK::new(limit);
                let scanned = snapshot.for_each_embedding(|id, embedding| {
                    top.offer(Hit::new(id, cosine_similarity(&query, &embedding)));
                })?;

                let hits = top.into_sorted_vec();
                let ids: Vec<_> = hits.iter().map(|hit| hit.id).collect();
                let mut items: HashMap<_, _> = snapshot
                    .fetch_items(&ids)?
                    .into_iter()
                    .map(|item| (item.id, item))
                    .collect();
                debug!(scanned, returned = hits.len(), "Linear scan complete");

                Ok(hits
                    .into_iter()
                    .filter_map(|hit| {
                        items.remove(&hit.id).map(|item| ScoredItem {
                            item,
                            similarity: hit.similarity,
                        })
                    })
                    .collect())
            })
        })
        .await
    }

    async fn count(&self) -> Result<u64, StoryrankError> {
        self.blocking(|repo| repo.count()).await
    }

    async fn close(&self) -> Result<(), StoryrankError> {
        self.blocking(|repo| repo.database().close()).await
    }
}
