//! Vector store capability and an in-memory implementation.
//!
//! Every store answers the same contract: `upsert` replaces by item ID,
//! `search` ranks the whole corpus by cosine similarity (descending, ties by
//! ascending ID) and returns at most `limit` items.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

use storyrank_core::error::StoryrankError;
use storyrank_core::types::{ItemId, ScoredItem, StoredRecord};

use crate::similarity::{cosine_similarity, Hit, TopK};

/// Durable collection of embedded items.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the record keyed by its item ID.
    async fn upsert(&self, record: StoredRecord) -> Result<(), StoryrankError>;

    /// Best `limit` items for `query`. `limit` must be positive.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredItem>, StoryrankError>;

    /// Number of stored records.
    async fn count(&self) -> Result<u64, StoryrankError>;

    /// Release resources. Idempotent; later operations fail.
    async fn close(&self) -> Result<(), StoryrankError>;
}

pub(crate) fn check_limit(limit: usize) -> Result<(), StoryrankError> {
    if limit == 0 {
        return Err(StoryrankError::InvalidArgument(
            "limit must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Refuse records whose embedding holds NaN or infinite components.
pub(crate) fn check_embedding(record: &StoredRecord) -> Result<(), StoryrankError> {
    if record.embedding.iter().any(|v| !v.is_finite()) {
        return Err(StoryrankError::Storage(format!(
            "Embedding for item {} has non-finite components",
            record.id()
        )));
    }
    Ok(())
}

/// Tracks the corpus dimensionality and warns on writes that disagree.
///
/// Mismatched writes are still accepted; they simply score 0 against
/// queries of the corpus dimensionality.
#[derive(Debug, Default)]
pub(crate) struct DimensionWatch {
    dims: AtomicUsize,
}

impl DimensionWatch {
    pub(crate) fn seed(&self, dims: usize) {
        let _ = self
            .dims
            .compare_exchange(0, dims, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub(crate) fn observe(&self, id: ItemId, dims: usize) {
        if dims == 0 {
            return;
        }
        match self
            .dims
            .compare_exchange(0, dims, Ordering::SeqCst, Ordering::SeqCst)
        {
            Err(expected) if expected != dims => {
                warn!(
                    item_id = %id,
                    expected,
                    actual = dims,
                    "Embedding dimensionality differs from the corpus"
                );
            }
            _ => {}
        }
    }

    pub(crate) fn current(&self) -> Option<usize> {
        match self.dims.load(Ordering::SeqCst) {
            0 => None,
            dims => Some(dims),
        }
    }
}

/// In-memory store backed by an ordered map. Used in tests and benchmarks.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    records: RwLock<BTreeMap<ItemId, StoredRecord>>,
    dims: DimensionWatch,
    closed: AtomicBool,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Corpus dimensionality, once the first record has been written.
    pub fn dimensions(&self) -> Option<usize> {
        self.dims.current()
    }

    pub fn get(&self, id: ItemId) -> Option<StoredRecord> {
        self.records.read().ok()?.get(&id).cloned()
    }

    fn ensure_open(&self) -> Result<(), StoryrankError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoryrankError::Storage("Vector store is closed".to_string()));
        }
        Ok(())
    }
}

fn lock_poisoned<E: std::fmt::Display>(e: E) -> StoryrankError {
    StoryrankError::Storage(format!("Vector store lock poisoned: {}", e))
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, record: StoredRecord) -> Result<(), StoryrankError> {
        self.ensure_open()?;
        check_embedding(&record)?;
        self.dims.observe(record.id(), record.embedding.len());
        let mut records = self.records.write().map_err(lock_poisoned)?;
        records.insert(record.id(), record);
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredItem>, StoryrankError> {
        check_limit(limit)?;
        self.ensure_open()?;
        let records = self.records.read().map_err(lock_poisoned)?;

        let mut top = TopK::new(limit);
        for (id, record) in records.iter() {
            top.offer(Hit::new(*id, cosine_similarity(query, &record.embedding)));
        }

        Ok(top
            .into_sorted_vec()
            .into_iter()
            .filter_map(|hit| {
                records.get(&hit.id).map(|record| ScoredItem {
                    item: record.item.clone(),
                    similarity: hit.similarity,
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<u64, StoryrankError> {
        self.ensure_open()?;
        let records = self.records.read().map_err(lock_poisoned)?;
        Ok(records.len() as u64)
    }

    async fn close(&self) -> Result<(), StoryrankError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
