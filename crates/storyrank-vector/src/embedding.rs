//! Embedding provider traits, the failure classification shared by every
//! backend, and a deterministic mock.
//!
//! Ingestion reacts differently to each [`EmbedError`] variant: quota
//! exhaustion pauses for a long cooldown, transient failures for a short
//! one, and anything else only skips the item at hand.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use storyrank_core::error::StoryrankError;
use storyrank_core::types::Embedding;

/// Classified embedding failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbedError {
    /// Network trouble or a temporarily overloaded provider.
    #[error("Transient embedding failure: {0}")]
    Transient(String),

    /// Rate limit or billing quota exhausted.
    #[error("Embedding quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Embedding failed: {0}")]
    Other(String),
}

impl From<EmbedError> for StoryrankError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Transient(msg) => StoryrankError::Transient(msg),
            EmbedError::QuotaExceeded(msg) => StoryrankError::QuotaExceeded(msg),
            EmbedError::Other(msg) => StoryrankError::Embedding(msg),
        }
    }
}

/// Service for generating text embeddings.
///
/// Used both at ingestion (item text) and at query time, so the two sides
/// must be served by the same provider and model for scores to mean anything.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Embedding, EmbedError>> + Send;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

/// Object-safe version of [`EmbeddingProvider`] for dynamic dispatch.
///
/// `EmbeddingProvider::embed` returns `impl Future`, which rules out
/// `dyn EmbeddingProvider`. This trait boxes the future instead; every
/// `EmbeddingProvider` gets it through the blanket impl below.
pub trait DynEmbeddingProvider: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Embedding, EmbedError>> + Send + 'a>>;

    fn model_name(&self) -> &str;
}

impl<T: EmbeddingProvider> DynEmbeddingProvider for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Embedding, EmbedError>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn model_name(&self) -> &str {
        EmbeddingProvider::model_name(self)
    }
}

/// L2-normalize in place. Zero vectors are left untouched.
pub(crate) fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values.iter_mut() {
            *val /= norm;
        }
    }
}

/// Reject an empty vector, or one with NaN or infinite components, returned
/// by a provider.
pub(crate) fn check_vector(embedding: Embedding) -> Result<Embedding, EmbedError> {
    if embedding.is_empty() {
        return Err(EmbedError::Other("Provider returned an empty vector".to_string()));
    }
    if let Some(pos) = embedding.iter().position(|v| !v.is_finite()) {
        return Err(EmbedError::Other(format!(
            "Provider returned a non-finite component at index {}",
            pos
        )));
    }
    Ok(embedding)
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Deterministic hash-based embeddings.
///
/// Identical inputs always produce identical unit vectors. Every call is
/// counted, so tests can assert that a request never reached the provider.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of `embed` calls so far, across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hash_to_vector(&self, text: &str) -> Embedding {
        let mut result: Embedding = (0..self.dimensions)
            .map(|i| {
                let mut hasher = DefaultHasher::new();
                text.hash(&mut hasher);
                i.hash(&mut hasher);
                let h = hasher.finish();
                (((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0) as f32
            })
            .collect();
        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.is_empty() {
            return Err(EmbedError::Other("Cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
