//! Storyrank vector crate - similarity ranking, vector stores, embedding
//! providers, the ingestion pipeline, and the retrieval service.
//!
//! Search is an exact linear scan with cosine similarity. Two stores are
//! provided: an in-memory one for tests and a SQLite-backed one for
//! production, both ranking through the same bounded top-K selection.

pub mod embedding;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod provider;
pub mod search;
pub mod similarity;
pub mod sqlite_store;
pub mod store;

pub use embedding::{DynEmbeddingProvider, EmbedError, EmbeddingProvider, MockEmbedding};
pub use pipeline::{CycleReport, IngestionPipeline, ItemOutcome};
pub use provider::{build_provider, LocalEmbeddingClient, OpenAiEmbeddingClient};
pub use search::RetrievalService;
pub use similarity::{cosine_similarity, Hit, TopK};
pub use sqlite_store::SqliteVectorStore;
pub use store::{MemoryVectorStore, VectorStore};
