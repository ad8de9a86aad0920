//! In-process sentence-transformer embeddings via ONNX Runtime.
//!
//! Expects a model directory containing `model.onnx` and `tokenizer.json`.
//! The model takes `input_ids`, `attention_mask` and `token_type_ids` and
//! emits token embeddings; these are mean-pooled under the attention mask
//! and L2-normalized. Every failure here is classified as
//! [`EmbedError::Other`], there is no remote service to back off from.

use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

use storyrank_core::error::StoryrankError;
use storyrank_core::types::Embedding;

use crate::embedding::{check_vector, l2_normalize, EmbedError, EmbeddingProvider};

pub struct OnnxEmbeddingProvider {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    name: String,
}

impl std::fmt::Debug for OnnxEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingProvider")
            .field("name", &self.name)
            .finish()
    }
}

fn load_error(context: &str, e: impl std::fmt::Display) -> StoryrankError {
    StoryrankError::Embedding(format!("{}: {}", context, e))
}

fn infer_error(context: &str, e: impl std::fmt::Display) -> EmbedError {
    EmbedError::Other(format!("{}: {}", context, e))
}

impl OnnxEmbeddingProvider {
    pub fn from_directory(model_dir: &Path) -> Result<Self, StoryrankError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(StoryrankError::Config(format!(
                    "Embedding model file not found at {}",
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(|e| load_error("ONNX session builder", e))?
            .with_intra_threads(1)
            .map_err(|e| load_error("ONNX set threads", e))?
            .commit_from_file(&model_path)
            .map_err(|e| load_error("ONNX load model", e))?;
        let tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| load_error("Load tokenizer", e))?;

        let name = model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());
        info!(model = %model_path.display(), "Loaded ONNX embedding model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            name,
        })
    }
}

fn to_batch(values: &[u32]) -> Result<ndarray::Array2<i64>, EmbedError> {
    let row: Vec<i64> = values.iter().map(|&v| v as i64).collect();
    ndarray::Array2::from_shape_vec((1, row.len()), row).map_err(|e| infer_error("Input tensor", e))
}

/// Average the token rows of a `[1, seq_len, hidden]` tensor whose mask is set.
fn mean_pool(data: &[f32], hidden: usize, mask: &[u32]) -> Embedding {
    let mut pooled = vec![0.0f32; hidden];
    let mut count = 0.0f32;
    for (tok, _) in mask.iter().enumerate().filter(|(_, m)| **m > 0) {
        let row = &data[tok * hidden..(tok + 1) * hidden];
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v;
        }
        count += 1.0;
    }
    if count > 0.0 {
        for val in &mut pooled {
            *val /= count;
        }
    }
    pooled
}

fn embed_sync(session: &Mutex<Session>, tokenizer: &Tokenizer, text: &str) -> Result<Embedding, EmbedError> {
    if text.is_empty() {
        return Err(EmbedError::Other("Cannot embed empty text".to_string()));
    }

    let encoding = tokenizer
        .encode(text, true)
        .map_err(|e| infer_error("Tokenization failed", e))?;
    let mask = encoding.get_attention_mask();

    let ids = to_batch(encoding.get_ids())?;
    let attention = to_batch(mask)?;
    let types = to_batch(encoding.get_type_ids())?;

    let ids_ref = TensorRef::from_array_view(&ids).map_err(|e| infer_error("input_ids", e))?;
    let mask_ref =
        TensorRef::from_array_view(&attention).map_err(|e| infer_error("attention_mask", e))?;
    let type_ref =
        TensorRef::from_array_view(&types).map_err(|e| infer_error("token_type_ids", e))?;

    let mut session = session
        .lock()
        .map_err(|e| infer_error("Session lock poisoned", e))?;
    let outputs = session
        .run(ort::inputs![ids_ref, mask_ref, type_ref])
        .map_err(|e| infer_error("ONNX inference failed", e))?;

    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| infer_error("Extract embeddings", e))?;
    let hidden = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
        [_, seq, hidden] if *seq as usize >= mask.len() && *hidden > 0 => *hidden as usize,
        other => {
            return Err(EmbedError::Other(format!("Unexpected output shape: {:?}", other)));
        }
    };

    let mut pooled = mean_pool(data, hidden, mask);
    l2_normalize(&mut pooled);
    check_vector(pooled)
}

impl EmbeddingProvider for OnnxEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        // Inference is CPU-bound.
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || embed_sync(&session, &tokenizer, &text))
            .await
            .map_err(|e| EmbedError::Other(format!("Embedding task panicked: {}", e)))?
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}
