//! Embedding generation via fastembed.

use crate::error::{MemoryError, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;

const EMBEDDING_DIM: usize = 384; // all-MiniLM-L6-v2 dimension

/// Turns text into a vector for similarity search.
pub trait Embedder: Send + Sync + 'static {
    /// Length of every vector this embedder produces.
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;
}

/// Local embedding model (all-MiniLM-L6-v2 by default).
///
/// The model is loaded on first use so that a missing model download only
/// costs the context lookup, never agent startup.
#[derive(Clone, Default)]
pub struct FastEmbedder {
    model: Arc<OnceCell<Arc<fastembed::TextEmbedding>>>,
}

impl FastEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    async fn model(&self) -> Result<Arc<fastembed::TextEmbedding>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                // fastembed is synchronous, so load it on the blocking pool
                let model = tokio::task::spawn_blocking(|| {
                    fastembed::TextEmbedding::try_new(Default::default())
                })
                .await
                .map_err(|error| {
                    MemoryError::EmbeddingFailed(format!("embedding task failed: {error}"))
                })?
                .map_err(|error| MemoryError::EmbeddingFailed(error.to_string()))?;

                tracing::info!("embedding model loaded");
                Ok::<_, crate::Error>(Arc::new(model))
            })
            .await?;

        Ok(model.clone())
    }
}

impl Embedder for FastEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.model().await?;
        let text = text.to_string();

        let embeddings = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
            .await
            .map_err(|error| {
                MemoryError::EmbeddingFailed(format!("embedding task failed: {error}"))
            })?
            .map_err(|error| MemoryError::EmbeddingFailed(error.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| {
                MemoryError::EmbeddingFailed("model returned no embedding".into()).into()
            })
    }
}
