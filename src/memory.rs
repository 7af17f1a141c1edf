//! Context storage and retrieval for grounding replies.

pub mod embedding;
pub mod lance;
pub mod search;

pub use embedding::{Embedder, FastEmbedder};
pub use lance::EmbeddingTable;
pub use search::{ContextRetriever, SimilaritySearch};
