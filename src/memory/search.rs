//! Context retrieval: embed the message, return the nearest stored snippets.

use crate::error::Result;
use crate::memory::embedding::Embedder;
use crate::memory::lance::EmbeddingTable;
use futures::future::BoxFuture;

/// Source of context snippets related to a message.
///
/// Retrieval never fails: context is an enhancement, so implementations
/// return an empty list when anything goes wrong.
pub trait ContextRetriever: Send + Sync {
    /// Up to `limit` snippets, most relevant first.
    fn retrieve<'a>(&'a self, query: &'a str, limit: usize) -> BoxFuture<'a, Vec<String>>;
}

/// Vector similarity search over the [`EmbeddingTable`].
pub struct SimilaritySearch<E> {
    table: EmbeddingTable,
    embedder: E,
}

impl<E: Embedder> SimilaritySearch<E> {
    pub fn new(table: EmbeddingTable, embedder: E) -> Self {
        Self { table, embedder }
    }

    /// Open (or create) the context table sized for `embedder`.
    pub async fn open(connection: &lancedb::Connection, embedder: E) -> Result<Self> {
        let table = EmbeddingTable::open_or_create(connection, embedder.dimension()).await?;
        Ok(Self::new(table, embedder))
    }

    /// Fallible search, used by [`ContextRetriever::retrieve`].
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;
        let results = self.table.vector_search(&embedding, limit).await?;

        Ok(results.into_iter().map(|(content, _distance)| content).collect())
    }

    /// Embed and store a snippet so later searches can find it.
    pub async fn ingest(&self, content: &str) -> Result<String> {
        let embedding = self.embedder.embed(content).await?;
        let id = uuid::Uuid::new_v4().to_string();
        self.table.store(&id, content, &embedding).await?;
        Ok(id)
    }
}

impl<E: Embedder> ContextRetriever for SimilaritySearch<E> {
    fn retrieve<'a>(&'a self, query: &'a str, limit: usize) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            match self.search(query, limit).await {
                Ok(snippets) => {
                    tracing::debug!(count = snippets.len(), "context retrieved");
                    snippets
                }
                Err(error) => {
                    tracing::warn!(%error, "context retrieval failed, continuing without context");
                    Vec::new()
                }
            }
        })
    }
}

/// Split a document into snippets on blank lines.
pub fn split_snippets(document: &str) -> Vec<String> {
    document
        .split("\n\n")
        .map(str::trim)
        .filter(|snippet| !snippet.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;

    /// Counts a handful of keywords; enough structure for distance ordering.
    struct KeywordEmbedder;

    impl Embedder for KeywordEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let text = text.to_lowercase();
            Ok(["rust", "python", "database"]
                .iter()
                .map(|keyword| text.matches(keyword).count() as f32)
                .collect())
        }
    }

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(MemoryError::EmbeddingFailed("model unavailable".into()).into())
        }
    }

    async fn connect(dir: &tempfile::TempDir) -> lancedb::Connection {
        lancedb::connect(dir.path().to_str().expect("utf-8 temp path"))
            .execute()
            .await
            .expect("lancedb should open")
    }

    #[tokio::test]
    async fn retrieves_most_relevant_snippets_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let search = SimilaritySearch::open(&connect(&dir).await, KeywordEmbedder)
            .await
            .expect("open");
        search.ingest("Python tips for beginners").await.expect("ingest");
        search.ingest("Rust ownership and borrowing in Rust").await.expect("ingest");
        search.ingest("Database indexing with Rust").await.expect("ingest");

        let snippets = search.retrieve("how do I learn rust?", 2).await;

        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0], "Rust ownership and borrowing in Rust");
        assert!(!snippets.contains(&"Python tips for beginners".to_string()));
    }

    #[tokio::test]
    async fn embedding_failures_degrade_to_no_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let search = SimilaritySearch::open(&connect(&dir).await, BrokenEmbedder)
            .await
            .expect("open");

        assert!(search.search("anything", 5).await.is_err());
        assert!(search.retrieve("anything", 5).await.is_empty());
    }

    #[test]
    fn splits_documents_on_blank_lines() {
        let snippets = split_snippets("first block\nstill first\n\n\n  second  \n\n");
        assert_eq!(snippets, vec!["first block\nstill first", "second"]);
    }
}
