//! LanceDB table holding context snippets and their embeddings.

use crate::error::{DbError, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use std::sync::Arc;

const TABLE_NAME: &str = "context_embeddings";

/// Snippet table searched by cosine distance.
#[derive(Clone)]
pub struct EmbeddingTable {
    table: lancedb::Table,
    dimension: i32,
}

impl EmbeddingTable {
    /// Open the table, creating it on first use.
    ///
    /// An existing table built for a different embedding size is an error;
    /// mixing dimensions would make every search fail.
    pub async fn open_or_create(
        connection: &lancedb::Connection,
        dimension: usize,
    ) -> Result<Self> {
        let dimension = i32::try_from(dimension).map_err(|_| {
            DbError::LanceDb(format!("embedding dimension {dimension} is too large"))
        })?;

        match connection.open_table(TABLE_NAME).execute().await {
            Ok(table) => {
                let existing = Self::stored_dimension(&table).await?;
                if existing != Some(dimension) {
                    return Err(DbError::LanceDb(format!(
                        "context table dimension {existing:?} does not match embedder ({dimension})"
                    ))
                    .into());
                }
                return Ok(Self { table, dimension });
            }
            Err(error) => {
                tracing::debug!(%error, "failed to open context table, will create");
            }
        }

        let batches = RecordBatchIterator::new(
            vec![].into_iter().map(Ok),
            Arc::new(Self::schema(dimension)),
        );
        let table = connection
            .create_table(TABLE_NAME, Box::new(batches))
            .execute()
            .await
            .map_err(|error| DbError::LanceDb(error.to_string()))?;

        tracing::info!(dimension, "context table created");
        Ok(Self { table, dimension })
    }

    async fn stored_dimension(table: &lancedb::Table) -> Result<Option<i32>> {
        let schema = table
            .schema()
            .await
            .map_err(|error| DbError::LanceDb(error.to_string()))?;

        Ok(schema
            .field_with_name("embedding")
            .ok()
            .and_then(|field| match field.data_type() {
                arrow_schema::DataType::FixedSizeList(_, size) => Some(*size),
                _ => None,
            }))
    }

    /// Store a snippet with its embedding.
    pub async fn store(&self, id: &str, content: &str, embedding: &[f32]) -> Result<()> {
        self.check_dimension(embedding.len())?;

        let embedding_array =
            arrow_array::FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
                vec![Some(embedding.iter().map(|value| Some(*value)).collect::<Vec<_>>())],
                self.dimension,
            );

        let batch = RecordBatch::try_new(
            Arc::new(Self::schema(self.dimension)),
            vec![
                Arc::new(StringArray::from(vec![id])) as arrow_array::ArrayRef,
                Arc::new(StringArray::from(vec![content])) as arrow_array::ArrayRef,
                Arc::new(embedding_array) as arrow_array::ArrayRef,
            ],
        )
        .map_err(|error| DbError::LanceDb(error.to_string()))?;

        let batches =
            RecordBatchIterator::new(vec![Ok(batch)], Arc::new(Self::schema(self.dimension)));

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|error| DbError::LanceDb(error.to_string()))?;

        Ok(())
    }

    /// Snippets ordered by ascending cosine distance to `query`, capped at `limit`.
    pub async fn vector_search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimension(query.len())?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = self
            .table
            .count_rows(None)
            .await
            .map_err(|error| DbError::LanceDb(error.to_string()))?;
        if rows == 0 {
            return Ok(Vec::new());
        }

        use lancedb::query::{ExecutableQuery, QueryBase};

        let results: Vec<RecordBatch> = self
            .table
            .query()
            .nearest_to(query)
            .map_err(|error| DbError::LanceDb(error.to_string()))?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|error| DbError::LanceDb(error.to_string()))?
            .try_collect()
            .await
            .map_err(|error| DbError::LanceDb(error.to_string()))?;

        let mut matches = Vec::new();
        for batch in results {
            if let (Some(content_col), Some(distance_col)) = (
                batch.column_by_name("content"),
                batch.column_by_name("_distance"),
            ) {
                let contents: &StringArray = content_col.as_string::<i32>();
                let distances: &arrow_array::PrimitiveArray<Float32Type> =
                    distance_col.as_primitive();

                for i in 0..contents.len() {
                    if contents.is_valid(i) && distances.is_valid(i) {
                        matches.push((contents.value(i).to_string(), distances.value(i)));
                    }
                }
            }
        }

        matches.sort_by(|a, b| a.1.total_cmp(&b.1));
        matches.truncate(limit);

        Ok(matches)
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension as usize {
            return Err(DbError::LanceDb(format!(
                "embedding dimension mismatch: expected {}, got {len}",
                self.dimension
            ))
            .into());
        }
        Ok(())
    }

    fn schema(dimension: i32) -> arrow_schema::Schema {
        arrow_schema::Schema::new(vec![
            arrow_schema::Field::new("id", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("content", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new(
                "embedding",
                arrow_schema::DataType::FixedSizeList(
                    Arc::new(arrow_schema::Field::new(
                        "item",
                        arrow_schema::DataType::Float32,
                        true,
                    )),
                    dimension,
                ),
                false,
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(dir: &tempfile::TempDir) -> lancedb::Connection {
        lancedb::connect(dir.path().to_str().expect("utf-8 temp path"))
            .execute()
            .await
            .expect("lancedb should open")
    }

    #[tokio::test]
    async fn vector_search_orders_by_ascending_cosine_distance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = EmbeddingTable::open_or_create(&connect(&dir).await, 2)
            .await
            .expect("table");

        table.store("a", "orthogonal", &[0.0, 1.0]).await.expect("store");
        table.store("b", "exact", &[1.0, 0.0]).await.expect("store");
        table.store("c", "close", &[0.9, 0.1]).await.expect("store");

        let results = table.vector_search(&[2.0, 0.0], 2).await.expect("search");
        let contents: Vec<&str> = results.iter().map(|(content, _)| content.as_str()).collect();

        assert_eq!(contents, vec!["exact", "close"]);
        assert!(results[0].1.abs() < 1e-5);
        assert!(results[0].1 <= results[1].1);
    }

    #[tokio::test]
    async fn empty_table_searches_to_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let table = EmbeddingTable::open_or_create(&connect(&dir).await, 3)
            .await
            .expect("table");

        let results = table.vector_search(&[1.0, 0.0, 0.0], 5).await.expect("search");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn rejects_mismatched_dimensions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connection = connect(&dir).await;
        let table = EmbeddingTable::open_or_create(&connection, 3)
            .await
            .expect("table");

        assert!(table.store("a", "too short", &[1.0, 0.0]).await.is_err());
        assert!(table.vector_search(&[1.0], 1).await.is_err());

        table.store("b", "fits", &[1.0, 0.0, 0.0]).await.expect("store");
        assert!(EmbeddingTable::open_or_create(&connection, 384).await.is_err());
        assert!(EmbeddingTable::open_or_create(&connection, 3).await.is_ok());
    }
}
