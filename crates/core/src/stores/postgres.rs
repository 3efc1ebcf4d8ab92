//! PostgreSQL + pgvector sink.
//!
//! All collections share two tables; a collection is a row in
//! `doc_qa_collection` and its chunks reference it with a cascading key, so
//! dropping the row drops the chunks.

use super::{check_batch, point_id, validate_collection_name};
use crate::config::PgVectorConfig;
use crate::models::{Chunk, CollectionPolicy, Metadata, RetrievedChunk};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE EXTENSION IF NOT EXISTS vector;
CREATE TABLE IF NOT EXISTS doc_qa_collection (
    uuid UUID PRIMARY KEY,
    name VARCHAR NOT NULL UNIQUE,
    cmetadata JSONB
);
CREATE TABLE IF NOT EXISTS doc_qa_embedding (
    uuid UUID PRIMARY KEY,
    collection_id UUID NOT NULL REFERENCES doc_qa_collection (uuid) ON DELETE CASCADE,
    embedding VECTOR NOT NULL,
    document VARCHAR NOT NULL,
    cmetadata JSONB NOT NULL,
    custom_id VARCHAR NOT NULL,
    UNIQUE (collection_id, custom_id)
);
";

const UPSERT_EMBEDDING: &str = "
INSERT INTO doc_qa_embedding (uuid, collection_id, embedding, document, cmetadata, custom_id)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (collection_id, custom_id) DO UPDATE
SET embedding = EXCLUDED.embedding,
    document = EXCLUDED.document,
    cmetadata = EXCLUDED.cmetadata
";

const SEARCH: &str = "
SELECT custom_id, document, cmetadata, (embedding <=> $1)::float8 AS distance
FROM doc_qa_embedding
WHERE collection_id = $2
ORDER BY embedding <=> $1
LIMIT $3
";

pub struct PgVectorStore {
    client: Client,
    collection: String,
}

impl PgVectorStore {
    pub async fn connect(
        config: &PgVectorConfig,
        collection: impl Into<String>,
    ) -> Result<Self, SearchError> {
        let collection = collection.into();
        validate_collection_name(&collection)?;

        let (client, connection) = config.to_postgres_config().connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                warn!(%error, "postgres connection error");
            }
        });

        info!(database = %config, collection = %collection, "connected to pgvector");
        Ok(Self { client, collection })
    }

    async fn collection_row(&self) -> Result<Option<(Uuid, Option<usize>)>, SearchError> {
        let row = self
            .client
            .query_opt(
                "SELECT uuid, cmetadata FROM doc_qa_collection WHERE name = $1",
                &[&self.collection],
            )
            .await?;

        Ok(row.map(|row| {
            let metadata: Option<Value> = row.get("cmetadata");
            (row.get("uuid"), metadata.as_ref().and_then(stored_dimensions))
        }))
    }

    async fn collection_id(&self) -> Result<Uuid, SearchError> {
        self.collection_row()
            .await?
            .map(|(id, _)| id)
            .ok_or_else(|| {
                SearchError::Request(format!(
                    "collection {} does not exist; run an index pass first",
                    self.collection
                ))
            })
    }
}

fn stored_dimensions(metadata: &Value) -> Option<usize> {
    metadata
        .get("dimensions")
        .and_then(Value::as_u64)
        .map(|value| value as usize)
}

fn sql_limit(top_k: usize) -> i64 {
    i64::try_from(top_k).unwrap_or(i64::MAX)
}

fn row_to_hit(row: &Row) -> Result<RetrievedChunk, SearchError> {
    let metadata: Value = row.get("cmetadata");
    let distance: f64 = row.get("distance");
    Ok(RetrievedChunk {
        chunk_id: row.get("custom_id"),
        text: row.get("document"),
        metadata: serde_json::from_value::<Metadata>(metadata)?,
        score: 1.0 - distance,
    })
}

#[async_trait]
impl VectorIndex for PgVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn prepare_collection(
        &self,
        dimensions: usize,
        policy: CollectionPolicy,
    ) -> Result<(), SearchError> {
        self.client.batch_execute(SCHEMA).await?;

        if policy == CollectionPolicy::Recreate {
            let dropped = self
                .client
                .execute(
                    "DELETE FROM doc_qa_collection WHERE name = $1",
                    &[&self.collection],
                )
                .await?;
            info!(collection = %self.collection, dropped, "pre-deleted collection");
        }

        match self.collection_row().await? {
            Some((_, Some(existing))) if existing != dimensions => {
                Err(SearchError::Request(format!(
                    "collection {} holds {existing}-dimensional vectors, not {dimensions}",
                    self.collection
                )))
            }
            Some(_) => Ok(()),
            None => {
                self.client
                    .execute(
                        "INSERT INTO doc_qa_collection (uuid, name, cmetadata) VALUES ($1, $2, $3) \
                         ON CONFLICT (name) DO NOTHING",
                        &[
                            &Uuid::new_v4(),
                            &self.collection,
                            &json!({ "dimensions": dimensions }),
                        ],
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn index_vector_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        let (collection_id, dimensions) = self.collection_row().await?.ok_or_else(|| {
            SearchError::Request(format!("collection {} was not prepared", self.collection))
        })?;
        check_batch("pgvector", chunks, embeddings, dimensions)?;

        if chunks.is_empty() {
            return Ok(());
        }

        let statement = self.client.prepare(UPSERT_EMBEDDING).await?;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let metadata = serde_json::to_value(&chunk.metadata)?;
            let vector = ::pgvector::Vector::from(embedding.clone());
            self.client
                .execute(
                    &statement,
                    &[
                        &point_id(&format!("{collection_id}/{}", chunk.chunk_id)),
                        &collection_id,
                        &vector,
                        &chunk.text,
                        &metadata,
                        &chunk.chunk_id,
                    ],
                )
                .await?;
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let collection_id = self.collection_id().await?;
        let vector = ::pgvector::Vector::from(query_vector.to_vec());
        let limit = sql_limit(top_k);

        let rows = self
            .client
            .query(SEARCH, &[&vector, &collection_id, &limit])
            .await?;

        rows.iter().map(row_to_hit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_read_from_collection_metadata() {
        assert_eq!(stored_dimensions(&json!({"dimensions": 1536})), Some(1536));
        assert_eq!(stored_dimensions(&json!({})), None);
        assert_eq!(stored_dimensions(&json!({"dimensions": "wide"})), None);
    }

    #[test]
    fn oversized_top_k_saturates_limit() {
        assert_eq!(sql_limit(4), 4);
        assert!(sql_limit(usize::MAX) > 0);
    }
}
