use super::{check_batch, point_id, validate_collection_name};
use crate::models::{Chunk, CollectionPolicy, Metadata, RetrievedChunk};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::info;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, SearchError> {
        let collection = collection.into();
        validate_collection_name(&collection)?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection,
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    fn backend_error(status: StatusCode) -> SearchError {
        SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        }
    }
}

fn hit_from_point(hit: &Value) -> Result<RetrievedChunk, SearchError> {
    let metadata = hit
        .pointer("/payload/metadata")
        .cloned()
        .map(serde_json::from_value::<Metadata>)
        .transpose()?
        .unwrap_or_default();

    Ok(RetrievedChunk {
        chunk_id: hit
            .pointer("/payload/chunk_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        text: hit
            .pointer("/payload/page_content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        metadata,
        score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn prepare_collection(
        &self,
        dimensions: usize,
        policy: CollectionPolicy,
    ) -> Result<(), SearchError> {
        if self.vector_size != dimensions {
            return Err(SearchError::Request(format!(
                "configured vector size {} does not match requested {}",
                self.vector_size, dimensions
            )));
        }

        if policy == CollectionPolicy::Recreate {
            let response = self.client.delete(self.collection_url()).send().await?;
            if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
                return Err(Self::backend_error(response.status()));
            }
            info!(collection = %self.collection, "pre-deleted collection");
        }

        let response = self.client.get(self.collection_url()).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": { "size": dimensions, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }
        Ok(())
    }

    async fn index_vector_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        check_batch("qdrant", chunks, embeddings, Some(self.vector_size))?;

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                json!({
                    "id": point_id(&chunk.chunk_id).to_string(),
                    "vector": embedding,
                    "payload": {
                        "chunk_id": chunk.chunk_id,
                        "page_content": chunk.text,
                        "metadata": chunk.metadata,
                    },
                })
            })
            .collect::<Vec<_>>();

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query_vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .map(|hits| hits.iter().map(hit_from_point).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
