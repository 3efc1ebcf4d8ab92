use crate::config::OpenAiConfig;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_EMBEDDING_BATCH: usize = 64;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| SearchError::Request("embedder returned no vector".to_string()))
    }
}

#[async_trait]
impl<T> Embedder for Box<T>
where
    T: Embedder + ?Sized,
{
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        (**self).embed_batch(texts).await
    }
}

/// Hashes character trigrams into a fixed number of buckets. Deterministic
/// and offline; useful for tests and air-gapped runs.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    config: OpenAiConfig,
    batch_size: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            batch_size: DEFAULT_EMBEDDING_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut request = self
            .client
            .post(self.config.endpoint("embeddings")?)
            .json(&json!({
                "model": self.config.embedding_model,
                "input": inputs,
            }));

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: "openai-embeddings".to_string(),
                details: format!("{status}: {body}"),
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        order_embeddings(payload, inputs.len(), self.dimensions())
    }
}

fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, SearchError> {
    let mut items = payload.data;
    if items.len() != expected {
        return Err(SearchError::BackendResponse {
            backend: "openai-embeddings".to_string(),
            details: format!("expected {expected} embeddings, got {}", items.len()),
        });
    }

    items.sort_by_key(|item| item.index);
    items
        .into_iter()
        .map(|item| {
            if item.embedding.len() != dimensions {
                return Err(SearchError::BackendResponse {
                    backend: "openai-embeddings".to_string(),
                    details: format!(
                        "embedding dimension {} != {dimensions}",
                        item.embedding.len()
                    ),
                });
            }
            Ok(item.embedding)
        })
        .collect()
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), model = %self.config.embedding_model, "embedding batch");
            vectors.extend(self.request(batch).await?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic() -> Result<(), SearchError> {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").await?;
        let second = embedder.embed("Hydraulic pressure and flow").await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() -> Result<(), SearchError> {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vectors = embedder
            .embed_batch(&["abc".to_string(), "defgh".to_string()])
            .await?;
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
        Ok(())
    }

    #[test]
    fn response_items_are_reordered_by_index() -> Result<(), SearchError> {
        let payload: EmbeddingResponse = serde_json::from_value(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ],
            "model": "text-embedding-ada-002"
        }))?;

        let vectors = order_embeddings(payload, 2, 2)?;
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        Ok(())
    }

    #[test]
    fn wrong_count_or_dimension_is_rejected() -> Result<(), SearchError> {
        let short: EmbeddingResponse = serde_json::from_value(json!({
            "data": [{"index": 0, "embedding": [1.0, 0.0]}]
        }))?;
        assert!(order_embeddings(short, 2, 2).is_err());

        let wide: EmbeddingResponse = serde_json::from_value(json!({
            "data": [{"index": 0, "embedding": [1.0, 0.0, 0.5]}]
        }))?;
        assert!(order_embeddings(wide, 1, 2).is_err());
        Ok(())
    }
}
