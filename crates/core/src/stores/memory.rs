use super::{check_batch, validate_collection_name};
use crate::models::{Chunk, CollectionPolicy, RetrievedChunk};
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Collection {
    dimensions: Option<usize>,
    entries: BTreeMap<String, (Chunk, Vec<f32>)>,
}

/// In-process store with exact cosine search. Contents die with the process.
#[derive(Debug)]
pub struct MemoryStore {
    collection: String,
    inner: RwLock<Collection>,
}

impl MemoryStore {
    pub fn new(collection: impl Into<String>) -> Result<Self, SearchError> {
        let collection = collection.into();
        validate_collection_name(&collection)?;
        Ok(Self {
            collection,
            inner: RwLock::new(Collection::default()),
        })
    }

    pub fn len(&self) -> Result<usize, SearchError> {
        Ok(self.read()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, SearchError> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collection>, SearchError> {
        self.inner
            .read()
            .map_err(|_| SearchError::Request("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collection>, SearchError> {
        self.inner
            .write()
            .map_err(|_| SearchError::Request("memory store lock poisoned".to_string()))
    }
}

fn cosine(left: &[f32], right: &[f32]) -> f64 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    f64::from(dot / (left_norm * right_norm))
}

#[async_trait]
impl VectorIndex for MemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn prepare_collection(
        &self,
        dimensions: usize,
        policy: CollectionPolicy,
    ) -> Result<(), SearchError> {
        let mut inner = self.write()?;
        if policy == CollectionPolicy::Recreate {
            *inner = Collection::default();
        }

        match inner.dimensions {
            Some(existing) if existing != dimensions => Err(SearchError::Request(format!(
                "collection {} holds {existing}-dimensional vectors, not {dimensions}",
                self.collection
            ))),
            _ => {
                inner.dimensions = Some(dimensions);
                Ok(())
            }
        }
    }

    async fn index_vector_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        let mut inner = self.write()?;
        check_batch("memory", chunks, embeddings, inner.dimensions)?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            inner
                .entries
                .insert(chunk.chunk_id.clone(), (chunk.clone(), embedding.clone()));
        }
        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let inner = self.read()?;

        let mut scored: Vec<RetrievedChunk> = inner
            .entries
            .values()
            .map(|(chunk, embedding)| RetrievedChunk {
                chunk_id: chunk.chunk_id.clone(),
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                score: cosine(query_vector, embedding),
            })
            .collect();

        scored.sort_by(|left, right| right.score.total_cmp(&left.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}
