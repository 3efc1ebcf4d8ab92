pub mod memory;
pub mod postgres;
pub mod qdrant;

pub use memory::MemoryStore;
pub use postgres::PgVectorStore;
pub use qdrant::QdrantStore;

use crate::models::Chunk;
use crate::SearchError;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub fn validate_collection_name(name: &str) -> Result<(), SearchError> {
    let pattern = Regex::new(r"^[A-Za-z0-9_-]{1,255}$")?;
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(SearchError::InvalidCollection(name.to_string()))
    }
}

/// Stable UUID for a chunk id, for stores that key rows or points by UUID.
pub fn point_id(chunk_id: &str) -> Uuid {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

pub(crate) fn check_batch(
    backend: &str,
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
    dimensions: Option<usize>,
) -> Result<(), SearchError> {
    if chunks.len() != embeddings.len() {
        return Err(SearchError::Request(format!(
            "{backend}: embedding count {} doesn't match chunk count {}",
            embeddings.len(),
            chunks.len()
        )));
    }

    if let Some(expected) = dimensions {
        if let Some(bad) = embeddings.iter().find(|vector| vector.len() != expected) {
            return Err(SearchError::Request(format!(
                "{backend}: embedding dimension {} != {expected}",
                bad.len()
            )));
        }
    }

    Ok(())
}
