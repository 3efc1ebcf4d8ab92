use crate::models::{ChatTurn, Chunk, CollectionPolicy, RetrievedChunk};
use crate::SearchError;
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn collection(&self) -> &str;

    /// Creates the collection if needed; with [`CollectionPolicy::Recreate`]
    /// existing content is dropped first.
    async fn prepare_collection(
        &self,
        dimensions: usize,
        policy: CollectionPolicy,
    ) -> Result<(), SearchError>;

    /// Writes chunks keyed by `chunk_id`; an existing id is overwritten.
    async fn index_vector_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError>;

    /// Most similar chunks first.
    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError>;
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        context: &[RetrievedChunk],
        history: &[ChatTurn],
    ) -> Result<String, SearchError>;
}

#[async_trait]
impl<T> VectorIndex for Box<T>
where
    T: VectorIndex + ?Sized,
{
    fn collection(&self) -> &str {
        (**self).collection()
    }

    async fn prepare_collection(
        &self,
        dimensions: usize,
        policy: CollectionPolicy,
    ) -> Result<(), SearchError> {
        (**self).prepare_collection(dimensions, policy).await
    }

    async fn index_vector_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), SearchError> {
        (**self).index_vector_chunks(chunks, embeddings).await
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        (**self).search_vector(query_vector, top_k).await
    }
}
