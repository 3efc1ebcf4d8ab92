use crate::embeddings::{Embedder, DEFAULT_EMBEDDING_BATCH};
use crate::models::{Answer, ChatTurn, Chunk, CollectionPolicy, RetrievedChunk, SearchQuery};
use crate::traits::{AnswerGenerator, VectorIndex};
use crate::SearchError;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Chunks handed to the answer step when the caller does not say otherwise.
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub collection: String,
    pub chunks: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub struct RagCoordinator<E, V>
where
    E: Embedder,
    V: VectorIndex,
{
    embedder: E,
    store: V,
    batch_size: usize,
}

impl<E, V> RagCoordinator<E, V>
where
    E: Embedder,
    V: VectorIndex,
{
    pub fn new(embedder: E, store: V) -> Self {
        Self {
            embedder,
            store,
            batch_size: DEFAULT_EMBEDDING_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &V {
        &self.store
    }

    /// Embeds and writes `chunks`. The collection is prepared even when
    /// there is nothing to write.
    pub async fn index(
        &self,
        chunks: &[Chunk],
        policy: CollectionPolicy,
    ) -> Result<IndexSummary, SearchError> {
        let started_at = Utc::now();
        self.store
            .prepare_collection(self.embedder.dimensions(), policy)
            .await?;

        let mut written = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts = batch.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            self.store.index_vector_chunks(batch, &embeddings).await?;

            written += batch.len();
            debug!(written, total = chunks.len(), "indexed batch");
        }

        info!(collection = self.store.collection(), chunk_count = written, "indexing complete");
        Ok(IndexSummary {
            collection: self.store.collection().to_string(),
            chunks: written,
            started_at,
            finished_at: Utc::now(),
        })
    }

    pub async fn retrieve(&self, query: &SearchQuery) -> Result<Vec<RetrievedChunk>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::Request("query is empty".to_string()));
        }
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(&query.text).await?;
        self.store.search_vector(&query_vector, query.top_k).await
    }

    /// Retrieves context for `query` and lets `generator` answer from it.
    pub async fn ask<G>(
        &self,
        query: &SearchQuery,
        history: &[ChatTurn],
        generator: &G,
    ) -> Result<Answer, SearchError>
    where
        G: AnswerGenerator + ?Sized,
    {
        let sources = self.retrieve(query).await?;
        let text = generator.answer(&query.text, &sources, history).await?;
        Ok(Answer { text, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{split_documents, ChunkingConfig};
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::RawDocument;
    use crate::stores::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoGenerator {
        seen: Mutex<Vec<(String, usize, usize)>>,
    }

    #[async_trait]
    impl AnswerGenerator for EchoGenerator {
        async fn answer(
            &self,
            question: &str,
            context: &[RetrievedChunk],
            history: &[ChatTurn],
        ) -> Result<String, SearchError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((question.to_string(), context.len(), history.len()));
            }
            Ok(context
                .first()
                .map(|chunk| chunk.text.clone())
                .unwrap_or_default())
        }
    }

    fn corpus() -> Result<Vec<Chunk>, crate::IngestError> {
        split_documents(
            &[
                RawDocument::new("The service requires Java 17 at runtime.", "/repo/README.md"),
                RawDocument::new("Bananas are rich in potassium.", "/repo/food.txt"),
                RawDocument::new("Deploy with docker compose up.", "/repo/deploy.md"),
            ],
            ChunkingConfig::default(),
        )
    }

    fn coordinator() -> Result<RagCoordinator<CharacterNgramEmbedder, MemoryStore>, SearchError> {
        Ok(RagCoordinator::new(
            CharacterNgramEmbedder::default(),
            MemoryStore::new("test_collection")?,
        ))
    }

    #[tokio::test]
    async fn indexes_then_retrieves_most_similar() -> Result<(), Box<dyn std::error::Error>> {
        let coordinator = coordinator()?.with_batch_size(2);
        let summary = coordinator.index(&corpus()?, CollectionPolicy::Upsert).await?;
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.collection, "test_collection");

        let hits = coordinator
            .retrieve(&SearchQuery::new("which Java runtime is required", 2))
            .await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source(), Some("/repo/README.md"));
        assert!(hits[0].score >= hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn reindexing_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let coordinator = coordinator()?;
        coordinator.index(&corpus()?, CollectionPolicy::Upsert).await?;
        coordinator.index(&corpus()?, CollectionPolicy::Upsert).await?;

        assert_eq!(coordinator.store().len()?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_run_still_prepares() -> Result<(), Box<dyn std::error::Error>> {
        let coordinator = coordinator()?;
        let summary = coordinator.index(&[], CollectionPolicy::Recreate).await?;

        assert_eq!(summary.chunks, 0);
        assert!(coordinator.store().is_empty()?);
        Ok(())
    }

    #[tokio::test]
    async fn empty_query_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let coordinator = coordinator()?;
        let result = coordinator.retrieve(&SearchQuery::new("   ", DEFAULT_TOP_K)).await;

        assert!(matches!(result, Err(SearchError::Request(_))));
        Ok(())
    }

    #[tokio::test]
    async fn ask_passes_context_and_history() -> Result<(), Box<dyn std::error::Error>> {
        let coordinator = coordinator()?;
        coordinator.index(&corpus()?, CollectionPolicy::Upsert).await?;

        let generator = EchoGenerator::default();
        let history = vec![ChatTurn {
            question: "What is this?".to_string(),
            answer: "A service.".to_string(),
        }];
        let answer = coordinator
            .ask(
                &SearchQuery::new("How do I deploy with docker?", DEFAULT_TOP_K),
                &history,
                &generator,
            )
            .await?;

        assert_eq!(answer.text, "Deploy with docker compose up.");
        assert_eq!(answer.sources.len(), 3);
        let seen = generator.seen.lock().map_err(|error| error.to_string())?;
        assert_eq!(seen.as_slice(), &[("How do I deploy with docker?".to_string(), 3, 1)]);
        Ok(())
    }
}
