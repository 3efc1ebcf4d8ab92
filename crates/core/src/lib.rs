pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ignore_rules;
pub mod ingest;
pub mod llm;
pub mod loaders;
pub mod models;
pub mod orchestrator;
pub mod stores;
pub mod traits;
pub mod walker;

pub use chunking::{split_documents, split_text, ChunkingConfig};
pub use config::{
    OpenAiConfig, PgVectorConfig, DEFAULT_CHAT_MODEL, DEFAULT_COLLECTION, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_QDRANT_URL,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_BATCH,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, SearchError};
pub use ignore_rules::{IgnoreRuleSet, IGNORE_FILE_NAME};
pub use ingest::{ingest_tree, load_documents, IngestionReport, LoadReport};
pub use llm::{build_messages, ChatMessage, OpenAiChat};
pub use loaders::{
    DocumentLoader, LoadResult, LoaderRegistry, PdfLoader, PlainTextLoader, SkippedFile,
    PDF_EXTENSIONS,
};
pub use models::{
    Answer, ChatTurn, Chunk, CollectionPolicy, IngestionOptions, Metadata, MetadataValue,
    RawDocument, RetrievedChunk, SearchQuery, WalkErrorPolicy, PAGE_KEY, SOURCE_KEY,
};
pub use orchestrator::{IndexSummary, RagCoordinator, DEFAULT_TOP_K};
pub use stores::{validate_collection_name, MemoryStore, PgVectorStore, QdrantStore};
pub use traits::{AnswerGenerator, VectorIndex};
pub use walker::{dotted_extension, TreeWalker, WalkEntry};
