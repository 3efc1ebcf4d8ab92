use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key every loader must populate with the originating file path.
pub const SOURCE_KEY: &str = "source";
/// Zero-based page number set by paginated loaders.
pub const PAGE_KEY: &str = "page";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MetadataValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Number(value) => write!(f, "{value}"),
            MetadataValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

fn source_of(metadata: &Metadata) -> Option<&str> {
    match metadata.get(SOURCE_KEY) {
        Some(MetadataValue::Text(source)) => Some(source),
        _ => None,
    }
}

/// Loader output: the text of one file or one page of a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawDocument {
    pub text: String,
    pub metadata: Metadata,
}

impl RawDocument {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(SOURCE_KEY.to_string(), MetadataValue::Text(source.into()));
        Self {
            text: text.into(),
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        source_of(&self.metadata)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    /// Position of this slice inside its document.
    pub ordinal: u64,
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    pub fn source(&self) -> Option<&str> {
        source_of(&self.metadata)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub score: f64,
}

impl RetrievedChunk {
    pub fn source(&self) -> Option<&str> {
        source_of(&self.metadata)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

/// What to do when the directory walk itself fails (unreadable directory,
/// permission denied, broken entry).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalkErrorPolicy {
    #[default]
    Fail,
    Skip,
}

/// How an indexing run treats an already populated collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollectionPolicy {
    /// Insert new chunks and overwrite chunks with the same id.
    #[default]
    Upsert,
    /// Drop the collection before writing.
    Recreate,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    /// Case-sensitive extensions with their leading dot, e.g. `.md`.
    pub allowed_extensions: Option<BTreeSet<String>>,
    pub walk_errors: WalkErrorPolicy,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 0,
            allowed_extensions: None,
            walk_errors: WalkErrorPolicy::Fail,
        }
    }
}
