use crate::error::IngestError;
use crate::models::{Chunk, IngestionOptions, Metadata, RawDocument};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1_000,
            overlap_chars: 0,
        }
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_chars ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.max_chars - self.overlap_chars
    }
}

/// Cuts `text` into slices of at most `max_chars` characters. Slice `k`
/// starts at character `k * (max_chars - overlap_chars)`.
pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect::<String>());
        if end == chars.len() {
            break;
        }
        start += config.step();
    }

    Ok(pieces)
}

/// Splits every document, copying its metadata onto each chunk.
pub fn split_documents(
    documents: &[RawDocument],
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();

    for document in documents {
        for (ordinal, text) in split_text(&document.text, config)?.into_iter().enumerate() {
            let ordinal = ordinal as u64;
            chunks.push(Chunk {
                chunk_id: make_chunk_id(&document.metadata, ordinal, &text),
                ordinal,
                text,
                metadata: document.metadata.clone(),
            });
        }
    }

    Ok(chunks)
}

fn make_chunk_id(metadata: &Metadata, ordinal: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in metadata {
        hasher.update(key.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.to_string().as_bytes());
        hasher.update([0x1e]);
    }
    hasher.update(ordinal.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
