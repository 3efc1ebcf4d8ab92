use crate::chunking::{split_documents, ChunkingConfig};
use crate::ignore_rules::IgnoreRuleSet;
use crate::loaders::{LoadResult, LoaderRegistry, SkippedFile};
use crate::models::{Chunk, IngestionOptions, RawDocument, WalkErrorPolicy};
use crate::walker::{TreeWalker, WalkEntry};
use crate::IngestError;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct LoadReport {
    pub documents: Vec<RawDocument>,
    pub skipped_files: Vec<SkippedFile>,
    pub files_seen: usize,
    /// Traversal errors passed over under [`WalkErrorPolicy::Skip`].
    pub walk_errors: usize,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub chunks: Vec<Chunk>,
    pub skipped_files: Vec<SkippedFile>,
    pub files_seen: usize,
    pub documents: usize,
    pub walk_errors: usize,
}

fn ensure_root(root: &Path) -> Result<(), IngestError> {
    if !root.exists() {
        return Err(IngestError::InvalidArgument(format!(
            "root directory does not exist: {}",
            root.display()
        )));
    }
    if !root.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "root path is not a directory: {}",
            root.display()
        )));
    }
    Ok(())
}

/// Walks `root` and loads every accepted file. A file that fails to load
/// is recorded in `skipped_files` and the walk goes on.
pub fn load_documents(
    root: &Path,
    options: &IngestionOptions,
    registry: &LoaderRegistry,
) -> Result<LoadReport, IngestError> {
    ensure_root(root)?;

    let walker = TreeWalker::new(root)
        .ignore_rules(IgnoreRuleSet::load(root))
        .allowed_extensions(options.allowed_extensions.clone())
        .on_error(options.walk_errors);

    let report = load_entries(walker.walk(), options.walk_errors, registry)?;

    if !report.skipped_files.is_empty() {
        warn!(
            skipped = report.skipped_files.len(),
            files_seen = report.files_seen,
            "some files could not be loaded"
        );
    }
    info!(
        root = %root.display(),
        documents = report.documents.len(),
        "docs loaded"
    );

    Ok(report)
}

fn load_entries<I>(
    entries: I,
    walk_errors: WalkErrorPolicy,
    registry: &LoaderRegistry,
) -> Result<LoadReport, IngestError>
where
    I: IntoIterator<Item = Result<WalkEntry, IngestError>>,
{
    let mut report = LoadReport::default();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if walk_errors == WalkErrorPolicy::Skip => {
                warn!(%error, "skipping unreadable entry");
                report.walk_errors += 1;
                continue;
            }
            Err(error) => return Err(error),
        };

        report.files_seen += 1;
        let name = entry
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        info!(file = %name, "processing");

        match registry.load(&entry.path) {
            LoadResult::Loaded(documents) => {
                debug!(path = %entry.path.display(), documents = documents.len(), "loaded");
                report.documents.extend(documents);
            }
            LoadResult::Skipped(skipped) => {
                debug!(
                    path = %skipped.path.display(),
                    loader = skipped.loader,
                    reason = %skipped.reason,
                    "load failed"
                );
                report.skipped_files.push(skipped);
            }
        }
    }

    Ok(report)
}

/// Loads and splits the whole tree under `root`.
pub fn ingest_tree(
    root: &Path,
    options: &IngestionOptions,
    registry: &LoaderRegistry,
) -> Result<IngestionReport, IngestError> {
    let config = ChunkingConfig::from(options);
    config.validate()?;

    let loaded = load_documents(root, options, registry)?;
    let chunks = split_documents(&loaded.documents, config)?;

    info!(
        chunk_count = chunks.len(),
        max_chars = config.max_chars,
        overlap_chars = config.overlap_chars,
        "documents split"
    );

    Ok(IngestionReport {
        chunks,
        skipped_files: loaded.skipped_files,
        files_seen: loaded.files_seen,
        documents: loaded.documents.len(),
        walk_errors: loaded.walk_errors,
    })
}
