//! Directory traversal with hidden-entry pruning, ignore rules and an
//! optional extension allow-list.

use crate::ignore_rules::{absolute_root, IgnoreRuleSet};
use crate::models::WalkErrorPolicy;
use crate::IngestError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

const HIDDEN_MARKER: char = '.';

/// A file accepted by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub dir: PathBuf,
}

pub struct TreeWalker {
    root: PathBuf,
    allowed_extensions: Option<BTreeSet<String>>,
    ignore_rules: IgnoreRuleSet,
    on_error: WalkErrorPolicy,
}

impl TreeWalker {
    /// A relative `root` is anchored at the current directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = absolute_root(&root.into());
        Self {
            ignore_rules: IgnoreRuleSet::empty(&root),
            root,
            allowed_extensions: None,
            on_error: WalkErrorPolicy::Fail,
        }
    }

    pub fn allowed_extensions(mut self, extensions: Option<BTreeSet<String>>) -> Self {
        self.allowed_extensions = extensions;
        self
    }

    pub fn ignore_rules(mut self, rules: IgnoreRuleSet) -> Self {
        self.ignore_rules = rules;
        self
    }

    pub fn on_error(mut self, policy: WalkErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily yields accepted files.
    ///
    /// Traversal errors are yielded as `Err` items. With
    /// [`WalkErrorPolicy::Fail`] the sequence ends right after the first one;
    /// with [`WalkErrorPolicy::Skip`] the walk carries on past it.
    pub fn walk(&self) -> impl Iterator<Item = Result<WalkEntry, IngestError>> + '_ {
        let items = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| self.should_descend(entry))
            .filter_map(move |item| match item {
                Ok(entry) => self.accept_file(&entry).map(Ok),
                Err(error) => Some(Err(IngestError::Walk(error))),
            });

        apply_error_policy(items, self.on_error)
    }

    /// Runs before walkdir reads a directory, so a pruned directory is
    /// never enumerated.
    fn should_descend(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }

        if is_hidden(entry) {
            debug!(path = %entry.path().display(), "pruning hidden directory");
            return false;
        }

        if self.ignore_rules.matches(entry.path(), true) {
            debug!(path = %entry.path().display(), "pruning ignored directory");
            return false;
        }

        true
    }

    fn accept_file(&self, entry: &DirEntry) -> Option<WalkEntry> {
        let path = entry.path();
        let is_file = entry.file_type().is_file() || (entry.path_is_symlink() && path.is_file());
        if !is_file || is_hidden(entry) {
            return None;
        }

        if self.ignore_rules.matches(path, false) {
            debug!(path = %path.display(), "skipping ignored file");
            return None;
        }

        if let Some(allowed) = &self.allowed_extensions {
            let name = entry.file_name().to_string_lossy();
            if !allowed.contains(dotted_extension(&name)) {
                return None;
            }
        }

        Some(WalkEntry {
            path: path.to_path_buf(),
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        })
    }
}

/// Ends the sequence right after the first error under
/// [`WalkErrorPolicy::Fail`]; passes everything through under
/// [`WalkErrorPolicy::Skip`].
fn apply_error_policy<T, I>(
    items: I,
    policy: WalkErrorPolicy,
) -> impl Iterator<Item = Result<T, IngestError>>
where
    I: Iterator<Item = Result<T, IngestError>>,
{
    let halt_on_error = policy == WalkErrorPolicy::Fail;
    items.scan(false, move |halted, item| {
        if *halted {
            return None;
        }
        *halted = halt_on_error && item.is_err();
        Some(item)
    })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .as_encoded_bytes()
        .starts_with(&[HIDDEN_MARKER as u8])
}

/// Extension of a file name including its leading dot, or `""`.
///
/// Leading dots belong to the stem, so `.bashrc` has no extension while
/// `archive.tar.gz` has `.gz` and `name.` has `.`.
pub fn dotted_extension(name: &str) -> &str {
    let stem_start = name.len() - name.trim_start_matches(HIDDEN_MARKER).len();
    match name[stem_start..].rfind('.') {
        Some(offset) => &name[stem_start + offset..],
        None => "",
    }
}
