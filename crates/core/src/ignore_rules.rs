//! Root-level ignore-file handling.
//!
//! Only the `.gitignore` sitting directly in the indexed root is consulted.
//! Patterns follow gitignore semantics and are matched relative to the root.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const IGNORE_FILE_NAME: &str = ".gitignore";

#[derive(Debug, Clone)]
pub struct IgnoreRuleSet {
    root: PathBuf,
    matcher: Option<Gitignore>,
    rejected: usize,
}

/// Anchors a relative root at the current directory. The gitignore matcher
/// strips its root from candidate paths byte-wise and needs it absolute.
pub(crate) fn absolute_root(root: &Path) -> PathBuf {
    if root.is_absolute() {
        return root.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(root),
        Err(_) => root.to_path_buf(),
    }
}

impl IgnoreRuleSet {
    /// A rule set that excludes nothing.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: absolute_root(&root.into()),
            matcher: None,
            rejected: 0,
        }
    }

    /// Reads `<root>/.gitignore`. A missing or unreadable file yields an
    /// empty rule set.
    pub fn load(root: &Path) -> Self {
        let path = root.join(IGNORE_FILE_NAME);
        if !path.is_file() {
            debug!(root = %root.display(), "no ignore file");
            return Self::empty(root);
        }

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_lines(root, contents.lines()),
            Err(error) => {
                warn!(path = %path.display(), %error, "ignore file unreadable, nothing excluded");
                Self::empty(root)
            }
        }
    }

    /// Compiles patterns line by line; a line that fails to compile is
    /// skipped and the rest still apply.
    pub fn from_lines<'a, I>(root: &Path, lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let root = absolute_root(root);
        let origin = root.join(IGNORE_FILE_NAME);
        let mut builder = GitignoreBuilder::new(&root);
        let mut rejected = 0;

        for (index, line) in lines.into_iter().enumerate() {
            if let Err(error) = builder.add_line(Some(origin.clone()), line) {
                warn!(
                    line = index + 1,
                    pattern = line,
                    %error,
                    "skipping malformed ignore pattern"
                );
                rejected += 1;
            }
        }

        let matcher = match builder.build() {
            Ok(matcher) if matcher.is_empty() => None,
            Ok(matcher) => Some(matcher),
            Err(error) => {
                warn!(
                    root = %root.display(),
                    %error,
                    "ignore rules failed to compile, nothing excluded"
                );
                None
            }
        };

        Self {
            root,
            matcher,
            rejected,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_none()
    }

    pub fn len(&self) -> usize {
        self.matcher.as_ref().map_or(0, Gitignore::num_ignores) as usize
    }

    /// Lines dropped because they did not compile.
    pub fn rejected_lines(&self) -> usize {
        self.rejected
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `path` should be excluded. `path` may be under the root
    /// (absolute or relative to the current directory) or already relative
    /// to the root. A path is also excluded when one of its parent
    /// directories is.
    pub fn matches(&self, path: &Path, is_dir: bool) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };

        let anchored = absolute_root(path);
        let candidate = if anchored.starts_with(&self.root) {
            anchored.as_path()
        } else {
            path
        };
        let relative = candidate.strip_prefix(&self.root).unwrap_or(candidate);
        if relative.as_os_str().is_empty() || relative.has_root() {
            return false;
        }

        matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_ignore_file_excludes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rules = IgnoreRuleSet::load(dir.path());

        assert!(rules.is_empty());
        assert!(!rules.matches(&dir.path().join("debug.log"), false));
        Ok(())
    }

    #[test]
    fn loads_patterns_from_root_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join(IGNORE_FILE_NAME), "# logs\n\n*.log\n")?;

        let rules = IgnoreRuleSet::load(dir.path());
        assert_eq!(rules.len(), 1);
        assert!(rules.matches(&dir.path().join("debug.log"), false));
        assert!(rules.matches(&dir.path().join("nested/deeper/trace.log"), false));
        assert!(!rules.matches(&dir.path().join("notes.txt"), false));
        Ok(())
    }

    #[test]
    fn negated_patterns_reinclude() {
        let rules = IgnoreRuleSet::from_lines(Path::new("/repo"), ["*.log", "!keep.log"]);

        assert!(rules.matches(Path::new("/repo/drop.log"), false));
        assert!(!rules.matches(Path::new("/repo/keep.log"), false));
    }

    #[test]
    fn directory_patterns_cover_their_contents() {
        let rules = IgnoreRuleSet::from_lines(Path::new("/repo"), ["build/"]);

        assert!(rules.matches(Path::new("/repo/build"), true));
        assert!(rules.matches(Path::new("/repo/build/out.txt"), false));
        assert!(rules.matches(Path::new("build/nested/out.txt"), false));
        assert!(!rules.matches(Path::new("/repo/build"), false));
    }

    #[test]
    fn anchored_patterns_are_relative_to_root() {
        let rules = IgnoreRuleSet::from_lines(Path::new("/repo"), ["/secret.txt"]);

        assert!(rules.matches(Path::new("/repo/secret.txt"), false));
        assert!(!rules.matches(Path::new("/repo/docs/secret.txt"), false));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let rules =
            IgnoreRuleSet::from_lines(Path::new("/repo"), ["{a,b", "*.tmp", "[z-a]", "\\"]);

        assert_eq!(rules.rejected_lines(), 3);
        assert_eq!(rules.len(), 1);
        assert!(rules.matches(Path::new("/repo/a.tmp"), false));
        assert!(!rules.matches(Path::new("/repo/a.txt"), false));
    }

    #[test]
    fn relative_root_is_not_stripped_twice() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::Builder::new().prefix("data").tempdir_in(".")?;
        let name = dir
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let root = PathBuf::from(&name);
        let nested = format!("{name}base");
        fs::create_dir(root.join(&nested))?;
        fs::write(root.join(IGNORE_FILE_NAME), format!("/{nested}/notes.txt\n"))?;

        let rules = IgnoreRuleSet::load(&root);
        assert!(rules.root().is_absolute());
        assert!(rules.matches(&rules.root().join(&nested).join("notes.txt"), false));
        assert!(rules.matches(&root.join(&nested).join("notes.txt"), false));
        assert!(!rules.matches(&rules.root().join("notes.txt"), false));
        Ok(())
    }

    #[test]
    fn root_itself_is_never_matched() {
        let rules = IgnoreRuleSet::from_lines(Path::new("/repo"), ["*"]);
        assert!(!rules.matches(Path::new("/repo"), true));
    }
}
