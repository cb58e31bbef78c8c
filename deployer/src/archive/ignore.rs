//! Resolution of gitignore-style rule files into concrete paths
//!
//! Each non-blank, non-comment line is a glob evaluated against the
//! filesystem relative to the rule file's directory. A `!pattern` line adds
//! every top-level entry of that directory except the ones matching
//! `pattern`, and takes those matches back out of the set built so far.
//! As with shell globs, wildcards do not match names starting with a dot
//! unless the pattern segment itself starts with one.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::errors::DeployError;

/// Conventional rule file name
pub const IGNORE_FILE_NAME: &str = ".gitignore";

/// Resolves ignore rule files into absolute paths to exclude
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    file_name: String,
}

impl Default for IgnoreMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl IgnoreMatcher {
    /// Matcher for `.gitignore` files
    pub fn new() -> Self {
        Self::with_file_name(IGNORE_FILE_NAME)
    }

    /// Matcher for rule files with a different name
    pub fn with_file_name(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Resolve every rule file found below `root` and union the results
    pub fn resolve_recursive(&self, root: &Path) -> Result<BTreeSet<PathBuf>, DeployError> {
        let mut exclude = BTreeSet::new();
        for file in self.find_ignore_files(root)? {
            exclude.extend(self.resolve(&file)?);
        }
        Ok(exclude)
    }

    /// Locate rule files below `root`, parents before children
    pub fn find_ignore_files(&self, root: &Path) -> Result<Vec<PathBuf>, DeployError> {
        let mut files = Vec::new();
        let mut stack = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let candidate = dir.join(&self.file_name);
            if candidate.is_file() {
                files.push(candidate);
            }

            let mut children = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                // Symlinked directories are not followed
                if entry.file_type()?.is_dir() {
                    children.push(entry.path());
                }
            }
            children.sort();
            stack.extend(children.into_iter().rev());
        }

        Ok(files)
    }

    /// Resolve a single rule file
    pub fn resolve(&self, ignore_file: &Path) -> Result<BTreeSet<PathBuf>, DeployError> {
        let contents = std::fs::read_to_string(ignore_file).map_err(|e| {
            DeployError::FilesystemError(format!(
                "Unable to read ignore file {}: {}",
                ignore_file.display(),
                e
            ))
        })?;
        let dir = ignore_file.parent().unwrap_or_else(|| Path::new("."));

        let mut matches: BTreeSet<PathBuf> = BTreeSet::new();

        for line in contents.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(pattern) = line.strip_prefix('!') {
                let kept = glob(dir, pattern)?;
                for path in glob(dir, "*")? {
                    if !kept.contains(&path) {
                        matches.insert(path);
                    }
                }
                for path in &kept {
                    matches.remove(path);
                }
            } else {
                matches.extend(glob(dir, line)?);
            }
        }

        let resolved: BTreeSet<PathBuf> = matches
            .into_iter()
            .filter_map(|path| std::fs::canonicalize(path).ok())
            .collect();

        debug!(
            "Resolved {} excluded paths from {}",
            resolved.len(),
            ignore_file.display()
        );

        Ok(resolved)
    }
}

/// Filesystem glob relative to `dir`
fn glob(dir: &Path, pattern: &str) -> Result<BTreeSet<PathBuf>, DeployError> {
    let pattern = pattern.trim().trim_start_matches('/');
    let dirs_only = pattern.ends_with('/');
    let pattern = pattern.trim_end_matches('/');

    let mut found = BTreeSet::new();
    if pattern.is_empty() {
        return Ok(found);
    }

    let matcher = compile(pattern)?;
    let segments: Vec<&str> = pattern.split('/').collect();
    let recursive = segments.iter().any(|segment| segment.contains("**"));
    let max_depth = if recursive { usize::MAX } else { segments.len() };
    let dotted_pattern = segments.iter().any(|segment| segment.starts_with('.'));

    for entry in WalkDir::new(dir).min_depth(1).max_depth(max_depth) {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };

        if dirs_only && !entry.file_type().is_dir() {
            continue;
        }

        let hidden_allowed = relative.components().enumerate().all(|(i, component)| {
            let Component::Normal(name) = component else {
                return true;
            };
            if !name.to_string_lossy().starts_with('.') {
                return true;
            }
            if recursive {
                dotted_pattern
            } else {
                segments.get(i).is_some_and(|segment| segment.starts_with('.'))
            }
        });

        if hidden_allowed && matcher.is_match(relative) {
            trace!("{} matches {}", relative.display(), pattern);
            found.insert(entry.path().to_path_buf());
        }
    }

    Ok(found)
}

fn compile(pattern: &str) -> Result<GlobMatcher, DeployError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| DeployError::ValidationError(format!("Invalid ignore pattern '{}': {}", pattern, e)))
}
