//! Declarative bundle descriptions

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::errors::DeployError;

/// How exclusions are found for a source directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Exclusions {
    /// Include everything
    #[default]
    None,

    /// Apply one caller-supplied rule file
    IgnoreFile(PathBuf),

    /// Discover and apply every `.gitignore` below the directory
    Discover,
}

/// An absolute directory copied recursively into the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDir {
    pub path: PathBuf,
    pub exclusions: Exclusions,
}

/// Everything that goes into one archive.
///
/// Staged content (`dirs`, `files`) is written to a scratch directory first;
/// external sources (`files_src`, `dirs_src`) are streamed into the archive
/// straight from where they live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSpec {
    /// Empty directories to create, relative to the archive root
    pub dirs: Vec<String>,

    /// Generated files: relative path to contents
    pub files: BTreeMap<String, Vec<u8>>,

    /// Absolute files added at the archive root under their own name
    pub files_src: Vec<PathBuf>,

    /// Archive folder to absolute source directory
    pub dirs_src: BTreeMap<String, SourceDir>,
}

impl BundleSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(mut self, name: impl Into<String>) -> Self {
        self.dirs.push(name.into());
        self
    }

    pub fn file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.into(), contents.into());
        self
    }

    pub fn file_src(mut self, path: impl Into<PathBuf>) -> Self {
        self.files_src.push(path.into());
        self
    }

    pub fn dir_src(self, folder: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.dir_src_with(folder, path, Exclusions::None)
    }

    pub fn dir_src_with(
        mut self,
        folder: impl Into<String>,
        path: impl Into<PathBuf>,
        exclusions: Exclusions,
    ) -> Self {
        self.dirs_src.insert(
            folder.into(),
            SourceDir {
                path: path.into(),
                exclusions,
            },
        );
        self
    }

    /// Reject archive-relative names that are absolute or climb out of the
    /// archive root
    pub fn validate(&self) -> Result<(), DeployError> {
        let relative_names = self
            .dirs
            .iter()
            .chain(self.files.keys())
            .chain(self.dirs_src.keys());

        for name in relative_names {
            check_relative(name)?;
        }

        for path in &self.files_src {
            if path.file_name().is_none() {
                return Err(DeployError::ValidationError(format!(
                    "Source file has no file name: {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

fn check_relative(name: &str) -> Result<(), DeployError> {
    let path = Path::new(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));

    if valid {
        Ok(())
    } else {
        Err(DeployError::ValidationError(format!(
            "Archive path must be relative and stay inside the archive: '{}'",
            name
        )))
    }
}
