//! Builds ZIP archives for deployment

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::archive::ignore::IgnoreMatcher;
use crate::archive::spec::{BundleSpec, Exclusions, SourceDir};
use crate::errors::DeployError;
use crate::filesys::dir::StagingDir;

/// Where the builder finds its inputs and scratch space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSettings {
    /// Beacon template directory
    pub templates_dir: PathBuf,

    /// Root of the project being deployed
    pub project_root: PathBuf,

    /// Scratch space for staging directories and built archives
    pub temp_dir: PathBuf,
}

/// Realizes [`BundleSpec`]s as ZIP files
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    settings: ArchiveSettings,
    matcher: IgnoreMatcher,
}

impl ArchiveBuilder {
    pub fn new(settings: ArchiveSettings) -> Self {
        Self {
            settings,
            matcher: IgnoreMatcher::new(),
        }
    }

    pub fn settings(&self) -> &ArchiveSettings {
        &self.settings
    }

    /// A fresh output path for an archive inside the temp directory
    pub fn temp_output_path(&self, label: &str) -> PathBuf {
        self.settings
            .temp_dir
            .join(format!("{}-{}.zip", label, crate::utils::generate_uuid()))
    }

    /// Build `spec` into a ZIP file at `output`.
    ///
    /// Staged content is written to a private scratch directory that is
    /// removed on every exit path. A partially written output is removed
    /// when the build fails.
    pub fn build(&self, spec: &BundleSpec, output: &Path) -> Result<(), DeployError> {
        spec.validate()?;

        let staging = StagingDir::create(&self.settings.temp_dir)?;
        info!("Building archive {}", output.display());

        let result = self.build_in(&staging, spec, output);
        if let Err(e) = &result {
            warn!("Archive build for {} failed: {}", output.display(), e);
            if output.exists() {
                if let Err(e) = fs::remove_file(output) {
                    warn!("Unable to remove partial archive {}: {}", output.display(), e);
                }
            }
        }

        result
    }

    fn build_in(&self, staging: &StagingDir, spec: &BundleSpec, output: &Path) -> Result<(), DeployError> {
        // Build directories
        for dir in &spec.dirs {
            fs::create_dir_all(staging.path().join(dir))?;
        }

        // Build files
        for (name, contents) in &spec.files {
            let path = staging.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents)?;
        }

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = ArchiveWriter::create(output)?;

        writer.add_tree(staging.path(), "", &BTreeSet::new())?;

        for file in &spec.files_src {
            let name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            writer.add_file(&name, file)?;
        }

        for (folder, source) in &spec.dirs_src {
            let exclude = self.exclusions(source)?;
            writer.add_dir(folder)?;
            writer.add_tree(&source.path, folder, &exclude)?;
        }

        writer.finish()?;
        info!("Archive {} ready", output.display());
        Ok(())
    }

    fn exclusions(&self, source: &SourceDir) -> Result<BTreeSet<PathBuf>, DeployError> {
        match &source.exclusions {
            Exclusions::None => Ok(BTreeSet::new()),
            Exclusions::IgnoreFile(file) => self.matcher.resolve(file),
            Exclusions::Discover => self.matcher.resolve_recursive(&source.path),
        }
    }
}

/// ZIP writer that tolerates the same directory being added twice
struct ArchiveWriter {
    zip: ZipWriter<fs::File>,
    written: HashSet<String>,
}

impl ArchiveWriter {
    fn create(output: &Path) -> Result<Self, DeployError> {
        let file = fs::File::create(output).map_err(|e| {
            DeployError::FilesystemError(format!("Unable to create {}: {}", output.display(), e))
        })?;

        Ok(Self {
            zip: ZipWriter::new(file),
            written: HashSet::new(),
        })
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Add a directory entry and any missing ancestors
    fn add_dir(&mut self, name: &str) -> Result<(), DeployError> {
        let mut prefix = String::new();
        for segment in name.split('/').filter(|segment| !segment.is_empty() && *segment != ".") {
            prefix.push_str(segment);
            prefix.push('/');
            if self.written.insert(prefix.clone()) {
                self.zip.add_directory(prefix.clone(), Self::options())?;
            }
        }
        Ok(())
    }

    fn add_file(&mut self, name: &str, source: &Path) -> Result<(), DeployError> {
        if !self.written.insert(name.to_string()) {
            warn!("Skipping duplicate archive entry {}", name);
            return Ok(());
        }

        let mut input = fs::File::open(source).map_err(|e| {
            DeployError::FilesystemError(format!("Unable to read {}: {}", source.display(), e))
        })?;
        let metadata = input.metadata()?;

        let mut options = Self::options().large_file(metadata.len() >= u32::MAX as u64);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode());
        }

        self.zip.start_file(name.to_string(), options)?;
        io::copy(&mut input, &mut self.zip)?;
        Ok(())
    }

    /// Add the contents of `root` under `prefix`, pruning excluded paths
    fn add_tree(&mut self, root: &Path, prefix: &str, exclude: &BTreeSet<PathBuf>) -> Result<(), DeployError> {
        if !root.is_dir() {
            return Err(DeployError::FilesystemError(format!(
                "Source directory does not exist: {}",
                root.display()
            )));
        }

        // Exclusions are canonical paths, so walk from the canonical root
        let root = fs::canonicalize(root)?;
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let excluded = exclude.contains(entry.path());
                if excluded {
                    debug!("Excluding {}", entry.path().display());
                }
                !excluded
            });

        for entry in walker {
            let entry = entry?;
            let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
            let name = entry_name(prefix, relative);

            if entry.file_type().is_dir() {
                self.add_dir(&name)?;
            } else if entry.path().is_file() {
                self.add_file(&name, entry.path())?;
            } else {
                debug!("Skipping special file {}", entry.path().display());
            }
        }

        Ok(())
    }

    fn finish(self) -> Result<(), DeployError> {
        self.zip.finish()?;
        Ok(())
    }
}

/// Archive entry name: `prefix/relative` with forward slashes
fn entry_name(prefix: &str, relative: &Path) -> String {
    let mut parts: Vec<String> = prefix
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    for component in relative.components() {
        if let Component::Normal(segment) = component {
            parts.push(segment.to_string_lossy().into_owned());
        }
    }

    parts.join("/")
}
