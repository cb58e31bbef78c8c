//! Deploy run state: ordered steps, a cursor and the uploaded file map

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::step::{DeployStep, StepAction};

/// One deployment against one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRun {
    /// Target server ID
    pub server_id: String,

    /// Steps in execution order
    pub steps: Vec<DeployStep>,

    /// Index of the next step to run
    #[serde(default)]
    pub cursor: usize,

    /// Local file path to remote path, filled by uploads
    #[serde(default)]
    pub file_map: BTreeMap<PathBuf, String>,
}

impl DeployRun {
    /// Start a run at its first step
    pub fn new(server_id: impl Into<String>, steps: Vec<DeployStep>) -> Result<Self, DeployError> {
        let run = Self {
            server_id: server_id.into(),
            steps,
            cursor: 0,
            file_map: BTreeMap::new(),
        };
        run.validate()?;
        Ok(run)
    }

    /// Continue a run from `from`, carrying uploads made by an earlier attempt
    pub fn resume(
        server_id: impl Into<String>,
        steps: Vec<DeployStep>,
        from: usize,
        file_map: BTreeMap<PathBuf, String>,
    ) -> Result<Self, DeployError> {
        let mut run = Self::new(server_id, steps)?;
        if from > run.steps.len() {
            return Err(DeployError::ValidationError(format!(
                "Cannot resume at step {}: run has {} steps",
                from,
                run.steps.len()
            )));
        }
        run.cursor = from;
        run.file_map = file_map;
        Ok(run)
    }

    /// A run needs at least one step, and Finalize may only be the last
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.steps.is_empty() {
            return Err(DeployError::ValidationError("There are no deployment steps".to_string()));
        }

        let last = self.steps.len() - 1;
        for (index, step) in self.steps.iter().enumerate() {
            if matches!(step.action, StepAction::Finalize { .. }) && index != last {
                return Err(DeployError::ValidationError(format!(
                    "Finalize must be the last step, found at {} of {}",
                    index,
                    self.steps.len()
                )));
            }
        }

        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    pub fn current_step(&self) -> Option<&DeployStep> {
        self.steps.get(self.cursor)
    }

    /// Remember where the beacon stored an uploaded file
    pub fn record_upload(&mut self, local: impl Into<PathBuf>, remote: impl Into<String>) {
        let local = local.into();
        let remote = remote.into();
        debug!("Mapped {} -> {}", local.display(), remote);
        self.file_map.insert(local, remote);
    }

    pub fn remote_path(&self, local: &Path) -> Option<&str> {
        self.file_map.get(local).map(String::as_str)
    }

    /// Every local file the run builds or uploads
    pub fn local_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .steps
            .iter()
            .filter_map(|step| step.local_file().map(Path::to_path_buf))
            .chain(self.file_map.keys().cloned())
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// Load a saved run
    pub async fn load(file: &File) -> Result<Option<Self>, DeployError> {
        if !file.exists().await {
            return Ok(None);
        }
        let run: Self = file.read_json().await?;
        run.validate()?;
        Ok(Some(run))
    }

    /// Save the run so a failed deployment can be resumed
    pub async fn save(&self, file: &File) -> Result<(), DeployError> {
        file.write_json(self).await
    }
}
