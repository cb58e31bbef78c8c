//! Deployment step descriptors

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::archive::{ArchiveBuilder, BundleKind};
use crate::beacon::command::Script;

/// One labelled unit of a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployStep {
    /// Progress text shown while the step runs
    pub label: String,

    #[serde(flatten)]
    pub action: StepAction,
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepAction {
    /// Build a bundle into a local archive at `output`
    BuildArchive { bundle: BundleKind, output: PathBuf },

    /// Upload a local file and remember where the beacon stored it
    TransmitFile { file: PathBuf },

    /// Evaluate a bundled script
    TransmitScript {
        script: Script,
        #[serde(default)]
        vars: Value,
    },

    /// Run an artisan command remotely
    TransmitArtisanCommand { command: String },

    /// Extract previously uploaded archives on the beacon
    ExtractFiles { files: Vec<PathBuf> },

    /// Clean up, re-probe the server and record the deployment
    Finalize {
        #[serde(default)]
        deploy_core: bool,
        #[serde(default)]
        version: Option<String>,
    },
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::BuildArchive { .. } => "buildArchive",
            StepAction::TransmitFile { .. } => "transmitFile",
            StepAction::TransmitScript { .. } => "transmitScript",
            StepAction::TransmitArtisanCommand { .. } => "transmitArtisanCommand",
            StepAction::ExtractFiles { .. } => "extractFiles",
            StepAction::Finalize { .. } => "finalize",
        }
    }
}

impl DeployStep {
    pub fn new(label: impl Into<String>, action: StepAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }

    /// Build step writing to a fresh, uniquely named file in the temp directory
    pub fn build_archive(label: impl Into<String>, bundle: BundleKind, builder: &ArchiveBuilder) -> Self {
        let output = builder.temp_output_path(bundle.name());
        Self::new(label, StepAction::BuildArchive { bundle, output })
    }

    pub fn transmit_file(label: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self::new(label, StepAction::TransmitFile { file: file.into() })
    }

    pub fn transmit_script(label: impl Into<String>, script: Script, vars: Value) -> Self {
        Self::new(label, StepAction::TransmitScript { script, vars })
    }

    pub fn transmit_artisan(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(
            label,
            StepAction::TransmitArtisanCommand {
                command: command.into(),
            },
        )
    }

    pub fn extract_files(label: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self::new(label, StepAction::ExtractFiles { files })
    }

    pub fn finalize(label: impl Into<String>, deploy_core: bool, version: Option<String>) -> Self {
        Self::new(label, StepAction::Finalize { deploy_core, version })
    }

    /// Local file this step produces or consumes, if any
    pub fn local_file(&self) -> Option<&Path> {
        match &self.action {
            StepAction::BuildArchive { output, .. } => Some(output),
            StepAction::TransmitFile { file } => Some(file),
            _ => None,
        }
    }
}
