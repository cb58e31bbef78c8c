//! Step chain executor
//!
//! Runs a [`DeployRun`] one step at a time against a single server. Every
//! step can be invoked on its own, so a failed run can be resumed from the
//! failing index with the file map it had built so far.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveBuilder, BundleKind};
use crate::beacon::client::Beacon;
use crate::beacon::command::Script;
use crate::beacon::response::{decode_field, error_message, status_ok, ResponseBody};
use crate::deploy::run::DeployRun;
use crate::errors::DeployError;
use crate::models::server::Server;
use crate::models::step::StepAction;

/// Result of one successful step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Command output, when the step produced any
    pub output: Option<String>,

    /// Remote path of an uploaded file
    pub remote_path: Option<String>,

    /// The step's work was already done by an earlier attempt
    pub skipped: bool,
}

/// A finished step, for progress reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub label: String,
    pub outcome: StepOutcome,
}

/// A step failed; the run halts at `index`
#[derive(Debug, Error)]
#[error("Step {index} ({label}) failed: {error}")]
pub struct StepFailure {
    pub index: usize,
    pub label: String,
    #[source]
    pub error: DeployError,
}

/// Drives deployment steps for one server
pub struct StepExecutor<'a, B: Beacon + ?Sized> {
    beacon: &'a B,
    builder: &'a ArchiveBuilder,
    server: &'a mut Server,
}

impl<'a, B: Beacon + ?Sized> StepExecutor<'a, B> {
    pub fn new(beacon: &'a B, builder: &'a ArchiveBuilder, server: &'a mut Server) -> Self {
        Self {
            beacon,
            builder,
            server,
        }
    }

    pub fn server(&self) -> &Server {
        &*self.server
    }

    /// Run the step at `index`. On success the cursor moves past it.
    pub async fn execute_step(&mut self, run: &mut DeployRun, index: usize) -> Result<StepOutcome, DeployError> {
        let step = run.steps.get(index).cloned().ok_or_else(|| {
            DeployError::ValidationError(format!(
                "No step at index {} (run has {} steps)",
                index,
                run.steps.len()
            ))
        })?;

        info!("[{}/{}] {}", index + 1, run.steps.len(), step.label);

        let outcome = match step.action {
            StepAction::BuildArchive { bundle, output } => self.build_archive(run, bundle, output).await?,
            StepAction::TransmitFile { file } => self.transmit_file(run, &file).await?,
            StepAction::TransmitScript { script, vars } => self.transmit_script(script, vars).await?,
            StepAction::TransmitArtisanCommand { command } => self.transmit_artisan(&command).await?,
            StepAction::ExtractFiles { files } => self.extract_files(run, &files).await?,
            StepAction::Finalize { deploy_core, version } => self.finalize(run, deploy_core, version).await?,
        };

        run.cursor = index + 1;
        Ok(outcome)
    }

    /// Run the step under the cursor; `None` once the run is complete
    pub async fn execute_next(&mut self, run: &mut DeployRun) -> Result<Option<StepReport>, StepFailure> {
        let index = run.cursor;
        let Some(label) = run.current_step().map(|step| step.label.clone()) else {
            return Ok(None);
        };

        match self.execute_step(run, index).await {
            Ok(outcome) => Ok(Some(StepReport { index, label, outcome })),
            Err(error) => {
                error!("Deployment halted at step {} ({}): {}", index, label, error);
                Err(StepFailure { index, label, error })
            }
        }
    }

    /// Run every remaining step in order, stopping at the first failure
    pub async fn run_to_completion(&mut self, run: &mut DeployRun) -> Result<Vec<StepReport>, StepFailure> {
        let mut reports = Vec::new();
        while let Some(report) = self.execute_next(run).await? {
            reports.push(report);
        }
        Ok(reports)
    }

    async fn build_archive(
        &self,
        run: &DeployRun,
        bundle: BundleKind,
        output: PathBuf,
    ) -> Result<StepOutcome, DeployError> {
        if run.remote_path(&output).is_some() {
            info!("Archive {} was already uploaded, not rebuilding", output.display());
            return Ok(StepOutcome {
                skipped: true,
                ..StepOutcome::default()
            });
        }

        let spec = bundle.spec(self.builder.settings())?;
        let builder = self.builder.clone();
        tokio::task::spawn_blocking(move || builder.build(&spec, &output))
            .await
            .map_err(|e| DeployError::FilesystemError(format!("Archive build task failed: {}", e)))??;

        Ok(StepOutcome::default())
    }

    async fn transmit_file(&self, run: &mut DeployRun, file: &Path) -> Result<StepOutcome, DeployError> {
        if let Some(remote) = run.remote_path(file) {
            info!("{} already uploaded to {}", file.display(), remote);
            return Ok(StepOutcome {
                remote_path: Some(remote.to_string()),
                skipped: true,
                ..StepOutcome::default()
            });
        }

        let body = self.beacon.transmit_file(file).await?;
        let remote = decode_field(&body, "path")?.ok_or_else(|| {
            DeployError::ProtocolError("Beacon did not return the uploaded file path".to_string())
        })?;

        run.record_upload(file, remote.clone());
        Ok(StepOutcome {
            remote_path: Some(remote),
            ..StepOutcome::default()
        })
    }

    async fn transmit_script(&self, script: Script, vars: Value) -> Result<StepOutcome, DeployError> {
        let vars = if vars.is_null() { json!({}) } else { vars };
        let body = self.beacon.transmit_script(script, vars).await?;
        expect_ok(&body, "Script failed")?;

        Ok(StepOutcome {
            output: decode_field(&body, "output")?,
            ..StepOutcome::default()
        })
    }

    async fn transmit_artisan(&self, command: &str) -> Result<StepOutcome, DeployError> {
        let body = self.beacon.transmit_artisan(command).await?;
        let output = decode_field(&body, "output")?;

        if exit_code(&body) != 0 {
            return Err(DeployError::ApplicationError(
                output.unwrap_or_else(|| "Missing output".to_string()),
            ));
        }

        Ok(StepOutcome {
            output: Some(output.unwrap_or_else(|| "Missing output".to_string())),
            ..StepOutcome::default()
        })
    }

    async fn extract_files(&self, run: &DeployRun, files: &[PathBuf]) -> Result<StepOutcome, DeployError> {
        let mut mapping = BTreeMap::new();
        for file in files {
            let remote = run.remote_path(file).ok_or_else(|| {
                DeployError::ValidationError(format!(
                    "Missing file map. Nothing to deploy? ({} was not uploaded)",
                    file.display()
                ))
            })?;
            mapping.insert(file.display().to_string(), remote.to_string());
        }

        if mapping.is_empty() {
            return Err(DeployError::ValidationError("Missing file map. Nothing to deploy?".to_string()));
        }

        let body = self
            .beacon
            .transmit_script(Script::ExtractArchive, json!({ "files": mapping }))
            .await?;
        expect_ok(&body, "Unzip failed")?;

        Ok(StepOutcome::default())
    }

    async fn finalize(
        &mut self,
        run: &DeployRun,
        deploy_core: bool,
        version: Option<String>,
    ) -> Result<StepOutcome, DeployError> {
        self.cleanup_files(&run.local_files());

        self.server.test_beacon(self.beacon).await;
        self.server.touch_last_deploy();

        let core_bundled = run.steps.iter().any(|step| {
            matches!(&step.action, StepAction::BuildArchive { bundle, .. } if bundle.is_core())
        });
        if deploy_core || core_bundled {
            let version = version.unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
            self.server.touch_last_version(version);
        }

        info!(
            "Deployment to {} complete, server is {}",
            self.server.server_name,
            self.server.status_label()
        );
        Ok(StepOutcome::default())
    }

    /// Delete run files that live in the temp directory. Failures only warn.
    fn cleanup_files(&self, files: &[PathBuf]) {
        let temp_dir = &self.builder.settings().temp_dir;
        for file in files {
            if !file.starts_with(temp_dir) {
                debug!("Leaving {} in place, not a temp file", file.display());
                continue;
            }

            match std::fs::remove_file(file) {
                Ok(()) => debug!("Removed {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Unable to remove {}: {}", file.display(), e),
            }
        }
    }
}

fn expect_ok(body: &ResponseBody, fallback: &str) -> Result<(), DeployError> {
    if status_ok(body) {
        Ok(())
    } else {
        Err(DeployError::ApplicationError(error_message(body, fallback)))
    }
}

/// `errCode` as reported by the beacon; missing counts as success
fn exit_code(body: &ResponseBody) -> i64 {
    match body.get("errCode") {
        Some(Value::Number(n)) => n.as_f64().map(|f| f as i64).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}
