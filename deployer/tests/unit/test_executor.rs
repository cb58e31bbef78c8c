//! Step chain executor tests against an in-memory beacon

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Map, Value};

use beacon_deployer::archive::{ArchiveBuilder, ArchiveSettings, BundleKind};
use beacon_deployer::beacon::client::Beacon;
use beacon_deployer::beacon::command::{Command, Script};
use beacon_deployer::beacon::response::ResponseBody;
use beacon_deployer::deploy::{DeployRun, ServerStatus, StepExecutor};
use beacon_deployer::errors::{DeployError, ErrorKind};
use beacon_deployer::models::server::Server;
use beacon_deployer::models::step::{DeployStep, StepAction};

/// Beacon double that records every call
struct RecordingBeacon {
    uploads: Mutex<Vec<(PathBuf, Vec<String>)>>,
    scripts: Mutex<Vec<(Script, Value)>>,
    artisan: Mutex<Vec<String>>,
    health_reply: Mutex<Value>,
    script_reply: Mutex<Value>,
    artisan_reply: Mutex<Value>,
}

impl RecordingBeacon {
    fn new() -> Self {
        Self {
            uploads: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            artisan: Mutex::new(Vec::new()),
            health_reply: Mutex::new(json!({"appInstalled": true, "envFound": true, "beaconVersion": "2.0"})),
            script_reply: Mutex::new(json!({"status": "ok"})),
            artisan_reply: Mutex::new(json!({"errCode": 0, "output": STANDARD.encode("Nothing to migrate.")})),
        }
    }

    fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

fn object(value: &Value) -> ResponseBody {
    value.as_object().cloned().unwrap_or_else(Map::new)
}

fn zip_entries(path: &Path) -> Vec<String> {
    let Ok(file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    let Ok(mut archive) = zip::ZipArchive::new(file) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut sink = Vec::new();
        entry.read_to_end(&mut sink).unwrap();
        names.push(entry.name().to_string());
    }
    names
}

#[async_trait]
impl Beacon for RecordingBeacon {
    async fn transmit(&self, command: Command) -> Result<ResponseBody, DeployError> {
        match command {
            Command::HealthCheck => Ok(object(&self.health_reply.lock().unwrap())),
            Command::ArtisanCommand { command } => {
                self.artisan.lock().unwrap().push(command);
                Ok(object(&self.artisan_reply.lock().unwrap()))
            }
            _ => Ok(object(&json!({"status": "ok"}))),
        }
    }

    async fn transmit_file(&self, path: &Path) -> Result<ResponseBody, DeployError> {
        let entries = zip_entries(path);
        self.uploads.lock().unwrap().push((path.to_path_buf(), entries));

        let name = path.file_name().unwrap().to_string_lossy();
        let remote = format!("/var/beacon/uploads/{}", name);
        Ok(object(&json!({ "path": STANDARD.encode(remote) })))
    }

    async fn transmit_script(&self, script: Script, vars: Value) -> Result<ResponseBody, DeployError> {
        self.scripts.lock().unwrap().push((script, vars));
        Ok(object(&self.script_reply.lock().unwrap()))
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    builder: ArchiveBuilder,
    server: Server,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let builder = ArchiveBuilder::new(ArchiveSettings {
            templates_dir: root.join("templates"),
            project_root: root.join("project"),
            temp_dir: root.join("tmp"),
        });

        Self {
            _dir: dir,
            root,
            builder,
            server: Server::new("web", "https://example.com/beacon.php"),
        }
    }

    fn temp_file(&self, name: &str) -> PathBuf {
        self.builder.settings().temp_dir.join(name)
    }
}

fn env_bundle() -> BundleKind {
    BundleKind::EnvFile {
        contents: "APP_ENV=production\n".to_string(),
    }
}

#[tokio::test]
async fn test_full_deployment() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();

    let archive = fixture.temp_file("env.zip");
    let outside = fixture.root.join("project/keep.zip");
    std::fs::create_dir_all(outside.parent().unwrap()).unwrap();
    std::fs::write(&outside, b"not in temp").unwrap();

    let steps = vec![
        DeployStep::new(
            "Building environment file",
            StepAction::BuildArchive {
                bundle: env_bundle(),
                output: archive.clone(),
            },
        ),
        DeployStep::transmit_file("Uploading environment file", &archive),
        DeployStep::transmit_file("Uploading extra archive", &outside),
        DeployStep::extract_files("Extracting", vec![archive.clone()]),
        DeployStep::transmit_script("Clearing cache", Script::ClearCache, Value::Null),
        DeployStep::transmit_artisan("Migrating database", "october:migrate"),
        DeployStep::finalize("Finishing up", true, Some("3.6.1".to_string())),
    ];
    let mut run = DeployRun::new(fixture.server.id.clone(), steps).unwrap();

    let reports = {
        let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
        executor.run_to_completion(&mut run).await.unwrap()
    };

    assert_eq!(reports.len(), 7);
    assert!(run.is_complete());
    assert!(reports.iter().all(|report| !report.outcome.skipped));
    assert_eq!(
        reports[1].outcome.remote_path.as_deref(),
        Some("/var/beacon/uploads/env.zip")
    );
    assert_eq!(reports[5].outcome.output.as_deref(), Some("Nothing to migrate."));

    let uploads = beacon.uploads.lock().unwrap().clone();
    assert_eq!(uploads[0].0, archive);
    assert_eq!(uploads[0].1, vec![".env".to_string()]);

    let scripts = beacon.scripts.lock().unwrap().clone();
    assert_eq!(scripts[0].0, Script::ExtractArchive);
    let mut expected_files = BTreeMap::new();
    expected_files.insert(archive.display().to_string(), "/var/beacon/uploads/env.zip".to_string());
    assert_eq!(scripts[0].1, json!({ "files": expected_files }));
    assert_eq!(scripts[1], (Script::ClearCache, json!({})));
    assert_eq!(beacon.artisan.lock().unwrap().clone(), vec!["october:migrate".to_string()]);

    // Finalize removes temp files only
    assert!(!archive.exists());
    assert!(outside.exists());

    assert_eq!(fixture.server.status_code, ServerStatus::Active);
    assert!(fixture.server.last_deploy_at.is_some());
    assert_eq!(fixture.server.last_version.as_deref(), Some("3.6.1"));
}

#[tokio::test]
async fn test_resume_skips_completed_work() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();
    let f1 = fixture.temp_file("f1.zip");

    let steps = vec![
        DeployStep::new(
            "Building",
            StepAction::BuildArchive {
                bundle: env_bundle(),
                output: f1.clone(),
            },
        ),
        DeployStep::transmit_file("Uploading", &f1),
        DeployStep::finalize("Finishing up", false, None),
    ];

    let mut first = DeployRun::new(fixture.server.id.clone(), steps.clone()).unwrap();
    {
        let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
        executor.run_to_completion(&mut first).await.unwrap();
    }
    assert_eq!(beacon.upload_count(), 1);
    let r1 = first.remote_path(&f1).unwrap().to_string();

    let mut file_map = BTreeMap::new();
    file_map.insert(f1.clone(), r1.clone());
    let mut resumed = DeployRun::resume(fixture.server.id.clone(), steps, 1, file_map).unwrap();

    let reports = {
        let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
        executor.run_to_completion(&mut resumed).await.unwrap()
    };

    let indices: Vec<usize> = reports.iter().map(|report| report.index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert!(reports[0].outcome.skipped);
    assert_eq!(reports[0].outcome.remote_path.as_deref(), Some(r1.as_str()));
    assert_eq!(beacon.upload_count(), 1);
    assert!(!f1.exists());
    assert!(fixture.server.last_deploy_at.is_some());
    assert!(fixture.server.last_version.is_none());
}

#[tokio::test]
async fn test_failure_halts_and_resumes() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();
    *beacon.artisan_reply.lock().unwrap() = json!({"errCode": 1, "output": STANDARD.encode("Migration failed")});

    let archive = fixture.temp_file("config.zip");
    let steps = vec![
        DeployStep::new(
            "Building",
            StepAction::BuildArchive {
                bundle: env_bundle(),
                output: archive.clone(),
            },
        ),
        DeployStep::transmit_file("Uploading", &archive),
        DeployStep::transmit_artisan("Migrating", "october:migrate"),
        DeployStep::finalize("Finishing up", false, None),
    ];
    let mut run = DeployRun::new(fixture.server.id.clone(), steps).unwrap();

    let failure = {
        let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
        executor.run_to_completion(&mut run).await.unwrap_err()
    };
    assert_eq!(failure.index, 2);
    assert_eq!(failure.label, "Migrating");
    assert!(matches!(&failure.error, DeployError::ApplicationError(message) if message == "Migration failed"));
    assert_eq!(run.cursor, 2);
    assert!(fixture.server.last_deploy_at.is_none());

    // Artifacts of the halted run survive for the resume
    assert!(archive.exists());

    *beacon.artisan_reply.lock().unwrap() = json!({"errCode": 0, "output": STANDARD.encode("Migrated")});
    let mut resumed = DeployRun::resume(
        fixture.server.id.clone(),
        run.steps.clone(),
        failure.index,
        run.file_map.clone(),
    )
    .unwrap();
    let reports = {
        let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
        executor.run_to_completion(&mut resumed).await.unwrap()
    };

    assert_eq!(reports.len(), 2);
    assert_eq!(beacon.upload_count(), 1);
    assert_eq!(beacon.artisan.lock().unwrap().len(), 2);
    assert!(!archive.exists());
}

#[tokio::test]
async fn test_script_failure_carries_beacon_message() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();
    *beacon.script_reply.lock().unwrap() = json!({"status": "error", "error": "Database unreachable"});

    let steps = vec![DeployStep::transmit_script("Checking database", Script::CheckDatabase, json!({"host": "db"}))];
    let mut run = DeployRun::new(fixture.server.id.clone(), steps).unwrap();

    let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
    let err = executor.execute_step(&mut run, 0).await.unwrap_err();
    assert_eq!(err.to_string(), "Database unreachable");
    assert_eq!(run.cursor, 0);

    *beacon.script_reply.lock().unwrap() = json!({"status": "failed"});
    let err = executor.execute_step(&mut run, 0).await.unwrap_err();
    assert_eq!(err.to_string(), "Script failed");
}

#[tokio::test]
async fn test_script_output_is_decoded() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();
    *beacon.script_reply.lock().unwrap() = json!({"status": "ok", "output": STANDARD.encode("cache cleared")});

    let steps = vec![DeployStep::transmit_script("Clearing cache", Script::ClearCache, Value::Null)];
    let mut run = DeployRun::new(fixture.server.id.clone(), steps).unwrap();

    let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
    let outcome = executor.execute_step(&mut run, 0).await.unwrap();
    assert_eq!(outcome.output.as_deref(), Some("cache cleared"));

    *beacon.script_reply.lock().unwrap() = json!({"status": "ok", "output": "%%% not base64"});
    let err = executor.execute_step(&mut run, 0).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[tokio::test]
async fn test_core_bundle_records_version_on_resume() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();
    let core = fixture.temp_file("core-modules.zip");

    let steps = vec![
        DeployStep::new(
            "Building core modules",
            StepAction::BuildArchive {
                bundle: BundleKind::CoreModules,
                output: core.clone(),
            },
        ),
        DeployStep::transmit_file("Uploading core modules", &core),
        DeployStep::finalize("Finishing up", false, Some("3.7.0".to_string())),
    ];

    // The earlier attempt uploaded the archive; the run resumes at finalize
    let mut file_map = BTreeMap::new();
    file_map.insert(core.clone(), "/var/beacon/uploads/core-modules.zip".to_string());
    let mut run = DeployRun::resume(fixture.server.id.clone(), steps, 2, file_map).unwrap();

    let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
    executor.run_to_completion(&mut run).await.unwrap();

    assert_eq!(fixture.server.last_version.as_deref(), Some("3.7.0"));
    assert_eq!(beacon.upload_count(), 0);
}

#[tokio::test]
async fn test_extract_without_upload_is_validation_error() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();
    let steps = vec![
        DeployStep::extract_files("Extracting", vec![fixture.temp_file("never-uploaded.zip")]),
        DeployStep::finalize("Finishing up", false, None),
    ];
    let mut run = DeployRun::new(fixture.server.id.clone(), steps).unwrap();

    let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
    let failure = executor.run_to_completion(&mut run).await.unwrap_err();
    assert_eq!(failure.index, 0);
    assert_eq!(failure.error.kind(), ErrorKind::Validation);
    assert!(failure.error.to_string().contains("Missing file map"));
    assert!(beacon.scripts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_finalize_refreshes_status_and_version() {
    let mut fixture = Fixture::new();
    fixture.server.status_code = ServerStatus::Active;
    let beacon = RecordingBeacon::new();
    *beacon.health_reply.lock().unwrap() = json!({"appInstalled": false});

    let mut run = DeployRun::new(
        fixture.server.id.clone(),
        vec![DeployStep::finalize("Finishing up", true, None)],
    )
    .unwrap();

    let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
    executor.run_to_completion(&mut run).await.unwrap();

    assert_eq!(fixture.server.status_code, ServerStatus::Ready);
    assert!(fixture.server.last_version.is_some());
}

#[tokio::test]
async fn test_step_index_out_of_range() {
    let mut fixture = Fixture::new();
    let beacon = RecordingBeacon::new();
    let mut run = DeployRun::new(
        fixture.server.id.clone(),
        vec![DeployStep::finalize("Finishing up", false, None)],
    )
    .unwrap();

    let mut executor = StepExecutor::new(&beacon, &fixture.builder, &mut fixture.server);
    let err = executor.execute_step(&mut run, 5).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
