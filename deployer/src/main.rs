//! Beacon Deployer - Entry Point
//!
//! Registers target servers, probes their beacons and drives step chain
//! deployments against them.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use secrecy::ExposeSecret;
use tracing::{error, info};

use beacon_deployer::archive::ArchiveBuilder;
use beacon_deployer::authn::keypair::KeyPair;
use beacon_deployer::beacon::client::{Beacon, BeaconClient};
use beacon_deployer::deploy::{DeployRun, StepExecutor};
use beacon_deployer::logs::{init_logging, LogOptions};
use beacon_deployer::models::server::Server;
use beacon_deployer::models::step::DeployStep;
use beacon_deployer::storage::layout::StorageLayout;
use beacon_deployer::storage::servers::{list_servers, load_server, save_server};
use beacon_deployer::storage::settings::{key_passphrase, Settings};
use beacon_deployer::utils::version_info;

const USAGE: &str = "\
Usage:
  beacon-deploy --version
  beacon-deploy --keygen [--bits=<n>]
  beacon-deploy --register --name=<name> --endpoint=<url> [--key-file=<pem>]
  beacon-deploy --list
  beacon-deploy --probe --server=<id>
  beacon-deploy --fetch-env --server=<id>
  beacon-deploy --deploy --server=<id> --steps=<file> [--from=<index>]

Stored keys are encrypted with the passphrase in $BEACON_DEPLOY_PASSPHRASE.";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    match run(&cli_args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli_args: &HashMap<String, String>) -> Result<()> {
    // Print version and exit
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version_info())?);
        return Ok(());
    }

    if cli_args.contains_key("keygen") {
        return keygen(cli_args);
    }

    let layout = StorageLayout::default();
    layout.setup().await.context("Unable to prepare storage")?;

    // Retrieve the settings file, falling back to defaults
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        settings_file
            .read_json::<Settings>()
            .await
            .with_context(|| format!("Unable to read {}", settings_file.path().display()))?
    } else {
        Settings::default()
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    if cli_args.contains_key("register") {
        register(cli_args, &layout).await
    } else if cli_args.contains_key("list") {
        list(&layout).await
    } else if cli_args.contains_key("probe") {
        probe(cli_args, &layout, &settings).await
    } else if cli_args.contains_key("fetch-env") {
        fetch_env(cli_args, &layout, &settings).await
    } else if cli_args.contains_key("deploy") {
        deploy(cli_args, &layout, &settings).await
    } else {
        println!("{}", USAGE);
        Ok(())
    }
}

fn required<'a>(cli_args: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    cli_args
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing --{}=<value>\n\n{}", key, USAGE))
}

fn keygen(cli_args: &HashMap<String, String>) -> Result<()> {
    let bits = match cli_args.get("bits") {
        Some(bits) => bits.parse().context("--bits must be a number")?,
        None => 2048,
    };

    let key = KeyPair::generate_with_bits(bits)?;
    println!("{}", key.private_key().expose_secret());
    println!("{}", key.public_key_pem());
    println!("{} {}", "Key id:".bold(), key.key_id());
    Ok(())
}

async fn register(cli_args: &HashMap<String, String>, layout: &StorageLayout) -> Result<()> {
    let passphrase = key_passphrase()?;
    let name = required(cli_args, "name")?;
    let endpoint = required(cli_args, "endpoint")?;

    let server = match cli_args.get("key-file") {
        Some(path) => {
            let pem = std::fs::read_to_string(path).with_context(|| format!("Unable to read {}", path))?;
            Server::register(name, endpoint, &pem)?
        }
        None => {
            let mut server = Server::new(name, endpoint);
            server.key = Some(KeyPair::generate()?);
            server.validate()?;
            server
        }
    };

    save_server(layout, &server, &passphrase).await?;
    info!("Registered server {} ({})", server.server_name, server.id);

    println!("{} {}", "Registered".green().bold(), server.id);
    if let Some(key) = &server.key {
        println!("Install a beacon carrying this public key:\n{}", key.public_key_pem());
    }
    Ok(())
}

async fn list(layout: &StorageLayout) -> Result<()> {
    for server in list_servers(layout).await? {
        let last_deploy = server
            .last_deploy_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{}  {:<20} {:<12} {}  (last deploy: {})",
            server.id,
            server.server_name,
            status_colored(&server),
            server.endpoint_url,
            last_deploy
        );
    }
    Ok(())
}

async fn probe(cli_args: &HashMap<String, String>, layout: &StorageLayout, settings: &Settings) -> Result<()> {
    let passphrase = key_passphrase()?;
    let mut server = load_server(layout, required(cli_args, "server")?, &passphrase).await?;
    let client = BeaconClient::for_server(&server, &settings.paths.scripts_dir, &settings.transport)?;

    let changed = server.test_beacon(&client).await;
    if changed {
        save_server(layout, &server, &passphrase).await?;
    }

    println!(
        "{} is {} (beacon {})",
        server.server_name,
        status_colored(&server),
        server.beacon_version.as_deref().unwrap_or("unknown")
    );
    Ok(())
}

async fn fetch_env(cli_args: &HashMap<String, String>, layout: &StorageLayout, settings: &Settings) -> Result<()> {
    let server = load_server(layout, required(cli_args, "server")?, &key_passphrase()?).await?;
    let client = BeaconClient::for_server(&server, &settings.paths.scripts_dir, &settings.transport)?;

    let contents = client.fetch_env_file().await?;
    print!("{}", contents);
    Ok(())
}

async fn deploy(cli_args: &HashMap<String, String>, layout: &StorageLayout, settings: &Settings) -> Result<()> {
    let passphrase = key_passphrase()?;
    let mut server = load_server(layout, required(cli_args, "server")?, &passphrase).await?;
    let steps_path = PathBuf::from(required(cli_args, "steps")?);
    let steps_json = std::fs::read_to_string(&steps_path)
        .with_context(|| format!("Unable to read {}", steps_path.display()))?;
    let steps: Vec<DeployStep> = serde_json::from_str(&steps_json)
        .with_context(|| format!("Invalid step list in {}", steps_path.display()))?;

    let run_file = layout.run_file(&server.id);
    let mut run = match cli_args.get("from") {
        Some(from) => {
            let from: usize = from.parse().context("--from must be a step index")?;
            let file_map = DeployRun::load(&run_file)
                .await?
                .map(|saved| saved.file_map)
                .unwrap_or_default();
            DeployRun::resume(server.id.clone(), steps, from, file_map)?
        }
        None => DeployRun::new(server.id.clone(), steps)?,
    };

    let client = BeaconClient::for_server(&server, &settings.paths.scripts_dir, &settings.transport)?;
    let builder = ArchiveBuilder::new(settings.paths.archive_settings(layout.temp_dir().path()));
    let mut executor = StepExecutor::new(&client, &builder, &mut server);

    loop {
        match executor.execute_next(&mut run).await {
            Ok(Some(report)) => {
                let marker = if report.outcome.skipped { "skipped".yellow() } else { "done".green() };
                println!("[{}/{}] {} ... {}", report.index + 1, run.steps.len(), report.label, marker);
                if let Some(output) = &report.outcome.output {
                    println!("{}", output.trim_end());
                }
                run.save(&run_file).await?;
            }
            Ok(None) => break,
            Err(failure) => {
                run.save(&run_file).await?;
                save_server(layout, executor.server(), &passphrase).await?;
                bail!(
                    "{}\nResume with --from={} once the problem is fixed",
                    failure,
                    failure.index
                );
            }
        }
    }

    run_file.delete().await?;
    save_server(layout, executor.server(), &passphrase).await?;
    println!("{}", "Deployment successful".green().bold());
    Ok(())
}

fn status_colored(server: &Server) -> colored::ColoredString {
    use beacon_deployer::deploy::ServerStatus;

    let label = server.status_label();
    match server.status_code {
        ServerStatus::Active => label.green(),
        ServerStatus::Ready => label.cyan(),
        ServerStatus::Legacy => label.yellow(),
        ServerStatus::Unreachable => label.red(),
    }
}
