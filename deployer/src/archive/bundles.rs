//! Predefined bundle kinds
//!
//! Each kind expands to a [`BundleSpec`]; they all share the builder's
//! staging and cleanup guarantees.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::archive::builder::ArchiveSettings;
use crate::archive::spec::{BundleSpec, Exclusions};
use crate::errors::DeployError;

/// Storage directories created by a fresh install
const INSTALL_DIRS: &[&str] = &[
    "plugins",
    "themes",
    "storage/app/media",
    "storage/app/uploads",
    "storage/cms",
    "storage/framework/cache",
    "storage/framework/sessions",
    "storage/framework/views",
    "storage/logs",
];

/// Project root files shipped with a fresh install, when present
const INSTALL_FILES: &[&str] = &["artisan", "composer.json", "composer.lock"];

/// A named, predefined bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BundleKind {
    /// Beacon bootstrap files carrying the server's public key
    Beacon { public_key: String },

    /// Regenerated beacon entry point for upgrading a 1.0 beacon in place
    LegacyUpgrade { public_key: String },

    /// Project skeleton for a first install
    Install,

    /// Core `modules/` directory
    CoreModules,

    /// Third-party `vendor/` directory
    VendorPackages,

    /// `config/` directory
    Config,

    /// `app/` directory, optionally filtered by a project ignore file
    AppFiles {
        #[serde(default)]
        ignore_file: Option<PathBuf>,
    },

    /// Media library
    Media,

    /// Plugins by code (`Author.Name`)
    Plugins { codes: Vec<String> },

    /// Themes by directory name
    Themes { names: Vec<String> },

    /// A single `.env` file
    EnvFile { contents: String },
}

impl BundleKind {
    /// Short name used for output files and logs
    pub fn name(&self) -> &'static str {
        match self {
            BundleKind::Beacon { .. } => "beacon",
            BundleKind::LegacyUpgrade { .. } => "legacy-upgrade",
            BundleKind::Install => "install",
            BundleKind::CoreModules => "core-modules",
            BundleKind::VendorPackages => "vendor-packages",
            BundleKind::Config => "config",
            BundleKind::AppFiles { .. } => "app-files",
            BundleKind::Media => "media",
            BundleKind::Plugins { .. } => "plugins",
            BundleKind::Themes { .. } => "themes",
            BundleKind::EnvFile { .. } => "env-file",
        }
    }

    /// Whether this bundle carries core code, so a deploy containing it
    /// records a new version marker
    pub fn is_core(&self) -> bool {
        matches!(self, BundleKind::CoreModules | BundleKind::VendorPackages)
    }

    /// Expand into a bundle specification
    pub fn spec(&self, settings: &ArchiveSettings) -> Result<BundleSpec, DeployError> {
        let root = &settings.project_root;

        let spec = match self {
            BundleKind::Beacon { public_key } => {
                let templates = settings.templates_dir.join("app");
                BundleSpec::new()
                    .dir("bootstrap")
                    .file("index.php", read_template(&templates.join("index.stub"))?)
                    .file("bootstrap/app.php", read_template(&templates.join("bootstrap/app.stub"))?)
                    .file(
                        "bootstrap/autoload.php",
                        read_template(&templates.join("bootstrap/autoload.stub"))?,
                    )
                    .file("bootstrap/beacon.php", beacon_entry_point(settings, public_key)?)
            }
            BundleKind::LegacyUpgrade { public_key } => BundleSpec::new()
                .dir("bootstrap")
                .file("bootstrap/beacon.php", beacon_entry_point(settings, public_key)?),
            BundleKind::Install => {
                let mut spec = INSTALL_DIRS
                    .iter()
                    .fold(BundleSpec::new(), |spec, dir| spec.dir(*dir));
                for name in INSTALL_FILES {
                    let path = root.join(name);
                    if path.is_file() {
                        spec = spec.file_src(path);
                    }
                }
                spec
            }
            BundleKind::CoreModules => BundleSpec::new()
                .dir("modules")
                .dir_src("modules", root.join("modules")),
            BundleKind::VendorPackages => BundleSpec::new()
                .dir("vendor")
                .dir_src("vendor", root.join("vendor")),
            BundleKind::Config => BundleSpec::new().dir_src("config", root.join("config")),
            BundleKind::AppFiles { ignore_file } => {
                let exclusions = match ignore_file {
                    Some(file) => Exclusions::IgnoreFile(file.clone()),
                    None => Exclusions::None,
                };
                BundleSpec::new().dir_src_with("app", root.join("app"), exclusions)
            }
            BundleKind::Media => {
                BundleSpec::new().dir_src("storage/app/media", root.join("storage/app/media"))
            }
            BundleKind::Plugins { codes } => {
                if codes.is_empty() {
                    return Err(DeployError::ValidationError("No plugins selected".to_string()));
                }
                let mut spec = BundleSpec::new();
                for code in codes {
                    let folder = plugin_folder(code)?;
                    let source = root.join(&folder);
                    spec = spec.dir_src_with(folder, source, Exclusions::Discover);
                }
                spec
            }
            BundleKind::Themes { names } => {
                if names.is_empty() {
                    return Err(DeployError::ValidationError("No themes selected".to_string()));
                }
                let mut spec = BundleSpec::new();
                for name in names {
                    check_segment(name, "theme")?;
                    let folder = format!("themes/{}", name);
                    let source = root.join(&folder);
                    spec = spec.dir_src_with(folder, source, Exclusions::Discover);
                }
                spec
            }
            BundleKind::EnvFile { contents } => BundleSpec::new().file(".env", contents.as_bytes()),
        };

        Ok(spec)
    }
}

/// `Author.Name` to `plugins/author/name`
fn plugin_folder(code: &str) -> Result<String, DeployError> {
    let Some((author, name)) = code.split_once('.') else {
        return Err(DeployError::ValidationError(format!(
            "Plugin code must look like Author.Name: '{}'",
            code
        )));
    };
    check_segment(author, "plugin")?;
    check_segment(name, "plugin")?;

    Ok(format!(
        "plugins/{}/{}",
        author.to_lowercase(),
        name.to_lowercase()
    ))
}

fn check_segment(segment: &str, what: &str) -> Result<(), DeployError> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\']);

    if valid {
        Ok(())
    } else {
        Err(DeployError::ValidationError(format!("Invalid {} name: '{}'", what, segment)))
    }
}

fn beacon_entry_point(settings: &ArchiveSettings, public_key: &str) -> Result<String, DeployError> {
    let stub = read_template(&settings.templates_dir.join("app/bootstrap/beacon.stub"))?;
    let encoded = STANDARD.encode(public_key);
    Ok(render_template(&stub, &[("pub_key_encoded", encoded.as_str())]))
}

fn read_template(path: &Path) -> Result<String, DeployError> {
    std::fs::read_to_string(path).map_err(|e| {
        DeployError::FilesystemError(format!("Unable to read template {}: {}", path.display(), e))
    })
}

/// Replace `{{ name }}` placeholders
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered
            .replace(&format!("{{{{ {} }}}}", name), value)
            .replace(&format!("{{{{{}}}}}", name), value);
    }
    rendered
}
