//! Server record persistence
//!
//! Records hold private keys, sealed under a passphrase, and every write
//! is owner-only.

use secrecy::SecretString;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::models::server::Server;
use crate::storage::layout::StorageLayout;

/// Load one server record and open its key
pub async fn load_server(
    layout: &StorageLayout,
    id: &str,
    passphrase: &SecretString,
) -> Result<Server, DeployError> {
    let file = layout.server_file(id);
    if !file.exists().await {
        return Err(DeployError::ValidationError(format!("Unknown server '{}'", id)));
    }

    let mut server: Server = file.read_json().await?;
    server.unseal_key(passphrase)?;
    Ok(server)
}

/// Save a server record, replacing any previous version. The key is
/// written sealed.
pub async fn save_server(
    layout: &StorageLayout,
    server: &Server,
    passphrase: &SecretString,
) -> Result<(), DeployError> {
    let mut record = server.clone();
    record.seal_key(passphrase)?;

    let file = layout.server_file(&server.id);
    file.write_json(&record).await?;
    debug!("Saved server record {}", file.path().display());
    Ok(())
}

/// Load every readable server record, sorted by name. Keys stay sealed.
pub async fn list_servers(layout: &StorageLayout) -> Result<Vec<Server>, DeployError> {
    let mut servers = Vec::new();

    for path in layout.servers_dir().list_files().await? {
        let is_record = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with(".json") && !name.ends_with(".run.json"))
            .unwrap_or(false);
        if !is_record {
            continue;
        }

        match crate::filesys::file::File::new(&path).read_json::<Server>().await {
            Ok(server) => servers.push(server),
            Err(e) => warn!("Skipping unreadable server record {}: {}", path.display(), e),
        }
    }

    servers.sort_by(|a, b| a.server_name.cmp(&b.server_name));
    Ok(servers)
}

/// Remove a server record and any saved run
pub async fn delete_server(layout: &StorageLayout, id: &str) -> Result<(), DeployError> {
    layout.server_file(id).delete().await?;
    layout.run_file(id).delete().await?;
    Ok(())
}
