//! Board server command: `corkboard serve`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use corkboard::board::server::start_server;

use super::load_config;

pub async fn cmd_serve(
    project_dir: &Path,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let toml = load_config(project_dir)?;
    for warning in toml.validate() {
        tracing::warn!(%warning, "configuration warning");
    }

    let mut config = toml.server_config(project_dir);
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(path) = db_path {
        config.db_path = if path.is_absolute() {
            path
        } else {
            project_dir.join(path)
        };
    }
    config.dev_mode |= dev;

    start_server(config).await
}
