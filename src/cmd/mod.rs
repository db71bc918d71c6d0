//! CLI command implementations.
//!
//! | Module     | Commands handled            |
//! |------------|-----------------------------|
//! | `serve`    | `Serve`                     |
//! | `init`     | `Init`                      |
//! | `board`    | `Show`, `Renumber`          |
//! | `config`   | `Config`                    |

pub mod board;
pub mod config;
pub mod init;
pub mod serve;

pub use board::{cmd_renumber, cmd_show};
pub use config::cmd_config;
pub use init::cmd_init;
pub use serve::cmd_serve;

use std::path::{Path, PathBuf};

use anyhow::Result;
use corkboard::board::db::BoardDb;
use corkboard::board_config::{CONFIG_DIR, CorkboardToml};

/// `corkboard.toml` with environment overrides applied.
pub(crate) fn load_config(project_dir: &Path) -> Result<CorkboardToml> {
    let mut toml = CorkboardToml::load_or_default(&project_dir.join(CONFIG_DIR))?;
    toml.apply_env()?;
    Ok(toml)
}

/// Database path from `--db-path`, falling back to the configuration.
pub(crate) fn resolve_db_path(project_dir: &Path, db_path: Option<&Path>) -> Result<PathBuf> {
    match db_path {
        Some(path) if path.is_absolute() => Ok(path.to_path_buf()),
        Some(path) => Ok(project_dir.join(path)),
        None => Ok(load_config(project_dir)?.server_config(project_dir).db_path),
    }
}

/// Open an existing board database for an offline maintenance command.
pub(crate) fn open_existing_db(project_dir: &Path, db_path: Option<&Path>) -> Result<BoardDb> {
    let path = resolve_db_path(project_dir, db_path)?;
    if !path.exists() {
        anyhow::bail!(
            "No board database at {}. Run 'corkboard init' first.",
            path.display()
        );
    }
    BoardDb::new(&path)
}
