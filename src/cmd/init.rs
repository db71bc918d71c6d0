//! Project setup command: `corkboard init`.

use std::path::Path;

use anyhow::{Context, Result};
use corkboard::board::db::BoardDb;
use corkboard::board_config::{CorkboardToml, config_path};

pub const DEFAULT_COLUMNS: [&str; 3] = ["Todo", "Doing", "Done"];

/// Write a default `corkboard.toml` (unless one exists), create the
/// database and, with `board`, a starter board.
pub fn cmd_init(project_dir: &Path, board: Option<&str>, columns: &[String]) -> Result<()> {
    let config_file = config_path(project_dir);
    if config_file.exists() {
        println!("Config already exists at {}", config_file.display());
    } else {
        CorkboardToml::default().save(&config_file)?;
        println!("Created {}", config_file.display());
    }

    let toml = super::load_config(project_dir)?;
    let db_path = toml.server_config(project_dir).db_path;
    let db = BoardDb::new(&db_path)
        .with_context(|| format!("Failed to initialize database at {}", db_path.display()))?;
    println!("Board database initialized at {}", db_path.display());

    if let Some(name) = board {
        let board = db.create_board(name)?;
        let names: Vec<&str> = if columns.is_empty() {
            DEFAULT_COLUMNS.to_vec()
        } else {
            columns.iter().map(String::as_str).collect()
        };
        for column in &names {
            db.create_column(board.id, column, None)?;
        }
        tracing::info!(board_id = board.id, columns = names.len(), "starter board created");
        println!(
            "Created board '{}' (id {}) with columns: {}",
            board.name,
            board.id,
            names.join(", ")
        );
    }

    Ok(())
}
