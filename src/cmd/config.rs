//! Configuration view and validation commands: `corkboard config`.

use std::path::Path;

use anyhow::Result;
use corkboard::board_config::{CorkboardToml, config_path};

use super::super::ConfigCommands;

fn print_sections(toml: &CorkboardToml) {
    println!("[server]");
    println!("  port = {}", toml.server.port);
    println!("  db_path = \"{}\"", toml.server.db_path.display());
    println!("  dev_mode = {}", toml.server.dev_mode);
    println!();
    println!("[ordering]");
    println!("  renumber_threshold = {:e}", toml.ordering.renumber_threshold);
    println!("  batch_order = \"{}\"", toml.ordering.batch_order);
    println!();
    println!("[sync]");
    println!("  commit_timeout_ms = {}", toml.sync.commit_timeout_ms);
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let path = config_path(project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Corkboard Configuration");
            println!("=======================");
            println!();

            if path.exists() {
                println!("Config file: {}", path.display());
                println!();
                print_sections(&CorkboardToml::load(&path)?);
            } else {
                println!("No corkboard.toml found at {}", path.display());
                println!();
                println!("Using default configuration:");
                print_sections(&CorkboardToml::default());
                println!("Run 'corkboard config init' to create a corkboard.toml file.");
                println!();
            }

            let effective = super::load_config(project_dir)?;
            println!("Effective values (with env overrides):");
            println!("  port = {}", effective.server.port);
            println!(
                "  db_path = \"{}\"",
                effective.server_config(project_dir).db_path.display()
            );
            println!("  commit_timeout_ms = {}", effective.sync.commit_timeout_ms);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !path.exists() {
                println!("No corkboard.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = CorkboardToml::load(&path)?.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("corkboard.toml already exists at {}", path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            CorkboardToml::default().save(&path)?;

            println!("Created corkboard.toml at {}", path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] port, db_path, dev_mode");
            println!("  - [ordering] renumber_threshold, batch_order");
            println!("  - [sync] commit_timeout_ms");
            println!();
        }
    }

    Ok(())
}
