//! Integration tests for the corkboard CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use corkboard::board::db::BoardDb;
use corkboard::board::models::ContainerRef;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a corkboard Command isolated from the caller's env
fn corkboard(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("corkboard");
    cmd.current_dir(dir.path())
        .env_remove("CORKBOARD_PORT")
        .env_remove("CORKBOARD_DB_PATH")
        .env_remove("CORKBOARD_COMMIT_TIMEOUT_MS")
        .env_remove("RUST_LOG");
    cmd
}

fn init_with_board(dir: &TempDir) {
    corkboard(dir)
        .args(["init", "--board", "Team"])
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("renumber"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Init
// =============================================================================

mod init {
    use super::*;

    #[test]
    fn test_init_creates_config_and_database() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"))
            .stdout(predicate::str::contains("Board database initialized"));

        assert!(dir.path().join(".corkboard/corkboard.toml").exists());
        assert!(dir.path().join(".corkboard/board.db").exists());
    }

    #[test]
    fn test_init_twice_keeps_existing_config() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir).arg("init").assert().success();
        fs::write(
            dir.path().join(".corkboard/corkboard.toml"),
            "[server]\nport = 9999\n",
        )
        .unwrap();

        corkboard(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".corkboard/corkboard.toml")).unwrap();
        assert!(content.contains("9999"));
    }

    #[test]
    fn test_init_with_board_creates_default_columns() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .args(["init", "--board", "Team"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Todo, Doing, Done"));
    }

    #[test]
    fn test_init_with_custom_columns() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .args(["init", "--board", "Ops", "--column", "Inbox", "--column", "Shipped"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Inbox, Shipped"));
    }

    #[test]
    fn test_column_without_board_is_rejected() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .args(["init", "--column", "Inbox"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Show / Renumber
// =============================================================================

mod board_commands {
    use super::*;

    #[test]
    fn test_show_lists_columns_in_order() {
        let dir = TempDir::new().unwrap();
        init_with_board(&dir);
        corkboard(&dir)
            .args(["show", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Team (board 1)"))
            .stdout(predicate::str::is_match("(?s)Todo.*Doing.*Done").unwrap());
    }

    #[test]
    fn test_show_json() {
        let dir = TempDir::new().unwrap();
        init_with_board(&dir);
        let output = corkboard(&dir)
            .args(["show", "1", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let view: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(view["columns"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_show_missing_board_fails() {
        let dir = TempDir::new().unwrap();
        init_with_board(&dir);
        corkboard(&dir)
            .args(["show", "7"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Board 7 not found"));
    }

    #[test]
    fn test_renumber_without_database_fails() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .args(["renumber", "--column", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("corkboard init"));
    }

    #[test]
    fn test_renumber_requires_a_target() {
        let dir = TempDir::new().unwrap();
        init_with_board(&dir);
        corkboard(&dir).arg("renumber").assert().failure();
    }

    #[test]
    fn test_renumber_respaces_collided_cards() {
        let dir = TempDir::new().unwrap();
        init_with_board(&dir);

        let db_path = dir.path().join(".corkboard/board.db");
        {
            let db = BoardDb::new(&db_path).unwrap();
            let todo = ContainerRef::column(1);
            let a = db.create_card(1, todo, "a").unwrap();
            let b = db.create_card(1, todo, "b").unwrap();
            let c = db.create_card(1, todo, "c").unwrap();
            db.move_card(a.id, todo, 5.0).unwrap();
            db.move_card(b.id, todo, 5.0).unwrap();
            db.move_card(c.id, todo, 6.0).unwrap();
        }

        corkboard(&dir)
            .args(["renumber", "--column", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Renumbered 3 cards in column 1"));

        let db = BoardDb::new(&db_path).unwrap();
        let positions: Vec<(String, f64)> = db
            .container_cards(ContainerRef::column(1))
            .unwrap()
            .into_iter()
            .map(|c| (c.title, c.position))
            .collect();
        assert_eq!(
            positions,
            vec![
                ("a".to_string(), 1024.0),
                ("b".to_string(), 2048.0),
                ("c".to_string(), 3072.0),
            ]
        );
    }

    #[test]
    fn test_renumber_columns_of_board() {
        let dir = TempDir::new().unwrap();
        init_with_board(&dir);
        corkboard(&dir)
            .args(["renumber", "--columns-of", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Renumbered 3 columns of board 1"));
    }
}

// =============================================================================
// Config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No corkboard.toml found"))
            .stdout(predicate::str::contains("port = 3141"))
            .stdout(predicate::str::contains("batch_order = \"position\""));
    }

    #[test]
    fn test_config_show_env_override() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .env("CORKBOARD_PORT", "4242")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Effective values"))
            .stdout(predicate::str::contains("port = 4242"));
    }

    #[test]
    fn test_config_show_bad_env_fails() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .env("CORKBOARD_COMMIT_TIMEOUT_MS", "soon")
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("CORKBOARD_COMMIT_TIMEOUT_MS"));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = TempDir::new().unwrap();
        corkboard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created corkboard.toml"));

        corkboard(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));

        corkboard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".corkboard")).unwrap();
        fs::write(
            dir.path().join(".corkboard/corkboard.toml"),
            "[ordering]\nrenumber_threshold = 0.0\n\n[sync]\ncommit_timeout_ms = 0\n",
        )
        .unwrap();

        corkboard(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings:"))
            .stdout(predicate::str::contains("renumber_threshold"))
            .stdout(predicate::str::contains("commit_timeout_ms"));
    }

    #[test]
    fn test_config_invalid_toml_fails() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".corkboard")).unwrap();
        fs::write(dir.path().join(".corkboard/corkboard.toml"), "[server\nport =").unwrap();

        corkboard(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse corkboard.toml"));
    }
}
