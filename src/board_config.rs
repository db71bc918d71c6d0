//! Configuration for corkboard, read from `.corkboard/corkboard.toml`.
//!
//! Settings are layered file → environment → CLI. Every field has a
//! default, so an empty or missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 3141
//! db_path = ".corkboard/board.db"
//! dev_mode = false
//!
//! [ordering]
//! renumber_threshold = 1e-9
//! batch_order = "position"
//!
//! [sync]
//! commit_timeout_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::server::ServerConfig;
use crate::engine::allocator::{DEFAULT_RENUMBER_THRESHOLD, POSITION_INCREMENT};
use crate::engine::batch::BatchOrder;
use crate::engine::coordinator::{DEFAULT_COMMIT_TIMEOUT, SyncSettings};

pub const CONFIG_DIR: &str = ".corkboard";
pub const CONFIG_FILE: &str = "corkboard.toml";

pub const ENV_PORT: &str = "CORKBOARD_PORT";
pub const ENV_DB_PATH: &str = "CORKBOARD_DB_PATH";
pub const ENV_COMMIT_TIMEOUT_MS: &str = "CORKBOARD_COMMIT_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Relative paths resolve against the project directory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    Path::new(CONFIG_DIR).join("board.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderingSection {
    /// Gap below which two neighbouring positions count as collided.
    #[serde(default = "default_renumber_threshold")]
    pub renumber_threshold: f64,
    #[serde(default)]
    pub batch_order: BatchOrder,
}

fn default_renumber_threshold() -> f64 {
    DEFAULT_RENUMBER_THRESHOLD
}

impl Default for OrderingSection {
    fn default() -> Self {
        Self {
            renumber_threshold: default_renumber_threshold(),
            batch_order: BatchOrder::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSection {
    /// How long a move may wait for the store before it is rolled back.
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
}

fn default_commit_timeout_ms() -> u64 {
    DEFAULT_COMMIT_TIMEOUT.as_millis() as u64
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            commit_timeout_ms: default_commit_timeout_ms(),
        }
    }
}

/// The complete corkboard.toml configuration structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorkboardToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub ordering: OrderingSection,
    #[serde(default)]
    pub sync: SyncSection,
}

impl CorkboardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse corkboard.toml")
    }

    /// Load `<config_dir>/corkboard.toml`, or the defaults if it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            toml::to_string_pretty(self).context("Failed to serialize corkboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay `CORKBOARD_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Overlay environment values obtained through `lookup`. A variable that
    /// is set but unparseable is an error rather than silently ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("{} must be a port number, got '{}'", ENV_PORT, port))?;
        }
        if let Some(path) = lookup(ENV_DB_PATH)
            && !path.trim().is_empty()
        {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(ms) = lookup(ENV_COMMIT_TIMEOUT_MS) {
            self.sync.commit_timeout_ms = ms.trim().parse().with_context(|| {
                format!(
                    "{} must be a number of milliseconds, got '{}'",
                    ENV_COMMIT_TIMEOUT_MS, ms
                )
            })?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0: the server will pick a random port".to_string());
        }
        if self.server.db_path.as_os_str().is_empty() {
            warnings.push("server.db_path is empty".to_string());
        }

        let threshold = self.ordering.renumber_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            warnings.push(format!(
                "Invalid ordering.renumber_threshold {}: must be a positive number",
                threshold
            ));
        } else if threshold >= POSITION_INCREMENT {
            warnings.push(format!(
                "ordering.renumber_threshold {} is not below the position increment {}: \
                 every move will trigger a renumber",
                threshold, POSITION_INCREMENT
            ));
        }

        if self.sync.commit_timeout_ms == 0 {
            warnings.push(
                "sync.commit_timeout_ms is 0: every move will roll back before the store answers"
                    .to_string(),
            );
        }

        warnings
    }

    /// Engine settings for a client-side `MutationCoordinator`.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            commit_timeout: Duration::from_millis(self.sync.commit_timeout_ms),
            batch_order: self.ordering.batch_order,
            renumber_threshold: self.ordering.renumber_threshold,
        }
    }

    /// Server settings, resolving a relative database path against
    /// `project_dir`.
    pub fn server_config(&self, project_dir: &Path) -> ServerConfig {
        let db_path = if self.server.db_path.is_absolute() {
            self.server.db_path.clone()
        } else {
            project_dir.join(&self.server.db_path)
        };
        ServerConfig {
            port: self.server.port,
            db_path,
            dev_mode: self.server.dev_mode,
            renumber_threshold: self.ordering.renumber_threshold,
        }
    }
}

/// Path of the config file under `project_dir`.
pub fn config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
}
