//! Tracing subscriber setup for the `corkboard` binary.
//!
//! Events go to stderr so command output on stdout stays parseable. With
//! a log directory, a daily-rotated file gets a copy through a
//! non-blocking writer; keep the returned guard alive until exit or the
//! tail of the file is lost.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

const LOG_FILE_PREFIX: &str = "corkboard.log";

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub verbose: bool,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Directive used when `RUST_LOG` is unset or invalid.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "corkboard=debug"
    } else {
        "corkboard=info"
    }
}

pub fn init(config: &TelemetryConfig) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![stderr_layer(config.json)];

    if let Some(dir) = &config.log_dir {
        let (layer, guard) = file_layer(dir, config.json)?;
        layers.push(layer);
        guards.push(guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(TelemetryGuard { _guards: guards })
}

fn stderr_layer(json: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
    }
}

fn file_layer(
    dir: &Path,
    json: bool,
) -> Result<(
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true),
        )
    } else {
        Box::new(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
    };
    Ok((layer, guard))
}
