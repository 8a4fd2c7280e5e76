use std::path::PathBuf;
use anyhow::Result;
use clap::Parser;
use crate::{OutputFormat, SyncConfig};

#[derive(Parser, Debug)]
#[command(name = "treemirror")]
#[command(version)]
#[command(about = "Keeps a mirror directory in sync with a watched source directory")]
#[command(long_about = "treemirror copies the source directory into the mirror once at startup, then watches the source for changes and replays them onto the mirror at a fixed interval. The mirror is always overwritten from the source.")]
pub struct Cli {
    /// Directory to watch
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Directory to keep in sync with the source
    #[arg(value_name = "MIRROR")]
    pub mirror: Option<PathBuf>,

    /// Sync log file (truncated at startup)
    #[arg(short, long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Milliseconds between reconciliation passes
    #[arg(short, long, value_name = "MS")]
    pub interval: Option<u64>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Glob patterns to leave out of the mirror
    #[arg(long, value_delimiter = ',', help = "Patterns to exclude (e.g., *.tmp,.git)")]
    pub exclude: Option<Vec<String>>,

    /// Console echo format for sync log entries
    #[arg(long)]
    pub output: Option<OutputFormat>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl Cli {
    /// Merge the config file, environment and flags, in that order.
    pub fn to_config(&self) -> Result<SyncConfig> {
        let base = match &self.config {
            Some(path) => SyncConfig::from_file(path)?,
            None => SyncConfig::default(),
        };
        Ok(self.apply_flags(base.with_env()))
    }

    pub fn apply_flags(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(source) = &self.source {
            config.source = source.clone();
        }
        if let Some(mirror) = &self.mirror {
            config.mirror = mirror.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = log_file.clone();
        }
        if let Some(interval) = self.interval {
            config.interval_ms = interval;
        }
        if let Some(exclude) = &self.exclude {
            config.exclude = exclude.clone();
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        config
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}
