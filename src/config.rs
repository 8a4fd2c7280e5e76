//! Configuration for a mirror session.
//!
//! Values come from an optional TOML file, then `TREEMIRROR_*` environment
//! variables, then command-line flags, each layer overriding the previous.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use crate::{OutputFormat, PathFilter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory being watched
    pub source: PathBuf,
    /// Directory kept identical to the source
    pub mirror: PathBuf,
    /// Sync log, truncated at startup
    pub log_file: PathBuf,
    /// Milliseconds between reconciliation passes
    pub interval_ms: u64,
    /// Glob patterns never mirrored
    pub exclude: Vec<String>,
    /// Console echo format for sync log entries
    pub output: OutputFormat,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            mirror: PathBuf::new(),
            log_file: PathBuf::from("treemirror.log"),
            interval_ms: 2000,
            exclude: Vec::new(),
            output: OutputFormat::Text,
        }
    }
}

impl SyncConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply environment overrides on top of `self`.
    pub fn with_env(mut self) -> Self {
        if let Ok(val) = std::env::var("TREEMIRROR_INTERVAL_MS") {
            if let Ok(ms) = val.parse::<u64>() {
                self.interval_ms = ms;
            }
        }

        if let Ok(val) = std::env::var("TREEMIRROR_LOG_FILE") {
            if !val.is_empty() {
                self.log_file = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var("TREEMIRROR_EXCLUDE") {
            self.exclude = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("Sync interval must be greater than 0".to_string());
        }

        if self.source.as_os_str().is_empty() || self.mirror.as_os_str().is_empty() {
            return Err("Both a source and a mirror directory are required".to_string());
        }

        if !self.source.is_dir() {
            return Err(format!("Source directory does not exist: {}", self.source.display()));
        }

        if self.mirror.exists() && !self.mirror.is_dir() {
            return Err(format!("Mirror path is not a directory: {}", self.mirror.display()));
        }

        let source = normalize(&self.source);
        let mirror = normalize(&self.mirror);
        if source == mirror {
            return Err("Source and mirror directories are the same".to_string());
        }
        if mirror.starts_with(&source) {
            return Err("Mirror directory must not be inside the source directory".to_string());
        }
        if source.starts_with(&mirror) {
            return Err("Source directory must not be inside the mirror directory".to_string());
        }

        let log_parent = match self.log_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !log_parent.is_dir() {
            return Err(format!("Log file directory does not exist: {}", log_parent.display()));
        }
        let log_file = normalize(&self.log_file);
        if log_file.starts_with(&source) {
            return Err("Log file must not be inside the source directory".to_string());
        }
        if log_file.starts_with(&mirror) {
            return Err("Log file must not be inside the mirror directory".to_string());
        }

        if let Err(err) = PathFilter::new(&self.source, &self.exclude) {
            return Err(format!("{:#}", err));
        }

        Ok(())
    }

    /// Canonicalize both roots, creating the mirror root if needed.
    pub fn resolve(mut self) -> Result<Self> {
        if !self.mirror.exists() {
            fs::create_dir_all(&self.mirror)
                .with_context(|| format!("Failed to create mirror {}", self.mirror.display()))?;
        }
        self.source = self
            .source
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", self.source.display()))?;
        self.mirror = self
            .mirror
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", self.mirror.display()))?;
        if self.source == self.mirror {
            bail!("Source and mirror resolve to the same directory");
        }
        Ok(self)
    }
}

/// Best-effort absolute form of a path that may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    // Canonicalize the closest existing ancestor and re-append the rest.
    let mut existing = path.to_path_buf();
    let mut rest = Vec::new();
    while let Some(name) = existing.file_name().map(|n| n.to_os_string()) {
        existing.pop();
        rest.push(name);
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            out.extend(rest.iter().rev());
            return out;
        }
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
