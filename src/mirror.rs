//! Source/mirror root pair and the one-shot initial mirror build.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use ignore::WalkBuilder;
use crate::{FileCopier, LogEntry, LogSink, PathFilter};

/// Everything the sync engine needs to touch both trees.
pub struct Mirror {
    source_root: PathBuf,
    mirror_root: PathBuf,
    filter: PathFilter,
    copier: Arc<dyn FileCopier>,
    log: Arc<dyn LogSink>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub directories: usize,
    pub files_copied: usize,
    pub files_failed: usize,
    pub bytes: u64,
}

impl Mirror {
    pub fn new<S, M>(source_root: S, mirror_root: M, copier: Arc<dyn FileCopier>, log: Arc<dyn LogSink>) -> Self
    where
        S: Into<PathBuf>,
        M: Into<PathBuf>,
    {
        let source_root = source_root.into();
        Self {
            filter: PathFilter::allow_all(&source_root),
            source_root,
            mirror_root: mirror_root.into(),
            copier,
            log,
        }
    }

    pub fn with_filter(mut self, filter: PathFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn mirror_root(&self) -> &Path {
        &self.mirror_root
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    pub fn copier(&self) -> &dyn FileCopier {
        self.copier.as_ref()
    }

    pub fn source_path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        self.source_root.join(relative)
    }

    pub fn mirror_path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        self.mirror_root.join(relative)
    }

    /// Whether `relative` names a directory.
    ///
    /// The source tree is authoritative while the entry exists there. Once
    /// it is gone the name decides: no extension means directory.
    pub fn is_directory<P: AsRef<Path>>(&self, relative: P) -> bool {
        let relative = relative.as_ref();
        match fs::metadata(self.source_path(relative)) {
            Ok(metadata) => metadata.is_dir(),
            Err(_) => relative.extension().is_none(),
        }
    }

    pub fn log<S: Into<String>>(&self, message: S) {
        self.log.append(&LogEntry::new(message));
    }

    pub fn log_entry(&self, entry: &LogEntry) {
        self.log.append(entry);
    }

    /// Replace the mirror's contents with a full copy of the source tree.
    pub fn build(&self) -> Result<BuildSummary> {
        self.clear_mirror()?;

        let mut summary = BuildSummary::default();
        if !self.source_root.is_dir() {
            tracing::warn!(
                "Source {} does not exist, mirror left empty",
                self.source_root.display()
            );
            self.log_build_summary(&summary);
            return Ok(summary);
        }

        let mut directories = Vec::new();
        let mut files = Vec::new();
        let walker = WalkBuilder::new(&self.source_root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .overrides(self.filter.overrides())
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("Error walking source tree: {}", err);
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let relative = match entry.path().strip_prefix(&self.source_root) {
                Ok(relative) => relative.to_path_buf(),
                Err(_) => continue,
            };
            match entry.file_type() {
                Some(ft) if ft.is_dir() => directories.push(relative),
                Some(ft) if ft.is_file() => files.push(relative),
                // Links are mirrored by what they point at, without descending.
                Some(ft) if ft.is_symlink() => match fs::metadata(entry.path()) {
                    Ok(target) if target.is_dir() => directories.push(relative),
                    Ok(target) if target.is_file() => files.push(relative),
                    Ok(_) => tracing::debug!("Skipping special file {}", entry.path().display()),
                    Err(err) => tracing::warn!("Skipping dangling link {}: {}", entry.path().display(), err),
                },
                _ => tracing::debug!("Skipping special file {}", entry.path().display()),
            }
        }

        // Walk order is parent-first, so the skeleton exists before any copy.
        for relative in &directories {
            let target = self.mirror_path(relative);
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory {}", target.display()))?;
            summary.directories += 1;
        }

        for relative in &files {
            match self
                .copier
                .copy_file(&self.source_path(relative), &self.mirror_path(relative))
            {
                Ok(bytes) => {
                    summary.files_copied += 1;
                    summary.bytes += bytes;
                }
                Err(err) => {
                    summary.files_failed += 1;
                    tracing::warn!("Initial copy skipped {}: {}", relative.display(), err);
                    self.log(format!("Skipped file: {} ({})", relative.display(), err));
                }
            }
        }

        self.log_build_summary(&summary);
        Ok(summary)
    }

    fn clear_mirror(&self) -> Result<()> {
        if !self.mirror_root.exists() {
            return fs::create_dir_all(&self.mirror_root).with_context(|| {
                format!("Failed to create mirror root {}", self.mirror_root.display())
            });
        }

        let entries = fs::read_dir(&self.mirror_root)
            .with_context(|| format!("Failed to read mirror root {}", self.mirror_root.display()))?;
        for entry in entries {
            let entry = entry.context("Failed to read mirror entry")?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let removed = if file_type.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    fn log_build_summary(&self, summary: &BuildSummary) {
        tracing::info!(
            "Initial mirror built: {} directories, {} files ({} bytes), {} failed",
            summary.directories,
            summary.files_copied,
            summary.bytes,
            summary.files_failed
        );
        self.log(format!(
            "Copied {} to {}: {} directories, {} files, {} failed.",
            self.source_root.display(),
            self.mirror_root.display(),
            summary.directories,
            summary.files_copied,
            summary.files_failed
        ));
    }
}
