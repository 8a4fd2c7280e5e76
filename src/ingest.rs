use std::fs;
use std::path::Path;
use std::sync::Arc;
use crate::{ChangeRecord, LogEntry, Mirror, PendingChangeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The record waits for the next reconciliation pass.
    Queued,
    /// A new directory was created in the mirror right away.
    DirectoryCreated,
    /// Nothing was recorded: excluded, outside the root or unusable.
    Dropped,
}

/// Turns raw notifications into pending records.
///
/// Safe to call from any number of notification threads at once.
#[derive(Clone)]
pub struct Ingestor {
    changes: Arc<PendingChangeSet>,
    mirror: Arc<Mirror>,
}

impl Ingestor {
    pub fn new(changes: Arc<PendingChangeSet>, mirror: Arc<Mirror>) -> Self {
        Self { changes, mirror }
    }

    pub fn changes(&self) -> &Arc<PendingChangeSet> {
        &self.changes
    }

    pub fn ingest(&self, record: ChangeRecord) -> IngestOutcome {
        if !record.is_contained() {
            tracing::warn!("Dropping event outside the source root: {:?}", record);
            return IngestOutcome::Dropped;
        }

        let record = match self.apply_filter(record) {
            Some(record) => record,
            None => return IngestOutcome::Dropped,
        };

        // Directories bypass the batching window.
        if let ChangeRecord::Created { path } = &record {
            if self.mirror.is_directory(path) {
                let target = self.mirror.mirror_path(path);
                return match fs::create_dir_all(&target) {
                    Ok(()) => {
                        tracing::debug!("Created mirror directory {}", target.display());
                        self.mirror.log(format!("Added directory: {}", path.display()));
                        IngestOutcome::DirectoryCreated
                    }
                    Err(err) => {
                        tracing::warn!("Failed to create directory {}: {}", target.display(), err);
                        self.mirror.log(format!(
                            "Failed to add directory: {} ({})",
                            path.display(),
                            err
                        ));
                        IngestOutcome::Dropped
                    }
                };
            }
        }

        let entry = LogEntry::for_record(&record);
        tracing::debug!("{} {}", record.kind(), record.path().display());
        self.changes.push(record);
        self.mirror.log_entry(&entry);
        IngestOutcome::Queued
    }

    /// Renames across the exclude boundary become a plain delete or create.
    fn apply_filter(&self, record: ChangeRecord) -> Option<ChangeRecord> {
        let filter = self.mirror.filter();
        let included = |path: &Path| filter.should_sync(path, self.mirror.is_directory(path));

        match record {
            ChangeRecord::Renamed { from, to } => match (included(from.as_path()), included(to.as_path())) {
                (true, true) => Some(ChangeRecord::Renamed { from, to }),
                (true, false) => Some(ChangeRecord::Deleted { path: from }),
                (false, true) => Some(ChangeRecord::Created { path: to }),
                (false, false) => None,
            },
            other => {
                if included(other.path()) {
                    Some(other)
                } else {
                    tracing::debug!("Excluded: {}", other.path().display());
                    None
                }
            }
        }
    }
}
