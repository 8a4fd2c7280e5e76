use std::fmt;
use std::path::{Component, Path, PathBuf};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One captured, not-yet-applied change under the source root.
///
/// Paths are relative to the watched root. Records are immutable once
/// created and live only until the end of the next reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeRecord {
    Created { path: PathBuf },
    Changed { path: PathBuf },
    Deleted { path: PathBuf },
    Renamed { from: PathBuf, to: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Changed,
    Deleted,
    Renamed,
}

impl ChangeRecord {
    pub fn created<P: Into<PathBuf>>(path: P) -> Self {
        Self::Created { path: path.into() }
    }

    pub fn changed<P: Into<PathBuf>>(path: P) -> Self {
        Self::Changed { path: path.into() }
    }

    pub fn deleted<P: Into<PathBuf>>(path: P) -> Self {
        Self::Deleted { path: path.into() }
    }

    pub fn renamed<P: Into<PathBuf>, Q: Into<PathBuf>>(from: P, to: Q) -> Self {
        Self::Renamed {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Created { .. } => ChangeKind::Created,
            Self::Changed { .. } => ChangeKind::Changed,
            Self::Deleted { .. } => ChangeKind::Deleted,
            Self::Renamed { .. } => ChangeKind::Renamed,
        }
    }

    /// The path the item is known by after the event.
    pub fn path(&self) -> &Path {
        match self {
            Self::Created { path } | Self::Changed { path } | Self::Deleted { path } => path,
            Self::Renamed { to, .. } => to,
        }
    }

    pub fn old_path(&self) -> Option<&Path> {
        match self {
            Self::Renamed { from, .. } => Some(from),
            _ => None,
        }
    }

    /// True when every path in the record stays below the root it is joined onto.
    pub fn is_contained(&self) -> bool {
        let contained = |path: &Path| {
            path.components().any(|c| matches!(c, Component::Normal(_)))
                && path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        };
        contained(self.path()) && self.old_path().map_or(true, contained)
    }

    /// Human-readable line used for the sync log.
    pub fn describe(&self) -> String {
        match self {
            Self::Created { path } => format!("Added: {}", path.display()),
            Self::Changed { path } => format!("Changed: {}", path.display()),
            Self::Deleted { path } => format!("Deleted: {}", path.display()),
            Self::Renamed { from, to } => {
                format!("Renamed: {} -> {}", from.display(), to.display())
            }
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Created => "CREATED",
            ChangeKind::Changed => "CHANGED",
            ChangeKind::Deleted => "DELETED",
            ChangeKind::Renamed => "RENAMED",
        };
        f.write_str(label)
    }
}

/// A timestamped message handed to the sync log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChangeKind>,
}

impl LogEntry {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
            kind: None,
        }
    }

    pub fn for_record(record: &ChangeRecord) -> Self {
        Self {
            timestamp: Local::now(),
            message: record.describe(),
            kind: Some(record.kind()),
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}
