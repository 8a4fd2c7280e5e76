//! Replays one pending record against the mirror tree.
//!
//! Every branch re-reads the current state of both trees instead of trusting
//! the event, so replaying a stale or redundant record is harmless.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use crate::{ChangeRecord, CopyError, Mirror};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Copied { bytes: u64 },
    Removed,
    RemovedDirectory,
    Renamed,
    CreatedDirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The rename target no longer exists in the source.
    TransientSource,
    /// The source file vanished before it could be copied.
    SourceMissing,
    /// There is nothing in the mirror to update or rename.
    NotInMirror,
    /// The entry was already gone from the mirror.
    AlreadyAbsent,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ApplyError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        ApplyError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug)]
pub enum ApplyOutcome {
    Applied(Action),
    Skipped(SkipReason),
    Failed(ApplyError),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

impl From<Result<Action, ApplyError>> for ApplyOutcome {
    fn from(result: Result<Action, ApplyError>) -> Self {
        match result {
            Ok(action) => ApplyOutcome::Applied(action),
            Err(ApplyError::Copy(err)) if err.is_stale() => {
                ApplyOutcome::Skipped(SkipReason::SourceMissing)
            }
            Err(err) => ApplyOutcome::Failed(err),
        }
    }
}

pub fn apply_record(mirror: &Mirror, record: &ChangeRecord) -> ApplyOutcome {
    match record {
        ChangeRecord::Renamed { from, to } => {
            if mirror.is_directory(to) {
                rename_in_place(mirror, from, to)
            } else {
                replace_renamed_file(mirror, from, to)
            }
        }
        ChangeRecord::Deleted { path } => remove_entry(mirror, path),
        ChangeRecord::Created { path } => create_entry(mirror, path),
        ChangeRecord::Changed { path } => refresh_file(mirror, path),
    }
}

fn replace_renamed_file(mirror: &Mirror, from: &Path, to: &Path) -> ApplyOutcome {
    let source = mirror.source_path(to);
    if !source.is_file() {
        return ApplyOutcome::Skipped(SkipReason::TransientSource);
    }

    let old = mirror.mirror_path(from);
    if old.is_file() {
        if let Err(err) = fs::remove_file(&old) {
            return ApplyOutcome::Failed(ApplyError::io("remove", &old, err));
        }
    }

    copy_into_mirror(mirror, to).into()
}

fn rename_in_place(mirror: &Mirror, from: &Path, to: &Path) -> ApplyOutcome {
    let old = mirror.mirror_path(from);
    if fs::symlink_metadata(&old).is_err() {
        return ApplyOutcome::Skipped(SkipReason::NotInMirror);
    }

    let new = mirror.mirror_path(to);
    if let Some(parent) = new.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return ApplyOutcome::Failed(ApplyError::io("create directory", parent, err));
        }
    }

    match fs::rename(&old, &new) {
        Ok(()) => ApplyOutcome::Applied(Action::Renamed),
        Err(err) => ApplyOutcome::Failed(ApplyError::io("rename", &old, err)),
    }
}

fn remove_entry(mirror: &Mirror, path: &Path) -> ApplyOutcome {
    let target = mirror.mirror_path(path);
    let metadata = match fs::symlink_metadata(&target) {
        Ok(metadata) => metadata,
        Err(_) => return ApplyOutcome::Skipped(SkipReason::AlreadyAbsent),
    };

    if metadata.is_dir() {
        match fs::remove_dir_all(&target) {
            Ok(()) => ApplyOutcome::Applied(Action::RemovedDirectory),
            Err(err) => ApplyOutcome::Failed(ApplyError::io("remove directory", &target, err)),
        }
    } else {
        match fs::remove_file(&target) {
            Ok(()) => ApplyOutcome::Applied(Action::Removed),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                ApplyOutcome::Skipped(SkipReason::AlreadyAbsent)
            }
            Err(err) => ApplyOutcome::Failed(ApplyError::io("remove", &target, err)),
        }
    }
}

fn create_entry(mirror: &Mirror, path: &Path) -> ApplyOutcome {
    // Normally handled at ingestion, but a file may have been replaced by a
    // directory of the same name since.
    if mirror.source_path(path).is_dir() {
        let target = mirror.mirror_path(path);
        return match fs::create_dir_all(&target) {
            Ok(()) => ApplyOutcome::Applied(Action::CreatedDirectory),
            Err(err) => ApplyOutcome::Failed(ApplyError::io("create directory", &target, err)),
        };
    }

    copy_into_mirror(mirror, path).into()
}

fn refresh_file(mirror: &Mirror, path: &Path) -> ApplyOutcome {
    if !mirror.mirror_path(path).is_file() {
        return ApplyOutcome::Skipped(SkipReason::NotInMirror);
    }

    // The copier replaces the mirror file atomically, which leaves the
    // previous copy in place if the source cannot be read.
    copy_into_mirror(mirror, path).into()
}

fn copy_into_mirror(mirror: &Mirror, path: &Path) -> Result<Action, ApplyError> {
    let bytes = mirror
        .copier()
        .copy_file(&mirror.source_path(path), &mirror.mirror_path(path))?;
    Ok(Action::Copied { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FsCopier, MemorySink};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Trees {
        source: TempDir,
        target: TempDir,
        mirror: Mirror,
    }

    fn trees() -> Trees {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let mirror = Mirror::new(
            source.path(),
            target.path(),
            Arc::new(FsCopier),
            Arc::new(MemorySink::new()),
        );
        Trees {
            source,
            target,
            mirror,
        }
    }

    impl Trees {
        fn write_source(&self, rel: &str, content: &str) {
            let path = self.source.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn write_mirror(&self, rel: &str, content: &str) {
            let path = self.target.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }

        fn mirror_content(&self, rel: &str) -> Option<String> {
            fs::read_to_string(self.target.path().join(rel)).ok()
        }

        fn apply(&self, record: ChangeRecord) -> ApplyOutcome {
            apply_record(&self.mirror, &record)
        }
    }

    #[test]
    fn test_created_copies_and_overwrites() {
        let t = trees();
        t.write_source("docs/new.txt", "fresh");
        t.write_mirror("docs/new.txt", "outdated");

        let outcome = t.apply(ChangeRecord::created("docs/new.txt"));

        assert!(matches!(outcome, ApplyOutcome::Applied(Action::Copied { bytes: 5 })));
        assert_eq!(t.mirror_content("docs/new.txt").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_created_for_vanished_source_is_skipped() {
        let t = trees();
        let outcome = t.apply(ChangeRecord::created("gone.txt"));
        assert!(matches!(outcome, ApplyOutcome::Skipped(SkipReason::SourceMissing)));
    }

    #[test]
    fn test_changed_only_updates_existing_mirror_files() {
        let t = trees();
        t.write_source("a.txt", "v2");
        t.write_source("b.txt", "v1");
        t.write_mirror("a.txt", "v1");

        assert!(t.apply(ChangeRecord::changed("a.txt")).is_applied());
        assert!(matches!(
            t.apply(ChangeRecord::changed("b.txt")),
            ApplyOutcome::Skipped(SkipReason::NotInMirror)
        ));

        assert_eq!(t.mirror_content("a.txt").as_deref(), Some("v2"));
        assert_eq!(t.mirror_content("b.txt"), None);
    }

    #[test]
    fn test_deleted_file_directory_and_missing() {
        let t = trees();
        t.write_mirror("old.txt", "x");
        t.write_mirror("dir/inner/file.txt", "x");

        assert!(matches!(t.apply(ChangeRecord::deleted("old.txt")), ApplyOutcome::Applied(Action::Removed)));
        assert!(matches!(
            t.apply(ChangeRecord::deleted("dir")),
            ApplyOutcome::Applied(Action::RemovedDirectory)
        ));
        assert!(matches!(
            t.apply(ChangeRecord::deleted("old.txt")),
            ApplyOutcome::Skipped(SkipReason::AlreadyAbsent)
        ));

        assert!(!t.target.path().join("old.txt").exists());
        assert!(!t.target.path().join("dir").exists());
    }

    #[test]
    fn test_file_rename_replaces_old_name() {
        let t = trees();
        t.write_source("report-final.txt", "body");
        t.write_mirror("report.txt", "body");

        let outcome = t.apply(ChangeRecord::renamed("report.txt", "report-final.txt"));

        assert!(outcome.is_applied());
        assert_eq!(t.mirror_content("report.txt"), None);
        assert_eq!(t.mirror_content("report-final.txt").as_deref(), Some("body"));
    }

    #[test]
    fn test_file_rename_to_transient_name_is_skipped() {
        let t = trees();
        t.write_mirror("doc.txt", "body");

        let outcome = t.apply(ChangeRecord::renamed("doc.txt", "doc.txt~tmp.swp"));

        assert!(matches!(outcome, ApplyOutcome::Skipped(SkipReason::TransientSource)));
        assert_eq!(t.mirror_content("doc.txt").as_deref(), Some("body"));
    }

    #[test]
    fn test_directory_rename_moves_contents() {
        let t = trees();
        t.write_mirror("A/x.txt", "x");

        let outcome = t.apply(ChangeRecord::renamed("A", "B"));

        assert!(matches!(outcome, ApplyOutcome::Applied(Action::Renamed)));
        assert!(!t.target.path().join("A").exists());
        assert_eq!(t.mirror_content("B/x.txt").as_deref(), Some("x"));
    }

    #[test]
    fn test_directory_rename_without_mirror_entry_is_skipped() {
        let t = trees();
        let outcome = t.apply(ChangeRecord::renamed("missing", "renamed"));
        assert!(matches!(outcome, ApplyOutcome::Skipped(SkipReason::NotInMirror)));
    }
}
