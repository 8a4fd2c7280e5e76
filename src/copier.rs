//! Single-file copy primitive used by the mirror builder and the apply pass.
//!
//! Copies go through a temporary file next to the destination which is
//! renamed over it once complete, so the mirror never holds a half-written
//! file. Permissions and modification time follow the source.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use filetime::FileTime;
use thiserror::Error;

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum CopyError {
    /// The source vanished before it could be read. Not an error for callers
    /// that replay stale events.
    #[error("source file no longer exists: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// The source exists but cannot be read, typically because it is locked
    /// by another process or access is denied.
    #[error("cannot read source file {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write destination {}: {source}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CopyError {
    pub fn is_stale(&self) -> bool {
        matches!(self, CopyError::SourceMissing { .. })
    }

    fn from_source(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            CopyError::SourceMissing {
                path: path.to_path_buf(),
            }
        } else {
            CopyError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    fn destination(path: &Path, source: io::Error) -> Self {
        CopyError::Destination {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Copies one file's bytes and metadata, overwriting the destination.
pub trait FileCopier: Send + Sync {
    /// Returns the number of bytes copied.
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64, CopyError>;
}

/// Local filesystem implementation of [`FileCopier`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCopier;

impl FileCopier for FsCopier {
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<u64, CopyError> {
        let mut reader = File::open(src).map_err(|e| CopyError::from_source(src, e))?;
        let metadata = reader
            .metadata()
            .map_err(|e| CopyError::from_source(src, e))?;
        if metadata.is_dir() {
            return Err(CopyError::SourceUnreadable {
                path: src.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "source is a directory"),
            });
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| CopyError::destination(dst, e))?;
        }

        let (guard, mut writer) = TempFileGuard::create(dst)?;
        let bytes = match io::copy(&mut reader, &mut writer) {
            Ok(bytes) => bytes,
            // Mid-copy failures are charged to the source.
            Err(e) => return Err(CopyError::from_source(src, e)),
        };
        drop(writer);

        fs::set_permissions(guard.path(), metadata.permissions())
            .map_err(|e| CopyError::destination(dst, e))?;
        let mtime = FileTime::from_last_modification_time(&metadata);
        if let Err(e) = filetime::set_file_mtime(guard.path(), mtime) {
            tracing::debug!("Could not preserve mtime on {}: {}", dst.display(), e);
        }

        guard.commit()?;
        Ok(bytes)
    }
}

/// Temporary destination file that is removed unless committed.
struct TempFileGuard {
    temp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl TempFileGuard {
    fn create(dst: &Path) -> Result<(Self, File), CopyError> {
        let name = dst.file_name().ok_or_else(|| {
            CopyError::destination(
                dst,
                io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"),
            )
        })?;

        loop {
            let temp_path = temp_path_for(dst, name);
            match OpenOptions::new().write(true).create_new(true).open(&temp_path) {
                Ok(file) => {
                    let guard = Self {
                        temp_path,
                        final_path: dst.to_path_buf(),
                        committed: false,
                    };
                    return Ok((guard, file));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(CopyError::destination(dst, e)),
            }
        }
    }

    fn path(&self) -> &Path {
        &self.temp_path
    }

    fn commit(mut self) -> Result<(), CopyError> {
        if self.final_path.is_dir() {
            return Err(CopyError::destination(
                &self.final_path,
                io::Error::new(io::ErrorKind::Other, "a directory is in the way"),
            ));
        }
        fs::rename(&self.temp_path, &self.final_path)
            .map_err(|e| CopyError::destination(&self.final_path, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

fn temp_path_for(dst: &Path, name: &std::ffi::OsStr) -> PathBuf {
    let unique = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
    let mut temp_name = OsString::from(".");
    temp_name.push(name);
    temp_name.push(format!(".treemirror-{}-{}.tmp", std::process::id(), unique));
    dst.with_file_name(temp_name)
}
