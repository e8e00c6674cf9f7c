//! Byte-level storage adapter for log artifacts.
//!
//! The transaction log only ever needs four primitives from its backing
//! store: existence checks, non-recursive listing, whole-file reads, and
//! whole-file publishes. This module provides them for a local filesystem
//! root and keeps the path conventions out of the engine:
//!
//! - [`set_bytes`] publishes atomically (write to a temporary file, sync,
//!   rename), so readers only ever observe fully written artifacts.
//! - [`set_bytes_new`] uses create-only-if-absent semantics and is the
//!   at-most-once guard for per-version commit files.
//! - [`list_files`] returns unordered [`FileRef`] entries with paths
//!   relative to the log root.
//!
//! The adapter holds no locks and no state beyond the root path; a
//! [`LogLocation`] is a cheap value shared by every reader and writer of the
//! same log. Object-store backends can be added as further enum arms without
//! touching the engine.

use snafu::{Backtrace, prelude::*};
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Location of a transaction log root.
///
/// Abstracts over storage backends; currently only the local filesystem is
/// implemented.
#[derive(Clone, Debug)]
pub enum LogLocation {
    /// A log rooted at a local filesystem directory.
    Local(PathBuf),
    // Future:
    // S3 { bucket: String, prefix: String },
}

impl LogLocation {
    /// Creates a `LogLocation` for a local filesystem root.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        LogLocation::Local(root.into())
    }
}

/// Metadata handle for a listed file; cheap to construct and copy around.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileRef {
    /// Path relative to the log root, `/`-separated.
    pub path: String,
}

impl FileRef {
    /// The final path component.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Errors surfaced by storage operations.
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// The requested path does not exist.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Create-new was requested but the path is already occupied.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The occupied path.
        path: String,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error on the local filesystem.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    LocalIo {
        /// The path where the I/O error occurred.
        path: String,
        /// The underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

fn join_local(location: &LogLocation, rel: &str) -> PathBuf {
    match location {
        LogLocation::Local(root) => root.join(rel),
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).await.context(LocalIoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Check whether `rel_path` exists under `location`.
pub async fn exists(location: &LogLocation, rel_path: &str) -> StorageResult<bool> {
    let abs = join_local(location, rel_path);
    fs::try_exists(&abs).await.context(LocalIoSnafu {
        path: abs.display().to_string(),
    })
}

/// Non-recursive listing of the files directly under `rel_dir`.
///
/// Returns [`FileRef`]s with paths relative to the log root. Ordering is
/// unspecified; directories are skipped. A missing directory is `NotFound`.
pub async fn list_files(location: &LogLocation, rel_dir: &str) -> StorageResult<Vec<FileRef>> {
    let abs = join_local(location, rel_dir);

    let mut entries = match fs::read_dir(&abs).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return NotFoundSnafu {
                path: abs.display().to_string(),
            }
            .fail();
        }
        Err(e) => {
            return Err(e).context(LocalIoSnafu {
                path: abs.display().to_string(),
            });
        }
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.context(LocalIoSnafu {
        path: abs.display().to_string(),
    })? {
        let file_type = entry.file_type().await.context(LocalIoSnafu {
            path: entry.path().display().to_string(),
        })?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push(FileRef {
            path: format!("{rel_dir}/{name}"),
        });
    }

    Ok(files)
}

/// Read the full contents of `rel_path`.
pub async fn get_bytes(location: &LogLocation, rel_path: &str) -> StorageResult<Vec<u8>> {
    let abs = join_local(location, rel_path);

    match fs::read(&abs).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => NotFoundSnafu {
            path: abs.display().to_string(),
        }
        .fail(),
        Err(e) => Err(e).context(LocalIoSnafu {
            path: abs.display().to_string(),
        }),
    }
}

/// Publish `contents` at `rel_path`, overwriting any existing file.
///
/// Writes to a sibling temporary file, syncs it, then renames into place so
/// concurrent readers never observe a partially written artifact. Parent
/// directories are created as needed.
pub async fn set_bytes(
    location: &LogLocation,
    rel_path: &str,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");

    {
        let mut file = fs::File::create(&tmp_path).await.context(LocalIoSnafu {
            path: tmp_path.display().to_string(),
        })?;

        file.write_all(contents).await.context(LocalIoSnafu {
            path: tmp_path.display().to_string(),
        })?;

        file.sync_all().await.context(LocalIoSnafu {
            path: tmp_path.display().to_string(),
        })?;
    }

    fs::rename(&tmp_path, &abs).await.context(LocalIoSnafu {
        path: abs.display().to_string(),
    })?;

    Ok(())
}

/// Create a *new* file at `rel_path` with `contents`, failing with
/// [`StorageError::AlreadyExists`] if the path is occupied.
///
/// Commit files rely on this for per-version uniqueness: of two writers
/// racing for the same slot, at most one succeeds.
pub async fn set_bytes_new(
    location: &LogLocation,
    rel_path: &str,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = join_local(location, rel_path);
    create_parent_dir(&abs).await?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await
        .map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                StorageError::AlreadyExists {
                    path: abs.display().to_string(),
                    backtrace: Backtrace::capture(),
                }
            } else {
                StorageError::LocalIo {
                    path: abs.display().to_string(),
                    source: e,
                    backtrace: Backtrace::capture(),
                }
            }
        })?;

    file.write_all(contents).await.context(LocalIoSnafu {
        path: abs.display().to_string(),
    })?;

    file.sync_all().await.context(LocalIoSnafu {
        path: abs.display().to_string(),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn set_bytes_publishes_contents() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        set_bytes(&location, "branch/artifact.json", b"{\"a\":1}").await?;

        let read_back = get_bytes(&location, "branch/artifact.json").await?;
        assert_eq!(read_back, b"{\"a\":1}");
        Ok(())
    }

    #[tokio::test]
    async fn set_bytes_creates_parent_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        set_bytes(&location, "_deeplake_log/_meta/file.json", b"x").await?;

        assert!(tmp.path().join("_deeplake_log/_meta/file.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn set_bytes_overwrites_and_leaves_no_tmp_file() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        set_bytes(&location, "pointer.json", b"old").await?;
        set_bytes(&location, "pointer.json", b"new").await?;

        assert_eq!(get_bytes(&location, "pointer.json").await?, b"new");
        assert!(!tmp.path().join("pointer.tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn get_bytes_missing_file_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        let err = get_bytes(&location, "absent.json").await.expect_err("missing file");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn set_bytes_new_rejects_occupied_path() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        set_bytes_new(&location, "slot.json", b"winner").await?;
        let err = set_bytes_new(&location, "slot.json", b"loser")
            .await
            .expect_err("occupied slot");

        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        // The first write is untouched.
        assert_eq!(get_bytes(&location, "slot.json").await?, b"winner");
        Ok(())
    }

    #[tokio::test]
    async fn list_files_returns_root_relative_paths_and_skips_dirs() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        set_bytes(&location, "dir/a.json", b"a").await?;
        set_bytes(&location, "dir/b.json", b"b").await?;
        set_bytes(&location, "dir/nested/c.json", b"c").await?;

        let mut files = list_files(&location, "dir").await?;
        files.sort();

        assert_eq!(
            files,
            vec![
                FileRef { path: "dir/a.json".to_string() },
                FileRef { path: "dir/b.json".to_string() },
            ]
        );
        assert_eq!(files[0].file_name(), "a.json");
        Ok(())
    }

    #[tokio::test]
    async fn list_files_missing_dir_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        let err = list_files(&location, "nope").await.expect_err("missing dir");
        assert!(matches!(err, StorageError::NotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn exists_reflects_files_and_directories() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        assert!(!exists(&location, "dir").await?);
        set_bytes(&location, "dir/file.json", b"x").await?;
        assert!(exists(&location, "dir").await?);
        assert!(exists(&location, "dir/file.json").await?);
        Ok(())
    }
}
