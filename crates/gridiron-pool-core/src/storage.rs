//! Filesystem primitives shared by the partition writer and the pool.
//!
//! All on-disk state lives under a single pool root. This module keeps the
//! low-level file operations in one place:
//!
//! - `write_new` for create-only writes (the default conflict-refusing path
//!   for partition files).
//! - `write_atomic` for overwrites via write-then-rename, so a reader never
//!   observes a partially written partition.
//! - `read_all_bytes` for loading a partition file into memory before
//!   building a Parquet reader over it.
//!
//! Paths handed to these helpers are relative to the pool root so that the
//! layout conventions stay in `writer`/`pool` and this module stays dumb.

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

/// The root location of a pool.
///
/// Only local filesystem roots are supported; the enum leaves room for
/// object-store backends without changing caller signatures.
#[derive(Clone, Debug)]
pub enum PoolLocation {
    /// A pool rooted at a local directory.
    Local(PathBuf),
}

impl PoolLocation {
    /// Creates a location for a local pool root.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        PoolLocation::Local(root.into())
    }

    /// Returns the absolute path for `rel` under this root.
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        match self {
            PoolLocation::Local(root) => root.join(rel),
        }
    }

    /// Returns the root path of this location.
    pub fn root(&self) -> &Path {
        match self {
            PoolLocation::Local(root) => root,
        }
    }
}

/// Errors raised by the storage layer.
#[derive(Debug, Snafu)]
pub enum StorageError {
    /// The requested path does not exist.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// Backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Create-only write found an existing file at the target path.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The path that already exists.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// Backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Any other filesystem failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the failure occurred.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// Backtrace captured when the error occurred.
        backtrace: Backtrace,
    },
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent).await.context(OtherIoSnafu {
            path: parent.display().to_string(),
        })?;
    }
    Ok(())
}

/// Removes a temporary file on drop unless disarmed after a successful rename.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we are likely already on an error path.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Writes `contents` to `rel_path` under `location`, replacing any existing
/// file atomically.
///
/// The payload goes to a `.tmp` sibling first, is synced, and is then renamed
/// over the target. A concurrent reader sees either the old file or the new
/// one, never a prefix of the new one.
pub async fn write_atomic(
    location: &PoolLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.resolve(rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = abs.with_extension("tmp");
    let mut guard = TempFileGuard::new(tmp_path.clone());

    {
        let mut file = fs::File::create(&tmp_path).await.context(OtherIoSnafu {
            path: tmp_path.display().to_string(),
        })?;

        file.write_all(contents).await.context(OtherIoSnafu {
            path: tmp_path.display().to_string(),
        })?;

        file.sync_all().await.context(OtherIoSnafu {
            path: tmp_path.display().to_string(),
        })?;
    }

    fs::rename(&tmp_path, &abs).await.context(OtherIoSnafu {
        path: abs.display().to_string(),
    })?;

    guard.disarm();
    Ok(())
}

/// Writes `contents` to a *new* file at `rel_path`, failing with
/// `StorageError::AlreadyExists` if the target is already present.
///
/// This is the default write path for partition files: re-ingesting an
/// existing partition must be an explicit decision, not an accident.
pub async fn write_new(
    location: &PoolLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.resolve(rel_path);
    create_parent_dir(&abs).await?;

    let path_str = abs.display().to_string();

    let open_result = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await;

    let mut file = match open_result {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StorageError::AlreadyExists {
                path: path_str,
                source: e,
                backtrace: Backtrace::capture(),
            });
        }
        Err(e) => {
            return Err(StorageError::OtherIo {
                path: path_str,
                source: e,
                backtrace: Backtrace::capture(),
            });
        }
    };

    file.write_all(contents).await.context(OtherIoSnafu {
        path: abs.display().to_string(),
    })?;

    file.sync_all().await.context(OtherIoSnafu {
        path: abs.display().to_string(),
    })?;

    Ok(())
}

/// Reads the full contents of `rel_path` under `location`.
///
/// Returns `StorageError::NotFound` for a missing file and
/// `StorageError::OtherIo` for any other filesystem failure.
pub async fn read_all_bytes(location: &PoolLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = location.resolve(rel_path);
    let path_str = abs.display().to_string();

    match fs::read(&abs).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(e).context(NotFoundSnafu { path: path_str })
        }
        Err(e) => Err(e).context(OtherIoSnafu { path: path_str }),
    }
}
