//! Read-only handle over an existing partitioned pool.
//!
//! Opening a pool is cheap: it walks the directory tree under the root,
//! records every `season=<int>/gameId=<int>/tracking.parquet` partition it
//! finds, and reads nothing else. Path shapes that do not match the layout
//! are ignored rather than treated as errors, so stray files next to the
//! partitions are harmless.
//!
//! A `Pool` holds no lock and no open file handles. Partitions are immutable
//! once written, so any number of pools over the same root may be open at
//! once.

pub mod predicate;
pub mod scan;

use std::{
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use snafu::prelude::*;
use tokio::fs;

use crate::{
    pool::scan::{LazyView, QueryError},
    record::PartitionKey,
    storage::{self, PoolLocation},
};

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised while opening a pool.
#[derive(Debug, Snafu)]
pub enum PoolError {
    /// The root directory is missing or contains no partitions.
    #[snafu(display("No pool found at {root}: missing root or zero partitions"))]
    NotFound {
        /// The root that was probed.
        root: String,
    },

    /// Filesystem failure during discovery.
    #[snafu(display("I/O error while discovering partitions at {path}: {source}"))]
    Discover {
        /// The path being listed when the failure occurred.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// One discovered partition file.
#[derive(Clone, Debug)]
pub struct PartitionFile {
    /// Partition key parsed from the directory path.
    pub key: PartitionKey,
    /// Path of the Parquet file relative to the pool root.
    pub rel_path: PathBuf,
}

/// A logical, read-only view over all partitions under a root directory.
#[derive(Debug)]
pub struct Pool {
    location: PoolLocation,
    partitions: Vec<PartitionFile>,
    schema: OnceLock<SchemaRef>,
}

/// Parses an integer out of a `<prefix>=<int>` path segment.
fn keyed_segment(name: &std::ffi::OsStr, prefix: &str) -> Option<i64> {
    name.to_str()?.strip_prefix(prefix)?.parse().ok()
}

async fn list_dirs(path: &Path) -> PoolResult<Vec<fs::DirEntry>> {
    let mut out = Vec::new();
    let mut entries = fs::read_dir(path).await.context(DiscoverSnafu {
        path: path.display().to_string(),
    })?;
    while let Some(entry) = entries.next_entry().await.context(DiscoverSnafu {
        path: path.display().to_string(),
    })? {
        out.push(entry);
    }
    Ok(out)
}

impl Pool {
    /// Opens the pool rooted at `root`.
    ///
    /// Fails with [`PoolError::NotFound`] when the root does not exist or no
    /// partition matches the expected layout.
    pub async fn open(root: impl Into<PathBuf>) -> PoolResult<Self> {
        let root = root.into();
        if !fs::try_exists(&root).await.unwrap_or(false) {
            return NotFoundSnafu {
                root: root.display().to_string(),
            }
            .fail();
        }

        let mut partitions = Vec::new();
        for season_entry in list_dirs(&root).await? {
            let Some(season) = keyed_segment(&season_entry.file_name(), "season=") else {
                continue;
            };
            if !season_entry.path().is_dir() {
                continue;
            }
            for game_entry in list_dirs(&season_entry.path()).await? {
                let Some(game_id) = keyed_segment(&game_entry.file_name(), "gameId=") else {
                    continue;
                };
                let file = game_entry.path().join("tracking.parquet");
                if fs::try_exists(&file).await.unwrap_or(false) {
                    partitions.push(PartitionFile {
                        key: PartitionKey { season, game_id },
                        rel_path: PathBuf::from(
                            PartitionKey { season, game_id }.rel_path(),
                        ),
                    });
                }
            }
        }

        ensure!(
            !partitions.is_empty(),
            NotFoundSnafu {
                root: root.display().to_string(),
            }
        );

        // Deterministic scan order.
        partitions.sort_by_key(|p| p.key);
        debug!(
            "opened pool at {} with {} partitions",
            root.display(),
            partitions.len()
        );

        Ok(Self {
            location: PoolLocation::local(root),
            partitions,
            schema: OnceLock::new(),
        })
    }

    /// The discovered partitions, sorted by partition key.
    pub fn partitions(&self) -> &[PartitionFile] {
        &self.partitions
    }

    /// The pool's root location.
    pub fn location(&self) -> &PoolLocation {
        &self.location
    }

    /// Arrow schema of the stored data, read from the first partition file's
    /// embedded metadata and cached for the lifetime of this handle.
    ///
    /// Storage is self-describing: this is never re-validated against the
    /// ingestion-time schema registry. Partitions are immutable, so the
    /// cached copy cannot go stale while the pool is open.
    pub async fn schema(&self) -> Result<SchemaRef, QueryError> {
        if let Some(schema) = self.schema.get() {
            return Ok(schema.clone());
        }
        let first = &self.partitions[0];
        let bytes = storage::read_all_bytes(&self.location, &first.rel_path)
            .await
            .context(scan::StorageSnafu)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
            .context(scan::ParquetReadSnafu)?;
        let schema = builder.schema().clone();
        Ok(self.schema.get_or_init(|| schema).clone())
    }

    /// Starts a lazy, composable scan over the whole pool.
    ///
    /// No I/O happens until the view is materialized.
    pub fn scan(&self) -> LazyView<'_> {
        LazyView::new(self)
    }
}
