//! Partitioned Parquet writer for canonical record batches.
//!
//! Rows are grouped by their `(season, gameId)` partition key and written as
//! one Parquet file per partition under
//! `<root>/season=<S>/gameId=<G>/tracking.parquet`. Two policies protect the
//! append-only pool invariant:
//!
//! - By default an existing partition file is a conflict: the partition is
//!   skipped and reported, sibling partitions still go through.
//! - With `overwrite` the replacement happens via the storage layer's atomic
//!   write-then-rename, so a concurrent reader never sees a torn file.
//!
//! Dry-run mode performs the same grouping and reports per-partition row
//! counts and byte estimates without touching anything under the root.

use std::collections::BTreeMap;

use arrow::{
    array::{Array, Int64Array, RecordBatch, UInt32Array},
    compute::take,
    error::ArrowError,
};
use log::info;
use parquet::{arrow::ArrowWriter, errors::ParquetError};
use snafu::prelude::*;

use crate::{
    record::PartitionKey,
    storage::{self, PoolLocation, StorageError},
};

/// Result alias for writer operations.
pub type WriteResult<T> = Result<T, WriteError>;

/// Errors raised while writing partitions.
///
/// Per-partition failures do not surface here; they are collected in the
/// [`WriteReport`] so one bad partition cannot block its siblings.
#[derive(Debug, Snafu)]
pub enum WriteError {
    /// The batch lacks a partition key column.
    #[snafu(display("Batch is missing partition key column {column}"))]
    MissingKeyColumn {
        /// The absent column.
        column: String,
    },

    /// A partition key column has the wrong type or contains nulls.
    #[snafu(display("Partition key column {column} must be non-null Int64"))]
    InvalidKeyColumn {
        /// The offending column.
        column: String,
    },

    /// The write target already exists and overwrite was not requested.
    #[snafu(display("Partition file already exists: {path}"))]
    Conflict {
        /// Path of the existing partition file.
        path: String,
    },

    /// Storage failure under the pool root.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },

    /// Parquet serialization failure.
    #[snafu(display("Parquet write error: {source}"))]
    Parquet {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Arrow failure while regrouping the batch.
    #[snafu(display("Arrow error while partitioning batch: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// Write vs. validate-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Group and report, but touch no filesystem state.
    DryRun,
    /// Write partition files.
    Write,
}

/// Caller policy for a write pass.
#[derive(Clone, Copy, Debug)]
pub struct WriteOptions {
    /// Dry-run or live write.
    pub mode: WriteMode,
    /// Replace existing partition files instead of treating them as
    /// conflicts.
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            mode: WriteMode::Write,
            overwrite: false,
        }
    }
}

/// What happened (or would happen) to one partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionAction {
    /// Dry run: the partition would be written.
    Planned,
    /// A new partition file was created.
    Created,
    /// An existing partition file was atomically replaced.
    Overwritten,
}

/// Per-partition outcome.
#[derive(Debug)]
pub struct PartitionReport {
    /// The partition key.
    pub key: PartitionKey,
    /// Rows routed to this partition.
    pub rows: usize,
    /// In-memory byte size estimate of the partition's data.
    pub bytes_estimate: usize,
    /// Outcome for this partition.
    pub action: PartitionAction,
}

/// Aggregated outcome of a write pass.
///
/// Every row of the input batch is accounted for: it either lands in a
/// partition listed in `partitions` or in one listed in `failed`. Nothing is
/// dropped silently.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Partitions written (or planned, for a dry run).
    pub partitions: Vec<PartitionReport>,
    /// Partitions that failed, with the error that stopped them.
    pub failed: Vec<(PartitionKey, WriteError)>,
}

impl WriteReport {
    /// Number of partitions newly created.
    pub fn created(&self) -> usize {
        self.count(PartitionAction::Created)
    }

    /// Number of partitions atomically replaced.
    pub fn overwritten(&self) -> usize {
        self.count(PartitionAction::Overwritten)
    }

    /// Number of partitions a dry run would write.
    pub fn planned(&self) -> usize {
        self.count(PartitionAction::Planned)
    }

    /// True when any partition failed with a conflict.
    pub fn has_conflicts(&self) -> bool {
        self.failed
            .iter()
            .any(|(_, e)| matches!(e, WriteError::Conflict { .. }))
    }

    fn count(&self, action: PartitionAction) -> usize {
        self.partitions
            .iter()
            .filter(|p| p.action == action)
            .count()
    }
}

fn key_column<'a>(batch: &'a RecordBatch, name: &str) -> WriteResult<&'a Int64Array> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| WriteError::MissingKeyColumn {
            column: name.to_string(),
        })?;
    let col = batch
        .column(idx)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| WriteError::InvalidKeyColumn {
            column: name.to_string(),
        })?;
    ensure!(
        col.null_count() == 0,
        InvalidKeyColumnSnafu { column: name }
    );
    Ok(col)
}

fn slice_partition(batch: &RecordBatch, indices: &[u32]) -> WriteResult<RecordBatch> {
    let indices = UInt32Array::from(indices.to_vec());
    let columns = batch
        .columns()
        .iter()
        .map(|col| take(col, &indices, None))
        .collect::<Result<Vec<_>, _>>()
        .context(ArrowSnafu)?;
    RecordBatch::try_new(batch.schema(), columns).context(ArrowSnafu)
}

fn to_parquet_bytes(batch: &RecordBatch) -> WriteResult<Vec<u8>> {
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None).context(ParquetSnafu)?;
    writer.write(batch).context(ParquetSnafu)?;
    writer.close().context(ParquetSnafu)?;
    Ok(buf)
}

async fn write_one(
    location: &PoolLocation,
    key: PartitionKey,
    part: &RecordBatch,
    overwrite: bool,
) -> WriteResult<PartitionAction> {
    let rel = std::path::PathBuf::from(key.rel_path());
    let bytes = to_parquet_bytes(part)?;

    if overwrite {
        let existed = location.resolve(&rel).exists();
        storage::write_atomic(location, &rel, &bytes)
            .await
            .context(StorageSnafu)?;
        if existed {
            Ok(PartitionAction::Overwritten)
        } else {
            Ok(PartitionAction::Created)
        }
    } else {
        match storage::write_new(location, &rel, &bytes).await {
            Ok(()) => Ok(PartitionAction::Created),
            Err(StorageError::AlreadyExists { path, .. }) => ConflictSnafu { path }.fail(),
            Err(e) => Err(e).context(StorageSnafu),
        }
    }
}

/// Groups `batch` by partition key and writes (or plans) one Parquet file per
/// partition under `location`.
///
/// The top-level error covers only malformed input (missing or invalid key
/// columns); everything that goes wrong for an individual partition is
/// reported in the returned [`WriteReport`].
pub async fn write_partitions(
    batch: &RecordBatch,
    location: &PoolLocation,
    options: WriteOptions,
) -> WriteResult<WriteReport> {
    let seasons = key_column(batch, "season")?;
    let games = key_column(batch, "gameId")?;

    let mut groups: BTreeMap<PartitionKey, Vec<u32>> = BTreeMap::new();
    for row in 0..batch.num_rows() {
        let key = PartitionKey {
            season: seasons.value(row),
            game_id: games.value(row),
        };
        groups.entry(key).or_default().push(row as u32);
    }

    let mut report = WriteReport::default();

    for (key, indices) in groups {
        let part = slice_partition(batch, &indices)?;
        let rows = part.num_rows();
        let bytes_estimate = part.get_array_memory_size();

        match options.mode {
            WriteMode::DryRun => {
                report.partitions.push(PartitionReport {
                    key,
                    rows,
                    bytes_estimate,
                    action: PartitionAction::Planned,
                });
            }
            WriteMode::Write => match write_one(location, key, &part, options.overwrite).await {
                Ok(action) => {
                    info!("wrote partition {key}: {rows} rows");
                    report.partitions.push(PartitionReport {
                        key,
                        rows,
                        bytes_estimate,
                        action,
                    });
                }
                Err(e) => {
                    info!("partition {key} failed: {e}");
                    report.failed.push((key, e));
                }
            },
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float32Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use bytes::Bytes;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::sync::Arc;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn canonical_batch(rows: &[(i64, i64, i64, f32)]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("season", DataType::Int64, false),
            Field::new("gameId", DataType::Int64, false),
            Field::new("playId", DataType::Int64, false),
            Field::new("x", DataType::Float32, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.1))),
                Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.2))),
                Arc::new(Float32Array::from_iter_values(rows.iter().map(|r| r.3))),
            ],
        )
        .expect("valid test batch")
    }

    fn read_partition_rows(path: &std::path::Path) -> usize {
        let bytes = Bytes::from(std::fs::read(path).expect("partition file readable"));
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .expect("valid parquet")
            .build()
            .expect("reader");
        reader.map(|b| b.expect("batch").num_rows()).sum()
    }

    #[tokio::test]
    async fn dry_run_reports_without_touching_disk() -> TestResult {
        let tmp = TempDir::new()?;
        let location = PoolLocation::local(tmp.path());
        let batch = canonical_batch(&[
            (2021, 2021090900, 10, 1.0),
            (2021, 2021090900, 10, 2.0),
            (2021, 2021091200, 5, 3.0),
        ]);

        let report = write_partitions(
            &batch,
            &location,
            WriteOptions {
                mode: WriteMode::DryRun,
                overwrite: false,
            },
        )
        .await?;

        assert_eq!(report.planned(), 2);
        assert_eq!(report.partitions[0].rows, 2);
        assert_eq!(report.partitions[1].rows, 1);
        assert!(report.partitions.iter().all(|p| p.bytes_estimate > 0));
        assert!(report.failed.is_empty());

        // Nothing may exist under the root after a dry run.
        assert_eq!(std::fs::read_dir(tmp.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn write_creates_one_file_per_partition() -> TestResult {
        let tmp = TempDir::new()?;
        let location = PoolLocation::local(tmp.path());
        let batch = canonical_batch(&[
            (2021, 2021090900, 10, 1.0),
            (2021, 2021091200, 5, 2.0),
            (2021, 2021090900, 11, 3.0),
        ]);

        let report = write_partitions(&batch, &location, WriteOptions::default()).await?;

        assert_eq!(report.created(), 2);
        assert_eq!(
            read_partition_rows(
                &tmp.path()
                    .join("season=2021/gameId=2021090900/tracking.parquet")
            ),
            2
        );
        assert_eq!(
            read_partition_rows(
                &tmp.path()
                    .join("season=2021/gameId=2021091200/tracking.parquet")
            ),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn conflict_skips_partition_but_not_siblings() -> TestResult {
        let tmp = TempDir::new()?;
        let location = PoolLocation::local(tmp.path());

        let first = canonical_batch(&[(2021, 2021090900, 10, 1.0)]);
        write_partitions(&first, &location, WriteOptions::default()).await?;

        let second = canonical_batch(&[
            (2021, 2021090900, 99, 9.0),
            (2021, 2021091200, 5, 2.0),
        ]);
        let report = write_partitions(&second, &location, WriteOptions::default()).await?;

        assert_eq!(report.created(), 1);
        assert!(report.has_conflicts());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].0,
            PartitionKey {
                season: 2021,
                game_id: 2021090900
            }
        );

        // The conflicting partition keeps its original contents.
        assert_eq!(
            read_partition_rows(
                &tmp.path()
                    .join("season=2021/gameId=2021090900/tracking.parquet")
            ),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn overwrite_replaces_atomically_and_is_idempotent() -> TestResult {
        let tmp = TempDir::new()?;
        let location = PoolLocation::local(tmp.path());
        let batch = canonical_batch(&[
            (2021, 2021090900, 10, 1.0),
            (2021, 2021090900, 10, 2.0),
        ]);

        let opts = WriteOptions {
            mode: WriteMode::Write,
            overwrite: true,
        };

        let first = write_partitions(&batch, &location, opts).await?;
        assert_eq!(first.created(), 1);
        assert_eq!(first.overwritten(), 0);

        let second = write_partitions(&batch, &location, opts).await?;
        assert_eq!(second.overwritten(), 1);

        // Same input twice: identical partition row counts both times.
        let part = tmp
            .path()
            .join("season=2021/gameId=2021090900/tracking.parquet");
        assert_eq!(read_partition_rows(&part), 2);
        assert!(!part.with_extension("tmp").exists());
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_column_is_a_top_level_error() -> TestResult {
        let tmp = TempDir::new()?;
        let location = PoolLocation::local(tmp.path());

        let schema = Arc::new(Schema::new(vec![Field::new(
            "x",
            DataType::Float32,
            true,
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Float32Array::from_iter_values([1.0]))],
        )?;

        let err = write_partitions(&batch, &location, WriteOptions::default())
            .await
            .expect_err("no partition keys in batch");
        assert!(matches!(err, WriteError::MissingKeyColumn { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() -> TestResult {
        let tmp = TempDir::new()?;
        let location = PoolLocation::local(tmp.path());
        let batch = canonical_batch(&[]);

        let report = write_partitions(&batch, &location, WriteOptions::default()).await?;

        assert!(report.partitions.is_empty());
        assert!(report.failed.is_empty());
        Ok(())
    }
}
