//! Lazy, composable scans over the pool.
//!
//! A [`LazyView`] is a deferred query plan: predicates and a projection are
//! queued up front and nothing is read until [`LazyView::collect`]. At
//! materialization time the plan is pushed down twice:
//!
//! - predicates on the partition key columns prune whole files using only
//!   the path-derived keys, and
//! - per file, only the union of predicate and projection columns is decoded
//!   (a Parquet projection mask), so filter evaluation never pays for
//!   feature columns it does not need.
//!
//! Each partition decode is independent and synchronous; batches from pruned
//! scans are concatenated in partition-key order.

use arrow::{
    array::RecordBatch,
    compute::filter_record_batch,
    error::ArrowError,
};
use bytes::Bytes;
use log::debug;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ProjectionMask},
    errors::ParquetError,
};
use snafu::prelude::*;

use crate::{
    pool::{
        predicate::{Predicate, PredicateError},
        PartitionFile, Pool,
    },
    storage::{self, StorageError},
};

/// Result alias for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while materializing a scan.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    /// A predicate or projection references a column the pool does not have.
    /// Raised before any partition data is decoded.
    #[snafu(display("Unknown column in query: {column}"))]
    UnknownColumn {
        /// The column that does not exist in the pool schema.
        column: String,
    },

    /// Storage failure while reading a partition file.
    #[snafu(display("Storage error while scanning: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },

    /// Parquet decode failure.
    #[snafu(display("Parquet read error: {source}"))]
    ParquetRead {
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Arrow failure while filtering or assembling batches.
    #[snafu(display("Arrow error while materializing scan: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// Predicate evaluation failure.
    #[snafu(display("Predicate error: {source}"))]
    Filter {
        /// Underlying predicate error.
        #[snafu(source, backtrace)]
        source: PredicateError,
    },
}

/// A deferred scan plan over a [`Pool`].
///
/// Cheap to build and consume; all I/O happens in [`LazyView::collect`].
#[derive(Debug)]
pub struct LazyView<'a> {
    pool: &'a Pool,
    predicates: Vec<Predicate>,
    projection: Option<Vec<String>>,
}

impl<'a> LazyView<'a> {
    pub(crate) fn new(pool: &'a Pool) -> Self {
        Self {
            pool,
            predicates: Vec::new(),
            projection: None,
        }
    }

    /// Adds a predicate; all predicates are ANDed together.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Restricts the materialized columns, in the given order.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Materializes the view: prunes partitions, decodes only the needed
    /// columns, filters, and projects.
    ///
    /// Returns one (possibly empty) list of record batches; batches appear
    /// in partition-key order.
    pub async fn collect(&self) -> QueryResult<Vec<RecordBatch>> {
        // Validate referenced columns against the pool's self-describing
        // schema before touching any partition data.
        let pool_schema = self.pool.schema().await?;
        for pred in &self.predicates {
            ensure!(
                pool_schema.index_of(&pred.column).is_ok(),
                UnknownColumnSnafu {
                    column: pred.column.clone(),
                }
            );
        }
        if let Some(cols) = &self.projection {
            for col in cols {
                ensure!(
                    pool_schema.index_of(col).is_ok(),
                    UnknownColumnSnafu {
                        column: col.clone(),
                    }
                );
            }
        }

        // Columns the decode actually needs.
        let decode_columns: Option<Vec<String>> = self.projection.as_ref().map(|proj| {
            let mut cols = proj.clone();
            for pred in &self.predicates {
                if !cols.contains(&pred.column) {
                    cols.push(pred.column.clone());
                }
            }
            cols
        });

        let mut out = Vec::new();
        let mut pruned = 0usize;

        for file in self.pool.partitions() {
            let keep = self
                .predicates
                .iter()
                .all(|p| p.keeps_partition(&file.key));
            if !keep {
                pruned += 1;
                continue;
            }

            let batches =
                decode_partition(self.pool, file, decode_columns.as_deref()).await?;

            for batch in batches {
                let filtered = apply_predicates(&batch, &self.predicates)?;
                if filtered.num_rows() == 0 {
                    continue;
                }
                out.push(match &self.projection {
                    Some(cols) => project_batch(&filtered, cols)?,
                    None => filtered,
                });
            }
        }

        debug!(
            "scan materialized {} batches ({pruned} partitions pruned)",
            out.len()
        );
        Ok(out)
    }
}

/// Applies all predicates to one batch, AND-combining their masks.
pub(crate) fn apply_predicates(
    batch: &RecordBatch,
    predicates: &[Predicate],
) -> QueryResult<RecordBatch> {
    let mut current = batch.clone();
    for pred in predicates {
        let mask = pred.evaluate(&current).context(FilterSnafu)?;
        current = filter_record_batch(&current, &mask).context(ArrowSnafu)?;
    }
    Ok(current)
}

/// Reorders/restricts a batch to the requested columns.
fn project_batch(batch: &RecordBatch, columns: &[String]) -> QueryResult<RecordBatch> {
    let indices = columns
        .iter()
        .map(|c| {
            batch
                .schema()
                .index_of(c)
                .map_err(|_| QueryError::UnknownColumn { column: c.clone() })
        })
        .collect::<QueryResult<Vec<_>>>()?;
    batch.project(&indices).context(ArrowSnafu)
}

/// Decodes one partition file, restricted to `columns` when given.
pub(crate) async fn decode_partition(
    pool: &Pool,
    file: &PartitionFile,
    columns: Option<&[String]>,
) -> QueryResult<Vec<RecordBatch>> {
    let bytes = storage::read_all_bytes(pool.location(), &file.rel_path)
        .await
        .context(StorageSnafu)?;

    let builder =
        ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes)).context(ParquetReadSnafu)?;

    let builder = match columns {
        Some(cols) => {
            let names: Vec<&str> = cols.iter().map(|s| s.as_str()).collect();
            let mask = ProjectionMask::columns(builder.parquet_schema(), names);
            builder.with_projection(mask)
        }
        None => builder,
    };

    let reader = builder.build().context(ParquetReadSnafu)?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.context(ArrowSnafu)?);
    }
    Ok(batches)
}
