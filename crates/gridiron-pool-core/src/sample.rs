//! Two-phase random play sampling.
//!
//! Sampling is uniform over *plays*, not rows: a play with 900 tracking rows
//! must be no more likely to appear than a play with 200. The algorithm
//! therefore runs two independent passes over the pool:
//!
//! 1. **Select.** Scan with the caller's filters, projected down to the play
//!    identity columns only, and materialize the distinct set of qualifying
//!    plays. Memory here is proportional to the number of matching plays,
//!    never the number of matching rows, and no feature column is decoded.
//! 2. **Expand.** Re-scan only the partitions of the selected games and keep
//!    every row whose play identity was selected — every player, every
//!    frame, and the ball row, regardless of whether those rows individually
//!    satisfy the filters. The filters decide *which plays qualify*, not
//!    which rows of a qualifying play are returned.
//!
//! Selection is seeded: the qualifying plays are put in a canonical order
//! and drawn with a seeded RNG, so the same pool, filters, and seed always
//! reproduce the same training batch.

use std::collections::{BTreeSet, HashSet};

use arrow::{
    array::{Array, BooleanArray, Int64Array, RecordBatch},
    compute::{concat_batches, filter_record_batch, lexsort_to_indices, take, SortColumn},
};
use log::debug;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use snafu::prelude::*;

use crate::{
    pool::{
        predicate::Predicate,
        scan::{self, QueryError},
        Pool,
    },
    record::{PlayKey, TrackedEntity},
};

/// Result alias for sampling operations.
pub type SampleOutcome<T> = Result<T, SampleError>;

/// Errors raised by the play sampler.
#[derive(Debug, Snafu)]
pub enum SampleError {
    /// Fewer distinct plays satisfy the filters than were requested.
    ///
    /// Never silently truncated: callers size training batches on `n` and
    /// must be told when the pool cannot honor it.
    #[snafu(display(
        "Insufficient data: requested {requested} plays but only {available} qualify"
    ))]
    InsufficientData {
        /// Number of plays requested.
        requested: usize,
        /// Number of distinct qualifying plays found.
        available: usize,
    },

    /// Scan-level failure (unknown columns, storage, decode).
    #[snafu(display("Query error while sampling: {source}"))]
    Query {
        /// Underlying query error.
        #[snafu(source, backtrace)]
        source: QueryError,
    },
}

/// The materialized output of one sampling call.
///
/// Rows are contiguous per play; no ordering is guaranteed across plays.
#[derive(Debug)]
pub struct SampleResult {
    /// All rows of every selected play, as a single batch.
    pub batch: RecordBatch,
    /// The selected plays, in canonical (game, play) order.
    pub plays: Vec<PlayKey>,
}

impl SampleResult {
    /// Number of rows across all selected plays.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Decodes what row `row` describes, when the pool carries an `nflId`
    /// column.
    pub fn entity_at(&self, row: usize) -> Option<TrackedEntity> {
        let idx = self.batch.schema().index_of("nflId").ok()?;
        let col = self
            .batch
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()?;
        let nfl_id = if col.is_null(row) {
            None
        } else {
            Some(col.value(row))
        };
        Some(TrackedEntity::from_nfl_id(nfl_id))
    }
}

fn int_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array, QueryError> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| QueryError::UnknownColumn {
            column: name.to_string(),
        })?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| QueryError::UnknownColumn {
            column: name.to_string(),
        })
}

/// Phase 1: the distinct plays satisfying `filters`.
async fn qualifying_plays(
    pool: &Pool,
    filters: &[Predicate],
) -> Result<BTreeSet<PlayKey>, QueryError> {
    let mut view = pool.scan().select(["gameId", "playId"]);
    for f in filters {
        view = view.filter(f.clone());
    }

    let mut plays = BTreeSet::new();
    for batch in view.collect().await? {
        let games = int_column(&batch, "gameId")?;
        let play_ids = int_column(&batch, "playId")?;
        for row in 0..batch.num_rows() {
            plays.insert(PlayKey {
                game_id: games.value(row),
                play_id: play_ids.value(row),
            });
        }
    }
    Ok(plays)
}

/// Phase 2: every row of every selected play, with per-play contiguity.
async fn expand_plays(
    pool: &Pool,
    selected: &[PlayKey],
) -> Result<RecordBatch, QueryError> {
    let schema = pool.schema().await?;
    if selected.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }

    let games: HashSet<i64> = selected.iter().map(|k| k.game_id).collect();
    let keys: HashSet<PlayKey> = selected.iter().copied().collect();

    let mut batches = Vec::new();
    for file in pool.partitions() {
        if !games.contains(&file.key.game_id) {
            continue;
        }
        for batch in scan::decode_partition(pool, file, None).await? {
            let game_col = int_column(&batch, "gameId")?;
            let play_col = int_column(&batch, "playId")?;
            let mask: BooleanArray = (0..batch.num_rows())
                .map(|row| {
                    Some(keys.contains(&PlayKey {
                        game_id: game_col.value(row),
                        play_id: play_col.value(row),
                    }))
                })
                .collect();
            let kept = filter_record_batch(&batch, &mask)
                .map_err(|source| QueryError::Arrow { source })?;
            if kept.num_rows() > 0 {
                batches.push(kept);
            }
        }
    }

    let combined = concat_batches(&schema, &batches)
        .map_err(|source| QueryError::Arrow { source })?;

    // Group rows by play identity so each play's rows are contiguous.
    let sort_columns = vec![
        SortColumn {
            values: combined.column(combined.schema().index_of("gameId").map_err(|_| {
                QueryError::UnknownColumn {
                    column: "gameId".to_string(),
                }
            })?)
            .clone(),
            options: None,
        },
        SortColumn {
            values: combined.column(combined.schema().index_of("playId").map_err(|_| {
                QueryError::UnknownColumn {
                    column: "playId".to_string(),
                }
            })?)
            .clone(),
            options: None,
        },
    ];
    let indices = lexsort_to_indices(&sort_columns, None)
        .map_err(|source| QueryError::Arrow { source })?;
    let columns = combined
        .columns()
        .iter()
        .map(|col| take(col, &indices, None))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| QueryError::Arrow { source })?;

    RecordBatch::try_new(schema, columns).map_err(|source| QueryError::Arrow { source })
}

/// Samples `n` distinct plays satisfying `filters` and materializes every
/// row belonging to them.
///
/// `seed` makes the selection reproducible; with `None` the selection draws
/// from OS entropy. Fails with [`SampleError::InsufficientData`] when fewer
/// than `n` distinct plays qualify.
pub async fn sample_plays(
    pool: &Pool,
    n: usize,
    filters: &[Predicate],
    seed: Option<u64>,
) -> SampleOutcome<SampleResult> {
    let qualifying = qualifying_plays(pool, filters).await.context(QuerySnafu)?;
    let available = qualifying.len();
    ensure!(
        available >= n,
        InsufficientDataSnafu {
            requested: n,
            available,
        }
    );

    // BTreeSet iteration gives a canonical order, so the draw depends only
    // on the qualifying set and the seed.
    let ordered: Vec<PlayKey> = qualifying.into_iter().collect();
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let mut selected: Vec<PlayKey> = ordered.choose_multiple(&mut rng, n).copied().collect();
    selected.sort();

    debug!(
        "sampling {n} of {available} qualifying plays across {} partitions",
        pool.partitions().len()
    );

    let batch = expand_plays(pool, &selected).await.context(QuerySnafu)?;
    Ok(SampleResult {
        batch,
        plays: selected,
    })
}
