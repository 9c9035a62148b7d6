//! Normalization of raw tracking exports onto the canonical schema.
//!
//! Raw CSV exports differ in column naming and casing across source vintages
//! (`gameId` vs `game_id`), carry extra columns we do not keep, and contain
//! values that do not always parse as their declared type. The normalizer:
//!
//! - matches raw columns to canonical ones case-insensitively via the
//!   schema's alias lists, dropping (and reporting) everything unmatched;
//! - fails the whole input when a required canonical column has no source
//!   column at all;
//! - coerces each value to the declared semantic type, nulling uncoercible
//!   values in nullable columns and rejecting the containing row otherwise —
//!   a bad row never fails the ingest;
//! - derives the partition key: `season` comes from the literal column when
//!   present (validated against the leading digits of `gameId`; a mismatch
//!   rejects the row) and is otherwise derived from `gameId`. A `gameId`
//!   that is not the ten-digit identifier shape rejects the row outright.
//!
//! The returned [`IngestReport`] is exactly what a dry run surfaces: rows
//! read/accepted/rejected with reasons, dropped raw columns, the distinct
//! partition keys touched, and summary statistics over games, plays, and
//! frames.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs::File,
    io::{Read, Seek},
    path::Path,
    sync::Arc,
};

use arrow::{
    array::{
        Array, ArrayRef, BooleanBuilder, Date32Builder, Float32Builder, Int64Builder,
        RecordBatch, StringArray, StringBuilder,
    },
    datatypes::{DataType, Field, Schema as ArrowSchema},
    error::ArrowError,
};
use arrow_csv::{reader::Format, ReaderBuilder};
use chrono::NaiveDate;
use log::debug;
use snafu::prelude::*;

use crate::{
    record::{PartitionKey, PlayKey, TrackedEntity},
    schema::{SchemaDefinition, SemanticType},
};

/// Result alias for normalization operations.
pub type NormalizeResult<T> = Result<T, NormalizeError>;

/// Errors that abort a whole input file (row-level problems are recovered by
/// rejection and never surface here).
#[derive(Debug, Snafu)]
pub enum NormalizeError {
    /// The input file could not be opened.
    #[snafu(display("Cannot open input {path}: {source}"))]
    Open {
        /// Path of the input file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV decoding failed.
    #[snafu(display("CSV decode error: {source}"))]
    Csv {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// A required canonical column has no matching raw column.
    #[snafu(display("Raw input is missing required column {column}"))]
    MissingColumn {
        /// The canonical column that could not be matched.
        column: String,
    },

    /// The schema does not declare the `(season, gameId)` partition keys this
    /// pipeline partitions by.
    #[snafu(display("Schema must declare {column} as a partition key"))]
    UnsupportedPartitioning {
        /// The partition key column that is missing.
        column: String,
    },

    /// Building the canonical record batch failed.
    #[snafu(display("Arrow error while building canonical batch: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// Aggregated outcome of normalizing one or more inputs.
///
/// This is the full dry-run output: nothing here requires a write to have
/// happened.
#[derive(Debug, Default, Clone)]
pub struct IngestReport {
    /// Total raw rows read.
    pub rows_read: usize,
    /// Rows that passed coercion and key derivation.
    pub rows_accepted: usize,
    /// Rows rejected, by reason.
    pub rejected: BTreeMap<String, usize>,
    /// Raw columns that matched no canonical column and were dropped.
    pub dropped_columns: Vec<String>,
    /// Distinct partition keys touched by accepted rows.
    pub partitions: BTreeSet<PartitionKey>,
    /// Distinct plays touched by accepted rows.
    pub plays: HashSet<PlayKey>,
    /// Accepted rows describing the ball rather than a player.
    pub ball_rows: usize,
    /// Largest frame counter seen across accepted rows.
    pub max_frame_id: Option<i64>,
}

impl IngestReport {
    /// Total rejected row count across all reasons.
    pub fn rows_rejected(&self) -> usize {
        self.rejected.values().sum()
    }

    fn reject(&mut self, reason: String) {
        *self.rejected.entry(reason).or_insert(0) += 1;
    }

    /// Folds another report (for example, from a sibling input file) into
    /// this one.
    pub fn merge(&mut self, other: IngestReport) {
        self.rows_read += other.rows_read;
        self.rows_accepted += other.rows_accepted;
        for (reason, count) in other.rejected {
            *self.rejected.entry(reason).or_insert(0) += count;
        }
        for col in other.dropped_columns {
            if !self.dropped_columns.contains(&col) {
                self.dropped_columns.push(col);
            }
        }
        self.partitions.extend(other.partitions);
        self.plays.extend(other.plays);
        self.ball_rows += other.ball_rows;
        self.max_frame_id = self.max_frame_id.max(other.max_frame_id);
    }
}

/// A value after type coercion, aligned with one canonical column.
#[derive(Debug, Clone, PartialEq)]
enum Coerced {
    Int(Option<i64>),
    Float(Option<f32>),
    Str(Option<String>),
    Bool(Option<bool>),
    Date(Option<i32>),
}

fn is_missing(raw: &str) -> bool {
    let t = raw.trim();
    t.is_empty() || t.eq_ignore_ascii_case("na") || t.eq_ignore_ascii_case("null")
}

/// Coerces one raw cell. `Ok(..(None))` means a representable null;
/// `Err(())` means the value exists but cannot be cast.
fn coerce(raw: Option<&str>, dtype: SemanticType) -> Result<Coerced, ()> {
    let raw = match raw {
        Some(s) if !is_missing(s) => s.trim(),
        _ => {
            return Ok(match dtype {
                SemanticType::Int => Coerced::Int(None),
                SemanticType::Float => Coerced::Float(None),
                SemanticType::Str | SemanticType::Categorical => Coerced::Str(None),
                SemanticType::Bool => Coerced::Bool(None),
                SemanticType::Date => Coerced::Date(None),
            });
        }
    };

    match dtype {
        SemanticType::Int => raw.parse::<i64>().map(|v| Coerced::Int(Some(v))).map_err(|_| ()),
        SemanticType::Float => raw
            .parse::<f32>()
            .map(|v| Coerced::Float(Some(v)))
            .map_err(|_| ()),
        SemanticType::Str | SemanticType::Categorical => Ok(Coerced::Str(Some(raw.to_string()))),
        SemanticType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Coerced::Bool(Some(true))),
            "false" | "0" => Ok(Coerced::Bool(Some(false))),
            _ => Err(()),
        },
        SemanticType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(|d| {
                let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is valid");
                Coerced::Date(Some((d - epoch).num_days() as i32))
            })
            .map_err(|_| ()),
    }
}

/// Column-wise builder for the canonical batch.
enum ColumnData {
    Int(Int64Builder),
    Float(Float32Builder),
    Str(StringBuilder),
    Bool(BooleanBuilder),
    Date(Date32Builder),
}

impl ColumnData {
    fn for_type(dtype: SemanticType) -> Self {
        match dtype {
            SemanticType::Int => ColumnData::Int(Int64Builder::new()),
            SemanticType::Float => ColumnData::Float(Float32Builder::new()),
            SemanticType::Str | SemanticType::Categorical => {
                ColumnData::Str(StringBuilder::new())
            }
            SemanticType::Bool => ColumnData::Bool(BooleanBuilder::new()),
            SemanticType::Date => ColumnData::Date(Date32Builder::new()),
        }
    }

    fn append(&mut self, value: &Coerced) {
        match (self, value) {
            (ColumnData::Int(b), Coerced::Int(v)) => b.append_option(*v),
            (ColumnData::Float(b), Coerced::Float(v)) => b.append_option(*v),
            (ColumnData::Str(b), Coerced::Str(v)) => b.append_option(v.as_deref()),
            (ColumnData::Bool(b), Coerced::Bool(v)) => b.append_option(*v),
            (ColumnData::Date(b), Coerced::Date(v)) => b.append_option(*v),
            // Coercion always produces the variant matching the declared type.
            _ => unreachable!("coerced value does not match column type"),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnData::Int(b) => Arc::new(b.finish()),
            ColumnData::Float(b) => Arc::new(b.finish()),
            ColumnData::Str(b) => Arc::new(b.finish()),
            ColumnData::Bool(b) => Arc::new(b.finish()),
            ColumnData::Date(b) => Arc::new(b.finish()),
        }
    }
}

/// Valid game identifiers are exactly ten digits: the season in the leading
/// four, the month/day/sequence in the rest. Anything else has no meaningful
/// season to derive.
fn is_valid_game_id(game_id: i64) -> bool {
    (1_000_000_000..=9_999_999_999).contains(&game_id)
}

/// Season encoded in the leading four digits of a ten-digit game identifier.
fn season_of_game(game_id: i64) -> i64 {
    game_id / 1_000_000
}

/// Normalizes a raw CSV file into a canonical record batch.
pub fn normalize_csv(
    path: impl AsRef<Path>,
    schema: &SchemaDefinition,
) -> NormalizeResult<(RecordBatch, IngestReport)> {
    let path = path.as_ref();
    let file = File::open(path).context(OpenSnafu {
        path: path.display().to_string(),
    })?;
    debug!("normalizing {}", path.display());
    normalize_reader(file, schema)
}

/// Normalizes CSV content from any seekable reader.
///
/// The reader is scanned once to learn the raw header, rewound, and then
/// decoded with every column as text so that type coercion (and its row-level
/// rejection semantics) stays under this module's control rather than the CSV
/// decoder's.
pub fn normalize_reader<R: Read + Seek>(
    mut input: R,
    schema: &SchemaDefinition,
) -> NormalizeResult<(RecordBatch, IngestReport)> {
    // Partitioning contract: this pipeline places files by (season, gameId).
    for key in ["season", "gameId"] {
        let declared = schema.column(key).map(|c| c.partition_key).unwrap_or(false);
        ensure!(declared, UnsupportedPartitioningSnafu { column: key });
    }

    let format = Format::default().with_header(true);
    let (raw_schema, _) = format
        .infer_schema(&mut input, Some(1))
        .context(CsvSnafu)?;
    input.rewind().map_err(|e| NormalizeError::Csv {
        source: ArrowError::CsvError(e.to_string()),
    })?;

    let headers: Vec<String> = raw_schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    // Decode everything as nullable text; coercion happens per value below.
    let text_fields: Vec<Field> = headers
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    let text_schema = Arc::new(ArrowSchema::new(text_fields));

    let reader = ReaderBuilder::new(text_schema)
        .with_header(true)
        .with_batch_size(8192)
        .build(input)
        .context(CsvSnafu)?;

    let mut report = IngestReport::default();

    // Map each canonical column to its raw source column, if any.
    let sources: Vec<Option<usize>> = schema
        .columns()
        .iter()
        .map(|spec| headers.iter().position(|h| spec.matches(h)))
        .collect();

    report.dropped_columns = headers
        .iter()
        .filter(|h| !schema.columns().iter().any(|spec| spec.matches(h)))
        .cloned()
        .collect();

    // Required canonical columns must have a source; season is the one
    // exception, since it can be derived from gameId.
    for (spec, source) in schema.columns().iter().zip(&sources) {
        if source.is_none() && !spec.nullable && spec.name != "season" {
            return MissingColumnSnafu {
                column: spec.name.clone(),
            }
            .fail();
        }
    }

    let season_idx = schema
        .columns()
        .iter()
        .position(|c| c.name == "season")
        .expect("season declared, checked above");
    let game_idx = schema
        .columns()
        .iter()
        .position(|c| c.name == "gameId")
        .expect("gameId declared, checked above");
    let play_idx = schema.columns().iter().position(|c| c.name == "playId");
    let frame_idx = schema.columns().iter().position(|c| c.name == "frameId");
    let nfl_idx = schema.columns().iter().position(|c| c.name == "nflId");

    let mut builders: Vec<ColumnData> = schema
        .columns()
        .iter()
        .map(|c| ColumnData::for_type(c.dtype))
        .collect();

    for batch in reader {
        let batch = batch.context(CsvSnafu)?;
        let text_columns: Vec<&StringArray> = batch
            .columns()
            .iter()
            .map(|c| {
                c.as_any()
                    .downcast_ref::<StringArray>()
                    .expect("reader schema declares Utf8 columns")
            })
            .collect();

        'rows: for row in 0..batch.num_rows() {
            report.rows_read += 1;

            let cell = |source: Option<usize>| -> Option<&str> {
                let idx = source?;
                let col = text_columns[idx];
                if col.is_null(row) {
                    None
                } else {
                    Some(col.value(row))
                }
            };

            // Partition key first: a row without a valid gameId has no home.
            let game_id = match coerce(cell(sources[game_idx]), SemanticType::Int) {
                Ok(Coerced::Int(Some(v))) if is_valid_game_id(v) => v,
                _ => {
                    report.reject("invalid gameId".to_string());
                    continue;
                }
            };

            let derived_season = season_of_game(game_id);
            let season = match coerce(cell(sources[season_idx]), SemanticType::Int) {
                Ok(Coerced::Int(Some(v))) if v != derived_season => {
                    report.reject("season mismatch".to_string());
                    continue;
                }
                Ok(Coerced::Int(Some(v))) => v,
                _ => derived_season,
            };

            let mut values: Vec<Coerced> = Vec::with_capacity(schema.columns().len());
            for (idx, spec) in schema.columns().iter().enumerate() {
                if idx == game_idx {
                    values.push(Coerced::Int(Some(game_id)));
                    continue;
                }
                if idx == season_idx {
                    values.push(Coerced::Int(Some(season)));
                    continue;
                }

                let coerced = match coerce(cell(sources[idx]), spec.dtype) {
                    Ok(v) => v,
                    Err(()) if spec.nullable => {
                        // Uncoercible but nullable: degrade to null.
                        coerce(None, spec.dtype).expect("null is always representable")
                    }
                    Err(()) => {
                        report.reject(format!("invalid value in {}", spec.name));
                        continue 'rows;
                    }
                };

                let is_null = matches!(
                    coerced,
                    Coerced::Int(None)
                        | Coerced::Float(None)
                        | Coerced::Str(None)
                        | Coerced::Bool(None)
                        | Coerced::Date(None)
                );
                if is_null && !spec.nullable {
                    report.reject(format!("null in non-nullable {}", spec.name));
                    continue 'rows;
                }

                values.push(coerced);
            }

            // Row accepted: feed builders and statistics.
            for (builder, value) in builders.iter_mut().zip(&values) {
                builder.append(value);
            }
            report.rows_accepted += 1;
            report.partitions.insert(PartitionKey { season, game_id });

            if let Some(idx) = play_idx {
                if let Coerced::Int(Some(play_id)) = values[idx] {
                    report.plays.insert(PlayKey { game_id, play_id });
                }
            }
            if let Some(idx) = frame_idx {
                if let Coerced::Int(Some(frame)) = values[idx] {
                    report.max_frame_id = report.max_frame_id.max(Some(frame));
                }
            }
            if let Some(idx) = nfl_idx {
                if let Coerced::Int(nfl_id) = values[idx] {
                    if TrackedEntity::from_nfl_id(nfl_id).is_ball() {
                        report.ball_rows += 1;
                    }
                }
            }
        }
    }

    let arrays: Vec<ArrayRef> = builders.iter_mut().map(|b| b.finish()).collect();
    let batch = RecordBatch::try_new(schema.to_arrow(), arrays).context(ArrowSnafu)?;

    debug!(
        "normalized {} rows ({} accepted, {} rejected, {} partitions)",
        report.rows_read,
        report.rows_accepted,
        report.rows_rejected(),
        report.partitions.len()
    );

    Ok((batch, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float32Array, Int64Array};
    use std::io::Cursor;

    fn tracking_schema() -> SchemaDefinition {
        SchemaDefinition::from_yaml_str(
            r#"
columns:
  - name: season
    dtype: int
    partition_key: true
    role: partition
  - name: gameId
    dtype: int
    partition_key: true
    role: partition
    aliases: [game_id]
  - name: playId
    dtype: int
    role: dimension
    aliases: [play_id]
  - name: nflId
    dtype: int
    nullable: true
    role: dimension
    aliases: [nfl_id]
  - name: frameId
    dtype: int
    role: dimension
    aliases: [frame_id]
  - name: x
    dtype: float
    nullable: true
  - name: y
    dtype: float
    nullable: true
  - name: event
    dtype: str
    nullable: true
    role: metadata
"#,
        )
        .expect("valid test schema")
    }

    fn normalize_str(csv: &str) -> (RecordBatch, IngestReport) {
        normalize_reader(Cursor::new(csv.to_string()), &tracking_schema())
            .expect("normalize should succeed")
    }

    #[test]
    fn maps_aliases_and_drops_unknown_columns() {
        let csv = "\
game_id,play_id,nfl_id,frame_id,x,y,event,jerseyNumber
2021090900,10,25511,1,12.5,30.1,pass_forward,12
2021090900,10,,1,13.0,29.0,,
";
        let (batch, report) = normalize_str(csv);

        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_accepted, 2);
        assert_eq!(report.rows_rejected(), 0);
        assert_eq!(report.dropped_columns, vec!["jerseyNumber".to_string()]);
        assert_eq!(batch.num_rows(), 2);

        // season derived from gameId.
        let season = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(season.value(0), 2021);

        // Ball row counted via the tagged entity.
        assert_eq!(report.ball_rows, 1);
        assert_eq!(report.max_frame_id, Some(1));
        assert_eq!(report.plays.len(), 1);
    }

    #[test]
    fn partition_keys_are_reported_without_writing() {
        let csv = "\
gameId,playId,nflId,frameId,x,y,event
2021090900,10,1,1,0.0,0.0,
2021091200,22,2,1,1.0,1.0,
";
        let (_, report) = normalize_str(csv);

        let keys: Vec<PartitionKey> = report.partitions.iter().copied().collect();
        assert_eq!(
            keys,
            vec![
                PartitionKey {
                    season: 2021,
                    game_id: 2021090900
                },
                PartitionKey {
                    season: 2021,
                    game_id: 2021091200
                },
            ]
        );
    }

    #[test]
    fn uncoercible_nullable_value_becomes_null() {
        let csv = "\
gameId,playId,nflId,frameId,x,y,event
2021090900,10,1,1,not-a-number,3.0,
";
        let (batch, report) = normalize_str(csv);

        assert_eq!(report.rows_accepted, 1);
        let x = batch
            .column(5)
            .as_any()
            .downcast_ref::<Float32Array>()
            .unwrap();
        assert!(x.is_null(0));
    }

    #[test]
    fn uncoercible_required_value_rejects_the_row() {
        let csv = "\
gameId,playId,nflId,frameId,x,y,event
2021090900,ten,1,1,0.0,0.0,
2021090900,11,1,1,0.0,0.0,
";
        let (batch, report) = normalize_str(csv);

        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rows_accepted, 1);
        assert_eq!(report.rejected.get("invalid value in playId"), Some(&1));
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn season_mismatch_rejects_the_row() {
        let csv = "\
season,gameId,playId,nflId,frameId,x,y,event
2021,2021090900,10,1,1,0.0,0.0,
2019,2021090900,11,1,1,0.0,0.0,
";
        let (_, report) = normalize_str(csv);

        assert_eq!(report.rows_accepted, 1);
        assert_eq!(report.rejected.get("season mismatch"), Some(&1));
    }

    #[test]
    fn invalid_game_id_rejects_the_row() {
        let csv = "\
gameId,playId,nflId,frameId,x,y,event
,10,1,1,0.0,0.0,
abc,10,1,1,0.0,0.0,
";
        let (batch, report) = normalize_str(csv);

        assert_eq!(report.rows_accepted, 0);
        assert_eq!(report.rejected.get("invalid gameId"), Some(&2));
        assert_eq!(batch.num_rows(), 0);
    }

    #[test]
    fn short_game_id_rejects_instead_of_deriving_season_zero() {
        // Identifiers that are not ten digits would otherwise land in
        // nonsense partitions like season=0.
        let csv = "\
gameId,playId,nflId,frameId,x,y,event
90900,10,1,1,0.0,0.0,
202109090,11,1,1,0.0,0.0,
-2021090900,12,1,1,0.0,0.0,
2021090900,13,1,1,0.0,0.0,
";
        let (batch, report) = normalize_str(csv);

        assert_eq!(report.rows_accepted, 1);
        assert_eq!(report.rejected.get("invalid gameId"), Some(&3));
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(
            report.partitions.iter().copied().collect::<Vec<_>>(),
            vec![PartitionKey {
                season: 2021,
                game_id: 2021090900
            }]
        );
    }

    #[test]
    fn missing_required_column_fails_the_input() {
        let csv = "\
gameId,nflId,frameId,x,y,event
2021090900,1,1,0.0,0.0,
";
        let err = normalize_reader(Cursor::new(csv.to_string()), &tracking_schema())
            .expect_err("playId column missing");
        assert!(matches!(
            err,
            NormalizeError::MissingColumn { column } if column == "playId"
        ));
    }

    #[test]
    fn schema_without_game_partition_key_is_unsupported() {
        let schema = SchemaDefinition::from_yaml_str(
            r#"
columns:
  - name: region
    dtype: str
    partition_key: true
"#,
        )
        .expect("valid schema");

        let err = normalize_reader(Cursor::new("region\na\n".to_string()), &schema)
            .expect_err("no season/gameId keys");
        assert!(matches!(err, NormalizeError::UnsupportedPartitioning { .. }));
    }

    #[test]
    fn reports_merge_across_inputs() {
        let (_, mut a) = normalize_str(
            "gameId,playId,nflId,frameId,x,y,event\n2021090900,10,1,1,0.0,0.0,\n",
        );
        let (_, b) = normalize_str(
            "gameId,playId,nflId,frameId,x,y,event\n2021091200,20,,3,0.0,0.0,\nbad,20,,3,0.0,0.0,\n",
        );

        a.merge(b);
        assert_eq!(a.rows_read, 3);
        assert_eq!(a.rows_accepted, 2);
        assert_eq!(a.rows_rejected(), 1);
        assert_eq!(a.partitions.len(), 2);
        assert_eq!(a.plays.len(), 2);
        assert_eq!(a.ball_rows, 1);
        assert_eq!(a.max_frame_id, Some(3));
    }

    #[test]
    fn date_and_bool_coercion() {
        assert_eq!(
            coerce(Some("2021-09-09"), SemanticType::Date),
            Ok(Coerced::Date(Some(18879)))
        );
        assert!(coerce(Some("09/09/2021"), SemanticType::Date).is_err());
        assert_eq!(
            coerce(Some("TRUE"), SemanticType::Bool),
            Ok(Coerced::Bool(Some(true)))
        );
        assert_eq!(
            coerce(Some("0"), SemanticType::Bool),
            Ok(Coerced::Bool(Some(false)))
        );
        assert_eq!(coerce(Some("NA"), SemanticType::Int), Ok(Coerced::Int(None)));
    }
}
