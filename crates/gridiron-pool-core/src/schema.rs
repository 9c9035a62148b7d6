//! Declarative schema registry for the canonical tracking columns.
//!
//! The schema is a YAML file declaring, per column, the canonical name, the
//! semantic type, nullability, the alias list used to match renamed columns
//! across source vintages, and whether the column is a partition key. It is
//! loaded once at process start, validated, and shared read-only; nothing in
//! this module mutates it afterwards.

use std::{collections::HashMap, fs, io, path::Path, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use serde::Deserialize;
use snafu::prelude::*;

/// Result alias for schema registry operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while loading or validating a schema file.
#[derive(Debug, Snafu)]
pub enum SchemaError {
    /// The schema file could not be read.
    #[snafu(display("Cannot read schema file {path}: {source}"))]
    Read {
        /// Path of the schema file.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The schema file is not valid YAML or misses required declarations.
    #[snafu(display("Malformed schema file: {source}"))]
    Parse {
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },

    /// The schema declares no columns at all.
    #[snafu(display("Schema declares no columns"))]
    Empty,

    /// Two columns resolve to the same canonical name.
    #[snafu(display("Duplicate column declaration: {column}"))]
    DuplicateColumn {
        /// The duplicated canonical name.
        column: String,
    },

    /// A partition key column is declared nullable, which would make file
    /// placement undefined for rows with a null key.
    #[snafu(display("Partition key column {column} must be non-nullable"))]
    NullablePartitionKey {
        /// The offending column name.
        column: String,
    },

    /// The schema declares no partition key columns.
    #[snafu(display("Schema declares no partition key columns"))]
    NoPartitionKeys,
}

/// Semantic column types understood by the normalizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    /// 64-bit integer (identifiers, frame counters).
    Int,
    /// 32-bit float (kinematic measurements).
    Float,
    /// Free-form string.
    Str,
    /// Boolean flag.
    Bool,
    /// Low-cardinality label; stored as a string column.
    Categorical,
    /// Calendar date, `YYYY-MM-DD` in the raw exports.
    Date,
}

impl SemanticType {
    /// Arrow storage type for this semantic type.
    pub fn to_arrow(self) -> DataType {
        match self {
            SemanticType::Int => DataType::Int64,
            SemanticType::Float => DataType::Float32,
            SemanticType::Str | SemanticType::Categorical => DataType::Utf8,
            SemanticType::Bool => DataType::Boolean,
            SemanticType::Date => DataType::Date32,
        }
    }
}

/// Role a column plays in the dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    /// Entity-identifying column (game, play, player, frame).
    Dimension,
    /// Column that determines file placement.
    Partition,
    /// Model-facing measurement column.
    Feature,
    /// Contextual label column.
    Metadata,
}

fn default_role() -> ColumnRole {
    ColumnRole::Feature
}

/// One canonical column declaration.
#[derive(Clone, Debug, Deserialize)]
pub struct ColumnSpec {
    /// Canonical column name.
    pub name: String,
    /// Semantic type the normalizer coerces values to.
    pub dtype: SemanticType,
    /// Whether null values are permitted after normalization.
    #[serde(default)]
    pub nullable: bool,
    /// Alternative raw names accepted for this column, matched
    /// case-insensitively.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Whether this column participates in the partition key.
    #[serde(default)]
    pub partition_key: bool,
    /// Role of the column.
    #[serde(default = "default_role")]
    pub role: ColumnRole,
}

impl ColumnSpec {
    /// Returns true when `raw` matches this column's canonical name or one of
    /// its aliases, ignoring case.
    pub fn matches(&self, raw: &str) -> bool {
        self.name.eq_ignore_ascii_case(raw)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(raw))
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    columns: Vec<ColumnSpec>,
}

/// The validated, immutable column contract.
///
/// Column order follows the declaration order in the schema file and is the
/// column order of every normalized batch and stored partition file.
#[derive(Clone, Debug)]
pub struct SchemaDefinition {
    columns: Vec<ColumnSpec>,
    by_name: HashMap<String, usize>,
}

impl SchemaDefinition {
    /// Loads and validates a schema from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> SchemaResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).context(ReadSnafu {
            path: path.display().to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parses and validates a schema from YAML text.
    pub fn from_yaml_str(raw: &str) -> SchemaResult<Self> {
        let file: SchemaFile = serde_yaml::from_str(raw).context(ParseSnafu)?;
        Self::new(file.columns)
    }

    fn new(columns: Vec<ColumnSpec>) -> SchemaResult<Self> {
        ensure!(!columns.is_empty(), EmptySnafu);

        let mut by_name = HashMap::with_capacity(columns.len());
        for (idx, col) in columns.iter().enumerate() {
            ensure!(
                !(col.partition_key && col.nullable),
                NullablePartitionKeySnafu {
                    column: col.name.clone()
                }
            );
            let prior = by_name.insert(col.name.clone(), idx);
            ensure!(
                prior.is_none(),
                DuplicateColumnSnafu {
                    column: col.name.clone()
                }
            );
        }

        ensure!(
            columns.iter().any(|c| c.partition_key),
            NoPartitionKeysSnafu
        );

        Ok(Self { columns, by_name })
    }

    /// Canonical column names in declaration order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// All column declarations in declaration order.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Looks up a column by canonical name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.by_name.get(name).map(|&idx| &self.columns[idx])
    }

    /// Semantic type of a column, if declared.
    pub fn type_of(&self, name: &str) -> Option<SemanticType> {
        self.column(name).map(|c| c.dtype)
    }

    /// Partition key columns in declaration order.
    pub fn partition_keys(&self) -> Vec<&ColumnSpec> {
        self.columns.iter().filter(|c| c.partition_key).collect()
    }

    /// Non-nullable columns in declaration order.
    pub fn required_columns(&self) -> Vec<&ColumnSpec> {
        self.columns.iter().filter(|c| !c.nullable).collect()
    }

    /// Arrow schema matching the canonical column layout.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.dtype.to_arrow(), c.nullable))
            .collect();
        Arc::new(ArrowSchema::new(fields))
    }
}
