//! Row predicates for lazy scans.
//!
//! A predicate compares one column against one literal. Evaluation is
//! vectorized with Arrow's comparison kernels: the literal becomes a
//! one-element array of the column's type wrapped as a `Scalar`, which the
//! kernels broadcast across the batch without materializing a full-length
//! bound array. A null on either side of a comparison yields a null mask
//! entry, and the filter step treats null as "drop row".
//!
//! Predicates on the partition key columns double as file pruning hints: a
//! partition whose path-derived key cannot satisfy the predicate is skipped
//! without opening the file.

use arrow::{
    array::{
        ArrayRef, BooleanArray, Date32Array, Float32Array, Float64Array, Int64Array, RecordBatch,
        Scalar, StringArray,
    },
    compute::kernels::cmp,
    compute::{is_not_null, is_null},
    datatypes::DataType,
    error::ArrowError,
};
use chrono::NaiveDate;
use snafu::prelude::*;
use std::sync::Arc;

use crate::record::PartitionKey;

/// Errors raised while evaluating a predicate against a batch.
#[derive(Debug, Snafu)]
pub enum PredicateError {
    /// The literal cannot be compared against the column's stored type.
    #[snafu(display(
        "Predicate literal {literal:?} is not comparable with column {column} of type {datatype}"
    ))]
    TypeMismatch {
        /// Column the predicate references.
        column: String,
        /// Stored Arrow type of the column.
        datatype: DataType,
        /// The literal supplied by the caller.
        literal: Literal,
    },

    /// The column's stored type is not supported in predicates.
    #[snafu(display("Column {column} has unsupported type {datatype} for predicates"))]
    UnsupportedType {
        /// Column the predicate references.
        column: String,
        /// Stored Arrow type of the column.
        datatype: DataType,
    },

    /// Arrow kernel failure.
    #[snafu(display("Arrow error while evaluating predicate on {column}: {source}"))]
    Kernel {
        /// Column the predicate references.
        column: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// A comparison literal.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal; also used for `YYYY-MM-DD` dates.
    Str(String),
    /// Boolean literal.
    Bool(bool),
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(i64::from(v))
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Str(v.to_string())
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    /// Equal.
    Eq,
    /// Not equal.
    NotEq,
    /// Less than.
    Lt,
    /// Less than or equal.
    LtEq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    GtEq,
    /// The value is null.
    IsNull,
    /// The value is not null.
    IsNotNull,
}

/// One column-vs-literal filter condition.
#[derive(Clone, Debug)]
pub struct Predicate {
    /// Column the predicate references.
    pub column: String,
    /// Comparison operator.
    pub op: CmpOp,
    /// Literal operand; `None` for the null checks.
    pub literal: Option<Literal>,
}

impl Predicate {
    fn cmp(column: &str, op: CmpOp, literal: impl Into<Literal>) -> Self {
        Self {
            column: column.to_string(),
            op,
            literal: Some(literal.into()),
        }
    }

    /// `column == literal`
    pub fn eq(column: &str, literal: impl Into<Literal>) -> Self {
        Self::cmp(column, CmpOp::Eq, literal)
    }

    /// `column != literal`
    pub fn not_eq(column: &str, literal: impl Into<Literal>) -> Self {
        Self::cmp(column, CmpOp::NotEq, literal)
    }

    /// `column < literal`
    pub fn lt(column: &str, literal: impl Into<Literal>) -> Self {
        Self::cmp(column, CmpOp::Lt, literal)
    }

    /// `column <= literal`
    pub fn lt_eq(column: &str, literal: impl Into<Literal>) -> Self {
        Self::cmp(column, CmpOp::LtEq, literal)
    }

    /// `column > literal`
    pub fn gt(column: &str, literal: impl Into<Literal>) -> Self {
        Self::cmp(column, CmpOp::Gt, literal)
    }

    /// `column >= literal`
    pub fn gt_eq(column: &str, literal: impl Into<Literal>) -> Self {
        Self::cmp(column, CmpOp::GtEq, literal)
    }

    /// `column IS NULL`
    pub fn is_null(column: &str) -> Self {
        Self {
            column: column.to_string(),
            op: CmpOp::IsNull,
            literal: None,
        }
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(column: &str) -> Self {
        Self {
            column: column.to_string(),
            op: CmpOp::IsNotNull,
            literal: None,
        }
    }

    /// Builds the one-element literal array matching the column's stored
    /// type.
    fn literal_array(&self, datatype: &DataType) -> Result<ArrayRef, PredicateError> {
        let literal = self.literal.as_ref().expect("comparison ops carry a literal");
        let mismatch = || {
            TypeMismatchSnafu {
                column: self.column.clone(),
                datatype: datatype.clone(),
                literal: literal.clone(),
            }
            .build()
        };

        let array: ArrayRef = match (datatype, literal) {
            (DataType::Int64, Literal::Int(v)) => Arc::new(Int64Array::from(vec![*v])),
            (DataType::Float32, Literal::Float(v)) => {
                Arc::new(Float32Array::from(vec![*v as f32]))
            }
            (DataType::Float32, Literal::Int(v)) => {
                Arc::new(Float32Array::from(vec![*v as f32]))
            }
            (DataType::Float64, Literal::Float(v)) => Arc::new(Float64Array::from(vec![*v])),
            (DataType::Float64, Literal::Int(v)) => {
                Arc::new(Float64Array::from(vec![*v as f64]))
            }
            (DataType::Utf8, Literal::Str(v)) => Arc::new(StringArray::from(vec![v.clone()])),
            (DataType::Boolean, Literal::Bool(v)) => Arc::new(BooleanArray::from(vec![*v])),
            (DataType::Date32, Literal::Str(v)) => {
                let date = NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| mismatch())?;
                let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is valid");
                Arc::new(Date32Array::from(vec![(date - epoch).num_days() as i32]))
            }
            _ => return Err(mismatch()),
        };
        Ok(array)
    }

    /// Evaluates this predicate against a batch, producing the keep-mask.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray, PredicateError> {
        let idx = batch
            .schema()
            .index_of(&self.column)
            .map_err(|_| PredicateError::UnsupportedType {
                // Column existence is validated before any decode; reaching
                // this arm means the file drifted from the pool schema.
                column: self.column.clone(),
                datatype: DataType::Null,
            })?;
        let col = batch.column(idx);

        match self.op {
            CmpOp::IsNull => {
                return is_null(col.as_ref()).context(KernelSnafu {
                    column: self.column.clone(),
                });
            }
            CmpOp::IsNotNull => {
                return is_not_null(col.as_ref()).context(KernelSnafu {
                    column: self.column.clone(),
                });
            }
            _ => {}
        }

        let literal = Scalar::new(self.literal_array(col.data_type())?);
        let result = match self.op {
            CmpOp::Eq => cmp::eq(col, &literal),
            CmpOp::NotEq => cmp::neq(col, &literal),
            CmpOp::Lt => cmp::lt(col, &literal),
            CmpOp::LtEq => cmp::lt_eq(col, &literal),
            CmpOp::Gt => cmp::gt(col, &literal),
            CmpOp::GtEq => cmp::gt_eq(col, &literal),
            CmpOp::IsNull | CmpOp::IsNotNull => unreachable!("handled above"),
        };
        result.context(KernelSnafu {
            column: self.column.clone(),
        })
    }

    /// Whether a partition with this path-derived key can contain matching
    /// rows.
    ///
    /// Only integer comparisons on the partition key columns prune; anything
    /// else conservatively keeps the partition.
    pub fn keeps_partition(&self, key: &PartitionKey) -> bool {
        let value = match self.column.as_str() {
            "season" => key.season,
            "gameId" => key.game_id,
            _ => return true,
        };

        match (self.op, &self.literal) {
            (CmpOp::Eq, Some(Literal::Int(v))) => value == *v,
            (CmpOp::NotEq, Some(Literal::Int(v))) => value != *v,
            (CmpOp::Lt, Some(Literal::Int(v))) => value < *v,
            (CmpOp::LtEq, Some(Literal::Int(v))) => value <= *v,
            (CmpOp::Gt, Some(Literal::Int(v))) => value > *v,
            (CmpOp::GtEq, Some(Literal::Int(v))) => value >= *v,
            // Partition keys are never null.
            (CmpOp::IsNull, _) => false,
            (CmpOp::IsNotNull, _) => true,
            _ => true,
        }
    }
}
