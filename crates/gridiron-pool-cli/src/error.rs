use gridiron_pool_core::{
    normalize::NormalizeError, pool::PoolError, sample::SampleError, schema::SchemaError,
    writer::WriteError,
};
use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to load schema {path}: {source}"))]
    LoadSchema {
        path: String,
        #[snafu(source(from(SchemaError, Box::new)))]
        source: Box<SchemaError>,
    },

    #[snafu(display("Failed to ingest {path}: {source}"))]
    Ingest {
        path: String,
        #[snafu(source(from(NormalizeError, Box::new)))]
        source: Box<NormalizeError>,
    },

    #[snafu(display("Write to pool failed: {source}"))]
    WritePool {
        #[snafu(source(from(WriteError, Box::new)))]
        source: Box<WriteError>,
    },

    #[snafu(display(
        "{count} partition(s) already exist. \
         Re-run with --overwrite to replace them."
    ))]
    PartitionConflicts { count: usize },

    #[snafu(display("{count} partition(s) failed to write"))]
    PartialWrite { count: usize },

    #[snafu(display("Failed to open pool at {root}: {source}"))]
    OpenPool {
        root: String,
        #[snafu(source(from(PoolError, Box::new)))]
        source: Box<PoolError>,
    },

    #[snafu(display("Sampling failed: {source}"))]
    Sample {
        #[snafu(source(from(SampleError, Box::new)))]
        source: Box<SampleError>,
    },

    #[snafu(display("Cannot read input directory {path}: {source}"))]
    ReadInputDir {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("No .csv files found in {path}"))]
    NoCsvInputs { path: String },

    #[snafu(display("Invalid --filter '{spec}': {reason}"))]
    InvalidFilter { spec: String, reason: String },

    #[snafu(display("Failed to write output {path}: {source}"))]
    WriteOutput {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("CSV encoding failed: {source}"))]
    EncodeCsv { source: arrow::error::ArrowError },

    #[snafu(display("Batches could not be combined: {source}"))]
    CombineBatches { source: arrow::error::ArrowError },
}
