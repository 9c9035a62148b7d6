//! CSV export for sampled batches.

use std::io::Write;

use arrow::array::RecordBatch;
use snafu::ResultExt;

use crate::error::{CliResult, EncodeCsvSnafu};

/// Writes `batches` as one CSV document with a single header row.
pub fn write_csv<W: Write>(out: W, batches: &[RecordBatch]) -> CliResult<()> {
    let mut writer = arrow_csv::WriterBuilder::new().with_header(true).build(out);
    for batch in batches {
        writer.write(batch).context(EncodeCsvSnafu)?;
    }
    Ok(())
}
