//! Command-line frontend for tracking-data pools.

mod error;
mod export;
mod filter;

use std::path::{Path, PathBuf};

use arrow::compute::concat_batches;
use clap::{Parser, Subcommand};
use log::info;
use snafu::ResultExt;

use gridiron_pool_core::{
    normalize::{normalize_csv, IngestReport},
    pool::Pool,
    sample::sample_plays,
    schema::SchemaDefinition,
    storage::PoolLocation,
    writer::{write_partitions, WriteMode, WriteOptions, WriteReport},
};

use crate::{
    error::{
        CliResult, CombineBatchesSnafu, IngestSnafu, LoadSchemaSnafu, NoCsvInputsSnafu,
        OpenPoolSnafu, PartialWriteSnafu, PartitionConflictsSnafu, ReadInputDirSnafu, SampleSnafu,
        WriteOutputSnafu, WritePoolSnafu,
    },
    filter::parse_filter,
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Normalize raw tracking CSVs and write them into a partitioned pool
    Ingest {
        /// Raw CSV file, or a directory whose .csv files are all ingested;
        /// repeatable
        #[arg(long = "input", required = true)]
        input: Vec<PathBuf>,

        /// Schema declaration file (YAML)
        #[arg(long)]
        schema: PathBuf,

        /// Pool root directory
        #[arg(long)]
        output: PathBuf,

        /// Validate and report without writing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Replace existing partition files instead of failing on them
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },

    /// Sample whole plays from a pool and export them as CSV
    Sample {
        /// Pool root directory
        #[arg(long)]
        pool: PathBuf,

        /// Number of distinct plays to sample
        #[arg(long)]
        n: usize,

        /// Filter condition, e.g. "event == pass_forward"; repeatable, ANDed
        #[arg(long = "filter")]
        filter: Vec<String>,

        /// RNG seed for a reproducible draw
        #[arg(long)]
        seed: Option<u64>,

        /// Output CSV path (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "gpool", about = "Partitioned tracking-data pools")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

/// Expands directory inputs into their `.csv` files, in name order.
fn expand_inputs(inputs: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in inputs {
        if !path.is_dir() {
            out.push(path.clone());
            continue;
        }
        let entries = std::fs::read_dir(path).context(ReadInputDirSnafu {
            path: path.display().to_string(),
        })?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
            })
            .collect();
        snafu::ensure!(
            !found.is_empty(),
            NoCsvInputsSnafu {
                path: path.display().to_string(),
            }
        );
        found.sort();
        out.extend(found);
    }
    Ok(out)
}

fn print_ingest_summary(report: &IngestReport, written: &WriteReport, dry_run: bool) {
    println!(
        "Rows read: {}, accepted: {}, rejected: {}",
        report.rows_read,
        report.rows_accepted,
        report.rows_rejected()
    );
    for (reason, count) in &report.rejected {
        println!("  rejected ({reason}): {count}");
    }
    if !report.dropped_columns.is_empty() {
        println!("Dropped columns: {}", report.dropped_columns.join(", "));
    }
    println!(
        "Plays: {}, partitions: {}, ball rows: {}, max frameId: {}",
        report.plays.len(),
        report.partitions.len(),
        report.ball_rows,
        report
            .max_frame_id
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    if dry_run {
        println!("Dry run: {} partition(s) would be written", written.planned());
        for part in &written.partitions {
            println!(
                "  {}: {} rows (~{} bytes)",
                part.key, part.rows, part.bytes_estimate
            );
        }
    } else {
        println!(
            "Partitions created: {}, overwritten: {}, failed: {}",
            written.created(),
            written.overwritten(),
            written.failed.len()
        );
        for (key, err) in &written.failed {
            println!("  {key}: {err}");
        }
    }
}

async fn cmd_ingest(
    inputs: &[PathBuf],
    schema_path: &Path,
    output: &Path,
    dry_run: bool,
    overwrite: bool,
) -> CliResult<()> {
    let schema = SchemaDefinition::load(schema_path).context(LoadSchemaSnafu {
        path: schema_path.display().to_string(),
    })?;

    let inputs = expand_inputs(inputs)?;
    let mut batches = Vec::new();
    let mut report = IngestReport::default();
    for path in &inputs {
        let (batch, file_report) = normalize_csv(path, &schema).context(IngestSnafu {
            path: path.display().to_string(),
        })?;
        info!(
            "{}: {} rows read, {} accepted",
            path.display(),
            file_report.rows_read,
            file_report.rows_accepted
        );
        batches.push(batch);
        report.merge(file_report);
    }

    let combined =
        concat_batches(&schema.to_arrow(), &batches).context(CombineBatchesSnafu)?;

    let location = PoolLocation::local(output);
    let options = WriteOptions {
        mode: if dry_run {
            WriteMode::DryRun
        } else {
            WriteMode::Write
        },
        overwrite,
    };
    let written = write_partitions(&combined, &location, options)
        .await
        .context(WritePoolSnafu)?;

    print_ingest_summary(&report, &written, dry_run);

    if written.has_conflicts() {
        return PartitionConflictsSnafu {
            count: written.failed.len(),
        }
        .fail();
    }
    snafu::ensure!(
        written.failed.is_empty(),
        PartialWriteSnafu {
            count: written.failed.len(),
        }
    );
    Ok(())
}

async fn cmd_sample(
    root: &Path,
    n: usize,
    filters: &[String],
    seed: Option<u64>,
    output: Option<&Path>,
) -> CliResult<()> {
    let predicates = filters
        .iter()
        .map(|spec| parse_filter(spec))
        .collect::<CliResult<Vec<_>>>()?;

    let pool = Pool::open(root).await.context(OpenPoolSnafu {
        root: root.display().to_string(),
    })?;
    let result = sample_plays(&pool, n, &predicates, seed)
        .await
        .context(SampleSnafu)?;

    let batches = std::slice::from_ref(&result.batch);
    match output {
        Some(path) => {
            let file = std::fs::File::create(path).context(WriteOutputSnafu {
                path: path.display().to_string(),
            })?;
            export::write_csv(file, batches)?;
            println!(
                "Sampled {} play(s), {} rows -> {}",
                result.plays.len(),
                result.num_rows(),
                path.display()
            );
        }
        None => {
            // Keep stdout clean CSV; the summary goes through the logger.
            export::write_csv(std::io::stdout().lock(), batches)?;
            info!(
                "sampled {} play(s), {} rows",
                result.plays.len(),
                result.num_rows()
            );
        }
    }
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Ingest {
            input,
            schema,
            output,
            dry_run,
            overwrite,
        } => cmd_ingest(&input, &schema, &output, dry_run, overwrite).await,

        Command::Sample {
            pool,
            n,
            filter,
            seed,
            output,
        } => cmd_sample(&pool, n, &filter, seed, output.as_deref()).await,
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
