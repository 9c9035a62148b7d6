//! Integration tests for the CLI binary.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("gpool"))
}

const SCHEMA_YAML: &str = r#"
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
  - name: nflId
    dtype: int
    nullable: true
    role: dimension
  - name: frameId
    dtype: int
    role: dimension
  - name: x
    dtype: float
    nullable: true
  - name: event
    dtype: str
    nullable: true
    role: metadata
"#;

const RAW_CSV: &str = "\
game_id,playId,nflId,frameId,x,event
2021090900,10,101,1,12.5,
2021090900,10,,1,12.8,
2021090900,20,101,1,40.0,pass_forward
2021090900,20,,1,41.1,
2021091200,5,305,1,77.2,
2021091200,5,,1,76.0,
";

fn stage(tmp: &TempDir) -> (PathBuf, PathBuf, PathBuf) {
    let schema = tmp.path().join("schema.yaml");
    let csv = tmp.path().join("raw.csv");
    let pool = tmp.path().join("pool");
    std::fs::write(&schema, SCHEMA_YAML).expect("schema written");
    std::fs::write(&csv, RAW_CSV).expect("csv written");
    (schema, csv, pool)
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn ingest_then_sample_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let (schema, csv, pool) = stage(&tmp);

    cli()
        .args([
            "ingest",
            "--input",
            &arg(&csv),
            "--schema",
            &arg(&schema),
            "--output",
            &arg(&pool),
        ])
        .assert()
        .success()
        .stdout(contains("Rows read: 6, accepted: 6, rejected: 0"))
        .stdout(contains("Partitions created: 2"));

    let out = tmp.path().join("sampled.csv");
    cli()
        .args([
            "sample",
            "--pool",
            &arg(&pool),
            "--n",
            "1",
            "--filter",
            "event == pass_forward",
            "--seed",
            "1",
            "--output",
            &arg(&out),
        ])
        .assert()
        .success()
        .stdout(contains("Sampled 1 play(s), 2 rows"));

    let text = std::fs::read_to_string(&out)?;
    let lines: Vec<&str> = text.lines().collect();
    // Header plus both rows of the qualifying play.
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("season,gameId,playId"));
    assert!(lines[1..].iter().all(|l| l.contains("2021090900,20")));
    Ok(())
}

#[test]
fn reingest_conflicts_unless_overwrite() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let (schema, csv, pool) = stage(&tmp);

    let ingest_args = [
        "ingest".to_string(),
        "--input".to_string(),
        arg(&csv),
        "--schema".to_string(),
        arg(&schema),
        "--output".to_string(),
        arg(&pool),
    ];

    cli().args(&ingest_args).assert().success();

    cli()
        .args(&ingest_args)
        .assert()
        .failure()
        .stderr(contains("already exist"));

    cli()
        .args(&ingest_args)
        .arg("--overwrite")
        .assert()
        .success()
        .stdout(contains("overwritten: 2"));
    Ok(())
}

#[test]
fn directory_input_ingests_every_csv() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let schema = tmp.path().join("schema.yaml");
    let pool = tmp.path().join("pool");
    std::fs::write(&schema, SCHEMA_YAML)?;

    let raw_dir = tmp.path().join("raw");
    std::fs::create_dir(&raw_dir)?;
    std::fs::write(
        raw_dir.join("week1.csv"),
        "game_id,playId,nflId,frameId,x,event\n2021090900,10,101,1,12.5,\n",
    )?;
    std::fs::write(
        raw_dir.join("week2.csv"),
        "game_id,playId,nflId,frameId,x,event\n2021091200,5,305,1,77.2,\n",
    )?;
    std::fs::write(raw_dir.join("notes.txt"), "not data")?;

    cli()
        .args([
            "ingest",
            "--input",
            &arg(&raw_dir),
            "--schema",
            &arg(&schema),
            "--output",
            &arg(&pool),
        ])
        .assert()
        .success()
        .stdout(contains("Rows read: 2, accepted: 2, rejected: 0"))
        .stdout(contains("Partitions created: 2"));
    Ok(())
}

#[test]
fn directory_without_csvs_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let schema = tmp.path().join("schema.yaml");
    std::fs::write(&schema, SCHEMA_YAML)?;
    let raw_dir = tmp.path().join("empty");
    std::fs::create_dir(&raw_dir)?;

    cli()
        .args([
            "ingest",
            "--input",
            &arg(&raw_dir),
            "--schema",
            &arg(&schema),
            "--output",
            &arg(&tmp.path().join("pool")),
        ])
        .assert()
        .failure()
        .stderr(contains("No .csv files found"));
    Ok(())
}

#[test]
fn dry_run_reports_without_creating_the_pool() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let (schema, csv, pool) = stage(&tmp);

    cli()
        .args([
            "ingest",
            "--input",
            &arg(&csv),
            "--schema",
            &arg(&schema),
            "--output",
            &arg(&pool),
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(contains("Dry run: 2 partition(s) would be written"));

    assert!(!pool.exists());
    Ok(())
}

#[test]
fn malformed_filter_is_rejected_before_any_read() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let (schema, csv, pool) = stage(&tmp);

    cli()
        .args([
            "ingest",
            "--input",
            &arg(&csv),
            "--schema",
            &arg(&schema),
            "--output",
            &arg(&pool),
        ])
        .assert()
        .success();

    cli()
        .args([
            "sample",
            "--pool",
            &arg(&pool),
            "--n",
            "1",
            "--filter",
            "event ~ tackle",
        ])
        .assert()
        .failure()
        .stderr(contains("Invalid --filter"));
    Ok(())
}

#[test]
fn oversized_sample_request_fails_with_counts() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = TempDir::new()?;
    let (schema, csv, pool) = stage(&tmp);

    cli()
        .args([
            "ingest",
            "--input",
            &arg(&csv),
            "--schema",
            &arg(&schema),
            "--output",
            &arg(&pool),
        ])
        .assert()
        .success();

    cli()
        .args(["sample", "--pool", &arg(&pool), "--n", "99"])
        .assert()
        .failure()
        .stderr(contains("requested 99 plays but only 3 qualify"));
    Ok(())
}
