//! Core engine for a partitioned tracking-data pool.
//!
//! This crate provides the foundational pieces for `gridiron-pool`:
//!
//! - A declarative schema registry loaded from YAML, describing canonical
//!   column names, types, aliases, and partition keys (`schema` module).
//! - A normalizer that maps heterogeneous raw CSV exports onto the canonical
//!   schema, coercing types row by row and deriving partition keys
//!   (`normalize` module).
//! - A partition writer that lays normalized records out as one Parquet file
//!   per `(season, gameId)` partition, with dry-run and atomic-overwrite
//!   semantics (`writer` module).
//! - A read-only `Pool` handle over an existing partition tree, exposing a
//!   lazy, predicate-filtered scan that defers all I/O until materialization
//!   (`pool` module).
//! - A two-phase play sampler that selects distinct plays uniformly at random
//!   and then reassembles every row belonging to the selected plays
//!   (`sample` module).
//!
//! Higher-level tools (the CLI, feature-extraction pipelines) are expected to
//! depend on this crate rather than re-implementing the storage and query
//! logic.
#![deny(missing_docs)]
pub mod normalize;
pub mod pool;
pub mod record;
pub mod sample;
pub mod schema;
pub mod storage;
pub mod writer;
