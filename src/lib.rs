//! # colshard
//!
//! Converts large batches of tabular records into a sharded, column-oriented,
//! compressed on-disk store, so that everything about one subject can be read back
//! without scanning the whole dataset.
//!
//! ## Key Features
//!
//! - **Deterministic sharding** - records are routed to a bucket by an Adler-32 of their
//!   subject id; readers route with the same function
//! - **Concurrent ingestion** - one producer per source file, a bounded pool of chunk
//!   workers and a single harvester that owns every bucket write
//! - **Columnar buckets** - one append-only, block-compressed file per field per bucket
//! - **Pluggable compression** - snappy by default; gzip, zstd, bzip2 and xz via feature
//!   flags, or register your own codec
//! - **Dictionary decoding** - `uvarint` columns resolve through code tables on read
//! - **Typed errors** - every failure is fatal for its run and says where it happened
//!
//! ## Quick Start
//!
//! ```no_run
//! use colshard::{Dataset, IngestConfig, run_ingest};
//! use colshard::io::csv::CsvSource;
//! use std::path::Path;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let config = IngestConfig::from_toml_file(Path::new("ccaeo.toml"))?;
//! let summary = run_ingest(&config, &CsvSource::default())?;
//! summary.print();
//!
//! let dataset = Dataset::open(&config.target_dir)?;
//! let rows = dataset.read_subject(29_485_201, "Enrolid", &["Dx1".to_string()])?;
//! println!("{} rows in bucket {}", rows.rows.len(), rows.bucket);
//! # Ok(())
//! # }
//! ```
//!
//! ## Dataset Layout
//!
//! ```text
//! <target>/conf.json
//! <target>/Buckets/0000/dtypes.json
//! <target>/Buckets/0000/Enrolid.bin.sz
//! <target>/Buckets/0000/Dx1.bin.sz
//! ...
//! ```
//!
//! Column layouts are described in [`codec`]; the directory structure in [`layout`].
//!
//! ## Feature Flags
//!
//! - `source-csv` - CSV chunk source (default)
//! - `compression-snappy`, `compression-gzip`, `compression-zstd`, `compression-bzip2`,
//!   `compression-xz` - column and source file codecs (all default)
//!
//! ## Module Overview
//!
//! - [`pipeline`] - ingestion coordinator, producers and harvester
//! - [`bucket`] - per-shard buffers and column files
//! - [`router`] - subject id to bucket routing
//! - [`codec`] - column value encoding and decoding
//! - [`reader`] - row-range reads and the [`Dataset`] handle
//! - [`config`] - TOML run configuration
//! - [`source`] - the chunk reader seam; [`io::csv`] implements it

pub mod bucket;
pub mod codec;
pub mod codes;
pub mod config;
pub mod error;
pub mod io;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod retry;
pub mod router;
pub mod schema;
pub mod source;
pub mod testing;

pub use bucket::{Bucket, BucketOptions};
pub use codes::CodeTable;
pub use config::{FieldConfig, IngestConfig};
pub use error::{Error, Result};
pub use metrics::{IngestMetrics, IngestSummary};
pub use pipeline::{IngestContext, ingest_files, run_ingest};
pub use reader::{Dataset, SubjectRows, read_column};
pub use record::{Chunk, RawColumn, Record};
pub use router::{Router, bucket_for};
pub use schema::{DType, FieldSpec, Schema, Value};
pub use source::{ChunkReader, ChunkSource};

#[cfg(feature = "source-csv")]
pub use io::csv::CsvSource;
