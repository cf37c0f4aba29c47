//! Testing utilities: an in-memory chunk source and small claims-style fixtures.
//!
//! [`MemorySource`] serves tables held in memory under made-up paths, so pipeline
//! tests can drive [`ingest_files`](crate::pipeline::ingest_files) without writing
//! source files, and can inject a decode failure at a chosen chunk.
//!
//! ```
//! use colshard::testing::*;
//! use colshard::source::ChunkSource;
//! use std::path::Path;
//!
//! let source = MemorySource::new().with_table("a", claims_table(&[1, 2, 3]));
//! let mut reader = source.open(Path::new("a")).unwrap();
//! assert_eq!(reader.next_chunk(2).unwrap().unwrap().rows(), 2);
//! ```

use crate::config::{FieldConfig, IngestConfig};
use crate::error::{Error, Result};
use crate::record::{Chunk, RawColumn};
use crate::source::{ChunkReader, ChunkSource};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A whole source table: column names plus raw columns and missing flags.
#[derive(Clone, Debug)]
pub struct MemoryTable {
    pub names: Vec<String>,
    pub columns: Vec<RawColumn>,
    pub missing: Vec<Vec<bool>>,
    /// Fail with a decode error instead of returning this chunk (0-based).
    pub fail_at_chunk: Option<usize>,
}

impl MemoryTable {
    /// Table with no missing cells.
    pub fn dense(names: &[&str], columns: Vec<RawColumn>) -> Self {
        let missing = columns.iter().map(|c| vec![false; c.len()]).collect();
        Self {
            names: names.iter().map(|n| (*n).to_string()).collect(),
            columns,
            missing,
            fail_at_chunk: None,
        }
    }

    #[must_use]
    pub fn failing_at(mut self, chunk: usize) -> Self {
        self.fail_at_chunk = Some(chunk);
        self
    }

    /// Flag `column`, `row` as missing.
    #[must_use]
    pub fn with_missing(mut self, column: usize, row: usize) -> Self {
        self.missing[column][row] = true;
        self
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, RawColumn::len)
    }
}

/// [`ChunkSource`] over in-memory tables keyed by path.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    tables: HashMap<PathBuf, Arc<MemoryTable>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(mut self, path: impl Into<PathBuf>, table: MemoryTable) -> Self {
        self.tables.insert(path.into(), Arc::new(table));
        self
    }

    /// Paths of every table, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut p: Vec<_> = self.tables.keys().cloned().collect();
        p.sort();
        p
    }
}

impl ChunkSource for MemorySource {
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkReader>> {
        let table = self.tables.get(path).ok_or_else(|| {
            Error::io(
                "open",
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })?;
        Ok(Box::new(MemoryReader {
            table: Arc::clone(table),
            row: 0,
            chunk: 0,
        }))
    }
}

struct MemoryReader {
    table: Arc<MemoryTable>,
    row: usize,
    chunk: usize,
}

impl ChunkReader for MemoryReader {
    fn column_names(&self) -> &[String] {
        &self.table.names
    }

    fn row_count(&self) -> Option<u64> {
        Some(self.table.rows() as u64)
    }

    fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Chunk>> {
        if self.table.fail_at_chunk == Some(self.chunk) {
            return Err(Error::decode(
                format!("memory chunk {}", self.chunk),
                "injected failure",
            ));
        }
        let start = self.row;
        let end = (start + max_rows).min(self.table.rows());
        if start >= end {
            return Ok(None);
        }
        self.row = end;
        self.chunk += 1;
        let columns = self
            .table
            .columns
            .iter()
            .map(|c| match c {
                RawColumn::Numeric(v) => RawColumn::Numeric(v[start..end].to_vec()),
                RawColumn::Text(v) => RawColumn::Text(v[start..end].to_vec()),
            })
            .collect();
        let missing = self
            .table
            .missing
            .iter()
            .map(|m| m[start..end].to_vec())
            .collect();
        Chunk::new(columns, missing).map(Some)
    }
}

/// Claims-style fields: `Enrolid` (subject, uint64), `Dstatus` (uint8), `Dx1`
/// (string) and `Pay` (float32).
#[must_use]
pub fn claims_fields() -> Vec<FieldConfig> {
    [
        ("Enrolid", "ENROLID", "uint64"),
        ("Dstatus", "DSTATUS", "uint8"),
        ("Dx1", "DX1", "string"),
        ("Pay", "PAY", "float32"),
    ]
    .into_iter()
    .map(|(name, column, dtype)| FieldConfig {
        name: name.to_string(),
        column: Some(column.to_string()),
        dtype: dtype.to_string(),
    })
    .collect()
}

/// One claims row per subject id. Row `i` has status `i % 4`, diagnosis `"D{id}"` and
/// payment `id * 1.5`.
#[must_use]
pub fn claims_table(ids: &[u64]) -> MemoryTable {
    MemoryTable::dense(
        &["ENROLID", "DSTATUS", "DX1", "PAY"],
        vec![
            RawColumn::Numeric(ids.iter().map(|&id| id as f64).collect()),
            RawColumn::Numeric((0..ids.len()).map(|i| (i % 4) as f64).collect()),
            RawColumn::Text(ids.iter().map(|id| format!("D{id}")).collect()),
            RawColumn::Numeric(ids.iter().map(|&id| id as f64 * 1.5).collect()),
        ],
    )
}

/// Config for [`claims_fields`] writing into `target_dir`.
pub fn claims_config(num_buckets: u32, target_dir: impl Into<PathBuf>) -> IngestConfig {
    let mut cfg = IngestConfig::new(
        num_buckets,
        PathBuf::new(),
        vec!["*".to_string()],
        target_dir,
        "Enrolid",
        claims_fields(),
    );
    cfg.concurrency = 4;
    cfg
}
