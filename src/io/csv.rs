//! CSV chunk source.
//!
//! Reads delimited text files with a header row and hands them to the pipeline in
//! row-count chunks. Every column is produced as raw text; conversion to the schema's
//! types happens during record extraction. A cell that is empty after trimming, or
//! equal to one of the configured missing markers (SAS exports use `.`), is flagged
//! missing.
//!
//! Inputs whose extension names a registered codec (`claims.csv.gz`, `.zst`, ...)
//! are decompressed transparently.

use crate::error::{Error, Result};
use crate::io::compression::open_maybe_compressed;
use crate::record::{Chunk, RawColumn};
use crate::source::{ChunkReader, ChunkSource};
use csv::{ReaderBuilder, StringRecord};
use std::io::Read;
use std::path::{Path, PathBuf};

/// [`ChunkSource`] for CSV (or other single-byte delimited) files.
#[derive(Clone, Debug)]
pub struct CsvSource {
    pub delimiter: u8,
    /// Cell contents treated as missing in addition to the empty cell.
    pub missing_markers: Vec<String>,
}

impl Default for CsvSource {
    fn default() -> Self {
        Self {
            delimiter: b',',
            missing_markers: vec![".".to_string()],
        }
    }
}

impl CsvSource {
    fn is_missing(&self, cell: &str) -> bool {
        cell.is_empty() || self.missing_markers.iter().any(|m| m == cell)
    }
}

impl ChunkSource for CsvSource {
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkReader>> {
        let input = open_maybe_compressed(path)?;
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .from_reader(input);
        let headers = rdr
            .headers()
            .map_err(|e| csv_error(path, "read header", e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        Ok(Box::new(CsvChunkReader {
            path: path.to_path_buf(),
            source: self.clone(),
            rdr,
            headers,
            record: StringRecord::new(),
        }))
    }
}

struct CsvChunkReader {
    path: PathBuf,
    source: CsvSource,
    rdr: csv::Reader<Box<dyn Read + Send>>,
    headers: Vec<String>,
    record: StringRecord,
}

impl ChunkReader for CsvChunkReader {
    fn column_names(&self) -> &[String] {
        &self.headers
    }

    fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Chunk>> {
        let width = self.headers.len();
        let mut values: Vec<Vec<String>> = (0..width).map(|_| Vec::with_capacity(max_rows)).collect();
        let mut missing: Vec<Vec<bool>> = (0..width).map(|_| Vec::with_capacity(max_rows)).collect();
        let mut rows = 0;

        while rows < max_rows {
            let more = self
                .rdr
                .read_record(&mut self.record)
                .map_err(|e| csv_error(&self.path, "read record", e))?;
            if !more {
                break;
            }
            for (i, cell) in self.record.iter().enumerate() {
                let cell = cell.trim();
                missing[i].push(self.source.is_missing(cell));
                values[i].push(cell.to_string());
            }
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }
        Chunk::new(values.into_iter().map(RawColumn::Text).collect(), missing).map(Some)
    }
}

fn csv_error(path: &Path, op: &str, e: csv::Error) -> Error {
    let line = e.position().map(|p| p.line());
    match e.into_kind() {
        csv::ErrorKind::Io(io) => Error::io(op, path, io),
        other => Error::decode(
            format!(
                "{} line {}",
                path.display(),
                line.map_or_else(|| "?".to_string(), |l| l.to_string())
            ),
            format!("{other:?}"),
        ),
    }
}
