//! Seam between the ingestion pipeline and source file decoding.
//!
//! Parsing a source format is not this crate's concern beyond the CSV reader in
//! [`crate::io::csv`]. Any format can feed the pipeline by implementing
//! [`ChunkSource`], which opens a file, and [`ChunkReader`], which reports the file's
//! column names and then yields [`Chunk`]s until the file is exhausted.

use crate::error::Result;
use crate::record::Chunk;
use std::path::Path;

/// Opens source files for reading in chunks.
pub trait ChunkSource: Send + Sync {
    /// # Errors
    /// [`Error::Io`](crate::error::Error::Io) when the file cannot be opened, or
    /// [`Error::Decode`](crate::error::Error::Decode) when its header is unreadable.
    fn open(&self, path: &Path) -> Result<Box<dyn ChunkReader>>;
}

/// An open source file.
pub trait ChunkReader: Send {
    /// Column names, in the order chunk columns are produced.
    fn column_names(&self) -> &[String];

    /// Total row count, when the format knows it up front.
    fn row_count(&self) -> Option<u64> {
        None
    }

    /// Decode the next block of at most `max_rows` rows. `Ok(None)` once the file is
    /// exhausted.
    ///
    /// # Errors
    /// Any failure is fatal for the run: a partially consumed chunk cannot be re-read.
    fn next_chunk(&mut self, max_rows: usize) -> Result<Option<Chunk>>;
}
