//! Run counters and the end-of-run summary.
//!
//! [`IngestMetrics`] is shared by every task of a run and updated with relaxed atomic
//! adds; nothing on the hot path takes a lock to count. When the run completes the
//! counters are frozen into an [`IngestSummary`], which can be printed or saved as
//! JSON next to the dataset.

use crate::bucket::Bucket;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters of one ingestion run.
#[derive(Debug)]
pub struct IngestMetrics {
    started: Instant,
    files: AtomicU64,
    chunks: AtomicU64,
    source_rows: AtomicU64,
    dropped_rows: AtomicU64,
    records: AtomicU64,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            files: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
            source_rows: AtomicU64::new(0),
            dropped_rows: AtomicU64::new(0),
            records: AtomicU64::new(0),
        }
    }

    pub fn file_done(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one decoded chunk of `rows` source rows.
    pub fn chunk_read(&self, rows: usize) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
        self.source_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn rows_dropped(&self, rows: usize) {
        self.dropped_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Count one record handed to its bucket.
    pub fn record_added(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Freeze the counters together with per-bucket totals.
    #[must_use]
    pub fn summary(&self, buckets: &[Bucket]) -> IngestSummary {
        IngestSummary {
            files: self.files.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            source_rows: self.source_rows.load(Ordering::Relaxed),
            dropped_rows: self.dropped_rows.load(Ordering::Relaxed),
            records: self.records(),
            elapsed_ms: u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX),
            buckets: buckets
                .iter()
                .map(|b| BucketSummary {
                    id: b.id(),
                    rows: b.rows_written(),
                    flushes: b.flushes(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    pub id: u32,
    pub rows: u64,
    pub flushes: u64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub files: u64,
    pub chunks: u64,
    /// Rows decoded from the sources, including dropped ones.
    pub source_rows: u64,
    /// Rows skipped because their subject id was missing or unreadable.
    pub dropped_rows: u64,
    /// Records routed to a bucket.
    pub records: u64,
    pub elapsed_ms: u64,
    pub buckets: Vec<BucketSummary>,
}

impl IngestSummary {
    /// Rows stored across all buckets.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.buckets.iter().map(|b| b.rows).sum()
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("\n========== Ingest Summary ==========");
        println!(
            "Execution Time: {:.3}s ({} ms)",
            Duration::from_millis(self.elapsed_ms).as_secs_f64(),
            self.elapsed_ms
        );
        println!("------------------------------------");
        println!("files: {}", self.files);
        println!("chunks: {}", self.chunks);
        println!("source_rows: {}", self.source_rows);
        println!("dropped_rows: {} (missing subject id)", self.dropped_rows);
        println!("records: {}", self.records);
        let empty = self.buckets.iter().filter(|b| b.rows == 0).count();
        println!("buckets: {} ({empty} empty)", self.buckets.len());
        println!("====================================\n");
    }

    /// Save the summary as pretty-printed JSON.
    ///
    /// # Errors
    /// [`Error::Io`] or [`Error::Json`] when the file cannot be written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let formatted = serde_json::to_string_pretty(self).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = File::create(path).map_err(|e| Error::io("create", path, e))?;
        file.write_all(formatted.as_bytes())
            .map_err(|e| Error::io("write", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = IngestMetrics::new();
        m.chunk_read(10);
        m.chunk_read(5);
        m.rows_dropped(2);
        for _ in 0..13 {
            m.record_added();
        }
        m.file_done();
        let s = m.summary(&[]);
        assert_eq!((s.files, s.chunks, s.source_rows), (1, 2, 15));
        assert_eq!((s.dropped_rows, s.records), (2, 13));
        assert_eq!(s.rows_written(), 0);
    }

    #[test]
    fn summary_saves_as_json() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("summary.json");
        let s = IngestSummary {
            files: 1,
            chunks: 1,
            source_rows: 3,
            dropped_rows: 0,
            records: 3,
            elapsed_ms: 7,
            buckets: vec![BucketSummary {
                id: 0,
                rows: 3,
                flushes: 1,
            }],
        };
        s.save_to_file(&p)?;
        let back: IngestSummary = serde_json::from_str(&std::fs::read_to_string(&p)?)?;
        assert_eq!(back, s);
        Ok(())
    }
}
