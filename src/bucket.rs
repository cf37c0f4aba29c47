//! Per-shard bucket store.
//!
//! A [`Bucket`] buffers the records routed to one shard as one typed column per schema
//! field and appends them to its column files on [`Bucket::flush`]. All buffered
//! columns live behind a single mutex, so `add` and `flush` never interleave and every
//! flush writes the same number of rows to every column file.

use crate::codec::ColumnBuffer;
use crate::error::{Error, Result};
use crate::io::compression::CompressionCodec;
use crate::layout::{DTYPES_FILE, column_path, create_dir_all, write_json};
use crate::record::Record;
use crate::retry::{RetryConfig, retry_with_backoff};
use crate::schema::Schema;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tuning shared by every bucket of a run.
#[derive(Clone, Copy, Debug)]
pub struct BucketOptions {
    /// Flush once more than this many rows are buffered.
    pub flush_threshold: usize,
    /// Retry policy for opening column files.
    pub retry: RetryConfig,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            flush_threshold: 100_000,
            retry: RetryConfig::default(),
        }
    }
}

pub struct Bucket {
    id: u32,
    dir: PathBuf,
    schema: Arc<Schema>,
    codec: Arc<dyn CompressionCodec>,
    options: BucketOptions,
    columns: Mutex<Vec<ColumnBuffer>>,
    rows_written: AtomicU64,
    flushes: AtomicU64,
}

impl Bucket {
    /// Create the bucket directory with its `dtypes.json` and one empty file per
    /// column, so that even a bucket that never receives a row is complete on disk.
    ///
    /// Existing column files are truncated.
    ///
    /// # Errors
    /// Returns [`Error::Io`] or [`Error::Json`] when the directory or files cannot be
    /// written.
    pub fn create(
        id: u32,
        dir: PathBuf,
        schema: Arc<Schema>,
        codec: Arc<dyn CompressionCodec>,
        options: BucketOptions,
    ) -> Result<Self> {
        create_dir_all(&dir)?;
        write_json(&dir.join(DTYPES_FILE), &schema.dtypes())?;
        for field in schema.fields() {
            let path = column_path(&dir, &field.name, codec.extension());
            File::create(&path).map_err(|e| Error::io("create", &path, e))?;
        }
        let columns = schema
            .fields()
            .iter()
            .map(|f| ColumnBuffer::new(f.dtype))
            .collect();
        Ok(Self {
            id,
            dir,
            schema,
            codec,
            options,
            columns: Mutex::new(columns),
            rows_written: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the column file for `field`.
    #[must_use]
    pub fn column_file(&self, field: &str) -> PathBuf {
        column_path(&self.dir, field, self.codec.extension())
    }

    /// Rows currently held in memory.
    #[must_use]
    pub fn buffered_rows(&self) -> usize {
        self.lock().first().map_or(0, ColumnBuffer::len)
    }

    /// Rows appended to the column files so far.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.rows_written.load(Ordering::Relaxed)
    }

    /// Number of non-empty flushes performed.
    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ColumnBuffer>> {
        self.columns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record, flushing synchronously once the buffer passes the threshold.
    ///
    /// The record is checked against the schema before any column is touched, so a
    /// rejected record leaves every column at the same length.
    ///
    /// # Errors
    /// [`Error::Decode`] for a record that does not match the schema; any error from
    /// the overflow [`flush`](Self::flush).
    pub fn add(&self, record: Record) -> Result<()> {
        let buffered = {
            let mut columns = self.lock();
            if record.values.len() != columns.len() {
                return Err(Error::decode(
                    format!("bucket {}", self.id),
                    format!(
                        "record has {} values, schema has {} fields",
                        record.values.len(),
                        columns.len()
                    ),
                ));
            }
            for (field, value) in self.schema.fields().iter().zip(&record.values) {
                let bad_text = value.as_str().is_some_and(|s| s.contains('\n'));
                if !value.fits(field.dtype) || bad_text {
                    return Err(Error::decode(
                        format!("bucket {} field {}", self.id, field.name),
                        format!("{value:?} cannot be stored as {}", field.dtype),
                    ));
                }
            }
            for (column, value) in columns.iter_mut().zip(record.values) {
                column.push(value)?;
            }
            columns[0].len()
        };

        // The count was read under the lock; a concurrent add on this bucket can at
        // worst trigger a second flush, which finds the buffer drained and does nothing.
        if buffered > self.options.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Append all buffered rows to the column files and clear the buffer.
    ///
    /// Each column is encoded and compressed as one block and appended to its file.
    /// Returns the number of rows written; an empty buffer writes nothing.
    ///
    /// # Errors
    /// [`Error::Io`] when a column file cannot be opened or written. The buffer is left
    /// intact and the files may hold a partial flush; the dataset must be discarded.
    pub fn flush(&self) -> Result<usize> {
        let mut columns = self.lock();
        let rows = columns.first().map_or(0, ColumnBuffer::len);
        if rows == 0 {
            return Ok(0);
        }

        let mut raw = Vec::new();
        for (field, column) in self.schema.fields().iter().zip(columns.iter()) {
            let path = self.column_file(&field.name);
            raw.clear();
            column
                .encode(&mut raw)
                .map_err(|e| Error::io("encode", &path, e))?;
            let block = self
                .codec
                .compress_block(&raw)
                .map_err(|e| Error::io("compress", &path, e))?;
            self.append(&path, &block)?;
        }
        for column in columns.iter_mut() {
            column.clear();
        }

        self.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        tracing::info!(bucket = self.id, rows, "flushed bucket");
        Ok(rows)
    }

    fn append(&self, path: &Path, block: &[u8]) -> Result<()> {
        // Only the open is retried: a failed write may already have appended bytes.
        let mut file = retry_with_backoff(&self.options.retry, || {
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .map_err(|e| Error::io("open", path, e))
        })?;
        file.write_all(block)
            .and_then(|()| file.sync_data())
            .map_err(|e| Error::io("write", path, e))
    }
}
