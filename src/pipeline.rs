//! Concurrent ingestion: producers, harvester and coordinator.
//!
//! A run has one producer thread per source file and exactly one harvester thread,
//! joined by a bounded record channel:
//!
//! ```text
//! file ─ producer ─┬─ chunk worker ─┐
//!                  └─ chunk worker ─┤
//! file ─ producer ─── chunk worker ─┼──▶ channel ──▶ harvester ──▶ route ──▶ Bucket::add
//!                                   │
//!            (at most `concurrency` chunk workers in flight)
//! ```
//!
//! Each producer decodes its file chunk by chunk; a chunk is only read once a permit is
//! available from the shared [`ChunkLimiter`], and a spawned worker turns it into
//! records and sends them. The permit is released when the worker has handed off its
//! last record. The harvester is the only thread that routes records and calls
//! [`Bucket::add`].
//!
//! Everything runs inside one [`std::thread::scope`]: producers join their workers,
//! the coordinator joins the producers, closes the channel, joins the harvester and
//! finally flushes every bucket in parallel. The first fatal error is kept in the
//! context's abort signal; once set, producers stop reading, the harvester stops adding
//! and drops its receiver, and no final flush happens.

use crate::bucket::Bucket;
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::io::compression::{CompressionCodec, codec_by_name};
use crate::layout::{DatasetConf, DatasetLayout, create_dir_all};
use crate::metrics::{IngestMetrics, IngestSummary};
use crate::record::{Chunk, Record};
use crate::router::Router;
use crate::schema::{Binding, Schema};
use crate::source::{ChunkReader, ChunkSource};
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, Scope};

/// Lifecycle of one source file within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileState {
    Opening,
    ReadingChunks,
    /// No more chunks will be read; waiting for in-flight workers.
    Draining,
    Done,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileState::Opening => "opening",
            FileState::ReadingChunks => "reading",
            FileState::Draining => "draining",
            FileState::Done => "done",
        })
    }
}

fn transition(path: &Path, state: FileState) {
    tracing::debug!(file = %path.display(), %state, "file state");
}

/// Counting semaphore bounding the chunks in flight across all files.
///
/// Backed by a bounded channel pre-filled with one token per permit.
#[derive(Debug)]
pub struct ChunkLimiter {
    tokens: Receiver<()>,
    release: Sender<()>,
}

/// Returned to the limiter on drop.
#[derive(Debug)]
pub struct Permit {
    release: Sender<()>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        // The channel has room for every token, so this never blocks.
        let _ = self.release.send(());
    }
}

impl ChunkLimiter {
    #[must_use]
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        let (release, tokens) = crossbeam_channel::bounded(permits);
        for _ in 0..permits {
            let _ = release.send(());
        }
        Self { tokens, release }
    }

    /// Block until a permit is free.
    pub fn acquire(&self) -> Permit {
        // `release` lives in self, so the channel cannot disconnect while we wait.
        let _ = self.tokens.recv();
        Permit {
            release: self.release.clone(),
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.tokens.len()
    }
}

/// Holds the first fatal error of a run.
#[derive(Debug, Default)]
struct AbortSignal {
    aborted: AtomicBool,
    first: Mutex<Option<Error>>,
}

impl AbortSignal {
    fn fail(&self, err: Error) {
        if !matches!(err, Error::Aborted) {
            let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
            if first.is_none() {
                tracing::error!(error = %err, "aborting ingestion");
                *first = Some(err);
            }
        }
        self.aborted.store(true, Ordering::Release);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    fn take(&self) -> Error {
        self.first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(Error::Aborted)
    }
}

/// A source file that passed pre-flight: open, with its columns bound to the schema.
pub struct SourceFile {
    pub path: PathBuf,
    pub reader: Box<dyn ChunkReader>,
    pub binding: Binding,
}

/// Open every file and bind its columns before anything is written.
///
/// # Errors
/// The first file that cannot be opened, or [`Error::SourceFormat`] for a file missing
/// a schema column.
pub fn preflight(
    source: &dyn ChunkSource,
    schema: &Schema,
    paths: &[PathBuf],
) -> Result<Vec<SourceFile>> {
    paths
        .iter()
        .map(|path| -> Result<SourceFile> {
            transition(path, FileState::Opening);
            let reader = source.open(path)?;
            let binding = schema.bind(path, reader.column_names())?;
            if let Some(rows) = reader.row_count() {
                tracing::info!(file = %path.display(), rows, "opened source");
            }
            Ok(SourceFile {
                path: path.clone(),
                reader,
                binding,
            })
        })
        .collect()
}

/// Create the target directory, write `conf.json`, discard any previous buckets and
/// create every bucket of the new dataset.
///
/// # Errors
/// [`Error::Io`] or [`Error::Json`] when the dataset cannot be written.
pub fn prepare_dataset(
    config: &IngestConfig,
    schema: &Arc<Schema>,
    codec: &Arc<dyn CompressionCodec>,
) -> Result<Vec<Bucket>> {
    let layout = DatasetLayout::new(&config.target_dir);
    create_dir_all(layout.root())?;
    layout.write_conf(&DatasetConf {
        num_buckets: config.num_buckets,
        compression: codec.name().to_string(),
        codes_dir: config.codes_dir.clone(),
    })?;

    let buckets_dir = layout.buckets_dir();
    if buckets_dir.exists() {
        std::fs::remove_dir_all(&buckets_dir)
            .map_err(|e| Error::io("remove", &buckets_dir, e))?;
    }
    let options = config.bucket_options();
    (0..config.num_buckets)
        .map(|id| {
            Bucket::create(
                id,
                layout.bucket_dir(id),
                Arc::clone(schema),
                Arc::clone(codec),
                options,
            )
        })
        .collect()
}

/// Shared state of one run. Every task borrows it; nothing is global.
pub struct IngestContext {
    schema: Arc<Schema>,
    router: Router,
    buckets: Vec<Bucket>,
    chunk_size: usize,
    max_chunks: Option<usize>,
    limiter: ChunkLimiter,
    sender: Mutex<Option<Sender<Record>>>,
    abort: AbortSignal,
    metrics: IngestMetrics,
}

impl IngestContext {
    /// Build the context and the record channel. The receiver goes to the harvester.
    ///
    /// # Errors
    /// [`Error::Config`] when the bucket list does not match `config.num_buckets`.
    pub fn new(
        config: &IngestConfig,
        schema: Arc<Schema>,
        buckets: Vec<Bucket>,
    ) -> Result<(Self, Receiver<Record>)> {
        let router = Router::new(config.num_buckets)?;
        if buckets.len() != config.num_buckets as usize {
            return Err(Error::config(format!(
                "{} buckets created for a {}-bucket dataset",
                buckets.len(),
                config.num_buckets
            )));
        }
        let (tx, rx) = crossbeam_channel::bounded(config.channel_capacity);
        let ctx = Self {
            schema,
            router,
            buckets,
            chunk_size: config.chunk_size,
            max_chunks: config.max_chunks,
            limiter: ChunkLimiter::new(config.concurrency),
            sender: Mutex::new(Some(tx)),
            abort: AbortSignal::default(),
            metrics: IngestMetrics::new(),
        };
        Ok((ctx, rx))
    }

    #[must_use]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    #[must_use]
    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    fn sender_slot(&self) -> MutexGuard<'_, Option<Sender<Record>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sender(&self) -> Option<Sender<Record>> {
        self.sender_slot().clone()
    }

    /// Drop the context's sender; the channel closes once the last worker's clone goes.
    fn close_channel(&self) {
        self.sender_slot().take();
    }

    /// Drain the record channel into the buckets until it closes or the run aborts.
    fn harvest(&self, rx: Receiver<Record>) {
        for record in &rx {
            if self.abort.is_aborted() {
                break;
            }
            let bucket = &self.buckets[self.router.route(record.subject_id) as usize];
            if let Err(e) = bucket.add(record) {
                self.abort.fail(e);
                break;
            }
            self.metrics.record_added();
        }
        // Dropping `rx` here fails any pending send, releasing blocked workers.
    }

    /// Read one file chunk by chunk, spawning a worker per chunk.
    fn produce<'scope>(&'scope self, scope: &'scope Scope<'scope, '_>, file: SourceFile) {
        let SourceFile {
            path,
            mut reader,
            binding,
        } = file;
        let binding = Arc::new(binding);
        transition(&path, FileState::ReadingChunks);

        let mut workers = Vec::new();
        let mut chunks = 0usize;
        while !self.abort.is_aborted() && self.max_chunks.is_none_or(|max| chunks < max) {
            let permit = self.limiter.acquire();
            let chunk = match reader.next_chunk(self.chunk_size) {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    self.abort.fail(e);
                    break;
                }
            };
            chunks += 1;
            self.metrics.chunk_read(chunk.rows());
            let Some(tx) = self.sender() else { break };
            let binding = Arc::clone(&binding);
            workers.push(scope.spawn(move || {
                if let Err(e) = self.send_records(&chunk, &binding, &tx) {
                    self.abort.fail(e);
                }
                drop(permit);
            }));
        }

        transition(&path, FileState::Draining);
        for w in workers {
            if let Err(panic) = w.join() {
                std::panic::resume_unwind(panic);
            }
        }
        self.metrics.file_done();
        tracing::info!(file = %path.display(), chunks, "finished source");
        transition(&path, FileState::Done);
    }

    fn send_records(&self, chunk: &Chunk, binding: &Binding, tx: &Sender<Record>) -> Result<()> {
        let mut records = chunk.records(&self.schema, binding)?;
        for record in records.by_ref() {
            let record = record?;
            tx.send(record).map_err(|_| Error::Aborted)?;
        }
        self.metrics.rows_dropped(records.dropped());
        Ok(())
    }

    /// Run producers and harvester to completion, then flush every bucket.
    ///
    /// # Errors
    /// The first fatal error of any task.
    pub fn run(self, files: Vec<SourceFile>, rx: Receiver<Record>) -> Result<IngestSummary> {
        let ctx = &self;
        thread::scope(|s| {
            let harvester = s.spawn(move || ctx.harvest(rx));
            let producers: Vec<_> = files
                .into_iter()
                .map(|file| s.spawn(move || ctx.produce(s, file)))
                .collect();
            for p in producers {
                if let Err(panic) = p.join() {
                    std::panic::resume_unwind(panic);
                }
            }
            ctx.close_channel();
            if let Err(panic) = harvester.join() {
                std::panic::resume_unwind(panic);
            }
        });

        if self.abort.is_aborted() {
            return Err(self.abort.take());
        }

        self.buckets
            .par_iter()
            .try_for_each(|b| b.flush().map(|_| ()))?;
        let summary = self.metrics.summary(&self.buckets);
        tracing::info!(
            records = summary.records,
            dropped = summary.dropped_rows,
            buckets = summary.buckets.len(),
            elapsed_ms = summary.elapsed_ms,
            "all done"
        );
        Ok(summary)
    }
}

/// Ingest the files named by `config.source_files`.
///
/// # Errors
/// Configuration, pre-flight, or the first fatal error of the run.
pub fn run_ingest(config: &IngestConfig, source: &dyn ChunkSource) -> Result<IngestSummary> {
    config.validate()?;
    let paths = config.source_paths()?;
    ingest_files(config, source, &paths)
}

/// Ingest an explicit file list, ignoring `config.source_files`.
///
/// All files are opened and bound to the schema before the target dataset is touched,
/// so a missing column leaves any previous dataset in place.
///
/// # Errors
/// Configuration, pre-flight, or the first fatal error of the run.
pub fn ingest_files(
    config: &IngestConfig,
    source: &dyn ChunkSource,
    paths: &[PathBuf],
) -> Result<IngestSummary> {
    let schema = Arc::new(config.schema()?);
    let codec = codec_by_name(&config.compression)?;
    tracing::info!(
        files = paths.len(),
        buckets = config.num_buckets,
        target = %config.target_dir.display(),
        "starting ingestion"
    );

    let files = preflight(source, &schema, paths)?;
    let buckets = prepare_dataset(config, &schema, &codec)?;
    let (ctx, rx) = IngestContext::new(config, schema, buckets)?;
    ctx.run(files, rx)
}
