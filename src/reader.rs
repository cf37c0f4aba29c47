//! Columnar retrieval.
//!
//! [`read_column`] is the low-level primitive: it decodes a row range of one bucket's
//! column file. [`Dataset`] wraps a whole target directory, reads `conf.json` once and
//! answers per-bucket and per-subject queries on top of it.

use crate::codec::{decode_value, skip_value};
use crate::codes::CodeTable;
use crate::error::{Error, Result};
use crate::io::compression::{CompressionCodec, codec_by_name};
use crate::layout::{DTYPES_FILE, DatasetConf, DatasetLayout, column_path, read_json};
use crate::router::Router;
use crate::schema::{DType, Value};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

type ColumnStream = BufReader<Box<dyn Read + Send>>;

fn open_column(path: &Path, codec: &dyn CompressionCodec) -> Result<ColumnStream> {
    let mut f = BufReader::new(File::open(path).map_err(|e| Error::io("open", path, e))?);
    // A column with no flushed blocks is a zero-length file, which most decoders
    // reject as a truncated stream.
    if f.fill_buf().map_err(|e| Error::io("read", path, e))?.is_empty() {
        return Ok(BufReader::new(Box::new(io::empty())));
    }
    let r = codec
        .wrap_reader(Box::new(f))
        .map_err(|e| Error::io(format!("wrap reader with {} codec", codec.name()), path, e))?;
    Ok(BufReader::new(r))
}

fn decode_at<R: BufRead>(
    r: &mut R,
    dtype: DType,
    codes: Option<&CodeTable>,
    path: &Path,
) -> Result<Option<Value>> {
    let v = decode_value(r, dtype).map_err(|e| with_path(e, path))?;
    Ok(match (v, codes) {
        (Some(Value::U64(code)), Some(table)) if dtype == DType::Uvarint => {
            Some(table.resolve(code))
        }
        (v, _) => v,
    })
}

fn with_path(e: Error, path: &Path) -> Error {
    match e {
        Error::Decode { context, message } => {
            Error::decode(format!("{} ({context})", path.display()), message)
        }
        other => other,
    }
}

/// Read up to `row_count` values of `field`, starting at row `row_start`, from the
/// column file in `bucket_dir`.
///
/// Returns fewer values when the column ends first, and an empty vector when
/// `row_start` is past the end. `uvarint` columns are resolved through `codes`; a
/// code missing from the table reads as an empty string.
///
/// # Errors
/// - [`Error::Config`] for a `uvarint` column without a code table;
/// - [`Error::Io`] when the file cannot be opened;
/// - [`Error::Decode`] for a truncated or corrupt stream.
pub fn read_column(
    bucket_dir: &Path,
    field: &str,
    dtype: DType,
    row_start: u64,
    row_count: usize,
    codes: Option<&CodeTable>,
    codec: &dyn CompressionCodec,
) -> Result<Vec<Value>> {
    if dtype == DType::Uvarint && codes.is_none() {
        return Err(Error::config(format!(
            "field {field} is dictionary coded but no code table was supplied"
        )));
    }
    let path = column_path(bucket_dir, field, codec.extension());
    let mut r = open_column(&path, codec)?;

    for _ in 0..row_start {
        if !skip_value(&mut r, dtype).map_err(|e| with_path(e, &path))? {
            return Ok(Vec::new());
        }
    }

    let mut out = Vec::with_capacity(row_count.min(1 << 16));
    while out.len() < row_count {
        match decode_at(&mut r, dtype, codes, &path)? {
            Some(v) => out.push(v),
            None => break,
        }
    }
    Ok(out)
}

/// Values of the requested fields at every row of one subject.
#[derive(Clone, Debug, PartialEq)]
pub struct SubjectRows {
    pub subject_id: u64,
    pub bucket: u32,
    /// Row positions within the bucket, ascending.
    pub rows: Vec<u64>,
    /// One entry per requested field, in request order.
    pub columns: Vec<(String, Vec<Value>)>,
}

/// Read handle over an ingested dataset.
#[derive(Debug)]
pub struct Dataset {
    layout: DatasetLayout,
    conf: DatasetConf,
    router: Router,
    codec: Arc<dyn CompressionCodec>,
    code_tables: Mutex<HashMap<String, Arc<CodeTable>>>,
}

impl Dataset {
    /// Open the dataset rooted at `target_dir`.
    ///
    /// # Errors
    /// Fails when `conf.json` is missing or invalid, or names an unavailable codec.
    pub fn open(target_dir: impl Into<PathBuf>) -> Result<Self> {
        let layout = DatasetLayout::new(target_dir);
        let conf = layout.read_conf()?;
        let router = Router::new(conf.num_buckets)?;
        let codec = codec_by_name(&conf.compression)?;
        Ok(Self {
            layout,
            conf,
            router,
            codec,
            code_tables: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn conf(&self) -> &DatasetConf {
        &self.conf
    }

    #[must_use]
    pub fn router(&self) -> Router {
        self.router
    }

    #[must_use]
    pub fn bucket_for(&self, subject_id: u64) -> u32 {
        self.router.route(subject_id)
    }

    /// # Errors
    /// [`Error::Config`] for a bucket id outside the dataset.
    pub fn bucket_dir(&self, bucket: u32) -> Result<PathBuf> {
        if bucket >= self.conf.num_buckets {
            return Err(Error::config(format!(
                "bucket {bucket} out of range (dataset has {})",
                self.conf.num_buckets
            )));
        }
        Ok(self.layout.bucket_dir(bucket))
    }

    /// Field types of one bucket, from its `dtypes.json`.
    ///
    /// # Errors
    /// [`Error::UnknownType`] for a type name with no decoder.
    pub fn dtypes(&self, bucket: u32) -> Result<BTreeMap<String, DType>> {
        let raw: BTreeMap<String, String> = read_json(&self.bucket_dir(bucket)?.join(DTYPES_FILE))?;
        raw.into_iter()
            .map(|(field, name)| -> Result<(String, DType)> { Ok((field, name.parse()?)) })
            .collect()
    }

    /// Code table for a dictionary-coded field, loaded on first use.
    ///
    /// # Errors
    /// [`Error::Config`] when the dataset has no codes directory; load errors from
    /// [`CodeTable::load`].
    pub fn code_table(&self, field: &str) -> Result<Arc<CodeTable>> {
        if let Some(t) = self.tables().get(field) {
            return Ok(Arc::clone(t));
        }
        if self.conf.codes_dir.as_os_str().is_empty() {
            return Err(Error::config(format!(
                "field {field} is dictionary coded but the dataset has no codes directory"
            )));
        }
        let table = Arc::new(CodeTable::load(
            &self.conf.codes_dir.join(format!("{field}.json")),
        )?);
        // Two threads may load the same table; either copy is fine.
        self.tables()
            .entry(field.to_string())
            .or_insert_with(|| Arc::clone(&table));
        Ok(table)
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CodeTable>>> {
        self.code_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn field_type(&self, bucket: u32, field: &str) -> Result<DType> {
        self.dtypes(bucket)?.get(field).copied().ok_or_else(|| {
            Error::config(format!("bucket {bucket} has no field {field}"))
        })
    }

    fn codes_for(&self, field: &str, dtype: DType) -> Result<Option<Arc<CodeTable>>> {
        if dtype == DType::Uvarint {
            self.code_table(field).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read a row range of one column, resolving its type from the bucket metadata.
    ///
    /// # Errors
    /// See [`read_column`]; also [`Error::Config`] for an unknown field.
    pub fn read_column(
        &self,
        bucket: u32,
        field: &str,
        row_start: u64,
        row_count: usize,
    ) -> Result<Vec<Value>> {
        let dtype = self.field_type(bucket, field)?;
        let codes = self.codes_for(field, dtype)?;
        read_column(
            &self.bucket_dir(bucket)?,
            field,
            dtype,
            row_start,
            row_count,
            codes.as_deref(),
            self.codec.as_ref(),
        )
    }

    /// Number of rows stored in one column of a bucket.
    ///
    /// # Errors
    /// Open or decode failures of the column file.
    pub fn row_count(&self, bucket: u32, field: &str) -> Result<u64> {
        let dtype = self.field_type(bucket, field)?;
        let path = column_path(&self.bucket_dir(bucket)?, field, self.codec.extension());
        let mut r = open_column(&path, self.codec.as_ref())?;
        let mut n = 0;
        while skip_value(&mut r, dtype).map_err(|e| with_path(e, &path))? {
            n += 1;
        }
        Ok(n)
    }

    /// Every stored row of one subject.
    ///
    /// Routes the subject to its bucket, scans `subject_field` for matching rows, then
    /// reads the requested fields (all fields when `fields` is empty) in parallel.
    ///
    /// # Errors
    /// [`Error::Config`] when the subject field is not a `uint64` column or a field is
    /// unknown; read errors of any column.
    pub fn read_subject(
        &self,
        subject_id: u64,
        subject_field: &str,
        fields: &[String],
    ) -> Result<SubjectRows> {
        let bucket = self.bucket_for(subject_id);
        let dir = self.bucket_dir(bucket)?;
        let dtypes = self.dtypes(bucket)?;

        if dtypes.get(subject_field) != Some(&DType::U64) {
            return Err(Error::config(format!(
                "subject field {subject_field} is not a uint64 column of bucket {bucket}"
            )));
        }
        let path = column_path(&dir, subject_field, self.codec.extension());
        let mut r = open_column(&path, self.codec.as_ref())?;
        let mut rows = Vec::new();
        let mut row = 0u64;
        while let Some(v) = decode_at(&mut r, DType::U64, None, &path)? {
            if v == Value::U64(subject_id) {
                rows.push(row);
            }
            row += 1;
        }

        let wanted: Vec<String> = if fields.is_empty() {
            dtypes.keys().cloned().collect()
        } else {
            fields.to_vec()
        };
        let columns = wanted
            .par_iter()
            .map(|field| -> Result<(String, Vec<Value>)> {
                let dtype = *dtypes.get(field).ok_or_else(|| {
                    Error::config(format!("bucket {bucket} has no field {field}"))
                })?;
                let codes = self.codes_for(field, dtype)?;
                let values = self.pick_rows(&dir, field, dtype, &rows, codes.as_deref())?;
                Ok((field.clone(), values))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(subject_id, bucket, rows = rows.len(), "read subject");
        Ok(SubjectRows {
            subject_id,
            bucket,
            rows,
            columns,
        })
    }

    /// Values of one column at the given ascending row positions.
    fn pick_rows(
        &self,
        dir: &Path,
        field: &str,
        dtype: DType,
        rows: &[u64],
        codes: Option<&CodeTable>,
    ) -> Result<Vec<Value>> {
        let path = column_path(dir, field, self.codec.extension());
        let mut r = open_column(&path, self.codec.as_ref())?;
        let mut out = Vec::with_capacity(rows.len());
        let mut pos = 0u64;
        for &target in rows {
            while pos < target {
                if !skip_value(&mut r, dtype).map_err(|e| with_path(e, &path))? {
                    return Err(short_column(&path, target));
                }
                pos += 1;
            }
            let v = decode_at(&mut r, dtype, codes, &path)?
                .ok_or_else(|| short_column(&path, target))?;
            out.push(v);
            pos += 1;
        }
        Ok(out)
    }
}

fn short_column(path: &Path, row: u64) -> Error {
    Error::decode(
        path.display().to_string(),
        format!("column ends before row {row}"),
    )
}
