//! Ingestion run configuration.
//!
//! A run is described by one TOML file:
//!
//! ```toml
//! num_buckets = 64
//! source_dir = "/data/marketscan"
//! source_files = ["ccaeo2019*.csv.gz"]
//! target_dir = "/data/cols/ccaeo"
//! codes_dir = "/data/cols/codes"
//! subject_field = "Enrolid"
//!
//! [[fields]]
//! name = "Enrolid"
//! column = "ENROLID"
//! dtype = "uint64"
//!
//! [[fields]]
//! name = "Dx1"
//! column = "DX1"
//! dtype = "string"
//! ```
//!
//! Everything else has a default: `chunk_size`, `concurrency` (number of CPUs),
//! `flush_threshold`, `max_chunks`, `compression` (`"snappy"`), `channel_capacity`,
//! `[retry]` and `[csv]`.

use crate::bucket::BucketOptions;
use crate::error::{Error, Result};
use crate::io::compression::{DEFAULT_COMPRESSION, codec_by_name};
use crate::io::glob::expand_sources;
use crate::retry::RetryConfig;
use crate::schema::{DType, FieldSpec, Schema};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const fn default_chunk_size() -> usize {
    10_000
}

const fn default_flush_threshold() -> usize {
    100_000
}

fn default_concurrency() -> usize {
    num_cpus::get().max(1)
}

fn default_compression() -> String {
    DEFAULT_COMPRESSION.to_string()
}

/// One `[[fields]]` entry. `column` defaults to the field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub column: Option<String>,
    pub dtype: String,
}

/// `[csv]` options for the built-in CSV source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub delimiter: char,
    pub missing_markers: Vec<String>,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            missing_markers: vec![".".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub num_buckets: u32,
    pub source_dir: PathBuf,
    pub source_files: Vec<String>,
    pub target_dir: PathBuf,
    /// Directory holding `<field>.json` code tables, recorded in `conf.json` for readers.
    #[serde(default)]
    pub codes_dir: PathBuf,
    /// Rows per decoded chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Maximum chunks in flight across all files.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// Stop each file after this many chunks.
    #[serde(default)]
    pub max_chunks: Option<usize>,
    #[serde(default = "default_compression")]
    pub compression: String,
    /// Record channel capacity; 0 is a rendezvous channel.
    #[serde(default)]
    pub channel_capacity: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub csv: CsvConfig,
    pub subject_field: String,
    pub fields: Vec<FieldConfig>,
}

impl IngestConfig {
    /// Minimal config with defaults for every optional setting.
    pub fn new(
        num_buckets: u32,
        source_dir: impl Into<PathBuf>,
        source_files: Vec<String>,
        target_dir: impl Into<PathBuf>,
        subject_field: impl Into<String>,
        fields: Vec<FieldConfig>,
    ) -> Self {
        Self {
            num_buckets,
            source_dir: source_dir.into(),
            source_files,
            target_dir: target_dir.into(),
            codes_dir: PathBuf::new(),
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            flush_threshold: default_flush_threshold(),
            max_chunks: None,
            compression: default_compression(),
            channel_capacity: 0,
            retry: RetryConfig::default(),
            csv: CsvConfig::default(),
            subject_field: subject_field.into(),
            fields,
        }
    }

    /// Parse and validate a TOML config.
    ///
    /// # Errors
    /// [`Error::Config`] for malformed TOML or a setting [`validate`](Self::validate)
    /// rejects; [`Error::UnknownType`] for an unknown dtype name.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text).map_err(|e| Error::config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a TOML config file.
    ///
    /// # Errors
    /// [`Error::Io`] when the file cannot be read; otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        Self::from_toml_str(&text)
    }

    /// Check every setting that can be checked without touching the source files.
    ///
    /// # Errors
    /// The first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.num_buckets == 0 {
            return Err(Error::config("num_buckets must be positive"));
        }
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be positive"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be positive"));
        }
        if self.max_chunks == Some(0) {
            return Err(Error::config("max_chunks must be positive when set"));
        }
        if self.source_files.is_empty() {
            return Err(Error::config("source_files is empty"));
        }
        if !self.csv.delimiter.is_ascii() {
            return Err(Error::config("csv.delimiter must be a single ASCII character"));
        }
        codec_by_name(&self.compression)?;
        self.schema()?;
        Ok(())
    }

    /// Build the schema from `[[fields]]` and `subject_field`.
    ///
    /// # Errors
    /// [`Error::UnknownType`] for an unknown dtype name; [`Error::Config`] from
    /// [`Schema::new`].
    pub fn schema(&self) -> Result<Schema> {
        let fields = self
            .fields
            .iter()
            .map(|f| -> Result<FieldSpec> {
                let dtype: DType = f.dtype.parse()?;
                let column = f.column.clone().unwrap_or_else(|| f.name.clone());
                Ok(FieldSpec::new(f.name.clone(), column, dtype))
            })
            .collect::<Result<Vec<_>>>()?;
        Schema::new(fields, &self.subject_field)
    }

    /// Source files named by `source_files`, expanded against `source_dir`.
    ///
    /// # Errors
    /// [`Error::Config`] for an invalid pattern or one matching no file.
    pub fn source_paths(&self) -> Result<Vec<PathBuf>> {
        expand_sources(&self.source_dir, &self.source_files)
            .map_err(|e| Error::config(format!("{e:#}")))
    }

    #[must_use]
    pub fn bucket_options(&self) -> BucketOptions {
        BucketOptions {
            flush_threshold: self.flush_threshold,
            retry: self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        num_buckets = 8
        source_dir = "/src"
        source_files = ["*.csv"]
        target_dir = "/dst"
        subject_field = "Enrolid"

        [[fields]]
        name = "Enrolid"
        column = "ENROLID"
        dtype = "uint64"

        [[fields]]
        name = "Dx1"
        dtype = "string"
    "#;

    #[test]
    fn defaults_fill_optional_settings() {
        let cfg = IngestConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.compression, "snappy");
        assert_eq!(cfg.channel_capacity, 0);
        assert!(cfg.concurrency >= 1);
        assert_eq!(cfg.retry, RetryConfig::default());
        let schema = cfg.schema().unwrap();
        assert_eq!(schema.fields()[1].column, "Dx1");
    }

    #[test]
    fn unknown_dtype_is_reported_by_name() {
        let text = MINIMAL.replace("\"string\"", "\"int128\"");
        let err = IngestConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, Error::UnknownType(n) if n == "int128"));
    }

    #[test]
    fn zero_buckets_rejected() {
        let text = MINIMAL.replace("num_buckets = 8", "num_buckets = 0");
        assert!(matches!(
            IngestConfig::from_toml_str(&text),
            Err(Error::Config(_))
        ));
    }
}
