//! On-disk dataset layout.
//!
//! ```text
//! <target>/conf.json                         {"NumBuckets", "Compression", "CodesDir"}
//! <target>/Buckets/<id:04>/dtypes.json       field name -> type name
//! <target>/Buckets/<id:04>/<field>.bin<ext>  one compressed column file per field
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CONF_FILE: &str = "conf.json";
pub const BUCKETS_DIR: &str = "Buckets";
pub const DTYPES_FILE: &str = "dtypes.json";

/// Dataset-level metadata for readers, written once per ingestion run.
///
/// Describes the target dataset only, not how it was derived from its sources.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatasetConf {
    pub num_buckets: u32,
    pub compression: String,
    #[serde(default)]
    pub codes_dir: PathBuf,
}

/// Paths of one dataset rooted at a target directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn conf_path(&self) -> PathBuf {
        self.root.join(CONF_FILE)
    }

    #[must_use]
    pub fn buckets_dir(&self) -> PathBuf {
        self.root.join(BUCKETS_DIR)
    }

    /// `Buckets/<id:04>`.
    #[must_use]
    pub fn bucket_dir(&self, bucket: u32) -> PathBuf {
        self.buckets_dir().join(format!("{bucket:04}"))
    }

    pub fn write_conf(&self, conf: &DatasetConf) -> Result<()> {
        write_json(&self.conf_path(), conf)
    }

    pub fn read_conf(&self) -> Result<DatasetConf> {
        read_json(&self.conf_path())
    }
}

/// Column file path for `field` in `bucket_dir`, e.g. `Pay.bin.sz`.
#[must_use]
pub fn column_path(bucket_dir: &Path, field: &str, extension: &str) -> PathBuf {
    bucket_dir.join(format!("{field}.bin{extension}"))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let f = File::create(path).map_err(|e| Error::io("create", path, e))?;
    let mut w = BufWriter::new(f);
    serde_json::to_writer(&mut w, value).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;
    w.write_all(b"\n")
        .and_then(|()| w.flush())
        .map_err(|e| Error::io("write", path, e))
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path).map_err(|e| Error::io("open", path, e))?;
    serde_json::from_reader(BufReader::new(f)).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| Error::io("mkdir -p", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_dirs_are_zero_padded() {
        let l = DatasetLayout::new("/data/claims");
        assert_eq!(l.bucket_dir(7), PathBuf::from("/data/claims/Buckets/0007"));
        assert_eq!(
            column_path(&l.bucket_dir(12), "Pay", ".sz"),
            PathBuf::from("/data/claims/Buckets/0012/Pay.bin.sz")
        );
    }

    #[test]
    fn conf_uses_pascal_case_keys() {
        let conf = DatasetConf {
            num_buckets: 4,
            compression: "snappy".into(),
            codes_dir: PathBuf::from("/codes"),
        };
        let json = serde_json::to_string(&conf).unwrap();
        assert_eq!(
            json,
            r#"{"NumBuckets":4,"Compression":"snappy","CodesDir":"/codes"}"#
        );
    }
}
