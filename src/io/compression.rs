//! Pluggable block compression for column files.
//!
//! Every column file is a sequence of compressed blocks, one per bucket flush. A block
//! is a complete, self-terminated compressed stream, so appending never rewrites
//! earlier bytes, and a reader decompresses the concatenation as one logical stream.
//!
//! ## Built-in Codecs
//!
//! When enabled via feature flags, the following codecs are available:
//! - **Snappy** (`.sz`, framing format) - via `snap` (feature: `compression-snappy`, default codec)
//! - **Gzip** (`.gz`) - via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) - via `zstd` (feature: `compression-zstd`)
//! - **Bzip2** (`.bz2`) - via `bzip2` (feature: `compression-bzip2`)
//! - **Xz** (`.xz`) - via `xz2` (feature: `compression-xz`)
//!
//! Decoders are the multi-member variants of each format, since a column file holds
//! one member per flush.
//!
//! ## Custom Codec Implementation
//! ```
//! use colshard::io::compression::{register_codec, CompressionCodec};
//! use std::io::{Read, Result};
//! use std::sync::Arc;
//!
//! struct Identity;
//!
//! impl CompressionCodec for Identity {
//!     fn name(&self) -> &str { "identity" }
//!     fn extension(&self) -> &str { ".raw" }
//!     fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>> { Ok(raw.to_vec()) }
//!     fn wrap_reader(&self, r: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> { Ok(r) }
//! }
//!
//! register_codec(Arc::new(Identity));
//! ```

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Codec used when a dataset does not name one.
pub const DEFAULT_COMPRESSION: &str = "snappy";

/// Global codec registry.
static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn CompressionCodec>>>> = RwLock::new(None);

fn init_registry() -> Vec<Arc<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-snappy")]
        Arc::new(SnappyCodec),
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
        #[cfg(feature = "compression-bzip2")]
        Arc::new(Bzip2Codec),
        #[cfg(feature = "compression-xz")]
        Arc::new(XzCodec),
    ]
}

fn get_registry() -> Vec<Arc<dyn CompressionCodec>> {
    let mut lock = CODEC_REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).clone()
}

/// Register a custom compression codec globally.
///
/// A codec registered under the name of an existing one shadows it.
pub fn register_codec(codec: Arc<dyn CompressionCodec>) {
    let mut lock = CODEC_REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    lock.get_or_insert_with(init_registry).insert(0, codec);
}

/// Names of every registered codec.
#[must_use]
pub fn codec_names() -> Vec<String> {
    get_registry().iter().map(|c| c.name().to_string()).collect()
}

/// Look up a codec by name (case-insensitive).
///
/// # Errors
/// Returns [`Error::Config`] when no codec of that name is registered, which includes
/// built-in codecs whose feature is disabled.
pub fn codec_by_name(name: &str) -> Result<Arc<dyn CompressionCodec>> {
    get_registry()
        .into_iter()
        .find(|c| c.name().eq_ignore_ascii_case(name))
        .ok_or_else(|| {
            Error::config(format!(
                "unknown compression {name:?} (available: {})",
                codec_names().join(", ")
            ))
        })
}

/// Detect a codec from a file path's extension (case-insensitive), e.g. `claims.csv.gz`.
#[must_use]
pub fn codec_for_path(path: impl AsRef<Path>) -> Option<Arc<dyn CompressionCodec>> {
    let path_str = path.as_ref().to_string_lossy().to_lowercase();
    get_registry()
        .into_iter()
        .find(|c| path_str.ends_with(c.extension()))
}

/// Open `path` for reading, decompressing it when its extension names a codec.
///
/// # Errors
/// [`Error::Io`] when the file cannot be opened or the decoder cannot be set up.
pub fn open_maybe_compressed(path: &Path) -> Result<Box<dyn Read + Send>> {
    let f = File::open(path).map_err(|e| Error::io("open", path, e))?;
    match codec_for_path(path) {
        Some(codec) => codec
            .wrap_reader(Box::new(f))
            .map_err(|e| Error::io(format!("wrap reader with {} codec", codec.name()), path, e)),
        None => Ok(Box::new(f)),
    }
}

/// Block compression codec.
///
/// Implementations must be `Send + Sync`: one codec instance is shared by every bucket
/// and reader thread.
pub trait CompressionCodec: Send + Sync {
    /// Name recorded in `conf.json` (e.g. "snappy", "zstd").
    fn name(&self) -> &str;

    /// Suffix appended to `<field>.bin` for column files, with the leading dot.
    fn extension(&self) -> &str;

    /// Compress `raw` into one complete, independently decodable block.
    fn compress_block(&self, raw: &[u8]) -> io::Result<Vec<u8>>;

    /// Wrap a reader over a concatenation of blocks with decompression.
    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>>;
}

impl std::fmt::Debug for dyn CompressionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionCodec")
            .field("name", &self.name())
            .finish()
    }
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-snappy")]
struct SnappyCodec;

#[cfg(feature = "compression-snappy")]
impl CompressionCodec for SnappyCodec {
    fn name(&self) -> &str {
        "snappy"
    }

    fn extension(&self) -> &str {
        ".sz"
    }

    fn compress_block(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        use std::io::Write;
        let mut enc = snap::write::FrameEncoder::new(Vec::new());
        enc.write_all(raw)?;
        enc.into_inner().map_err(|e| io::Error::other(e.to_string()))
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(snap::read::FrameDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extension(&self) -> &str {
        ".gz"
    }

    fn compress_block(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(raw)?;
        enc.finish()
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extension(&self) -> &str {
        ".zst"
    }

    fn compress_block(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        zstd::encode_all(raw, 3)
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read + Send>)
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl CompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn extension(&self) -> &str {
        ".bz2"
    }

    fn compress_block(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        use std::io::Write;
        let mut enc = BzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(raw)?;
        enc.finish()
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl CompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn extension(&self) -> &str {
        ".xz"
    }

    fn compress_block(&self, raw: &[u8]) -> io::Result<Vec<u8>> {
        use std::io::Write;
        use xz2::write::XzEncoder;
        let mut enc = XzEncoder::new(Vec::new(), 6);
        enc.write_all(raw)?;
        enc.finish()
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)))
    }
}
