//! Source file pattern expansion.
//!
//! Ingestion configs list their inputs as file names or glob patterns relative to a
//! source directory. Patterns are expanded here into a sorted, de-duplicated file
//! list so that a run processes the same files in the same order every time.
//!
//! # Examples
//!
//! ```no_run
//! use colshard::io::glob::expand_sources;
//! use std::path::Path;
//!
//! let files = expand_sources(
//!     Path::new("/data/marketscan"),
//!     &["ccaeo*.csv.gz".to_string(), "mdcro2019.csv".to_string()],
//! )?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use anyhow::{Context, Result, bail};
use glob::glob;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Expand a glob pattern into a sorted vector of matching files.
///
/// Supports the usual syntax (`*`, `?`, `**`, `[abc]`, `[!abc]`). Directories are
/// skipped. A pattern without wildcards matches the one file it names, if it exists.
///
/// # Errors
///
/// Returns an error if the pattern is invalid or a directory cannot be read. Zero
/// matches is not an error here; see [`expand_glob_required`].
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }
    result.sort();
    Ok(result)
}

/// Expand a glob pattern, returning an error if no files are found.
///
/// # Errors
///
/// As [`expand_glob`], plus an error when nothing matches.
pub fn expand_glob_required(pattern: &str) -> Result<Vec<PathBuf>> {
    let files = expand_glob(pattern)?;
    if files.is_empty() {
        bail!("no files found matching pattern: {pattern}");
    }
    Ok(files)
}

/// Expand every pattern relative to `base` (absolute patterns are used as given) and
/// return the union, sorted and without duplicates.
///
/// # Errors
///
/// Fails on the first pattern that is invalid or matches no file.
pub fn expand_sources(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for pattern in patterns {
        let full = base.join(pattern);
        let full = full
            .to_str()
            .with_context(|| format!("source path is not valid UTF-8: {}", full.display()))?;
        files.extend(expand_glob_required(full)?);
    }
    Ok(files.into_iter().collect())
}
