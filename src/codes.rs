//! Dictionary code tables for `uvarint` columns.
//!
//! A categorical field is stored as small integer codes; the table mapping each code
//! back to its string is built outside this crate and saved as a JSON object keyed by
//! the decimal code, e.g. `{"0": "A", "1": "B"}`, in `<CodesDir>/<field>.json`.

use crate::error::{Error, Result};
use crate::layout::read_json;
use crate::schema::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Code → string lookup for one categorical field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeTable {
    entries: HashMap<u64, String>,
}

impl CodeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a table saved as a JSON object with decimal string keys.
    ///
    /// # Errors
    /// [`Error::Io`] or [`Error::Json`] when the file cannot be read, and
    /// [`Error::Decode`] for a key that is not a decimal `u64`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw: BTreeMap<String, String> = read_json(path)?;
        let entries = raw
            .into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<u64>()
                    .map(|code| (code, v))
                    .map_err(|e| {
                        Error::decode(format!("code table {}", path.display()), format!("key {k:?}: {e}"))
                    })
            })
            .collect::<Result<_>>()?;
        Ok(Self { entries })
    }

    pub fn insert(&mut self, code: u64, label: impl Into<String>) {
        self.entries.insert(code, label.into());
    }

    #[must_use]
    pub fn get(&self, code: u64) -> Option<&str> {
        self.entries.get(&code).map(String::as_str)
    }

    /// Resolve a stored code to its label. Unknown codes resolve to the empty string.
    #[must_use]
    pub fn resolve(&self, code: u64) -> Value {
        Value::Text(self.get(code).unwrap_or_default().to_string())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(u64, S)> for CodeTable {
    fn from_iter<I: IntoIterator<Item = (u64, S)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_codes_and_blanks_unknown() {
        let t: CodeTable = [(0, "A"), (1, "B"), (2, "C")].into_iter().collect();
        let got: Vec<Value> = [0, 2, 1, 9].into_iter().map(|c| t.resolve(c)).collect();
        assert_eq!(
            got,
            vec![
                Value::Text("A".into()),
                Value::Text("C".into()),
                Value::Text("B".into()),
                Value::Text(String::new()),
            ]
        );
    }

    #[test]
    fn loads_string_keyed_json() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let p = dir.path().join("Dx1.json");
        std::fs::write(&p, r#"{"0": "V70", "12": "250.00"}"#)?;
        let t = CodeTable::load(&p)?;
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(12), Some("250.00"));

        std::fs::write(&p, r#"{"x": "bad"}"#)?;
        assert!(matches!(CodeTable::load(&p), Err(Error::Decode { .. })));
        Ok(())
    }
}
