//! Field schema, semantic column types and typed values.
//!
//! A [`Schema`] names the fields stored for every record, the source column each one
//! is extracted from, its [`DType`], and which field carries the subject id used for
//! sharding. The type names (`uint8`, `string`, `uvarint`, ...) are the ones written to
//! each bucket's `dtypes.json`.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Semantic type of a stored column. Closed set; each has exactly one binary layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Newline-terminated text.
    Text,
    /// Dictionary code stored as an unsigned LEB128 varint.
    Uvarint,
}

impl DType {
    /// Name used in `dtypes.json` and configuration files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::Text => "string",
            DType::Uvarint => "uvarint",
        }
    }

    /// Width in bytes of one encoded value, for fixed-width types.
    #[must_use]
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            DType::U8 => Some(1),
            DType::U16 => Some(2),
            DType::U32 | DType::F32 => Some(4),
            DType::U64 | DType::F64 => Some(8),
            DType::Text | DType::Uvarint => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "uint8" => DType::U8,
            "uint16" => DType::U16,
            "uint32" => DType::U32,
            "uint64" => DType::U64,
            "float32" => DType::F32,
            "float64" => DType::F64,
            "string" => DType::Text,
            "uvarint" => DType::Uvarint,
            other => return Err(Error::UnknownType(other.to_string())),
        })
    }
}

/// One normalized field value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Text(String),
}

impl Value {
    /// Whether this value can be stored in a column of type `dtype`.
    ///
    /// `uvarint` columns hold dictionary codes, which are `U64` values on the write path.
    #[must_use]
    pub fn fits(&self, dtype: DType) -> bool {
        matches!(
            (self, dtype),
            (Value::U8(_), DType::U8)
                | (Value::U16(_), DType::U16)
                | (Value::U32(_), DType::U32)
                | (Value::U64(_), DType::U64 | DType::Uvarint)
                | (Value::F32(_), DType::F32)
                | (Value::F64(_), DType::F64)
                | (Value::Text(_), DType::Text)
        )
    }

    /// The zero value stored when a source cell is missing.
    #[must_use]
    pub fn zero(dtype: DType) -> Self {
        match dtype {
            DType::U8 => Value::U8(0),
            DType::U16 => Value::U16(0),
            DType::U32 => Value::U32(0),
            DType::U64 | DType::Uvarint => Value::U64(0),
            DType::F32 => Value::F32(0.0),
            DType::F64 => Value::F64(0.0),
            DType::Text => Value::Text(String::new()),
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(u64::from(v)),
            Value::U16(v) => Some(u64::from(v)),
            Value::U32(v) => Some(u64::from(v)),
            Value::U64(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v:.6}"),
            Value::F64(v) => write!(f, "{v:.6}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// One stored field: output name, source column and type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub column: String,
    pub dtype: DType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, column: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            dtype,
        }
    }
}

/// Ordered set of stored fields plus the subject id field.
#[derive(Clone, Debug)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    subject: usize,
}

impl Schema {
    /// Build a schema, checking that field names are unique and that the subject field
    /// exists and is a `uint64` column.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an empty schema, a duplicate name, or a bad
    /// subject field.
    pub fn new(fields: Vec<FieldSpec>, subject_field: &str) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::config("schema has no fields"));
        }
        let mut seen = HashSet::new();
        for f in &fields {
            if !seen.insert(f.name.as_str()) {
                return Err(Error::config(format!("duplicate field name {}", f.name)));
            }
            if f.name.is_empty() || f.name.contains(['/', '\\']) {
                return Err(Error::config(format!("invalid field name {:?}", f.name)));
            }
        }
        let subject = fields
            .iter()
            .position(|f| f.name == subject_field)
            .ok_or_else(|| {
                Error::config(format!("subject field {subject_field} is not in the schema"))
            })?;
        if fields[subject].dtype != DType::U64 {
            return Err(Error::config(format!(
                "subject field {subject_field} must be uint64, found {}",
                fields[subject].dtype
            )));
        }
        Ok(Self { fields, subject })
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn subject_index(&self) -> usize {
        self.subject
    }

    #[must_use]
    pub fn subject_field(&self) -> &FieldSpec {
        &self.fields[self.subject]
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field name → type name, the content of `dtypes.json`.
    #[must_use]
    pub fn dtypes(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.dtype.name().to_string()))
            .collect()
    }

    /// Resolve every schema field to a column position in a source file.
    ///
    /// Column names match ASCII case-insensitively after trimming.
    ///
    /// # Errors
    /// Returns [`Error::SourceFormat`] naming the first required column that is absent.
    pub fn bind(&self, file: &Path, column_names: &[String]) -> Result<Binding> {
        let positions = self
            .fields
            .iter()
            .map(|f| {
                column_names
                    .iter()
                    .position(|c| c.trim().eq_ignore_ascii_case(f.column.trim()))
                    .ok_or_else(|| Error::SourceFormat {
                        file: file.to_path_buf(),
                        column: f.column.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Binding {
            positions,
            width: column_names.len(),
        })
    }
}

/// Schema field index → source column index, resolved once per source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    positions: Vec<usize>,
    width: usize,
}

impl Binding {
    /// Source column for schema field `field`.
    #[must_use]
    pub fn column(&self, field: usize) -> usize {
        self.positions[field]
    }

    /// Number of columns in the bound source.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("Enrolid", "ENROLID", DType::U64),
            FieldSpec::new("Dx1", "DX1", DType::Text),
            FieldSpec::new("Pay", "PAY", DType::F32),
        ]
    }

    #[test]
    fn dtype_names_parse_back() {
        for d in [
            DType::U8,
            DType::U16,
            DType::U32,
            DType::U64,
            DType::F32,
            DType::F64,
            DType::Text,
            DType::Uvarint,
        ] {
            assert_eq!(d.name().parse::<DType>().unwrap(), d);
        }
        assert!(matches!("int128".parse::<DType>(), Err(Error::UnknownType(n)) if n == "int128"));
    }

    #[test]
    fn subject_must_be_uint64() {
        assert!(Schema::new(claims(), "Dx1").is_err());
        assert!(Schema::new(claims(), "Missing").is_err());
        let s = Schema::new(claims(), "Enrolid").unwrap();
        assert_eq!(s.subject_index(), 0);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut f = claims();
        f.push(FieldSpec::new("Pay", "NETPAY", DType::F32));
        assert!(Schema::new(f, "Enrolid").is_err());
    }

    #[test]
    fn bind_is_case_insensitive_and_reports_missing() {
        let s = Schema::new(claims(), "Enrolid").unwrap();
        let cols: Vec<String> = ["pay", "enrolid", "Dx1"].iter().map(|c| c.to_string()).collect();
        let b = s.bind(Path::new("a.csv"), &cols).unwrap();
        assert_eq!(b.column(0), 1);
        assert_eq!(b.column(2), 0);

        let err = s.bind(Path::new("a.csv"), &cols[..2]).unwrap_err();
        assert!(matches!(err, Error::SourceFormat { column, .. } if column == "DX1"));
    }

    #[test]
    fn value_fits_its_dtype() {
        assert!(Value::U64(3).fits(DType::Uvarint));
        assert!(!Value::U32(3).fits(DType::U64));
        assert!(Value::zero(DType::Text).fits(DType::Text));
    }
}
