//! Decoded source chunks and the typed records extracted from them.
//!
//! A [`Chunk`] is what a source reader hands over: one block of rows stored column-major
//! with a missing flag per cell, exactly as decoded from the source with no type
//! conversion. [`Chunk::records`] walks it row by row and normalizes each row into a
//! [`Record`] following the [`Schema`]. Rows whose subject id is missing or unreadable
//! are dropped here, before they can reach the sharding step.

use crate::error::{Error, Result};
use crate::schema::{Binding, DType, Schema, Value};

/// One raw source column.
#[derive(Clone, Debug, PartialEq)]
pub enum RawColumn {
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl RawColumn {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RawColumn::Numeric(v) => v.len(),
            RawColumn::Text(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Column-major block of raw values plus per-cell missing flags.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    columns: Vec<RawColumn>,
    missing: Vec<Vec<bool>>,
    rows: usize,
}

impl Chunk {
    /// Assemble a chunk, checking that every column and missing-flag vector has the
    /// same length.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] when lengths disagree.
    pub fn new(columns: Vec<RawColumn>, missing: Vec<Vec<bool>>) -> Result<Self> {
        if columns.len() != missing.len() {
            return Err(Error::decode(
                "chunk",
                format!(
                    "{} columns but {} missing-flag vectors",
                    columns.len(),
                    missing.len()
                ),
            ));
        }
        let rows = columns.first().map_or(0, RawColumn::len);
        for (i, (c, m)) in columns.iter().zip(&missing).enumerate() {
            if c.len() != rows || m.len() != rows {
                return Err(Error::decode(
                    "chunk",
                    format!(
                        "column {i} has {} values and {} flags, expected {rows}",
                        c.len(),
                        m.len()
                    ),
                ));
            }
        }
        Ok(Self {
            columns,
            missing,
            rows,
        })
    }

    /// Chunk with no missing cells.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] when column lengths disagree.
    pub fn dense(columns: Vec<RawColumn>) -> Result<Self> {
        let missing = columns.iter().map(|c| vec![false; c.len()]).collect();
        Self::new(columns, missing)
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn columns(&self) -> &[RawColumn] {
        &self.columns
    }

    /// Whether the cell at `column`, `row` was missing in the source.
    #[must_use]
    pub fn is_missing(&self, column: usize, row: usize) -> bool {
        self.missing[column][row]
    }

    /// Iterate the records of this chunk.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] when the chunk does not have the column count the
    /// binding was resolved against.
    pub fn records<'a>(&'a self, schema: &'a Schema, binding: &'a Binding) -> Result<Records<'a>> {
        if binding.width() != self.width() {
            return Err(Error::decode(
                "chunk",
                format!(
                    "chunk has {} columns, source header declared {}",
                    self.width(),
                    binding.width()
                ),
            ));
        }
        Ok(Records {
            chunk: self,
            schema,
            binding,
            row: 0,
            dropped: 0,
        })
    }
}

/// A normalized row plus the subject id it is sharded by.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub subject_id: u64,
    /// One value per schema field, in schema order.
    pub values: Vec<Value>,
}

/// Row iterator over a [`Chunk`]; see [`Chunk::records`].
pub struct Records<'a> {
    chunk: &'a Chunk,
    schema: &'a Schema,
    binding: &'a Binding,
    row: usize,
    dropped: usize,
}

impl Records<'_> {
    /// Rows skipped so far because their subject id was missing or unreadable.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn extract(&self, row: usize) -> Result<Option<Record>> {
        let subject_col = self.binding.column(self.schema.subject_index());
        let Some(subject_id) = subject_id(
            &self.chunk.columns[subject_col],
            self.chunk.missing[subject_col][row],
            row,
        ) else {
            return Ok(None);
        };

        let mut values = Vec::with_capacity(self.schema.len());
        for (i, field) in self.schema.fields().iter().enumerate() {
            let v = if i == self.schema.subject_index() {
                Value::U64(subject_id)
            } else {
                let col = self.binding.column(i);
                if self.chunk.missing[col][row] {
                    Value::zero(field.dtype)
                } else {
                    normalize(&self.chunk.columns[col], row, field.dtype)
                        .map_err(|msg| Error::decode(format!("field {} row {row}", field.name), msg))?
                }
            };
            values.push(v);
        }
        Ok(Some(Record { subject_id, values }))
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.row < self.chunk.rows {
            let row = self.row;
            self.row += 1;
            match self.extract(row) {
                Ok(Some(rec)) => return Some(Ok(rec)),
                Ok(None) => self.dropped += 1,
                Err(e) => {
                    // a bad row poisons the rest of the chunk
                    self.row = self.chunk.rows;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

fn subject_id(col: &RawColumn, missing: bool, row: usize) -> Option<u64> {
    if missing {
        return None;
    }
    let from_float = |x: f64| (x.is_finite() && x >= 0.0).then_some(x as u64);
    match col {
        RawColumn::Numeric(v) => from_float(v[row]),
        RawColumn::Text(v) => {
            let s = v[row].trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
    }
}

fn normalize(col: &RawColumn, row: usize, dtype: DType) -> std::result::Result<Value, String> {
    match col {
        RawColumn::Numeric(v) => Ok(from_number(v[row], dtype)),
        RawColumn::Text(v) => from_text(v[row].trim(), dtype),
    }
}

fn from_number(x: f64, dtype: DType) -> Value {
    match dtype {
        DType::U8 => Value::U8(x as u8),
        DType::U16 => Value::U16(x as u16),
        DType::U32 => Value::U32(x as u32),
        DType::U64 | DType::Uvarint => Value::U64(x as u64),
        DType::F32 => Value::F32(x as f32),
        DType::F64 => Value::F64(x),
        DType::Text => Value::Text(x.to_string()),
    }
}

fn from_text(s: &str, dtype: DType) -> std::result::Result<Value, String> {
    if dtype == DType::Text {
        if s.contains('\n') {
            return Err(format!("text value {s:?} contains a newline"));
        }
        return Ok(Value::Text(s.to_string()));
    }
    // Integer text wraps to the column width; any other text is zero.
    let int = s.parse::<i64>().ok();
    let float = s.parse::<f64>().ok();
    Ok(match dtype {
        DType::U8 => Value::U8(int.map_or(0, |x| x as u8)),
        DType::U16 => Value::U16(int.map_or(0, |x| x as u16)),
        DType::U32 => Value::U32(int.map_or(0, |x| x as u32)),
        DType::U64 | DType::Uvarint => {
            Value::U64(s.parse::<u64>().ok().or(int.map(|x| x as u64)).unwrap_or(0))
        }
        DType::F32 => Value::F32(float.map_or(0.0, |f| f as f32)),
        DType::F64 => Value::F64(float.unwrap_or(0.0)),
        DType::Text => unreachable!("handled above"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSpec;
    use std::path::Path;

    fn schema() -> Schema {
        Schema::new(
            vec![
                FieldSpec::new("Enrolid", "ENROLID", DType::U64),
                FieldSpec::new("Dstatus", "DSTATUS", DType::U8),
                FieldSpec::new("Dx1", "DX1", DType::Text),
            ],
            "Enrolid",
        )
        .unwrap()
    }

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn skips_missing_subject_ids() {
        let s = schema();
        let b = s
            .bind(Path::new("t"), &names(&["ENROLID", "DSTATUS", "DX1"]))
            .unwrap();
        let chunk = Chunk::new(
            vec![
                RawColumn::Numeric(vec![7.0, f64::NAN, 9.0, -1.0]),
                RawColumn::Text(vec!["01".into(), "2".into(), "".into(), "4".into()]),
                RawColumn::Text(vec![" 250.0 ".into(), "x".into(), "y".into(), "z".into()]),
            ],
            vec![
                vec![false, true, false, false],
                vec![false; 4],
                vec![false; 4],
            ],
        )
        .unwrap();

        let mut it = chunk.records(&s, &b).unwrap();
        let recs: Vec<Record> = it.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(it.dropped(), 2);
        assert_eq!(
            recs[0].values,
            vec![Value::U64(7), Value::U8(1), Value::Text("250.0".into())]
        );
        // empty status text becomes zero
        assert_eq!(recs[1].values[1], Value::U8(0));
    }

    #[test]
    fn integer_text_wraps_to_column_width() {
        let s = schema();
        let b = s
            .bind(Path::new("t"), &names(&["ENROLID", "DSTATUS", "DX1"]))
            .unwrap();
        let status = ["300", "-1", "2.0", "abc", "+7"];
        let chunk = Chunk::dense(vec![
            RawColumn::Numeric(vec![1.0; status.len()]),
            RawColumn::Text(status.iter().map(|s| s.to_string()).collect()),
            RawColumn::Text(vec![String::new(); status.len()]),
        ])
        .unwrap();
        let got: Vec<Value> = chunk
            .records(&s, &b)
            .unwrap()
            .map(|r| r.unwrap().values[1].clone())
            .collect();
        assert_eq!(
            got,
            [Value::U8(44), Value::U8(255), Value::U8(0), Value::U8(0), Value::U8(7)]
        );
    }

    #[test]
    fn newline_in_text_is_a_decode_error() {
        let s = schema();
        let b = s
            .bind(Path::new("t"), &names(&["ENROLID", "DSTATUS", "DX1"]))
            .unwrap();
        let chunk = Chunk::dense(vec![
            RawColumn::Numeric(vec![1.0]),
            RawColumn::Numeric(vec![1.0]),
            RawColumn::Text(vec!["a\nb".into()]),
        ])
        .unwrap();
        let res: Result<Vec<Record>> = chunk.records(&s, &b).unwrap().collect();
        assert!(matches!(res, Err(Error::Decode { .. })));
    }

    #[test]
    fn ragged_chunk_rejected() {
        let err = Chunk::dense(vec![
            RawColumn::Numeric(vec![1.0, 2.0]),
            RawColumn::Numeric(vec![1.0]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
