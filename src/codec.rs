//! Column file encoding and decoding.
//!
//! One codec covers every column type. The write side is [`ColumnBuffer`], a closed
//! enum of typed vectors that accumulates a bucket's values for one field and encodes
//! them as a single block. The read side is [`decode_value`], which pulls one value of a
//! given [`DType`] from an (already decompressed) byte stream.
//!
//! Layouts:
//! - fixed-width integers and floats: little-endian, one value per slot, no delimiter;
//! - `string`: the UTF-8 bytes followed by `\n`;
//! - `uvarint`: minimal-length unsigned LEB128.
//!
//! Nothing marks row boundaries; the row position is the count of values decoded.

use crate::error::{Error, Result};
use crate::schema::{DType, Value};
use std::io::{self, BufRead, Write};

/// Growable typed buffer for one column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Text(Vec<String>),
    Uvarint(Vec<u64>),
}

macro_rules! dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            ColumnBuffer::U8($v) => $body,
            ColumnBuffer::U16($v) => $body,
            ColumnBuffer::U32($v) => $body,
            ColumnBuffer::U64($v) => $body,
            ColumnBuffer::F32($v) => $body,
            ColumnBuffer::F64($v) => $body,
            ColumnBuffer::Text($v) => $body,
            ColumnBuffer::Uvarint($v) => $body,
        }
    };
}

impl ColumnBuffer {
    /// Empty buffer for a column of type `dtype`.
    #[must_use]
    pub fn new(dtype: DType) -> Self {
        match dtype {
            DType::U8 => ColumnBuffer::U8(Vec::new()),
            DType::U16 => ColumnBuffer::U16(Vec::new()),
            DType::U32 => ColumnBuffer::U32(Vec::new()),
            DType::U64 => ColumnBuffer::U64(Vec::new()),
            DType::F32 => ColumnBuffer::F32(Vec::new()),
            DType::F64 => ColumnBuffer::F64(Vec::new()),
            DType::Text => ColumnBuffer::Text(Vec::new()),
            DType::Uvarint => ColumnBuffer::Uvarint(Vec::new()),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            ColumnBuffer::U8(_) => DType::U8,
            ColumnBuffer::U16(_) => DType::U16,
            ColumnBuffer::U32(_) => DType::U32,
            ColumnBuffer::U64(_) => DType::U64,
            ColumnBuffer::F32(_) => DType::F32,
            ColumnBuffer::F64(_) => DType::F64,
            ColumnBuffer::Text(_) => DType::Text,
            ColumnBuffer::Uvarint(_) => DType::Uvarint,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        dispatch!(self, v => v.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all buffered values, keeping the allocation.
    pub fn clear(&mut self) {
        dispatch!(self, v => v.clear());
    }

    /// Append one value.
    ///
    /// # Errors
    /// Returns [`Error::Decode`] if the value does not fit the column type, or if a
    /// text value contains the newline terminator.
    pub fn push(&mut self, value: Value) -> Result<()> {
        match (self, value) {
            (ColumnBuffer::U8(v), Value::U8(x)) => v.push(x),
            (ColumnBuffer::U16(v), Value::U16(x)) => v.push(x),
            (ColumnBuffer::U32(v), Value::U32(x)) => v.push(x),
            (ColumnBuffer::U64(v), Value::U64(x)) => v.push(x),
            (ColumnBuffer::Uvarint(v), Value::U64(x)) => v.push(x),
            (ColumnBuffer::F32(v), Value::F32(x)) => v.push(x),
            (ColumnBuffer::F64(v), Value::F64(x)) => v.push(x),
            (ColumnBuffer::Text(v), Value::Text(s)) => {
                if s.contains('\n') {
                    return Err(Error::decode("text column", "value contains a newline"));
                }
                v.push(s);
            }
            (buf, value) => {
                return Err(Error::decode(
                    "column buffer",
                    format!("{value:?} does not fit a {} column", buf.dtype()),
                ));
            }
        }
        Ok(())
    }

    /// Encode every buffered value, in order, into `out`.
    ///
    /// # Errors
    /// Propagates write errors from `out`.
    pub fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match self {
            ColumnBuffer::U8(v) => out.write_all(v),
            ColumnBuffer::U16(v) => v.iter().try_for_each(|x| out.write_all(&x.to_le_bytes())),
            ColumnBuffer::U32(v) => v.iter().try_for_each(|x| out.write_all(&x.to_le_bytes())),
            ColumnBuffer::U64(v) => v.iter().try_for_each(|x| out.write_all(&x.to_le_bytes())),
            ColumnBuffer::F32(v) => v.iter().try_for_each(|x| out.write_all(&x.to_le_bytes())),
            ColumnBuffer::F64(v) => v.iter().try_for_each(|x| out.write_all(&x.to_le_bytes())),
            ColumnBuffer::Text(v) => v.iter().try_for_each(|s| {
                out.write_all(s.as_bytes())?;
                out.write_all(b"\n")
            }),
            ColumnBuffer::Uvarint(v) => {
                let mut scratch = [0u8; MAX_VARINT_LEN];
                v.iter().try_for_each(|&x| {
                    let n = put_uvarint(&mut scratch, x);
                    out.write_all(&scratch[..n])
                })
            }
        }
    }
}

/// Longest LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Write `x` as an unsigned LEB128 varint into `buf`, returning the byte count.
pub fn put_uvarint(buf: &mut [u8; MAX_VARINT_LEN], mut x: u64) -> usize {
    let mut i = 0;
    while x >= 0x80 {
        buf[i] = (x as u8) | 0x80;
        x >>= 7;
        i += 1;
    }
    buf[i] = x as u8;
    i + 1
}

/// Read one unsigned LEB128 varint. `Ok(None)` on clean end of stream.
///
/// # Errors
/// [`Error::Decode`] on truncation inside a varint or on overflow.
pub fn read_uvarint<R: BufRead>(r: &mut R) -> Result<Option<u64>> {
    let mut x: u64 = 0;
    let mut shift = 0u32;
    for i in 0..MAX_VARINT_LEN {
        let Some(b) = read_byte(r)? else {
            if i == 0 {
                return Ok(None);
            }
            return Err(Error::decode("uvarint", "stream ended inside a varint"));
        };
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(Error::decode("uvarint", "varint overflows u64"));
            }
            return Ok(Some(x | (u64::from(b) << shift)));
        }
        x |= u64::from(b & 0x7f) << shift;
        shift += 7;
    }
    Err(Error::decode("uvarint", "varint overflows u64"))
}

fn read_byte<R: BufRead>(r: &mut R) -> Result<Option<u8>> {
    loop {
        match r.fill_buf() {
            Ok([]) => return Ok(None),
            Ok(buf) => {
                let b = buf[0];
                r.consume(1);
                return Ok(Some(b));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::decode("column stream", e.to_string())),
        }
    }
}

/// Fill `buf` completely. `Ok(false)` if the stream was already at its end.
fn read_exact_or_eof<R: BufRead>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = match r.read(&mut buf[filled..]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::decode("column stream", e.to_string())),
        };
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::decode(
                "column stream",
                format!("stream ended after {filled} of {} bytes", buf.len()),
            ));
        }
        filled += n;
    }
    Ok(true)
}

/// Decode the next value of type `dtype`. `Ok(None)` at a clean end of stream.
///
/// `uvarint` columns decode to the raw code as `Value::U64`; resolving it against a
/// code table is the reader's job.
///
/// # Errors
/// [`Error::Decode`] when the stream ends inside a value, a text value is not UTF-8,
/// or a varint overflows.
pub fn decode_value<R: BufRead>(r: &mut R, dtype: DType) -> Result<Option<Value>> {
    macro_rules! fixed {
        ($t:ty, $variant:ident) => {{
            let mut b = [0u8; std::mem::size_of::<$t>()];
            if !read_exact_or_eof(r, &mut b)? {
                return Ok(None);
            }
            Value::$variant(<$t>::from_le_bytes(b))
        }};
    }

    let v = match dtype {
        DType::U8 => fixed!(u8, U8),
        DType::U16 => fixed!(u16, U16),
        DType::U32 => fixed!(u32, U32),
        DType::U64 => fixed!(u64, U64),
        DType::F32 => fixed!(f32, F32),
        DType::F64 => fixed!(f64, F64),
        DType::Uvarint => match read_uvarint(r)? {
            Some(x) => Value::U64(x),
            None => return Ok(None),
        },
        DType::Text => {
            let mut line = Vec::new();
            let n = r
                .read_until(b'\n', &mut line)
                .map_err(|e| Error::decode("text column", e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            if line.pop() != Some(b'\n') {
                return Err(Error::decode("text column", "last value has no terminator"));
            }
            let s = String::from_utf8(line)
                .map_err(|e| Error::decode("text column", e.to_string()))?;
            Value::Text(s)
        }
    };
    Ok(Some(v))
}

/// Skip the next value without materializing it. `Ok(false)` at end of stream.
///
/// # Errors
/// Same as [`decode_value`].
pub fn skip_value<R: BufRead>(r: &mut R, dtype: DType) -> Result<bool> {
    match dtype.fixed_width() {
        Some(w) => {
            let mut b = [0u8; 8];
            read_exact_or_eof(r, &mut b[..w])
        }
        None => Ok(decode_value(r, dtype)?.is_some()),
    }
}
