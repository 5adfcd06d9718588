//! Purpose: Column types, scalar values, and the dense typed arrays backing each column.
//! Exports: `ColumnType`, `Value`, `ColumnData`.
//! Role: Shared data model for the body, the scalar index keys, and the wire codec.
//! Invariants: `Value` has a total order (type first, then value; floats by `total_cmp`).
//! Invariants: Empty strings are stored as null; null is never written as an index key.
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};
use crate::core::varint::{decode_varint, encode_varint};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ColumnType {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Epoch milliseconds.
    Timestamp,
}

impl ColumnType {
    pub const ALL: [ColumnType; 9] = [
        ColumnType::Bool,
        ColumnType::Byte,
        ColumnType::Short,
        ColumnType::Int,
        ColumnType::Long,
        ColumnType::Float,
        ColumnType::Double,
        ColumnType::String,
        ColumnType::Timestamp,
    ];

    pub fn code(self) -> u8 {
        match self {
            ColumnType::Bool => 1,
            ColumnType::Byte => 2,
            ColumnType::Short => 3,
            ColumnType::Int => 4,
            ColumnType::Long => 5,
            ColumnType::Float => 6,
            ColumnType::Double => 7,
            ColumnType::String => 8,
            ColumnType::Timestamp => 9,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.code() == code)
            .ok_or_else(|| {
                Error::new(ErrorKind::Format).with_message(format!("unknown column type code {code}"))
            })
    }

    /// Type tag as accepted by build specs and the CLI.
    pub fn tag(self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::Byte => "byte",
            ColumnType::Short => "short",
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Float => "float",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Timestamp => "date",
        }
    }

    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ColumnType::Bool | ColumnType::Byte => Some(1),
            ColumnType::Short => Some(2),
            ColumnType::Int | ColumnType::Float => Some(4),
            ColumnType::Long | ColumnType::Double | ColumnType::Timestamp => Some(8),
            ColumnType::String => None,
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, ColumnType::Float | ColumnType::Double)
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| {
                Error::new(ErrorKind::Argument)
                    .with_message(format!("unknown type tag `{tag}`"))
                    .with_hint("Use one of bool, byte, short, int, long, float, double, string, date.")
            })
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(Arc<str>),
    Timestamp(i64),
}

impl Value {
    pub fn str(value: &str) -> Self {
        if value.is_empty() {
            Value::Null
        } else {
            Value::Str(Arc::from(value))
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(_) => ColumnType::Bool,
            Value::Byte(_) => ColumnType::Byte,
            Value::Short(_) => ColumnType::Short,
            Value::Int(_) => ColumnType::Int,
            Value::Long(_) => ColumnType::Long,
            Value::Float(_) => ColumnType::Float,
            Value::Double(_) => ColumnType::Double,
            Value::Str(_) => ColumnType::String,
            Value::Timestamp(_) => ColumnType::Timestamp,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Byte(v) => Some(*v as f64),
            Value::Short(v) => Some(*v as f64),
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) | Value::Timestamp(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) | Value::Timestamp(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Value::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Convert to `ty`. Integer targets must hold the value exactly; float
    /// targets take the nearest value. Null stays null.
    pub fn coerce_to(&self, ty: ColumnType) -> Result<Value, Error> {
        if self.is_null() || self.column_type() == Some(ty) {
            return Ok(self.clone());
        }
        let converted = match ty {
            ColumnType::Bool => None,
            ColumnType::Byte => self.as_i64().and_then(|v| i8::try_from(v).ok()).map(Value::Byte),
            ColumnType::Short => self.as_i64().and_then(|v| i16::try_from(v).ok()).map(Value::Short),
            ColumnType::Int => self.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::Int),
            ColumnType::Long => self.as_i64().map(Value::Long),
            ColumnType::Timestamp => self.as_i64().map(Value::Timestamp),
            ColumnType::Float => self.as_f64().map(|v| Value::Float(v as f32)),
            ColumnType::Double => self.as_f64().map(Value::Double),
            ColumnType::String => None,
        };
        converted.ok_or_else(|| {
            Error::new(ErrorKind::Argument)
                .with_message(format!("cannot use {self} as a {ty} value"))
        })
    }

    fn rank(&self) -> u8 {
        self.column_type().map(ColumnType::code).unwrap_or(0)
    }

    /// Write the non-null scalar encoding used by index chunks.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            Value::Null => {
                return Err(Error::new(ErrorKind::Internal).with_message("null has no key encoding"));
            }
            Value::Bool(v) => buf.push(*v as u8),
            Value::Byte(v) => buf.push(*v as u8),
            Value::Short(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Value::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Value::Long(v) | Value::Timestamp(v) => buf.extend_from_slice(&v.to_be_bytes()),
            Value::Float(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Value::Double(v) => buf.extend_from_slice(&v.to_bits().to_be_bytes()),
            Value::Str(v) => {
                let len = u32::try_from(v.len()).map_err(|_| {
                    Error::new(ErrorKind::Range).with_message("string longer than u32::MAX bytes")
                })?;
                encode_varint(len, buf)?;
                buf.extend_from_slice(v.as_bytes());
            }
        }
        Ok(())
    }

    /// Inverse of [`Value::encode`]; a zero-length string decodes as null.
    pub fn decode(ty: ColumnType, buf: &[u8], pos: &mut usize) -> Result<Value, Error> {
        let Some(width) = ty.fixed_width() else {
            let len = decode_varint(buf, pos)? as usize;
            let bytes = take(buf, pos, len)?;
            let text = std::str::from_utf8(bytes).map_err(|err| {
                Error::new(ErrorKind::Format)
                    .with_message("string value is not valid UTF-8")
                    .with_offset(*pos as u64)
                    .with_source(err)
            })?;
            return Ok(Value::str(text));
        };
        let bytes = take(buf, pos, width)?;
        Ok(match ty {
            ColumnType::Bool => Value::Bool(bytes[0] != 0),
            ColumnType::Byte => Value::Byte(bytes[0] as i8),
            ColumnType::Short => Value::Short(i16::from_be_bytes([bytes[0], bytes[1]])),
            ColumnType::Int => Value::Int(i32::from_be_bytes(array4(bytes))),
            ColumnType::Float => Value::Float(f32::from_bits(u32::from_be_bytes(array4(bytes)))),
            ColumnType::Long => Value::Long(i64::from_be_bytes(array8(bytes))),
            ColumnType::Timestamp => Value::Timestamp(i64::from_be_bytes(array8(bytes))),
            ColumnType::Double | ColumnType::String => {
                Value::Double(f64::from_bits(u64::from_be_bytes(array8(bytes))))
            }
        })
    }
}

pub(crate) fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], Error> {
    let end = pos.checked_add(len).filter(|end| *end <= buf.len()).ok_or_else(|| {
        Error::new(ErrorKind::Format)
            .with_message("value runs past end of chunk")
            .with_offset(*pos as u64)
    })?;
    let bytes = &buf[*pos..end];
    *pos = end;
    Ok(bytes)
}

fn array4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

fn array8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Byte(a), Value::Byte(b)) => a.cmp(b),
            (Value::Short(a), Value::Short(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) | Value::Timestamp(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// Dense per-column storage. `None` is null.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Bool(Vec<Option<bool>>),
    Byte(Vec<Option<i8>>),
    Short(Vec<Option<i16>>),
    Int(Vec<Option<i32>>),
    Long(Vec<Option<i64>>),
    Float(Vec<Option<f32>>),
    Double(Vec<Option<f64>>),
    Str(Vec<Option<Arc<str>>>),
    Timestamp(Vec<Option<i64>>),
}

impl ColumnData {
    pub fn with_capacity(ty: ColumnType, capacity: usize) -> Self {
        match ty {
            ColumnType::Bool => ColumnData::Bool(Vec::with_capacity(capacity)),
            ColumnType::Byte => ColumnData::Byte(Vec::with_capacity(capacity)),
            ColumnType::Short => ColumnData::Short(Vec::with_capacity(capacity)),
            ColumnType::Int => ColumnData::Int(Vec::with_capacity(capacity)),
            ColumnType::Long => ColumnData::Long(Vec::with_capacity(capacity)),
            ColumnType::Float => ColumnData::Float(Vec::with_capacity(capacity)),
            ColumnType::Double => ColumnData::Double(Vec::with_capacity(capacity)),
            ColumnType::String => ColumnData::Str(Vec::with_capacity(capacity)),
            ColumnType::Timestamp => ColumnData::Timestamp(Vec::with_capacity(capacity)),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnData::Bool(_) => ColumnType::Bool,
            ColumnData::Byte(_) => ColumnType::Byte,
            ColumnData::Short(_) => ColumnType::Short,
            ColumnData::Int(_) => ColumnType::Int,
            ColumnData::Long(_) => ColumnType::Long,
            ColumnData::Float(_) => ColumnType::Float,
            ColumnData::Double(_) => ColumnType::Double,
            ColumnData::Str(_) => ColumnType::String,
            ColumnData::Timestamp(_) => ColumnType::Timestamp,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Byte(v) => v.len(),
            ColumnData::Short(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Long(v) | ColumnData::Timestamp(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value, coercing it to the column type first.
    pub fn push(&mut self, value: &Value) -> Result<(), Error> {
        let value = value.coerce_to(self.column_type())?;
        match (self, value) {
            (ColumnData::Bool(v), Value::Null) => v.push(None),
            (ColumnData::Byte(v), Value::Null) => v.push(None),
            (ColumnData::Short(v), Value::Null) => v.push(None),
            (ColumnData::Int(v), Value::Null) => v.push(None),
            (ColumnData::Long(v) | ColumnData::Timestamp(v), Value::Null) => v.push(None),
            (ColumnData::Float(v), Value::Null) => v.push(None),
            (ColumnData::Double(v), Value::Null) => v.push(None),
            (ColumnData::Str(v), Value::Null) => v.push(None),
            (ColumnData::Bool(v), Value::Bool(x)) => v.push(Some(x)),
            (ColumnData::Byte(v), Value::Byte(x)) => v.push(Some(x)),
            (ColumnData::Short(v), Value::Short(x)) => v.push(Some(x)),
            (ColumnData::Int(v), Value::Int(x)) => v.push(Some(x)),
            (ColumnData::Long(v), Value::Long(x)) => v.push(Some(x)),
            (ColumnData::Timestamp(v), Value::Timestamp(x)) => v.push(Some(x)),
            (ColumnData::Float(v), Value::Float(x)) => v.push(Some(x)),
            (ColumnData::Double(v), Value::Double(x)) => v.push(Some(x)),
            (ColumnData::Str(v), Value::Str(x)) => v.push(if x.is_empty() { None } else { Some(x) }),
            (data, value) => {
                return Err(Error::new(ErrorKind::Internal).with_message(format!(
                    "coerced {value} does not match {} storage",
                    data.column_type()
                )));
            }
        }
        Ok(())
    }

    /// Value at `row`; out-of-range rows read as null.
    pub fn get(&self, row: usize) -> Value {
        match self {
            ColumnData::Bool(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Bool),
            ColumnData::Byte(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Byte),
            ColumnData::Short(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Short),
            ColumnData::Int(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Int),
            ColumnData::Long(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Long),
            ColumnData::Timestamp(v) => {
                v.get(row).copied().flatten().map_or(Value::Null, Value::Timestamp)
            }
            ColumnData::Float(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Float),
            ColumnData::Double(v) => v.get(row).copied().flatten().map_or(Value::Null, Value::Double),
            ColumnData::Str(v) => v
                .get(row)
                .and_then(|x| x.clone())
                .map_or(Value::Null, Value::Str),
        }
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            ColumnData::Bool(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Byte(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Short(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Int(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Long(v) | ColumnData::Timestamp(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Float(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Double(v) => v.get(row).is_none_or(Option::is_none),
            ColumnData::Str(v) => v.get(row).is_none_or(Option::is_none),
        }
    }

    pub fn str_at(&self, row: usize) -> Option<&str> {
        match self {
            ColumnData::Str(v) => v.get(row).and_then(|x| x.as_deref()),
            _ => None,
        }
    }

    pub fn f64_at(&self, row: usize) -> Option<f64> {
        match self {
            ColumnData::Float(v) => v.get(row).copied().flatten().map(f64::from),
            ColumnData::Double(v) => v.get(row).copied().flatten(),
            _ => None,
        }
    }

    /// Body chunk encoding: presence bitmap then values for fixed-width
    /// types, varint-prefixed strings otherwise.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let rows = self.len();
        if let ColumnData::Str(values) = self {
            for value in values {
                match value {
                    Some(text) => Value::Str(text.clone()).encode(buf)?,
                    None => encode_varint(0, buf)?,
                }
            }
            return Ok(());
        }
        let mut presence = vec![0u8; rows.div_ceil(8)];
        for row in 0..rows {
            if !self.is_null(row) {
                presence[row / 8] |= 1 << (row % 8);
            }
        }
        buf.extend_from_slice(&presence);
        let ty = self.column_type();
        let zero = zero_value(ty);
        for row in 0..rows {
            match self.get(row) {
                Value::Null => zero.encode(buf)?,
                value => value.encode(buf)?,
            }
        }
        Ok(())
    }

    pub fn decode(ty: ColumnType, rows: usize, buf: &[u8], pos: &mut usize) -> Result<Self, Error> {
        // Each row occupies at least one byte.
        let mut data = ColumnData::with_capacity(ty, rows.min(buf.len().saturating_sub(*pos)));
        if ty == ColumnType::String {
            for _ in 0..rows {
                data.push(&Value::decode(ty, buf, pos)?)?;
            }
            return Ok(data);
        }
        let presence = take(buf, pos, rows.div_ceil(8))?;
        for row in 0..rows {
            let value = Value::decode(ty, buf, pos)?;
            if presence[row / 8] & (1 << (row % 8)) == 0 {
                data.push(&Value::Null)?;
            } else {
                data.push(&value)?;
            }
        }
        Ok(data)
    }
}

fn zero_value(ty: ColumnType) -> Value {
    match ty {
        ColumnType::Bool => Value::Bool(false),
        ColumnType::Byte => Value::Byte(0),
        ColumnType::Short => Value::Short(0),
        ColumnType::Int => Value::Int(0),
        ColumnType::Long => Value::Long(0),
        ColumnType::Float => Value::Float(0.0),
        ColumnType::Double => Value::Double(0.0),
        ColumnType::Timestamp => Value::Timestamp(0),
        ColumnType::String => Value::Null,
    }
}
