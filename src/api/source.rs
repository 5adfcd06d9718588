//! Purpose: Row sources feeding `RimBuilder`.
//! Exports: `RowSource`, `JsonlRowSource`, `VecRowSource`, `json_to_value`, `value_to_json`.
//! Role: Turns external records into one typed `Value` per declared column.
//! Invariants: A source yields rows in column declaration order, already coerced.
//! Invariants: Blank lines are skipped; every other line is exactly one row.
use std::io::BufRead;

use bstr::ByteSlice;
use serde_json::Value as Json;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::body::ColumnDef;
use crate::core::error::{Error, ErrorKind};
use crate::core::value::{ColumnType, Value};

pub const DEFAULT_MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

pub trait RowSource {
    /// Next row, or `None` when the source is exhausted.
    fn next_row(&mut self, columns: &[ColumnDef]) -> Option<Result<Vec<Value>, Error>>;
}

/// In-memory rows, mostly for tests and embedding.
pub struct VecRowSource {
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl VecRowSource {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl RowSource for VecRowSource {
    fn next_row(&mut self, _columns: &[ColumnDef]) -> Option<Result<Vec<Value>, Error>> {
        self.rows.next().map(Ok)
    }
}

/// JSON Lines: each line is an array (positional) or an object (by column name;
/// missing keys are null).
pub struct JsonlRowSource<R> {
    reader: R,
    line: Vec<u8>,
    line_no: u64,
    max_record_bytes: usize,
}

impl<R: BufRead> JsonlRowSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            line_no: 0,
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }

    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }

    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    fn parse_line(&self, columns: &[ColumnDef]) -> Result<Vec<Value>, Error> {
        let trimmed = self.line.trim();
        if trimmed.len() > self.max_record_bytes {
            return Err(self.line_error("record exceeds size limit"));
        }
        let record: Json = serde_json::from_slice(trimmed).map_err(|err| {
            self.line_error("invalid JSON")
                .with_hint("Each line must be one JSON array or object.")
                .with_source(err)
        })?;
        let cells: Vec<&Json> = match &record {
            Json::Array(items) => {
                if items.len() != columns.len() {
                    return Err(self.line_error(&format!(
                        "row has {} values for {} columns",
                        items.len(),
                        columns.len()
                    )));
                }
                items.iter().collect()
            }
            Json::Object(map) => columns
                .iter()
                .map(|def| map.get(&def.name).unwrap_or(&Json::Null))
                .collect(),
            _ => return Err(self.line_error("row must be a JSON array or object")),
        };
        cells
            .into_iter()
            .zip(columns)
            .map(|(cell, def)| {
                json_to_value(cell, def.column_type).map_err(|err| {
                    err.with_column(def.name.clone())
                        .with_row(self.line_no)
                })
            })
            .collect()
    }

    fn line_error(&self, message: &str) -> Error {
        Error::new(ErrorKind::Argument)
            .with_message(format!("line {}: {message}", self.line_no))
            .with_row(self.line_no)
    }
}

impl<R: BufRead> RowSource for JsonlRowSource<R> {
    fn next_row(&mut self, columns: &[ColumnDef]) -> Option<Result<Vec<Value>, Error>> {
        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(err) => {
                    return Some(Err(Error::new(ErrorKind::Io)
                        .with_message("failed to read rows")
                        .with_source(err)));
                }
            }
            self.line_no += 1;
            if self.line.trim().is_empty() {
                continue;
            }
            return Some(self.parse_line(columns));
        }
    }
}

/// Convert one JSON cell to a value of `ty`. Strings are parsed for numeric
/// columns; dates take epoch milliseconds or RFC 3339 text.
pub fn json_to_value(cell: &Json, ty: ColumnType) -> Result<Value, Error> {
    let mismatch = || Error::new(ErrorKind::Argument).with_message(format!("cannot use {cell} as a {ty} value"));
    match (cell, ty) {
        (Json::Null, _) => Ok(Value::Null),
        (Json::Bool(v), ColumnType::Bool) => Ok(Value::Bool(*v)),
        (Json::String(text), ColumnType::Bool) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "" => Ok(Value::Null),
            _ => Err(mismatch()),
        },
        (Json::String(text), ColumnType::String) => Ok(Value::str(text)),
        (Json::Number(_) | Json::Bool(_), ColumnType::String) => Ok(Value::str(&cell.to_string())),
        (Json::String(text), ColumnType::Timestamp) => parse_timestamp(text),
        (Json::String(text), _) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(Value::Null);
            }
            let number = if let Ok(v) = text.parse::<i64>() {
                Value::Long(v)
            } else {
                text.parse::<f64>().map(Value::Double).map_err(|_| mismatch())?
            };
            number.coerce_to(ty)
        }
        (Json::Number(number), _) => {
            let value = match (number.as_i64(), number.as_f64()) {
                (Some(v), _) => Value::Long(v),
                (None, Some(v)) => Value::Double(v),
                (None, None) => return Err(mismatch()),
            };
            value.coerce_to(ty)
        }
        _ => Err(mismatch()),
    }
}

/// JSON rendering of a cell. Dates stay epoch milliseconds so the output
/// feeds back into `json_to_value` unchanged; non-finite floats become null.
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(v) => Json::Bool(*v),
        Value::Byte(v) => Json::from(*v),
        Value::Short(v) => Json::from(*v),
        Value::Int(v) => Json::from(*v),
        Value::Long(v) | Value::Timestamp(v) => Json::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(f64::from(*v)).map_or(Json::Null, Json::Number),
        Value::Double(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::Str(text) => Json::String(text.to_string()),
    }
}

fn parse_timestamp(text: &str) -> Result<Value, Error> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Value::Null);
    }
    if let Ok(millis) = text.parse::<i64>() {
        return Ok(Value::Timestamp(millis));
    }
    let parsed = OffsetDateTime::parse(text, &Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Argument)
            .with_message(format!("invalid date `{text}`"))
            .with_hint("Use epoch milliseconds or an RFC 3339 timestamp.")
            .with_source(err)
    })?;
    let millis = parsed.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis)
        .map(Value::Timestamp)
        .map_err(|_| Error::new(ErrorKind::Range).with_message(format!("date `{text}` out of range")))
}
