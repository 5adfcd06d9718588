//! Purpose: Column store holding every column of a dataset as dense typed arrays.
//! Exports: `Body`, `BodyBuilder`, `ColumnDef`, `ColumnRef`, `Row`, `BodyScan`.
//! Role: Owner of all row data; serves row materialization and the linear-scan query path.
//! Invariants: Column names are unique and non-empty; every sealed column holds exactly
//!   `row_count` cells.
//! Invariants: A `Body` is immutable; only `BodyBuilder` accepts data.
//! Notes: `Row` is a borrowed (body, row id) pair rather than a reusable mutable view;
//!   reads go straight to the column arrays and the borrow checker keeps it from
//!   outliving the body. Callers that need owned data use `Row::values`.
use std::collections::BTreeMap;
use std::ops::Range;

use crate::core::error::{Error, ErrorKind};
use crate::core::order::Order;
use crate::core::predicate::Predicate;
use crate::core::value::{ColumnData, ColumnType, Value};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A column addressed by name or ordinal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnRef<'a> {
    Name(&'a str),
    Ordinal(usize),
}

impl<'a> From<&'a str> for ColumnRef<'a> {
    fn from(name: &'a str) -> Self {
        ColumnRef::Name(name)
    }
}

impl<'a> From<&'a String> for ColumnRef<'a> {
    fn from(name: &'a String) -> Self {
        ColumnRef::Name(name)
    }
}

impl From<usize> for ColumnRef<'_> {
    fn from(ordinal: usize) -> Self {
        ColumnRef::Ordinal(ordinal)
    }
}

pub struct BodyBuilder {
    columns: Vec<ColumnDef>,
    names: BTreeMap<String, usize>,
    data: Vec<ColumnData>,
    assigned: Vec<bool>,
    planned_rows: usize,
    added: usize,
}

impl BodyBuilder {
    pub fn new(columns: Vec<ColumnDef>, planned_rows: usize) -> Result<Self, Error> {
        let names = catalog(&columns)?;
        let data = columns
            .iter()
            .map(|c| ColumnData::with_capacity(c.column_type, planned_rows.min(1 << 16)))
            .collect();
        Ok(Self {
            assigned: vec![false; columns.len()],
            columns,
            names,
            data,
            planned_rows,
            added: 0,
        })
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn planned_rows(&self) -> usize {
        self.planned_rows
    }

    /// Rows appended through `add_row`.
    pub fn added(&self) -> usize {
        self.added
    }

    /// Replace one whole column. Allowed once per column, and only when no
    /// rows have been appended.
    pub fn set_column(&mut self, ordinal: usize, data: ColumnData) -> Result<(), Error> {
        let def = self.columns.get(ordinal).ok_or_else(|| {
            Error::new(ErrorKind::Range).with_message(format!("column ordinal {ordinal} out of range"))
        })?;
        if self.assigned[ordinal] || self.added > 0 {
            return Err(Error::new(ErrorKind::Range)
                .with_message("column already populated")
                .with_column(def.name.clone()));
        }
        if data.column_type() != def.column_type {
            return Err(Error::new(ErrorKind::Argument)
                .with_message(format!(
                    "column holds {}, declared {}",
                    data.column_type(),
                    def.column_type
                ))
                .with_column(def.name.clone()));
        }
        if data.len() != self.planned_rows {
            return Err(Error::new(ErrorKind::Integrity)
                .with_message(format!("column has {} rows, planned {}", data.len(), self.planned_rows))
                .with_column(def.name.clone()));
        }
        self.data[ordinal] = data;
        self.assigned[ordinal] = true;
        Ok(())
    }

    /// Append one row, one value per column in declaration order.
    pub fn add_row(&mut self, values: &[Value]) -> Result<(), Error> {
        if self.assigned.iter().any(|set| *set) {
            return Err(Error::new(ErrorKind::Range).with_message("rows cannot be appended after set_column"));
        }
        if self.added >= self.planned_rows {
            return Err(Error::new(ErrorKind::Integrity)
                .with_message(format!("body already holds its {} planned rows", self.planned_rows)));
        }
        append_row(&self.columns, &mut self.data, values, self.added)?;
        self.added += 1;
        Ok(())
    }

    pub fn fix(self) -> Result<Body, Error> {
        for (def, data) in self.columns.iter().zip(&self.data) {
            if data.len() != self.planned_rows {
                return Err(Error::new(ErrorKind::Integrity)
                    .with_message(format!(
                        "body sealed with {} of {} planned rows",
                        data.len(),
                        self.planned_rows
                    ))
                    .with_column(def.name.clone()));
            }
        }
        Ok(Body {
            columns: self.columns,
            names: self.names,
            data: self.data,
            row_count: self.planned_rows,
        })
    }
}

/// Coerce `values` to the declared column types and push them as row `row`.
/// The whole row is coerced before storage is touched, so a bad cell leaves
/// no partial row behind.
pub(crate) fn append_row(
    columns: &[ColumnDef],
    data: &mut [ColumnData],
    values: &[Value],
    row: usize,
) -> Result<(), Error> {
    if values.len() != columns.len() {
        return Err(Error::new(ErrorKind::Argument)
            .with_message(format!("row has {} values for {} columns", values.len(), columns.len()))
            .with_row(row as u64));
    }
    let coerced = values
        .iter()
        .zip(columns)
        .map(|(value, def)| {
            value
                .coerce_to(def.column_type)
                .map_err(|err| err.with_column(def.name.clone()).with_row(row as u64))
        })
        .collect::<Result<Vec<_>, _>>()?;
    for (data, value) in data.iter_mut().zip(&coerced) {
        data.push(value)?;
    }
    Ok(())
}

fn catalog(columns: &[ColumnDef]) -> Result<BTreeMap<String, usize>, Error> {
    let mut names = BTreeMap::new();
    for (ordinal, def) in columns.iter().enumerate() {
        if def.name.is_empty() {
            return Err(Error::new(ErrorKind::Argument).with_message(format!("column {ordinal} has no name")));
        }
        if names.insert(def.name.clone(), ordinal).is_some() {
            return Err(Error::new(ErrorKind::Argument)
                .with_message("duplicate column name")
                .with_column(def.name.clone()));
        }
    }
    Ok(names)
}

#[derive(Debug)]
pub struct Body {
    columns: Vec<ColumnDef>,
    names: BTreeMap<String, usize>,
    data: Vec<ColumnData>,
    row_count: usize,
}

impl Body {
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_no<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Option<usize> {
        match column.into() {
            ColumnRef::Name(name) => self.names.get(name).copied(),
            ColumnRef::Ordinal(ordinal) => (ordinal < self.columns.len()).then_some(ordinal),
        }
    }

    pub fn column_type<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Option<ColumnType> {
        self.column_no(column).map(|ordinal| self.columns[ordinal].column_type)
    }

    /// Like `column_no`, but a miss is an `Argument` error naming the column.
    pub fn resolve<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Result<usize, Error> {
        let column = column.into();
        self.column_no(column).ok_or_else(|| {
            let label = match column {
                ColumnRef::Name(name) => name.to_string(),
                ColumnRef::Ordinal(ordinal) => ordinal.to_string(),
            };
            Error::new(ErrorKind::Argument)
                .with_message("unknown column")
                .with_column(label)
        })
    }

    pub fn column_data(&self, ordinal: usize) -> Option<&ColumnData> {
        self.data.get(ordinal)
    }

    pub fn row(&self, id: u32) -> Result<Row<'_>, Error> {
        if id as usize >= self.row_count {
            return Err(Error::new(ErrorKind::Range)
                .with_message(format!("row {id} out of range for {} rows", self.row_count))
                .with_row(id as u64));
        }
        Ok(Row { body: self, id })
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = Row<'_>> + '_ {
        (0..self.row_count).map(move |id| Row { body: self, id: id as u32 })
    }

    /// Linear scan of one column. With `start`, the scan begins at that row
    /// (inclusive) in the scan direction; rows past the end yield nothing.
    pub fn scan<'a>(
        &self,
        column: impl Into<ColumnRef<'a>>,
        predicate: &Predicate,
        not: bool,
        order: Order,
        start: Option<usize>,
    ) -> Result<BodyScan<'_>, Error> {
        let ordinal = self.resolve(column)?;
        let data = &self.data[ordinal];
        let predicate = predicate.bind(data.column_type())?;
        let rows = match (order, start) {
            (_, None) => 0..self.row_count,
            (Order::Asc, Some(start)) => start.min(self.row_count)..self.row_count,
            (Order::Desc, Some(start)) => 0..start.saturating_add(1).min(self.row_count),
        };
        Ok(BodyScan {
            data,
            predicate,
            not,
            order,
            rows,
        })
    }

    /// First matching row at or after `start` in scan direction; resume with
    /// the next row past the returned one.
    pub fn find<'a>(
        &self,
        column: impl Into<ColumnRef<'a>>,
        predicate: &Predicate,
        not: bool,
        order: Order,
        start: usize,
    ) -> Result<Option<u32>, Error> {
        Ok(self.scan(column, predicate, not, order, Some(start))?.next())
    }
}

/// Borrowed view of one row.
#[derive(Clone, Copy, Debug)]
pub struct Row<'a> {
    body: &'a Body,
    id: u32,
}

impl<'a> Row<'a> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn get<'c>(&self, column: impl Into<ColumnRef<'c>>) -> Option<Value> {
        let ordinal = self.body.column_no(column)?;
        Some(self.body.data[ordinal].get(self.id as usize))
    }

    pub fn is_null<'c>(&self, column: impl Into<ColumnRef<'c>>) -> bool {
        self.body
            .column_no(column)
            .is_none_or(|ordinal| self.body.data[ordinal].is_null(self.id as usize))
    }

    pub fn values(&self) -> Vec<Value> {
        self.body.data.iter().map(|data| data.get(self.id as usize)).collect()
    }

    /// (column definition, value) pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a ColumnDef, Value)> + 'a {
        let (body, id) = (self.body, self.id as usize);
        body.columns.iter().zip(body.data.iter().map(move |data| data.get(id)))
    }
}

/// Linear predicate scan over one column. Negation matches non-null rows that
/// fail the predicate.
pub struct BodyScan<'a> {
    data: &'a ColumnData,
    predicate: Predicate,
    not: bool,
    order: Order,
    rows: Range<usize>,
}

impl BodyScan<'_> {
    /// Next row the scan would examine.
    pub fn position(&self) -> Option<usize> {
        if self.rows.is_empty() {
            return None;
        }
        match self.order {
            Order::Asc => Some(self.rows.start),
            Order::Desc => Some(self.rows.end - 1),
        }
    }
}

impl Iterator for BodyScan<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            let row = match self.order {
                Order::Asc => self.rows.next()?,
                Order::Desc => self.rows.next_back()?,
            };
            let value = self.data.get(row);
            if value.is_null() {
                continue;
            }
            if self.predicate.matches(&value) != self.not {
                return Some(row as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BodyBuilder, ColumnDef, ColumnRef, append_row};
    use crate::core::error::ErrorKind;
    use crate::core::order::Order;
    use crate::core::predicate::Predicate;
    use crate::core::value::{ColumnData, ColumnType, Value};

    fn people() -> super::Body {
        let mut builder = BodyBuilder::new(
            vec![
                ColumnDef::new("id", ColumnType::Int),
                ColumnDef::new("name", ColumnType::String),
                ColumnDef::new("score", ColumnType::Double),
            ],
            5,
        )
        .expect("builder");
        let rows = [
            (1, "ann", Some(9.5)),
            (2, "bob", None),
            (3, "", Some(7.0)),
            (4, "dora", Some(9.5)),
            (5, "ed", Some(1.25)),
        ];
        for (id, name, score) in rows {
            builder
                .add_row(&[Value::Int(id), Value::str(name), score.map_or(Value::Null, Value::Double)])
                .expect("row");
        }
        builder.fix().expect("fix")
    }

    #[test]
    fn catalog_lookups() {
        let body = people();
        assert_eq!(body.column_no("name"), Some(1));
        assert_eq!(body.column_no(2usize), Some(2));
        assert_eq!(body.column_no("missing"), None);
        assert_eq!(body.column_no(3usize), None);
        assert_eq!(body.column_type("score"), Some(ColumnType::Double));
        let err = body.resolve(ColumnRef::Name("nope")).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.column(), Some("nope"));
    }

    #[test]
    fn rows_materialize_values() {
        let body = people();
        let row = body.row(2).expect("row");
        assert_eq!(row.get("id"), Some(Value::Int(3)));
        assert!(row.is_null("name"));
        assert_eq!(row.values().len(), 3);
        let names: Vec<&str> = row.iter().map(|(def, _)| def.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "score"]);
        assert_eq!(body.row(5).expect_err("range").kind(), ErrorKind::Range);
        assert_eq!(body.rows().len(), 5);
    }

    #[test]
    fn scan_honors_direction_negation_and_nulls() {
        let body = people();
        let eq = Predicate::Eq(Value::Double(9.5));
        let asc: Vec<u32> = body.scan("score", &eq, false, Order::Asc, None).expect("scan").collect();
        assert_eq!(asc, vec![0, 3]);
        let desc: Vec<u32> = body.scan("score", &eq, false, Order::Desc, None).expect("scan").collect();
        assert_eq!(desc, vec![3, 0]);
        let not: Vec<u32> = body.scan("score", &eq, true, Order::Asc, None).expect("scan").collect();
        assert_eq!(not, vec![2, 4]);

        let like = Predicate::like(|text: &str| text.contains('o'));
        let hits: Vec<u32> = body.scan("name", &like, false, Order::Asc, None).expect("scan").collect();
        assert_eq!(hits, vec![1, 3]);
        assert!(body.scan("id", &like, false, Order::Asc, None).is_err());
    }

    #[test]
    fn find_resumes_from_start() {
        let body = people();
        let gt = Predicate::Gt(Value::Int(1));
        assert_eq!(body.find("id", &gt, false, Order::Asc, 0).expect("find"), Some(1));
        assert_eq!(body.find("id", &gt, false, Order::Asc, 2).expect("find"), Some(2));
        assert_eq!(body.find("id", &gt, false, Order::Desc, 3).expect("find"), Some(3));
        assert_eq!(body.find("id", &gt, false, Order::Desc, 0).expect("find"), None);
        assert_eq!(body.find("id", &gt, false, Order::Asc, 99).expect("find"), None);

        let mut scan = body.scan("id", &gt, false, Order::Desc, Some(2)).expect("scan");
        assert_eq!(scan.position(), Some(2));
        assert_eq!(scan.next(), Some(2));
        assert_eq!(scan.position(), Some(1));
    }

    #[test]
    fn builder_enforces_plan() {
        let columns = vec![ColumnDef::new("a", ColumnType::Byte)];
        let mut builder = BodyBuilder::new(columns.clone(), 1).expect("builder");
        builder.add_row(&[Value::Int(1)]).expect("row");
        let err = builder.add_row(&[Value::Int(2)]).expect_err("over plan");
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let builder = BodyBuilder::new(columns.clone(), 2).expect("builder");
        assert_eq!(builder.fix().expect_err("short").kind(), ErrorKind::Integrity);

        let mut builder = BodyBuilder::new(columns.clone(), 1).expect("builder");
        let err = builder.add_row(&[Value::Int(1000)]).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(builder.added(), 0);

        let dup = vec![ColumnDef::new("a", ColumnType::Int), ColumnDef::new("a", ColumnType::Int)];
        assert_eq!(BodyBuilder::new(dup, 0).err().map(|e| e.kind()), Some(ErrorKind::Argument));
    }

    #[test]
    fn append_row_is_all_or_nothing() {
        let columns = vec![ColumnDef::new("a", ColumnType::Byte), ColumnDef::new("b", ColumnType::Int)];
        let mut data = vec![
            ColumnData::with_capacity(ColumnType::Byte, 0),
            ColumnData::with_capacity(ColumnType::Int, 0),
        ];
        let err = append_row(&columns, &mut data, &[Value::Int(1)], 4).expect_err("arity");
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.row(), Some(4));

        let err = append_row(&columns, &mut data, &[Value::Int(7), Value::Long(1 << 40)], 4)
            .expect_err("overflow");
        assert_eq!(err.column(), Some("b"));
        assert!(data.iter().all(ColumnData::is_empty));

        append_row(&columns, &mut data, &[Value::Int(7), Value::Null], 4).expect("row");
        assert_eq!(data[0].get(0), Value::Byte(7));
        assert_eq!(data[1].get(0), Value::Null);
    }

    #[test]
    fn set_column_checks_shape() {
        let columns = vec![ColumnDef::new("x", ColumnType::Int), ColumnDef::new("y", ColumnType::Int)];
        let mut builder = BodyBuilder::new(columns, 2).expect("builder");
        let mut data = ColumnData::with_capacity(ColumnType::Int, 2);
        data.push(&Value::Int(1)).expect("push");
        assert_eq!(builder.set_column(0, data.clone()).expect_err("short").kind(), ErrorKind::Integrity);
        data.push(&Value::Null).expect("push");
        builder.set_column(0, data.clone()).expect("set");
        assert_eq!(builder.set_column(0, data.clone()).expect_err("twice").kind(), ErrorKind::Range);
        assert_eq!(builder.set_column(2, data.clone()).expect_err("ordinal").kind(), ErrorKind::Range);
        assert_eq!(builder.add_row(&[Value::Int(1), Value::Int(2)]).expect_err("mixed").kind(), ErrorKind::Range);
        builder.set_column(1, data).expect("set");
        let body = builder.fix().expect("fix");
        assert_eq!(body.row(1).expect("row").get("y"), Some(Value::Null));
    }
}
