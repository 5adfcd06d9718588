// Scalar secondary index: a column's distinct non-null values mapped to their rows.
use std::ops::Bound;

use crate::core::error::{Error, ErrorKind};
use crate::core::index::cursor::IndexCursor;
use crate::core::index::sorted::{IndexBuilder, SortedIndex, group_rows};
use crate::core::order::Order;
use crate::core::predicate::Predicate;
use crate::core::value::{ColumnData, ColumnType, Value};

#[derive(Debug)]
pub struct ScalarIndex {
    column: usize,
    column_type: ColumnType,
    index: SortedIndex<Value>,
}

impl ScalarIndex {
    /// Index every non-null cell of `data`.
    pub fn build(column: usize, data: &ColumnData) -> Result<Self, Error> {
        let pairs = (0..data.len())
            .map(|row| (data.get(row), row as u32))
            .filter(|(value, _)| !value.is_null())
            .collect();
        let grouped = group_rows(pairs);
        let mut builder = IndexBuilder::new(grouped.len(), data.len());
        builder.reserve(grouped.len());
        for (value, rows) in grouped {
            builder.add(value, &rows)?;
        }
        Ok(Self {
            column,
            column_type: data.column_type(),
            index: builder.fix()?,
        })
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn sorted(&self) -> &SortedIndex<Value> {
        &self.index
    }

    /// Number of distinct indexed values.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn supports(predicate: &Predicate) -> bool {
        !matches!(predicate, Predicate::Like(_))
    }

    pub fn select(&self, predicate: &Predicate, not: bool, order: Order) -> Result<IndexCursor<'_, Value>, Error> {
        let index = &self.index;
        Ok(match predicate.bind(self.column_type)? {
            Predicate::Eq(v) => index.range(order, not, Bound::Included(&v), Bound::Included(&v)),
            Predicate::Gt(v) => index.range(order, not, Bound::Excluded(&v), Bound::Unbounded),
            Predicate::Ge(v) => index.range(order, not, Bound::Included(&v), Bound::Unbounded),
            Predicate::Lt(v) => index.range(order, not, Bound::Unbounded, Bound::Excluded(&v)),
            Predicate::Le(v) => index.range(order, not, Bound::Unbounded, Bound::Included(&v)),
            Predicate::Between(lo, hi) => index.between(order, not, &lo, &hi),
            Predicate::In(values) => index.members(order, not, &values),
            Predicate::Like(_) => {
                return Err(Error::new(ErrorKind::Argument)
                    .with_message("`like` is not served by a scalar index"));
            }
        })
    }

    pub fn encode_chunk(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        self.index.encode_chunk(buf, |value, buf| value.encode(buf))
    }

    pub fn decode_chunk(
        column: usize,
        column_type: ColumnType,
        planned: usize,
        row_count: usize,
        chunk: &[u8],
    ) -> Result<Self, Error> {
        let index = SortedIndex::decode_chunk(chunk, planned, row_count, |buf, pos| {
            let value = Value::decode(column_type, buf, pos)?;
            if value.is_null() {
                return Err(Error::new(ErrorKind::Format)
                    .with_message("null key in scalar index chunk")
                    .with_offset(*pos as u64));
            }
            Ok(value)
        })?;
        Ok(Self {
            column,
            column_type,
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ScalarIndex;
    use crate::core::order::Order;
    use crate::core::predicate::Predicate;
    use crate::core::value::{ColumnData, ColumnType, Value};

    fn ints(values: &[Option<i32>]) -> ColumnData {
        let mut data = ColumnData::with_capacity(ColumnType::Int, values.len());
        for value in values {
            data.push(&value.map_or(Value::Null, Value::Int)).expect("push");
        }
        data
    }

    #[test]
    fn nulls_are_not_indexed() {
        let index = ScalarIndex::build(0, &ints(&[Some(3), None, Some(3), Some(1)])).expect("build");
        assert_eq!(index.len(), 2);
        let rows: Vec<u32> = index
            .select(&Predicate::Le(Value::Int(10)), false, Order::Asc)
            .expect("select")
            .collect();
        assert_eq!(rows, vec![3, 0, 2]);
        let negated = index
            .select(&Predicate::Le(Value::Int(10)), true, Order::Asc)
            .expect("select")
            .count();
        assert_eq!(negated, 0);
    }

    #[test]
    fn operands_are_coerced() {
        let index = ScalarIndex::build(0, &ints(&[Some(5), Some(6)])).expect("build");
        let rows: Vec<u32> = index
            .select(&Predicate::Eq(Value::Long(6)), false, Order::Asc)
            .expect("select")
            .collect();
        assert_eq!(rows, vec![1]);
        assert!(index.select(&Predicate::Eq(Value::str("6")), false, Order::Asc).is_err());
    }

    #[test]
    fn chunk_round_trip_keeps_queries() {
        let index = ScalarIndex::build(2, &ints(&[Some(9), Some(-4), None, Some(9)])).expect("build");
        let mut buf = Vec::new();
        index.encode_chunk(&mut buf).expect("encode");
        let decoded = ScalarIndex::decode_chunk(2, ColumnType::Int, index.len(), 4, &buf).expect("decode");
        let rows: Vec<u32> = decoded
            .select(&Predicate::In(vec![Value::Int(9)]), false, Order::Desc)
            .expect("select")
            .collect();
        assert_eq!(rows, vec![3, 0]);
        assert_eq!(decoded.column(), 2);
    }
}
