//! Purpose: Sorted (key, row-id list) index shared by the scalar and geo engines.
//! Exports: `SortedIndex`, `IndexBuilder`, `group_rows`.
//! Role: Owns boundary search (`index_bs`, `eq`/`gt`/`ge`/`lt`/`le`) and hands out cursors.
//! Invariants: Keys are strictly ascending; every element holds at least one row id.
//! Invariants: A sealed index holds exactly the planned number of elements.
use std::ops::{Bound, Range};

use crate::core::error::{Error, ErrorKind};
use crate::core::flags::{FlagStrategy, RowFlags};
use crate::core::index::cursor::IndexCursor;
use crate::core::index::rows::RowIds;
use crate::core::order::Order;
use crate::core::varint::{ByteWidth, decode_varint, encode_varint};

/// Populates an index one element at a time, in ascending key order.
///
/// `add` takes `&mut self`, so population is confined to the single owner;
/// `fix` consumes the builder and returns the immutable index.
#[derive(Debug)]
pub struct IndexBuilder<K> {
    planned: usize,
    row_count: usize,
    keys: Vec<K>,
    offsets: Vec<usize>,
    rows: RowIds,
}

impl<K: Ord> IndexBuilder<K> {
    pub fn new(planned: usize, row_count: usize) -> Self {
        Self {
            planned,
            row_count,
            keys: Vec::new(),
            offsets: vec![0],
            rows: RowIds::with_width(ByteWidth::for_row_count(row_count)),
        }
    }

    pub fn planned(&self) -> usize {
        self.planned
    }

    pub fn added(&self) -> usize {
        self.keys.len()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.keys.reserve(additional);
        self.offsets.reserve(additional);
    }

    pub fn add(&mut self, key: K, row_ids: &[u32]) -> Result<(), Error> {
        if self.keys.len() >= self.planned {
            return Err(Error::new(ErrorKind::Integrity).with_message(format!(
                "index already holds its planned {} elements",
                self.planned
            )));
        }
        if self.keys.last().is_some_and(|last| key <= *last) {
            return Err(Error::new(ErrorKind::Format)
                .with_message("index keys are not strictly ascending"));
        }
        if row_ids.is_empty() {
            return Err(Error::new(ErrorKind::Format).with_message("index element has no rows"));
        }
        if let Some(row) = row_ids.iter().find(|row| **row as usize >= self.row_count) {
            return Err(Error::new(ErrorKind::Range)
                .with_message(format!("row id beyond row count {}", self.row_count))
                .with_row(*row as u64));
        }
        for row in row_ids {
            self.rows.push(*row)?;
        }
        self.keys.push(key);
        self.offsets.push(self.rows.len());
        Ok(())
    }

    pub fn fix(self) -> Result<SortedIndex<K>, Error> {
        if self.keys.len() != self.planned {
            return Err(Error::new(ErrorKind::Integrity).with_message(format!(
                "index sealed with {} of {} planned elements",
                self.keys.len(),
                self.planned
            )));
        }
        Ok(SortedIndex {
            keys: self.keys,
            offsets: self.offsets,
            rows: self.rows,
            row_count: self.row_count,
        })
    }
}

/// Sort `(key, row)` pairs and group them into ascending elements.
pub fn group_rows<K: Ord>(mut pairs: Vec<(K, u32)>) -> Vec<(K, Vec<u32>)> {
    pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    let mut grouped: Vec<(K, Vec<u32>)> = Vec::new();
    for (key, row) in pairs {
        match grouped.last_mut() {
            Some((last, rows)) if *last == key => rows.push(row),
            _ => grouped.push((key, vec![row])),
        }
    }
    grouped
}

#[derive(Debug)]
pub struct SortedIndex<K> {
    keys: Vec<K>,
    offsets: Vec<usize>,
    rows: RowIds,
    row_count: usize,
}

impl<K: Ord> SortedIndex<K> {
    /// Number of elements (distinct keys).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn key(&self, element: usize) -> &K {
        &self.keys[element]
    }

    /// Row count of the dataset the index was built over.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn width(&self) -> ByteWidth {
        self.rows.width()
    }

    pub fn row_span(&self, element: usize) -> Range<usize> {
        self.offsets[element]..self.offsets[element + 1]
    }

    pub fn row_at(&self, pos: usize) -> u32 {
        self.rows.get(pos)
    }

    pub fn rows_of(&self, element: usize) -> impl DoubleEndedIterator<Item = u32> + '_ {
        self.row_span(element).map(move |pos| self.rows.get(pos))
    }

    /// Binary search; on a miss, the element next to `v`, upper neighbour
    /// when `biased`, lower otherwise. `None` only for an empty index.
    pub fn index_bs(&self, biased: bool, v: &K) -> Option<usize> {
        if self.keys.is_empty() {
            return None;
        }
        let last = self.keys.len() - 1;
        Some(match self.keys.binary_search(v) {
            Ok(found) => found,
            Err(insert) if biased => insert.min(last),
            Err(insert) => insert.saturating_sub(1),
        })
    }

    pub fn eq(&self, v: &K) -> Option<usize> {
        self.keys.binary_search(v).ok()
    }

    pub fn gt(&self, v: &K) -> Option<usize> {
        let mut pos = self.index_bs(true, v)?;
        if self.keys[pos] <= *v {
            pos += 1;
        }
        (pos < self.keys.len()).then_some(pos)
    }

    pub fn ge(&self, v: &K) -> Option<usize> {
        let mut pos = self.index_bs(true, v)?;
        if self.keys[pos] < *v {
            pos += 1;
        }
        (pos < self.keys.len()).then_some(pos)
    }

    pub fn lt(&self, v: &K) -> Option<usize> {
        let pos = self.index_bs(true, v)?;
        if self.keys[pos] >= *v { pos.checked_sub(1) } else { Some(pos) }
    }

    pub fn le(&self, v: &K) -> Option<usize> {
        let pos = self.index_bs(true, v)?;
        if self.keys[pos] > *v { pos.checked_sub(1) } else { Some(pos) }
    }

    /// Inclusive element span for the given key bounds, `None` when empty.
    pub fn span(&self, lower: Bound<&K>, upper: Bound<&K>) -> Option<(usize, usize)> {
        if self.keys.is_empty() {
            return None;
        }
        let from = match lower {
            Bound::Included(v) => self.ge(v)?,
            Bound::Excluded(v) => self.gt(v)?,
            Bound::Unbounded => 0,
        };
        let to = match upper {
            Bound::Included(v) => self.le(v)?,
            Bound::Excluded(v) => self.lt(v)?,
            Bound::Unbounded => self.keys.len() - 1,
        };
        (from <= to).then_some((from, to))
    }

    /// Rows whose key falls within the bounds, or outside them when `not`.
    pub fn range(&self, order: Order, not: bool, lower: Bound<&K>, upper: Bound<&K>) -> IndexCursor<'_, K> {
        let span = self.span(lower, upper);
        if not {
            IndexCursor::excluding(self, order, span)
        } else {
            IndexCursor::range(self, order, span)
        }
    }

    /// Inclusive range between two keys given in either order.
    pub fn between(&self, order: Order, not: bool, start: &K, end: &K) -> IndexCursor<'_, K> {
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        self.range(order, not, Bound::Included(lo), Bound::Included(hi))
    }

    /// Chunk body: per element the key, a varint row count, then each row id
    /// at the dataset byte width.
    pub fn encode_chunk<F>(&self, buf: &mut Vec<u8>, mut write_key: F) -> Result<(), Error>
    where
        F: FnMut(&K, &mut Vec<u8>) -> Result<(), Error>,
    {
        let width = ByteWidth::for_row_count(self.row_count);
        for (element, key) in self.keys.iter().enumerate() {
            write_key(key, buf)?;
            let span = self.row_span(element);
            encode_varint(span.len() as u32, buf)?;
            for pos in span {
                width.encode(self.rows.get(pos), buf)?;
            }
        }
        Ok(())
    }

    pub fn decode_chunk<F>(
        chunk: &[u8],
        planned: usize,
        row_count: usize,
        mut read_key: F,
    ) -> Result<Self, Error>
    where
        F: FnMut(&[u8], &mut usize) -> Result<K, Error>,
    {
        let width = ByteWidth::for_row_count(row_count);
        let mut builder = IndexBuilder::new(planned, row_count);
        // Every element takes at least two bytes.
        builder.reserve(planned.min(chunk.len() / 2));
        let mut seen = RowFlags::new(row_count, FlagStrategy::Flat);
        let mut pos = 0;
        let mut rows = Vec::new();
        while pos < chunk.len() {
            let key = read_key(chunk, &mut pos)?;
            let count = decode_varint(chunk, &mut pos)?;
            rows.clear();
            for _ in 0..count {
                let at = pos;
                let row = width.decode(chunk, &mut pos)?;
                if seen.get(row as usize) {
                    return Err(Error::new(ErrorKind::Format)
                        .with_message("row id listed under more than one index element")
                        .with_row(row as u64)
                        .with_offset(at as u64));
                }
                seen.set(row as usize);
                rows.push(row);
            }
            builder.add(key, &rows)?;
        }
        builder.fix()
    }

    /// Rows holding any of `values`, or the remaining indexed rows when `not`.
    pub fn members(&self, order: Order, not: bool, values: &[K]) -> IndexCursor<'_, K> {
        let elements = values.iter().filter_map(|v| self.eq(v)).collect();
        if not {
            IndexCursor::excluding_members(self, order, elements)
        } else {
            IndexCursor::members(self, order, elements)
        }
    }
}
