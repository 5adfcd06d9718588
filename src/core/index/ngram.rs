//! Purpose: Inverted substring index keyed by packed UTF-16 n-grams.
//! Exports: `NgramIndex`, `NgramBuilder`, `NgramSearch`, `NgramHit`, `LineMode`.
//! Role: Serves substring search over one string column without scanning it.
//! Invariants: Entries are strictly ascending by key; detail records within an entry are
//!   strictly ascending by (row id, position).
//! Invariants: Positions count UTF-16 code units from the start of the cell.
//! Notes: Each entry stores its rows and positions at the narrowest width that holds them;
//!   the container writes row ids at the dataset width regardless.
use std::collections::BTreeSet;

use crate::core::error::{Error, ErrorKind};
use crate::core::index::rows::RowIds;
use crate::core::order::Order;
use crate::core::value::{ColumnData, ColumnType, take};
use crate::core::varint::{ByteWidth, decode_varint, encode_varint};

pub const MIN_NGRAM: u8 = 1;
pub const MAX_NGRAM: u8 = 3;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LineMode {
    /// Every occurrence is reported.
    #[default]
    All,
    /// At most one hit per row: the first occurrence in traversal order.
    Distinct,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct NgramHit {
    pub row_id: u32,
    pub position: u32,
}

#[derive(Clone, Debug)]
struct NgramEntry {
    key: u64,
    rows: RowIds,
    positions: RowIds,
}

impl NgramEntry {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn detail(&self, at: usize) -> NgramHit {
        NgramHit {
            row_id: self.rows.get(at),
            position: self.positions.get(at),
        }
    }

    fn contains(&self, wanted: NgramHit) -> bool {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.detail(mid).cmp(&wanted) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }
}

pub fn check_ngram_length(n: u8) -> Result<(), Error> {
    if !(MIN_NGRAM..=MAX_NGRAM).contains(&n) {
        return Err(Error::new(ErrorKind::Argument)
            .with_message(format!("n-gram length {n} not in {MIN_NGRAM}..={MAX_NGRAM}")));
    }
    Ok(())
}

/// Packs `units` (at most four) big-endian into one key.
pub fn pack_key(units: &[u16]) -> u64 {
    units.iter().fold(0u64, |key, unit| (key << 16) | u64::from(*unit))
}

/// Accumulates entries in key order up to a planned count.
pub struct NgramBuilder {
    column: usize,
    n: u8,
    planned: usize,
    row_count: usize,
    entries: Vec<NgramEntry>,
}

impl NgramBuilder {
    pub fn new(column: usize, n: u8, planned: usize, row_count: usize) -> Result<Self, Error> {
        check_ngram_length(n)?;
        Ok(Self {
            column,
            n,
            planned,
            row_count,
            entries: Vec::new(),
        })
    }

    pub fn add(&mut self, key: u64, details: &[NgramHit]) -> Result<(), Error> {
        if self.entries.len() >= self.planned {
            return Err(Error::new(ErrorKind::Integrity)
                .with_message(format!("n-gram index already holds its {} planned entries", self.planned)));
        }
        if key >> (16 * self.n as u32) != 0 {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("n-gram key {key:#x} wider than {} units", self.n)));
        }
        if self.entries.last().is_some_and(|last| last.key >= key) {
            return Err(Error::new(ErrorKind::Format).with_message("n-gram keys must be strictly ascending"));
        }
        if details.is_empty() {
            return Err(Error::new(ErrorKind::Format).with_message("n-gram entry without detail records"));
        }
        if details.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::new(ErrorKind::Format)
                .with_message("n-gram detail records must be strictly ascending by (row, position)"));
        }
        if let Some(bad) = details.iter().find(|d| d.row_id as usize >= self.row_count) {
            return Err(Error::new(ErrorKind::Range)
                .with_message(format!("row id {} out of range for {} rows", bad.row_id, self.row_count))
                .with_row(bad.row_id as u64));
        }
        let rows: Vec<u32> = details.iter().map(|d| d.row_id).collect();
        let positions: Vec<u32> = details.iter().map(|d| d.position).collect();
        self.entries.push(NgramEntry {
            key,
            rows: RowIds::narrowest(&rows),
            positions: RowIds::narrowest(&positions),
        });
        Ok(())
    }

    pub fn fix(self) -> Result<NgramIndex, Error> {
        if self.entries.len() != self.planned {
            return Err(Error::new(ErrorKind::Integrity).with_message(format!(
                "n-gram index sealed with {} of {} planned entries",
                self.entries.len(),
                self.planned
            )));
        }
        Ok(NgramIndex {
            column: self.column,
            n: self.n,
            row_count: self.row_count,
            entries: self.entries,
        })
    }
}

#[derive(Debug)]
pub struct NgramIndex {
    column: usize,
    n: u8,
    row_count: usize,
    entries: Vec<NgramEntry>,
}

impl NgramIndex {
    /// Index every `n`-unit window of every non-null cell of a string column.
    pub fn build(column: usize, n: u8, data: &ColumnData) -> Result<Self, Error> {
        check_ngram_length(n)?;
        if data.column_type() != ColumnType::String {
            return Err(Error::new(ErrorKind::Argument)
                .with_message(format!("n-gram index needs a string column, got {}", data.column_type())));
        }
        let width = n as usize;
        let mut grams = Vec::new();
        for row in 0..data.len() {
            let Some(text) = data.str_at(row) else { continue };
            let units: Vec<u16> = text.encode_utf16().collect();
            for (position, window) in units.windows(width).enumerate() {
                let hit = NgramHit {
                    row_id: row as u32,
                    position: position as u32,
                };
                grams.push((pack_key(window), hit));
            }
        }
        grams.sort_unstable();

        let mut grouped: Vec<(u64, Vec<NgramHit>)> = Vec::new();
        for (key, hit) in grams {
            match grouped.last_mut() {
                Some((last, details)) if *last == key => details.push(hit),
                _ => grouped.push((key, vec![hit])),
            }
        }
        let mut builder = NgramBuilder::new(column, n, grouped.len(), data.len())?;
        builder.entries.reserve(grouped.len());
        for (key, details) in grouped {
            builder.add(key, &details)?;
        }
        builder.fix()
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn ngram_length(&self) -> u8 {
        self.n
    }

    /// Number of distinct n-grams.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, key: u64) -> Option<&NgramEntry> {
        self.entries
            .binary_search_by_key(&key, |entry| entry.key)
            .ok()
            .map(|at| &self.entries[at])
    }

    /// Occurrences of `query` in the indexed column. A query shorter than the
    /// n-gram length matches nothing.
    pub fn search(&self, query: &str, order: Order, mode: LineMode) -> NgramSearch<'_> {
        let units: Vec<u16> = query.encode_utf16().collect();
        let width = self.n as usize;
        let mut lookups = Vec::new();
        let mut missing = units.len() < width;
        for window in units.windows(width) {
            match self.entry(pack_key(window)) {
                Some(entry) => lookups.push(entry),
                None => {
                    missing = true;
                    break;
                }
            }
        }
        if missing {
            lookups.clear();
        }
        let remaining = lookups.first().map_or(0, |first| first.len());
        NgramSearch {
            lookups,
            order,
            mode,
            front: 0,
            back: remaining,
            seen: BTreeSet::new(),
        }
    }

    pub fn encode_chunk(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        let width = ByteWidth::for_row_count(self.row_count);
        let key_bytes = 2 * self.n as usize;
        for entry in &self.entries {
            buf.extend_from_slice(&entry.key.to_be_bytes()[8 - key_bytes..]);
            encode_varint(entry.len() as u32, buf)?;
            for at in 0..entry.len() {
                let detail = entry.detail(at);
                width.encode(detail.row_id, buf)?;
                encode_varint(detail.position, buf)?;
            }
        }
        Ok(())
    }

    pub fn decode_chunk(
        column: usize,
        n: u8,
        planned: usize,
        row_count: usize,
        chunk: &[u8],
    ) -> Result<Self, Error> {
        let mut builder = NgramBuilder::new(column, n, planned, row_count)?;
        builder.entries.reserve(planned.min(chunk.len() / (2 * n as usize + 3)));
        let width = ByteWidth::for_row_count(row_count);
        let key_bytes = 2 * n as usize;
        let mut pos = 0;
        while pos < chunk.len() {
            let raw = take(chunk, &mut pos, key_bytes)?;
            let key = raw.iter().fold(0u64, |key, byte| (key << 8) | u64::from(*byte));
            let count = decode_varint(chunk, &mut pos)? as usize;
            let mut details = Vec::with_capacity(count.min(chunk.len()));
            for _ in 0..count {
                let row_id = width.decode(chunk, &mut pos)?;
                let position = decode_varint(chunk, &mut pos)?;
                details.push(NgramHit { row_id, position });
            }
            builder.add(key, &details)?;
        }
        builder.fix()
    }
}

/// Lazy n-gram match walk over the first query n-gram's detail records.
pub struct NgramSearch<'a> {
    lookups: Vec<&'a NgramEntry>,
    order: Order,
    mode: LineMode,
    front: usize,
    back: usize,
    seen: BTreeSet<u32>,
}

impl NgramSearch<'_> {
    fn verified(&self, start: NgramHit) -> bool {
        self.lookups.iter().enumerate().skip(1).all(|(offset, entry)| {
            entry.contains(NgramHit {
                row_id: start.row_id,
                position: start.position + offset as u32,
            })
        })
    }
}

impl Iterator for NgramSearch<'_> {
    type Item = NgramHit;

    fn next(&mut self) -> Option<NgramHit> {
        let first = *self.lookups.first()?;
        while self.front < self.back {
            let at = match self.order {
                Order::Asc => {
                    self.front += 1;
                    self.front - 1
                }
                Order::Desc => {
                    self.back -= 1;
                    self.back
                }
            };
            let candidate = first.detail(at);
            if self.mode == LineMode::Distinct && self.seen.contains(&candidate.row_id) {
                continue;
            }
            if self.verified(candidate) {
                if self.mode == LineMode::Distinct {
                    self.seen.insert(candidate.row_id);
                }
                return Some(candidate);
            }
        }
        None
    }
}
