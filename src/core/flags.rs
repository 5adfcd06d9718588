//! Purpose: Row-flag bitsets with pluggable backing stores.
//! Exports: `RowFlags`, `FlagStrategy`, `SetBits`, `CHUNK_BITS`.
//! Role: Marks excluded rows for negated membership scans.
//! Invariants: Bits at or beyond `len` are never set.
//! Invariants: An absent sparse chunk reads as all-unset; AND/OR require equal lengths.
use std::collections::BTreeMap;

use crate::core::error::{Error, ErrorKind};
use crate::core::order::Order;

/// Bits per sparse chunk.
pub const CHUNK_BITS: usize = 512;
const CHUNK_WORDS: usize = CHUNK_BITS / 64;

type Chunk = [u64; CHUNK_WORDS];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlagStrategy {
    /// One contiguous word array.
    Flat,
    /// Array of optional 512-bit chunks.
    SparseArray,
    /// Ordered map from chunk ordinal to 512-bit chunk.
    SparseMap,
}

impl FlagStrategy {
    /// Choose a store for `expected` set flags out of `len`.
    pub fn for_cardinality(len: usize, expected: usize) -> Self {
        if len <= 8 * CHUNK_BITS || expected.saturating_mul(16) >= len {
            FlagStrategy::Flat
        } else if expected.saturating_mul(CHUNK_BITS) >= len {
            FlagStrategy::SparseArray
        } else {
            FlagStrategy::SparseMap
        }
    }
}

#[derive(Clone, Debug)]
enum Store {
    Flat(Vec<u64>),
    SparseArray(Vec<Option<Box<Chunk>>>),
    SparseMap(BTreeMap<usize, Box<Chunk>>),
}

#[derive(Clone, Debug)]
pub struct RowFlags {
    len: usize,
    store: Store,
}

impl RowFlags {
    pub fn new(len: usize, strategy: FlagStrategy) -> Self {
        let store = match strategy {
            FlagStrategy::Flat => Store::Flat(vec![0u64; len.div_ceil(64)]),
            FlagStrategy::SparseArray => Store::SparseArray(vec![None; len.div_ceil(CHUNK_BITS)]),
            FlagStrategy::SparseMap => Store::SparseMap(BTreeMap::new()),
        };
        Self { len, store }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn strategy(&self) -> FlagStrategy {
        match self.store {
            Store::Flat(_) => FlagStrategy::Flat,
            Store::SparseArray(_) => FlagStrategy::SparseArray,
            Store::SparseMap(_) => FlagStrategy::SparseMap,
        }
    }

    pub fn clear(&mut self) {
        match &mut self.store {
            Store::Flat(words) => words.fill(0),
            Store::SparseArray(chunks) => chunks.fill(None),
            Store::SparseMap(chunks) => chunks.clear(),
        }
    }

    pub fn put(&mut self, index: usize, on: bool) -> Result<(), Error> {
        if index >= self.len {
            return Err(Error::new(ErrorKind::Range)
                .with_message(format!("flag {index} out of range (len {})", self.len))
                .with_row(index as u64));
        }
        let mask = 1u64 << (index % 64);
        let word = index / 64;
        if on {
            *self.word_mut(word) |= mask;
        } else if self.word(word) & mask != 0 {
            *self.word_mut(word) &= !mask;
        }
        Ok(())
    }

    /// Set a bit whose index is already known to be below `len`; anything
    /// at or beyond `len` is ignored.
    pub(crate) fn set(&mut self, index: usize) {
        if index < self.len {
            *self.word_mut(index / 64) |= 1u64 << (index % 64);
        }
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && (self.word(index / 64) >> (index % 64)) & 1 == 1
    }

    pub fn count_ones(&self) -> usize {
        self.present_chunks()
            .into_iter()
            .flat_map(|chunk| self.chunk_words(chunk))
            .map(|word| self.word(word).count_ones() as usize)
            .sum()
    }

    /// In-place intersection.
    pub fn and_assign(&mut self, other: &RowFlags) -> Result<(), Error> {
        self.check_len(other)?;
        for chunk in self.present_chunks() {
            for word in self.chunk_words(chunk) {
                let value = self.word(word) & other.word(word);
                self.set_word(word, value);
            }
        }
        Ok(())
    }

    /// In-place union.
    pub fn or_assign(&mut self, other: &RowFlags) -> Result<(), Error> {
        self.check_len(other)?;
        for chunk in other.present_chunks() {
            for word in other.chunk_words(chunk) {
                let value = self.word(word) | other.word(word);
                self.set_word(word, value);
            }
        }
        Ok(())
    }

    /// Set positions in `order`; the sequence is consumed once.
    pub fn iter(&self, order: Order) -> SetBits<'_> {
        let chunks = self.present_chunks();
        let words = self.len.div_ceil(64);
        let per_chunk = move |chunk: usize| chunk * CHUNK_WORDS..((chunk + 1) * CHUNK_WORDS).min(words);
        let words: Box<dyn Iterator<Item = usize> + '_> = match order {
            Order::Asc => Box::new(chunks.into_iter().flat_map(per_chunk)),
            Order::Desc => Box::new(chunks.into_iter().rev().flat_map(move |c| per_chunk(c).rev())),
        };
        SetBits {
            flags: self,
            words,
            order,
            bits: 0,
            base: 0,
        }
    }

    fn check_len(&self, other: &RowFlags) -> Result<(), Error> {
        if self.len != other.len {
            return Err(Error::new(ErrorKind::Range).with_message(format!(
                "flag length mismatch ({} vs {})",
                self.len, other.len
            )));
        }
        Ok(())
    }

    fn chunk_words(&self, chunk: usize) -> std::ops::Range<usize> {
        let words = self.len.div_ceil(64);
        chunk * CHUNK_WORDS..((chunk + 1) * CHUNK_WORDS).min(words)
    }

    fn present_chunks(&self) -> Vec<usize> {
        match &self.store {
            Store::Flat(_) => (0..self.len.div_ceil(CHUNK_BITS)).collect(),
            Store::SparseArray(chunks) => chunks
                .iter()
                .enumerate()
                .filter_map(|(idx, chunk)| chunk.as_ref().map(|_| idx))
                .collect(),
            Store::SparseMap(chunks) => chunks.keys().copied().collect(),
        }
    }

    fn word(&self, word: usize) -> u64 {
        let (chunk, slot) = (word / CHUNK_WORDS, word % CHUNK_WORDS);
        match &self.store {
            Store::Flat(words) => words.get(word).copied().unwrap_or(0),
            Store::SparseArray(chunks) => chunks
                .get(chunk)
                .and_then(|c| c.as_ref())
                .map_or(0, |c| c[slot]),
            Store::SparseMap(chunks) => chunks.get(&chunk).map_or(0, |c| c[slot]),
        }
    }

    fn set_word(&mut self, word: usize, value: u64) {
        if value == 0 && self.word(word) == 0 {
            return;
        }
        *self.word_mut(word) = value;
    }

    fn word_mut(&mut self, word: usize) -> &mut u64 {
        let (chunk, slot) = (word / CHUNK_WORDS, word % CHUNK_WORDS);
        match &mut self.store {
            Store::Flat(words) => &mut words[word],
            Store::SparseArray(chunks) => {
                &mut chunks[chunk].get_or_insert_with(|| Box::new([0u64; CHUNK_WORDS]))[slot]
            }
            Store::SparseMap(chunks) => {
                &mut chunks
                    .entry(chunk)
                    .or_insert_with(|| Box::new([0u64; CHUNK_WORDS]))[slot]
            }
        }
    }
}

pub struct SetBits<'a> {
    flags: &'a RowFlags,
    words: Box<dyn Iterator<Item = usize> + 'a>,
    order: Order,
    bits: u64,
    base: usize,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.bits == 0 {
            let word = self.words.next()?;
            self.bits = self.flags.word(word);
            self.base = word * 64;
        }
        let bit = match self.order {
            Order::Asc => {
                let bit = self.bits.trailing_zeros() as usize;
                self.bits &= self.bits - 1;
                bit
            }
            Order::Desc => {
                let bit = 63 - self.bits.leading_zeros() as usize;
                self.bits &= !(1u64 << bit);
                bit
            }
        };
        Some(self.base + bit)
    }
}
