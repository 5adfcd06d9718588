//! Purpose: Cursor state machines over a sealed `SortedIndex`.
//! Exports: `IndexCursor`.
//! Role: One traversal engine for range, negated range, membership and negated membership.
//! Invariants: A cursor walks a list of inclusive element spans in traversal order;
//!   each element's rows are consumed in the cursor's direction.
//! Invariants: `current_*` accessors fail before the first `next` and after exhaustion.
use std::ops::{Range, RangeInclusive};
use std::vec;

use crate::core::error::{Error, ErrorKind};
use crate::core::flags::{FlagStrategy, RowFlags};
use crate::core::index::sorted::SortedIndex;
use crate::core::order::Order;

pub struct IndexCursor<'a, K> {
    index: &'a SortedIndex<K>,
    order: Order,
    spans: vec::IntoIter<RangeInclusive<usize>>,
    elements: RangeInclusive<usize>,
    element: Option<usize>,
    rows: Range<usize>,
    excluded: Option<RowFlags>,
    pending: Option<(usize, u32)>,
    current: Option<(usize, u32)>,
}

impl<'a, K: Ord> IndexCursor<'a, K> {
    fn over(
        index: &'a SortedIndex<K>,
        order: Order,
        spans: Vec<RangeInclusive<usize>>,
        excluded: Option<RowFlags>,
    ) -> Self {
        let mut cursor = Self {
            index,
            order,
            spans: spans.into_iter(),
            elements: RangeInclusive::new(1, 0),
            element: None,
            rows: 0..0,
            excluded,
            pending: None,
            current: None,
        };
        cursor.pending = cursor.step();
        cursor
    }

    /// Range cursor: the elements of `span`, walked in `order`.
    pub fn range(index: &'a SortedIndex<K>, order: Order, span: Option<(usize, usize)>) -> Self {
        let spans = span.map(|(from, to)| from..=to).into_iter().collect();
        Self::over(index, order, spans, None)
    }

    /// Negated range cursor: every element before and after `span`.
    pub fn excluding(index: &'a SortedIndex<K>, order: Order, span: Option<(usize, usize)>) -> Self {
        let len = index.len();
        let mut spans = Vec::with_capacity(2);
        match span {
            _ if len == 0 => {}
            None => spans.push(0..=len - 1),
            Some((from, to)) => {
                if from > 0 {
                    spans.push(0..=from - 1);
                }
                if to + 1 < len {
                    spans.push(to + 1..=len - 1);
                }
            }
        }
        if order == Order::Desc {
            spans.reverse();
        }
        Self::over(index, order, spans, None)
    }

    /// Membership cursor: one element per requested value, sorted by `order`.
    /// Duplicate requests collapse to one walk.
    pub fn members(index: &'a SortedIndex<K>, order: Order, mut elements: Vec<usize>) -> Self {
        elements.sort_unstable();
        elements.dedup();
        if order == Order::Desc {
            elements.reverse();
        }
        let spans = elements.into_iter().map(|element| element..=element).collect();
        Self::over(index, order, spans, None)
    }

    /// Negated membership cursor: a full walk skipping every row held by `elements`.
    pub fn excluding_members(index: &'a SortedIndex<K>, order: Order, elements: Vec<usize>) -> Self {
        let flagged: usize = elements.iter().map(|e| index.row_span(*e).len()).sum();
        let mut excluded = RowFlags::new(
            index.row_count(),
            FlagStrategy::for_cardinality(index.row_count(), flagged),
        );
        for element in elements {
            for row in index.rows_of(element) {
                excluded.set(row as usize);
            }
        }
        let spans = if index.is_empty() {
            Vec::new()
        } else {
            vec![0..=index.len() - 1]
        };
        Self::over(index, order, spans, Some(excluded))
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn has_next(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current_row_id(&self) -> Result<u32, Error> {
        self.current.map(|(_, row)| row).ok_or_else(not_available)
    }

    pub fn current_value(&self) -> Result<&'a K, Error> {
        let index = self.index;
        self.current
            .map(|(element, _)| index.key(element))
            .ok_or_else(not_available)
    }

    fn next_element(&mut self) -> Option<usize> {
        loop {
            let next = match self.order {
                Order::Asc => self.elements.next(),
                Order::Desc => self.elements.next_back(),
            };
            if next.is_some() {
                return next;
            }
            self.elements = self.spans.next()?;
        }
    }

    fn step(&mut self) -> Option<(usize, u32)> {
        loop {
            let pos = match self.order {
                Order::Asc => self.rows.next(),
                Order::Desc => self.rows.next_back(),
            };
            match (pos, self.element) {
                (Some(pos), Some(element)) => {
                    let row = self.index.row_at(pos);
                    if self.excluded.as_ref().is_some_and(|flags| flags.get(row as usize)) {
                        continue;
                    }
                    return Some((element, row));
                }
                _ => {
                    let element = self.next_element()?;
                    self.element = Some(element);
                    self.rows = self.index.row_span(element);
                }
            }
        }
    }
}

impl<K: Ord> Iterator for IndexCursor<'_, K> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        self.current = self.pending.take();
        if self.current.is_some() {
            self.pending = self.step();
        }
        self.current.map(|(_, row)| row)
    }
}

fn not_available() -> Error {
    Error::new(ErrorKind::Range).with_message("cursor element not available")
}

#[cfg(test)]
mod tests {
    use super::IndexCursor;
    use crate::core::error::ErrorKind;
    use crate::core::index::sorted::tests::index_of;
    use crate::core::order::Order;
    use std::ops::Bound;

    // keys by row: 0->10, 1->20, 2->10, 3->30, 4->40, 5->20
    const KEYS: [i64; 6] = [10, 20, 10, 30, 40, 20];

    #[test]
    fn range_walks_rows_in_direction() {
        let index = index_of(&KEYS, KEYS.len());
        let asc: Vec<u32> = IndexCursor::range(&index, Order::Asc, Some((0, 1))).collect();
        assert_eq!(asc, vec![0, 2, 1, 5]);
        let desc: Vec<u32> = IndexCursor::range(&index, Order::Desc, Some((0, 1))).collect();
        assert_eq!(desc, vec![5, 1, 2, 0]);
        assert_eq!(IndexCursor::range(&index, Order::Asc, None).count(), 0);
    }

    #[test]
    fn excluding_covers_both_sides_and_edges() {
        let index = index_of(&KEYS, KEYS.len());
        let middle: Vec<u32> = IndexCursor::excluding(&index, Order::Asc, Some((1, 2))).collect();
        assert_eq!(middle, vec![0, 2, 4]);
        let head: Vec<u32> = IndexCursor::excluding(&index, Order::Asc, Some((0, 0))).collect();
        assert_eq!(head, vec![1, 5, 3, 4]);
        let tail: Vec<u32> = IndexCursor::excluding(&index, Order::Desc, Some((3, 3))).collect();
        assert_eq!(tail, vec![3, 5, 1, 2, 0]);
        let all = IndexCursor::excluding(&index, Order::Asc, Some((0, 3))).count();
        assert_eq!(all, 0);
        let none = IndexCursor::excluding(&index, Order::Asc, None).count();
        assert_eq!(none, KEYS.len());
    }

    #[test]
    fn members_sorted_and_deduplicated() {
        let index = index_of(&KEYS, KEYS.len());
        let asc: Vec<u32> = index.members(Order::Asc, false, &[40, 10, 99, 40]).collect();
        assert_eq!(asc, vec![0, 2, 4]);
        let desc: Vec<u32> = index.members(Order::Desc, false, &[10, 40]).collect();
        assert_eq!(desc, vec![4, 2, 0]);
    }

    #[test]
    fn excluding_members_skips_flagged_rows() {
        let index = index_of(&KEYS, KEYS.len());
        let rest: Vec<u32> = index.members(Order::Asc, true, &[20, 20, 99]).collect();
        assert_eq!(rest, vec![0, 2, 3, 4]);
        let rest: Vec<u32> = index.members(Order::Desc, true, &[10]).collect();
        assert_eq!(rest, vec![4, 3, 5, 1]);
    }

    #[test]
    fn direct_and_negated_partition_rows() {
        let index = index_of(&KEYS, KEYS.len());
        for lo in 5..=45 {
            for hi in lo..=45 {
                for order in [Order::Asc, Order::Desc] {
                    let mut hits: Vec<u32> = index
                        .range(order, false, Bound::Included(&lo), Bound::Included(&hi))
                        .collect();
                    let misses: Vec<u32> = index
                        .range(order, true, Bound::Included(&lo), Bound::Included(&hi))
                        .collect();
                    assert!(misses.iter().all(|row| !hits.contains(row)));
                    hits.extend(misses);
                    hits.sort_unstable();
                    assert_eq!(hits, vec![0, 1, 2, 3, 4, 5], "[{lo},{hi}] {order:?}");
                }
            }
        }
    }

    #[test]
    fn current_accessors_follow_lifecycle() {
        let index = index_of(&KEYS, KEYS.len());
        let mut cursor = index.between(Order::Asc, false, &30, &40);
        assert!(cursor.has_next());
        assert_eq!(cursor.current_row_id().expect_err("before").kind(), ErrorKind::Range);

        assert_eq!(cursor.next(), Some(3));
        assert_eq!(*cursor.current_value().expect("value"), 30);
        assert_eq!(cursor.current_row_id().expect("row"), 3);
        assert_eq!(cursor.next(), Some(4));
        assert_eq!(*cursor.current_value().expect("value"), 40);
        assert!(!cursor.has_next());

        assert_eq!(cursor.next(), None);
        assert!(cursor.current_value().is_err());
    }
}
