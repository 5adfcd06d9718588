// Width-specialized row-id storage: one flat array per index, in u8/u16/u32 cells.
use crate::core::error::{Error, ErrorKind};
use crate::core::varint::ByteWidth;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RowIds {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl RowIds {
    pub fn with_width(width: ByteWidth) -> Self {
        match width {
            ByteWidth::One => RowIds::U8(Vec::new()),
            ByteWidth::Two => RowIds::U16(Vec::new()),
            ByteWidth::Four => RowIds::U32(Vec::new()),
        }
    }

    /// Narrowest storage that holds every value in `values`.
    pub fn narrowest(values: &[u32]) -> Self {
        let max = values.iter().copied().max().unwrap_or(0);
        let mut ids = RowIds::with_width(ByteWidth::for_max_value(max));
        for value in values {
            ids.push_unchecked(*value);
        }
        ids
    }

    pub fn width(&self) -> ByteWidth {
        match self {
            RowIds::U8(_) => ByteWidth::One,
            RowIds::U16(_) => ByteWidth::Two,
            RowIds::U32(_) => ByteWidth::Four,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowIds::U8(v) => v.len(),
            RowIds::U16(v) => v.len(),
            RowIds::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, value: u32) -> Result<(), Error> {
        if value > self.width().max_value() {
            return Err(Error::new(ErrorKind::Range)
                .with_message(format!(
                    "row id {value} exceeds {}-byte storage",
                    self.width().bytes()
                ))
                .with_row(value as u64));
        }
        self.push_unchecked(value);
        Ok(())
    }

    fn push_unchecked(&mut self, value: u32) {
        match self {
            RowIds::U8(v) => v.push(value as u8),
            RowIds::U16(v) => v.push(value as u16),
            RowIds::U32(v) => v.push(value),
        }
    }

    pub fn get(&self, pos: usize) -> u32 {
        match self {
            RowIds::U8(v) => v[pos] as u32,
            RowIds::U16(v) => v[pos] as u32,
            RowIds::U32(v) => v[pos],
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = u32> + '_ {
        (0..self.len()).map(move |pos| self.get(pos))
    }
}
