//! Purpose: "Saving" variable-length integers and fixed byte-width row ids.
//! Exports: `encode_varint`, `decode_varint`, `varint_len`, `ByteWidth`, `VARINT_MAX`.
//! Role: Leaf codec shared by the container format and every index chunk.
//! Invariants: A varint is 1-4 bytes; the first byte's top two bits hold (len - 1).
//! Invariants: The width chosen for a row count N represents every id in [0, N-1].
use crate::core::error::{Error, ErrorKind};

/// Largest value a saving varint can carry (30 payload bits).
pub const VARINT_MAX: u32 = (1 << 30) - 1;

const LIMITS: [u32; 4] = [1 << 6, 1 << 14, 1 << 22, 1 << 30];

pub fn varint_len(value: u32) -> usize {
    LIMITS
        .iter()
        .position(|limit| value < *limit)
        .map(|idx| idx + 1)
        .unwrap_or(5)
}

/// Append `value` as a saving varint.
pub fn encode_varint(value: u32, buf: &mut Vec<u8>) -> Result<(), Error> {
    if value > VARINT_MAX {
        return Err(Error::new(ErrorKind::Range)
            .with_message(format!("varint value {value} exceeds {VARINT_MAX}")));
    }
    let len = varint_len(value);
    let tagged = value | (((len - 1) as u32) << (len * 8 - 2));
    let bytes = tagged.to_be_bytes();
    buf.extend_from_slice(&bytes[4 - len..]);
    Ok(())
}

/// Decode a saving varint from `buf` at `*pos`, advancing `*pos`.
pub fn decode_varint(buf: &[u8], pos: &mut usize) -> Result<u32, Error> {
    let Some(&first) = buf.get(*pos) else {
        return Err(truncated(*pos));
    };
    let len = ((first >> 6) as usize) + 1;
    let end = *pos + len;
    if end > buf.len() {
        return Err(truncated(*pos));
    }
    let mut value = (first & 0x3F) as u32;
    for byte in &buf[*pos + 1..end] {
        value = (value << 8) | *byte as u32;
    }
    *pos = end;
    Ok(value)
}

fn truncated(pos: usize) -> Error {
    Error::new(ErrorKind::Format)
        .with_message("truncated varint")
        .with_offset(pos as u64)
}

/// Fixed storage width for row ids, chosen once from a row count.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ByteWidth {
    One = 1,
    Two = 2,
    Four = 4,
}

impl ByteWidth {
    pub fn for_row_count(rows: usize) -> Self {
        if rows <= 1 << 8 {
            ByteWidth::One
        } else if rows <= 1 << 16 {
            ByteWidth::Two
        } else {
            ByteWidth::Four
        }
    }

    /// Narrowest width that can hold `max`.
    pub fn for_max_value(max: u32) -> Self {
        if max <= u8::MAX as u32 {
            ByteWidth::One
        } else if max <= u16::MAX as u32 {
            ByteWidth::Two
        } else {
            ByteWidth::Four
        }
    }

    pub fn bytes(self) -> usize {
        self as usize
    }

    pub fn max_value(self) -> u32 {
        match self {
            ByteWidth::One => u8::MAX as u32,
            ByteWidth::Two => u16::MAX as u32,
            ByteWidth::Four => u32::MAX,
        }
    }

    pub fn encode(self, value: u32, buf: &mut Vec<u8>) -> Result<(), Error> {
        if value > self.max_value() {
            return Err(Error::new(ErrorKind::Range).with_message(format!(
                "value {value} does not fit in {} byte(s)",
                self.bytes()
            )));
        }
        let bytes = value.to_be_bytes();
        buf.extend_from_slice(&bytes[4 - self.bytes()..]);
        Ok(())
    }

    pub fn decode(self, buf: &[u8], pos: &mut usize) -> Result<u32, Error> {
        let end = *pos + self.bytes();
        if end > buf.len() {
            return Err(Error::new(ErrorKind::Format)
                .with_message("truncated fixed-width integer")
                .with_offset(*pos as u64));
        }
        let value = buf[*pos..end]
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | *byte as u32);
        *pos = end;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteWidth, VARINT_MAX, decode_varint, encode_varint, varint_len};
    use crate::core::error::ErrorKind;

    fn round_trip(value: u32) {
        let mut buf = Vec::new();
        encode_varint(value, &mut buf).expect("encode");
        assert_eq!(buf.len(), varint_len(value));
        let mut pos = 0;
        assert_eq!(decode_varint(&buf, &mut pos).expect("decode"), value);
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn varint_round_trips_at_boundaries() {
        for value in [
            0,
            1,
            63,
            64,
            (1 << 14) - 1,
            1 << 14,
            (1 << 22) - 1,
            1 << 22,
            VARINT_MAX,
        ] {
            round_trip(value);
        }
    }

    #[test]
    fn varint_sizes_follow_prefix() {
        assert_eq!(varint_len(63), 1);
        assert_eq!(varint_len(64), 2);
        assert_eq!(varint_len((1 << 14) - 1), 2);
        assert_eq!(varint_len(1 << 22), 4);

        let mut buf = Vec::new();
        encode_varint(64, &mut buf).expect("encode");
        assert_eq!(buf, vec![0x40, 0x40]);
    }

    #[test]
    fn varint_rejects_oversized_value() {
        let mut buf = Vec::new();
        let err = encode_varint(VARINT_MAX + 1, &mut buf).expect_err("too large");
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(buf.is_empty());
    }

    #[test]
    fn varint_reports_truncation() {
        let mut pos = 0;
        let err = decode_varint(&[], &mut pos).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Format);

        let mut pos = 0;
        let err = decode_varint(&[0xC0, 0x01], &mut pos).expect_err("short");
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(pos, 0);
    }

    #[test]
    fn varint_sequence_decodes_in_order() {
        let values = [5u32, 70_000, 0, 300, VARINT_MAX];
        let mut buf = Vec::new();
        for value in values {
            encode_varint(value, &mut buf).expect("encode");
        }
        let mut pos = 0;
        for value in values {
            assert_eq!(decode_varint(&buf, &mut pos).expect("decode"), value);
        }
        assert_eq!(pos, buf.len());
    }

    #[test]
    fn width_covers_every_row_id() {
        let cases = [
            (0usize, ByteWidth::One),
            (1, ByteWidth::One),
            (256, ByteWidth::One),
            (257, ByteWidth::Two),
            (65_536, ByteWidth::Two),
            (65_537, ByteWidth::Four),
        ];
        for (rows, expected) in cases {
            let width = ByteWidth::for_row_count(rows);
            assert_eq!(width, expected, "rows={rows}");
            let last = rows.saturating_sub(1) as u32;
            assert!(last <= width.max_value());

            let mut buf = Vec::new();
            width.encode(last, &mut buf).expect("encode");
            assert_eq!(buf.len(), width.bytes());
            let mut pos = 0;
            assert_eq!(width.decode(&buf, &mut pos).expect("decode"), last);
        }
    }

    #[test]
    fn width_rejects_overflow() {
        let mut buf = Vec::new();
        let err = ByteWidth::One.encode(256, &mut buf).expect_err("overflow");
        assert_eq!(err.kind(), ErrorKind::Range);
        assert_eq!(ByteWidth::for_max_value(256), ByteWidth::Two);
        assert_eq!(ByteWidth::for_max_value(70_000), ByteWidth::Four);
    }
}
