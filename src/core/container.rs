//! Purpose: Read and write the Rim container file layout.
//! Exports: `Dataset`, `read_dataset`, `write_dataset`, `MAGIC`, `ContainerStats`.
//! Role: Orchestrates the body and every index through their chunk codecs, delegating
//!   byte compression to `core::codec`.
//! Invariants: Layout is magic, codec id, catalog, row count, index counts, body chunks,
//!   then general, geo and n-gram index sections, in that order.
//! Invariants: Every chunk is `flag u8 | varint len | bytes`; a compressed chunk is only
//!   kept when it is strictly smaller than its raw bytes.
//! Invariants: Each section must decode exactly its planned entry count.
use std::io::Write;

use tracing::{debug, trace};

use crate::core::body::{Body, BodyBuilder, ColumnDef};
use crate::core::codec::{Codec, CodecId, Compression, codec_for, codec_for_id};
use crate::core::error::{Error, ErrorKind};
use crate::core::index::geo::GeoIndex;
use crate::core::index::ngram::NgramIndex;
use crate::core::index::scalar::ScalarIndex;
use crate::core::value::{ColumnData, ColumnType, take};
use crate::core::varint::{ByteWidth, decode_varint, encode_varint};

pub const MAGIC: [u8; 4] = *b"RIM1";

/// A sealed dataset: the column store plus its indexes.
#[derive(Debug)]
pub struct Dataset {
    pub body: Body,
    pub scalar: Vec<ScalarIndex>,
    pub geo: Vec<GeoIndex>,
    pub ngram: Vec<NgramIndex>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ContainerStats {
    pub bytes: u64,
    pub chunks: usize,
    pub compressed_chunks: usize,
}

/// Planned counts of general and geo sections are bounded by the row count.
fn planned_width(row_count: usize) -> ByteWidth {
    ByteWidth::for_max_value(row_count as u32)
}

fn count_u32(count: usize, what: &str) -> Result<u32, Error> {
    u32::try_from(count).map_err(|_| Error::new(ErrorKind::Range).with_message(format!("{what} {count} too large")))
}

struct Sink<'w, W: Write> {
    out: &'w mut W,
    codec: Option<Box<dyn Codec>>,
    stats: ContainerStats,
}

impl<W: Write> Sink<'_, W> {
    fn put(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.out.write_all(bytes).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write container")
                .with_offset(self.stats.bytes)
                .with_source(err)
        })?;
        self.stats.bytes += bytes.len() as u64;
        Ok(())
    }

    /// Frame `raw` as one chunk, compressed only if that makes it smaller.
    fn put_chunk(&mut self, raw: Vec<u8>) -> Result<(), Error> {
        let packed = match &self.codec {
            Some(codec) => {
                let packed = codec.compress(&raw)?;
                if packed.len() < raw.len() {
                    Some(packed)
                } else {
                    trace!(raw = raw.len(), packed = packed.len(), "compressed chunk not smaller; storing raw");
                    None
                }
            }
            None => None,
        };
        let (flag, bytes) = match &packed {
            Some(packed) => (1u8, packed.as_slice()),
            None => (0u8, raw.as_slice()),
        };
        let mut header = vec![flag];
        encode_varint(count_u32(bytes.len(), "chunk length")?, &mut header)?;
        self.put(&header)?;
        self.put(bytes)?;
        self.stats.chunks += 1;
        if flag == 1 {
            self.stats.compressed_chunks += 1;
        }
        Ok(())
    }

    fn put_varint(&mut self, value: u32) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(4);
        encode_varint(value, &mut buf)?;
        self.put(&buf)
    }

    fn put_width(&mut self, width: ByteWidth, value: u32) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(4);
        width.encode(value, &mut buf)?;
        self.put(&buf)
    }
}

/// Stream `dataset` to `out` under `compression`.
pub fn write_dataset<W: Write>(
    out: &mut W,
    dataset: &Dataset,
    compression: Compression,
) -> Result<ContainerStats, Error> {
    let codec = codec_for(compression)?;
    let id = compression.id();
    let body = &dataset.body;
    let row_count = body.row_count();
    let mut sink = Sink {
        out,
        codec,
        stats: ContainerStats::default(),
    };

    sink.put(&MAGIC)?;
    sink.put(&[id.as_byte()])?;
    sink.put_varint(count_u32(body.columns().len(), "column count")?)?;
    for def in body.columns() {
        sink.put_varint(count_u32(def.name.len(), "column name length")?)?;
        sink.put(def.name.as_bytes())?;
        sink.put(&[def.column_type.code()])?;
    }
    sink.put_varint(count_u32(row_count, "row count")?)?;
    sink.put_varint(count_u32(dataset.scalar.len(), "general index count")?)?;
    sink.put_varint(count_u32(dataset.geo.len(), "geo index count")?)?;
    sink.put_varint(count_u32(dataset.ngram.len(), "ngram index count")?)?;
    debug!(
        codec = id.name(),
        columns = body.columns().len(),
        rows = row_count,
        "writing container header"
    );

    for ordinal in 0..body.columns().len() {
        let mut raw = Vec::new();
        if let Some(data) = body.column_data(ordinal) {
            data.encode(&mut raw)?;
        }
        sink.put_chunk(raw)?;
    }
    debug!(chunks = body.columns().len(), "wrote body");

    let width = planned_width(row_count);
    for index in &dataset.scalar {
        sink.put_varint(count_u32(index.column(), "column number")?)?;
        sink.put_width(width, count_u32(index.len(), "planned count")?)?;
        let mut raw = Vec::new();
        index.encode_chunk(&mut raw)?;
        sink.put_chunk(raw)?;
    }
    for index in &dataset.geo {
        sink.put_varint(count_u32(index.lat_column(), "column number")?)?;
        sink.put_varint(count_u32(index.lon_column(), "column number")?)?;
        sink.put_width(width, count_u32(index.len(), "planned count")?)?;
        let mut raw = Vec::new();
        index.encode_chunk(&mut raw)?;
        sink.put_chunk(raw)?;
    }
    for index in &dataset.ngram {
        sink.put_varint(count_u32(index.column(), "column number")?)?;
        sink.put(&[index.ngram_length()])?;
        sink.put_varint(count_u32(index.len(), "planned count")?)?;
        let mut raw = Vec::new();
        index.encode_chunk(&mut raw)?;
        sink.put_chunk(raw)?;
    }
    debug!(
        general = dataset.scalar.len(),
        geo = dataset.geo.len(),
        ngram = dataset.ngram.len(),
        bytes = sink.stats.bytes,
        compressed = sink.stats.compressed_chunks,
        "wrote indexes"
    );
    sink.out.flush().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to flush container")
            .with_source(err)
    })?;
    Ok(sink.stats)
}

struct Source<'b> {
    buf: &'b [u8],
    pos: usize,
    codec_id: CodecId,
    codec: Option<Option<Box<dyn Codec>>>,
}

impl Source<'_> {
    fn byte(&mut self) -> Result<u8, Error> {
        Ok(take(self.buf, &mut self.pos, 1)?[0])
    }

    fn varint(&mut self) -> Result<usize, Error> {
        Ok(decode_varint(self.buf, &mut self.pos)? as usize)
    }

    fn width(&mut self, width: ByteWidth) -> Result<usize, Error> {
        Ok(width.decode(self.buf, &mut self.pos)? as usize)
    }

    fn column(&mut self, columns: &[ColumnDef]) -> Result<usize, Error> {
        let at = self.pos;
        let ordinal = self.varint()?;
        if ordinal >= columns.len() {
            return Err(Error::new(ErrorKind::Range)
                .with_message(format!("index refers to column {ordinal} of {}", columns.len()))
                .with_offset(at as u64));
        }
        Ok(ordinal)
    }

    /// Next framed chunk, decompressed when flagged. The codec is resolved on
    /// the first compressed chunk only.
    fn chunk(&mut self) -> Result<Vec<u8>, Error> {
        let at = self.pos;
        let flag = self.byte()?;
        let len = self.varint()?;
        let bytes = take(self.buf, &mut self.pos, len)?;
        match flag {
            0 => Ok(bytes.to_vec()),
            1 => {
                if self.codec.is_none() {
                    self.codec = Some(codec_for_id(self.codec_id)?);
                }
                match self.codec.as_ref().and_then(Option::as_ref) {
                    Some(codec) => codec.decompress(bytes).map_err(|err| err.with_offset(at as u64)),
                    None => Err(Error::new(ErrorKind::Format)
                        .with_message("compressed chunk in an uncompressed container")
                        .with_offset(at as u64)),
                }
            }
            other => Err(Error::new(ErrorKind::Format)
                .with_message(format!("invalid chunk flag {other}"))
                .with_offset(at as u64)),
        }
    }
}

fn expect_column_type(def: &ColumnDef, allowed: &[ColumnType], what: &str) -> Result<(), Error> {
    if allowed.contains(&def.column_type) {
        return Ok(());
    }
    Err(Error::new(ErrorKind::Format)
        .with_message(format!("{what} index on {} column", def.column_type))
        .with_column(def.name.clone()))
}

/// Parse a whole container image.
pub fn read_dataset(buf: &[u8]) -> Result<(Dataset, CodecId), Error> {
    if buf.len() < MAGIC.len() || buf[..MAGIC.len()] != MAGIC {
        return Err(Error::new(ErrorKind::Format)
            .with_message("not a rim container (bad magic)")
            .with_offset(0));
    }
    let mut src = Source {
        buf,
        pos: MAGIC.len(),
        codec_id: CodecId::None,
        codec: None,
    };
    src.codec_id = CodecId::from_byte(src.byte()?).map_err(|err| err.with_offset(4))?;

    let column_count = src.varint()?;
    let mut columns = Vec::with_capacity(column_count.min(buf.len()));
    for _ in 0..column_count {
        let at = src.pos;
        let len = src.varint()?;
        let name = std::str::from_utf8(take(buf, &mut src.pos, len)?).map_err(|err| {
            Error::new(ErrorKind::Format)
                .with_message("column name is not UTF-8")
                .with_offset(at as u64)
                .with_source(err)
        })?;
        let ty = ColumnType::from_code(src.byte()?).map_err(|err| err.with_offset(src.pos as u64 - 1))?;
        columns.push(ColumnDef::new(name, ty));
    }
    let row_count = src.varint()?;
    if !columns.is_empty() && row_count.div_ceil(8) > buf.len() {
        return Err(Error::new(ErrorKind::Format)
            .with_message(format!("row count {row_count} exceeds what the file can hold"))
            .with_offset(src.pos as u64));
    }
    let general_count = src.varint()?;
    let geo_count = src.varint()?;
    let ngram_count = src.varint()?;
    debug!(
        codec = src.codec_id.name(),
        columns = columns.len(),
        rows = row_count,
        general = general_count,
        geo = geo_count,
        ngram = ngram_count,
        "read container header"
    );

    let mut builder = BodyBuilder::new(columns.clone(), row_count).map_err(|err| {
        Error::new(ErrorKind::Format)
            .with_message("invalid column catalog")
            .with_source(err)
    })?;
    for (ordinal, def) in columns.iter().enumerate() {
        let chunk = src.chunk()?;
        let mut pos = 0;
        let data = ColumnData::decode(def.column_type, row_count, &chunk, &mut pos)
            .map_err(|err| err.with_column(def.name.clone()))?;
        if pos != chunk.len() {
            return Err(Error::new(ErrorKind::Format)
                .with_message(format!("{} trailing bytes in body chunk", chunk.len() - pos))
                .with_column(def.name.clone()));
        }
        builder.set_column(ordinal, data)?;
    }
    let body = builder.fix()?;

    let width = planned_width(row_count);
    let mut scalar = Vec::with_capacity(general_count.min(columns.len()));
    for _ in 0..general_count {
        let column = src.column(&columns)?;
        let planned = src.width(width)?;
        let chunk = src.chunk()?;
        let def = &columns[column];
        scalar.push(
            ScalarIndex::decode_chunk(column, def.column_type, planned, row_count, &chunk)
                .map_err(|err| err.with_column(def.name.clone()))?,
        );
    }
    let mut geo = Vec::with_capacity(geo_count.min(columns.len()));
    for _ in 0..geo_count {
        let lat = src.column(&columns)?;
        let lon = src.column(&columns)?;
        let floating = [ColumnType::Float, ColumnType::Double];
        expect_column_type(&columns[lat], &floating, "geo")?;
        expect_column_type(&columns[lon], &floating, "geo")?;
        let planned = src.width(width)?;
        let chunk = src.chunk()?;
        geo.push(GeoIndex::decode_chunk(lat, lon, planned, row_count, &chunk)?);
    }
    let mut ngram = Vec::with_capacity(ngram_count.min(columns.len()));
    for _ in 0..ngram_count {
        let column = src.column(&columns)?;
        expect_column_type(&columns[column], &[ColumnType::String], "n-gram")?;
        let n = src.byte()?;
        let planned = src.varint()?;
        let chunk = src.chunk()?;
        ngram.push(
            NgramIndex::decode_chunk(column, n, planned, row_count, &chunk)
                .map_err(|err| err.with_column(columns[column].name.clone()))?,
        );
    }
    if src.pos != buf.len() {
        return Err(Error::new(ErrorKind::Format)
            .with_message(format!("{} trailing bytes after last section", buf.len() - src.pos))
            .with_offset(src.pos as u64));
    }
    debug!(bytes = buf.len(), "read container indexes");
    Ok((Dataset { body, scalar, geo, ngram }, src.codec_id))
}
