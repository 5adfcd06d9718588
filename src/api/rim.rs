//! Purpose: The `Rim` dataset facade: open, save, and query a sealed container.
//! Exports: `Rim`, `Selection`, `RimInfo` and its parts.
//! Role: Picks an index when one serves the query and falls back to a body scan otherwise.
//! Invariants: A `Rim` is immutable; every query borrows it and never allocates per row.
//! Invariants: Indexed and scanned selections return the same row set (order may differ).
//! Notes: `open` maps the file read-only and decodes it once; the map is released afterwards.
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use fs2::FileExt;
use memmap2::Mmap;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::body::{Body, BodyScan, ColumnDef, ColumnRef, Row};
use crate::core::codec::{CodecId, Compression, codec_for};
use crate::core::container::{ContainerStats, Dataset, read_dataset, write_dataset};
use crate::core::error::{Error, ErrorKind};
use crate::core::index::cursor::IndexCursor;
use crate::core::index::geo::{GeoCursor, GeoIndex, GeoOrder};
use crate::core::index::ngram::{LineMode, NgramIndex, NgramSearch};
use crate::core::index::scalar::ScalarIndex;
use crate::core::order::Order;
use crate::core::predicate::Predicate;
use crate::core::value::Value;

#[derive(Debug)]
pub struct Rim {
    dataset: Dataset,
    codec: CodecId,
}

/// Row ids matching a `select`, from an index or a linear scan.
pub enum Selection<'a> {
    Indexed(IndexCursor<'a, Value>),
    Scan(BodyScan<'a>),
}

impl Selection<'_> {
    pub fn is_indexed(&self) -> bool {
        matches!(self, Selection::Indexed(_))
    }
}

impl Iterator for Selection<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self {
            Selection::Indexed(cursor) => cursor.next(),
            Selection::Scan(scan) => scan.next(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct GeneralIndexInfo {
    pub column: String,
    pub entries: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct GeoIndexInfo {
    pub lat: String,
    pub lon: String,
    pub entries: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct NgramIndexInfo {
    pub column: String,
    pub n: u8,
    pub entries: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct IndexInfo {
    pub general: Vec<GeneralIndexInfo>,
    pub geo: Vec<GeoIndexInfo>,
    pub ngram: Vec<NgramIndexInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RimInfo {
    pub rows: usize,
    pub codec: &'static str,
    pub columns: Vec<ColumnInfo>,
    pub indexes: IndexInfo,
}

impl Rim {
    pub(crate) fn from_dataset(dataset: Dataset, compression: Compression) -> Self {
        Self {
            dataset,
            codec: compression.id(),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| open_error(err, path))?;
        let len = file
            .metadata()
            .map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
            .len();
        if len == 0 {
            return Err(Error::new(ErrorKind::Format)
                .with_message("empty container file")
                .with_path(path));
        }
        let mmap = unsafe {
            Mmap::map(&file).map_err(|err| Error::new(ErrorKind::Io).with_path(path).with_source(err))?
        };
        let (dataset, codec) = read_dataset(&mmap).map_err(|err| err.with_path(path))?;
        debug!(path = %path.display(), rows = dataset.body.row_count(), codec = codec.name(), "opened container");
        Ok(Self { dataset, codec })
    }

    pub fn load(mut reader: impl Read) -> Result<Self, Error> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read container")
                .with_source(err)
        })?;
        let (dataset, codec) = read_dataset(&buf)?;
        Ok(Self { dataset, codec })
    }

    /// Write the container to `path`, holding an exclusive lock on it while streaming.
    /// Write the container to `path`. The image goes to a temporary file next
    /// to `path` and replaces it only once complete, so a failed save leaves
    /// any existing file untouched.
    pub fn save(&self, path: impl AsRef<Path>, compression: Compression) -> Result<ContainerStats, Error> {
        let path = path.as_ref();
        codec_for(compression).map_err(|err| err.with_path(path))?;
        let io_error = |err: io::Error| Error::new(ErrorKind::Io).with_path(path).with_source(err);

        let existing = match OpenOptions::new().write(true).open(path) {
            Ok(file) => Some(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(open_error(err, path)),
        };
        let _lock = existing
            .as_ref()
            .map(|file| SaveLock::acquire(file, path))
            .transpose()?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|err| open_error(err, dir))?;
        if let Some(file) = &existing {
            let permissions = file.metadata().map_err(io_error)?.permissions();
            tmp.as_file().set_permissions(permissions).map_err(io_error)?;
        }
        let mut out = BufWriter::new(tmp.as_file_mut());
        let stats = self.save_to(&mut out, compression).map_err(|err| err.with_path(path))?;
        out.flush().map_err(io_error)?;
        drop(out);
        tmp.as_file().sync_all().map_err(io_error)?;
        tmp.persist(path).map_err(|err| io_error(err.error))?;
        debug!(path = %path.display(), bytes = stats.bytes, "saved container");
        Ok(stats)
    }

    pub fn save_to<W: Write>(&self, out: &mut W, compression: Compression) -> Result<ContainerStats, Error> {
        write_dataset(out, &self.dataset, compression)
    }

    /// Codec the container was loaded with, or was configured with when built.
    pub fn codec(&self) -> CodecId {
        self.codec
    }

    pub fn body(&self) -> &Body {
        &self.dataset.body
    }

    pub fn columns(&self) -> &[ColumnDef] {
        self.dataset.body.columns()
    }

    pub fn row_count(&self) -> usize {
        self.dataset.body.row_count()
    }

    pub fn row(&self, id: u32) -> Result<Row<'_>, Error> {
        self.dataset.body.row(id)
    }

    pub fn scalar_index<'a>(&self, column: impl Into<ColumnRef<'a>>) -> Option<&ScalarIndex> {
        let ordinal = self.dataset.body.column_no(column)?;
        self.dataset.scalar.iter().find(|index| index.column() == ordinal)
    }

    /// Rows whose `column` value satisfies `predicate` (or, with `not`, non-null
    /// rows that fail it). Indexed results come in value order, scans in row order.
    pub fn select<'a>(
        &self,
        column: impl Into<ColumnRef<'a>>,
        predicate: &Predicate,
        not: bool,
        order: Order,
    ) -> Result<Selection<'_>, Error> {
        let body = &self.dataset.body;
        let ordinal = body.resolve(column)?;
        let index = self
            .dataset
            .scalar
            .iter()
            .find(|index| index.column() == ordinal)
            .filter(|_| ScalarIndex::supports(predicate));
        match index {
            Some(index) => Ok(Selection::Indexed(index.select(predicate, not, order)?)),
            None => Ok(Selection::Scan(body.scan(ordinal, predicate, not, order, None)?)),
        }
    }

    /// Rows within `radius_m` meters of (`lat`, `lon`) using the geo index on
    /// (`lat_column`, `lon_column`).
    pub fn search_radius<'a>(
        &self,
        lat_column: impl Into<ColumnRef<'a>>,
        lon_column: impl Into<ColumnRef<'a>>,
        lat: f64,
        lon: f64,
        radius_m: f64,
        order: GeoOrder,
    ) -> Result<GeoCursor<'_>, Error> {
        let body = &self.dataset.body;
        let lat_no = body.resolve(lat_column)?;
        let lon_no = body.resolve(lon_column)?;
        let index = self.geo_index(lat_no, lon_no)?;
        let (Some(lat_data), Some(lon_data)) = (body.column_data(lat_no), body.column_data(lon_no)) else {
            return Err(Error::new(ErrorKind::Internal).with_message("geo column missing from body"));
        };
        index.search_radius(lat_data, lon_data, lat, lon, radius_m, order)
    }

    fn geo_index(&self, lat: usize, lon: usize) -> Result<&GeoIndex, Error> {
        self.dataset
            .geo
            .iter()
            .find(|index| index.lat_column() == lat && index.lon_column() == lon)
            .ok_or_else(|| {
                let columns = self.columns();
                Error::new(ErrorKind::Argument)
                    .with_message(format!(
                        "no geo index on ({}, {})",
                        columns[lat].name, columns[lon].name
                    ))
                    .with_hint("Declare the pair under `geo` when building.")
            })
    }

    /// Substring occurrences of `query` in `column`, served by the widest n-gram
    /// index no longer than the query.
    pub fn text_search<'a>(
        &self,
        column: impl Into<ColumnRef<'a>>,
        query: &str,
        order: Order,
        mode: LineMode,
    ) -> Result<NgramSearch<'_>, Error> {
        let body = &self.dataset.body;
        let ordinal = body.resolve(column)?;
        let query_len = query.encode_utf16().count();
        let candidates: Vec<&NgramIndex> = self
            .dataset
            .ngram
            .iter()
            .filter(|index| index.column() == ordinal)
            .collect();
        let fitting = candidates
            .iter()
            .copied()
            .filter(|index| usize::from(index.ngram_length()) <= query_len)
            .max_by_key(|index| index.ngram_length());
        let chosen: &NgramIndex = fitting
            .or_else(|| candidates.iter().copied().min_by_key(|index| index.ngram_length()))
            .ok_or_else(|| {
                Error::new(ErrorKind::Argument)
                    .with_message("no n-gram index on column")
                    .with_column(body.columns()[ordinal].name.clone())
            })?;
        Ok(chosen.search(query, order, mode))
    }

    pub fn info(&self) -> RimInfo {
        let columns = self.columns();
        let name = |ordinal: usize| columns[ordinal].name.clone();
        RimInfo {
            rows: self.row_count(),
            codec: self.codec.name(),
            columns: columns
                .iter()
                .map(|def| ColumnInfo {
                    name: def.name.clone(),
                    type_tag: def.column_type.tag(),
                })
                .collect(),
            indexes: IndexInfo {
                general: self
                    .dataset
                    .scalar
                    .iter()
                    .map(|index| GeneralIndexInfo {
                        column: name(index.column()),
                        entries: index.len(),
                    })
                    .collect(),
                geo: self
                    .dataset
                    .geo
                    .iter()
                    .map(|index| GeoIndexInfo {
                        lat: name(index.lat_column()),
                        lon: name(index.lon_column()),
                        entries: index.len(),
                    })
                    .collect(),
                ngram: self
                    .dataset
                    .ngram
                    .iter()
                    .map(|index| NgramIndexInfo {
                        column: name(index.column()),
                        n: index.ngram_length(),
                        entries: index.len(),
                    })
                    .collect(),
            },
        }
    }
}

struct SaveLock<'a> {
    file: &'a File,
}

impl<'a> SaveLock<'a> {
    fn acquire(file: &'a File, path: &Path) -> Result<Self, Error> {
        file.lock_exclusive().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to lock output file")
                .with_path(path)
                .with_source(err)
        })?;
        Ok(Self { file })
    }
}

impl Drop for SaveLock<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

fn open_error(err: io::Error, path: &Path) -> Error {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        _ => ErrorKind::Io,
    };
    Error::new(kind).with_path(path).with_source(err)
}
