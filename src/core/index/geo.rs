//! Purpose: Spatial index over a (lat, lon) column pair, keyed by 64-bit quad-keys.
//! Exports: `GeoIndex`, `GeoCursor`, `GeoHit`, `GeoOrder`.
//! Role: Reduces radius search to at most nine contiguous key-range scans of a `SortedIndex<u64>`.
//! Invariants: Rows with a null or non-finite coordinate are not indexed.
//! Invariants: Returned hits carry the approximate distance that admitted them.
use std::ops::Bound;
use std::vec;

use crate::core::error::{Error, ErrorKind};
use crate::core::geo::{self, ApproxOrigin, KeyRange};
use crate::core::index::cursor::IndexCursor;
use crate::core::index::sorted::{IndexBuilder, SortedIndex, group_rows};
use crate::core::order::Order;
use crate::core::value::{ColumnData, take};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum GeoOrder {
    /// Hits stream in key order as they are found.
    #[default]
    Unsorted,
    /// Hits are buffered and replayed nearest first (ties by row id).
    Nearest,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GeoHit {
    pub row_id: u32,
    pub distance_m: u64,
}

#[derive(Debug)]
pub struct GeoIndex {
    lat_column: usize,
    lon_column: usize,
    index: SortedIndex<u64>,
}

impl GeoIndex {
    pub fn build(
        lat_column: usize,
        lat: &ColumnData,
        lon_column: usize,
        lon: &ColumnData,
    ) -> Result<Self, Error> {
        check_coordinates(lat, lon)?;
        let pairs = (0..lat.len())
            .filter_map(|row| {
                let (la, lo) = (lat.f64_at(row)?, lon.f64_at(row)?);
                (la.is_finite() && lo.is_finite()).then(|| (geo::quad_key(la, lo), row as u32))
            })
            .collect();
        let grouped = group_rows(pairs);
        let mut builder = IndexBuilder::new(grouped.len(), lat.len());
        builder.reserve(grouped.len());
        for (key, rows) in grouped {
            builder.add(key, &rows)?;
        }
        Ok(Self {
            lat_column,
            lon_column,
            index: builder.fix()?,
        })
    }

    pub fn lat_column(&self) -> usize {
        self.lat_column
    }

    pub fn lon_column(&self) -> usize {
        self.lon_column
    }

    pub fn sorted(&self) -> &SortedIndex<u64> {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Rows within `radius_m` meters of (`lat`, `lon`), by approximate distance.
    /// `lat_data`/`lon_data` must be the columns this index was built from.
    pub fn search_radius<'a>(
        &'a self,
        lat_data: &'a ColumnData,
        lon_data: &'a ColumnData,
        lat: f64,
        lon: f64,
        radius_m: f64,
        order: GeoOrder,
    ) -> Result<GeoCursor<'a>, Error> {
        check_coordinates(lat_data, lon_data)?;
        if !(lat.is_finite() && lon.is_finite()) || radius_m.is_nan() || radius_m < 0.0 {
            return Err(Error::new(ErrorKind::Argument)
                .with_message(format!("invalid radius query ({lat}, {lon}) r={radius_m}")));
        }
        if lat.abs() > 90.0 || lon.abs() > 180.0 {
            return Err(Error::new(ErrorKind::Argument)
                .with_message(format!("coordinates ({lat}, {lon}) out of range"))
                .with_hint("Latitude must lie within ±90 and longitude within ±180 degrees."));
        }
        let detail = geo::detail_for_radius(radius_m, lat);
        let stream = RadiusStream {
            index: &self.index,
            lat: lat_data,
            lon: lon_data,
            origin: ApproxOrigin::new(lat, lon),
            radius_m,
            ranges: geo::neighborhood(lat, lon, detail).into_iter(),
            candidates: None,
        };
        Ok(match order {
            GeoOrder::Unsorted => GeoCursor::Streaming(stream),
            GeoOrder::Nearest => {
                let mut hits: Vec<GeoHit> = stream.collect();
                hits.sort_unstable_by_key(|hit| (hit.distance_m, hit.row_id));
                GeoCursor::Buffered(hits.into_iter())
            }
        })
    }

    pub fn encode_chunk(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        self.index.encode_chunk(buf, |key, buf| {
            buf.extend_from_slice(&key.to_be_bytes());
            Ok(())
        })
    }

    pub fn decode_chunk(
        lat_column: usize,
        lon_column: usize,
        planned: usize,
        row_count: usize,
        chunk: &[u8],
    ) -> Result<Self, Error> {
        let index = SortedIndex::decode_chunk(chunk, planned, row_count, |buf, pos| {
            let bytes = take(buf, pos, 8)?;
            let mut key = [0u8; 8];
            key.copy_from_slice(bytes);
            Ok(u64::from_be_bytes(key))
        })?;
        Ok(Self {
            lat_column,
            lon_column,
            index,
        })
    }
}

fn check_coordinates(lat: &ColumnData, lon: &ColumnData) -> Result<(), Error> {
    for data in [lat, lon] {
        if !data.column_type().is_floating() {
            return Err(Error::new(ErrorKind::Argument)
                .with_message(format!(
                    "geo index needs float or double columns, got {}",
                    data.column_type()
                ))
                .with_hint("Declare latitude and longitude as `float` or `double`."));
        }
    }
    if lat.len() != lon.len() {
        return Err(Error::new(ErrorKind::Range).with_message("latitude and longitude lengths differ"));
    }
    Ok(())
}

/// Streaming radius filter: scans each neighborhood key range and keeps
/// candidates whose approximate distance is within the radius.
pub struct RadiusStream<'a> {
    index: &'a SortedIndex<u64>,
    lat: &'a ColumnData,
    lon: &'a ColumnData,
    origin: ApproxOrigin,
    radius_m: f64,
    ranges: vec::IntoIter<KeyRange>,
    candidates: Option<IndexCursor<'a, u64>>,
}

impl Iterator for RadiusStream<'_> {
    type Item = GeoHit;

    fn next(&mut self) -> Option<GeoHit> {
        loop {
            if let Some(candidates) = self.candidates.as_mut() {
                for row_id in candidates.by_ref() {
                    let (Some(lat), Some(lon)) = (
                        self.lat.f64_at(row_id as usize),
                        self.lon.f64_at(row_id as usize),
                    ) else {
                        continue;
                    };
                    let distance_m = self.origin.distance_m(lat, lon);
                    if distance_m as f64 <= self.radius_m {
                        return Some(GeoHit { row_id, distance_m });
                    }
                }
            }
            let range = self.ranges.next()?;
            self.candidates = Some(self.index.range(
                Order::Asc,
                false,
                Bound::Included(&range.start),
                Bound::Included(&range.end),
            ));
        }
    }
}

pub enum GeoCursor<'a> {
    Streaming(RadiusStream<'a>),
    Buffered(vec::IntoIter<GeoHit>),
}

impl Iterator for GeoCursor<'_> {
    type Item = GeoHit;

    fn next(&mut self) -> Option<GeoHit> {
        match self {
            GeoCursor::Streaming(stream) => stream.next(),
            GeoCursor::Buffered(hits) => hits.next(),
        }
    }
}
