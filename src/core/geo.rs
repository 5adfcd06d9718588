//! Purpose: Quad-key tiling math and distance functions for radius search.
//! Exports: `quad_key`, `tile_xy`, `tile_range`, `neighborhood`, `detail_for_radius`,
//!   `ApproxOrigin`, `precise_distance`, `Ellipsoid`, `KeyRange`, `MAX_DETAIL`.
//! Role: Turns a (lat, lon, radius) query into contiguous quad-key ranges plus a fast filter.
//! Invariants: Keys are interleaved Mercator tile bits at detail 23 (46 significant bits).
//! Invariants: A tile at detail d owns exactly `[key, key | low_bits_mask(23 - d)]`.
use std::collections::BTreeSet;
use std::f64::consts::PI;

pub const MAX_DETAIL: u8 = 23;
pub const MAX_LATITUDE: f64 = 85.051_128_78;
pub const MIN_LATITUDE: f64 = -MAX_LATITUDE;

const EARTH_CIRCUMFERENCE_M: f64 = 40_075_016.685_578_5;
const METERS_PER_DEGREE: f64 = EARTH_CIRCUMFERENCE_M / 360.0;

/// Equatorial tile width in meters for detail 1..=23, coarsest first.
const TILE_WIDTH_M: [f64; MAX_DETAIL as usize] = [
    20_037_508.0,
    10_018_754.0,
    5_009_377.0,
    2_504_688.0,
    1_252_344.0,
    626_172.0,
    313_086.0,
    156_543.0,
    78_271.0,
    39_135.0,
    19_567.0,
    9_783.0,
    4_891.0,
    2_445.0,
    1_222.0,
    611.0,
    305.0,
    152.0,
    76.0,
    38.0,
    19.0,
    9.5,
    4.7,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KeyRange {
    pub start: u64,
    pub end: u64,
}

impl KeyRange {
    pub fn contains(&self, key: u64) -> bool {
        self.start <= key && key <= self.end
    }
}

pub fn low_bits_mask(levels: u8) -> u64 {
    (1u64 << (2 * levels as u32)) - 1
}

/// Mercator tile coordinates of a point at `detail`.
pub fn tile_xy(lat: f64, lon: f64, detail: u8) -> (u32, u32) {
    let lat = lat.clamp(MIN_LATITUDE, MAX_LATITUDE);
    let lon = lon.clamp(-180.0, 180.0);
    let x = (lon + 180.0) / 360.0;
    let sin_lat = (lat * PI / 180.0).sin();
    let y = 0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * PI);
    let tiles = (1u64 << detail) as f64;
    let clip = |v: f64| (v * tiles).floor().clamp(0.0, tiles - 1.0) as u32;
    (clip(x), clip(y))
}

/// Key of the tile's first cell at full precision.
pub fn tile_key(tx: u32, ty: u32, detail: u8) -> u64 {
    let mut key = 0u64;
    for bit in (0..detail).rev() {
        let digit = ((tx >> bit) & 1) as u64 | ((((ty >> bit) & 1) as u64) << 1);
        key = (key << 2) | digit;
    }
    key << (2 * (MAX_DETAIL - detail) as u32)
}

pub fn quad_key(lat: f64, lon: f64) -> u64 {
    let (tx, ty) = tile_xy(lat, lon, MAX_DETAIL);
    tile_key(tx, ty, MAX_DETAIL)
}

pub fn end_key(key: u64, detail: u8) -> u64 {
    key | low_bits_mask(MAX_DETAIL - detail)
}

pub fn tile_range(tx: u32, ty: u32, detail: u8) -> KeyRange {
    let start = tile_key(tx, ty, detail);
    KeyRange {
        start,
        end: end_key(start, detail),
    }
}

/// Finest detail whose tiles are at least `radius_m` wide near `lat`; 0 means
/// the radius needs the whole map.
pub fn detail_for_radius(radius_m: f64, lat: f64) -> u8 {
    // Tiles shrink toward the poles, so size them at the far edge of the circle.
    let reach = (lat.abs() + radius_m.max(0.0) / METERS_PER_DEGREE).min(MAX_LATITUDE);
    let scale = (reach * PI / 180.0).cos();
    for detail in (1..=MAX_DETAIL).rev() {
        if TILE_WIDTH_M[detail as usize - 1] * scale >= radius_m {
            return detail;
        }
    }
    0
}

/// Key ranges of the 3x3 tile block around a point, deduplicated and sorted.
/// Columns wrap across the antimeridian; rows clip at the poles.
pub fn neighborhood(lat: f64, lon: f64, detail: u8) -> Vec<KeyRange> {
    if detail == 0 {
        return vec![KeyRange {
            start: 0,
            end: low_bits_mask(MAX_DETAIL),
        }];
    }
    let (cx, cy) = tile_xy(lat, lon, detail);
    let tiles = 1i64 << detail;
    let mut cells = BTreeSet::new();
    for dy in -1i64..=1 {
        let ty = cy as i64 + dy;
        if ty < 0 || ty >= tiles {
            continue;
        }
        for dx in -1i64..=1 {
            let tx = (cx as i64 + dx).rem_euclid(tiles);
            cells.insert(tile_range(tx as u32, ty as u32, detail));
        }
    }
    cells.into_iter().collect()
}

/// Fast planar distance around a fixed origin: coordinates are projected to an
/// integer meter grid and combined with an octagonal approximation
/// (`(123 * major + 51 * minor) >> 7`), which stays within about 4% of the
/// planar distance.
#[derive(Clone, Copy, Debug)]
pub struct ApproxOrigin {
    lat: f64,
    lon: f64,
    lon_coef: f64,
}

impl ApproxOrigin {
    pub fn new(lat: f64, lon: f64) -> Self {
        let lon_coef = METERS_PER_DEGREE * (lat.clamp(MIN_LATITUDE, MAX_LATITUDE) * PI / 180.0).cos();
        Self { lat, lon, lon_coef }
    }

    pub fn distance_m(&self, lat: f64, lon: f64) -> u64 {
        let mut dlon = (lon - self.lon).abs();
        if dlon > 180.0 {
            dlon = 360.0 - dlon;
        }
        let dy = ((lat - self.lat).abs() * METERS_PER_DEGREE).round() as u64;
        let dx = (dlon * self.lon_coef).round() as u64;
        let (major, minor) = if dx >= dy { (dx, dy) } else { (dy, dx) };
        major.saturating_mul(123).saturating_add(minor.saturating_mul(51)) >> 7
    }
}

/// Reference ellipsoids for the precise distance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Ellipsoid {
    #[default]
    Wgs84,
    Grs80,
    Bessel,
}

impl Ellipsoid {
    fn axes(self) -> (f64, f64) {
        match self {
            Ellipsoid::Wgs84 => (6_378_137.0, 1.0 / 298.257_223_563),
            Ellipsoid::Grs80 => (6_378_137.0, 1.0 / 298.257_222_101),
            Ellipsoid::Bessel => (6_377_397.155, 1.0 / 299.152_813),
        }
    }
}

/// Hubeny's ellipsoidal distance in meters.
pub fn precise_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64, ellipsoid: Ellipsoid) -> f64 {
    let (a, f) = ellipsoid.axes();
    let e2 = f * (2.0 - f);
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dy = p1 - p2;
    let mut dx = (lon1 - lon2).to_radians();
    if dx > PI {
        dx -= 2.0 * PI;
    } else if dx < -PI {
        dx += 2.0 * PI;
    }
    let mean = (p1 + p2) / 2.0;
    let w = (1.0 - e2 * mean.sin().powi(2)).sqrt();
    let meridian = a * (1.0 - e2) / w.powi(3);
    let prime_vertical = a / w;
    ((dy * meridian).powi(2) + (dx * prime_vertical * mean.cos()).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::{
        ApproxOrigin, Ellipsoid, MAX_DETAIL, detail_for_radius, end_key, neighborhood,
        precise_distance, quad_key, tile_range, tile_xy,
    };

    const TOKYO: (f64, f64) = (35.681_236, 139.767_125);

    struct XorShift64 {
        state: u64,
    }

    impl XorShift64 {
        fn next_f64(&mut self) -> f64 {
            let mut x = self.state;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.state = x;
            (x >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    #[test]
    fn tile_corners() {
        assert_eq!(tile_xy(85.0, -180.0, 1), (0, 0));
        assert_eq!(tile_xy(-85.0, 179.9, 1), (1, 1));
        assert_eq!(quad_key(45.0, 90.0) >> 46, 0);
        let range = tile_range(1, 1, 1);
        assert_eq!(range.start, 0b11 << 44);
        assert_eq!(range.end, (1u64 << 46) - 1);
    }

    #[test]
    fn points_fall_inside_their_tile_range() {
        let mut rng = XorShift64 { state: 0x9e37_79b9 };
        for _ in 0..500 {
            let lat = rng.next_f64() * 170.0 - 85.0;
            let lon = rng.next_f64() * 360.0 - 180.0;
            let key = quad_key(lat, lon);
            for detail in 0..=MAX_DETAIL {
                let (tx, ty) = tile_xy(lat, lon, detail);
                let range = tile_range(tx, ty, detail);
                assert!(range.contains(key), "lat={lat} lon={lon} detail={detail}");
                assert_eq!(end_key(range.start, detail), range.end);
            }
        }
    }

    #[test]
    fn radius_table_is_monotonic() {
        assert_eq!(detail_for_radius(0.0, 0.0), MAX_DETAIL);
        assert_eq!(detail_for_radius(1.0, TOKYO.0), MAX_DETAIL);
        let mut last = MAX_DETAIL;
        for radius in [10.0, 100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0] {
            let detail = detail_for_radius(radius, TOKYO.0);
            assert!(detail <= last);
            last = detail;
        }
        assert_eq!(detail_for_radius(30_000_000.0, 0.0), 0);
    }

    #[test]
    fn neighborhood_is_nine_tiles_away_from_edges() {
        let ranges = neighborhood(TOKYO.0, TOKYO.1, 15);
        assert_eq!(ranges.len(), 9);
        assert!(ranges.iter().any(|r| r.contains(quad_key(TOKYO.0, TOKYO.1))));
        assert!(ranges.windows(2).all(|w| w[0].end < w[1].start));

        let polar = neighborhood(89.0, 0.0, 3);
        assert_eq!(polar.len(), 6);
        assert_eq!(neighborhood(0.0, 0.0, 0).len(), 1);
    }

    #[test]
    fn neighborhood_wraps_antimeridian() {
        let ranges = neighborhood(0.0, 179.99, 4);
        assert!(ranges.iter().any(|r| r.contains(quad_key(0.0, -179.99))));
    }

    #[test]
    fn approximation_tracks_precise_distance() {
        let origin = ApproxOrigin::new(TOKYO.0, TOKYO.1);
        assert_eq!(origin.distance_m(TOKYO.0, TOKYO.1), 0);
        for (dlat, dlon) in [(0.0005, 0.0), (0.0, 0.0005), (0.0003, 0.0004), (0.01, -0.02)] {
            let (lat, lon) = (TOKYO.0 + dlat, TOKYO.1 + dlon);
            let approx = origin.distance_m(lat, lon) as f64;
            let precise = precise_distance(TOKYO.0, TOKYO.1, lat, lon, Ellipsoid::Wgs84);
            assert!((approx - precise).abs() <= precise * 0.05 + 1.0, "{approx} vs {precise}");
        }
    }

    #[test]
    fn approximation_saturates_on_junk_coordinates() {
        let origin = ApproxOrigin::new(0.0, 0.0);
        assert_eq!(origin.distance_m(1e20, 0.0), u64::MAX >> 7);
        assert!(origin.distance_m(-1e20, 1e20) > 0);
    }

    #[test]
    fn ellipsoids_agree_roughly() {
        let osaka = (34.702_485, 135.495_951);
        let wgs = precise_distance(TOKYO.0, TOKYO.1, osaka.0, osaka.1, Ellipsoid::Wgs84);
        let grs = precise_distance(TOKYO.0, TOKYO.1, osaka.0, osaka.1, Ellipsoid::Grs80);
        let bessel = precise_distance(TOKYO.0, TOKYO.1, osaka.0, osaka.1, Ellipsoid::Bessel);
        assert!((wgs - 403_000.0).abs() < 5_000.0, "{wgs}");
        assert!((wgs - grs).abs() < 0.01);
        assert!((wgs - bessel).abs() < 500.0);
    }
}
