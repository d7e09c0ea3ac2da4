use serde::Serialize;
use std::{f64::consts::PI, fmt};

use crate::bounding_box::GeoPoint;
use crate::zoom::ZoomTier;

/// A slippy-map tile within one zoom tier.
/// ref: https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct Tile {
    pub tier: ZoomTier,
    pub x: u32,
    pub y: u32,
}

impl Tile {
    pub fn new(tier: ZoomTier, x: u32, y: u32) -> Self {
        Self { tier, x, y }
    }

    /// The tile containing `point` at the zoom level of `tier`.
    pub fn from_point(point: GeoPoint, tier: ZoomTier) -> Self {
        let (x, y) = tile_coordinate(point.lat(), point.lon(), tier.zoom_level());
        Self::new(tier, x, y)
    }

    pub fn z(&self) -> u8 {
        self.tier.zoom_level()
    }

    /// Latitude and longitude of the tile's north-west corner.
    pub fn north_west(&self) -> (f64, f64) {
        lat_lon_from_tile(self.x, self.y, self.z())
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tile {}, {} (z{})", self.tier, self.x, self.y, self.z())
    }
}

/// Converts degrees to tile indices at `zoom` using the Web-Mercator tile formula.
///
/// Indices are floored and clamped into `0..2^zoom`, so longitude 180° and
/// latitudes past the Mercator cut-off land on the edge tiles. Latitude ±90°
/// has no defined result and must be rejected beforehand (see [`GeoPoint::new`]).
pub fn tile_coordinate(lat_deg: f64, lon_deg: f64, zoom: u8) -> (u32, u32) {
    // scale factor
    let n = 2_f64.powi(zoom as i32);
    let lat_rad = lat_deg * PI / 180_f64;

    let x = (lon_deg + 180_f64) / 360_f64 * n;
    let y = (1_f64 - (lat_rad.tan() + 1_f64 / lat_rad.cos()).ln() / PI) / 2_f64 * n;

    (clamp_index(x, n), clamp_index(y, n))
}

fn clamp_index(v: f64, n: f64) -> u32 {
    v.floor().max(0_f64).min(n - 1_f64) as u32
}

/// Inverse of [`tile_coordinate`]: the north-west corner of tile `x`, `y`.
///
/// Approximate, since the forward conversion floors.
pub fn lat_lon_from_tile(x: u32, y: u32, zoom: u8) -> (f64, f64) {
    let n = 2_f64.powi(zoom as i32);

    let lon = x as f64 / n * 360_f64 - 180_f64;
    let lat_rad = (PI * (1_f64 - 2_f64 * y as f64 / n)).sinh().atan();

    (lat_rad.to_degrees(), lon)
}
