use serde::Serialize;
use std::ops::RangeInclusive;

use crate::error::ValidationError;
use crate::tile::Tile;
use crate::zoom::ZoomTier;

/// A latitude/longitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

impl GeoPoint {
    /// Validates and creates a point.
    ///
    /// Latitude must lie strictly between -90° and 90° (the tile formula is
    /// singular at the poles), longitude within [-180°, 180°].
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        if !(lat > -90_f64 && lat < 90_f64) {
            return Err(ValidationError::InvalidLatitude(lat));
        }
        if !(-180_f64..=180_f64).contains(&lon) {
            return Err(ValidationError::InvalidLongitude(lon));
        }

        Ok(Self { lat, lon })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }
}

/// A rectangular region given by its top-left and bottom-right corners.
///
/// # Example
/// ```rust
/// # use atlas_tile_cache::{BoundingBox, ZoomTier};
/// let bbox = BoundingBox::new_deg(54.1, -2.1, 53.9, -1.9).unwrap();
/// assert_eq!(bbox.tile_range(ZoomTier::Region).unwrap().count(), 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub top_left: GeoPoint,
    pub bottom_right: GeoPoint,
}

impl BoundingBox {
    pub fn new(top_left: GeoPoint, bottom_right: GeoPoint) -> Self {
        Self {
            top_left,
            bottom_right,
        }
    }

    /// Creates a bounding box from two corners given in degrees.
    pub fn new_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Result<Self, ValidationError> {
        Ok(Self::new(GeoPoint::new(lat1, lon1)?, GeoPoint::new(lat2, lon2)?))
    }

    /// The tiles covered by this box at `tier`.
    ///
    /// Fails if the corners produce an inverted range on either axis.
    pub fn tile_range(&self, tier: ZoomTier) -> Result<TileRange, ValidationError> {
        let start = Tile::from_point(self.top_left, tier);
        let end = Tile::from_point(self.bottom_right, tier);

        for (axis, start, end) in [('x', start.x, end.x), ('y', start.y, end.y)] {
            if start > end {
                return Err(ValidationError::EmptyRange {
                    tier: tier.name(),
                    axis,
                    start,
                    end,
                });
            }
        }

        Ok(TileRange {
            tier,
            x: start.x..=end.x,
            y: start.y..=end.y,
        })
    }
}

/// The inclusive tile-index box of one tier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TileRange {
    pub tier: ZoomTier,
    pub x: RangeInclusive<u32>,
    pub y: RangeInclusive<u32>,
}

impl TileRange {
    pub fn count(&self) -> u64 {
        let width = (*self.x.end() - *self.x.start()) as u64 + 1;
        let height = (*self.y.end() - *self.y.start()) as u64 + 1;
        width * height
    }

    /// Iterates the tiles x ascending, then y ascending.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> {
        let tier = self.tier;
        let ys = self.y.clone();

        self.x
            .clone()
            .flat_map(move |x| ys.clone().map(move |y| Tile::new(tier, x, y)))
    }
}
