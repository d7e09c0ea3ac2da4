use serde::{Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::error::ValidationError;

/// Zoom level returned by [`zoom_level_for`] for names it doesn't know.
pub const INVALID_ZOOM: u8 = 0;

/// A named detail level. Each tier is cached in its own subdirectory.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ZoomTier {
    Country,
    Region,
    Station,
}

impl ZoomTier {
    pub const ALL: [ZoomTier; 3] = [ZoomTier::Country, ZoomTier::Region, ZoomTier::Station];

    pub fn name(self) -> &'static str {
        match self {
            ZoomTier::Country => "country",
            ZoomTier::Region => "region",
            ZoomTier::Station => "station",
        }
    }

    /// The slippy-map zoom level tiles of this tier are fetched at.
    pub fn zoom_level(self) -> u8 {
        match self {
            ZoomTier::Country => 8,
            ZoomTier::Region => 10,
            ZoomTier::Station => 12,
        }
    }

    /// Parses every name, failing on the first unknown one.
    pub fn parse_all<I, S>(names: I) -> Result<Vec<Self>, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().map(|n| n.as_ref().parse()).collect()
    }
}

/// Maps a tier name to its zoom level, or [`INVALID_ZOOM`] if the name is unknown.
///
/// Callers must check for [`INVALID_ZOOM`] before using the result.
pub fn zoom_level_for(name: &str) -> u8 {
    name.parse::<ZoomTier>()
        .map(ZoomTier::zoom_level)
        .unwrap_or(INVALID_ZOOM)
}

impl FromStr for ZoomTier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "country" => Ok(ZoomTier::Country),
            "region" => Ok(ZoomTier::Region),
            "station" => Ok(ZoomTier::Station),
            other => Err(ValidationError::InvalidTier(other.to_owned())),
        }
    }
}

impl fmt::Display for ZoomTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ZoomTier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
