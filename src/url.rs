use maplit::hashmap;
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use strfmt::strfmt;

use crate::error::ValidationError;
use crate::tile::Tile;
use crate::zoom::ZoomTier;

/// The upstream raster tile server used unless configured otherwise.
pub const DEFAULT_TILE_URL: &str =
    "https://a.basemaps.cartocdn.com/rastertiles/voyager/{z}/{x}/{y}@2x.png";

const SUBDOMAINS: &[&str] = &["a", "b", "c"];

/// A tile URL template with the replacement specifiers `{z}`, `{x}` and `{y}`.
///
/// `{s}` is also accepted and cycles through the subdomains `a`, `b` and `c`.
pub struct UrlFormat {
    inc: AtomicUsize,
    format_str: String,
}

impl UrlFormat {
    /// Parses a template, rejecting unknown or malformed specifiers.
    pub fn parse(format_str: impl Into<String>) -> Result<Self, ValidationError> {
        let fmt = Self {
            inc: AtomicUsize::new(0),
            format_str: format_str.into(),
        };

        fmt.format(&Tile::new(ZoomTier::Country, 0, 0), SUBDOMAINS[0])
            .map_err(|reason| ValidationError::InvalidUrlTemplate {
                template: fmt.format_str.clone(),
                reason,
            })?;

        Ok(fmt)
    }

    pub fn as_str(&self) -> &str {
        &self.format_str
    }

    /// The upstream URL of `tile`.
    pub fn tile_url(&self, tile: &Tile) -> String {
        let inc = self.inc.fetch_add(1, Ordering::Relaxed);

        // parse() already proved the template formats
        self.format(tile, SUBDOMAINS[inc % SUBDOMAINS.len()])
            .unwrap_or_else(|_| self.format_str.clone())
    }

    fn format(&self, tile: &Tile, subdomain: &str) -> Result<String, String> {
        let vars = hashmap! {
            "s".to_owned() => subdomain.to_owned(),
            "x".to_owned() => tile.x.to_string(),
            "y".to_owned() => tile.y.to_string(),
            "z".to_owned() => tile.z().to_string(),
        };

        strfmt(&self.format_str, &vars).map_err(|e| e.to_string())
    }
}

impl Default for UrlFormat {
    fn default() -> Self {
        Self {
            inc: AtomicUsize::new(0),
            format_str: DEFAULT_TILE_URL.to_owned(),
        }
    }
}

impl PartialEq for UrlFormat {
    fn eq(&self, other: &Self) -> bool {
        self.format_str == other.format_str
    }
}

impl fmt::Debug for UrlFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlFormat")
            .field("format_str", &self.format_str)
            .finish()
    }
}
