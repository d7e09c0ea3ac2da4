//! Cache raster map tiles on disk, one directory per zoom tier, and serve
//! them back for offline preview.
//!
//! **Be polite to the tile server.** Tiles are fetched one at a time with a
//! pause in between unless fast mode is requested; bulk downloads can hog
//! down a tile server easily.
//!
//! Tiles are stored as `<cache root>/<tier>/<tier>_<x>_<y>.png`, where the
//! tier is one of `country` (zoom 8), `region` (zoom 10) or `station`
//! (zoom 12).
//!
//! # CLI Example
//!
//! ```bash
//! atlas-tiles generate \
//!   --zoom region,station \
//!   --lat1 54.1 --long1 -2.1 \
//!   --lat2 53.9 --long2 -1.9 \
//!   --fast
//! atlas-tiles server --port 3000
//! ```
//!
//! # Library Example
//! ```rust,no_run
//! use atlas_tile_cache::{BoundingBox, Config, FetchEvent, ZoomTier};
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), atlas_tile_cache::Error> {
//! let bbox = BoundingBox::new_deg(54.1, -2.1, 53.9, -1.9)?;
//! let config = Config::new(bbox, vec![ZoomTier::Region]);
//!
//! let plan = config.plan()?;
//! let mut events = Box::pin(config.fetcher(CancellationToken::new())?.run(plan));
//! while let Some(event) = events.next().await {
//!     if let FetchEvent::Finished(summary) = event? {
//!         println!("cached {} tiles", summary.processed_tiles);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod bounding_box;
mod cache;
mod config;
mod error;
mod error_log;
mod fetch;
mod port;
mod progress;
pub mod server;
mod source;
mod tile;
mod url;
mod zoom;

pub use bounding_box::{BoundingBox, GeoPoint, TileRange};
pub use cache::{default_cache_root, ensure_directory, resolve_path, TileCache};
pub use config::{Config, DEFAULT_TIMEOUT};
pub use error::{Error, Result, SourceError, ValidationError};
pub use error_log::{ErrorLog, DEFAULT_ERROR_LOG};
pub use fetch::{run, ErrorPolicy, FetchOptions, FetchPlan, Fetcher, DEFAULT_DELAY};
pub use port::{bind_available, find_available_port, find_available_port_on, DEFAULT_PORT};
pub use progress::{Eta, FetchEvent, FetchProgress, ProgressEvent, Summary};
pub use source::{HttpSource, TileSource};
pub use tile::{lat_lon_from_tile, tile_coordinate, Tile};
pub use url::{UrlFormat, DEFAULT_TILE_URL};
pub use zoom::{zoom_level_for, ZoomTier, INVALID_ZOOM};
