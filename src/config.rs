use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::bounding_box::BoundingBox;
use crate::cache::{default_cache_root, TileCache};
use crate::error::{Error, ValidationError};
use crate::error_log::{ErrorLog, DEFAULT_ERROR_LOG};
use crate::fetch::{FetchOptions, FetchPlan, Fetcher};
use crate::source::HttpSource;
use crate::url::UrlFormat;
use crate::zoom::ZoomTier;

/// Timeout for fetching a single tile unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tile fetching configuration.
#[derive(Debug, PartialEq)]
pub struct Config {
    /// Top-left and bottom-right corners of the area to cache.
    pub bounding_box: BoundingBox,

    /// Tiers to fetch, in fetch order.
    pub tiers: Vec<ZoomTier>,

    /// The folder tiles are cached in, one subfolder per tier.
    pub cache_root: PathBuf,

    /// The URL to download individual tiles from including the replacement
    /// specifiers `{x}`, `{y}` and `{z}`.
    pub url: UrlFormat,

    /// Timeout for fetching a single tile.
    ///
    /// Pass the zero duration to disable the timeout.
    pub timeout: Duration,

    /// Delay, error policy and telemetry of the run.
    pub options: FetchOptions,

    /// File failed tiles are appended to. `None` disables the log.
    pub error_log: Option<PathBuf>,
}

impl Config {
    /// A configuration using the default tile server, cache root, timeout and options.
    pub fn new(bounding_box: BoundingBox, tiers: Vec<ZoomTier>) -> Self {
        Self {
            bounding_box,
            tiers,
            cache_root: default_cache_root(),
            url: UrlFormat::default(),
            timeout: DEFAULT_TIMEOUT,
            options: FetchOptions::default(),
            error_log: Some(PathBuf::from(DEFAULT_ERROR_LOG)),
        }
    }

    /// Validates the bounding box against the configured tiers.
    pub fn plan(&self) -> Result<FetchPlan, ValidationError> {
        FetchPlan::new(&self.bounding_box, &self.tiers)
    }

    /// Builds an HTTP-backed fetcher from this configuration.
    pub fn fetcher(self, cancel: CancellationToken) -> Result<Fetcher, Error> {
        let source = HttpSource::new(self.timeout).map_err(Error::Client)?;

        let mut fetcher = Fetcher::new(
            Arc::new(source),
            Arc::new(self.url),
            TileCache::new(self.cache_root),
        )
        .with_options(self.options)
        .with_cancellation(cancel);

        if let Some(path) = self.error_log {
            fetcher = fetcher.with_error_log(ErrorLog::new(path));
        }

        Ok(fetcher)
    }
}
