use futures::{stream, Stream};
use std::{iter::Peekable, sync::Arc, time::Duration, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounding_box::{BoundingBox, TileRange};
use crate::cache::TileCache;
use crate::error::{Error, Result, ValidationError};
use crate::error_log::ErrorLog;
use crate::progress::{FetchEvent, FetchProgress};
use crate::source::TileSource;
use crate::tile::Tile;
use crate::url::UrlFormat;
use crate::zoom::{zoom_level_for, ZoomTier, INVALID_ZOOM};

/// Pause between two tile requests unless running in fast mode.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// What to do when a tile can't be fetched or written.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorPolicy {
    /// End the run with the error.
    #[default]
    Abort,
    /// Count the tile as failed and move on to the next one.
    Continue,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FetchOptions {
    /// Pause between tiles. Zero disables throttling.
    pub delay: Duration,
    pub on_error: ErrorPolicy,
    /// Include throughput and byte counts in progress events.
    pub telemetry: bool,
}

impl FetchOptions {
    /// Disables the pause between tiles.
    #[must_use]
    pub fn fast(self) -> Self {
        Self {
            delay: Duration::ZERO,
            ..self
        }
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            on_error: ErrorPolicy::Abort,
            telemetry: false,
        }
    }
}

/// The validated set of tiles a run will fetch, in fetch order.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchPlan {
    ranges: Vec<TileRange>,
    total: u64,
}

impl FetchPlan {
    /// Computes the tile range of every tier, failing if any of them is empty.
    pub fn new(bounding_box: &BoundingBox, tiers: &[ZoomTier]) -> Result<Self, ValidationError> {
        if tiers.is_empty() {
            return Err(ValidationError::NoTiers);
        }

        let ranges = tiers
            .iter()
            .map(|&tier| bounding_box.tile_range(tier))
            .collect::<Result<Vec<_>, _>>()?;
        let total = ranges.iter().map(TileRange::count).sum();

        Ok(Self { ranges, total })
    }

    /// Like [`FetchPlan::new`], for tier names that haven't been parsed yet.
    pub fn from_names<S: AsRef<str>>(
        bounding_box: &BoundingBox,
        names: &[S],
    ) -> Result<Self, ValidationError> {
        let tiers = names
            .iter()
            .map(|name| match zoom_level_for(name.as_ref()) {
                INVALID_ZOOM => Err(ValidationError::InvalidTier(name.as_ref().to_owned())),
                _ => name.as_ref().parse(),
            })
            .collect::<Result<Vec<ZoomTier>, _>>()?;

        Self::new(bounding_box, &tiers)
    }

    pub fn total_tiles(&self) -> u64 {
        self.total
    }

    pub fn ranges(&self) -> &[TileRange] {
        &self.ranges
    }

    /// Tiers in the requested order, then x ascending, then y ascending.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        self.ranges.iter().flat_map(TileRange::tiles)
    }

    fn into_tiles(self) -> impl Iterator<Item = Tile> + Send {
        self.ranges.into_iter().flat_map(|range| range.tiles())
    }
}

/// Downloads tiles one at a time into a [`TileCache`].
pub struct Fetcher {
    source: Arc<dyn TileSource>,
    url: Arc<UrlFormat>,
    cache: TileCache,
    options: FetchOptions,
    error_log: Option<ErrorLog>,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(source: Arc<dyn TileSource>, url: Arc<UrlFormat>, cache: TileCache) -> Self {
        Self {
            source,
            url,
            cache,
            options: FetchOptions::default(),
            error_log: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_error_log(mut self, error_log: ErrorLog) -> Self {
        self.error_log = Some(error_log);
        self
    }

    /// Stops the run at the next tile boundary once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Fetches every tile of `plan` and yields an event after each one.
    ///
    /// The stream ends with [`FetchEvent::Finished`], or with an error if a
    /// tile fails under [`ErrorPolicy::Abort`]. Nothing happens until it is
    /// polled.
    pub fn run(self, plan: FetchPlan) -> impl Stream<Item = Result<FetchEvent>> + Send {
        let state = Run {
            progress: FetchProgress::start(plan.total_tiles()),
            tiles: (Box::new(plan.into_tiles()) as Box<dyn Iterator<Item = Tile> + Send>)
                .peekable(),
            fetcher: self,
            started: false,
            done: false,
        };

        stream::unfold(state, |mut state| async move {
            let item = state.step().await?;
            Some((item, state))
        })
    }

    /// Downloads `tile` into the cache and returns the number of bytes written.
    async fn fetch_tile(&self, tile: &Tile) -> Result<u64> {
        let path = self.cache.prepare(tile).await?;
        let url = self.url.tile_url(tile);
        debug!(%tile, %url, "fetching tile");

        let bytes = self
            .source
            .get(&url)
            .await
            .map_err(|source| Error::Fetch {
                tile: *tile,
                source,
            })?;
        self.cache.write_at(tile, &path, &bytes).await?;

        Ok(bytes.len() as u64)
    }

    async fn report(&self, tile: &Tile, err: &Error) {
        error!(%tile, "{}", err);

        if let Some(log) = &self.error_log {
            if let Err(e) = log.append(tile, err).await {
                warn!(path = %log.path().display(), "failed writing error log: {}", e);
            }
        }
    }

    async fn throttle(&self) {
        if self.options.delay.is_zero() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.options.delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

/// Validates the request and returns the event stream of a run.
///
/// Fails before any network or filesystem activity if the tiers or the
/// bounding box are invalid.
pub fn run(
    bounding_box: &BoundingBox,
    tiers: &[ZoomTier],
    fetcher: Fetcher,
) -> Result<impl Stream<Item = Result<FetchEvent>> + Send, ValidationError> {
    let plan = FetchPlan::new(bounding_box, tiers)?;
    Ok(fetcher.run(plan))
}

struct Run {
    fetcher: Fetcher,
    tiles: Peekable<Box<dyn Iterator<Item = Tile> + Send>>,
    progress: FetchProgress,
    started: bool,
    done: bool,
}

impl Run {
    async fn step(&mut self) -> Option<Result<FetchEvent>> {
        if self.done {
            return None;
        }

        if !self.started {
            self.started = true;
            self.progress = FetchProgress::start(self.progress.total());
            info!(
                tiles = self.progress.total(),
                root = %self.fetcher.cache.root().display(),
                "starting tile fetch"
            );
        }

        if self.progress.processed() > 0 && self.tiles.peek().is_some() {
            self.fetcher.throttle().await;
        }

        // a run whose last tile is done has completed, even if cancelled meanwhile
        if self.tiles.peek().is_none() {
            info!(
                processed = self.progress.processed(),
                failed = self.progress.failed(),
                "tile fetch complete"
            );
            return Some(Ok(self.finish(false)));
        }

        if self.fetcher.cancel.is_cancelled() {
            info!(
                processed = self.progress.processed(),
                total = self.progress.total(),
                "tile fetch cancelled"
            );
            return Some(Ok(self.finish(true)));
        }

        let tile = self.tiles.next()?;
        let started = Instant::now();
        match self.fetcher.fetch_tile(&tile).await {
            Ok(bytes) => self.progress = self.progress.record_success(bytes),
            Err(err) => {
                self.fetcher.report(&tile, &err).await;

                if self.fetcher.options.on_error == ErrorPolicy::Abort {
                    self.done = true;
                    return Some(Err(err));
                }
                self.progress = self.progress.record_failure();
            }
        }

        Some(Ok(FetchEvent::Progress(self.progress.event(
            tile,
            started.elapsed(),
            self.fetcher.options.telemetry,
        ))))
    }

    fn finish(&mut self, cancelled: bool) -> FetchEvent {
        self.done = true;
        FetchEvent::Finished(self.progress.summary(cancelled))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::SourceError;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    /// Serves the requested URL as the tile body and records every request.
    #[derive(Default)]
    pub(crate) struct EchoSource {
        pub requests: Mutex<Vec<String>>,
        /// Requests whose URL contains this string fail with HTTP 404.
        pub fail_on: Option<String>,
        /// Cancelled once this many requests were served.
        pub cancel_after: Option<(usize, CancellationToken)>,
    }

    #[async_trait]
    impl TileSource for EchoSource {
        async fn get(&self, url: &str) -> Result<Vec<u8>, SourceError> {
            let served = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(url.to_owned());
                requests.len()
            };

            if let Some((n, token)) = &self.cancel_after {
                if served >= *n {
                    token.cancel();
                }
            }

            match &self.fail_on {
                Some(needle) if url.contains(needle.as_str()) => Err(SourceError::Status {
                    status: 404,
                    url: url.to_owned(),
                }),
                _ => Ok(url.as_bytes().to_vec()),
            }
        }
    }

    const TEMPLATE: &str = "http://tiles.test/{z}/{x}/{y}@2x.png";

    fn fetcher(source: Arc<EchoSource>, root: &std::path::Path) -> Fetcher {
        Fetcher::new(
            source,
            Arc::new(UrlFormat::parse(TEMPLATE).unwrap()),
            TileCache::new(root),
        )
        .with_options(FetchOptions::default().fast())
    }

    fn small_box() -> BoundingBox {
        BoundingBox::new_deg(54.1, -2.1, 53.9, -1.9).unwrap()
    }

    async fn collect(stream: impl Stream<Item = Result<FetchEvent>>) -> Vec<Result<FetchEvent>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn fetches_every_tile_in_order() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(EchoSource::default());

        let stream = run(
            &small_box(),
            &[ZoomTier::Region, ZoomTier::Country],
            fetcher(source.clone(), root.path()),
        )
        .unwrap();
        let events = collect(stream).await;

        let requests = source.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![
                "http://tiles.test/10/506/328@2x.png",
                "http://tiles.test/10/506/329@2x.png",
                "http://tiles.test/8/126/82@2x.png",
            ]
        );

        let written = std::fs::read(root.path().join("region").join("region_506_329.png")).unwrap();
        assert_eq!(written, b"http://tiles.test/10/506/329@2x.png");
        assert!(root.path().join("country").join("country_126_82.png").is_file());

        assert_eq!(events.len(), 4);
        let mut last = 0;
        for event in &events[..3] {
            match event {
                Ok(FetchEvent::Progress(p)) => {
                    assert!(p.processed > last && p.processed <= p.total);
                    assert_eq!(p.total, 3);
                    last = p.processed;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        match &events[3] {
            Ok(FetchEvent::Finished(summary)) => {
                assert_eq!(summary.processed_tiles, 3);
                assert_eq!(summary.total_tiles, 3);
                assert!(summary.is_complete());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn rerun_overwrites_with_identical_content() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("region").join("region_506_328.png");

        for _ in 0..2 {
            let source = Arc::new(EchoSource::default());
            let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region]).unwrap();
            let events = collect(fetcher(source, root.path()).run(plan)).await;

            assert!(events.iter().all(Result::is_ok));
            assert_eq!(std::fs::read(&path).unwrap(), b"http://tiles.test/10/506/328@2x.png");
        }
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_network() {
        let bbox = small_box();

        assert_eq!(
            FetchPlan::from_names(&bbox, &["region", "planet"]),
            Err(ValidationError::InvalidTier("planet".into()))
        );
        assert_eq!(
            FetchPlan::new(&bbox, &[]),
            Err(ValidationError::NoTiers)
        );

        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(EchoSource::default());
        let reversed = BoundingBox::new_deg(53.9, -2.1, 54.1, -1.9).unwrap();
        let result = run(&reversed, &[ZoomTier::Region], fetcher(source.clone(), root.path()));

        assert!(matches!(result, Err(ValidationError::EmptyRange { axis: 'y', .. })));
        assert!(source.requests.lock().unwrap().is_empty());
        assert!(!root.path().join("region").exists());
    }

    #[tokio::test]
    async fn aborts_on_first_failure_by_default() {
        let root = tempfile::tempdir().unwrap();
        let log = root.path().join("crash.log");
        let source = Arc::new(EchoSource {
            fail_on: Some("/10/506/328".into()),
            ..EchoSource::default()
        });

        let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region]).unwrap();
        let events = collect(
            fetcher(source.clone(), root.path())
                .with_error_log(ErrorLog::new(&log))
                .run(plan),
        )
        .await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            Err(err @ Error::Fetch { .. }) => {
                assert_eq!(err.tile(), Some(&Tile::new(ZoomTier::Region, 506, 328)));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(source.requests.lock().unwrap().len(), 1);

        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.starts_with("Failed to fetch region tile at 506, 328: "));
        assert!(logged.contains("HTTP 404"));
    }

    #[tokio::test]
    async fn continue_policy_skips_failed_tiles() {
        let root = tempfile::tempdir().unwrap();
        let log = root.path().join("crash.log");
        let source = Arc::new(EchoSource {
            fail_on: Some("/10/506/328".into()),
            ..EchoSource::default()
        });
        let options = FetchOptions {
            on_error: ErrorPolicy::Continue,
            ..FetchOptions::default().fast()
        };

        let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region]).unwrap();
        let events = collect(
            fetcher(source, root.path())
                .with_options(options)
                .with_error_log(ErrorLog::new(&log))
                .run(plan),
        )
        .await;

        assert_eq!(events.len(), 3);
        match events.last() {
            Some(Ok(FetchEvent::Finished(summary))) => {
                assert_eq!(summary.processed_tiles, 2);
                assert_eq!(summary.failed_tiles, 1);
                assert!(!summary.is_complete());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!root.path().join("region").join("region_506_328.png").exists());
        assert!(root.path().join("region").join("region_506_329.png").exists());

        let logged = std::fs::read_to_string(&log).unwrap();
        assert_eq!(logged.lines().count(), 1);
        assert!(logged.starts_with("Failed to fetch region tile at 506, 328: "));
    }

    #[tokio::test]
    async fn cancellation_stops_between_tiles() {
        let root = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let source = Arc::new(EchoSource {
            cancel_after: Some((1, token.clone())),
            ..EchoSource::default()
        });

        // the delay would stall the test if cancellation didn't cut it short
        let options = FetchOptions {
            delay: Duration::from_secs(3600),
            ..FetchOptions::default()
        };
        let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region]).unwrap();
        let events = collect(
            fetcher(source.clone(), root.path())
                .with_options(options)
                .with_cancellation(token)
                .run(plan),
        )
        .await;

        assert_eq!(source.requests.lock().unwrap().len(), 1);
        assert!(root.path().join("region").join("region_506_328.png").is_file());
        assert!(!root.path().join("region").join("region_506_329.png").exists());

        match events.as_slice() {
            [Ok(FetchEvent::Progress(p)), Ok(FetchEvent::Finished(summary))] => {
                assert_eq!(p.processed, 1);
                assert!(summary.cancelled);
                assert_eq!(summary.processed_tiles, 1);
                assert_eq!(summary.total_tiles, 2);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_fetches_nothing() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(EchoSource::default());
        let token = CancellationToken::new();
        token.cancel();

        let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region]).unwrap();
        let events = collect(
            fetcher(source.clone(), root.path())
                .with_cancellation(token)
                .run(plan),
        )
        .await;

        assert!(source.requests.lock().unwrap().is_empty());
        assert!(matches!(
            events.as_slice(),
            [Ok(FetchEvent::Finished(summary))] if summary.cancelled && summary.processed_tiles == 0
        ));
    }

    #[tokio::test]
    async fn cancel_during_last_tile_still_completes() {
        let root = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let source = Arc::new(EchoSource {
            cancel_after: Some((2, token.clone())),
            ..EchoSource::default()
        });

        let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region]).unwrap();
        let events = collect(
            fetcher(source.clone(), root.path())
                .with_cancellation(token.clone())
                .run(plan),
        )
        .await;

        assert!(token.is_cancelled());
        assert_eq!(source.requests.lock().unwrap().len(), 2);
        match events.last() {
            Some(Ok(FetchEvent::Finished(summary))) => {
                assert!(!summary.cancelled);
                assert_eq!(summary.processed_tiles, 2);
                assert!(summary.is_complete());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_tiles_only() {
        let root = tempfile::tempdir().unwrap();
        let delay = Duration::from_secs(5);

        // two region tiles, then the same two plus one country tile
        let runs = [
            (vec![ZoomTier::Region], 1),
            (vec![ZoomTier::Region, ZoomTier::Country], 2),
        ];
        for (tiers, pauses) in runs {
            let plan = FetchPlan::new(&small_box(), &tiers).unwrap();
            let options = FetchOptions {
                delay,
                ..FetchOptions::default()
            };

            let started = tokio::time::Instant::now();
            let events = collect(
                fetcher(Arc::new(EchoSource::default()), root.path())
                    .with_options(options)
                    .run(plan),
            )
            .await;

            assert!(events.iter().all(Result::is_ok));
            assert_eq!(started.elapsed(), delay * pauses);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fast_mode_never_waits() {
        let root = tempfile::tempdir().unwrap();
        let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region, ZoomTier::Country]).unwrap();

        let started = tokio::time::Instant::now();
        let events = collect(fetcher(Arc::new(EchoSource::default()), root.path()).run(plan)).await;

        assert_eq!(events.len(), 4);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn stream_is_lazy() {
        let root = tempfile::tempdir().unwrap();
        let source = Arc::new(EchoSource::default());

        let plan = FetchPlan::new(&small_box(), &[ZoomTier::Region]).unwrap();
        let stream = fetcher(source.clone(), root.path()).run(plan);

        assert!(source.requests.lock().unwrap().is_empty());
        assert!(!root.path().join("region").exists());

        let events = collect(stream).await;
        assert_eq!(events.len(), 3);
        assert_eq!(source.requests.lock().unwrap().len(), 2);
    }
}
