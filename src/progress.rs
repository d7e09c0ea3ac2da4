use serde::Serialize;
use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::tile::Tile;

/// Counters of a single pipeline run.
///
/// Updated by value after every tile, so each emitted event carries a
/// consistent snapshot.
#[derive(Clone, Copy, Debug)]
pub struct FetchProgress {
    total: u64,
    processed: u64,
    failed: u64,
    bytes: u64,
    started: Instant,
}

impl FetchProgress {
    pub fn start(total: u64) -> Self {
        Self {
            total,
            processed: 0,
            failed: 0,
            bytes: 0,
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Tiles handled so far, including failed ones.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn record_success(self, bytes: u64) -> Self {
        Self {
            processed: self.processed + 1,
            bytes: self.bytes + bytes,
            ..self
        }
    }

    #[must_use]
    pub fn record_failure(self) -> Self {
        Self {
            processed: self.processed + 1,
            failed: self.failed + 1,
            ..self
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100_f64;
        }
        self.processed as f64 / self.total as f64 * 100_f64
    }

    pub fn event(&self, tile: Tile, tile_time: Duration, telemetry: bool) -> ProgressEvent {
        let elapsed = self.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        let (tiles_per_sec, bytes) = if telemetry {
            let rate = if elapsed_secs > 0_f64 {
                self.processed as f64 / elapsed_secs
            } else {
                0_f64
            };
            (Some(rate), Some(self.bytes))
        } else {
            (None, None)
        };

        ProgressEvent {
            tile,
            processed: self.processed,
            total: self.total,
            failed: self.failed,
            percent: self.percent(),
            tile_secs: tile_time.as_secs_f64(),
            eta: Eta::estimate(elapsed, self.processed, self.total),
            tiles_per_sec,
            bytes,
        }
    }

    pub fn summary(&self, cancelled: bool) -> Summary {
        let elapsed_secs = self.elapsed().as_secs_f64();
        let avg_secs_per_tile = if self.processed > 0 {
            elapsed_secs / self.processed as f64
        } else {
            0_f64
        };

        Summary {
            total_tiles: self.total,
            processed_tiles: self.processed,
            failed_tiles: self.failed,
            elapsed_secs,
            avg_secs_per_tile,
            cancelled,
        }
    }
}

/// Remaining time, rounded down to a whole number of the largest fitting unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "unit", content = "value", rename_all = "snake_case")]
pub enum Eta {
    Seconds(u64),
    Minutes(u64),
    Hours(u64),
}

impl Eta {
    /// Extrapolates the average time per tile over the remaining tiles.
    pub fn estimate(elapsed: Duration, processed: u64, total: u64) -> Option<Self> {
        if processed == 0 {
            return None;
        }

        let remaining = total.saturating_sub(processed) as f64;
        Some(Self::from_secs(elapsed.as_secs_f64() / processed as f64 * remaining))
    }

    pub fn from_secs(secs: f64) -> Self {
        let secs = secs.max(0_f64);

        if secs < 60_f64 {
            Eta::Seconds(secs as u64)
        } else if secs < 3600_f64 {
            Eta::Minutes((secs / 60_f64) as u64)
        } else {
            Eta::Hours((secs / 3600_f64) as u64)
        }
    }
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (value, unit) = match *self {
            Eta::Seconds(v) => (v, "second"),
            Eta::Minutes(v) => (v, "minute"),
            Eta::Hours(v) => (v, "hour"),
        };
        let plural = if value == 1 { "" } else { "s" };

        write!(f, "{} {}{}", value, unit, plural)
    }
}

/// Emitted after every tile.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub tile: Tile,
    pub processed: u64,
    pub total: u64,
    pub failed: u64,
    pub percent: f64,
    /// Time spent fetching and writing `tile`.
    pub tile_secs: f64,
    pub eta: Option<Eta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiles_per_sec: Option<f64>,
    /// Cumulative bytes written so far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

/// Emitted once when a run ends without aborting.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub total_tiles: u64,
    pub processed_tiles: u64,
    pub failed_tiles: u64,
    pub elapsed_secs: f64,
    pub avg_secs_per_tile: f64,
    /// Whether the run stopped early because it was cancelled.
    pub cancelled: bool,
}

impl Summary {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed_tiles == 0 && self.processed_tiles == self.total_tiles
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FetchEvent {
    Progress(ProgressEvent),
    Finished(Summary),
}
