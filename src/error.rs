use std::{io, path::PathBuf};

use crate::tile::Tile;

/// Input that was rejected before any network or filesystem activity.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid zoom tier `{0}`: must be country, region, or station")]
    InvalidTier(String),

    #[error("no zoom tier requested")]
    NoTiers,

    #[error("invalid latitude {0}: must be between -90 and 90 (exclusive)")]
    InvalidLatitude(f64),

    #[error("invalid longitude {0}: must be between -180 and 180")]
    InvalidLongitude(f64),

    #[error(
        "empty tile range for tier {tier} on the {axis} axis ({start} > {end}), \
         check the order of the bounding box corners"
    )]
    EmptyRange {
        tier: &'static str,
        axis: char,
        start: u32,
        end: u32,
    },

    #[error("invalid tile URL template `{template}`: {reason}")]
    InvalidUrlTemplate { template: String, reason: String },
}

/// Failure of a single upstream request.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed fetching {tile}: {source}")]
    Fetch {
        tile: Tile,
        #[source]
        source: SourceError,
    },

    #[error("failed writing {tile} to {}: {source}", path.display())]
    Write {
        tile: Tile,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed creating HTTP client: {0}")]
    Client(#[source] SourceError),

    #[error("no free port found after {attempts} attempts starting at {start}")]
    PortExhausted { start: u16, attempts: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The tile a fetch or write failure belongs to.
    pub fn tile(&self) -> Option<&Tile> {
        match self {
            Error::Fetch { tile, .. } | Error::Write { tile, .. } => Some(tile),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
