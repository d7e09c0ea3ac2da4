use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};

use crate::tile::Tile;

/// Default crash log file name, relative to the working directory.
pub const DEFAULT_ERROR_LOG: &str = "crash.log";

/// Append-only log of tiles that failed to fetch or write.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line for `tile`, creating the file if needed.
    pub async fn append(
        &self,
        tile: &Tile,
        error: &(dyn std::error::Error + Send + Sync),
    ) -> io::Result<()> {
        let line = format!(
            "Failed to fetch {} tile at {}, {}: {}\n",
            tile.tier, tile.x, tile.y, error
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
