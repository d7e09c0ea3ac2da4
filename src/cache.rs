//! On-disk tile layout: `<root>/<tier>/<tier>_<x>_<y>.png`.
//!
//! The preview page builds the same paths when requesting tiles, so the
//! layout must not change.

use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::fs;

use crate::error::{Error, Result};
use crate::tile::Tile;
use crate::zoom::ZoomTier;

/// Directory below `$HOME` used when no cache root is configured.
pub const DEFAULT_CACHE_DIR: &str = "AtlasOSMTiles";

/// The cache location of tile `x`, `y` of `tier`.
pub fn resolve_path(cache_root: &Path, tier: ZoomTier, x: u32, y: u32) -> PathBuf {
    let mut path = tier_directory(cache_root, tier);
    path.push(format!("{}_{}_{}.png", tier, x, y));
    path
}

pub fn tier_directory(cache_root: &Path, tier: ZoomTier) -> PathBuf {
    cache_root.join(tier.name())
}

/// Creates the directory of `tier` below `cache_root`, including parents.
///
/// Succeeds if it already exists.
pub async fn ensure_directory(cache_root: &Path, tier: ZoomTier) -> io::Result<PathBuf> {
    let dir = tier_directory(cache_root, tier);
    fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// `$HOME/AtlasOSMTiles`, or a relative `AtlasOSMTiles` if there is no home directory.
pub fn default_cache_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_CACHE_DIR))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR))
}

/// A cache root the fetch pipeline writes tiles into.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TileCache {
    root: PathBuf,
}

impl TileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, tile: &Tile) -> PathBuf {
        resolve_path(&self.root, tile.tier, tile.x, tile.y)
    }

    /// Ensures the tier directory of `tile` exists and returns its cache path.
    pub async fn prepare(&self, tile: &Tile) -> Result<PathBuf> {
        let path = self.path_for(tile);

        match ensure_directory(&self.root, tile.tier).await {
            Ok(_) => Ok(path),
            Err(source) => Err(Error::Write {
                tile: *tile,
                path,
                source,
            }),
        }
    }

    /// Writes `bytes` as the cache entry of `tile`, replacing any previous content.
    pub async fn write_tile(&self, tile: &Tile, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.prepare(tile).await?;
        self.write_at(tile, &path, bytes).await?;
        Ok(path)
    }

    pub(crate) async fn write_at(&self, tile: &Tile, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::write(path, bytes).await.map_err(|source| Error::Write {
            tile: *tile,
            path: path.to_owned(),
            source,
        })
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(default_cache_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_layout_is_fixed() {
        let root = Path::new("/tmp/tiles");

        assert_eq!(
            resolve_path(root, ZoomTier::Station, 10, 20),
            Path::new("/tmp/tiles/station/station_10_20.png")
        );
        assert_eq!(
            resolve_path(root, ZoomTier::Country, 0, 7),
            Path::new("/tmp/tiles/country/country_0_7.png")
        );
    }

    #[tokio::test]
    async fn ensure_directory_is_idempotent() {
        let root = tempfile::tempdir().unwrap();

        let first = ensure_directory(root.path(), ZoomTier::Region).await.unwrap();
        let second = ensure_directory(root.path(), ZoomTier::Region).await.unwrap();

        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[tokio::test]
    async fn ensure_directory_creates_missing_parents() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");

        let dir = ensure_directory(&nested, ZoomTier::Country).await.unwrap();
        assert_eq!(dir, nested.join("country"));
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn ensure_directory_propagates_other_errors() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        assert!(ensure_directory(&file, ZoomTier::Country).await.is_err());
    }

    #[tokio::test]
    async fn write_tile_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let cache = TileCache::new(root.path());
        let tile = Tile::new(ZoomTier::Station, 10, 20);

        cache.write_tile(&tile, b"first version").await.unwrap();
        let path = cache.write_tile(&tile, b"v2").await.unwrap();

        assert_eq!(path, root.path().join("station").join("station_10_20.png"));
        assert_eq!(std::fs::read(path).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn write_failure_names_tile() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let tile = Tile::new(ZoomTier::Region, 1, 2);
        let err = TileCache::new(&file).write_tile(&tile, b"png").await.unwrap_err();

        assert!(matches!(err, Error::Write { tile: t, .. } if t == tile));
    }
}
