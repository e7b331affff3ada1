//! On-disk naming of tiles, zoom levels and cache records.

use std::path::{Path, PathBuf};

use geist_runtime::ImageFormat;

use crate::TileCoord;

const BUCKETS: i32 = 16;

/// `<output>/<map>/<layer>/Zoom<zoom>`
pub fn zoom_dir(output: &Path, map: &str, layer: &str, zoom: u32) -> PathBuf {
    output.join(map).join(layer).join(format!("Zoom{zoom}"))
}

/// `<dir>/<x mod 16>/<y mod 16>/tile_<x>_<y>.<ext>`; buckets keep directories small.
pub fn tile_bucket_path(dir: &Path, tile: TileCoord, ext: &str) -> PathBuf {
    dir.join(tile.x.rem_euclid(BUCKETS).to_string())
        .join(tile.y.rem_euclid(BUCKETS).to_string())
        .join(format!("tile_{}_{}.{ext}", tile.x, tile.y))
}

pub fn tile_image_path(zoom_dir: &Path, tile: TileCoord, format: ImageFormat) -> PathBuf {
    tile_bucket_path(zoom_dir, tile, format.extension())
}

/// Directory layout under the cache root.
#[derive(Clone, Debug)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn region_hashes(&self, map: &str) -> PathBuf {
        self.root.join("regionHashes").join(map)
    }

    pub fn tile_hashes(&self, map: &str, layer: &str) -> PathBuf {
        self.root.join("tileHashes").join(map).join(layer)
    }

    pub fn tile_lists(&self) -> PathBuf {
        self.root.join("tileLists")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_tiles_land_in_positive_buckets() {
        let p = tile_image_path(Path::new("out/Zoom8"), TileCoord::new(-1, 17), ImageFormat::Jpg);
        assert_eq!(p, Path::new("out/Zoom8/15/1/tile_-1_17.jpg"));
    }

    #[test]
    fn zoom_dir_nests_map_and_layer() {
        let p = zoom_dir(Path::new("out"), "world", "day", 3);
        assert_eq!(p, Path::new("out/world/day/Zoom3"));
    }
}
