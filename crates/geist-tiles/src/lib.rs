//! Tile bookkeeping for incremental map runs: tile coordinates, disk-backed tile
//! sets, per-region chunk hash records, visibility projection and the tile cache.
#![forbid(unsafe_code)]

mod coord;
mod error;
mod layout;
mod projector;
mod region_hash;
mod tile_cache;
mod tile_set;

pub use coord::{TileBounds, TileCoord};
pub use error::TileError;
pub use layout::{CacheLayout, tile_bucket_path, tile_image_path, zoom_dir};
pub use projector::TileProjector;
pub use region_hash::{RegionHashIndex, RegionHashStore, RegionIndexStats, RegionHashes};
pub use tile_cache::{
    CacheOptions, ConfigDigest, FileTileCache, NullTileCache, TileCache, combined_fingerprint,
    config_digest, trim_tiles,
};
pub use tile_set::{TileSet, TileSetBuilder, TileSetFactory, TileSetIter};
