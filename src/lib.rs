//! Incremental tile-pyramid renderer for voxel-world web maps.
//!
//! A run hashes every chunk of each configured world, works out which base tiles
//! those chunks touch, re-renders only the tiles whose chunks changed since the
//! previous run and rebuilds the zoom pyramid above them.
#![forbid(unsafe_code)]

pub mod config;
pub mod map_renderer;
pub mod summary;
pub mod world_vectors;

use std::path::Path;

use geist_world::{NoiseWorld, WorldError, WorldSource, write_region};

pub use config::{Config, ConfigError, LayerConfig, MapConfig, SubsetConfig, WorldConfig};
pub use map_renderer::{MapError, MapRenderer};
pub use summary::{LayerSummary, MapSummary, RunSummary};

/// Writes a noise world as a directory of region files. Returns `(regions, chunks)` written.
pub fn generate_world(dir: &Path, seed: i32, radius: i32) -> Result<(usize, usize), WorldError> {
    let world = NoiseWorld::new(seed, radius);
    log::info!("generating {} into {}", world.describe(), dir.display());
    let mut chunks = 0usize;
    let regions = world.regions()?;
    for coord in &regions {
        let region = world.region_chunks(*coord);
        chunks += region.len();
        let path = write_region(dir, *coord, &region)?;
        log::debug!("wrote {} ({} chunks)", path.display(), region.len());
    }
    Ok((regions.len(), chunks))
}
