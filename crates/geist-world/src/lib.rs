//! World-side collaborators of the map pipeline: chunk/region coordinates,
//! content fingerprints, world sources and subset filters.
#![forbid(unsafe_code)]

mod coords;
mod fingerprint;
mod memory;
mod noise;
mod region_dir;
mod source;
mod subset;

pub use coords::{CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH, ChunkCoord, REGION_SIZE, RegionCoord};
pub use fingerprint::ChunkFingerprint;
pub use memory::MemoryWorld;
pub use noise::NoiseWorld;
pub use region_dir::{RegionDirWorld, region_file_name, write_region};
pub use source::{RawChunk, RegionSource, WorldError, WorldSource};
pub use subset::WorldSubset;
