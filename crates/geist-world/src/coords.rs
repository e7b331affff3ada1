use std::fmt;

use geist_geom::{Aabb, Vec3};
use serde::{Deserialize, Serialize};

/// Blocks along X in one chunk.
pub const CHUNK_WIDTH: i32 = 16;
/// Blocks along Y in one chunk.
pub const CHUNK_HEIGHT: i32 = 256;
/// Blocks along Z in one chunk.
pub const CHUNK_DEPTH: i32 = 16;
/// Chunks along each horizontal axis of a region.
pub const REGION_SIZE: i32 = 32;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    #[inline]
    pub fn region(self) -> RegionCoord {
        RegionCoord::new(self.x.div_euclid(REGION_SIZE), self.z.div_euclid(REGION_SIZE))
    }

    /// Chunk containing the given block column.
    #[inline]
    pub fn containing_block(bx: i32, bz: i32) -> Self {
        Self::new(bx.div_euclid(CHUNK_WIDTH), bz.div_euclid(CHUNK_DEPTH))
    }

    #[inline]
    pub fn block_origin(self) -> (i32, i32) {
        (self.x * CHUNK_WIDTH, self.z * CHUNK_DEPTH)
    }

    /// Full-height world-space box of the chunk column.
    pub fn bounds(self) -> Aabb {
        let (bx, bz) = self.block_origin();
        Aabb::from_origin_size(
            Vec3::new(bx as f32, 0.0, bz as f32),
            CHUNK_WIDTH as f32,
            CHUNK_HEIGHT as f32,
            CHUNK_DEPTH as f32,
        )
    }

    #[inline]
    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.z + dz)
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

impl From<(i32, i32)> for ChunkCoord {
    fn from(value: (i32, i32)) -> Self {
        Self::new(value.0, value.1)
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RegionCoord {
    pub x: i32,
    pub z: i32,
}

impl RegionCoord {
    #[inline]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    #[inline]
    pub fn contains(self, chunk: ChunkCoord) -> bool {
        chunk.region() == self
    }

    #[inline]
    pub fn min_chunk(self) -> ChunkCoord {
        ChunkCoord::new(self.x * REGION_SIZE, self.z * REGION_SIZE)
    }

    /// All chunk slots of the region, row by row.
    pub fn chunks(self) -> impl Iterator<Item = ChunkCoord> {
        let base = self.min_chunk();
        (0..REGION_SIZE).flat_map(move |dz| (0..REGION_SIZE).map(move |dx| base.offset(dx, dz)))
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r.{}.{}", self.x, self.z)
    }
}
