use serde::{Deserialize, Serialize};

use crate::{CHUNK_DEPTH, CHUNK_WIDTH, ChunkCoord, REGION_SIZE, RegionCoord};

/// Which part of a world a map covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum WorldSubset {
    #[default]
    Full,
    /// Chunks whose footprint comes within `radius` blocks of the origin column.
    /// A radius of zero means unlimited.
    Circular {
        origin_x: i64,
        origin_z: i64,
        radius: i64,
    },
}

impl WorldSubset {
    pub fn contains_chunk(&self, chunk: ChunkCoord) -> bool {
        let (bx, bz) = chunk.block_origin();
        self.contains_block_rect(
            bx as i64,
            bz as i64,
            (bx + CHUNK_WIDTH) as i64,
            (bz + CHUNK_DEPTH) as i64,
        )
    }

    /// Cheap pre-filter; a region may pass while none of its chunks do.
    pub fn contains_region(&self, region: RegionCoord) -> bool {
        let (bx, bz) = region.min_chunk().block_origin();
        self.contains_block_rect(
            bx as i64,
            bz as i64,
            (bx + REGION_SIZE * CHUNK_WIDTH) as i64,
            (bz + REGION_SIZE * CHUNK_DEPTH) as i64,
        )
    }

    fn contains_block_rect(&self, min_x: i64, min_z: i64, max_x: i64, max_z: i64) -> bool {
        match *self {
            WorldSubset::Full => true,
            WorldSubset::Circular { radius, .. } if radius <= 0 => true,
            WorldSubset::Circular {
                origin_x,
                origin_z,
                radius,
            } => {
                let nx = origin_x.clamp(min_x, max_x);
                let nz = origin_z.clamp(min_z, max_z);
                let dx = nx - origin_x;
                let dz = nz - origin_z;
                dx * dx + dz * dz < radius * radius
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_contains_everything() {
        assert!(WorldSubset::Full.contains_chunk(ChunkCoord::new(-9_000, 12_000)));
    }

    #[test]
    fn circle_keeps_near_chunks_only() {
        let s = WorldSubset::Circular {
            origin_x: 0,
            origin_z: 0,
            radius: 40,
        };
        assert!(s.contains_chunk(ChunkCoord::new(0, 0)));
        assert!(s.contains_chunk(ChunkCoord::new(-1, -1)));
        assert!(s.contains_chunk(ChunkCoord::new(2, 0)));
        assert!(!s.contains_chunk(ChunkCoord::new(3, 0)));
        assert!(!s.contains_chunk(ChunkCoord::new(2, 2)));
        assert!(s.contains_region(RegionCoord::new(-1, 0)));
        assert!(!s.contains_region(RegionCoord::new(3, 3)));
    }

    #[test]
    fn zero_radius_is_unlimited() {
        let s = WorldSubset::Circular {
            origin_x: 5,
            origin_z: 5,
            radius: 0,
        };
        assert!(s.contains_chunk(ChunkCoord::new(1_000, 1_000)));
    }
}
