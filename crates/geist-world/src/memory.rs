use std::collections::{BTreeMap, BTreeSet};

use crate::region_dir::LoadedRegion;
use crate::{ChunkCoord, REGION_SIZE, RegionCoord, RegionSource, WorldError, WorldSource};

/// In-memory world, mostly for tests and tooling.
#[derive(Clone, Debug, Default)]
pub struct MemoryWorld {
    chunks: BTreeMap<ChunkCoord, Vec<u8>>,
    broken: BTreeSet<RegionCoord>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, coord: ChunkCoord, data: impl Into<Vec<u8>>) {
        self.chunks.insert(coord, data.into());
    }

    pub fn remove(&mut self, coord: ChunkCoord) -> Option<Vec<u8>> {
        self.chunks.remove(&coord)
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&[u8]> {
        self.chunks.get(&coord).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Makes `open_region` fail for `coord` until [`MemoryWorld::repair_region`].
    pub fn break_region(&mut self, coord: RegionCoord) {
        self.broken.insert(coord);
    }

    pub fn repair_region(&mut self, coord: RegionCoord) {
        self.broken.remove(&coord);
    }
}

impl WorldSource for MemoryWorld {
    fn describe(&self) -> String {
        format!("memory world ({} chunks)", self.chunks.len())
    }

    fn regions(&self) -> Result<Vec<RegionCoord>, WorldError> {
        let mut regions: BTreeSet<RegionCoord> = self.chunks.keys().map(|c| c.region()).collect();
        regions.extend(self.broken.iter().copied());
        Ok(regions.into_iter().collect())
    }

    fn open_region(&self, coord: RegionCoord) -> Result<Box<dyn RegionSource + '_>, WorldError> {
        if self.broken.contains(&coord) {
            return Err(WorldError::CorruptRegion {
                coord,
                reason: "marked broken".to_string(),
            });
        }
        let min = coord.min_chunk();
        let chunks = self
            .chunks
            .range(ChunkCoord::new(min.x, i32::MIN)..ChunkCoord::new(min.x + REGION_SIZE, i32::MIN))
            .filter(|(c, _)| coord.contains(**c))
            .map(|(c, d)| (*c, d.clone()))
            .collect();
        Ok(Box::new(LoadedRegion { coord, chunks }))
    }
}
