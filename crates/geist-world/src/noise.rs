use fastnoise_lite::{FastNoiseLite, NoiseType};

use crate::region_dir::LoadedRegion;
use crate::{
    CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH, ChunkCoord, RawChunk, REGION_SIZE, RegionCoord,
    RegionSource, WorldError, WorldSource,
};

const HEIGHT_FREQUENCY: f32 = 0.01;
const BASE_HEIGHT: f32 = 64.0;
const HEIGHT_AMPLITUDE: f32 = 48.0;

/// Synthetic heightfield world. Chunks cover `[-radius, radius)` on both axes;
/// each payload is the 16x16 column heights, one byte per column.
#[derive(Clone, Copy, Debug)]
pub struct NoiseWorld {
    seed: i32,
    radius: i32,
}

impl NoiseWorld {
    pub fn new(seed: i32, radius: i32) -> Self {
        Self {
            seed,
            radius: radius.max(0),
        }
    }

    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    fn noise(&self) -> FastNoiseLite {
        let mut n = FastNoiseLite::with_seed(self.seed);
        n.set_noise_type(Some(NoiseType::OpenSimplex2));
        n.set_frequency(Some(HEIGHT_FREQUENCY));
        n
    }

    fn in_bounds(&self, c: ChunkCoord) -> bool {
        (-self.radius..self.radius).contains(&c.x) && (-self.radius..self.radius).contains(&c.z)
    }

    fn generate(noise: &FastNoiseLite, coord: ChunkCoord) -> Vec<u8> {
        let (bx, bz) = coord.block_origin();
        let max = (CHUNK_HEIGHT - 1) as f32;
        let mut heights = Vec::with_capacity((CHUNK_WIDTH * CHUNK_DEPTH) as usize);
        for lz in 0..CHUNK_DEPTH {
            for lx in 0..CHUNK_WIDTH {
                let n = noise.get_noise_2d((bx + lx) as f32, (bz + lz) as f32);
                let h = (BASE_HEIGHT + n * HEIGHT_AMPLITUDE).clamp(1.0, max);
                heights.push(h as u8);
            }
        }
        heights
    }

    /// Every chunk of one region, generated eagerly.
    pub fn region_chunks(&self, coord: RegionCoord) -> Vec<RawChunk> {
        let noise = self.noise();
        coord
            .chunks()
            .filter(|c| self.in_bounds(*c))
            .map(|c| RawChunk::new(c, Self::generate(&noise, c)))
            .collect()
    }
}

impl WorldSource for NoiseWorld {
    fn describe(&self) -> String {
        format!("noise world (seed {}, radius {})", self.seed, self.radius)
    }

    fn regions(&self) -> Result<Vec<RegionCoord>, WorldError> {
        if self.radius == 0 {
            return Ok(Vec::new());
        }
        let lo = (-self.radius).div_euclid(REGION_SIZE);
        let hi = (self.radius - 1).div_euclid(REGION_SIZE);
        Ok((lo..=hi)
            .flat_map(|z| (lo..=hi).map(move |x| RegionCoord::new(x, z)))
            .collect())
    }

    fn open_region(&self, coord: RegionCoord) -> Result<Box<dyn RegionSource + '_>, WorldError> {
        let chunks = self
            .region_chunks(coord)
            .into_iter()
            .map(|c| (c.coord, c.data))
            .collect();
        Ok(Box::new(LoadedRegion { coord, chunks }))
    }
}
