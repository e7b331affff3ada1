use std::sync::Arc;

use geist_geom::{OrthoCamera, ScreenRect, Vec2};
use geist_runtime::{AbortFlag, ProgressListener, Task};
use geist_world::{
    CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_WIDTH, ChunkCoord, ChunkFingerprint, RegionCoord, WorldSubset,
};

use crate::{RegionHashIndex, RegionHashes, TileCoord, TileError, TileSet, TileSetFactory};

/// Maps chunks to the base tiles they appear in, and back.
///
/// Screen space is that of the camera placed for tile `(0, 0)`: tile `(x, y)` covers
/// pixels `[x * w, (x + 1) * w) x [y * h, (y + 1) * h)`.
#[derive(Clone, Debug)]
pub struct TileProjector {
    camera: OrthoCamera,
    tile_width: u32,
    tile_height: u32,
    // Screen size of any chunk's bounding rectangle; constant under an orthographic camera.
    chunk_extent: (f32, f32),
}

impl TileProjector {
    /// `camera` must already look at tile `(0, 0)`.
    pub fn new(camera: OrthoCamera, tile_width: u32, tile_height: u32) -> Self {
        let rect = camera.project_aabb(&ChunkCoord::new(0, 0).bounds());
        let chunk_extent = (
            (rect.max.x - rect.min.x + 2) as f32,
            (rect.max.y - rect.min.y + 2) as f32,
        );
        Self {
            camera,
            tile_width: tile_width.max(1),
            tile_height: tile_height.max(1),
            chunk_extent,
        }
    }

    pub fn for_view(tile_size: u32, zoom: f32, angle: f32, elevation: f32) -> Self {
        let mut camera = OrthoCamera::new(tile_size, tile_size);
        camera.look_at_tile(0, 0, zoom, angle, elevation);
        Self::new(camera, tile_size, tile_size)
    }

    pub fn camera(&self) -> &OrthoCamera {
        &self.camera
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    pub fn chunk_screen_rect(&self, chunk: ChunkCoord) -> ScreenRect {
        self.camera.project_aabb(&chunk.bounds())
    }

    fn tile_span(&self, rect: ScreenRect) -> (TileCoord, TileCoord) {
        let (w, h) = (self.tile_width as i32, self.tile_height as i32);
        (
            TileCoord::new(rect.min.x.div_euclid(w), rect.min.y.div_euclid(h)),
            TileCoord::new(rect.max.x.div_euclid(w), rect.max.y.div_euclid(h)),
        )
    }

    /// Every tile the chunk's projected bounding rectangle touches.
    pub fn tiles_for_chunk(&self, chunk: ChunkCoord) -> impl Iterator<Item = TileCoord> + use<> {
        let (min, max) = self.tile_span(self.chunk_screen_rect(chunk));
        (min.x..=max.x).flat_map(move |x| (min.y..=max.y).map(move |y| TileCoord::new(x, y)))
    }

    pub fn chunk_touches_tile(&self, chunk: ChunkCoord, tile: TileCoord) -> bool {
        let (min, max) = self.tile_span(self.chunk_screen_rect(chunk));
        (min.x..=max.x).contains(&tile.x) && (min.y..=max.y).contains(&tile.y)
    }

    /// Union of `tiles_for_chunk` over every recorded chunk inside `subset`.
    pub fn find_visible_tiles(
        &self,
        index: &RegionHashIndex,
        subset: &WorldSubset,
        factory: &TileSetFactory,
        progress: &mut dyn ProgressListener,
        abort: &AbortFlag,
    ) -> Result<TileSet, TileError> {
        progress.on_task_started(Task::FindVisibleTiles);
        let total = index.chunk_count();
        let mut done = 0usize;
        let mut builder = factory.builder();
        for region in index.regions() {
            if !subset.contains_region(region) {
                continue;
            }
            let hashes = match index.region_hashes(region) {
                Ok(h) => h,
                Err(err) => {
                    log::warn!("skipping region {region} during visibility: {err}");
                    continue;
                }
            };
            for chunk in hashes.keys().copied() {
                if abort.is_aborted() {
                    return Err(TileError::Aborted);
                }
                if subset.contains_chunk(chunk) {
                    for tile in self.tiles_for_chunk(chunk) {
                        builder.add(tile)?;
                    }
                }
                done += 1;
                progress.on_task_update(done, total);
            }
        }
        let visible = builder.finish()?;
        log::info!("{} visible tiles from {total} chunks", visible.len());
        Ok(visible)
    }

    /// Superset of the chunks whose bounding rectangle can touch `tile`.
    ///
    /// Such a rectangle lies inside the tile grown by one chunk extent, so the chunk's
    /// base corners fall inside that grown rectangle's footprint on the ground.
    pub fn candidate_chunks(&self, tile: TileCoord) -> Vec<ChunkCoord> {
        let (w, h) = (self.tile_width as f32, self.tile_height as f32);
        let (pad_x, pad_y) = self.chunk_extent;
        let screen_min = Vec2::new(tile.x as f32 * w - pad_x, tile.y as f32 * h - pad_y);
        let screen_max = Vec2::new(
            (tile.x + 1) as f32 * w + pad_x,
            (tile.y + 1) as f32 * h + pad_y,
        );
        let Some((min_x, min_z, max_x, max_z)) =
            self.camera
                .ground_footprint(screen_min, screen_max, 0.0, CHUNK_HEIGHT as f32)
        else {
            return Vec::new();
        };
        let cx0 = (min_x / CHUNK_WIDTH as f32).floor() as i32 - 1;
        let cx1 = (max_x / CHUNK_WIDTH as f32).floor() as i32 + 1;
        let cz0 = (min_z / CHUNK_DEPTH as f32).floor() as i32 - 1;
        let cz1 = (max_z / CHUNK_DEPTH as f32).floor() as i32 + 1;
        (cx0..=cx1)
            .flat_map(|x| (cz0..=cz1).map(move |z| ChunkCoord::new(x, z)))
            .collect()
    }

    /// Recorded chunks drawn into `tile`, sorted by coordinate.
    pub fn chunks_for_tile(
        &self,
        tile: TileCoord,
        index: &RegionHashIndex,
    ) -> Result<Vec<(ChunkCoord, ChunkFingerprint)>, TileError> {
        let mut out = Vec::new();
        let mut region: Option<(RegionCoord, Arc<RegionHashes>)> = None;
        for chunk in self.candidate_chunks(tile) {
            let cached = region
                .as_ref()
                .filter(|(coord, _)| *coord == chunk.region())
                .map(|(_, hashes)| hashes.clone());
            let hashes = match cached {
                Some(hashes) => hashes,
                None => {
                    let hashes = index.region_hashes(chunk.region())?;
                    region = Some((chunk.region(), hashes.clone()));
                    hashes
                }
            };
            if let Some(fp) = hashes.get(&chunk) {
                if self.chunk_touches_tile(chunk, tile) {
                    out.push((chunk, *fp));
                }
            }
        }
        out.sort_by_key(|(c, _)| *c);
        Ok(out)
    }
}
