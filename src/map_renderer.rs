//! Drives a run: each configured map is scanned for chunk changes, its changed
//! base tiles are rendered per layer, and the zoom pyramid above them is rebuilt.
use std::error::Error;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;

use geist_pyramid::{OutputTile, PyramidBuilder, PyramidError};
use geist_render::{RenderContext, RenderError, Renderer, SceneOptions, SilhouetteRenderer};
use geist_runtime::{
    AbortFlag, ChangeFile, ImageWriteQueue, ProgressListener, Task, WriteError, WriteJob,
    WriteOutcome,
};
use geist_tiles::{
    CacheLayout, FileTileCache, NullTileCache, RegionHashIndex, RegionHashStore, TileCache,
    TileCoord, TileError, TileProjector, TileSet, TileSetFactory, tile_image_path, trim_tiles,
    zoom_dir,
};
use geist_world::{RegionCoord, WorldError, WorldSource, WorldSubset};
use image::RgbImage;

use crate::config::{Config, LayerConfig, MapConfig};
use crate::summary::{LayerSummary, MapSummary, RunSummary};
use crate::world_vectors::{self, MapExtent, WorldStats};

/// Decoded region hash records kept in memory while finding changed tiles.
const REGION_CACHE_CAPACITY: usize = 64;
/// Write jobs queued per writer thread before `submit` blocks.
const JOBS_PER_WRITER: usize = 4;

pub const CHANGED_FILE: &str = "changed.txt";
pub const RENDER_STATS_FILE: &str = "renderStats.json";
pub const WORLD_VECTORS_FILE: &str = "worldVectors.json";
pub const WORLD_STATS_FILE: &str = "worldStats.json";

/// Failure of a single map; the run carries on with the next one.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Tiles(TileError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("aborted")]
    Aborted,
}

impl From<TileError> for MapError {
    fn from(err: TileError) -> Self {
        match err {
            TileError::Aborted => MapError::Aborted,
            other => MapError::Tiles(other),
        }
    }
}

impl From<PyramidError> for MapError {
    fn from(err: PyramidError) -> Self {
        match err {
            PyramidError::Aborted => MapError::Aborted,
            PyramidError::Io(e) => MapError::Io(e),
            PyramidError::Write(e) => MapError::Write(e),
        }
    }
}

/// Everything a layer pass reads but does not own.
struct LayerJob<'a> {
    layer: &'a LayerConfig,
    index: &'a RegionHashIndex,
    projector: &'a TileProjector,
    cache: &'a dyn TileCache,
    zoom: u32,
}

pub struct MapRenderer<R: Renderer = SilhouetteRenderer> {
    config: Config,
    layout: CacheLayout,
    factory: TileSetFactory,
    context: RenderContext<R>,
    abort: AbortFlag,
}

impl MapRenderer<SilhouetteRenderer> {
    pub fn new(config: Config) -> Result<Self, Box<dyn Error>> {
        let renderer = SilhouetteRenderer::new(config.tile_size, config.tile_size)?;
        Self::with_renderer(config, renderer)
    }
}

impl<R: Renderer> MapRenderer<R> {
    /// Creates the output and cache directories; failures here are fatal for the run.
    pub fn with_renderer(config: Config, renderer: R) -> Result<Self, Box<dyn Error>> {
        config.validate()?;
        fs::create_dir_all(&config.output_dir)?;
        let layout = CacheLayout::new(config.cache_dir());
        fs::create_dir_all(layout.root())?;
        let factory = TileSetFactory::new(layout.tile_lists(), config.tile_list_capacity)?;
        let view = match config.maps.first() {
            Some(map) => map.tile_view(config.tile_size),
            None => return Err("no maps configured".into()),
        };
        Ok(Self {
            context: RenderContext::new(renderer, view),
            config,
            layout,
            factory,
            abort: AbortFlag::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flag that stops the run at the next chunk or tile; hand it to a signal handler.
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn renderer(&self) -> &R {
        self.context.renderer()
    }

    pub fn run(&mut self, progress: &mut dyn ProgressListener) -> Result<RunSummary, Box<dyn Error>> {
        let start = Instant::now();
        let mut summary = RunSummary::new();
        let mut change_log = ChangeFile::create(self.config.output_dir.join(CHANGED_FILE))?;

        let maps = self.config.maps.clone();
        for map in &maps {
            if self.abort.is_aborted() {
                summary.aborted = true;
                break;
            }
            log::info!("rendering map '{}'", map.display_name());
            match self.render_map(map, &mut change_log, progress) {
                Ok(s) => summary.maps.push(s),
                Err(MapError::Aborted) => {
                    log::warn!("map '{}' aborted", map.id);
                    summary.aborted = true;
                    break;
                }
                Err(err) => {
                    log::error!("map '{}' failed: {err}", map.id);
                    summary.maps_failed += 1;
                }
            }
        }

        summary.changed_files = change_log.len();
        change_log.close()?;
        summary.elapsed_secs = start.elapsed().as_secs_f64();
        world_vectors::write_json(&self.config.output_dir.join(RENDER_STATS_FILE), &summary)?;
        summary.log();
        Ok(summary)
    }

    fn render_map(
        &mut self,
        map: &MapConfig,
        change_log: &mut ChangeFile,
        progress: &mut dyn ProgressListener,
    ) -> Result<MapSummary, MapError> {
        let world = map.open_world()?;
        log::info!("map '{}' reads {}", map.id, world.describe());
        let subset = map.subset();

        let (index, regions_failed) = self.scan_world(&map.id, world.as_ref(), &subset, progress)?;
        let view = map.tile_view(self.config.tile_size);
        let projector = TileProjector::for_view(view.tile_size, view.zoom, view.angle, view.elevation);
        let visible =
            projector.find_visible_tiles(&index, &subset, &self.factory, progress, &self.abort)?;
        if visible.is_spilled() {
            log::debug!(
                "{} visible tiles spilled to {}",
                visible.len(),
                self.factory.dir().display()
            );
        }

        let mut summary = MapSummary {
            id: map.id.clone(),
            regions: index.region_count(),
            regions_failed,
            chunks: index.chunk_count(),
            visible_tiles: visible.len(),
            layers: Vec::with_capacity(map.layers.len()),
        };

        self.context.set_view(view);
        for layer in &map.layers {
            let layer_summary =
                self.render_layer(map, layer, &index, &projector, &visible, change_log, progress)?;
            summary.layers.push(layer_summary);
        }

        self.write_metadata(map, &projector, &visible, &summary, progress)?;
        let stats = index.stats();
        log::debug!("region record cache: {} hits, {} misses", stats.hits, stats.misses);
        Ok(summary)
    }

    /// Records a fingerprint for every chunk in the subset, one region record at a time.
    fn scan_world(
        &self,
        map_id: &str,
        world: &dyn WorldSource,
        subset: &WorldSubset,
        progress: &mut dyn ProgressListener,
    ) -> Result<(RegionHashIndex, usize), MapError> {
        progress.on_task_started(Task::ScanRegions);
        let mut store = RegionHashStore::new(self.layout.region_hashes(map_id))?;
        let regions: Vec<RegionCoord> = world
            .regions()?
            .into_iter()
            .filter(|r| subset.contains_region(*r))
            .collect();

        let mut failed = 0usize;
        for (i, coord) in regions.iter().copied().enumerate() {
            if self.abort.is_aborted() {
                return Err(MapError::Aborted);
            }
            match scan_region(world, coord, subset, &mut store) {
                Ok(chunks) => log::trace!("region {coord}: {chunks} chunks"),
                Err(err) => {
                    log::warn!("skipping region {coord}: {err}");
                    store.abandon_region();
                    failed += 1;
                }
            }
            progress.on_task_update(i + 1, regions.len());
        }

        let index = store.finish(REGION_CACHE_CAPACITY)?;
        log::info!(
            "scanned {} regions ({} chunks, {failed} failed)",
            index.region_count(),
            index.chunk_count()
        );
        Ok((index, failed))
    }

    #[allow(clippy::too_many_arguments)]
    fn render_layer(
        &mut self,
        map: &MapConfig,
        layer: &LayerConfig,
        index: &RegionHashIndex,
        projector: &TileProjector,
        visible: &TileSet,
        change_log: &mut ChangeFile,
        progress: &mut dyn ProgressListener,
    ) -> Result<LayerSummary, MapError> {
        let cache: Box<dyn TileCache> = if self.config.use_cache {
            let options = layer.cache_options(&self.config, map);
            Box::new(FileTileCache::open(
                self.layout.tile_hashes(&map.id, &layer.id),
                &options,
            )?)
        } else {
            Box::new(NullTileCache)
        };

        let changed = cache.find_changed_tiles(
            visible,
            index,
            projector,
            &self.factory,
            progress,
            &self.abort,
        )?;
        let changed = trim_tiles(changed, &self.factory, self.config.max_tiles)?;
        log::info!(
            "layer '{}/{}': {} of {} visible tiles to render",
            map.id,
            layer.id,
            changed.len(),
            visible.len()
        );

        let mut summary = LayerSummary {
            id: layer.id.clone(),
            changed_tiles: changed.len(),
            used_existing_cache: cache.is_using_existing_cache(),
            ..Default::default()
        };
        let job = LayerJob {
            layer,
            index,
            projector,
            cache: cache.as_ref(),
            zoom: self.config.num_zoom_levels,
        };
        let base_dir = zoom_dir(&self.config.output_dir, &map.id, &layer.id, job.zoom);
        if !cache.is_using_existing_cache() && base_dir.exists() {
            log::info!("clearing base tiles in {}", base_dir.display());
            fs::remove_dir_all(&base_dir)?;
        }
        fs::create_dir_all(&base_dir)?;
        // Parents of these are rebuilt even if this pass is interrupted.
        let scheduled = cache.schedule_downsample(&changed, visible, &self.factory)?;

        let threads = self.config.writer_threads;
        let mut writer =
            ImageWriteQueue::<OutputTile>::new(threads, threads.max(1) * JOBS_PER_WRITER)?;
        self.render_base_tiles(&job, &changed, &base_dir, &mut writer, change_log, &mut summary, progress)?;

        let layer_dir = self.config.output_dir.join(&map.id).join(&layer.id);
        let pyramid = PyramidBuilder::new(layer_dir, self.config.num_zoom_levels, self.config.tile_size)
            .image(layer.image_format, layer.image_compression)
            .background(layer.background)
            .clear_levels(!cache.is_using_existing_cache());
        let result = pyramid.build(
            &scheduled,
            &mut writer,
            &self.factory,
            &self.abort,
            progress,
            &mut |outcome: WriteOutcome<OutputTile>| {
                if outcome.is_ok() {
                    log_change(change_log, &outcome.path);
                }
            },
        )?;
        summary.downsampled_tiles = result.tiles_per_level.iter().map(|(_, n)| n).sum();
        summary.writes_failed += result.writes_failed;
        if let Some(top) = result.bounds {
            log::debug!("layer '{}/{}': zoom 0 spans {:?}..={:?}", map.id, layer.id, top.min, top.max);
        }
        let pyramid_complete = result.writes_failed == 0;
        if !pyramid_complete {
            log::warn!(
                "layer '{}/{}': {} pyramid writes failed; they are retried next run",
                map.id,
                layer.id,
                result.writes_failed
            );
        }
        cache.finish_layer(pyramid_complete)?;
        Ok(summary)
    }

    /// Renders the changed tiles in set order; a tile's fingerprint is committed once
    /// its image is on disk.
    #[allow(clippy::too_many_arguments)]
    fn render_base_tiles(
        &mut self,
        job: &LayerJob<'_>,
        tiles: &TileSet,
        base_dir: &Path,
        writer: &mut ImageWriteQueue<OutputTile>,
        change_log: &mut ChangeFile,
        summary: &mut LayerSummary,
        progress: &mut dyn ProgressListener,
    ) -> Result<(), MapError> {
        progress.on_task_started(Task::RenderBaseTiles);
        let options = SceneOptions {
            style: job.layer.style,
            background: job.layer.background,
        };
        let total = tiles.len();
        let mut aborted = false;
        for (i, tile) in tiles.iter().enumerate() {
            if self.abort.is_aborted() {
                aborted = true;
                break;
            }
            let tile = tile?;
            match self.render_tile(job, tile, &options) {
                Ok(image) => writer.submit(WriteJob {
                    path: tile_image_path(base_dir, tile, job.layer.image_format),
                    image,
                    format: job.layer.image_format,
                    compression: job.layer.image_compression,
                    tag: OutputTile {
                        zoom: job.zoom,
                        tile,
                    },
                })?,
                Err(err) => {
                    log::warn!("tile {tile} failed to render: {err}");
                    summary.tiles_failed += 1;
                }
            }
            for outcome in writer.drain_completed() {
                finish_tile(outcome, job, change_log, summary);
            }
            progress.on_task_update(i + 1, total);
        }
        // Completed writes stay committed even when aborting.
        for outcome in writer.drain() {
            finish_tile(outcome, job, change_log, summary);
        }
        if aborted {
            return Err(MapError::Aborted);
        }
        log::info!(
            "rendered {} base tiles ({} failed)",
            summary.tiles_rendered,
            summary.tiles_failed + summary.writes_failed
        );
        Ok(())
    }

    fn render_tile(
        &mut self,
        job: &LayerJob<'_>,
        tile: TileCoord,
        options: &SceneOptions,
    ) -> Result<RgbImage, MapError> {
        let scene = job.projector.chunks_for_tile(tile, job.index)?;
        log::trace!("tile {tile}: {} chunks", scene.len());
        Ok(self.context.render_tile(tile, &scene, options)?)
    }

    fn write_metadata(
        &self,
        map: &MapConfig,
        projector: &TileProjector,
        visible: &TileSet,
        summary: &MapSummary,
        progress: &mut dyn ProgressListener,
    ) -> Result<(), MapError> {
        progress.on_task_started(Task::OutputMetadata);
        let map_dir = self.config.output_dir.join(&map.id);
        let levels = self.config.num_zoom_levels;
        let bounds = visible
            .bounds()
            .map(|b| (0..levels).fold(b, |b, _| b.parents()));
        let vectors = world_vectors::compute(
            projector.camera(),
            &MapExtent {
                map_id: &map.id,
                map_name: map.display_name(),
                num_zoom_levels: levels,
                tile_size: self.config.tile_size,
                bounds,
                num_chunks: summary.chunks,
                subset: map.subset(),
            },
        );
        world_vectors::write_json(&map_dir.join(WORLD_VECTORS_FILE), &vectors)?;
        let stats = WorldStats {
            map_id: map.id.clone(),
            num_regions: summary.regions,
            num_chunks: summary.chunks,
            regions_failed: summary.regions_failed,
            visible_tiles: summary.visible_tiles,
        };
        world_vectors::write_json(&map_dir.join(WORLD_STATS_FILE), &stats)?;
        progress.on_task_update(1, 1);
        Ok(())
    }
}

fn scan_region(
    world: &dyn WorldSource,
    coord: RegionCoord,
    subset: &WorldSubset,
    store: &mut RegionHashStore,
) -> Result<usize, MapError> {
    let mut region = world.open_region(coord)?;
    store.start_region(coord)?;
    let mut chunks = 0usize;
    for chunk in region.chunk_coords() {
        if !subset.contains_chunk(chunk) {
            continue;
        }
        if let Some(raw) = region.load_chunk(chunk)? {
            store.add_hash(raw.coord, raw.fingerprint())?;
            chunks += 1;
        }
    }
    store.end_region()?;
    Ok(chunks)
}

fn finish_tile(
    outcome: WriteOutcome<OutputTile>,
    job: &LayerJob<'_>,
    change_log: &mut ChangeFile,
    summary: &mut LayerSummary,
) {
    let tile = outcome.tag.tile;
    if let Err(err) = &outcome.result {
        log::warn!("tile {tile} not recorded, write failed: {err}");
        summary.writes_failed += 1;
        return;
    }
    summary.tiles_rendered += 1;
    if let Err(err) = job.cache.commit_tile(tile, job.index, job.projector) {
        log::warn!("could not record fingerprint of tile {tile}: {err}");
    }
    log_change(change_log, &outcome.path);
}

fn log_change(change_log: &mut ChangeFile, path: &Path) {
    if let Err(err) = change_log.write_line(path) {
        log::warn!("could not append {} to {}: {err}", path.display(), change_log.path().display());
    }
}
