//! Downsample pyramid: builds each coarser zoom level from the four children of
//! every changed parent tile.
#![forbid(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use geist_runtime::{
    AbortFlag, ImageFormat, ImageWriteQueue, ProgressListener, Task, WriteError, WriteJob,
    WriteOutcome,
};
use geist_tiles::{TileBounds, TileCoord, TileSet, TileSetFactory, tile_image_path};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum PyramidError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("aborted")]
    Aborted,
}

/// Tag carried by every tile image sent to the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutputTile {
    pub zoom: u32,
    pub tile: TileCoord,
}

#[derive(Clone, Debug, Default)]
pub struct PyramidResult {
    /// Bounds of the tiles produced at zoom 0; `None` when nothing was produced.
    pub bounds: Option<TileBounds>,
    /// Tiles composited per zoom level, finest first.
    pub tiles_per_level: Vec<(u32, usize)>,
    pub writes_failed: usize,
}

/// Places up to four children, scaled to half size, into the quadrants given by
/// [`TileCoord::quadrant`]. Missing children leave the background.
pub fn composite(
    children: &[(TileCoord, Option<RgbImage>)],
    tile_size: u32,
    background: [u8; 3],
) -> RgbImage {
    let mut out = RgbImage::from_pixel(tile_size, tile_size, Rgb(background));
    let half = (tile_size / 2).max(1);
    for (coord, img) in children {
        let Some(img) = img else { continue };
        let scaled = if img.dimensions() == (half, half) {
            img.clone()
        } else {
            imageops::resize(img, half, half, FilterType::Triangle)
        };
        let (qx, qy) = coord.quadrant();
        imageops::replace(&mut out, &scaled, (qx * half) as i64, (qy * half) as i64);
    }
    out
}

pub struct PyramidBuilder {
    layer_dir: PathBuf,
    num_zoom_levels: u32,
    tile_size: u32,
    format: ImageFormat,
    compression: u8,
    background: [u8; 3],
    clear_levels: bool,
}

impl PyramidBuilder {
    /// `layer_dir` holds `Zoom0..=Zoom<num_zoom_levels>`; base tiles live in the last.
    pub fn new(layer_dir: impl Into<PathBuf>, num_zoom_levels: u32, tile_size: u32) -> Self {
        Self {
            layer_dir: layer_dir.into(),
            num_zoom_levels,
            tile_size,
            format: ImageFormat::Png,
            compression: 90,
            background: [0, 0, 0],
            clear_levels: true,
        }
    }

    pub fn image(mut self, format: ImageFormat, compression: u8) -> Self {
        self.format = format;
        self.compression = compression;
        self
    }

    pub fn background(mut self, background: [u8; 3]) -> Self {
        self.background = background;
        self
    }

    /// Whether coarser level directories are wiped before being rebuilt; off when
    /// the tile cache from a previous run is reused.
    pub fn clear_levels(mut self, clear: bool) -> Self {
        self.clear_levels = clear;
        self
    }

    pub fn level_dir(&self, zoom: u32) -> PathBuf {
        self.layer_dir.join(format!("Zoom{zoom}"))
    }

    fn load_child(&self, dir: &Path, tile: TileCoord) -> Option<RgbImage> {
        let path = tile_image_path(dir, tile, self.format);
        if !path.is_file() {
            return None;
        }
        match image::open(&path) {
            Ok(img) => Some(img.to_rgb8()),
            Err(err) => {
                log::warn!("unreadable child tile {}: {err}", path.display());
                None
            }
        }
    }

    pub fn build(
        &self,
        base_tiles: &TileSet,
        writer: &mut ImageWriteQueue<OutputTile>,
        factory: &TileSetFactory,
        abort: &AbortFlag,
        progress: &mut dyn ProgressListener,
        on_outcome: &mut dyn FnMut(WriteOutcome<OutputTile>),
    ) -> Result<PyramidResult, PyramidError> {
        let mut result = PyramidResult::default();
        let mut count = |outcomes: Vec<WriteOutcome<OutputTile>>, failed: &mut usize| {
            for outcome in outcomes {
                if !outcome.is_ok() {
                    *failed += 1;
                }
                on_outcome(outcome);
            }
        };

        let mut current: Option<TileSet> = None;
        for zoom in (0..self.num_zoom_levels).rev() {
            let prev = current.as_ref().unwrap_or(base_tiles);
            let next = prev.parents(factory)?;
            let child_dir = self.level_dir(zoom + 1);
            let dir = self.level_dir(zoom);
            if self.clear_levels && dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
            progress.on_task_started(Task::Downsample { zoom });
            let total = next.len();
            for (i, parent) in next.iter().enumerate() {
                if abort.is_aborted() {
                    count(writer.drain(), &mut result.writes_failed);
                    return Err(PyramidError::Aborted);
                }
                let parent = parent?;
                let children: Vec<_> = parent
                    .children()
                    .into_iter()
                    .map(|c| (c, self.load_child(&child_dir, c)))
                    .collect();
                let image = composite(&children, self.tile_size, self.background);
                writer.submit(WriteJob {
                    path: tile_image_path(&dir, parent, self.format),
                    image,
                    format: self.format,
                    compression: self.compression,
                    tag: OutputTile { zoom, tile: parent },
                })?;
                count(writer.drain_completed(), &mut result.writes_failed);
                progress.on_task_update(i + 1, total);
            }
            // The next level reads these images back.
            count(writer.drain(), &mut result.writes_failed);
            log::debug!("zoom {zoom}: {total} tiles");
            result.tiles_per_level.push((zoom, total));
            current = Some(next);
        }

        result.bounds = match &current {
            Some(set) => set.bounds(),
            None => base_tiles.bounds(),
        };
        Ok(result)
    }
}
