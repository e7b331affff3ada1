//! Rasterizer capability used by map runs, with a per-tile render context and a
//! small software backend.
#![forbid(unsafe_code)]

mod silhouette;

use std::fmt;

use geist_geom::OrthoCamera;
use geist_tiles::TileCoord;
use geist_world::{ChunkCoord, ChunkFingerprint};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use silhouette::SilhouetteRenderer;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("renderer setup failed: {0}")]
    Setup(String),
    #[error("draw failed: {0}")]
    Draw(String),
    #[error("capture rectangle {x},{y} {width}x{height} exceeds the {fb_width}x{fb_height} surface")]
    CaptureBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        fb_width: u32,
        fb_height: u32,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStyle {
    #[default]
    Normal,
    Cave,
    Nether,
}

impl RenderStyle {
    pub fn name(self) -> &'static str {
        match self {
            RenderStyle::Normal => "normal",
            RenderStyle::Cave => "cave",
            RenderStyle::Nether => "nether",
        }
    }
}

impl fmt::Display for RenderStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneOptions {
    pub style: RenderStyle,
    pub background: [u8; 3],
}

/// Chunks to draw, each with the fingerprint of its content.
pub type Scene<'a> = &'a [(ChunkCoord, ChunkFingerprint)];

pub trait Renderer {
    /// Drops any state left from the previous tile.
    fn reset(&mut self);

    fn clear(&mut self, color: [u8; 3]);

    fn draw(
        &mut self,
        camera: &OrthoCamera,
        scene: Scene<'_>,
        options: &SceneOptions,
    ) -> Result<(), RenderError>;

    fn capture_image(&mut self, x: u32, y: u32, width: u32, height: u32)
    -> Result<RgbImage, RenderError>;
}

/// Camera view shared by every base tile of a map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileView {
    pub tile_size: u32,
    pub zoom: f32,
    /// Radians.
    pub angle: f32,
    /// Radians.
    pub elevation: f32,
}

/// Renders one base tile at a time; each call starts from a reset renderer and a
/// freshly placed camera, so nothing leaks between tiles.
pub struct RenderContext<R: Renderer> {
    renderer: R,
    camera: OrthoCamera,
    view: TileView,
}

impl<R: Renderer> RenderContext<R> {
    pub fn new(renderer: R, view: TileView) -> Self {
        Self {
            renderer,
            camera: OrthoCamera::new(view.tile_size, view.tile_size),
            view,
        }
    }

    pub fn view(&self) -> &TileView {
        &self.view
    }

    /// Switches to another map's view; the renderer surface must match `view.tile_size`.
    pub fn set_view(&mut self, view: TileView) {
        if view.tile_size != self.view.tile_size {
            self.camera = OrthoCamera::new(view.tile_size, view.tile_size);
        }
        self.view = view;
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn render_tile(
        &mut self,
        tile: TileCoord,
        scene: Scene<'_>,
        options: &SceneOptions,
    ) -> Result<RgbImage, RenderError> {
        let v = self.view;
        self.renderer.reset();
        self.renderer.clear(options.background);
        self.camera
            .look_at_tile(tile.x, tile.y, v.zoom, v.angle, v.elevation);
        log::trace!("tile {tile}: drawing {} chunks ({})", scene.len(), options.style);
        self.renderer.draw(&self.camera, scene, options)?;
        self.renderer.capture_image(0, 0, v.tile_size, v.tile_size)
    }
}
