//! Run configuration, read from a TOML file.
//!
//! ```toml
//! output_dir = "map"
//! num_zoom_levels = 6
//!
//! [[maps]]
//! id = "overworld"
//! world = { dir = "world/region" }
//! camera_angle = 45
//! camera_elevation = 45
//! subset = { origin = [0, 0], radius = 2000 }
//!
//! [[maps.layers]]
//! id = "day"
//! style = "normal"
//! image_format = "jpg"
//! ```
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use geist_render::{RenderStyle, TileView};
use geist_runtime::ImageFormat;
use geist_tiles::CacheOptions;
use geist_world::{NoiseWorld, RegionDirWorld, WorldError, WorldSource, WorldSubset};
use serde::Deserialize;

pub const MIN_TILE_SIZE: u32 = 16;
pub const MAX_TILE_SIZE: u32 = 2048;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Defaults to `<output_dir>/Cache`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default = "default_num_zoom_levels")]
    pub num_zoom_levels: u32,
    /// 0 renders every changed tile.
    #[serde(default)]
    pub max_tiles: usize,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    #[serde(default = "default_writer_threads")]
    pub writer_threads: usize,
    /// Tiles a tile set keeps in memory before spilling to disk.
    #[serde(default = "default_tile_list_capacity")]
    pub tile_list_capacity: usize,
    #[serde(default)]
    pub maps: Vec<MapConfig>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("map")
}
fn default_tile_size() -> u32 {
    256
}
fn default_num_zoom_levels() -> u32 {
    8
}
fn default_use_cache() -> bool {
    true
}
fn default_writer_threads() -> usize {
    4
}
fn default_tile_list_capacity() -> usize {
    262_144
}

#[derive(Clone, Debug, Deserialize)]
pub struct MapConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub world: WorldConfig,
    /// World units covered by one base tile.
    #[serde(default = "default_closest_zoom")]
    pub closest_zoom: f32,
    /// Degrees.
    #[serde(default = "default_camera_angle")]
    pub camera_angle: f32,
    /// Degrees above the horizon; 90 looks straight down.
    #[serde(default = "default_camera_elevation")]
    pub camera_elevation: f32,
    #[serde(default)]
    pub subset: Option<SubsetConfig>,
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerConfig>,
}

fn default_closest_zoom() -> f32 {
    64.0
}
fn default_camera_angle() -> f32 {
    45.0
}
fn default_camera_elevation() -> f32 {
    45.0
}
fn default_layers() -> Vec<LayerConfig> {
    vec![LayerConfig::default()]
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorldConfig {
    /// Directory of `r.<x>.<z>.region` files.
    Dir(PathBuf),
    Noise { seed: i32, radius: i32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct SubsetConfig {
    #[serde(default)]
    pub origin: [i64; 2],
    pub radius: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LayerConfig {
    #[serde(default = "default_layer_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub style: RenderStyle,
    #[serde(default)]
    pub image_format: ImageFormat,
    /// 0..=100.
    #[serde(default = "default_image_compression")]
    pub image_compression: u8,
    #[serde(default = "default_background")]
    pub background: [u8; 3],
}

fn default_layer_id() -> String {
    "Base".to_string()
}
fn default_image_compression() -> u8 {
    90
}
fn default_background() -> [u8; 3] {
    [0x34, 0x34, 0x34]
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            id: default_layer_id(),
            name: None,
            style: RenderStyle::default(),
            image_format: ImageFormat::default(),
            image_compression: default_image_compression(),
            background: default_background(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&s)?;
        log::debug!("loaded {} map(s) from {}", config.maps.len(), path.display());
        Ok(config)
    }

    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("Cache"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.maps.is_empty() {
            return invalid("no maps configured".into());
        }
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&self.tile_size) {
            return invalid(format!(
                "tile_size {} outside {MIN_TILE_SIZE}..={MAX_TILE_SIZE}",
                self.tile_size
            ));
        }
        if self.tile_size % 2 != 0 {
            return invalid(format!(
                "tile_size {} must be even",
                self.tile_size
            ));
        }
        if self.tile_list_capacity == 0 {
            return invalid("tile_list_capacity must be positive".into());
        }
        let mut map_ids = HashSet::new();
        for map in &self.maps {
            check_id("map", &map.id)?;
            if !map_ids.insert(map.id.as_str()) {
                return invalid(format!("duplicate map id '{}'", map.id));
            }
            if !(map.camera_elevation > 0.0 && map.camera_elevation <= 90.0) {
                return invalid(format!(
                    "map '{}': camera_elevation {} outside (0, 90]",
                    map.id, map.camera_elevation
                ));
            }
            if !(map.closest_zoom > 0.0 && map.closest_zoom.is_finite()) {
                return invalid(format!("map '{}': closest_zoom must be positive", map.id));
            }
            if map.layers.is_empty() {
                return invalid(format!("map '{}' has no layers", map.id));
            }
            let mut layer_ids = HashSet::new();
            for layer in &map.layers {
                check_id("layer", &layer.id)?;
                if !layer_ids.insert(layer.id.as_str()) {
                    return invalid(format!("map '{}': duplicate layer id '{}'", map.id, layer.id));
                }
                if layer.image_compression > 100 {
                    return invalid(format!(
                        "layer '{}': image_compression {} above 100",
                        layer.id, layer.image_compression
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Ids become directory names.
fn check_id(kind: &str, id: &str) -> Result<(), ConfigError> {
    let ok = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{kind} id '{id}' is not a plain file name")))
    }
}

impl MapConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn subset(&self) -> WorldSubset {
        match self.subset {
            Some(s) => WorldSubset::Circular {
                origin_x: s.origin[0],
                origin_z: s.origin[1],
                radius: s.radius,
            },
            None => WorldSubset::Full,
        }
    }

    pub fn camera_angle_rad(&self) -> f32 {
        self.camera_angle.to_radians()
    }

    pub fn camera_elevation_rad(&self) -> f32 {
        self.camera_elevation.to_radians()
    }

    pub fn tile_view(&self, tile_size: u32) -> TileView {
        TileView {
            tile_size,
            zoom: self.closest_zoom,
            angle: self.camera_angle_rad(),
            elevation: self.camera_elevation_rad(),
        }
    }

    pub fn open_world(&self) -> Result<Box<dyn WorldSource>, WorldError> {
        Ok(match &self.world {
            WorldConfig::Dir(dir) => Box::new(RegionDirWorld::open(dir)?),
            WorldConfig::Noise { seed, radius } => Box::new(NoiseWorld::new(*seed, *radius)),
        })
    }
}

impl LayerConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Settings that decide whether this layer's cached tiles are still valid.
    pub fn cache_options(&self, config: &Config, map: &MapConfig) -> CacheOptions {
        CacheOptions {
            tile_size: config.tile_size,
            zoom: map.closest_zoom,
            camera_angle: map.camera_angle,
            camera_elevation: map.camera_elevation,
            style: self.style.name().to_string(),
            image_format: self.image_format,
            image_compression: self.image_compression,
            background: self.background,
            subset: map.subset(),
        }
    }
}
