//! Per-map metadata consumed by the web viewer: `worldVectors.json` for converting
//! between world and map coordinates, and `worldStats.json`.
use std::fs;
use std::io;
use std::path::Path;

use geist_geom::{OrthoCamera, Vec2, Vec3};
use geist_tiles::TileBounds;
use geist_world::{CHUNK_DEPTH, CHUNK_WIDTH, WorldSubset};
use serde::Serialize;

/// Sea level used for the initial view.
const START_VIEW_HEIGHT: i64 = 64;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldVectors {
    pub map_id: String,
    pub map_name: String,
    pub num_chunks: usize,
    /// Square kilometres, one block per square metre.
    pub surface_area: f64,
    pub start_view: [i64; 3],
    /// Map position of the world origin at zoom 0.
    pub origin: [f32; 2],
    pub x_axis: [f32; 2],
    pub y_axis: [f32; 2],
    pub z_axis: [f32; 2],
    /// World (x, z) step for one map pixel along each map axis at zoom 0.
    pub map_x_unit: [f32; 2],
    pub map_y_unit: [f32; 2],
    pub map_min: [i64; 2],
    pub map_size: [i64; 2],
}

pub struct MapExtent<'a> {
    pub map_id: &'a str,
    pub map_name: &'a str,
    pub num_zoom_levels: u32,
    pub tile_size: u32,
    /// Tile bounds at zoom 0.
    pub bounds: Option<TileBounds>,
    pub num_chunks: usize,
    pub subset: WorldSubset,
}

fn pair(v: Vec2) -> [f32; 2] {
    [v.x, v.y]
}

/// `camera` is the base-level camera looking at tile (0, 0).
pub fn compute(camera: &OrthoCamera, extent: &MapExtent<'_>) -> WorldVectors {
    let scale = 2f32.powi(extent.num_zoom_levels as i32);
    let origin = camera.project_f(Vec3::ZERO);
    let axis = |p: Vec3| pair((camera.project_f(p) - origin) * (1.0 / scale));

    let base = camera.unproject(Vec2::new(0.0, 0.0));
    let unit = |p: Vec2| {
        let w = camera.unproject(p) - base;
        [w.x * scale, w.z * scale]
    };

    let tile = extent.tile_size as i64;
    let (map_min, map_size) = match extent.bounds {
        Some(b) => (
            [b.min.x as i64 * tile, b.min.y as i64 * tile],
            [b.width() as i64 * tile, b.height() as i64 * tile],
        ),
        None => ([0, 0], [0, 0]),
    };

    let start_view = match extent.subset {
        WorldSubset::Circular {
            origin_x, origin_z, ..
        } => [origin_x, START_VIEW_HEIGHT, origin_z],
        WorldSubset::Full => [0, START_VIEW_HEIGHT, 0],
    };

    let blocks = extent.num_chunks as f64 * (CHUNK_WIDTH * CHUNK_DEPTH) as f64;
    WorldVectors {
        map_id: extent.map_id.to_string(),
        map_name: extent.map_name.to_string(),
        num_chunks: extent.num_chunks,
        surface_area: (blocks / 1_000_000.0 * 10.0).round() / 10.0,
        start_view,
        origin: pair(origin * (1.0 / scale)),
        x_axis: axis(Vec3::new(1.0, 0.0, 0.0)),
        y_axis: axis(Vec3::new(0.0, 1.0, 0.0)),
        z_axis: axis(Vec3::new(0.0, 0.0, 1.0)),
        map_x_unit: unit(Vec2::new(1.0, 0.0)),
        map_y_unit: unit(Vec2::new(0.0, 1.0)),
        map_min,
        map_size,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldStats {
    pub map_id: String,
    pub num_regions: usize,
    pub num_chunks: usize,
    pub regions_failed: usize,
    pub visible_tiles: usize,
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geist_tiles::TileCoord;

    fn extent(bounds: Option<TileBounds>) -> MapExtent<'static> {
        MapExtent {
            map_id: "m",
            map_name: "Map",
            num_zoom_levels: 2,
            tile_size: 256,
            bounds,
            num_chunks: 4000,
            subset: WorldSubset::Circular {
                origin_x: 10,
                origin_z: -20,
                radius: 100,
            },
        }
    }

    fn camera() -> OrthoCamera {
        let mut camera = OrthoCamera::new(256, 256);
        camera.look_at_tile(0, 0, 64.0, 0.7, 0.8);
        camera
    }

    #[test]
    fn axes_and_units_are_inverse_on_the_ground() {
        let v = compute(&camera(), &extent(None));
        // One map pixel along x, taken into the world and projected back.
        let world_step = v.map_x_unit;
        let map_step = [
            v.x_axis[0] * world_step[0] + v.z_axis[0] * world_step[1],
            v.x_axis[1] * world_step[0] + v.z_axis[1] * world_step[1],
        ];
        assert!((map_step[0] - 1.0).abs() < 1e-3, "{map_step:?}");
        assert!(map_step[1].abs() < 1e-3, "{map_step:?}");
    }

    #[test]
    fn bounds_become_pixel_extent() {
        let mut b = TileBounds::of(TileCoord::new(-1, 0));
        b.include(TileCoord::new(0, 2));
        let v = compute(&camera(), &extent(Some(b)));
        assert_eq!(v.map_min, [-256, 0]);
        assert_eq!(v.map_size, [512, 768]);
        assert_eq!(v.start_view, [10, 64, -20]);
        assert_eq!(v.num_chunks, 4000);
        assert_eq!(v.surface_area, 1.0);
    }

    #[test]
    fn json_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m").join("worldStats.json");
        let stats = WorldStats {
            map_id: "m".into(),
            num_regions: 2,
            ..Default::default()
        };
        write_json(&path, &stats).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"numRegions\": 2"), "{text}");
    }
}
