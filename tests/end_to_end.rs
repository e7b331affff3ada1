use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use geist_map::map_renderer::{CHANGED_FILE, RENDER_STATS_FILE, WORLD_STATS_FILE, WORLD_VECTORS_FILE};
use geist_map::{Config, MapRenderer, RunSummary};
use geist_runtime::{AbortFlag, ImageFormat, NullProgress, ProgressListener, Task};
use geist_tiles::{TileCoord, TileProjector, tile_image_path, zoom_dir};
use geist_world::{ChunkCoord, RawChunk, RegionCoord, write_region};

struct Fixture {
    _root: tempfile::TempDir,
    out: PathBuf,
    world: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        let world = root.path().join("world");
        fs::create_dir_all(&world).unwrap();
        Self {
            _root: root,
            out,
            world,
        }
    }

    /// Top-level settings go in `top`, map settings in `map`, and `layer` becomes the single layer.
    fn config(&self, top: &str, map: &str, layer: &str) -> Config {
        Config::from_toml(&format!(
            "output_dir = {out:?}\nwriter_threads = 2\ntile_list_capacity = 8\n{top}\n\n\
             [[maps]]\nid = \"test\"\nworld = {{ dir = {world:?} }}\n{map}\n\n\
             [[maps.layers]]\nid = \"Base\"\n{layer}\n",
            out = self.out.display().to_string(),
            world = self.world.display().to_string(),
        ))
        .unwrap()
    }

    fn put_chunks(&self, chunks: &[(ChunkCoord, u8)]) {
        let mut regions: BTreeMap<RegionCoord, Vec<RawChunk>> = BTreeMap::new();
        for (coord, fill) in chunks {
            regions
                .entry(coord.region())
                .or_default()
                .push(RawChunk::new(*coord, vec![*fill; 256]));
        }
        for (region, chunks) in regions {
            write_region(&self.world, region, &chunks).unwrap();
        }
    }

    fn changed_lines(&self) -> Vec<PathBuf> {
        fs::read_to_string(self.out.join(CHANGED_FILE))
            .unwrap()
            .lines()
            .map(PathBuf::from)
            .collect()
    }
}

fn run(config: &Config) -> RunSummary {
    let mut renderer = MapRenderer::new(config.clone()).unwrap();
    renderer.run(&mut NullProgress).unwrap()
}

/// Raises the abort flag once `task` has reported `after` items (0 = as soon as it starts).
struct AbortDuring {
    flag: AbortFlag,
    task: Task,
    after: usize,
    current: Option<Task>,
}

impl AbortDuring {
    fn new(renderer: &MapRenderer, task: Task, after: usize) -> Self {
        Self {
            flag: renderer.abort_flag(),
            task,
            after,
            current: None,
        }
    }
}

impl ProgressListener for AbortDuring {
    fn on_task_started(&mut self, task: Task) {
        if task == self.task && self.after == 0 {
            self.flag.abort();
        }
        self.current = Some(task);
    }

    fn on_task_update(&mut self, done: usize, _total: usize) {
        if self.current.as_ref() == Some(&self.task) && done >= self.after {
            self.flag.abort();
        }
    }
}

fn run_aborting(config: &Config, task: Task, after: usize) -> RunSummary {
    let mut renderer = MapRenderer::new(config.clone()).unwrap();
    let mut progress = AbortDuring::new(&renderer, task, after);
    let summary = renderer.run(&mut progress).unwrap();
    assert!(summary.aborted);
    summary
}

fn files_under(dir: &std::path::Path) -> BTreeSet<PathBuf> {
    let mut out = BTreeSet::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return out;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(files_under(&path));
        } else {
            out.insert(path);
        }
    }
    out
}

fn tile_of(path: &std::path::Path) -> TileCoord {
    let stem = path.file_stem().unwrap().to_str().unwrap();
    let (x, y) = stem.strip_prefix("tile_").unwrap().split_once('_').unwrap();
    TileCoord::new(x.parse().unwrap(), y.parse().unwrap())
}

fn grid(n: i32, fill: u8) -> Vec<(ChunkCoord, u8)> {
    (0..n)
        .flat_map(|x| (0..n).map(move |z| (ChunkCoord::new(x, z), fill)))
        .collect()
}

const ONE_TILE: (&str, &str) = ("tile_size = 128\nnum_zoom_levels = 2", "closest_zoom = 2048");

#[test]
fn single_chunk_renders_once_then_nothing() {
    let fx = Fixture::new();
    fx.put_chunks(&[(ChunkCoord::new(0, 0), 1)]);
    let config = fx.config(ONE_TILE.0, ONE_TILE.1, "");

    let first = run(&config);
    assert!(!first.aborted);
    let map = &first.maps[0];
    assert_eq!((map.regions, map.chunks, map.visible_tiles), (1, 1, 1));
    assert_eq!(map.layers[0].changed_tiles, 1);
    assert_eq!(map.layers[0].tiles_rendered, 1);
    assert_eq!(map.layers[0].downsampled_tiles, 2);
    assert!(!map.layers[0].used_existing_cache);

    let base = zoom_dir(&fx.out, "test", "Base", 2);
    let tile = tile_image_path(&base, TileCoord::new(0, 0), ImageFormat::Png);
    let top = tile_image_path(&zoom_dir(&fx.out, "test", "Base", 0), TileCoord::new(0, 0), ImageFormat::Png);
    assert!(tile.is_file());
    assert!(top.is_file());
    assert_eq!(fx.changed_lines().len(), 3);
    assert_eq!(image::open(&tile).unwrap().to_rgb8().dimensions(), (128, 128));

    let second = run(&config);
    let layer = &second.maps[0].layers[0];
    assert_eq!(layer.changed_tiles, 0);
    assert_eq!(layer.tiles_rendered, 0);
    assert!(layer.used_existing_cache);
    assert!(fx.changed_lines().is_empty());
    assert!(top.is_file(), "coarse tiles survive a run that reuses the cache");
}

#[test]
fn second_run_over_unchanged_world_is_idempotent() {
    let fx = Fixture::new();
    let config = Config::from_toml(&format!(
        "output_dir = {:?}\ntile_size = 32\nnum_zoom_levels = 3\n\n\
         [[maps]]\nid = \"noise\"\nworld = {{ noise = {{ seed = 9, radius = 2 }} }}\nclosest_zoom = 64\n",
        fx.out.display().to_string()
    ))
    .unwrap();

    let first = run(&config);
    let rendered = first.maps[0].layers[0].tiles_rendered;
    assert_eq!(rendered, first.maps[0].visible_tiles);
    assert!(rendered > 0);
    let base = zoom_dir(&fx.out, "noise", "Base", 3);
    let tile = tile_image_path(&base, TileCoord::new(0, 0), ImageFormat::Png);
    let before = fs::read(&tile).ok();

    let second = run(&config);
    assert_eq!(second.maps[0].layers[0].tiles_rendered, 0);
    assert_eq!(second.maps[0].visible_tiles, first.maps[0].visible_tiles);
    assert_eq!(fs::read(&tile).ok(), before);
}

#[test]
fn changed_chunk_invalidates_only_its_tiles() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(16, 1));
    let config = fx.config("tile_size = 32\nnum_zoom_levels = 2", "closest_zoom = 256", "");
    let first = run(&config);
    assert_eq!(first.maps[0].chunks, 256);

    let target = ChunkCoord::new(3, 3);
    let mut chunks = grid(16, 1);
    for c in chunks.iter_mut().filter(|(c, _)| *c == target) {
        c.1 = 2;
    }
    fx.put_chunks(&chunks);
    let second = run(&config);

    let view = config.maps[0].tile_view(config.tile_size);
    let projector = TileProjector::for_view(view.tile_size, view.zoom, view.angle, view.elevation);
    let base = zoom_dir(&fx.out, "test", "Base", 2);
    let expected: BTreeSet<PathBuf> = projector
        .tiles_for_chunk(target)
        .map(|t| tile_image_path(&base, t, ImageFormat::Png))
        .collect();
    let rendered: BTreeSet<PathBuf> = fx
        .changed_lines()
        .into_iter()
        .filter(|p| p.starts_with(&base))
        .collect();
    assert_eq!(rendered, expected);
    assert_eq!(second.maps[0].layers[0].tiles_rendered, expected.len());
    assert!(expected.len() < second.maps[0].visible_tiles);
}

#[test]
fn configuration_change_invalidates_every_tile() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(3, 5));
    let first = run(&fx.config(ONE_TILE.0, "closest_zoom = 512", "background = [0, 0, 0]"));
    let visible = first.maps[0].visible_tiles;

    let changed = fx.config(ONE_TILE.0, "closest_zoom = 512", "background = [255, 255, 255]");
    let second = run(&changed);
    let layer = &second.maps[0].layers[0];
    assert!(!layer.used_existing_cache);
    assert_eq!(layer.changed_tiles, visible);
    assert_eq!(layer.tiles_rendered, visible);

    let third = run(&changed);
    assert_eq!(third.maps[0].layers[0].tiles_rendered, 0);
}

#[test]
fn max_tiles_renders_and_commits_exactly_that_many() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(8, 3));
    let top = "tile_size = 16\nnum_zoom_levels = 1\nmax_tiles = 10";
    let capped = fx.config(top, "closest_zoom = 32", "");

    let first = run(&capped);
    let visible = first.maps[0].visible_tiles;
    assert!(visible > 10, "only {visible} visible tiles");
    assert_eq!(first.maps[0].layers[0].changed_tiles, 10);
    assert_eq!(first.maps[0].layers[0].tiles_rendered, 10);

    let mut uncapped = capped.clone();
    uncapped.max_tiles = 0;
    let second = run(&uncapped);
    assert_eq!(second.maps[0].layers[0].tiles_rendered, visible - 10);
}

#[test]
fn disabled_cache_renders_everything_each_time() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(2, 7));
    let config = fx.config(&format!("{}\nuse_cache = false", ONE_TILE.0), "closest_zoom = 512", "");
    let first = run(&config);
    let second = run(&config);
    let visible = first.maps[0].visible_tiles;
    assert_eq!(second.maps[0].layers[0].tiles_rendered, visible);
    assert!(!second.maps[0].layers[0].used_existing_cache);
}

#[test]
fn abort_before_start_renders_nothing() {
    let fx = Fixture::new();
    fx.put_chunks(&[(ChunkCoord::new(0, 0), 1)]);
    let mut renderer = MapRenderer::new(fx.config(ONE_TILE.0, ONE_TILE.1, "")).unwrap();
    renderer.abort_flag().abort();
    let summary = renderer.run(&mut NullProgress).unwrap();
    assert!(summary.aborted);
    assert!(summary.maps.is_empty());
    assert_eq!(renderer.renderer().draw_count(), 0);
    assert!(fx.out.join(RENDER_STATS_FILE).is_file());
    assert!(fx.changed_lines().is_empty());
}

#[test]
fn corrupt_region_is_skipped_and_counted() {
    let fx = Fixture::new();
    fx.put_chunks(&[(ChunkCoord::new(0, 0), 1)]);
    fs::write(fx.world.join("r.3.3.region"), b"not a region").unwrap();
    let summary = run(&fx.config(ONE_TILE.0, ONE_TILE.1, ""));
    let map = &summary.maps[0];
    assert_eq!(map.regions_failed, 1);
    assert_eq!(map.regions, 1);
    assert_eq!(map.layers[0].tiles_rendered, 1);
    assert_eq!(summary.regions_failed(), 1);
}

#[test]
fn failing_map_does_not_stop_the_others() {
    let fx = Fixture::new();
    fx.put_chunks(&[(ChunkCoord::new(0, 0), 1)]);
    let mut config = fx.config(ONE_TILE.0, ONE_TILE.1, "");
    let mut broken = config.maps[0].clone();
    broken.id = "broken".into();
    broken.world = geist_map::WorldConfig::Dir(fx.world.join("missing"));
    config.maps.insert(0, broken);

    let summary = run(&config);
    assert_eq!(summary.maps_failed, 1);
    assert_eq!(summary.maps.len(), 1);
    assert_eq!(summary.maps[0].id, "test");
    assert_eq!(summary.tiles_rendered(), 1);
}

#[test]
fn metadata_is_written_per_map() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(2, 4));
    run(&fx.config(ONE_TILE.0, ONE_TILE.1, ""));

    let map_dir = fx.out.join("test");
    let vectors: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(map_dir.join(WORLD_VECTORS_FILE)).unwrap()).unwrap();
    assert_eq!(vectors["numChunks"], 4);
    assert_eq!(vectors["mapMin"], serde_json::json!([0, 0]));
    assert_eq!(vectors["mapSize"], serde_json::json!([128, 128]));
    let stats: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(map_dir.join(WORLD_STATS_FILE)).unwrap()).unwrap();
    assert_eq!(stats["numRegions"], 1);
    let run_stats: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(fx.out.join(RENDER_STATS_FILE)).unwrap()).unwrap();
    assert_eq!(run_stats["mapsFailed"], 0);
}

#[test]
fn generated_world_round_trips_through_region_files() {
    let fx = Fixture::new();
    let (regions, chunks) = geist_map::generate_world(&fx.world, 5, 3).unwrap();
    assert_eq!((regions, chunks), (4, 36));
    let summary = run(&fx.config(ONE_TILE.0, "closest_zoom = 1024", ""));
    assert_eq!(summary.maps[0].chunks, 36);
    assert!(summary.maps[0].layers[0].tiles_rendered > 0);
}

#[test]
fn image_format_change_invalidates_every_tile() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(3, 5));
    let first = run(&fx.config(ONE_TILE.0, "closest_zoom = 512", ""));
    let visible = first.maps[0].visible_tiles;

    let second = run(&fx.config(ONE_TILE.0, "closest_zoom = 512", "image_format = \"jpg\""));
    let layer = &second.maps[0].layers[0];
    assert!(!layer.used_existing_cache);
    assert_eq!(layer.changed_tiles, visible);
    assert_eq!(layer.tiles_rendered, visible);

    let base = zoom_dir(&fx.out, "test", "Base", 2);
    let on_disk = files_under(&base);
    assert_eq!(on_disk.len(), visible);
    assert!(on_disk.iter().all(|p| p.extension().unwrap() == "jpg"));
}

#[test]
fn configuration_change_clears_tiles_of_the_old_view() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(8, 3));
    let top = "tile_size = 16\nnum_zoom_levels = 1";
    let first = run(&fx.config(top, "closest_zoom = 32", ""));

    let narrowed = "closest_zoom = 32\nsubset = { origin = [8, 8], radius = 4 }";
    let second = run(&fx.config(top, narrowed, ""));
    let visible = second.maps[0].visible_tiles;
    assert!(visible > 0 && visible < first.maps[0].visible_tiles);
    assert_eq!(second.maps[0].layers[0].tiles_rendered, visible);

    let base = zoom_dir(&fx.out, "test", "Base", 1);
    let rendered: BTreeSet<PathBuf> = fx
        .changed_lines()
        .into_iter()
        .filter(|p| p.starts_with(&base))
        .collect();
    assert_eq!(files_under(&base), rendered);

    // Quadrants of children that are no longer visible hold only background.
    let background = image::Rgb([0x34, 0x34, 0x34]);
    let top_dir = zoom_dir(&fx.out, "test", "Base", 0);
    let parents: Vec<PathBuf> = fx
        .changed_lines()
        .into_iter()
        .filter(|p| p.starts_with(&top_dir))
        .collect();
    assert!(!parents.is_empty());
    let half = 8;
    for path in parents {
        let img = image::open(&path).unwrap().to_rgb8();
        for child in tile_of(&path).children() {
            if rendered.contains(&tile_image_path(&base, child, ImageFormat::Png)) {
                continue;
            }
            let (qx, qy) = child.quadrant();
            for y in qy * half..(qy + 1) * half {
                for x in qx * half..(qx + 1) * half {
                    assert_eq!(*img.get_pixel(x, y), background, "{} at {x},{y}", path.display());
                }
            }
        }
    }
}

#[test]
fn abort_while_rendering_keeps_finished_tiles_committed() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(16, 1));
    let config = fx.config("tile_size = 32\nnum_zoom_levels = 2", "closest_zoom = 256", "");
    let visible = run(&config).maps[0].visible_tiles;
    assert!(visible > 5);

    fx.put_chunks(&grid(16, 2));
    run_aborting(&config, Task::RenderBaseTiles, 5);
    let base = zoom_dir(&fx.out, "test", "Base", 2);
    let rendered = fx.changed_lines().into_iter().filter(|p| p.starts_with(&base)).count();
    assert_eq!(rendered, 5);

    let resumed = run(&config);
    let layer = &resumed.maps[0].layers[0];
    assert!(layer.used_existing_cache);
    assert_eq!(layer.changed_tiles, visible - 5);
    assert_eq!(layer.tiles_rendered, visible - 5);
}

#[test]
fn interrupted_downsample_is_finished_by_the_next_run() {
    let fx = Fixture::new();
    fx.put_chunks(&[(ChunkCoord::new(0, 0), 1)]);
    let config = fx.config(ONE_TILE.0, ONE_TILE.1, "");
    let top = tile_image_path(&zoom_dir(&fx.out, "test", "Base", 0), TileCoord::new(0, 0), ImageFormat::Png);

    run_aborting(&config, Task::Downsample { zoom: 1 }, 0);
    let base = tile_image_path(&zoom_dir(&fx.out, "test", "Base", 2), TileCoord::new(0, 0), ImageFormat::Png);
    assert!(base.is_file());
    assert!(!top.is_file());

    let resumed = run(&config);
    assert!(!resumed.aborted);
    assert!(top.is_file());
    assert_eq!(resumed.maps[0].layers[0].downsampled_tiles, 2);

    let settled = run(&config);
    let layer = &settled.maps[0].layers[0];
    assert!(layer.used_existing_cache);
    assert_eq!((layer.tiles_rendered, layer.downsampled_tiles), (0, 0));
}

#[test]
fn parents_of_tiles_committed_before_an_abort_are_rebuilt() {
    let fx = Fixture::new();
    fx.put_chunks(&grid(16, 1));
    let config = fx.config("tile_size = 32\nnum_zoom_levels = 2", "closest_zoom = 256", "");
    run(&config);

    let target = ChunkCoord::new(3, 3);
    let mut chunks = grid(16, 1);
    for c in chunks.iter_mut().filter(|(c, _)| *c == target) {
        c.1 = 2;
    }
    fx.put_chunks(&chunks);
    run_aborting(&config, Task::Downsample { zoom: 1 }, 0);

    let resumed = run(&config);
    let layer = &resumed.maps[0].layers[0];
    assert_eq!((layer.changed_tiles, layer.tiles_rendered), (0, 0));

    let view = config.maps[0].tile_view(config.tile_size);
    let projector = TileProjector::for_view(view.tile_size, view.zoom, view.angle, view.elevation);
    let level1 = zoom_dir(&fx.out, "test", "Base", 1);
    let expected: BTreeSet<PathBuf> = projector
        .tiles_for_chunk(target)
        .map(|t| tile_image_path(&level1, t.parent(), ImageFormat::Png))
        .collect();
    let rebuilt: BTreeSet<PathBuf> = fx
        .changed_lines()
        .into_iter()
        .filter(|p| p.starts_with(&level1))
        .collect();
    assert_eq!(rebuilt, expected);

    let settled = run(&config);
    assert_eq!(settled.maps[0].layers[0].downsampled_tiles, 0);
}
