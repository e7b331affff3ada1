//! Run statistics, logged at the end of a run and written to `renderStats.json`.
use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSummary {
    pub id: String,
    pub changed_tiles: usize,
    pub tiles_rendered: usize,
    pub tiles_failed: usize,
    pub writes_failed: usize,
    pub downsampled_tiles: usize,
    pub used_existing_cache: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSummary {
    pub id: String,
    pub regions: usize,
    pub regions_failed: usize,
    pub chunks: usize,
    pub visible_tiles: usize,
    pub layers: Vec<LayerSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub version: String,
    pub maps: Vec<MapSummary>,
    pub maps_failed: usize,
    pub aborted: bool,
    pub elapsed_secs: f64,
    pub changed_files: usize,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            ..Default::default()
        }
    }

    pub fn tiles_rendered(&self) -> usize {
        self.layers().map(|l| l.tiles_rendered).sum()
    }

    pub fn tiles_failed(&self) -> usize {
        self.layers().map(|l| l.tiles_failed).sum()
    }

    pub fn writes_failed(&self) -> usize {
        self.layers().map(|l| l.writes_failed).sum()
    }

    pub fn regions_failed(&self) -> usize {
        self.maps.iter().map(|m| m.regions_failed).sum()
    }

    fn layers(&self) -> impl Iterator<Item = &LayerSummary> {
        self.maps.iter().flat_map(|m| m.layers.iter())
    }

    pub fn log(&self) {
        log::info!(
            "render {} in {:.1}s: {} map(s), {} tiles rendered, {} failed, {} writes failed, {} regions failed, {} map(s) failed",
            if self.aborted { "aborted" } else { "complete" },
            self.elapsed_secs,
            self.maps.len(),
            self.tiles_rendered(),
            self.tiles_failed(),
            self.writes_failed(),
            self.regions_failed(),
            self.maps_failed,
        );
        for map in &self.maps {
            for layer in &map.layers {
                log::debug!(
                    "{}/{}: {} changed, {} rendered, {} downsampled{}",
                    map.id,
                    layer.id,
                    layer.changed_tiles,
                    layer.tiles_rendered,
                    layer.downsampled_tiles,
                    if layer.used_existing_cache { " (cached)" } else { "" },
                );
            }
        }
    }
}
