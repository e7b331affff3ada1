//! Tile cache: decides which visible base tiles must be re-rendered.
//!
//! A tile is changed when caching is off, it has no record, the record was made
//! under a different configuration digest, or the combined fingerprint of the
//! chunks drawn into it differs. Records are only written through `commit_tile`,
//! after the tile's image was written.
//!
//! A layer pass is bracketed by `schedule_downsample` and `finish_layer`. The
//! scheduled tiles stay in `pending.tiles` until the pyramid above them is
//! written, and the configuration digest is stored only once the pyramid pass
//! returns, so an interrupted pass is picked up again by the next run.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use geist_runtime::{AbortFlag, ImageFormat, ProgressListener, Task};
use geist_world::{ChunkCoord, ChunkFingerprint, WorldSubset};
use sha2::{Digest, Sha256};

use crate::layout::tile_bucket_path;
use crate::{
    RegionHashIndex, TileCoord, TileError, TileProjector, TileSet, TileSetBuilder, TileSetFactory,
};

const DIGEST_FILE: &str = "options.digest";
const RECORD_EXT: &str = "hash";
const RECORD_LEN: usize = 64;
const PENDING_FILE: &str = "pending.tiles";
const PENDING_ENTRY_LEN: usize = 8;

/// Every setting that changes how a base tile looks.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheOptions {
    pub tile_size: u32,
    pub zoom: f32,
    pub camera_angle: f32,
    pub camera_elevation: f32,
    pub style: String,
    pub image_format: ImageFormat,
    pub image_compression: u8,
    pub background: [u8; 3],
    pub subset: WorldSubset,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigDigest(pub [u8; 32]);

impl ConfigDigest {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(s.get(i * 2..i * 2 + 2)?, 16).ok()?;
        }
        Some(Self(out))
    }
}

impl fmt::Debug for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigDigest({})", &self.to_hex()[..12])
    }
}

pub fn config_digest(o: &CacheOptions) -> ConfigDigest {
    let subset = match o.subset {
        WorldSubset::Full => "full".to_string(),
        WorldSubset::Circular {
            origin_x,
            origin_z,
            radius,
        } => format!("circle:{origin_x}:{origin_z}:{radius}"),
    };
    let canonical = format!(
        "tile_size={};zoom={:.4};angle={:.4};elevation={:.4};style={};format={};compression={};background={},{},{};subset={}",
        o.tile_size,
        o.zoom,
        o.camera_angle,
        o.camera_elevation,
        o.style,
        o.image_format.extension(),
        o.image_compression,
        o.background[0],
        o.background[1],
        o.background[2],
        subset,
    );
    ConfigDigest(Sha256::digest(canonical.as_bytes()).into())
}

/// Order-independent hash over `(chunk, fingerprint)` pairs.
pub fn combined_fingerprint(chunks: &[(ChunkCoord, ChunkFingerprint)]) -> [u8; 32] {
    let mut sorted = chunks.to_vec();
    sorted.sort_by_key(|(c, _)| *c);
    let mut h = Sha256::new();
    for (coord, fp) in &sorted {
        h.update(coord.x.to_le_bytes());
        h.update(coord.z.to_le_bytes());
        h.update(fp.as_bytes());
    }
    h.finalize().into()
}

/// Caps the changed set at `max` tiles (0 = unlimited), keeping the first in iteration order.
pub fn trim_tiles(
    changed: TileSet,
    factory: &TileSetFactory,
    max: usize,
) -> Result<TileSet, TileError> {
    if max == 0 || changed.len() <= max {
        return Ok(changed);
    }
    log::info!("limiting {} changed tiles to {max}", changed.len());
    Ok(changed.truncated(factory, max)?)
}

pub trait TileCache {
    /// True when records from a previous run with the same configuration are in use.
    fn is_using_existing_cache(&self) -> bool;

    fn find_changed_tiles(
        &self,
        visible: &TileSet,
        index: &RegionHashIndex,
        projector: &TileProjector,
        factory: &TileSetFactory,
        progress: &mut dyn ProgressListener,
        abort: &AbortFlag,
    ) -> Result<TileSet, TileError>;

    /// Records the tile's current fingerprint; call only once its image is on disk.
    fn commit_tile(
        &self,
        tile: TileCoord,
        index: &RegionHashIndex,
        projector: &TileProjector,
    ) -> Result<(), TileError>;

    /// Base tiles whose parents must be rebuilt this pass: `changed` plus whatever an
    /// interrupted pass left behind. The result is persisted until `finish_layer`.
    fn schedule_downsample(
        &self,
        changed: &TileSet,
        visible: &TileSet,
        factory: &TileSetFactory,
    ) -> Result<TileSet, TileError>;

    /// Call once the pyramid pass returned. Stores the configuration digest; the
    /// scheduled tiles are dropped only when every pyramid write succeeded.
    fn finish_layer(&self, pyramid_complete: bool) -> Result<(), TileError>;
}

fn copy_into(set: &TileSet, b: &mut TileSetBuilder) -> Result<(), TileError> {
    for tile in set.iter() {
        b.add(tile?)?;
    }
    Ok(())
}

/// Caching disabled: everything visible is changed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTileCache;

impl TileCache for NullTileCache {
    fn is_using_existing_cache(&self) -> bool {
        false
    }

    fn find_changed_tiles(
        &self,
        visible: &TileSet,
        _index: &RegionHashIndex,
        _projector: &TileProjector,
        factory: &TileSetFactory,
        progress: &mut dyn ProgressListener,
        abort: &AbortFlag,
    ) -> Result<TileSet, TileError> {
        progress.on_task_started(Task::FindChangedTiles);
        let total = visible.len();
        let mut b = factory.builder();
        for (i, tile) in visible.iter().enumerate() {
            if abort.is_aborted() {
                return Err(TileError::Aborted);
            }
            b.add(tile?)?;
            progress.on_task_update(i + 1, total);
        }
        Ok(b.finish()?)
    }

    fn commit_tile(
        &self,
        _tile: TileCoord,
        _index: &RegionHashIndex,
        _projector: &TileProjector,
    ) -> Result<(), TileError> {
        Ok(())
    }

    fn schedule_downsample(
        &self,
        changed: &TileSet,
        _visible: &TileSet,
        factory: &TileSetFactory,
    ) -> Result<TileSet, TileError> {
        let mut b = factory.builder();
        copy_into(changed, &mut b)?;
        Ok(b.finish()?)
    }

    fn finish_layer(&self, _pyramid_complete: bool) -> Result<(), TileError> {
        Ok(())
    }
}

/// Tile records under one layer directory, invalidated wholesale when the digest changes.
pub struct FileTileCache {
    dir: PathBuf,
    digest: ConfigDigest,
    using_existing: bool,
}

impl FileTileCache {
    pub fn open(dir: impl Into<PathBuf>, options: &CacheOptions) -> Result<Self, TileError> {
        let dir = dir.into();
        let digest = config_digest(options);
        let digest_path = dir.join(DIGEST_FILE);
        let previous = match fs::read_to_string(&digest_path) {
            Ok(s) => ConfigDigest::from_hex(&s),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("unreadable {}: {e}", digest_path.display());
                None
            }
        };
        let using_existing = previous == Some(digest);
        if !using_existing {
            if dir.exists() {
                log::info!(
                    "configuration changed for {}; discarding tile records",
                    dir.display()
                );
                fs::remove_dir_all(&dir)?;
            }
            fs::create_dir_all(&dir)?;
        }
        Ok(Self {
            dir,
            digest,
            using_existing,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn digest(&self) -> ConfigDigest {
        self.digest
    }

    fn record_path(&self, tile: TileCoord) -> PathBuf {
        tile_bucket_path(&self.dir, tile, RECORD_EXT)
    }

    fn pending_path(&self) -> PathBuf {
        self.dir.join(PENDING_FILE)
    }

    /// Tiles scheduled by a pass that never reached `finish_layer`.
    pub fn read_pending(&self) -> Result<Vec<TileCoord>, TileError> {
        let path = self.pending_path();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(_) => return Err(TileError::CorruptPendingList(path)),
        };
        if bytes.len() % PENDING_ENTRY_LEN != 0 {
            return Err(TileError::CorruptPendingList(path));
        }
        Ok(bytes
            .chunks_exact(PENDING_ENTRY_LEN)
            .map(|e| {
                TileCoord::new(
                    i32::from_le_bytes([e[0], e[1], e[2], e[3]]),
                    i32::from_le_bytes([e[4], e[5], e[6], e[7]]),
                )
            })
            .collect())
    }

    fn write_pending(&self, tiles: &TileSet) -> Result<(), TileError> {
        let path = self.pending_path();
        let tmp = path.with_extension("tiles.tmp");
        let mut out = BufWriter::new(File::create(&tmp)?);
        for tile in tiles.iter() {
            let tile = tile?;
            out.write_all(&tile.x.to_le_bytes())?;
            out.write_all(&tile.y.to_le_bytes())?;
        }
        out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// `(digest, combined fingerprint)` stored for `tile`, if any.
    pub fn read_record(&self, tile: TileCoord) -> Result<Option<(ConfigDigest, [u8; 32])>, TileError> {
        let path = self.record_path(tile);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(_) => return Err(TileError::CorruptTileRecord(path)),
        };
        if bytes.len() != RECORD_LEN {
            return Err(TileError::CorruptTileRecord(path));
        }
        let mut digest = [0u8; 32];
        let mut combined = [0u8; 32];
        digest.copy_from_slice(&bytes[..32]);
        combined.copy_from_slice(&bytes[32..]);
        Ok(Some((ConfigDigest(digest), combined)))
    }

    fn is_changed(&self, tile: TileCoord, index: &RegionHashIndex, projector: &TileProjector) -> bool {
        let combined = match projector.chunks_for_tile(tile, index) {
            Ok(chunks) => combined_fingerprint(&chunks),
            Err(err) => {
                log::debug!("{tile}: {err}; treating as changed");
                return true;
            }
        };
        match self.read_record(tile) {
            Ok(Some((digest, stored))) => digest != self.digest || stored != combined,
            Ok(None) => true,
            Err(err) => {
                log::debug!("{err}; treating {tile} as changed");
                true
            }
        }
    }
}

impl TileCache for FileTileCache {
    fn is_using_existing_cache(&self) -> bool {
        self.using_existing
    }

    fn find_changed_tiles(
        &self,
        visible: &TileSet,
        index: &RegionHashIndex,
        projector: &TileProjector,
        factory: &TileSetFactory,
        progress: &mut dyn ProgressListener,
        abort: &AbortFlag,
    ) -> Result<TileSet, TileError> {
        progress.on_task_started(Task::FindChangedTiles);
        let total = visible.len();
        let mut b = factory.builder();
        for (i, tile) in visible.iter().enumerate() {
            if abort.is_aborted() {
                return Err(TileError::Aborted);
            }
            let tile = tile?;
            if self.is_changed(tile, index, projector) {
                b.add(tile)?;
            }
            progress.on_task_update(i + 1, total);
        }
        let changed = b.finish()?;
        log::info!("{} of {total} visible tiles changed", changed.len());
        Ok(changed)
    }

    fn commit_tile(
        &self,
        tile: TileCoord,
        index: &RegionHashIndex,
        projector: &TileProjector,
    ) -> Result<(), TileError> {
        let combined = combined_fingerprint(&projector.chunks_for_tile(tile, index)?);
        let path = self.record_path(tile);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut bytes = Vec::with_capacity(RECORD_LEN);
        bytes.extend_from_slice(&self.digest.0);
        bytes.extend_from_slice(&combined);
        let tmp = path.with_extension("hash.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn schedule_downsample(
        &self,
        changed: &TileSet,
        visible: &TileSet,
        factory: &TileSetFactory,
    ) -> Result<TileSet, TileError> {
        let mut b = factory.builder();
        copy_into(changed, &mut b)?;
        match self.read_pending() {
            Ok(left) => {
                if !left.is_empty() {
                    log::info!("resuming downsampling above {} tiles from an earlier run", left.len());
                }
                for tile in left {
                    b.add(tile)?;
                }
            }
            Err(err) => {
                log::warn!("{err}; rebuilding the pyramid above every visible tile");
                copy_into(visible, &mut b)?;
            }
        }
        let scheduled = b.finish()?;
        if !scheduled.is_empty() {
            self.write_pending(&scheduled)?;
        }
        Ok(scheduled)
    }

    fn finish_layer(&self, pyramid_complete: bool) -> Result<(), TileError> {
        if pyramid_complete {
            match fs::remove_file(self.pending_path()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !self.using_existing {
            let digest_path = self.dir.join(DIGEST_FILE);
            let tmp = digest_path.with_extension("digest.tmp");
            fs::write(&tmp, format!("{}\n", self.digest.to_hex()))?;
            fs::rename(&tmp, &digest_path)?;
        }
        Ok(())
    }
}
