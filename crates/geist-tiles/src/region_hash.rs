//! Per-region chunk fingerprint records.
//!
//! A record `r.<x>.<z>.hashes` holds magic `GRH1`, a `u32` entry count and then
//! `count` entries of `i32 x, i32 z, [u8; 32] fingerprint`, little-endian.
//! Records are superseded wholesale each run.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use geist_world::{ChunkCoord, ChunkFingerprint, RegionCoord};
use hashbrown::HashMap;

use crate::TileError;

const MAGIC: &[u8; 4] = b"GRH1";
const ENTRY_LEN: usize = 4 + 4 + ChunkFingerprint::LEN;
const EXTENSION: &str = "hashes";

pub type RegionHashes = BTreeMap<ChunkCoord, ChunkFingerprint>;

fn record_name(coord: RegionCoord) -> String {
    format!("r.{}.{}.{EXTENSION}", coord.x, coord.z)
}

fn parse_record_name(name: &str) -> Option<RegionCoord> {
    let rest = name.strip_prefix("r.")?.strip_suffix(".hashes")?;
    let (x, z) = rest.split_once('.')?;
    Some(RegionCoord::new(x.parse().ok()?, z.parse().ok()?))
}

fn encode(hashes: &RegionHashes) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + hashes.len() * ENTRY_LEN);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(hashes.len() as u32).to_le_bytes());
    for (coord, fp) in hashes {
        buf.extend_from_slice(&coord.x.to_le_bytes());
        buf.extend_from_slice(&coord.z.to_le_bytes());
        buf.extend_from_slice(fp.as_bytes());
    }
    buf
}

fn decode(coord: RegionCoord, bytes: &[u8]) -> Result<RegionHashes, TileError> {
    let corrupt = |reason: &str| TileError::CorruptRegionRecord {
        coord,
        reason: reason.to_string(),
    };
    if bytes.len() < 8 || &bytes[..4] != MAGIC {
        return Err(corrupt("bad header"));
    }
    let count = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let body = &bytes[8..];
    if body.len() != count * ENTRY_LEN {
        return Err(corrupt("length does not match entry count"));
    }
    let mut out = RegionHashes::new();
    for entry in body.chunks_exact(ENTRY_LEN) {
        let x = i32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let z = i32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
        let chunk = ChunkCoord::new(x, z);
        if !coord.contains(chunk) {
            return Err(corrupt("entry outside region"));
        }
        let mut fp = [0u8; ChunkFingerprint::LEN];
        fp.copy_from_slice(&entry[8..]);
        out.insert(chunk, ChunkFingerprint(fp));
    }
    Ok(out)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Writes this run's region records: `start_region`, `add_hash`*, `end_region` per region,
/// then `finish` to prune stale records and read them back.
pub struct RegionHashStore {
    dir: PathBuf,
    open: Option<(RegionCoord, RegionHashes)>,
    written: BTreeMap<RegionCoord, usize>,
}

impl RegionHashStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, TileError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            open: None,
            written: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, coord: RegionCoord) -> PathBuf {
        self.dir.join(record_name(coord))
    }

    /// Removes any existing record for `coord` and opens it for new hashes.
    pub fn start_region(&mut self, coord: RegionCoord) -> Result<(), TileError> {
        if let Some((prev, _)) = self.open.take() {
            log::warn!("region {prev} was never ended; discarding its hashes");
        }
        match fs::remove_file(self.record_path(coord)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.written.remove(&coord);
        self.open = Some((coord, RegionHashes::new()));
        Ok(())
    }

    /// Last write wins for a chunk added twice.
    pub fn add_hash(&mut self, chunk: ChunkCoord, fp: ChunkFingerprint) -> Result<(), TileError> {
        let Some((coord, hashes)) = self.open.as_mut() else {
            return Err(TileError::Lifecycle("add_hash without an open region"));
        };
        if !coord.contains(chunk) {
            return Err(TileError::Lifecycle("chunk outside the open region"));
        }
        hashes.insert(chunk, fp);
        Ok(())
    }

    pub fn end_region(&mut self) -> Result<(), TileError> {
        let Some((coord, hashes)) = self.open.take() else {
            return Err(TileError::Lifecycle("end_region without an open region"));
        };
        write_atomic(&self.record_path(coord), &encode(&hashes))?;
        log::trace!("region {coord}: {} chunk hashes", hashes.len());
        self.written.insert(coord, hashes.len());
        Ok(())
    }

    /// Drops the open region without writing it; its record stays removed.
    pub fn abandon_region(&mut self) {
        if let Some((coord, _)) = self.open.take() {
            log::debug!("abandoned hashes for region {coord}");
        }
    }

    /// Deletes records of regions not written this run and returns a reader over the rest.
    pub fn finish(mut self, lru_capacity: usize) -> Result<RegionHashIndex, TileError> {
        self.abandon_region();
        let mut pruned = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let stale = match parse_record_name(name) {
                Some(coord) => !self.written.contains_key(&coord),
                None => name.ends_with(".tmp"),
            };
            if stale {
                fs::remove_file(entry.path())?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            log::debug!("pruned {pruned} stale region records in {}", self.dir.display());
        }
        Ok(RegionHashIndex {
            dir: self.dir,
            regions: self.written,
            cache: RecordCache::new(lru_capacity),
            empty: Arc::new(RegionHashes::new()),
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RegionIndexStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Small LRU of decoded region records.
struct RecordCache {
    entries: RwLock<HashMap<RegionCoord, Arc<RegionHashes>>>,
    order: Mutex<VecDeque<RegionCoord>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl RecordCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn get(&self, coord: RegionCoord) -> Option<Arc<RegionHashes>> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&coord)
            .cloned();
        match found {
            Some(hashes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(pos) = order.iter().position(|c| *c == coord) {
                    order.remove(pos);
                }
                order.push_back(coord);
                Some(hashes)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn insert(&self, coord: RegionCoord, hashes: Arc<RegionHashes>) {
        let victims: Vec<RegionCoord> = {
            let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(pos) = order.iter().position(|c| *c == coord) {
                order.remove(pos);
            }
            order.push_back(coord);
            let excess = order.len().saturating_sub(self.capacity);
            order.drain(..excess).collect()
        };
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(coord, hashes);
        for victim in victims {
            if entries.remove(&victim).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn stats(&self) -> RegionIndexStats {
        RegionIndexStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.read().map(|m| m.len()).unwrap_or(0),
        }
    }
}

/// Read side of the records written in the current run.
pub struct RegionHashIndex {
    dir: PathBuf,
    regions: BTreeMap<RegionCoord, usize>,
    cache: RecordCache,
    empty: Arc<RegionHashes>,
}

impl RegionHashIndex {
    pub fn regions(&self) -> impl Iterator<Item = RegionCoord> + '_ {
        self.regions.keys().copied()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.regions.values().sum()
    }

    pub fn contains_region(&self, coord: RegionCoord) -> bool {
        self.regions.contains_key(&coord)
    }

    /// Hashes recorded for `coord`; empty for regions not scanned this run.
    pub fn region_hashes(&self, coord: RegionCoord) -> Result<Arc<RegionHashes>, TileError> {
        if !self.regions.contains_key(&coord) {
            return Ok(self.empty.clone());
        }
        if let Some(hashes) = self.cache.get(coord) {
            return Ok(hashes);
        }
        let bytes = fs::read(self.dir.join(record_name(coord))).map_err(|e| {
            TileError::CorruptRegionRecord {
                coord,
                reason: e.to_string(),
            }
        })?;
        let hashes = Arc::new(decode(coord, &bytes)?);
        self.cache.insert(coord, hashes.clone());
        Ok(hashes)
    }

    pub fn stats(&self) -> RegionIndexStats {
        self.cache.stats()
    }
}
