//! Region directory world: one framed file per region.
//!
//! File `r.<x>.<z>.region`: magic `GRG1`, `u32` entry count, then per entry
//! `i32 x, i32 z, u32 len, len bytes`. Little-endian throughout.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{ChunkCoord, RawChunk, RegionCoord, RegionSource, WorldError, WorldSource};

const MAGIC: &[u8; 4] = b"GRG1";
const EXTENSION: &str = "region";

pub fn region_file_name(coord: RegionCoord) -> String {
    format!("r.{}.{}.{EXTENSION}", coord.x, coord.z)
}

fn parse_region_file_name(name: &str) -> Option<RegionCoord> {
    let rest = name.strip_prefix("r.")?.strip_suffix(".region")?;
    let (x, z) = rest.split_once('.')?;
    Some(RegionCoord::new(x.parse().ok()?, z.parse().ok()?))
}

/// Writes (or replaces) the file for one region. Chunks outside the region are rejected.
pub fn write_region(
    dir: &Path,
    coord: RegionCoord,
    chunks: &[RawChunk],
) -> Result<PathBuf, WorldError> {
    let mut buf = Vec::with_capacity(8 + chunks.iter().map(|c| 12 + c.data.len()).sum::<usize>());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for chunk in chunks {
        if !coord.contains(chunk.coord) {
            return Err(WorldError::CorruptRegion {
                coord,
                reason: format!("chunk {} lies outside the region", chunk.coord),
            });
        }
        buf.extend_from_slice(&chunk.coord.x.to_le_bytes());
        buf.extend_from_slice(&chunk.coord.z.to_le_bytes());
        buf.extend_from_slice(&(chunk.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&chunk.data);
    }

    fs::create_dir_all(dir).map_err(|e| WorldError::io(dir, e))?;
    let path = dir.join(region_file_name(coord));
    let tmp = path.with_extension("region.tmp");
    {
        let mut f = fs::File::create(&tmp).map_err(|e| WorldError::io(&tmp, e))?;
        f.write_all(&buf).map_err(|e| WorldError::io(&tmp, e))?;
        f.sync_all().map_err(|e| WorldError::io(&tmp, e))?;
    }
    fs::rename(&tmp, &path).map_err(|e| WorldError::io(&path, e))?;
    Ok(path)
}

fn decode_region(coord: RegionCoord, bytes: &[u8]) -> Result<BTreeMap<ChunkCoord, Vec<u8>>, WorldError> {
    let corrupt = |reason: &str| WorldError::CorruptRegion {
        coord,
        reason: reason.to_string(),
    };
    let mut cur = Cursor { bytes, pos: 0 };
    if cur.take(4).ok_or_else(|| corrupt("truncated header"))? != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let count = cur.u32().ok_or_else(|| corrupt("truncated header"))?;
    let mut chunks = BTreeMap::new();
    for _ in 0..count {
        let x = cur.i32().ok_or_else(|| corrupt("truncated entry"))?;
        let z = cur.i32().ok_or_else(|| corrupt("truncated entry"))?;
        let len = cur.u32().ok_or_else(|| corrupt("truncated entry"))? as usize;
        let data = cur.take(len).ok_or_else(|| corrupt("truncated payload"))?;
        let chunk = ChunkCoord::new(x, z);
        if !coord.contains(chunk) {
            return Err(corrupt("entry outside region"));
        }
        chunks.insert(chunk, data.to_vec());
    }
    if cur.pos != bytes.len() {
        return Err(corrupt("trailing bytes"));
    }
    Ok(chunks)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Option<i32> {
        self.take(4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// World read from a directory of `r.<x>.<z>.region` files.
pub struct RegionDirWorld {
    dir: PathBuf,
}

impl RegionDirWorld {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, WorldError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(WorldError::io(
                &dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "world directory not found"),
            ));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl WorldSource for RegionDirWorld {
    fn describe(&self) -> String {
        format!("region dir {}", self.dir.display())
    }

    fn regions(&self) -> Result<Vec<RegionCoord>, WorldError> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| WorldError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| WorldError::io(&self.dir, e))?;
            if let Some(coord) = entry.file_name().to_str().and_then(parse_region_file_name) {
                out.push(coord);
            }
        }
        out.sort();
        Ok(out)
    }

    fn open_region(&self, coord: RegionCoord) -> Result<Box<dyn RegionSource + '_>, WorldError> {
        let path = self.dir.join(region_file_name(coord));
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorldError::MissingRegion(coord));
            }
            Err(e) => return Err(WorldError::io(&path, e)),
        };
        let chunks = decode_region(coord, &bytes)?;
        log::trace!("opened {} with {} chunks", path.display(), chunks.len());
        Ok(Box::new(LoadedRegion { coord, chunks }))
    }
}

/// A region whose chunk payloads are already in memory.
pub(crate) struct LoadedRegion {
    pub(crate) coord: RegionCoord,
    pub(crate) chunks: BTreeMap<ChunkCoord, Vec<u8>>,
}

impl RegionSource for LoadedRegion {
    fn coord(&self) -> RegionCoord {
        self.coord
    }

    fn chunk_coords(&self) -> Vec<ChunkCoord> {
        self.chunks.keys().copied().collect()
    }

    fn load_chunk(&mut self, coord: ChunkCoord) -> Result<Option<RawChunk>, WorldError> {
        Ok(self
            .chunks
            .get(&coord)
            .map(|data| RawChunk::new(coord, data.clone())))
    }
}
