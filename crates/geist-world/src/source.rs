use std::path::PathBuf;

use crate::{ChunkCoord, ChunkFingerprint, RegionCoord};

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("region {coord} is corrupt: {reason}")]
    CorruptRegion { coord: RegionCoord, reason: String },
    #[error("region {0} does not exist")]
    MissingRegion(RegionCoord),
}

impl WorldError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WorldError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Decoded chunk payload. The bytes are opaque to the map pipeline; only their hash matters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawChunk {
    pub coord: ChunkCoord,
    pub data: Vec<u8>,
}

impl RawChunk {
    pub fn new(coord: ChunkCoord, data: Vec<u8>) -> Self {
        Self { coord, data }
    }

    #[inline]
    pub fn fingerprint(&self) -> ChunkFingerprint {
        ChunkFingerprint::of(&self.data)
    }
}

/// A world laid out as regions of chunks.
pub trait WorldSource: Send + Sync {
    /// Human readable origin, for logs.
    fn describe(&self) -> String;

    /// Every region that may hold chunks, in a stable order.
    fn regions(&self) -> Result<Vec<RegionCoord>, WorldError>;

    fn open_region(&self, coord: RegionCoord) -> Result<Box<dyn RegionSource + '_>, WorldError>;
}

pub trait RegionSource {
    fn coord(&self) -> RegionCoord;

    /// Populated chunk coordinates, in a stable order.
    fn chunk_coords(&self) -> Vec<ChunkCoord>;

    /// `Ok(None)` when the slot is empty.
    fn load_chunk(&mut self, coord: ChunkCoord) -> Result<Option<RawChunk>, WorldError>;
}
