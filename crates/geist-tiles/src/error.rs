use std::io;
use std::path::PathBuf;

use geist_world::RegionCoord;

#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("region hash record {coord} is unreadable: {reason}")]
    CorruptRegionRecord { coord: RegionCoord, reason: String },
    #[error("tile record {} is unreadable", .0.display())]
    CorruptTileRecord(PathBuf),
    #[error("pending downsample list {} is unreadable", .0.display())]
    CorruptPendingList(PathBuf),
    #[error("region hash store misuse: {0}")]
    Lifecycle(&'static str),
    #[error("aborted")]
    Aborted,
}
