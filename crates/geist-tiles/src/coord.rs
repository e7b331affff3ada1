use std::fmt;

use serde::{Deserialize, Serialize};

/// Tile position within one zoom level. Ordered by `x`, then `y`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Tile one level coarser that covers this one.
    #[inline]
    pub fn parent(self) -> Self {
        Self::new(self.x.div_euclid(2), self.y.div_euclid(2))
    }

    /// The four tiles one level finer, in `(i, j)` order `(0,0), (1,0), (0,1), (1,1)`.
    pub fn children(self) -> [TileCoord; 4] {
        let (x, y) = (self.x * 2, self.y * 2);
        [
            Self::new(x, y),
            Self::new(x + 1, y),
            Self::new(x, y + 1),
            Self::new(x + 1, y + 1),
        ]
    }

    /// Position inside the parent: `(x mod 2, y mod 2)`.
    #[inline]
    pub fn quadrant(self) -> (u32, u32) {
        (self.x.rem_euclid(2) as u32, self.y.rem_euclid(2) as u32)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile({}, {})", self.x, self.y)
    }
}

/// Inclusive rectangle of tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileBounds {
    pub min: TileCoord,
    pub max: TileCoord,
}

impl TileBounds {
    pub fn of(tile: TileCoord) -> Self {
        Self {
            min: tile,
            max: tile,
        }
    }

    pub fn include(&mut self, tile: TileCoord) {
        self.min.x = self.min.x.min(tile.x);
        self.min.y = self.min.y.min(tile.y);
        self.max.x = self.max.x.max(tile.x);
        self.max.y = self.max.y.max(tile.y);
    }

    pub fn contains(&self, tile: TileCoord) -> bool {
        (self.min.x..=self.max.x).contains(&tile.x) && (self.min.y..=self.max.y).contains(&tile.y)
    }

    pub fn width(&self) -> u32 {
        (self.max.x - self.min.x + 1) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max.y - self.min.y + 1) as u32
    }

    /// Bounds of the parents of every tile inside.
    pub fn parents(&self) -> Self {
        Self {
            min: self.min.parent(),
            max: self.max.parent(),
        }
    }
}
