//! Ordered, deduplicated tile collections that spill to disk past a size threshold.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::slice;

use tempfile::NamedTempFile;

use crate::{TileBounds, TileCoord};

const RECORD_LEN: usize = 8;

/// Creates tile sets sharing one spill directory and in-memory threshold.
#[derive(Clone, Debug)]
pub struct TileSetFactory {
    dir: PathBuf,
    capacity: usize,
}

impl TileSetFactory {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            capacity: capacity.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn builder(&self) -> TileSetBuilder {
        TileSetBuilder {
            factory: self.clone(),
            buffer: BTreeSet::new(),
            spill: None,
            bounds: None,
        }
    }

    pub fn collect(&self, tiles: impl IntoIterator<Item = TileCoord>) -> io::Result<TileSet> {
        let mut b = self.builder();
        for t in tiles {
            b.add(t)?;
        }
        b.finish()
    }
}

struct Spill {
    file: NamedTempFile,
    len: usize,
}

impl Spill {
    fn reader(&self) -> io::Result<SpillReader> {
        Ok(SpillReader {
            reader: BufReader::new(self.file.reopen()?),
            remaining: self.len,
        })
    }
}

struct SpillReader {
    reader: BufReader<File>,
    remaining: usize,
}

impl Iterator for SpillReader {
    type Item = io::Result<TileCoord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let mut rec = [0u8; RECORD_LEN];
        if let Err(e) = self.reader.read_exact(&mut rec) {
            self.remaining = 0;
            return Some(Err(e));
        }
        let x = i32::from_le_bytes([rec[0], rec[1], rec[2], rec[3]]);
        let y = i32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]);
        Some(Ok(TileCoord::new(x, y)))
    }
}

/// Merges a sorted spill stream with a sorted buffer, writing each distinct tile once.
fn merge_sorted(
    out: &mut impl Write,
    mut spilled: impl Iterator<Item = io::Result<TileCoord>>,
    mut buffered: impl Iterator<Item = TileCoord>,
) -> io::Result<usize> {
    let mut a = spilled.next().transpose()?;
    let mut b = buffered.next();
    let mut last: Option<TileCoord> = None;
    let mut written = 0;
    loop {
        let next = match (a, b) {
            (None, None) => break,
            (Some(x), Some(y)) if x <= y => {
                a = spilled.next().transpose()?;
                x
            }
            (Some(x), None) => {
                a = spilled.next().transpose()?;
                x
            }
            (_, Some(y)) => {
                b = buffered.next();
                y
            }
        };
        if last != Some(next) {
            out.write_all(&next.x.to_le_bytes())?;
            out.write_all(&next.y.to_le_bytes())?;
            written += 1;
            last = Some(next);
        }
    }
    Ok(written)
}

pub struct TileSetBuilder {
    factory: TileSetFactory,
    buffer: BTreeSet<TileCoord>,
    spill: Option<Spill>,
    bounds: Option<TileBounds>,
}

impl TileSetBuilder {
    pub fn add(&mut self, tile: TileCoord) -> io::Result<()> {
        match &mut self.bounds {
            Some(b) => b.include(tile),
            None => self.bounds = Some(TileBounds::of(tile)),
        }
        self.buffer.insert(tile);
        if self.buffer.len() >= self.factory.capacity {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> io::Result<()> {
        let buffered = mem::take(&mut self.buffer);
        let mut out = BufWriter::new(NamedTempFile::new_in(&self.factory.dir)?);
        let len = match &self.spill {
            Some(prev) => merge_sorted(&mut out, prev.reader()?, buffered.into_iter())?,
            None => merge_sorted(&mut out, std::iter::empty(), buffered.into_iter())?,
        };
        let file = out.into_inner().map_err(|e| e.into_error())?;
        log::trace!("tile set spilled {len} tiles to {}", file.path().display());
        // Replacing the old run deletes its file.
        self.spill = Some(Spill { file, len });
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<TileSet> {
        let storage = if self.spill.is_none() {
            Storage::Memory(mem::take(&mut self.buffer).into_iter().collect())
        } else {
            if !self.buffer.is_empty() {
                self.spill()?;
            }
            match self.spill.take() {
                Some(spill) => Storage::Disk(spill),
                None => Storage::Memory(Vec::new()),
            }
        };
        Ok(TileSet {
            storage,
            bounds: self.bounds,
        })
    }
}

enum Storage {
    Memory(Vec<TileCoord>),
    Disk(Spill),
}

/// Sealed set of distinct tiles, iterated in ascending `(x, y)` order.
pub struct TileSet {
    storage: Storage,
    bounds: Option<TileBounds>,
}

impl TileSet {
    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Memory(v) => v.len(),
            Storage::Disk(s) => s.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::Disk(_))
    }

    /// Smallest rectangle covering every member; `None` when empty.
    pub fn bounds(&self) -> Option<TileBounds> {
        self.bounds
    }

    pub fn iter(&self) -> TileSetIter<'_> {
        let inner = match &self.storage {
            Storage::Memory(v) => IterInner::Memory(v.iter()),
            Storage::Disk(s) => match s.reader() {
                Ok(r) => IterInner::Disk(r),
                Err(e) => IterInner::Failed(Some(e)),
            },
        };
        TileSetIter { inner }
    }

    pub fn to_vec(&self) -> io::Result<Vec<TileCoord>> {
        self.iter().collect()
    }

    /// The first `max` tiles in iteration order.
    pub fn truncated(&self, factory: &TileSetFactory, max: usize) -> io::Result<TileSet> {
        let mut b = factory.builder();
        for tile in self.iter().take(max) {
            b.add(tile?)?;
        }
        b.finish()
    }

    /// Parents of every member, i.e. the next coarser zoom level.
    pub fn parents(&self, factory: &TileSetFactory) -> io::Result<TileSet> {
        let mut b = factory.builder();
        for tile in self.iter() {
            b.add(tile?.parent())?;
        }
        b.finish()
    }
}

pub struct TileSetIter<'a> {
    inner: IterInner<'a>,
}

enum IterInner<'a> {
    Memory(slice::Iter<'a, TileCoord>),
    Disk(SpillReader),
    Failed(Option<io::Error>),
}

impl Iterator for TileSetIter<'_> {
    type Item = io::Result<TileCoord>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterInner::Memory(it) => it.next().copied().map(Ok),
            IterInner::Disk(r) => r.next(),
            IterInner::Failed(err) => err.take().map(Err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sets_stay_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let f = TileSetFactory::new(dir.path(), 16).unwrap();
        let set = f
            .collect([TileCoord::new(3, 1), TileCoord::new(-2, 0), TileCoord::new(3, 1)])
            .unwrap();
        assert!(!set.is_spilled());
        assert_eq!(
            set.to_vec().unwrap(),
            vec![TileCoord::new(-2, 0), TileCoord::new(3, 1)]
        );
    }

    #[test]
    fn spilled_sets_merge_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let f = TileSetFactory::new(dir.path(), 4).unwrap();
        let mut b = f.builder();
        for i in (0..30).rev() {
            b.add(TileCoord::new(i % 7, i % 3)).unwrap();
        }
        let set = b.finish().unwrap();
        assert!(set.is_spilled());
        let tiles = set.to_vec().unwrap();
        let expected: BTreeSet<_> = (0..30).map(|i| TileCoord::new(i % 7, i % 3)).collect();
        assert_eq!(tiles, expected.into_iter().collect::<Vec<_>>());
        assert_eq!(set.len(), tiles.len());
    }

    #[test]
    fn spill_files_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let f = TileSetFactory::new(dir.path(), 2).unwrap();
        let set = f.collect((0..10).map(|i| TileCoord::new(i, 0))).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        drop(set);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
