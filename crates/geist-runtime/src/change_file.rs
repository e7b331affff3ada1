use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only list of output files written during a run, one path per line.
pub struct ChangeFile {
    path: PathBuf,
    out: BufWriter<File>,
    lines: usize,
}

impl ChangeFile {
    /// Truncates any list left by a previous run.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            out,
            lines: 0,
        })
    }

    pub fn write_line(&mut self, written: &Path) -> io::Result<()> {
        writeln!(self.out, "{}", written.display())?;
        self.lines += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/changed.txt");
        let mut f = ChangeFile::create(&path).unwrap();
        f.write_line(Path::new("a/tile_0_0.png")).unwrap();
        f.write_line(Path::new("b/tile_1_0.png")).unwrap();
        assert_eq!(f.len(), 2);
        f.close().unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "a/tile_0_0.png\nb/tile_1_0.png\n");
    }
}
