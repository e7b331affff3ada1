use std::fmt;
use std::time::Instant;

/// Phases of a map run, as reported to a [`ProgressListener`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Task {
    ScanRegions,
    FindVisibleTiles,
    FindChangedTiles,
    RenderBaseTiles,
    Downsample { zoom: u32 },
    OutputMetadata,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::ScanRegions => f.write_str("scanning regions"),
            Task::FindVisibleTiles => f.write_str("finding visible tiles"),
            Task::FindChangedTiles => f.write_str("finding changed tiles"),
            Task::RenderBaseTiles => f.write_str("rendering base tiles"),
            Task::Downsample { zoom } => write!(f, "downsampling zoom level {zoom}"),
            Task::OutputMetadata => f.write_str("writing metadata"),
        }
    }
}

pub trait ProgressListener {
    fn on_task_started(&mut self, task: Task);
    fn on_task_update(&mut self, done: usize, total: usize);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl ProgressListener for NullProgress {
    fn on_task_started(&mut self, _task: Task) {}
    fn on_task_update(&mut self, _done: usize, _total: usize) {}
}

/// Logs task starts at `info` and every tenth of progress at `debug`.
pub struct LogProgress {
    task: Option<Task>,
    started: Instant,
    last_decile: usize,
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            task: None,
            started: Instant::now(),
            last_decile: 0,
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressListener for LogProgress {
    fn on_task_started(&mut self, task: Task) {
        if let Some(prev) = self.task.take() {
            log::debug!("{prev} took {:.2?}", self.started.elapsed());
        }
        log::info!("{task}");
        self.task = Some(task);
        self.started = Instant::now();
        self.last_decile = 0;
    }

    fn on_task_update(&mut self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let decile = done.saturating_mul(10) / total;
        if decile > self.last_decile {
            self.last_decile = decile;
            if let Some(task) = &self.task {
                log::debug!("{task}: {done}/{total}");
            }
        }
    }
}
