//! Runtime plumbing for map runs: the image write queue, the changed-file log,
//! progress reporting and cooperative abort.
#![forbid(unsafe_code)]

mod change_file;
mod progress;
mod writer;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use change_file::ChangeFile;
pub use progress::{LogProgress, NullProgress, ProgressListener, Task};
pub use writer::{
    ImageFormat, ImageWriteQueue, WriteError, WriteJob, WriteOutcome, write_image_file,
};

/// Shared cancellation flag, polled between chunks and tiles.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
