use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpeg")]
    Jpg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpg => "jpg",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("writer pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("writer queue disconnected")]
    Disconnected,
}

pub struct WriteJob<T> {
    pub path: PathBuf,
    pub image: RgbImage,
    pub format: ImageFormat,
    /// 0..=100; JPEG quality, or PNG effort bucketed into fast/default/best.
    pub compression: u8,
    pub tag: T,
}

#[derive(Debug)]
pub struct WriteOutcome<T> {
    pub tag: T,
    pub path: PathBuf,
    pub result: Result<(), WriteError>,
}

impl<T> WriteOutcome<T> {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Encodes `image` and replaces `path` with it. Parent directories are created.
pub fn write_image_file(
    path: &Path,
    image: &RgbImage,
    format: ImageFormat,
    compression: u8,
) -> Result<(), WriteError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("{}.tmp", format.extension()));
    let encoded = (|| -> Result<(), WriteError> {
        let mut out = BufWriter::new(File::create(&tmp)?);
        match format {
            ImageFormat::Png => {
                let level = match compression {
                    0..=33 => CompressionType::Fast,
                    34..=66 => CompressionType::Default,
                    _ => CompressionType::Best,
                };
                PngEncoder::new_with_quality(&mut out, level, FilterType::Adaptive).write_image(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    ExtendedColorType::Rgb8,
                )?;
            }
            ImageFormat::Jpg => {
                JpegEncoder::new_with_quality(&mut out, compression.clamp(1, 100)).write_image(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    ExtendedColorType::Rgb8,
                )?;
            }
        }
        out.flush()?;
        Ok(())
    })();
    if let Err(err) = encoded {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn run_job<T>(job: WriteJob<T>) -> WriteOutcome<T> {
    let WriteJob {
        path,
        image,
        format,
        compression,
        tag,
    } = job;
    let result = write_image_file(&path, &image, format, compression);
    if let Err(err) = &result {
        log::warn!("failed to write {}: {err}", path.display());
    }
    WriteOutcome { tag, path, result }
}

/// Bounded queue of image encode/write jobs served by a worker pool.
///
/// `submit` blocks only while the queue is full. Outcomes are collected with
/// [`ImageWriteQueue::drain_completed`] (non-blocking) or [`ImageWriteQueue::drain`],
/// which waits until every submitted job has finished. With zero workers jobs run
/// inline on the caller's thread.
pub struct ImageWriteQueue<T: Send + 'static> {
    job_tx: Option<Sender<WriteJob<T>>>,
    res_tx: Sender<WriteOutcome<T>>,
    res_rx: Receiver<WriteOutcome<T>>,
    _pool: Option<ThreadPool>,
    submitted: usize,
    received: usize,
    workers: usize,
}

impl<T: Send + 'static> ImageWriteQueue<T> {
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self, WriteError> {
        let (res_tx, res_rx) = unbounded::<WriteOutcome<T>>();

        let (job_tx, pool) = if workers > 0 {
            let (job_tx, job_rx) = bounded::<WriteJob<T>>(queue_capacity.max(1));
            let pool = ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("geist-write-{i}"))
                .build()?;
            for _ in 0..workers {
                let rx = job_rx.clone();
                let tx = res_tx.clone();
                pool.spawn(move || {
                    while let Ok(job) = rx.recv() {
                        let outcome = run_job(job);
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            (Some(job_tx), Some(pool))
        } else {
            (None, None)
        };

        Ok(Self {
            job_tx,
            res_tx,
            res_rx,
            _pool: pool,
            submitted: 0,
            received: 0,
            workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn submit(&mut self, job: WriteJob<T>) -> Result<(), WriteError> {
        match &self.job_tx {
            Some(tx) => {
                if tx.send(job).is_err() {
                    return Err(WriteError::Disconnected);
                }
            }
            None => {
                let outcome = run_job(job);
                self.res_tx
                    .send(outcome)
                    .map_err(|_| WriteError::Disconnected)?;
            }
        }
        self.submitted += 1;
        Ok(())
    }

    /// Finished outcomes so far, without waiting.
    pub fn drain_completed(&mut self) -> Vec<WriteOutcome<T>> {
        let out: Vec<_> = self.res_rx.try_iter().collect();
        self.received += out.len();
        out
    }

    /// Waits for every submitted job and returns the outcomes not yet collected.
    pub fn drain(&mut self) -> Vec<WriteOutcome<T>> {
        let mut out = self.drain_completed();
        while self.received < self.submitted {
            match self.res_rx.recv() {
                Ok(outcome) => {
                    self.received += 1;
                    out.push(outcome);
                }
                Err(_) => break,
            }
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.submitted - self.received
    }
}

impl<T: Send + 'static> Drop for ImageWriteQueue<T> {
    fn drop(&mut self) {
        // Closing the job channel lets the workers fall out of their loops.
        self.job_tx.take();
    }
}
