use std::collections::BTreeSet;

use geist_runtime::{ImageFormat, ImageWriteQueue, WriteJob};
use image::{Rgb, RgbImage};

fn job(dir: &std::path::Path, i: u32, format: ImageFormat) -> WriteJob<u32> {
    let image = RgbImage::from_pixel(8, 8, Rgb([i as u8, 40, 200]));
    WriteJob {
        path: dir.join(format!("{}/tile_{i}.{}", i % 3, format.extension())),
        image,
        format,
        compression: 80,
        tag: i,
    }
}

#[test]
fn inline_queue_writes_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let mut q = ImageWriteQueue::new(0, 4).unwrap();
    q.submit(job(dir.path(), 1, ImageFormat::Png)).unwrap();
    let done = q.drain_completed();
    assert_eq!(done.len(), 1);
    assert!(done[0].is_ok());
    let img = image::open(dir.path().join("1/tile_1.png")).unwrap().to_rgb8();
    assert_eq!(img.get_pixel(3, 3), &Rgb([1, 40, 200]));
    assert_eq!(q.pending(), 0);
}

#[test]
fn pool_drain_returns_every_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let mut q = ImageWriteQueue::new(3, 2).unwrap();
    let mut seen = BTreeSet::new();
    for i in 0..40 {
        q.submit(job(dir.path(), i, ImageFormat::Png)).unwrap();
        for out in q.drain_completed() {
            assert!(out.is_ok());
            seen.insert(out.tag);
        }
    }
    for out in q.drain() {
        assert!(out.is_ok());
        seen.insert(out.tag);
    }
    assert_eq!(seen, (0..40).collect());
    assert_eq!(q.pending(), 0);
    assert!(dir.path().join("2/tile_38.png").is_file());
}

#[test]
fn failed_job_does_not_affect_siblings() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("blocker"), b"file").unwrap();
    let mut q = ImageWriteQueue::new(2, 4).unwrap();
    let mut bad = job(dir.path(), 99, ImageFormat::Png);
    bad.path = dir.path().join("blocker/tile.png");
    q.submit(bad).unwrap();
    q.submit(job(dir.path(), 1, ImageFormat::Jpg)).unwrap();
    q.submit(job(dir.path(), 2, ImageFormat::Png)).unwrap();
    let outcomes = q.drain();
    assert_eq!(outcomes.len(), 3);
    for out in outcomes {
        if out.tag == 99 {
            assert!(!out.is_ok());
        } else {
            assert!(out.is_ok(), "{:?}", out.result);
            assert!(out.path.is_file());
        }
    }
}
