// src/pipeline/metrics.rs
//
// Per-session counters. Cloning shares the same atomics, so a caller can
// keep a handle and watch a session that runs on another task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    pub frames_read: Arc<AtomicU64>,
    pub frames_processed: Arc<AtomicU64>,
    pub detections: Arc<AtomicU64>,
    pub untracked_detections: Arc<AtomicU64>,
    pub detector_failures: Arc<AtomicU64>,
    pub crossings: Arc<AtomicU64>,
    pub detector_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            frames_read: Arc::new(AtomicU64::new(0)),
            frames_processed: Arc::new(AtomicU64::new(0)),
            detections: Arc::new(AtomicU64::new(0)),
            untracked_detections: Arc::new(AtomicU64::new(0)),
            detector_failures: Arc::new(AtomicU64::new(0)),
            crossings: Arc::new(AtomicU64::new(0)),
            detector_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    /// Processed (detector) frames per second since the session started.
    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            untracked_detections: self.untracked_detections.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            crossings: self.crossings.load(Ordering::Relaxed),
            last_detector_us: self.detector_time_us.load(Ordering::Relaxed),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub detections: u64,
    pub untracked_detections: u64,
    pub detector_failures: u64,
    pub crossings: u64,
    pub last_detector_us: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
}
