// src/pipeline/sampler.rs
//
// Fixed-stride frame subsampling. Bounds detector cost by forwarding only
// every Nth frame; skipped frames still advance the frame index.

use tracing::debug;

pub const DEFAULT_FRAME_STRIDE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleDecision {
    /// 0-based index of the frame just read from the source
    pub index: u64,
    pub forward: bool,
}

#[derive(Debug, Clone)]
pub struct FrameSampler {
    stride: u64,
    frames_seen: u64,
}

impl FrameSampler {
    /// `stride` of 0 is treated as 1; configuration validation rejects it
    /// before a sampler is ever built.
    pub fn new(stride: u32) -> Self {
        Self {
            stride: u64::from(stride.max(1)),
            frames_seen: 0,
        }
    }

    /// Register the next source frame and decide whether it goes to the detector.
    pub fn tick(&mut self) -> SampleDecision {
        let index = self.frames_seen;
        self.frames_seen += 1;

        let forward = index % self.stride == 0;
        if !forward {
            debug!("Frame {} skipped (stride {})", index, self.stride);
        }
        SampleDecision { index, forward }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// Index of the most recent frame, if any was read.
    pub fn last_index(&self) -> Option<u64> {
        self.frames_seen.checked_sub(1)
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_STRIDE)
    }
}
