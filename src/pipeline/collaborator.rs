// src/pipeline/collaborator.rs
//
// Seams to the parts of the system that live outside the counting core:
// frame acquisition and the detector/tracker model. Both are owned by the
// caller and moved into a session, never held as global state.

use anyhow::Result;

use crate::types::DetectedObject;

/// Ordered, finite (or live) sequence of frames.
///
/// Dropping the source must release whatever it holds (file handles,
/// decoder state); sessions drop it as soon as they stop reading.
pub trait FrameSource {
    type Frame;

    /// Frame count when the source knows it up front.
    fn total_frames(&self) -> Option<u64>;

    /// Next frame, `Ok(None)` once exhausted.
    fn read_frame(&mut self) -> Result<Option<Self::Frame>>;
}

/// Detector + tracker producing tracked boxes for one frame.
pub trait Detector<F> {
    /// `confidence_threshold` is passed through from the session config as-is.
    fn detect(&mut self, frame: &F, confidence_threshold: Option<f32>) -> Result<Vec<DetectedObject>>;
}

/// Adapts a closure into a [`Detector`].
pub struct FnDetector<T>(pub T);

impl<F, T> Detector<F> for FnDetector<T>
where
    T: FnMut(&F, Option<f32>) -> Result<Vec<DetectedObject>>,
{
    fn detect(&mut self, frame: &F, confidence_threshold: Option<f32>) -> Result<Vec<DetectedObject>> {
        (self.0)(frame, confidence_threshold)
    }
}

/// In-memory source over pre-built frames.
#[derive(Debug)]
pub struct VecSource<F> {
    frames: std::vec::IntoIter<F>,
    total: u64,
    announce_total: bool,
}

impl<F> VecSource<F> {
    pub fn new(frames: Vec<F>) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into_iter(),
            total,
            announce_total: true,
        }
    }

    /// Behave like a live feed that does not know its length.
    pub fn live(frames: Vec<F>) -> Self {
        Self {
            announce_total: false,
            ..Self::new(frames)
        }
    }
}

impl<F> FrameSource for VecSource<F> {
    type Frame = F;

    fn total_frames(&self) -> Option<u64> {
        self.announce_total.then_some(self.total)
    }

    fn read_frame(&mut self) -> Result<Option<F>> {
        Ok(self.frames.next())
    }
}
