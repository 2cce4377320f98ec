// src/pipeline/mod.rs

pub mod collaborator;
pub mod metrics;
pub mod sampler;
pub mod session;
pub mod snapshot;
pub mod stream;

pub use collaborator::{Detector, FnDetector, FrameSource, VecSource};
pub use metrics::{MetricsSummary, SessionMetrics};
pub use sampler::{FrameSampler, SampleDecision, DEFAULT_FRAME_STRIDE};
pub use session::{CountingSession, EndReason, SessionSummary};
pub use snapshot::CountingState;
pub use stream::{spawn_session, SnapshotStream};
