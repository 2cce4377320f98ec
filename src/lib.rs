// src/lib.rs
//
// Directional line-crossing counts over per-frame tracked detections.
//
// Caller supplies a frame source and a detector/tracker; a session samples
// frames, feeds tracked boxes to the counting engine and emits cumulative
// in/out snapshots, either as an iterator (`CountingSession`) or through a
// bounded async channel (`spawn_session`).

pub mod config;
pub mod error;
pub mod geometry;
pub mod line_counter;
pub mod pipeline;
pub mod replay;
pub mod track_history;
pub mod types;

pub use error::SessionError;
pub use geometry::{Line, Point};
pub use line_counter::{CrossingEvent, Direction, FrameOutcome, LineCounter};
pub use pipeline::{
    spawn_session, CountingSession, CountingState, Detector, EndReason, FnDetector, FrameSource,
    SessionSummary, SnapshotStream,
};
pub use types::{BoundingBox, Config, DetectedObject, SessionConfig, StreamConfig, TrackId};
