// src/pipeline/session.rs
//
// One counting run over one frame source and one fixed line.
//
// Signal flow per source frame:
//   read_frame -> sampler.tick -> (skipped | detector.detect -> counter.process)
//                                            -> CountingState snapshot
// After the source is exhausted (or fails) exactly one `ended` snapshot.
//
// All mutable state (history, counted set, counters) lives in SessionCore
// and dies with the session. Two sessions never share anything.

use anyhow::Result;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::collaborator::{Detector, FrameSource};
use super::metrics::{MetricsSummary, SessionMetrics};
use super::sampler::{FrameSampler, SampleDecision};
use super::snapshot::CountingState;
use crate::error::SessionError;
use crate::line_counter::LineCounter;
use crate::track_history::HistoryBacking;
use crate::types::{DetectedObject, SessionConfig};

/// Log a progress line every this many processed frames.
const PROGRESS_LOG_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Source ran out of frames.
    Exhausted,
    /// Source failed while reading; counts up to that point stand.
    SourceFailed,
    /// Consumer stopped listening.
    Cancelled,
    /// Detector exceeded the configured timeout.
    DetectorTimeout,
    /// Detector worker died (panicked) mid-call.
    DetectorAborted,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "EXHAUSTED",
            Self::SourceFailed => "SOURCE_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::DetectorTimeout => "DETECTOR_TIMEOUT",
            Self::DetectorAborted => "DETECTOR_ABORTED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub final_state: CountingState,
    pub end_reason: EndReason,
    pub tracks_seen: u64,
    pub metrics: MetricsSummary,
}

/// Counting state shared by the pull-based and the channel-based drivers.
pub(crate) struct SessionCore {
    counter: LineCounter<HistoryBacking>,
    sampler: FrameSampler,
    total_frames: Option<u64>,
    confidence_threshold: Option<f32>,
    metrics: SessionMetrics,
}

impl SessionCore {
    pub(crate) fn new(config: &SessionConfig, total_frames: Option<u64>) -> Self {
        let line = config.line();
        let history = HistoryBacking::from_max_idle(config.history_max_idle_frames);
        let counter = LineCounter::with_store(line, config.allowed_classes.iter().cloned(), history);

        info!(
            "Counting session: line={} stride={} classes={:?} total_frames={}",
            line,
            config.frame_stride,
            config.allowed_classes,
            total_frames.map_or_else(|| "unknown".to_string(), |t| t.to_string())
        );

        Self {
            counter,
            sampler: FrameSampler::new(config.frame_stride),
            total_frames,
            confidence_threshold: config.confidence_threshold,
            metrics: SessionMetrics::new(),
        }
    }

    pub(crate) fn metrics(&self) -> SessionMetrics {
        self.metrics.clone()
    }

    pub(crate) fn confidence_threshold(&self) -> Option<f32> {
        self.confidence_threshold
    }

    pub(crate) fn on_frame_read(&mut self) -> SampleDecision {
        self.metrics.inc(&self.metrics.frames_read);
        self.sampler.tick()
    }

    pub(crate) fn record_detector_time(&self, elapsed: Duration) {
        self.metrics
            .set_timing(&self.metrics.detector_time_us, elapsed.as_micros() as u64);
    }

    /// Fold one detector result into the counts. A failed call counts as an
    /// empty batch; the session keeps going.
    pub(crate) fn apply(&mut self, result: Result<Vec<DetectedObject>>) -> CountingState {
        let frame_index = self.sampler.last_index().unwrap_or(0);

        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.metrics.inc(&self.metrics.detector_failures);
                warn!(
                    "Detector failed on frame {}: {:#}. Treating as no detections",
                    frame_index, e
                );
                Vec::new()
            }
        };

        let outcome = self.counter.process(&detections);

        self.metrics.inc(&self.metrics.frames_processed);
        self.metrics
            .add(&self.metrics.detections, detections.len() as u64);
        self.metrics
            .add(&self.metrics.untracked_detections, outcome.untracked as u64);
        self.metrics
            .add(&self.metrics.crossings, outcome.crossings.len() as u64);

        debug!(
            "Frame {}: {} detection(s), visible={:?}, untracked={}, filtered={}",
            frame_index,
            detections.len(),
            outcome.visible_by_class,
            outcome.untracked,
            outcome.filtered
        );

        if self.counter.frames_processed() % PROGRESS_LOG_INTERVAL == 0 {
            info!(
                "Frame {}{}: in={} out={} | {} track(s) seen",
                frame_index,
                self.total_frames
                    .map(|t| format!("/{}", t))
                    .unwrap_or_default(),
                self.counter.in_count(),
                self.counter.out_count(),
                self.counter.tracks_seen()
            );
        }

        self.snapshot(false)
    }

    fn snapshot(&self, ended: bool) -> CountingState {
        CountingState {
            in_count: self.counter.in_count(),
            out_count: self.counter.out_count(),
            ended,
            total_frames: self.total_frames,
            current_frame: self.sampler.last_index().unwrap_or(0),
        }
    }

    pub(crate) fn final_snapshot(&self, reason: EndReason) -> CountingState {
        let state = self.snapshot(true);
        let summary = self.metrics.summary();

        match reason {
            EndReason::Exhausted => info!(
                "Session complete: in={} out={} after {} frame(s), {} processed ({:.1} FPS)",
                state.in_count,
                state.out_count,
                summary.frames_read,
                summary.frames_processed,
                summary.fps
            ),
            _ => warn!(
                "Session ended early ({}): in={} out={} at frame {}",
                reason.as_str(),
                state.in_count,
                state.out_count,
                state.current_frame
            ),
        }
        if summary.detector_failures > 0 {
            warn!(
                "{} detector call(s) failed and were counted as empty frames",
                summary.detector_failures
            );
        }

        state
    }

    pub(crate) fn summary(&self, reason: EndReason) -> SessionSummary {
        SessionSummary {
            final_state: self.snapshot(true),
            end_reason: reason,
            tracks_seen: self.counter.tracks_seen(),
            metrics: self.metrics.summary(),
        }
    }

    pub(crate) fn counter(&self) -> &LineCounter<HistoryBacking> {
        &self.counter
    }
}

/// Pull-based session: every `next()` advances the pipeline just far enough
/// to produce one snapshot. Finite and not restartable.
pub struct CountingSession<Src, Det>
where
    Src: FrameSource,
{
    core: SessionCore,
    source: Option<Src>,
    detector: Det,
    end_reason: Option<EndReason>,
    finished: bool,
}

impl<Src, Det> CountingSession<Src, Det>
where
    Src: FrameSource,
    Det: Detector<Src::Frame>,
{
    /// Validate the configuration and take ownership of the collaborators.
    /// Nothing is read from the source until the first `next()`.
    pub fn start(config: &SessionConfig, source: Src, detector: Det) -> Result<Self, SessionError> {
        config.validate()?;
        let core = SessionCore::new(config, source.total_frames());
        Ok(Self {
            core,
            source: Some(source),
            detector,
            end_reason: None,
            finished: false,
        })
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.core.metrics()
    }

    pub fn in_count(&self) -> u64 {
        self.core.counter().in_count()
    }

    pub fn out_count(&self) -> u64 {
        self.core.counter().out_count()
    }

    /// True while the frame source is still held.
    pub fn is_source_open(&self) -> bool {
        self.source.is_some()
    }

    /// Stop now and release the source. No further snapshots are produced;
    /// the last one handed out stands.
    pub fn cancel(&mut self) {
        if !self.finished {
            info!("Session cancelled by consumer");
            self.release(EndReason::Cancelled);
            self.finished = true;
        }
    }

    /// Available once the session has ended.
    pub fn summary(&self) -> Option<SessionSummary> {
        self.end_reason.map(|reason| self.core.summary(reason))
    }

    fn release(&mut self, reason: EndReason) {
        self.source = None;
        self.end_reason.get_or_insert(reason);
    }
}

impl<Src, Det> Iterator for CountingSession<Src, Det>
where
    Src: FrameSource,
    Det: Detector<Src::Frame>,
{
    type Item = CountingState;

    fn next(&mut self) -> Option<CountingState> {
        if self.finished {
            return None;
        }

        while let Some(source) = self.source.as_mut() {
            match source.read_frame() {
                Ok(Some(frame)) => {
                    if !self.core.on_frame_read().forward {
                        continue;
                    }
                    let started = Instant::now();
                    let result = self
                        .detector
                        .detect(&frame, self.core.confidence_threshold());
                    self.core.record_detector_time(started.elapsed());
                    return Some(self.core.apply(result));
                }
                Ok(None) => self.release(EndReason::Exhausted),
                Err(e) => {
                    error!("Frame source failed: {:#}", e);
                    self.release(EndReason::SourceFailed);
                }
            }
        }

        self.finished = true;
        let reason = self.end_reason.unwrap_or(EndReason::Exhausted);
        Some(self.core.final_snapshot(reason))
    }
}
