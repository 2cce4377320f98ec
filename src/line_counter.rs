// src/line_counter.rs
//
// Directional line-crossing counter.
//
// A track is counted when its centroid changes half-plane between two
// consecutive sightings:
//   - previous and current side values must have strictly opposite signs
//     (a centroid exactly on the line is "not crossed yet")
//   - each track id is counted at most once per session, no matter how
//     often it crosses back and forth
//   - history is refreshed on every sighting, counted or not
//
// The in/out mapping is a fixed convention: a crossing that lands on the
// negative side of p1->p2 is IN, anything else is OUT.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

use crate::geometry::{strictly_opposite, Line, Point};
use crate::track_history::{TrackHistory, TrackStore};
use crate::types::{DetectedObject, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Direction of a crossing from the side value of the landing position.
    pub fn from_side(side_curr: i128) -> Self {
        if side_curr < 0 {
            Self::In
        } else {
            Self::Out
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }
}

/// A single counted crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrossingEvent {
    pub track_id: TrackId,
    pub class_label: String,
    pub direction: Direction,
    pub from: Point,
    pub to: Point,
}

/// What one detection batch did to the counter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub crossings: Vec<CrossingEvent>,
    /// Allowed-class detections without a track id.
    pub untracked: usize,
    /// Detections dropped by the class filter.
    pub filtered: usize,
    /// Allowed-class objects visible in this frame, per label.
    pub visible_by_class: BTreeMap<String, usize>,
}

impl FrameOutcome {
    pub fn visible_total(&self) -> usize {
        self.visible_by_class.values().sum()
    }
}

pub struct LineCounter<S: TrackStore = TrackHistory> {
    line: Line,
    allowed_classes: HashSet<String>,
    history: S,
    counted: HashSet<TrackId>,
    tracks_started: u64,
    in_count: u64,
    out_count: u64,
    frames_processed: u64,
}

impl LineCounter<TrackHistory> {
    pub fn new<I, L>(line: Line, allowed_classes: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self::with_store(line, allowed_classes, TrackHistory::new())
    }
}

impl<S: TrackStore> LineCounter<S> {
    pub fn with_store<I, L>(line: Line, allowed_classes: I, history: S) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let allowed_classes: HashSet<String> =
            allowed_classes.into_iter().map(Into::into).collect();

        if line.is_degenerate() {
            warn!(
                "Counting line {} has zero length; no crossing can be counted",
                line
            );
        }

        Self {
            line,
            allowed_classes,
            history,
            counted: HashSet::new(),
            tracks_started: 0,
            in_count: 0,
            out_count: 0,
            frames_processed: 0,
        }
    }

    /// Apply one processed frame's detections, in the order received.
    pub fn process(&mut self, detections: &[DetectedObject]) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        // Ids already evaluated this frame; duplicates only refresh history
        let mut evaluated: HashSet<TrackId> = HashSet::with_capacity(detections.len());

        for det in detections {
            if !self.allowed_classes.contains(&det.class_label) {
                outcome.filtered += 1;
                continue;
            }

            *outcome
                .visible_by_class
                .entry(det.class_label.clone())
                .or_insert(0) += 1;

            let Some(track_id) = det.track_id else {
                outcome.untracked += 1;
                continue;
            };

            let centroid = det.centroid();

            if self.history.get(track_id).is_none() && !self.counted.contains(&track_id) {
                self.tracks_started += 1;
                debug!(
                    "New track #{} ({}) at ({}, {})",
                    track_id, det.class_label, centroid.x, centroid.y
                );
            }

            if evaluated.insert(track_id) {
                if let Some(event) = self.evaluate(track_id, &det.class_label, centroid) {
                    outcome.crossings.push(event);
                }
            } else {
                debug!(
                    "Duplicate detection for track #{} in frame {}, history only",
                    track_id, self.frames_processed
                );
            }

            self.history.set(track_id, centroid);
        }

        self.history.end_frame();
        self.frames_processed += 1;
        outcome
    }

    fn evaluate(&mut self, track_id: TrackId, class_label: &str, centroid: Point) -> Option<CrossingEvent> {
        if self.counted.contains(&track_id) {
            return None;
        }
        let prev = self.history.get(track_id)?;

        let side_prev = self.line.side_of(prev);
        let side_curr = self.line.side_of(centroid);
        if !strictly_opposite(side_prev, side_curr) {
            return None;
        }

        let direction = Direction::from_side(side_curr);
        match direction {
            Direction::In => self.in_count += 1,
            Direction::Out => self.out_count += 1,
        }
        self.counted.insert(track_id);

        info!(
            "Track #{} ({}) crossed {}: in={} out={}",
            track_id,
            class_label,
            direction.as_str(),
            self.in_count,
            self.out_count
        );

        Some(CrossingEvent {
            track_id,
            class_label: class_label.to_string(),
            direction,
            from: prev,
            to: centroid,
        })
    }

    pub fn line(&self) -> Line {
        self.line
    }

    pub fn in_count(&self) -> u64 {
        self.in_count
    }

    pub fn out_count(&self) -> u64 {
        self.out_count
    }

    pub fn counted_len(&self) -> usize {
        self.counted.len()
    }

    pub fn is_counted(&self, track_id: TrackId) -> bool {
        self.counted.contains(&track_id)
    }

    /// Tracks that started this session. Exact distinct-id count with
    /// unbounded history; with idle eviction an uncounted track that comes
    /// back after being forgotten starts again.
    pub fn tracks_seen(&self) -> u64 {
        self.tracks_started
    }

    pub fn store(&self) -> &S {
        &self.history
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}
