// src/track_history.rs
//
// Last-known centroid per track id. Owned by one LineCounter; never shared
// across sessions.

use std::collections::HashMap;
use tracing::debug;

use crate::geometry::Point;
use crate::types::TrackId;

/// Keyed position store behind the counting engine.
pub trait TrackStore {
    fn get(&self, track_id: TrackId) -> Option<Point>;

    fn set(&mut self, track_id: TrackId, centroid: Point);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Called once after every processed frame.
    fn end_frame(&mut self) {}
}

/// Unbounded history: entries live until the session ends.
#[derive(Debug, Default)]
pub struct TrackHistory {
    positions: HashMap<TrackId, Point>,
}

impl TrackHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackStore for TrackHistory {
    fn get(&self, track_id: TrackId) -> Option<Point> {
        self.positions.get(&track_id).copied()
    }

    fn set(&mut self, track_id: TrackId, centroid: Point) {
        self.positions.insert(track_id, centroid);
    }

    fn len(&self) -> usize {
        self.positions.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct IdleEntry {
    centroid: Point,
    last_seen: u64,
}

/// History that forgets tracks not refreshed for `max_idle_frames`
/// processed frames. Bounds memory on long-running streams.
#[derive(Debug)]
pub struct IdleEvictingHistory {
    entries: HashMap<TrackId, IdleEntry>,
    max_idle_frames: u64,
    frame: u64,
    evicted_total: u64,
}

impl IdleEvictingHistory {
    pub fn new(max_idle_frames: u64) -> Self {
        Self {
            entries: HashMap::new(),
            max_idle_frames,
            frame: 0,
            evicted_total: 0,
        }
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }
}

impl TrackStore for IdleEvictingHistory {
    fn get(&self, track_id: TrackId) -> Option<Point> {
        self.entries.get(&track_id).map(|e| e.centroid)
    }

    fn set(&mut self, track_id: TrackId, centroid: Point) {
        self.entries.insert(
            track_id,
            IdleEntry {
                centroid,
                last_seen: self.frame,
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn end_frame(&mut self) {
        let now = self.frame;
        let max_idle = self.max_idle_frames;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now - entry.last_seen <= max_idle);

        let removed = before - self.entries.len();
        if removed > 0 {
            self.evicted_total += removed as u64;
            debug!(
                "Evicted {} idle track(s) after frame {} ({} kept)",
                removed,
                now,
                self.entries.len()
            );
        }
        self.frame += 1;
    }
}

/// Either backing, picked from configuration at session start.
#[derive(Debug)]
pub enum HistoryBacking {
    Unbounded(TrackHistory),
    IdleEvicting(IdleEvictingHistory),
}

impl HistoryBacking {
    pub fn from_max_idle(max_idle_frames: Option<u64>) -> Self {
        match max_idle_frames {
            Some(max_idle) => Self::IdleEvicting(IdleEvictingHistory::new(max_idle)),
            None => Self::Unbounded(TrackHistory::new()),
        }
    }
}

impl TrackStore for HistoryBacking {
    fn get(&self, track_id: TrackId) -> Option<Point> {
        match self {
            Self::Unbounded(h) => h.get(track_id),
            Self::IdleEvicting(h) => h.get(track_id),
        }
    }

    fn set(&mut self, track_id: TrackId, centroid: Point) {
        match self {
            Self::Unbounded(h) => h.set(track_id, centroid),
            Self::IdleEvicting(h) => h.set(track_id, centroid),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Unbounded(h) => h.len(),
            Self::IdleEvicting(h) => h.len(),
        }
    }

    fn end_frame(&mut self) {
        match self {
            Self::Unbounded(h) => h.end_frame(),
            Self::IdleEvicting(h) => h.end_frame(),
        }
    }
}
