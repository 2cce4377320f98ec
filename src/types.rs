// src/types.rs

use serde::{Deserialize, Deserializer, Serialize};

use crate::geometry::Point;

/// Tracker-assigned identifier, stable across frames for one physical object.
pub type TrackId = i64;

/// Raw id the tracker reports when it has lost identity for a box.
pub const NO_TRACK_ID: TrackId = -1;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub session: SessionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub line: LineConfig,
    pub allowed_classes: Vec<String>,
    #[serde(default = "default_frame_stride")]
    pub frame_stride: u32,
    /// Handed to the detector untouched.
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
    /// None keeps every track position for the whole session.
    #[serde(default)]
    pub history_max_idle_frames: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineConfig {
    pub p1: [i32; 2],
    pub p2: [i32; 2],
}

impl LineConfig {
    pub fn p1(&self) -> Point {
        Point::new(self.p1[0], self.p1[1])
    }

    pub fn p2(&self) -> Point {
        Point::new(self.p2[0], self.p2[1])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Snapshots buffered ahead of the consumer before the pipeline pauses.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub detector_timeout_ms: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            detector_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_frame_stride() -> u32 {
    crate::pipeline::sampler::DEFAULT_FRAME_STRIDE
}

fn default_channel_capacity() -> usize {
    1
}

// ============================================================================
// DETECTIONS
// ============================================================================

/// Axis-aligned box in pixel coordinates, `[x1, y1, x2, y2]` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Box center, floored like the tracker's integer division.
    pub fn centroid(&self) -> Point {
        let cx = (self.x_min as i64 + self.x_max as i64).div_euclid(2);
        let cy = (self.y_min as i64 + self.y_max as i64).div_euclid(2);
        Point::new(cx as i32, cy as i32)
    }
}

impl From<[i32; 4]> for BoundingBox {
    fn from(b: [i32; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x_min, b.y_min, b.x_max, b.y_max]
    }
}

/// One tracked box from the external detector/tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    #[serde(default, deserialize_with = "deserialize_track_id")]
    pub track_id: Option<TrackId>,
    pub class_label: String,
    pub bbox: BoundingBox,
}

impl DetectedObject {
    pub fn new(track_id: Option<TrackId>, class_label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            track_id,
            class_label: class_label.into(),
            bbox,
        }
    }

    /// Build from a raw tracker id, mapping the sentinel to "no identity".
    pub fn from_tracker(raw_id: TrackId, class_label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self::new(normalize_track_id(raw_id), class_label, bbox)
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }
}

fn normalize_track_id(raw: TrackId) -> Option<TrackId> {
    if raw < 0 {
        None
    } else {
        Some(raw)
    }
}

fn deserialize_track_id<'de, D>(deserializer: D) -> Result<Option<TrackId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<TrackId> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(normalize_track_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_floors_like_tracker() {
        let b = BoundingBox::new(10, 20, 15, 27);
        assert_eq!(b.centroid(), Point::new(12, 23));

        // Floor, not truncation, for negative sums
        let b = BoundingBox::new(-5, -5, 0, 0);
        assert_eq!(b.centroid(), Point::new(-3, -3));
    }

    #[test]
    fn test_sentinel_track_id_is_no_identity() {
        let obj = DetectedObject::from_tracker(NO_TRACK_ID, "car", BoundingBox::new(0, 0, 2, 2));
        assert_eq!(obj.track_id, None);

        let obj = DetectedObject::from_tracker(7, "car", BoundingBox::new(0, 0, 2, 2));
        assert_eq!(obj.track_id, Some(7));
    }

    #[test]
    fn test_detection_wire_format() {
        let obj: DetectedObject =
            serde_json::from_str(r#"{"track_id": 3, "class_label": "bus", "bbox": [1, 2, 3, 4]}"#)
                .unwrap();
        assert_eq!(obj.track_id, Some(3));
        assert_eq!(obj.bbox, BoundingBox::new(1, 2, 3, 4));

        let lost: DetectedObject =
            serde_json::from_str(r#"{"track_id": -1, "class_label": "bus", "bbox": [1, 2, 3, 4]}"#)
                .unwrap();
        assert_eq!(lost.track_id, None);

        let missing: DetectedObject =
            serde_json::from_str(r#"{"class_label": "bus", "bbox": [1, 2, 3, 4]}"#).unwrap();
        assert_eq!(missing.track_id, None);

        let json = serde_json::to_string(&obj).unwrap();
        assert!(json.contains(r#""bbox":[1,2,3,4]"#), "{}", json);
    }
}
