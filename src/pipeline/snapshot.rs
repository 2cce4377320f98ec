// src/pipeline/snapshot.rs

use serde::{Deserialize, Serialize};

/// One immutable, self-contained progress record of a counting session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountingState {
    #[serde(rename = "in")]
    pub in_count: u64,
    #[serde(rename = "out")]
    pub out_count: u64,
    #[serde(rename = "end")]
    pub ended: bool,
    /// None when the source cannot tell its length (live input).
    #[serde(alias = "totalFrames")]
    pub total_frames: Option<u64>,
    /// 0-based index of the last frame read from the source.
    #[serde(alias = "currentFrame")]
    pub current_frame: u64,
}

impl CountingState {
    pub fn total(&self) -> u64 {
        self.in_count + self.out_count
    }

    /// Ended after consuming every frame the source announced.
    pub fn ran_to_completion(&self) -> bool {
        match self.total_frames {
            Some(0) => self.ended,
            Some(total) => self.ended && self.current_frame + 1 >= total,
            None => false,
        }
    }

    /// Percent of the source consumed, when its length is known.
    pub fn progress(&self) -> Option<f64> {
        match self.total_frames {
            Some(0) | None => None,
            Some(total) => Some((self.current_frame + 1) as f64 / total as f64 * 100.0),
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(ended: bool, total: Option<u64>, current: u64) -> CountingState {
        CountingState {
            in_count: 2,
            out_count: 1,
            ended,
            total_frames: total,
            current_frame: current,
        }
    }

    #[test]
    fn test_json_field_names() {
        let line = state(false, Some(10), 3).to_json_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["in"], 2);
        assert_eq!(value["out"], 1);
        assert_eq!(value["end"], false);
        assert_eq!(value["total_frames"], 10);
        assert_eq!(value["current_frame"], 3);
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_accepts_frontend_spelling() {
        let parsed: CountingState = serde_json::from_str(
            r#"{"in": 2, "out": 1, "end": true, "totalFrames": 10, "currentFrame": 9}"#,
        )
        .unwrap();
        assert_eq!(parsed, state(true, Some(10), 9));
    }

    #[test]
    fn test_completion_vs_early_termination() {
        assert!(state(true, Some(10), 9).ran_to_completion());
        assert!(!state(true, Some(10), 4).ran_to_completion());
        assert!(!state(false, Some(10), 9).ran_to_completion());
        assert!(!state(true, None, 9).ran_to_completion());
        assert!(state(true, Some(0), 0).ran_to_completion());
    }

    #[test]
    fn test_progress() {
        assert_eq!(state(false, Some(10), 4).progress(), Some(50.0));
        assert_eq!(state(false, None, 4).progress(), None);
    }
}
