// src/replay.rs
//
// Recorded tracker output played back as a frame source. One JSON line per
// raw video frame:
//
//   [{"track_id": 7, "class_label": "car", "bbox": [92, 242, 108, 258]}]
//   {"detections": [...]}
//
// An empty line is a frame with nothing detected. The "frame" handed to the
// session is the raw line; parsing happens in ReplayDetector so that a bad
// line only costs that frame, not the session.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::SessionError;
use crate::pipeline::collaborator::{Detector, FrameSource};
use crate::types::DetectedObject;

pub struct ReplaySource {
    reader: Box<dyn BufRead + Send>,
    origin: String,
    total_frames: Option<u64>,
    current_frame: u64,
}

impl ReplaySource {
    /// Open a recording. The file is scanned once up front so the total frame
    /// count can be announced.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let total = count_lines(path)?;
        let file = File::open(path).map_err(|e| {
            SessionError::Source(format!("cannot open {}: {}", path.display(), e))
        })?;

        info!("Opening recording: {} ({} frames)", path.display(), total);

        Ok(Self {
            reader: Box::new(BufReader::new(file)),
            origin: path.display().to_string(),
            total_frames: Some(total),
            current_frame: 0,
        })
    }

    /// Wrap an already-open reader (stdin, a pipe). `total_frames` is usually
    /// unknown for these.
    pub fn from_reader(reader: Box<dyn BufRead + Send>, total_frames: Option<u64>) -> Self {
        Self {
            reader,
            origin: "<stream>".to_string(),
            total_frames,
            current_frame: 0,
        }
    }

    pub fn progress(&self) -> f32 {
        match self.total_frames {
            Some(total) if total > 0 => (self.current_frame as f32 / total as f32) * 100.0,
            _ => 0.0,
        }
    }
}

fn count_lines(path: &Path) -> Result<u64, SessionError> {
    let file = File::open(path)
        .map_err(|e| SessionError::Source(format!("cannot open {}: {}", path.display(), e)))?;

    let mut total = 0u64;
    for line in BufReader::new(file).lines() {
        line?;
        total += 1;
    }
    Ok(total)
}

impl FrameSource for ReplaySource {
    type Frame = String;

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn read_frame(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .with_context(|| format!("reading frame {} from {}", self.current_frame, self.origin))?;

        if read == 0 {
            debug!("{}: end of recording after {} frames", self.origin, self.current_frame);
            return Ok(None);
        }

        self.current_frame += 1;
        let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed_len);
        Ok(Some(line))
    }
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    #[serde(flatten)]
    object: DetectedObject,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayFrame {
    Bare(Vec<ReplayRecord>),
    Wrapped { detections: Vec<ReplayRecord> },
}

/// Turns a recorded line back into detections. Records carrying a
/// `confidence` below the session threshold are dropped, mimicking the
/// detector's own cut-off.
#[derive(Debug, Default)]
pub struct ReplayDetector {
    dropped_low_confidence: u64,
}

impl ReplayDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped_low_confidence(&self) -> u64 {
        self.dropped_low_confidence
    }
}

impl Detector<String> for ReplayDetector {
    fn detect(&mut self, frame: &String, confidence_threshold: Option<f32>) -> Result<Vec<DetectedObject>> {
        let line = frame.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let records = match serde_json::from_str::<ReplayFrame>(line)
            .context("malformed detection record")?
        {
            ReplayFrame::Bare(records) => records,
            ReplayFrame::Wrapped { detections } => detections,
        };

        let mut objects = Vec::with_capacity(records.len());
        for record in records {
            match (record.confidence, confidence_threshold) {
                (Some(conf), Some(threshold)) if conf < threshold => {
                    self.dropped_low_confidence += 1;
                }
                _ => objects.push(record.object),
            }
        }
        Ok(objects)
    }
}

/// Where the binary reads recordings from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayInput {
    Stdin,
    File(PathBuf),
}

impl ReplayInput {
    pub fn parse(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(arg))
        }
    }

    pub fn open(&self) -> Result<ReplaySource, SessionError> {
        match self {
            Self::Stdin => Ok(ReplaySource::from_reader(
                Box::new(BufReader::new(std::io::stdin())),
                None,
            )),
            Self::File(path) => ReplaySource::open(path),
        }
    }
}
