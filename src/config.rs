// src/config.rs

use std::fs;
use std::path::Path;

use crate::error::SessionError;
use crate::geometry::Line;
use crate::types::{Config, LineConfig, SessionConfig, StreamConfig};

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, SessionError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        self.session.validate()?;
        self.stream.validate()
    }
}

impl SessionConfig {
    pub fn new(line: Line, allowed_classes: Vec<String>) -> Self {
        Self {
            line: LineConfig::from(line),
            allowed_classes,
            frame_stride: crate::pipeline::sampler::DEFAULT_FRAME_STRIDE,
            confidence_threshold: None,
            history_max_idle_frames: None,
        }
    }

    pub fn line(&self) -> Line {
        Line::new(self.line.p1(), self.line.p2())
    }

    /// Reject anything that would make the session meaningless, before any
    /// frame is read.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.allowed_classes.is_empty() {
            return Err(SessionError::config("allowed_classes must not be empty"));
        }
        if let Some(blank) = self.allowed_classes.iter().position(|c| c.trim().is_empty()) {
            return Err(SessionError::config(format!(
                "allowed_classes[{}] is blank",
                blank
            )));
        }
        if self.frame_stride == 0 {
            return Err(SessionError::config("frame_stride must be at least 1"));
        }
        if let Some(conf) = self.confidence_threshold {
            if !conf.is_finite() || !(0.0..=1.0).contains(&conf) {
                return Err(SessionError::config(format!(
                    "confidence_threshold {} outside [0, 1]",
                    conf
                )));
            }
        }
        Ok(())
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.channel_capacity == 0 {
            return Err(SessionError::config("stream.channel_capacity must be at least 1"));
        }
        if self.detector_timeout_ms == Some(0) {
            return Err(SessionError::config("stream.detector_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn detector_timeout(&self) -> Option<std::time::Duration> {
        self.detector_timeout_ms.map(std::time::Duration::from_millis)
    }
}

impl From<Line> for LineConfig {
    fn from(line: Line) -> Self {
        Self {
            p1: [line.p1.x, line.p1.y],
            p2: [line.p2.x, line.p2.y],
        }
    }
}
