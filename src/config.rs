// src/config.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::CounterError;
use crate::line_crossing::LinePoints;
use crate::signal::SignalTiming;
use crate::types::{Config, TrackerKind};

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Checks everything that must hold before the first frame is read.
    pub fn validate(&self) -> std::result::Result<(), CounterError> {
        self.signal_timing()?;

        let tracking = &self.tracking;
        for (name, value) in [
            ("confidence_threshold", tracking.confidence_threshold),
            ("iou_threshold", tracking.iou_threshold),
            ("high_confidence_threshold", tracking.high_confidence_threshold),
            ("match_iou", tracking.match_iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CounterError::config(format!(
                    "tracking.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.video.fallback_fps <= 0.0 {
            return Err(CounterError::config("video.fallback_fps must be positive"));
        }
        Ok(())
    }

    pub fn signal_timing(&self) -> std::result::Result<SignalTiming, CounterError> {
        SignalTiming::new(
            self.counting.green_duration_s,
            self.counting.red_duration_s,
        )
    }

    pub fn line_points(&self) -> LinePoints {
        LinePoints(self.counting.line)
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(line) = overrides.line {
            self.counting.line = [[line[0], line[1]], [line[2], line[3]]];
        }
        if let Some(green) = overrides.green_duration_s {
            self.counting.green_duration_s = green;
        }
        if let Some(red) = overrides.red_duration_s {
            self.counting.red_duration_s = red;
        }
        if let Some(conf) = overrides.confidence_threshold {
            self.tracking.confidence_threshold = conf;
        }
        if let Some(iou) = overrides.iou_threshold {
            self.tracking.iou_threshold = iou;
        }
        if let Some(tracker) = overrides.tracker {
            self.tracking.tracker = tracker;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub line: Option<[f64; 4]>,
    pub green_duration_s: Option<i64>,
    pub red_duration_s: Option<i64>,
    pub confidence_threshold: Option<f32>,
    pub iou_threshold: Option<f32>,
    pub tracker: Option<TrackerKind>,
}

/// Parses `x1,y1,x2,y2`.
pub fn parse_line_arg(s: &str) -> std::result::Result<[f64; 4], String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid coordinate in '{}': {}", s, e))?;
    <[f64; 4]>::try_from(values)
        .map_err(|v| format!("expected 4 comma-separated values, got {}", v.len()))
}

/// What was used for a run, saved next to its results as `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub points: [[f64; 2]; 2],
    pub conf: f32,
    pub iou: f32,
    pub tracker_model: TrackerKind,
    pub green_duration: i64,
    pub red_duration: i64,
    pub source: String,
    pub processed_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn from_config(config: &Config, source: &str) -> Self {
        Self {
            points: config.counting.line,
            conf: config.tracking.confidence_threshold,
            iou: config.tracking.iou_threshold,
            tracker_model: config.tracking.tracker,
            green_duration: config.counting.green_duration_s,
            red_duration: config.counting.red_duration_s,
            source: source.to_string(),
            processed_at: Utc::now(),
        }
    }
}
