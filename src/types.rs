// src/types.rs

use serde::{Deserialize, Serialize};

use crate::counting::CrossingState;

/// Persistent identifier assigned by the tracker to one physical object.
pub type TrackId = i64;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub tracking: TrackingConfig,
    pub counting: CountingConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub input_size: usize,
    pub use_cuda: bool,
    pub num_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "yolov8n.onnx".to_string(),
            input_size: 640,
            use_cuda: true,
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    /// Two-stage association: confident detections first, then the weak ones
    Bytetrack,
    /// Single greedy IoU association
    Iou,
}

impl TrackerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bytetrack => "bytetrack",
            Self::Iou => "iou",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum detector confidence for a box to reach the tracker
    pub confidence_threshold: f32,
    /// IoU threshold used by non-maximum suppression
    pub iou_threshold: f32,
    pub tracker: TrackerKind,
    /// Boxes at or above this confidence take part in the first association stage
    pub high_confidence_threshold: f32,
    /// Minimum IoU for a detection to continue an existing track
    pub match_iou: f32,
    /// Consecutive hits before a track id is reported
    pub min_hits: u32,
    /// Frames a track may go unmatched before it is dropped
    pub max_lost_frames: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            tracker: TrackerKind::Bytetrack,
            high_confidence_threshold: 0.5,
            match_iou: 0.3,
            min_hits: 2,
            max_lost_frames: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountingConfig {
    /// Two points; values in [0,1] are fractions of the frame size, anything
    /// else is an absolute pixel coordinate.
    pub line: [[f64; 2]; 2],
    pub green_duration_s: i64,
    pub red_duration_s: i64,
}

impl Default for CountingConfig {
    fn default() -> Self {
        Self {
            line: [[0.20, 0.55], [1.00, 0.55]],
            green_duration_s: 20,
            red_duration_s: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub output_dir: String,
    pub save_annotated: bool,
    /// Used when the container does not report a frame rate
    pub fallback_fps: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_dir: ".videos".to_string(),
            save_annotated: true,
            fallback_fps: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
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

// ============================================================================
// COUNTING DATA MODEL
// ============================================================================

/// One visible tracked object in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedObservation {
    pub frame_index: u64,
    pub timestamp_s: f64,
    pub track_id: TrackId,
    pub class_id: u32,
    pub center_x: i32,
    pub center_y: i32,
}

/// Row of the detection log. `pass` is the track's crossing state right
/// after the observation was processed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionLogEntry {
    pub time: f64,
    pub id: TrackId,
    #[serde(rename = "x1")]
    pub x: i32,
    #[serde(rename = "y1")]
    pub y: i32,
    pub pass: CrossingState,
}

/// Per-timestamp aggregate rebuilt from the detection log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsRow {
    pub time: f64,
    pub detected: usize,
    pub detected_total: usize,
    pub green: usize,
    pub green_total: usize,
    pub red: usize,
    pub red_total: usize,
    pub passed: usize,
    pub passed_total: usize,
}
