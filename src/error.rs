// src/error.rs
//
// Error taxonomy for the counting engine. Everything here is fatal for the
// call that raised it; the engine never retries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CounterError>;

#[derive(Error, Debug)]
pub enum CounterError {
    /// Invalid run configuration (zero signal cycle, thresholds out of range).
    #[error("configuration error: {0}")]
    Config(String),

    /// The tracker broke its per-frame contract (misaligned arrays, missing ids).
    #[error("malformed tracker output at frame {frame}: {reason}")]
    MalformedTrackerOutput { frame: u64, reason: String },

    /// The video or tracker source could not be opened or a frame could not be read.
    #[error("source unavailable: {source_name}{}: {reason}", .frame.map(|f| format!(" (frame {f})")).unwrap_or_default())]
    SourceUnavailable {
        source_name: String,
        frame: Option<u64>,
        reason: String,
    },

    #[error("invalid pass value {0}, expected -1, 0 or 1")]
    InvalidPassValue(i64),

    #[error("detector failed: {0}")]
    Detector(String),

    #[error("rendering failed: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "video")]
    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),
}

impl CounterError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed<S: Into<String>>(frame: u64, reason: S) -> Self {
        Self::MalformedTrackerOutput {
            frame,
            reason: reason.into(),
        }
    }

    pub fn source_unavailable<N: Into<String>, S: Into<String>>(
        source_name: N,
        frame: Option<u64>,
        reason: S,
    ) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            frame,
            reason: reason.into(),
        }
    }
}
