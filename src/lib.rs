//! Traffic counting engine.
//!
//! Consumes per-frame object-tracking results from a video and produces a
//! time-indexed count of visible vehicles and of vehicles that reached a
//! count line while a simulated traffic signal was green or red.
//!
//! ```text
//! tracker frames ─► FrameAggregator ─► detection log ─► reconstruct ─► stats rows
//!                   (streaming)         (append-only)    (batch, pure)
//! ```

pub mod config;
pub mod counting;
pub mod error;
pub mod line_crossing;
pub mod report;
pub mod signal;
pub mod source;
pub mod tracker;
pub mod types;

#[cfg(feature = "video")]
pub mod vehicle_detection;
#[cfg(feature = "video")]
pub mod video_processor;

pub use counting::{
    reconstruct, run_counter, CrossingState, CrossingStateTable, FrameAggregator, FrameOutcome,
    RunOutput, StatsSummary,
};
pub use error::{CounterError, Result};
pub use line_crossing::{distance_to_line, is_crossing, CountLine, LinePoints};
pub use signal::{phase, SignalPhase, SignalTiming};
pub use source::{ReplaySource, TrackerFrame, TrackerSource};
pub use types::{Config, DetectionLogEntry, StatsRow, TrackId, TrackedObservation};
