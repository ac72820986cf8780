// src/counting/aggregator.rs
//
// Streaming side of the counter. One call per frame:
//
//   1. drop observations whose class is not a vehicle
//   2. evaluate the signal phase once for the frame
//   3. for each vehicle: distance to the count line, settle the track if it
//      is UNCROSSED and on the line, append a log entry with the state as it
//      stands after the update
//
// The aggregator owns the crossing table and the append-only log for the
// lifetime of a run. Its running green/red totals are kept apart from the
// batch reconstruction in `stats` so the two can be compared.

use tracing::debug;

use crate::counting::state_table::{CrossingState, CrossingStateTable};
use crate::error::Result;
use crate::line_crossing::{is_crossing, CountLine};
use crate::signal::{SignalPhase, SignalTiming};
use crate::source::TrackerFrame;
use crate::types::{DetectionLogEntry, TrackId, TrackedObservation};

/// COCO class ids counted as vehicles: car, motorcycle, bus, truck.
pub const VEHICLE_CLASSES: [u32; 4] = [2, 3, 5, 7];

pub fn is_vehicle_class(class_id: u32) -> bool {
    VEHICLE_CLASSES.contains(&class_id)
}

/// What a single frame contributed.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
    pub phase: SignalPhase,
    pub entries: Vec<DetectionLogEntry>,
    pub green_increment: usize,
    pub red_increment: usize,
}

pub struct FrameAggregator {
    line: CountLine,
    timing: SignalTiming,
    states: CrossingStateTable,
    log: Vec<DetectionLogEntry>,
    current_phase: Option<SignalPhase>,
    green_total: usize,
    red_total: usize,
    frames_processed: u64,
}

impl FrameAggregator {
    pub fn new(line: CountLine, timing: SignalTiming) -> Self {
        Self {
            line,
            timing,
            states: CrossingStateTable::new(),
            log: Vec::new(),
            current_phase: None,
            green_total: 0,
            red_total: 0,
            frames_processed: 0,
        }
    }

    /// Processes the observations of one frame taken at `elapsed_s`.
    pub fn process_frame(
        &mut self,
        observations: &[TrackedObservation],
        elapsed_s: f64,
    ) -> FrameOutcome {
        let phase = self.timing.phase_at(elapsed_s);
        let mut entries = Vec::with_capacity(observations.len());
        let mut green_increment = 0;
        let mut red_increment = 0;

        for obs in observations.iter().filter(|o| is_vehicle_class(o.class_id)) {
            let current = self.states.get_or_create(obs.track_id);
            let distance = self
                .line
                .distance_to(obs.center_x as f64, obs.center_y as f64);

            if is_crossing(distance, current) {
                if let Some(settled) = self.states.settle(obs.track_id, phase) {
                    match settled {
                        CrossingState::CrossedGreen => green_increment += 1,
                        CrossingState::CrossedRed => red_increment += 1,
                        CrossingState::Uncrossed => {}
                    }
                    debug!(
                        "🚦 Track {} crossed on {} at {:.2}s (dist={:.1}px)",
                        obs.track_id,
                        phase.as_str(),
                        elapsed_s,
                        distance
                    );
                }
            }

            entries.push(DetectionLogEntry {
                time: elapsed_s,
                id: obs.track_id,
                x: obs.center_x,
                y: obs.center_y,
                pass: self.states.get_or_create(obs.track_id),
            });
        }

        self.log.extend_from_slice(&entries);
        self.green_total += green_increment;
        self.red_total += red_increment;
        self.current_phase = Some(phase);
        self.frames_processed += 1;

        FrameOutcome {
            phase,
            entries,
            green_increment,
            red_increment,
        }
    }

    /// Validates a raw tracker frame and processes it. A malformed frame
    /// fails before anything is logged.
    pub fn process_tracker_frame<I>(
        &mut self,
        frame: &TrackerFrame<I>,
        fps: f64,
    ) -> Result<FrameOutcome> {
        let observations = frame.observations(fps)?;
        Ok(self.process_frame(&observations, frame.timestamp_s(fps)))
    }

    pub fn line(&self) -> &CountLine {
        &self.line
    }

    pub fn timing(&self) -> &SignalTiming {
        &self.timing
    }

    /// Phase of the most recently processed frame.
    pub fn current_phase(&self) -> Option<SignalPhase> {
        self.current_phase
    }

    pub fn state_of(&self, id: TrackId) -> CrossingState {
        self.states.get(id).unwrap_or_default()
    }

    pub fn states(&self) -> &CrossingStateTable {
        &self.states
    }

    pub fn log(&self) -> &[DetectionLogEntry] {
        &self.log
    }

    pub fn into_log(self) -> Vec<DetectionLogEntry> {
        self.log
    }

    pub fn green_total(&self) -> usize {
        self.green_total
    }

    pub fn red_total(&self) -> usize {
        self.red_total
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}
