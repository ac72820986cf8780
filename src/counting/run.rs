// src/counting/run.rs
//
// Frame loop: pull a tracker frame, feed the aggregator, hand the result to
// the caller's per-frame hook (rendering, progress), repeat until the source
// is exhausted. At the end the log is reconstructed into stats and the
// reconstructed totals are checked against the aggregator's running ones.

use std::time::Instant;
use tracing::{error, info};

use crate::counting::aggregator::{FrameAggregator, FrameOutcome};
use crate::counting::stats::{reconstruct, StatsSummary};
use crate::error::{CounterError, Result};
use crate::line_crossing::LinePoints;
use crate::signal::SignalTiming;
use crate::source::{TrackerFrame, TrackerSource};
use crate::types::{DetectionLogEntry, StatsRow};

const PROGRESS_EVERY_FRAMES: u64 = 100;

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub log: Vec<DetectionLogEntry>,
    pub stats: Vec<StatsRow>,
    pub summary: StatsSummary,
    /// Running totals kept by the aggregator during the loop
    pub live_green_total: usize,
    pub live_red_total: usize,
    pub frames: u64,
    pub elapsed_secs: f64,
}

impl RunOutput {
    pub fn totals_agree(&self) -> bool {
        self.live_green_total == self.summary.green_total
            && self.live_red_total == self.summary.red_total
    }

    pub fn processing_fps(&self) -> f64 {
        if self.elapsed_secs > 0.01 {
            self.frames as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

/// Runs `source` to completion. `on_frame` sees every frame after it has
/// been aggregated; an error from it aborts the run.
pub fn run_counter<S, F>(
    source: &mut S,
    line_points: &LinePoints,
    timing: SignalTiming,
    mut on_frame: F,
) -> Result<RunOutput>
where
    S: TrackerSource,
    F: FnMut(&TrackerFrame<S::Image>, &FrameOutcome, &FrameAggregator) -> Result<()>,
{
    let fps = source.fps();
    if !(fps.is_finite() && fps > 0.0) {
        return Err(CounterError::config(format!(
            "source frame rate must be positive, got {}",
            fps
        )));
    }

    let (width, height) = source.frame_size();
    let line = line_points.to_pixels(width, height);
    info!(
        "▶️  Counting run: {}x{} @ {:.1} FPS, line ({},{})→({},{}), signal {}s green / {}s red",
        width,
        height,
        fps,
        line.p1.x,
        line.p1.y,
        line.p2.x,
        line.p2.y,
        timing.green_duration_s(),
        timing.red_duration_s()
    );

    let total = source.total_frames();
    let started = Instant::now();
    let mut aggregator = FrameAggregator::new(line, timing);

    while let Some(frame) = source.next_frame()? {
        let outcome = aggregator.process_tracker_frame(&frame, fps)?;
        on_frame(&frame, &outcome, &aggregator)?;

        let done = aggregator.frames_processed();
        if done % PROGRESS_EVERY_FRAMES == 0 {
            match total {
                Some(total) if total > 0 => info!(
                    "Progress: {}/{} frames ({:.1}%) | green={} red={}",
                    done,
                    total,
                    100.0 * done as f64 / total as f64,
                    aggregator.green_total(),
                    aggregator.red_total()
                ),
                _ => info!(
                    "Progress: {} frames | green={} red={}",
                    done,
                    aggregator.green_total(),
                    aggregator.red_total()
                ),
            }
        }
    }

    let frames = aggregator.frames_processed();
    let live_green_total = aggregator.green_total();
    let live_red_total = aggregator.red_total();
    let log = aggregator.into_log();
    let stats = reconstruct(&log);
    let summary = StatsSummary::from_rows(&stats);

    let output = RunOutput {
        log,
        stats,
        summary,
        live_green_total,
        live_red_total,
        frames,
        elapsed_secs: started.elapsed().as_secs_f64(),
    };

    if !output.totals_agree() {
        error!(
            "Live totals (green={}, red={}) disagree with reconstructed totals (green={}, red={})",
            live_green_total, live_red_total, summary.green_total, summary.red_total
        );
    }

    info!(
        "✓ Run finished: {} frames, {} log entries, {} vehicles, {} passed ({} green / {} red)",
        output.frames,
        output.log.len(),
        summary.detected_total,
        summary.passed_total,
        summary.green_total,
        summary.red_total
    );

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting::CrossingState;
    use crate::source::ReplaySource;
    use crate::types::TrackId;

    fn vehicle_at(id: TrackId, cx: f32, cy: f32) -> ([f32; 4], TrackId, u32) {
        ([cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0], id, 2)
    }

    fn frame(index: u64, objects: &[([f32; 4], TrackId, u32)]) -> TrackerFrame {
        TrackerFrame::new(
            index,
            objects.iter().map(|o| o.0).collect(),
            objects.iter().map(|o| o.1).collect(),
            objects.iter().map(|o| o.2).collect(),
        )
    }

    fn line() -> LinePoints {
        LinePoints::new((0.0, 100.0), (200.0, 100.0))
    }

    #[test]
    fn test_scenario_end_to_end() {
        // 2 FPS so frames 0, 1, 2 are t = 0.0, 0.5, 1.0
        let frames = vec![
            frame(0, &[vehicle_at(7, 50.0, 50.0)]),
            frame(1, &[vehicle_at(7, 50.0, 100.0)]),
            frame(2, &[vehicle_at(7, 50.0, 100.0)]),
        ];
        let mut source = ReplaySource::new(frames, 2.0, (640, 480));
        let mut increments = Vec::new();
        let output = run_counter(
            &mut source,
            &line(),
            SignalTiming::new(20, 5).unwrap(),
            |_, outcome, _| {
                increments.push(outcome.green_increment);
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(increments, vec![0, 1, 0]);
        let passes: Vec<i8> = output.log.iter().map(|e| e.pass.value()).collect();
        assert_eq!(passes, vec![0, 1, 1]);
        assert_eq!(output.stats[1].green, 1);
        assert_eq!(output.stats[1].green_total, 1);
        assert_eq!(output.stats[2].green_total, 1);
        assert!(output.totals_agree());
        assert_eq!(output.frames, 3);
    }

    #[test]
    fn test_live_totals_match_reconstruction() {
        // 1 FPS, 60 frames: vehicles drive down through y=100 at staggered times,
        // some during green (t < 20, 25..45) and some during red (20..25, 45..50)
        let mut frames = Vec::new();
        for t in 0..60u64 {
            let mut objects = Vec::new();
            for id in 0..12i64 {
                let start = id as u64 * 4;
                if t >= start && t < start + 12 {
                    let y = 40.0 + 10.0 * (t - start) as f32;
                    objects.push(vehicle_at(id, 20.0 * id as f32, y));
                }
            }
            // A pedestrian parked on the line the whole time
            objects.push(([0.0, 90.0, 10.0, 110.0], 999, 0));
            frames.push(frame(t, &objects));
        }
        let mut source = ReplaySource::new(frames, 1.0, (1280, 720));
        let output = run_counter(
            &mut source,
            &line(),
            SignalTiming::new(20, 5).unwrap(),
            |_, _, _| Ok(()),
        )
        .unwrap();

        assert!(output.totals_agree());
        assert_eq!(output.summary.passed_total, 12);
        assert!(output.summary.red_total > 0);
        assert!(output.summary.green_total > 0);
        assert!(output.log.iter().all(|e| e.id != 999));
        assert_eq!(reconstruct(&output.log), output.stats);
    }

    #[test]
    fn test_pass_sequence_per_track_is_monotonic() {
        let mut frames = Vec::new();
        for t in 0..30u64 {
            // Oscillates across the line several times
            let y = if t % 2 == 0 { 100.0 } else { 140.0 };
            frames.push(frame(t, &[vehicle_at(1, 10.0, y), vehicle_at(2, 30.0, 300.0)]));
        }
        let mut source = ReplaySource::new(frames, 1.0, (640, 480));
        let output = run_counter(
            &mut source,
            &line(),
            SignalTiming::new(20, 5).unwrap(),
            |_, _, _| Ok(()),
        )
        .unwrap();

        for id in [1, 2] {
            let seq: Vec<CrossingState> = output
                .log
                .iter()
                .filter(|e| e.id == id)
                .map(|e| e.pass)
                .collect();
            let first_crossed = seq.iter().position(|s| s.is_crossed()).unwrap_or(seq.len());
            assert!(seq[..first_crossed].iter().all(|s| !s.is_crossed()));
            assert!(seq[first_crossed..].iter().all(|s| *s == seq[first_crossed]));
        }
    }

    #[test]
    fn test_malformed_frame_aborts_run() {
        let frames = vec![
            frame(0, &[vehicle_at(1, 10.0, 10.0)]),
            TrackerFrame::new(1, vec![[0.0, 0.0, 1.0, 1.0]], vec![1, 2], vec![2]),
            frame(2, &[vehicle_at(1, 10.0, 10.0)]),
        ];
        let mut source = ReplaySource::new(frames, 1.0, (640, 480));
        let err = run_counter(
            &mut source,
            &line(),
            SignalTiming::new(20, 5).unwrap(),
            |_, _, _| Ok(()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CounterError::MalformedTrackerOutput { frame: 1, .. }
        ));
    }

    #[test]
    fn test_hook_error_aborts_run() {
        let frames = vec![frame(0, &[]), frame(1, &[])];
        let mut source = ReplaySource::new(frames, 1.0, (640, 480));
        let mut calls = 0;
        let result = run_counter(
            &mut source,
            &line(),
            SignalTiming::new(20, 5).unwrap(),
            |_, _, _| {
                calls += 1;
                Err(CounterError::Render("writer closed".to_string()))
            },
        );
        assert!(matches!(result, Err(CounterError::Render(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_zero_fps_rejected() {
        let mut source = ReplaySource::new(vec![frame(0, &[])], 0.0, (640, 480));
        let result = run_counter(
            &mut source,
            &line(),
            SignalTiming::new(20, 5).unwrap(),
            |_, _, _| Ok(()),
        );
        assert!(matches!(result, Err(CounterError::Config(_))));
    }
}
