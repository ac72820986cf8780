// src/counting/stats.rs
//
// Batch reconstruction of the per-timestamp time series from a detection
// log. Pure function of its input: it can run on a partial log mid-run or on
// the complete log at the end and always describes exactly what it was given.
//
// For each id only the first non-zero `pass` entry (by time) is a crossing
// event. A well-formed log never changes `pass` once it is non-zero, but a
// hand-edited or concatenated one might, so later entries are ignored rather
// than trusted.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::counting::CrossingState;
use crate::types::{DetectionLogEntry, StatsRow, TrackId};

pub fn reconstruct(log: &[DetectionLogEntry]) -> Vec<StatsRow> {
    // Stable sort: entries sharing a timestamp keep their log order
    let mut entries: Vec<&DetectionLogEntry> = log.iter().collect();
    entries.sort_by(|a, b| a.time.total_cmp(&b.time));

    let mut seen: HashSet<TrackId> = HashSet::new();
    let mut events: HashMap<TrackId, CrossingState> = HashMap::new();

    let mut rows = Vec::new();
    let mut detected_total = 0;
    let mut green_total = 0;
    let mut red_total = 0;

    for group in entries.chunk_by(|a, b| a.time.total_cmp(&b.time).is_eq()) {
        let time = group[0].time;
        let mut green = 0;
        let mut red = 0;

        for entry in group {
            if seen.insert(entry.id) {
                detected_total += 1;
            }
            if entry.pass.is_crossed() && !events.contains_key(&entry.id) {
                events.insert(entry.id, entry.pass);
                match entry.pass {
                    CrossingState::CrossedGreen => green += 1,
                    CrossingState::CrossedRed => red += 1,
                    CrossingState::Uncrossed => {}
                }
            }
        }

        green_total += green;
        red_total += red;
        rows.push(StatsRow {
            time,
            detected: group.len(),
            detected_total,
            green,
            green_total,
            red,
            red_total,
            passed: green + red,
            passed_total: green_total + red_total,
        });
    }

    rows
}

/// Final figures of a run, taken from the last stats row.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StatsSummary {
    pub duration_s: f64,
    pub timestamps: usize,
    pub detected_total: usize,
    pub green_total: usize,
    pub red_total: usize,
    pub passed_total: usize,
    pub peak_detected: usize,
}

impl StatsSummary {
    pub fn from_rows(rows: &[StatsRow]) -> Self {
        let Some(last) = rows.last() else {
            return Self::default();
        };
        Self {
            duration_s: last.time,
            timestamps: rows.len(),
            detected_total: last.detected_total,
            green_total: last.green_total,
            red_total: last.red_total,
            passed_total: last.passed_total,
            peak_detected: rows.iter().map(|r| r.detected).max().unwrap_or(0),
        }
    }

    /// Share of crossings that happened on red, in [0, 1].
    pub fn red_ratio(&self) -> f64 {
        if self.passed_total == 0 {
            0.0
        } else {
            self.red_total as f64 / self.passed_total as f64
        }
    }
}
