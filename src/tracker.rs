// src/tracker.rs
//
// IoU multi-object tracker that turns per-frame detections into persistent
// integer ids.
//
// Two association strategies:
//   - Bytetrack: confident boxes are matched first against every live track;
//                the weak boxes then get a chance to continue the tracks that
//                are still unmatched (keeps ids alive through occlusion and
//                motion blur). Only confident boxes open new tracks.
//   - Iou:       one greedy pass over every box above the confidence floor.
//
// A track is reported once it has `min_hits` consecutive matches. Tentative
// tracks die on their first miss; confirmed ones coast for up to
// `max_lost_frames` before being dropped. Ids start at 1 and are never reused.
//
// Association compares each track's last box with the new boxes; there is no
// Kalman motion model. A vehicle whose boxes in consecutive frames overlap
// less than `match_iou` comes back under a new id.

use tracing::debug;

use crate::source::TrackerFrame;
use crate::types::{TrackId, TrackerKind, TrackingConfig};

#[derive(Debug, Clone)]
pub struct DetectionInput {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] pixels
    pub class_id: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub bbox: [f32; 4],
    pub class_id: u32,
    pub confidence: f32,
    pub state: TrackState,
    pub consecutive_hits: u32,
    pub frames_since_hit: u32,
}

impl Track {
    fn new(id: TrackId, det: &DetectionInput, min_hits: u32) -> Self {
        let state = if min_hits <= 1 {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
        Self {
            id,
            bbox: det.bbox,
            class_id: det.class_id,
            confidence: det.confidence,
            state,
            consecutive_hits: 1,
            frames_since_hit: 0,
        }
    }

    fn hit(&mut self, det: &DetectionInput, min_hits: u32) {
        self.bbox = det.bbox;
        self.class_id = det.class_id;
        self.confidence = det.confidence;
        self.consecutive_hits += 1;
        self.frames_since_hit = 0;
        if self.state == TrackState::Tentative && self.consecutive_hits >= min_hits {
            self.state = TrackState::Confirmed;
            debug!("✅ Track {} confirmed (class={})", self.id, self.class_id);
        }
    }

    fn miss(&mut self) {
        self.consecutive_hits = 0;
        self.frames_since_hit += 1;
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

pub struct ObjectTracker {
    kind: TrackerKind,
    config: TrackingConfig,
    tracks: Vec<Track>,
    next_id: TrackId,
}

impl ObjectTracker {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            kind: config.tracker,
            config,
            tracks: Vec::with_capacity(32),
            next_id: 1,
        }
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    /// Associates one frame of detections. Returns the confirmed tracks that
    /// were matched in this frame.
    pub fn update(&mut self, detections: &[DetectionInput]) -> Vec<&Track> {
        let floor = self.config.confidence_threshold;
        let high = self.config.high_confidence_threshold;

        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];

        let (first_stage, second_stage): (Vec<usize>, Vec<usize>) = match self.kind {
            TrackerKind::Bytetrack => (
                (0..detections.len())
                    .filter(|&i| detections[i].confidence >= high)
                    .collect(),
                (0..detections.len())
                    .filter(|&i| {
                        detections[i].confidence >= floor && detections[i].confidence < high
                    })
                    .collect(),
            ),
            TrackerKind::Iou => (
                (0..detections.len())
                    .filter(|&i| detections[i].confidence >= floor)
                    .collect(),
                Vec::new(),
            ),
        };

        self.associate(detections, &first_stage, &mut track_matched, &mut det_used);
        if !second_stage.is_empty() {
            self.associate(detections, &second_stage, &mut track_matched, &mut det_used);
        }

        for (ti, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.tracks[ti].miss();
            }
        }

        // New tracks only from boxes of the first stage
        let min_hits = self.config.min_hits;
        for &di in &first_stage {
            if det_used[di] {
                continue;
            }
            let track = Track::new(self.next_id, &detections[di], min_hits);
            debug!(
                "🆕 New track T{}: class={}, conf={:.2}, bbox=[{:.0},{:.0},{:.0},{:.0}]",
                track.id,
                track.class_id,
                track.confidence,
                track.bbox[0],
                track.bbox[1],
                track.bbox[2],
                track.bbox[3]
            );
            self.next_id += 1;
            self.tracks.push(track);
        }

        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| match t.state {
            TrackState::Tentative => t.frames_since_hit == 0,
            TrackState::Confirmed => t.frames_since_hit <= max_lost,
        });

        self.tracks
            .iter()
            .filter(|t| t.is_confirmed() && t.frames_since_hit == 0)
            .collect()
    }

    /// Greedy IoU matching of `candidates` against the tracks not yet matched.
    fn associate(
        &mut self,
        detections: &[DetectionInput],
        candidates: &[usize],
        track_matched: &mut [bool],
        det_used: &mut [bool],
    ) {
        let min_iou = self.config.match_iou;
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            if track_matched[ti] {
                continue;
            }
            for &di in candidates {
                if det_used[di] {
                    continue;
                }
                let score = iou(&track.bbox, &detections[di].bbox);
                if score >= min_iou {
                    pairs.push((ti, di, score));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

        let min_hits = self.config.min_hits;
        for (ti, di, _) in pairs {
            if track_matched[ti] || det_used[di] {
                continue;
            }
            track_matched[ti] = true;
            det_used[di] = true;
            self.tracks[ti].hit(&detections[di], min_hits);
        }
    }

    pub fn all_tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }
}

/// Packs tracker output into the parallel-array frame the counter consumes.
pub fn to_tracker_frame<I>(index: u64, image: I, tracks: &[&Track]) -> TrackerFrame<I> {
    TrackerFrame {
        index,
        image,
        boxes: tracks.iter().map(|t| t.bbox).collect(),
        ids: Some(tracks.iter().map(|t| t.id).collect()),
        classes: tracks.iter().map(|t| t.class_id).collect(),
    }
}
