// src/source.rs
//
// Pull-based access to per-frame tracker output.
//
// A tracker reports, for every decoded frame, three parallel arrays: boxes,
// persistent track ids and class ids. `TrackerSource::next_frame` blocks until
// the next frame is available and returns `Ok(None)` at end of stream.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CounterError, Result};
use crate::types::{TrackId, TrackedObservation};

/// Raw tracker result for one frame. `I` carries the decoded image when the
/// source has one (video sources); replayed output uses `()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerFrame<I = ()> {
    pub index: u64,
    #[serde(skip)]
    pub image: I,
    /// `[x1, y1, x2, y2]` in pixels
    #[serde(default)]
    pub boxes: Vec<[f32; 4]>,
    /// Absent only when the tracker produced no identities for this frame
    #[serde(default)]
    pub ids: Option<Vec<TrackId>>,
    #[serde(default)]
    pub classes: Vec<u32>,
}

impl TrackerFrame<()> {
    pub fn new(index: u64, boxes: Vec<[f32; 4]>, ids: Vec<TrackId>, classes: Vec<u32>) -> Self {
        Self {
            index,
            image: (),
            boxes,
            ids: Some(ids),
            classes,
        }
    }

    pub fn empty(index: u64) -> Self {
        Self::new(index, Vec::new(), Vec::new(), Vec::new())
    }
}

impl<I> TrackerFrame<I> {
    pub fn timestamp_s(&self, fps: f64) -> f64 {
        self.index as f64 / fps
    }

    /// Checks the parallel-array contract and turns every box into an
    /// observation at its (truncated) center. Nothing is filtered here.
    pub fn observations(&self, fps: f64) -> Result<Vec<TrackedObservation>> {
        let ids: &[TrackId] = match &self.ids {
            Some(ids) => ids,
            None if self.boxes.is_empty() && self.classes.is_empty() => &[],
            None => {
                return Err(CounterError::malformed(
                    self.index,
                    format!("{} boxes reported without track ids", self.boxes.len()),
                ))
            }
        };

        if ids.len() != self.boxes.len() || self.classes.len() != self.boxes.len() {
            return Err(CounterError::malformed(
                self.index,
                format!(
                    "misaligned arrays: {} boxes, {} ids, {} classes",
                    self.boxes.len(),
                    ids.len(),
                    self.classes.len()
                ),
            ));
        }

        let timestamp_s = self.timestamp_s(fps);
        Ok(self
            .boxes
            .iter()
            .zip(ids)
            .zip(&self.classes)
            .map(|((bbox, &track_id), &class_id)| TrackedObservation {
                frame_index: self.index,
                timestamp_s,
                track_id,
                class_id,
                center_x: ((bbox[0] + bbox[2]) / 2.0) as i32,
                center_y: ((bbox[1] + bbox[3]) / 2.0) as i32,
            })
            .collect())
    }
}

/// Lazy, finite stream of tracker results.
pub trait TrackerSource {
    type Image;

    fn fps(&self) -> f64;

    /// `(width, height)` of the frames, used to resolve normalized line points.
    fn frame_size(&self) -> (u32, u32);

    /// Total frame count when known up front.
    fn total_frames(&self) -> Option<u64> {
        None
    }

    fn next_frame(&mut self) -> Result<Option<TrackerFrame<Self::Image>>>;
}

// ============================================================================
// IN-MEMORY REPLAY
// ============================================================================

/// Replays tracker frames that are already in memory.
pub struct ReplaySource {
    frames: VecDeque<TrackerFrame>,
    fps: f64,
    frame_size: (u32, u32),
    total: u64,
}

impl ReplaySource {
    pub fn new(frames: Vec<TrackerFrame>, fps: f64, frame_size: (u32, u32)) -> Self {
        let total = frames.len() as u64;
        Self {
            frames: frames.into(),
            fps,
            frame_size,
            total,
        }
    }
}

impl TrackerSource for ReplaySource {
    type Image = ();

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total)
    }

    fn next_frame(&mut self) -> Result<Option<TrackerFrame>> {
        Ok(self.frames.pop_front())
    }
}

// ============================================================================
// JSON LINES FILE
// ============================================================================

/// Reads tracker output stored one JSON frame per line:
///
/// ```text
/// {"index":0,"boxes":[[10,20,50,60]],"ids":[3],"classes":[2]}
/// ```
///
/// Blank lines are skipped. A line that is not JSON is `SourceUnavailable`;
/// JSON that lacks or mistypes a frame field is `MalformedTrackerOutput` for
/// that frame (its `index` when present, else its position in the file).
pub struct JsonlTrackerSource<R> {
    reader: R,
    path: PathBuf,
    line_no: u64,
    frames_read: u64,
    fps: f64,
    frame_size: (u32, u32),
}

impl JsonlTrackerSource<BufReader<File>> {
    pub fn open(path: &Path, fps: f64, frame_size: (u32, u32)) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            CounterError::source_unavailable(path.display().to_string(), None, e.to_string())
        })?;
        Ok(Self::from_reader(BufReader::new(file), path, fps, frame_size))
    }
}

impl<R: BufRead> JsonlTrackerSource<R> {
    pub fn from_reader(reader: R, path: &Path, fps: f64, frame_size: (u32, u32)) -> Self {
        Self {
            reader,
            path: path.to_path_buf(),
            line_no: 0,
            frames_read: 0,
            fps,
            frame_size,
        }
    }
}

impl<R: BufRead> TrackerSource for JsonlTrackerSource<R> {
    type Image = ();

    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    fn next_frame(&mut self) -> Result<Option<TrackerFrame>> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).map_err(|e| {
                CounterError::source_unavailable(
                    self.path.display().to_string(),
                    None,
                    format!("line {}: {}", self.line_no + 1, e),
                )
            })?;
            if read == 0 {
                debug!("{}: end of stream after {} lines", self.path.display(), self.line_no);
                return Ok(None);
            }
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            // Not JSON at all: the file itself is unreadable from here on
            let value: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
                CounterError::source_unavailable(
                    self.path.display().to_string(),
                    None,
                    format!("line {} is not JSON: {}", self.line_no, e),
                )
            })?;

            // Valid JSON that does not describe a frame (missing or mistyped fields)
            let index = value
                .get("index")
                .and_then(|v| v.as_u64())
                .unwrap_or(self.frames_read);
            let frame: TrackerFrame = serde_json::from_value(value).map_err(|e| {
                CounterError::malformed(index, format!("line {}: {}", self.line_no, e))
            })?;
            self.frames_read += 1;
            return Ok(Some(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_observations_use_truncated_centers() {
        let frame = TrackerFrame::new(
            15,
            vec![[10.0, 20.0, 31.0, 41.0], [0.0, 0.0, 3.0, 3.0]],
            vec![1, 2],
            vec![2, 7],
        );
        let obs = frame.observations(30.0).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!((obs[0].center_x, obs[0].center_y), (20, 30));
        assert_eq!((obs[1].center_x, obs[1].center_y), (1, 1));
        assert_eq!(obs[0].timestamp_s, 0.5);
        assert_eq!(obs[1].class_id, 7);
    }

    #[test]
    fn test_misaligned_arrays_rejected() {
        let frame = TrackerFrame::new(4, vec![[0.0, 0.0, 1.0, 1.0]; 2], vec![1], vec![2, 2]);
        let err = frame.observations(25.0).unwrap_err();
        assert!(matches!(
            err,
            CounterError::MalformedTrackerOutput { frame: 4, .. }
        ));

        let frame = TrackerFrame::new(5, vec![[0.0, 0.0, 1.0, 1.0]], vec![1], vec![]);
        assert!(frame.observations(25.0).is_err());
    }

    #[test]
    fn test_missing_ids_with_boxes_rejected() {
        let frame = TrackerFrame {
            index: 8,
            image: (),
            boxes: vec![[0.0, 0.0, 4.0, 4.0]],
            ids: None,
            classes: vec![2],
        };
        assert!(matches!(
            frame.observations(30.0),
            Err(CounterError::MalformedTrackerOutput { frame: 8, .. })
        ));
    }

    #[test]
    fn test_empty_frame_is_valid() {
        assert!(TrackerFrame::empty(0).observations(30.0).unwrap().is_empty());

        let no_ids = TrackerFrame {
            index: 1,
            image: (),
            boxes: vec![],
            ids: None,
            classes: vec![],
        };
        assert!(no_ids.observations(30.0).unwrap().is_empty());
    }

    #[test]
    fn test_replay_source_drains_in_order() {
        let mut source = ReplaySource::new(
            vec![TrackerFrame::empty(0), TrackerFrame::empty(1)],
            10.0,
            (640, 480),
        );
        assert_eq!(source.total_frames(), Some(2));
        assert_eq!(source.next_frame().unwrap().unwrap().index, 0);
        assert_eq!(source.next_frame().unwrap().unwrap().index, 1);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_jsonl_source_parses_frames() {
        let data = concat!(
            "{\"index\":0,\"boxes\":[[10,20,50,60]],\"ids\":[3],\"classes\":[2]}\n",
            "\n",
            "{\"index\":1,\"ids\":null}\n",
        );
        let mut source =
            JsonlTrackerSource::from_reader(Cursor::new(data), Path::new("tracks.jsonl"), 30.0, (100, 100));

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.ids, Some(vec![3]));
        assert_eq!(first.boxes[0], [10.0, 20.0, 50.0, 60.0]);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.index, 1);
        assert!(second.observations(30.0).unwrap().is_empty());

        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_jsonl_source_reports_bad_line() {
        let data = "{\"index\":0}\nnot json\n";
        let mut source =
            JsonlTrackerSource::from_reader(Cursor::new(data), Path::new("t.jsonl"), 30.0, (1, 1));
        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(matches!(
            err,
            CounterError::SourceUnavailable { frame: None, .. }
        ));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_jsonl_frame_without_index_is_malformed() {
        let data = concat!(
            "{\"index\":0,\"boxes\":[],\"ids\":[],\"classes\":[]}\n",
            "{\"boxes\":[[0,0,1,1]],\"ids\":[1],\"classes\":[2]}\n",
        );
        let mut source =
            JsonlTrackerSource::from_reader(Cursor::new(data), Path::new("t.jsonl"), 30.0, (1, 1));
        assert!(source.next_frame().unwrap().is_some());
        let err = source.next_frame().unwrap_err();
        assert!(matches!(
            err,
            CounterError::MalformedTrackerOutput { frame: 1, .. }
        ));
        assert!(err.to_string().contains("index"));
    }

    #[test]
    fn test_jsonl_mistyped_field_is_malformed_at_its_index() {
        let data = "{\"index\":42,\"boxes\":\"none\",\"ids\":[1],\"classes\":[2]}\n";
        let mut source =
            JsonlTrackerSource::from_reader(Cursor::new(data), Path::new("t.jsonl"), 30.0, (1, 1));
        assert!(matches!(
            source.next_frame(),
            Err(CounterError::MalformedTrackerOutput { frame: 42, .. })
        ));
    }
}
