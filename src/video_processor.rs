// src/video_processor.rs

use anyhow::{Context, Result};
use opencv::{
    core::{self, Mat},
    imgcodecs, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst, VideoWriter},
};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::counting::{CrossingState, FrameAggregator, FrameOutcome};
use crate::error::CounterError;
use crate::line_crossing::CountLine;
use crate::signal::SignalPhase;
use crate::source::{TrackerFrame, TrackerSource};
use crate::tracker::{to_tracker_frame, ObjectTracker};
use crate::types::Config;
use crate::vehicle_detection::YoloDetector;

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mov", "mkv"];

pub struct VideoProcessor {
    config: Config,
}

impl VideoProcessor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn open_video(&self, path: &Path) -> std::result::Result<VideoReader, CounterError> {
        VideoReader::open(path, self.config.video.fallback_fps)
    }

    pub fn create_writer(
        &self,
        output_path: &Path,
        width: i32,
        height: i32,
        fps: f64,
    ) -> Result<VideoWriter> {
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = output_path
            .to_str()
            .context("Output path is not valid UTF-8")?;

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(path_str, fourcc, fps, core::Size::new(width, height), true)?;
        anyhow::ensure!(
            writer.is_opened()?,
            "Failed to open video writer {}",
            output_path.display()
        );

        info!("Output video: {}", output_path.display());
        Ok(writer)
    }
}

/// Every video file below `input`, or `input` itself when it is a file.
pub fn find_video_files(input: &Path) -> std::result::Result<Vec<PathBuf>, CounterError> {
    if !input.exists() {
        return Err(CounterError::source_unavailable(
            input.display().to_string(),
            None,
            "no such file or directory",
        ));
    }
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut videos = Vec::new();
    for entry in WalkDir::new(input)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let is_video = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if is_video {
            videos.push(path.to_path_buf());
        }
    }
    videos.sort();

    info!("Found {} video files in {}", videos.len(), input.display());
    Ok(videos)
}

pub struct VideoReader {
    cap: VideoCapture,
    path: PathBuf,
    pub fps: f64,
    pub total_frames: u64,
    pub width: i32,
    pub height: i32,
    next_index: u64,
}

impl VideoReader {
    pub fn open(path: &Path, fallback_fps: f64) -> std::result::Result<Self, CounterError> {
        let unavailable =
            |reason: String| CounterError::source_unavailable(path.display().to_string(), None, reason);

        let path_str = path
            .to_str()
            .ok_or_else(|| unavailable("path is not valid UTF-8".to_string()))?;
        let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .map_err(|e| unavailable(e.to_string()))?;
        if !cap.is_opened().map_err(|e| unavailable(e.to_string()))? {
            return Err(unavailable("cannot open video".to_string()));
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            fallback_fps
        };
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(Self {
            cap,
            path: path.to_path_buf(),
            fps,
            total_frames,
            width,
            height,
            next_index: 0,
        })
    }

    /// Next decoded BGR frame with its zero-based index, `None` at the end.
    pub fn read_frame(&mut self) -> std::result::Result<Option<(u64, Mat)>, CounterError> {
        let index = self.next_index;
        let mut mat = Mat::default();
        let ok = VideoCaptureTrait::read(&mut self.cap, &mut mat).map_err(|e| {
            CounterError::source_unavailable(self.path.display().to_string(), Some(index), e.to_string())
        })?;
        if !ok || mat.empty() {
            return Ok(None);
        }
        self.next_index += 1;
        Ok(Some((index, mat)))
    }

    /// Decodes frame `index` directly.
    pub fn read_frame_at(&mut self, index: u64) -> std::result::Result<Mat, CounterError> {
        let unreadable = |reason: String| {
            CounterError::source_unavailable(self.path.display().to_string(), Some(index), reason)
        };
        VideoCaptureTrait::set(&mut self.cap, videoio::CAP_PROP_POS_FRAMES, index as f64)
            .map_err(|e| unreadable(e.to_string()))?;
        let mut mat = Mat::default();
        let ok = VideoCaptureTrait::read(&mut self.cap, &mut mat)
            .map_err(|e| unreadable(e.to_string()))?;
        if !ok || mat.empty() {
            return Err(unreadable("cannot read frame".to_string()));
        }
        Ok(mat)
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.next_index as f32 / self.total_frames as f32) * 100.0
    }
}

// ============================================================================
// DETECTOR + TRACKER AS A FRAME SOURCE
// ============================================================================

/// Decodes frames, runs the detector and the tracker, and yields tracker
/// frames carrying the decoded image.
pub struct VideoTrackerSource {
    reader: VideoReader,
    detector: YoloDetector,
    tracker: ObjectTracker,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl VideoTrackerSource {
    pub fn new(reader: VideoReader, detector: YoloDetector, config: &Config) -> Self {
        Self {
            reader,
            detector,
            tracker: ObjectTracker::new(config.tracking.clone()),
            confidence_threshold: config.tracking.confidence_threshold,
            iou_threshold: config.tracking.iou_threshold,
        }
    }

    pub fn reader(&self) -> &VideoReader {
        &self.reader
    }
}

impl TrackerSource for VideoTrackerSource {
    type Image = Mat;

    fn fps(&self) -> f64 {
        self.reader.fps
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.reader.width.max(0) as u32, self.reader.height.max(0) as u32)
    }

    fn total_frames(&self) -> Option<u64> {
        (self.reader.total_frames > 0).then_some(self.reader.total_frames)
    }

    fn next_frame(&mut self) -> std::result::Result<Option<TrackerFrame<Mat>>, CounterError> {
        let Some((index, image)) = self.reader.read_frame()? else {
            return Ok(None);
        };

        let detections = self
            .detector
            .detect(&image, self.confidence_threshold, self.iou_threshold)
            .map_err(|e| CounterError::Detector(format!("frame {}: {:#}", index, e)))?;
        let tracks = self.tracker.update(&detections);
        debug!(
            "Frame {}: {} detections, {} tracks",
            index,
            detections.len(),
            tracks.len()
        );

        Ok(Some(to_tracker_frame(index, image, &tracks)))
    }
}

// ============================================================================
// RENDERING
// ============================================================================

fn phase_color(phase: SignalPhase) -> core::Scalar {
    match phase {
        SignalPhase::Green => core::Scalar::new(0.0, 255.0, 0.0, 0.0),
        SignalPhase::Red => core::Scalar::new(0.0, 0.0, 255.0, 0.0),
    }
}

fn state_color(state: CrossingState) -> core::Scalar {
    match state {
        CrossingState::Uncrossed => core::Scalar::new(0.0, 0.0, 0.0, 0.0),
        CrossingState::CrossedGreen => core::Scalar::new(0.0, 255.0, 0.0, 0.0),
        CrossingState::CrossedRed => core::Scalar::new(0.0, 0.0, 255.0, 0.0),
    }
}

pub fn draw_count_line(
    image: &mut Mat,
    line: &CountLine,
    color: core::Scalar,
) -> std::result::Result<(), CounterError> {
    imgproc::line(
        image,
        core::Point::new(line.p1.x, line.p1.y),
        core::Point::new(line.p2.x, line.p2.y),
        color,
        2,
        imgproc::LINE_8,
        0,
    )?;
    Ok(())
}

/// Annotated copy of the frame: count line in the phase color, each tracked
/// box and its `ID{n}` label in the color of its crossing state, totals HUD.
pub fn draw_counting_overlay(
    frame: &TrackerFrame<Mat>,
    outcome: &FrameOutcome,
    aggregator: &FrameAggregator,
) -> std::result::Result<Mat, CounterError> {
    let mut output = frame.image.try_clone()?;
    draw_count_line(&mut output, aggregator.line(), phase_color(outcome.phase))?;

    let ids = frame.ids.as_deref().unwrap_or(&[]);
    for ((bbox, &id), &class_id) in frame.boxes.iter().zip(ids).zip(&frame.classes) {
        if !crate::counting::is_vehicle_class(class_id) {
            continue;
        }
        let color = state_color(aggregator.state_of(id));
        let [x1, y1, x2, y2] = bbox.map(|v| v as i32);
        imgproc::rectangle(
            &mut output,
            core::Rect::new(x1, y1, (x2 - x1).max(1), (y2 - y1).max(1)),
            color,
            2,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::put_text(
            &mut output,
            &format!("ID{}", id),
            core::Point::new(x1, y1 - 5),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.6,
            color,
            2,
            imgproc::LINE_8,
            false,
        )?;
    }

    imgproc::rectangle(
        &mut output,
        core::Rect::new(5, 5, 360, 36),
        core::Scalar::new(40.0, 40.0, 40.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    imgproc::put_text(
        &mut output,
        &format!(
            "{} | green: {} | red: {}",
            outcome.phase.as_str(),
            aggregator.green_total(),
            aggregator.red_total()
        ),
        core::Point::new(15, 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        phase_color(outcome.phase),
        2,
        imgproc::LINE_8,
        false,
    )?;

    Ok(output)
}

// ============================================================================
// LINE PREVIEW
// ============================================================================

/// Reads one frame at a random position of the video.
pub fn select_random_frame(
    path: &Path,
    fallback_fps: f64,
) -> std::result::Result<Mat, CounterError> {
    let mut reader = VideoReader::open(path, fallback_fps)?;
    let total = reader.total_frames.max(1);
    let index = rand::thread_rng().gen_range(0..total);
    debug!("Preview frame {} of {}", index, total);
    reader.read_frame_at(index)
}

/// Draws `line` on `frame` and writes the result to `output`.
pub fn save_line_preview(frame: &Mat, line: &CountLine, output: &Path) -> Result<()> {
    let mut annotated = frame.try_clone()?;
    draw_count_line(&mut annotated, line, core::Scalar::new(0.0, 255.0, 0.0, 0.0))?;

    let path_str = output.to_str().context("Preview path is not valid UTF-8")?;
    let written = imgcodecs::imwrite(path_str, &annotated, &core::Vector::<i32>::new())?;
    anyhow::ensure!(written, "Failed to write preview {}", output.display());
    info!("🖼️  Line preview saved to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("traffic-counter-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_input_is_source_unavailable() {
        let missing = std::env::temp_dir().join("traffic-counter-does-not-exist.mp4");
        let err = find_video_files(&missing).unwrap_err();
        assert!(matches!(
            err,
            CounterError::SourceUnavailable { frame: None, .. }
        ));
        assert!(err.to_string().contains("traffic-counter-does-not-exist.mp4"));
    }

    #[test]
    fn test_directory_lists_videos_only() {
        let dir = scratch_dir("find");
        fs::write(dir.join("b.MP4"), b"").unwrap();
        fs::write(dir.join("a.avi"), b"").unwrap();
        fs::write(dir.join("notes.txt"), b"").unwrap();

        let videos = find_video_files(&dir).unwrap();
        assert_eq!(videos, vec![dir.join("a.avi"), dir.join("b.MP4")]);
        assert_eq!(find_video_files(&dir.join("a.avi")).unwrap(), vec![dir.join("a.avi")]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
