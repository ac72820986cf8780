// src/vehicle_detection.rs
//
// YOLOv8 ONNX detector. Emits every COCO class above the confidence floor;
// the counter decides later which classes are vehicles.

use anyhow::{Context, Result};
use ndarray::ArrayView2;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::{debug, info};

use crate::tracker::{iou, DetectionInput};
use crate::types::ModelConfig;

const LETTERBOX_FILL: f64 = 114.0;

/// Maps network-input coordinates back to the original frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct YoloDetector {
    session: Session,
    input_size: usize,
}

impl YoloDetector {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Loading YOLO model: {}", config.path);

        let mut builder = Session::builder()?;
        if config.use_cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }
        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(&config.path)
            .with_context(|| format!("Failed to load model {}", config.path))?;

        info!("✓ YOLO detector initialized ({}px input)", config.input_size);
        Ok(Self {
            session,
            input_size: config.input_size,
        })
    }

    /// Detects objects in a BGR frame.
    pub fn detect(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Vec<DetectionInput>> {
        let (input, letterbox) = self.preprocess(frame)?;

        let size = self.input_size;
        let tensor = Tensor::from_array(([1usize, 3, size, size], input))?;
        let outputs = self.session.run(ort::inputs!["images" => tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        // [1, 4 + classes, predictions]
        anyhow::ensure!(
            shape.len() == 3 && shape[1] > 4,
            "unexpected YOLO output shape {:?}",
            &shape[..]
        );
        let rows = shape[1] as usize;
        let predictions = shape[2] as usize;
        let output = ArrayView2::from_shape((rows, predictions), data)
            .context("YOLO output does not match its shape")?;

        let detections = postprocess(output, letterbox, confidence_threshold);
        let detections = nms(detections, iou_threshold);

        debug!("Detected {} objects", detections.len());
        Ok(detections)
    }

    /// Letterbox to a square input, BGR → RGB, HWC u8 → CHW f32 in [0, 1].
    fn preprocess(&self, frame: &Mat) -> Result<(Vec<f32>, Letterbox)> {
        let size = self.input_size as i32;
        let (w, h) = (frame.cols(), frame.rows());
        anyhow::ensure!(w > 0 && h > 0, "empty frame");

        let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
        let new_w = ((w as f32 * scale).round() as i32).clamp(1, size);
        let new_h = ((h as f32 * scale).round() as i32).clamp(1, size);
        let pad_x = (size - new_w) / 2;
        let pad_y = (size - new_h) / 2;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            core::Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let mut padded = Mat::default();
        core::copy_make_border(
            &resized,
            &mut padded,
            pad_y,
            size - new_h - pad_y,
            pad_x,
            size - new_w - pad_x,
            core::BORDER_CONSTANT,
            core::Scalar::all(LETTERBOX_FILL),
        )?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&padded, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let bytes = rgb.data_bytes()?;

        let plane = (size * size) as usize;
        let mut input = vec![0.0f32; 3 * plane];
        for (i, px) in bytes.chunks_exact(3).enumerate() {
            for c in 0..3 {
                input[c * plane + i] = px[c] as f32 / 255.0;
            }
        }

        Ok((
            input,
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }
}

fn postprocess(
    output: ArrayView2<f32>,
    letterbox: Letterbox,
    conf_thresh: f32,
) -> Vec<DetectionInput> {
    let classes = output.nrows() - 4;
    let mut detections = Vec::new();

    for i in 0..output.ncols() {
        let column = output.column(i);

        let mut best_class = 0;
        let mut best_conf = 0.0f32;
        for c in 0..classes {
            let conf = column[4 + c];
            if conf > best_conf {
                best_conf = conf;
                best_class = c;
            }
        }
        if best_conf < conf_thresh {
            continue;
        }

        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        let (x1, y1) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

        detections.push(DetectionInput {
            bbox: [x1, y1, x2, y2],
            class_id: best_class as u32,
            confidence: best_conf,
        });
    }

    detections
}

/// Class-aware non-maximum suppression.
fn nms(mut detections: Vec<DetectionInput>, iou_threshold: f32) -> Vec<DetectionInput> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<DetectionInput> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == det.class_id && iou(&k.bbox, &det.bbox) >= iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}
