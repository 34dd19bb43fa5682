//! Candidate object detection
//!
//! Runs a YOLO-style localization model over the whole image and turns its
//! raw predictions into clipped bounding boxes with cropped sub-images.
//! Every object class is kept: anything that looks like an object is a
//! candidate for catalog matching.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::models::{LazyModel, ModelManager, ModelType};
use super::preprocess::{preprocess_for_detection, Letterbox};
use crate::config::DetectionSettings;
use crate::error::AuditError;

/// Axis-aligned box in source pixel space, `x1 < x2` and `y1 < y2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Build a box from float corners, clipped to a `width` x `height` image.
    ///
    /// Returns `None` when nothing with positive area remains after clipping.
    pub fn clipped(corners: [f32; 4], width: u32, height: u32) -> Option<Self> {
        if corners.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let [x1, y1, x2, y2] = corners;
        let x1 = x1.floor().clamp(0.0, width as f32) as u32;
        let y1 = y1.floor().clamp(0.0, height as f32) as u32;
        let x2 = x2.ceil().clamp(0.0, width as f32) as u32;
        let y2 = y2.ceil().clamp(0.0, height as f32) as u32;

        if x1 >= x2 || y1 >= y2 {
            return None;
        }

        Some(Self { x1, y1, x2, y2 })
    }
}

/// One candidate object found in an image
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    /// Location in the source image
    pub bbox: BoundingBox,
    /// Source pixels inside `bbox`
    pub crop: DynamicImage,
    /// Detector confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Detector class index
    pub class_id: usize,
}

/// Undecoded detector prediction in model input space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// Corners [x1, y1, x2, y2]
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

/// Object detector backed by an ONNX model
pub struct RegionDetector {
    model: LazyModel,
    settings: DetectionSettings,
}

impl RegionDetector {
    /// Create a detector; the model is loaded on first use
    pub fn new(manager: Arc<ModelManager>, settings: DetectionSettings) -> Self {
        Self {
            model: LazyModel::new(manager, ModelType::Detector),
            settings,
        }
    }

    /// Force the model load
    pub fn preload(&self) -> Result<(), AuditError> {
        self.model.get().map(|_| ())
    }

    /// Find candidate regions in a decoded image
    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedRegion>, AuditError> {
        let start = Instant::now();
        let input_size = self.settings.input_size;

        let (tensor, mapping) = preprocess_for_detection(image, input_size);

        let session = self.model.get()?;
        let (shape, output) = session.lock().run(tensor)?;

        let raw = decode_predictions(&output, &shape, self.settings.confidence_threshold)?;
        let mut kept = non_maximum_suppression(raw, self.settings.iou_threshold);
        kept.truncate(self.settings.max_detections);

        let regions = crop_regions(image, &kept, &mapping);

        debug!(
            "Detection complete in {:?}: {} regions",
            start.elapsed(),
            regions.len()
        );

        Ok(regions)
    }
}

/// Decode a `[1, 4 + classes, proposals]` (or transposed) YOLO output.
///
/// Each proposal is `[cx, cy, w, h, class scores...]`; the best class is
/// kept whatever it is.
pub fn decode_predictions(
    output: &[f32],
    shape: &[i64],
    confidence_threshold: f32,
) -> Result<Vec<RawDetection>, AuditError> {
    let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    let (rows, cols) = match dims.as_slice() {
        [1, rows, cols] | [rows, cols] => (*rows, *cols),
        _ => {
            return Err(AuditError::inference(format!(
                "unexpected detector output shape {:?}",
                shape
            )))
        }
    };

    if rows * cols != output.len() {
        return Err(AuditError::inference(format!(
            "detector output has {} values, shape {:?}",
            output.len(),
            shape
        )));
    }

    // Attributes normally run along the shorter axis
    let transposed = rows > cols;
    let (attributes, proposals) = if transposed { (cols, rows) } else { (rows, cols) };

    if attributes < 5 {
        return Err(AuditError::inference(format!(
            "detector output has no class scores, shape {:?}",
            shape
        )));
    }

    let value = |attr: usize, i: usize| {
        if transposed {
            output[i * attributes + attr]
        } else {
            output[attr * proposals + i]
        }
    };

    let mut detections = Vec::new();

    for i in 0..proposals {
        let mut best_score = 0.0f32;
        let mut best_class = 0;

        for c in 0..(attributes - 4) {
            let score = value(4 + c, i);
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (value(0, i), value(1, i), value(2, i), value(3, i));

        detections.push(RawDetection {
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            confidence: best_score,
            class_id: best_class,
        });
    }

    Ok(detections)
}

/// Per-class greedy non-maximum suppression, highest confidence first
pub fn non_maximum_suppression(mut detections: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawDetection> = Vec::new();

    for det in detections {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id == det.class_id && intersection_over_union(&kept.bbox, &det.bbox) > iou_threshold
        });

        if !suppressed {
            keep.push(det);
        }
    }

    keep
}

fn intersection_over_union(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Map detections back to source pixels and crop them out of `image`
pub fn crop_regions(image: &DynamicImage, detections: &[RawDetection], mapping: &Letterbox) -> Vec<DetectedRegion> {
    let (width, height) = (image.width(), image.height());

    detections
        .iter()
        .filter_map(|det| {
            let (x1, y1) = mapping.to_source(det.bbox[0], det.bbox[1]);
            let (x2, y2) = mapping.to_source(det.bbox[2], det.bbox[3]);
            let bbox = BoundingBox::clipped([x1, y1, x2, y2], width, height)?;

            Some(DetectedRegion {
                bbox,
                crop: image.crop_imm(bbox.x1, bbox.y1, bbox.width(), bbox.height()),
                confidence: det.confidence,
                class_id: det.class_id,
            })
        })
        .collect()
}
