//! Bounding-box detection of strip fiducials and result lines.
//!
//! The trained network is consumed through the [`DetectionModel`] trait: a
//! fixed-size image tensor in, `{boxes, classes, scores, count}` out. The
//! [`FiducialDetector`] owns everything around that call: resizing and
//! normalization before inference, label lookup, confidence filtering and
//! mapping boxes back into frame pixels afterwards.

use crate::config::DetectionConfig;
use crate::geometry::BoundingBox;
use crate::utils::image_conversion::{rgb_to_tensor, Normalization, TensorLayout};
use crate::constants::{DETECTOR_NORMALIZATION_MEAN, DETECTOR_NORMALIZATION_STD};
use crate::{Error, Result};
use image::RgbImage;
use log::{debug, error, warn};
use nalgebra::Point2;
use ndarray::Array4;
use serde::Serialize;
use std::path::Path;

/// Single detection in frame coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// Class label
    pub label: String,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    /// Axis-aligned box in frame pixels
    pub bbox: BoundingBox,
    /// Orientation estimate of the strip axis in degrees, if the model provides one
    pub orientation_degrees: Option<f32>,
}

impl Detection {
    /// Box centre in frame pixels
    #[must_use]
    pub fn center(&self) -> Point2<f64> {
        self.bbox.center()
    }
}

/// Raw detector output for one image
///
/// Boxes are normalized `[ymin, xmin, ymax, xmax]` in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
    pub boxes: Vec<[f32; 4]>,
    pub classes: Vec<f32>,
    pub scores: Vec<f32>,
    pub orientations: Option<Vec<f32>>,
    pub count: usize,
}

/// Bounding-box detector capability
pub trait DetectionModel: Send {
    /// Expected input `(width, height)`
    fn input_size(&self) -> (u32, u32);

    /// Expected tensor layout
    fn layout(&self) -> TensorLayout {
        TensorLayout::Nhwc
    }

    /// Input normalization
    fn normalization(&self) -> Normalization {
        Normalization::uniform(DETECTOR_NORMALIZATION_MEAN, DETECTOR_NORMALIZATION_STD)
    }

    /// Run inference on a prepared batch-of-one tensor
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails or the output is malformed
    fn infer(&mut self, input: &Array4<f32>) -> Result<RawDetections>;
}

/// Load a label map with one label per line
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no labels
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let labels: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if labels.is_empty() {
        return Err(Error::ModelDataFormatError(format!(
            "Label file {} is empty",
            path.as_ref().display()
        )));
    }
    Ok(labels)
}

/// Detector with pre/post-processing, or a disabled placeholder
pub struct FiducialDetector {
    name: String,
    model: Option<Box<dyn DetectionModel>>,
    unavailable_reason: Option<String>,
    labels: Vec<String>,
    label_offset: usize,
    confidence_threshold: f32,
    min_box_size: f32,
}

impl FiducialDetector {
    /// Wrap a working model
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        model: Box<dyn DetectionModel>,
        labels: Vec<String>,
        config: &DetectionConfig,
        confidence_threshold: f32,
    ) -> Self {
        Self {
            name: name.into(),
            model: Some(model),
            unavailable_reason: None,
            labels,
            label_offset: config.label_offset,
            confidence_threshold,
            min_box_size: config.min_box_size,
        }
    }

    /// Disabled detector; every call returns no detections
    #[must_use]
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        let name = name.into();
        let reason = reason.into();
        error!("{name} could not be initialized: {reason}");
        Self {
            name,
            model: None,
            unavailable_reason: Some(reason),
            labels: Vec::new(),
            label_offset: 0,
            confidence_threshold: 1.0,
            min_box_size: 0.0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// Why the model could not be loaded
    #[must_use]
    pub fn unavailable_reason(&self) -> Option<&str> {
        self.unavailable_reason.as_deref()
    }

    /// Configured confidence threshold
    #[must_use]
    pub const fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Detect objects at the configured threshold
    pub fn detect_default(&mut self, image: &RgbImage) -> Vec<Detection> {
        self.detect(image, self.confidence_threshold)
    }

    /// Detect objects scoring at least `confidence_threshold`.
    ///
    /// Never fails: inference errors are logged and yield an empty list.
    pub fn detect(&mut self, image: &RgbImage, confidence_threshold: f32) -> Vec<Detection> {
        if self.model.is_none() {
            return Vec::new();
        }
        match self.run(image, confidence_threshold) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("{} inference failed: {e}", self.name);
                Vec::new()
            }
        }
    }

    fn run(&mut self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| Error::ModelError(format!("{} is unavailable", self.name)))?;

        let (input_width, input_height) = model.input_size();
        let tensor = rgb_to_tensor(image, input_width, input_height, &model.normalization(), model.layout())?;
        let raw = model.infer(&tensor)?;

        Ok(self.decode(&raw, image.width(), image.height(), confidence_threshold))
    }

    /// Map raw model output into frame-space detections, best first
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Class indices are small non-negative integers
    #[allow(clippy::cast_sign_loss)] // Negative classes are rejected first
    #[allow(clippy::cast_precision_loss)] // Frame dimensions are far below f32 precision limits
    pub fn decode(&self, raw: &RawDetections, frame_width: u32, frame_height: u32, confidence_threshold: f32) -> Vec<Detection> {
        let count = raw
            .count
            .min(raw.boxes.len())
            .min(raw.classes.len())
            .min(raw.scores.len());
        let fw = frame_width as f32;
        let fh = frame_height as f32;

        let mut detections = Vec::with_capacity(count);
        for i in 0..count {
            let score = raw.scores[i];
            if !score.is_finite() || score < confidence_threshold {
                continue;
            }

            let class = raw.classes[i];
            if !class.is_finite() || class < 0.0 {
                continue;
            }
            let label = (class.round() as usize)
                .checked_add(self.label_offset)
                .and_then(|index| self.labels.get(index));
            let Some(label) = label else {
                debug!("{}: class index {class} has no label", self.name);
                continue;
            };

            let [ymin, xmin, ymax, xmax] = raw.boxes[i];
            if ![ymin, xmin, ymax, xmax].iter().all(|v| v.is_finite()) {
                continue;
            }
            let bbox = BoundingBox::new(
                (xmin * fw).clamp(0.0, fw),
                (ymin * fh).clamp(0.0, fh),
                (xmax * fw).clamp(0.0, fw),
                (ymax * fh).clamp(0.0, fh),
            );
            if bbox.width() < self.min_box_size || bbox.height() < self.min_box_size {
                continue;
            }

            let orientation_degrees = raw
                .orientations
                .as_ref()
                .and_then(|o| o.get(i).copied())
                .filter(|o| o.is_finite());

            detections.push(Detection {
                label: label.clone(),
                confidence: score.clamp(0.0, 1.0),
                bbox,
                orientation_degrees,
            });
        }

        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections
    }
}

impl std::fmt::Debug for FiducialDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiducialDetector")
            .field("name", &self.name)
            .field("available", &self.is_available())
            .field("labels", &self.labels.len())
            .field("confidence_threshold", &self.confidence_threshold)
            .finish_non_exhaustive()
    }
}
