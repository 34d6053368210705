//! Interpretation of the rectified result window.
//!
//! Two model conventions are supported. A classifier scores the whole
//! window against result labels and the best label is mapped to line flags.
//! A line detector finds boxes over individual result lines; every line
//! detected at the interpretation threshold sets its flag.

use crate::constants::{IMAGENET_MEAN, IMAGENET_STD};
use crate::detection::FiducialDetector;
use crate::utils::image_conversion::{rgb_to_tensor, Normalization, TensorLayout};
use crate::{Error, Result};
use image::RgbImage;
use log::{debug, error, warn};
use ndarray::Array4;
use serde::Serialize;

/// Presence of each result line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineReading {
    pub control: bool,
    pub test_a: bool,
    pub test_b: bool,
}

/// Best-label outcome of a whole-window classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultLabel {
    Invalid,
    Control,
    FluA,
    FluB,
    Both,
}

impl ResultLabel {
    /// Parse a label map entry; unknown names are `None`
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match normalize_label(label).as_str() {
            "invalid" => Some(Self::Invalid),
            "control" | "negative" => Some(Self::Control),
            "flua" | "a" => Some(Self::FluA),
            "flub" | "b" => Some(Self::FluB),
            "both" | "fluab" => Some(Self::Both),
            _ => None,
        }
    }

    /// Line flags implied by the label
    #[must_use]
    pub const fn reading(self) -> LineReading {
        let (control, test_a, test_b) = match self {
            Self::Invalid => (false, false, false),
            Self::Control => (true, false, false),
            Self::FluA => (true, true, false),
            Self::FluB => (true, false, true),
            Self::Both => (true, true, true),
        };
        LineReading { control, test_a, test_b }
    }
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whole-image classification capability
pub trait ClassificationModel: Send {
    /// Expected input `(width, height)`
    fn input_size(&self) -> (u32, u32);

    fn layout(&self) -> TensorLayout {
        TensorLayout::Nchw
    }

    fn normalization(&self) -> Normalization {
        Normalization::per_channel(IMAGENET_MEAN, IMAGENET_STD)
    }

    /// One score (logit or probability) per label
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails
    fn classify(&mut self, input: &Array4<f32>) -> Result<Vec<f32>>;
}

enum Backend {
    Classifier {
        model: Box<dyn ClassificationModel>,
        labels: Vec<String>,
    },
    LineDetector(FiducialDetector),
    Unavailable(String),
}

/// Reads line flags from a result window
pub struct InterpretationClassifier {
    backend: Backend,
}

impl InterpretationClassifier {
    /// Whole-window classifier with its label map
    #[must_use]
    pub fn classifier(model: Box<dyn ClassificationModel>, labels: Vec<String>) -> Self {
        Self {
            backend: Backend::Classifier { model, labels },
        }
    }

    /// Line detector; its threshold is the interpretation threshold
    #[must_use]
    pub fn line_detector(detector: FiducialDetector) -> Self {
        // The detector already reported its own load failure
        if let Some(reason) = detector.unavailable_reason() {
            return Self {
                backend: Backend::Unavailable(reason.to_string()),
            };
        }
        Self {
            backend: Backend::LineDetector(detector),
        }
    }

    /// Disabled classifier; every call yields no reading
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        error!("Interpretation model could not be initialized: {reason}");
        Self {
            backend: Backend::Unavailable(reason),
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.backend, Backend::Unavailable(_))
    }

    #[must_use]
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.backend {
            Backend::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }

    /// Classify a window; `None` when the model is unavailable or fails
    pub fn classify(&mut self, window: &RgbImage) -> Option<LineReading> {
        let result = match &mut self.backend {
            Backend::Unavailable(_) => return None,
            Backend::Classifier { model, labels } => classify_window(model.as_mut(), labels, window),
            Backend::LineDetector(detector) => Ok(read_lines(detector, window)),
        };
        match result {
            Ok(reading) => {
                debug!("Window reading {reading:?}");
                Some(reading)
            }
            Err(e) => {
                warn!("Interpretation failed: {e}");
                None
            }
        }
    }
}

impl std::fmt::Debug for InterpretationClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.backend {
            Backend::Classifier { .. } => "classifier",
            Backend::LineDetector(_) => "line_detector",
            Backend::Unavailable(_) => "unavailable",
        };
        f.debug_struct("InterpretationClassifier").field("kind", &kind).finish()
    }
}

fn classify_window(model: &mut dyn ClassificationModel, labels: &[String], window: &RgbImage) -> Result<LineReading> {
    let (width, height) = model.input_size();
    let tensor = rgb_to_tensor(window, width, height, &model.normalization(), model.layout())?;
    let scores = model.classify(&tensor)?;

    let (best, _) = scores
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .ok_or_else(|| Error::ModelOutputError("Classifier returned no finite scores".to_string()))?;
    let label = labels
        .get(best)
        .ok_or_else(|| Error::ModelOutputError(format!("Class index {best} has no label")))?;
    let result = ResultLabel::from_label(label).unwrap_or_else(|| {
        debug!("Unrecognized result label '{label}', reading as invalid");
        ResultLabel::Invalid
    });
    Ok(result.reading())
}

fn read_lines(detector: &mut FiducialDetector, window: &RgbImage) -> LineReading {
    let mut reading = LineReading::default();
    for detection in detector.detect_default(window) {
        match normalize_label(&detection.label).as_str() {
            "control" | "c" => reading.control = true,
            "flua" | "testa" | "a" => reading.test_a = true,
            "flub" | "testb" | "b" => reading.test_b = true,
            _ => {}
        }
    }
    reading
}
