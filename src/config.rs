//! Configuration management for the RDT reader

use crate::constants::{
    DEFAULT_ALIGNMENT_EPSILON, DEFAULT_ALIGNMENT_ITERATIONS, DEFAULT_BOX_CONFIDENCE_THRESHOLD,
    DEFAULT_CENTERING_TOLERANCE, DEFAULT_CLIP_COUNT_THRESHOLD, DEFAULT_DETECTOR_INPUT_SIZE,
    DEFAULT_FIDUCIALS, DEFAULT_GROWTH_FACTOR, DEFAULT_INTERPRETATION_CONFIDENCE_THRESHOLD,
    DEFAULT_LABEL_OFFSET, DEFAULT_MAX_FRAME_TRANSLATION, DEFAULT_MAX_LOCALIZATION_ERROR,
    DEFAULT_MAX_ORIENTATION_DEVIATION_DEG, DEFAULT_MAX_SCALE_DISPARITY, DEFAULT_MAX_WINDOW_TRANSLATION,
    DEFAULT_MIN_BOX_SIZE, DEFAULT_MOTION_WINDOW, DEFAULT_OVER_EXPOSURE_THRESHOLD,
    DEFAULT_PREVIEW_SHARPNESS_THRESHOLD, DEFAULT_PYRAMID_LEVELS, DEFAULT_STILL_SHARPNESS_THRESHOLD,
    DEFAULT_STRIP_OUTPUT_HEIGHT, DEFAULT_UNDER_EXPOSURE_THRESHOLD, DEFAULT_VOTE_SAMPLES,
    DEFAULT_WINDOW_SIZE, INSTRUCTION_HEIGHT_FRACTION, STRIP_HEIGHT_FRACTION, STRIP_LENGTH, STRIP_WIDTH,
    WINDOW_BOTTOM, WINDOW_TOP,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model file locations
    pub models: ModelConfig,

    /// Detector thresholds and tensor conventions
    pub detection: DetectionConfig,

    /// Canonical strip geometry
    pub strip: StripConfig,

    /// Fiducial localizer parameters
    pub localizer: LocalizerConfig,

    /// Sharpness and exposure gating
    pub quality: QualityConfig,

    /// Motion stability tracking
    pub motion: MotionConfig,

    /// Capture state machine and result aggregation
    pub capture: CaptureConfig,
}

/// Model file paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Phase-1 fiducial detector model
    pub fiducial_detector: PathBuf,

    /// Label map for the fiducial detector, one label per line
    pub fiducial_labels: PathBuf,

    /// Result interpretation model
    pub interpretation_model: PathBuf,

    /// Label map for the interpretation model
    pub interpretation_labels: PathBuf,

    /// How the interpretation model reports results
    pub interpretation_kind: InterpretationKind,
}

/// Output convention of the interpretation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpretationKind {
    /// One score per result label, best label wins
    Classifier,
    /// Boxes over result lines; each detected line sets its flag
    LineDetector,
}

/// Detector thresholds and label conventions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence for phase-1 fiducial detections (0.0-1.0)
    pub box_confidence_threshold: f32,

    /// Minimum confidence for phase-2 line detections (0.0-1.0)
    pub interpretation_confidence_threshold: f32,

    /// Offset added to raw class indices before label lookup
    pub label_offset: usize,

    /// Fallback square input size when the model does not declare one
    pub input_size: u32,

    /// Detections with a side shorter than this (pixels) are dropped
    pub min_box_size: f32,
}

/// One fiducial role on the strip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiducialConfig {
    /// Detector label naming this role
    pub label: String,

    /// Offset along the strip axis in strip units
    pub offset: f64,
}

/// Canonical strip geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    /// Strip length along its axis, in strip units
    pub length: f64,

    /// Strip width, in strip units
    pub width: f64,

    /// Start of the result window band along the axis
    pub window_top: f64,

    /// End of the result window band along the axis
    pub window_bottom: f64,

    /// Fiducial roles
    pub fiducials: Vec<FiducialConfig>,

    /// Height of the rectified strip image in pixels
    pub strip_output_height: u32,

    /// Side of the rectified window image in pixels
    pub window_size: u32,
}

/// Which landmark combinations the localizer evaluates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalizerMode {
    /// Pairs of roles
    Pair,
    /// Triples of roles with a scale consistency check
    Triple,
}

/// Fiducial localizer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    /// Combination size
    pub mode: LocalizerMode,

    /// Reject solutions with a larger residual (strip units)
    pub max_error: f64,

    /// Maximum deviation between axis angle and a detection's own orientation (degrees)
    pub max_orientation_deviation_deg: f64,

    /// Maximum relative disagreement of the two scale estimates of a triple
    pub max_scale_disparity: f64,

    /// Minor-axis growth applied to thin footprints
    pub growth_factor: f64,
}

/// Image quality thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum Laplacian variance for preview frames
    pub preview_sharpness_threshold: f64,

    /// Minimum Laplacian variance for full resolution stills
    pub still_sharpness_threshold: f64,

    /// Brightest-bin level at or above which clipping is checked
    pub over_exposure_threshold: u8,

    /// Brightest nonzero level below which the region is under-exposed
    pub under_exposure_threshold: u8,

    /// Pixel count in the brightest bin above which the region is over-exposed
    pub clip_count_threshold: u32,
}

/// Motion stability parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Number of 2x reductions before alignment
    pub pyramid_levels: u32,

    /// Samples kept in the sliding window
    pub window_capacity: usize,

    /// Per-frame translation limit (full-resolution pixels)
    pub max_frame_translation: f64,

    /// Window sum translation limit (full-resolution pixels)
    pub max_window_translation: f64,

    /// Alignment iteration cap
    pub max_iterations: usize,

    /// Alignment convergence threshold (tracking-resolution pixels)
    pub epsilon: f64,

    /// Report the first frame of a session as steady
    pub bootstrap_steady: bool,
}

/// How classifier readings become a final result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// One high-resolution still decides
    SingleShot,
    /// Majority over several preview readings
    Voting,
}

/// Capture state machine parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Display width in pixels
    pub display_width: u32,

    /// Display height in pixels
    pub display_height: u32,

    /// Display fraction above the desired outline
    pub instruction_height_fraction: f64,

    /// Display fraction covered by the desired outline
    pub strip_height_fraction: f64,

    /// Allowed outline deviation, as a fraction of display height
    pub centering_tolerance: f64,

    /// Result aggregation policy
    pub aggregation: AggregationMode,

    /// Readings required in voting mode
    pub vote_samples: usize,

    /// Where accepted stills are written, if anywhere
    pub output_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            fiducial_detector: PathBuf::from("assets/fiducial_detector.onnx"),
            fiducial_labels: PathBuf::from("assets/fiducial_labels.txt"),
            interpretation_model: PathBuf::from("assets/interpretation.onnx"),
            interpretation_labels: PathBuf::from("assets/interpretation_labels.txt"),
            interpretation_kind: InterpretationKind::Classifier,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            box_confidence_threshold: DEFAULT_BOX_CONFIDENCE_THRESHOLD,
            interpretation_confidence_threshold: DEFAULT_INTERPRETATION_CONFIDENCE_THRESHOLD,
            label_offset: DEFAULT_LABEL_OFFSET,
            input_size: DEFAULT_DETECTOR_INPUT_SIZE,
            min_box_size: DEFAULT_MIN_BOX_SIZE,
        }
    }
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            length: STRIP_LENGTH,
            width: STRIP_WIDTH,
            window_top: WINDOW_TOP,
            window_bottom: WINDOW_BOTTOM,
            fiducials: DEFAULT_FIDUCIALS
                .iter()
                .map(|&(label, offset)| FiducialConfig {
                    label: label.to_string(),
                    offset,
                })
                .collect(),
            strip_output_height: DEFAULT_STRIP_OUTPUT_HEIGHT,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            mode: LocalizerMode::Pair,
            max_error: DEFAULT_MAX_LOCALIZATION_ERROR,
            max_orientation_deviation_deg: DEFAULT_MAX_ORIENTATION_DEVIATION_DEG,
            max_scale_disparity: DEFAULT_MAX_SCALE_DISPARITY,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            preview_sharpness_threshold: DEFAULT_PREVIEW_SHARPNESS_THRESHOLD,
            still_sharpness_threshold: DEFAULT_STILL_SHARPNESS_THRESHOLD,
            over_exposure_threshold: DEFAULT_OVER_EXPOSURE_THRESHOLD,
            under_exposure_threshold: DEFAULT_UNDER_EXPOSURE_THRESHOLD,
            clip_count_threshold: DEFAULT_CLIP_COUNT_THRESHOLD,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pyramid_levels: DEFAULT_PYRAMID_LEVELS,
            window_capacity: DEFAULT_MOTION_WINDOW,
            max_frame_translation: DEFAULT_MAX_FRAME_TRANSLATION,
            max_window_translation: DEFAULT_MAX_WINDOW_TRANSLATION,
            max_iterations: DEFAULT_ALIGNMENT_ITERATIONS,
            epsilon: DEFAULT_ALIGNMENT_EPSILON,
            bootstrap_steady: false,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            display_width: 720,
            display_height: 1280,
            instruction_height_fraction: INSTRUCTION_HEIGHT_FRACTION,
            strip_height_fraction: STRIP_HEIGHT_FRACTION,
            centering_tolerance: DEFAULT_CENTERING_TOLERANCE,
            aggregation: AggregationMode::SingleShot,
            vote_samples: DEFAULT_VOTE_SAMPLES,
            output_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::IoError(e.to_string()))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content).map_err(|e| Error::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        // Detection thresholds
        if !(0.0..=1.0).contains(&self.detection.box_confidence_threshold) {
            return Err(Error::ConfigError(
                "Box confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.interpretation_confidence_threshold) {
            return Err(Error::ConfigError(
                "Interpretation confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.detection.input_size == 0 {
            return Err(Error::ConfigError("Detector input size must be greater than 0".to_string()));
        }

        // Strip geometry
        let strip = &self.strip;
        if strip.length <= 0.0 || strip.width <= 0.0 {
            return Err(Error::ConfigError("Strip dimensions must be positive".to_string()));
        }
        if !(0.0 <= strip.window_top && strip.window_top < strip.window_bottom && strip.window_bottom <= strip.length) {
            return Err(Error::ConfigError(
                "Result window band must lie inside the strip with top < bottom".to_string(),
            ));
        }
        if strip.fiducials.len() < 2 {
            return Err(Error::ConfigError("At least two fiducial roles are required".to_string()));
        }
        for (i, fiducial) in strip.fiducials.iter().enumerate() {
            if !(0.0..=strip.length).contains(&fiducial.offset) {
                return Err(Error::ConfigError(format!(
                    "Fiducial '{}' offset {} lies outside the strip",
                    fiducial.label, fiducial.offset
                )));
            }
            if strip.fiducials[..i].iter().any(|other| other.label == fiducial.label) {
                return Err(Error::ConfigError(format!("Duplicate fiducial label '{}'", fiducial.label)));
            }
        }
        if strip.strip_output_height == 0 || strip.window_size == 0 {
            return Err(Error::ConfigError("Rectified image sizes must be greater than 0".to_string()));
        }

        // Localizer
        if self.localizer.mode == LocalizerMode::Triple && strip.fiducials.len() < 3 {
            return Err(Error::ConfigError(
                "Triple localization requires at least three fiducial roles".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.localizer.max_scale_disparity) {
            return Err(Error::ConfigError(
                "Scale disparity must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.localizer.max_error <= 0.0 {
            return Err(Error::ConfigError("Localizer max error must be positive".to_string()));
        }

        // Quality
        if self.quality.under_exposure_threshold > self.quality.over_exposure_threshold {
            return Err(Error::ConfigError(
                "Under-exposure threshold must not exceed the over-exposure threshold".to_string(),
            ));
        }

        // Motion
        if self.motion.window_capacity == 0 {
            return Err(Error::ConfigError("Motion window must hold at least one sample".to_string()));
        }
        if self.motion.max_iterations == 0 || self.motion.epsilon <= 0.0 {
            return Err(Error::ConfigError(
                "Alignment needs a positive iteration cap and epsilon".to_string(),
            ));
        }
        if self.motion.pyramid_levels > 6 {
            return Err(Error::ConfigError("Pyramid levels must be at most 6".to_string()));
        }

        // Capture
        let capture = &self.capture;
        if capture.display_width == 0 || capture.display_height == 0 {
            return Err(Error::ConfigError("Display size must be greater than 0".to_string()));
        }
        if capture.instruction_height_fraction + capture.strip_height_fraction > 1.0 {
            return Err(Error::ConfigError(
                "Desired outline must fit inside the display".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&capture.centering_tolerance) {
            return Err(Error::ConfigError(
                "Centering tolerance must be between 0.0 and 1.0".to_string(),
            ));
        }
        if capture.vote_samples == 0 {
            return Err(Error::ConfigError("Vote samples must be greater than 0".to_string()));
        }

        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# RDT Reader Configuration

# Model paths
models:
  fiducial_detector: "assets/fiducial_detector.onnx"
  fiducial_labels: "assets/fiducial_labels.txt"
  interpretation_model: "assets/interpretation.onnx"
  interpretation_labels: "assets/interpretation_labels.txt"
  # classifier | line_detector
  interpretation_kind: classifier

# Detector thresholds
detection:
  box_confidence_threshold: 0.5
  interpretation_confidence_threshold: 0.2
  label_offset: 1
  input_size: 300
  min_box_size: 4.0

# Canonical strip geometry (strip units)
strip:
  length: 87.0
  width: 5.0
  window_top: 51.0
  window_bottom: 61.0
  fiducials:
    - { label: arrows, offset: 72.5 }
    - { label: test, offset: 57.0 }
    - { label: abc, offset: 36.5 }
    - { label: squares, offset: 15.5 }
    - { label: influenza, offset: 6.5 }
  strip_output_height: 640
  window_size: 300

# Fiducial localizer
localizer:
  # pair | triple
  mode: pair
  max_error: 4.0
  max_orientation_deviation_deg: 30.0
  max_scale_disparity: 0.25
  growth_factor: 0.25

# Image quality gating
quality:
  preview_sharpness_threshold: 10.0
  still_sharpness_threshold: 100.0
  over_exposure_threshold: 255
  under_exposure_threshold: 120
  clip_count_threshold: 100

# Motion stability
motion:
  pyramid_levels: 2
  window_capacity: 11
  max_frame_translation: 10.0
  max_window_translation: 20.0
  max_iterations: 50
  epsilon: 0.001
  bootstrap_steady: false

# Capture and aggregation
capture:
  display_width: 720
  display_height: 1280
  instruction_height_fraction: 0.25
  strip_height_fraction: 0.65
  centering_tolerance: 0.1
  # single_shot | voting
  aggregation: single_shot
  vote_samples: 4
"#;
