//! Constants used throughout the library

/// Confidence threshold for phase-1 fiducial detections
pub const DEFAULT_BOX_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Confidence threshold for phase-2 result-line detections
pub const DEFAULT_INTERPRETATION_CONFIDENCE_THRESHOLD: f32 = 0.2;

/// Detector label index offset (index 0 is the background class)
pub const DEFAULT_LABEL_OFFSET: usize = 1;

/// Minimum detection box side length in frame pixels
pub const DEFAULT_MIN_BOX_SIZE: f32 = 4.0;

/// Square input side of the bundled detector models
pub const DEFAULT_DETECTOR_INPUT_SIZE: u32 = 300;

/// Detector input normalization: `(x - 128) / 128`
pub const DETECTOR_NORMALIZATION_MEAN: f32 = 128.0;
pub const DETECTOR_NORMALIZATION_STD: f32 = 128.0;

/// `ImageNet` statistics used by the result classifier, in 0..255 pixel units
pub const IMAGENET_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
pub const IMAGENET_STD: [f32; 3] = [58.395, 57.12, 57.375];

/// Canonical strip length in strip units
pub const STRIP_LENGTH: f64 = 87.0;

/// Canonical strip width in strip units
pub const STRIP_WIDTH: f64 = 5.0;

/// Result window band along the strip axis
pub const WINDOW_TOP: f64 = 51.0;
pub const WINDOW_BOTTOM: f64 = 61.0;

/// Side of the rectified window image handed to the classifier
pub const DEFAULT_WINDOW_SIZE: u32 = 300;

/// Height of the rectified strip image in pixels
pub const DEFAULT_STRIP_OUTPUT_HEIGHT: u32 = 640;

/// Fiducial labels and their offsets along the strip axis, in strip units
pub const DEFAULT_FIDUCIALS: [(&str, f64); 5] = [
    ("arrows", 72.5),
    ("test", 57.0),
    ("abc", 36.5),
    ("squares", 15.5),
    ("influenza", 6.5),
];

/// Maximum deviation between derived axis angle and a detector orientation estimate
pub const DEFAULT_MAX_ORIENTATION_DEVIATION_DEG: f64 = 30.0;

/// Allowed disagreement between independent scale estimates (s1/s2 in [0.75, 1.25])
pub const DEFAULT_MAX_SCALE_DISPARITY: f64 = 0.25;

/// Maximum localization residual in strip units
pub const DEFAULT_MAX_LOCALIZATION_ERROR: f64 = 4.0;

/// Footprint growth along the minor axis
pub const DEFAULT_GROWTH_FACTOR: f64 = 0.25;

/// Sharpness thresholds (Laplacian variance) for preview and still resolution
pub const DEFAULT_PREVIEW_SHARPNESS_THRESHOLD: f64 = 10.0;
pub const DEFAULT_STILL_SHARPNESS_THRESHOLD: f64 = 100.0;

/// Exposure classification thresholds
pub const DEFAULT_OVER_EXPOSURE_THRESHOLD: u8 = 255;
pub const DEFAULT_UNDER_EXPOSURE_THRESHOLD: u8 = 120;
pub const DEFAULT_CLIP_COUNT_THRESHOLD: u32 = 100;

/// Number of 2x pyramid reductions before motion estimation
pub const DEFAULT_PYRAMID_LEVELS: u32 = 2;

/// Motion samples kept in the sliding window
pub const DEFAULT_MOTION_WINDOW: usize = 11;

/// Translation limits in full-resolution pixels
pub const DEFAULT_MAX_FRAME_TRANSLATION: f64 = 10.0;
pub const DEFAULT_MAX_WINDOW_TRANSLATION: f64 = 20.0;

/// Iterative alignment limits
pub const DEFAULT_ALIGNMENT_ITERATIONS: usize = 50;
pub const DEFAULT_ALIGNMENT_EPSILON: f64 = 1e-3;

/// Gaussian sigma applied before each pyramid decimation
pub const PYRAMID_BLUR_SIGMA: f32 = 1.0;

/// Display fraction above the strip reserved for instructions
pub const INSTRUCTION_HEIGHT_FRACTION: f64 = 0.25;

/// Display fraction covered by the desired strip outline
pub const STRIP_HEIGHT_FRACTION: f64 = 0.65;

/// Centering tolerance as a fraction of display height
pub const DEFAULT_CENTERING_TOLERANCE: f64 = 0.1;

/// Preview classifications required in voting mode
pub const DEFAULT_VOTE_SAMPLES: usize = 4;

/// File name used when persisting an accepted still
pub const CAPTURE_FILE_NAME: &str = "rdt_photo.jpg";

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;
