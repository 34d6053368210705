//! Helper functions and utilities for tests
#![allow(dead_code)]

use image::{Rgb, RgbImage};
use ndarray::Array4;
use rdt_reader::classifier::{ClassificationModel, InterpretationClassifier};
use rdt_reader::config::Config;
use rdt_reader::detection::{DetectionModel, FiducialDetector, RawDetections};
use rdt_reader::frame::Frame;
use rdt_reader::orchestrator::CaptureOrchestrator;
use rdt_reader::pipeline::CameraControl;
use rdt_reader::{Error, Result};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Frame size used by the capture scenarios; equals the display size
pub const FRAME_WIDTH: u32 = 480;
pub const FRAME_HEIGHT: u32 = 640;

/// Detector labels: background first, then the default roles
pub const FIDUCIAL_LABELS: [&str; 6] = ["???", "influenza", "squares", "abc", "test", "arrows"];

/// Classifier labels in score order
pub const RESULT_LABELS: [&str; 5] = ["invalid", "control", "flua", "flub", "both"];

/// Default configuration on a display the size of the test frames
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.capture.display_width = FRAME_WIDTH;
    config.capture.display_height = FRAME_HEIGHT;
    config
}

/// Sharp, well-exposed texture: two slow waves plus a 4 px checkerboard
pub fn textured_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let wave = 110.0 + 25.0 * (2.0 * PI * f64::from(x) / 97.0).sin() + 25.0 * (2.0 * PI * f64::from(y) / 89.0).cos();
        let checker = if ((x / 4) + (y / 4)) % 2 == 0 { 40.0 } else { -40.0 };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let v = (wave + checker).round().clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    })
}

/// Textured frame at the scenario size
pub fn textured_frame() -> Frame {
    Frame::new(textured_image(FRAME_WIDTH, FRAME_HEIGHT), 0).unwrap()
}

/// Featureless frame
pub fn blank_frame(level: u8) -> Frame {
    Frame::new(RgbImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Rgb([level; 3])), 0).unwrap()
}

/// Pixel centres of every role for a strip lying vertically in the desired outline
pub fn centered_fiducials(config: &Config) -> Vec<(usize, f64, f64)> {
    let display_height = f64::from(config.capture.display_height);
    let top = display_height * config.capture.instruction_height_fraction;
    let pixels_per_unit = display_height * config.capture.strip_height_fraction / config.strip.length;
    let x = f64::from(config.capture.display_width) / 2.0;

    FIDUCIAL_LABELS
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(index, label)| {
            let role = config.strip.fiducials.iter().find(|f| f.label == *label)?;
            Some((index, x, top + role.offset * pixels_per_unit))
        })
        .collect()
}

/// Raw detector output with a 20x12 px box around each centre
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn raw_boxes(centres: &[(usize, f64, f64)], dx: f64) -> RawDetections {
    let w = f64::from(FRAME_WIDTH);
    let h = f64::from(FRAME_HEIGHT);
    let mut raw = RawDetections::default();
    for &(label_index, x, y) in centres {
        let x = x + dx;
        raw.boxes.push([
            ((y - 6.0) / h) as f32,
            ((x - 10.0) / w) as f32,
            ((y + 6.0) / h) as f32,
            ((x + 10.0) / w) as f32,
        ]);
        // Raw classes exclude the background label
        raw.classes.push((label_index - 1) as f32);
        raw.scores.push(0.9);
    }
    raw.count = raw.boxes.len();
    raw
}

/// Detector replaying a fixed script; the last entry repeats
pub struct ScriptedDetector {
    script: Vec<RawDetections>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<RawDetections>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                script,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl DetectionModel for ScriptedDetector {
    fn input_size(&self) -> (u32, u32) {
        (16, 16)
    }

    fn infer(&mut self, _input: &Array4<f32>) -> Result<RawDetections> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .get(call)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_default())
    }
}

/// Detector that blocks inside inference until released
pub struct GatedDetector {
    pub started: Sender<()>,
    pub permit: Receiver<()>,
}

impl DetectionModel for GatedDetector {
    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn infer(&mut self, _input: &Array4<f32>) -> Result<RawDetections> {
        let _ = self.started.send(());
        self.permit
            .recv()
            .map_err(|_| Error::ModelError("gate closed".to_string()))?;
        Ok(RawDetections::default())
    }
}

/// Classifier that always picks one label
pub struct FixedClassifier {
    pub label_index: usize,
}

impl ClassificationModel for FixedClassifier {
    fn input_size(&self) -> (u32, u32) {
        (8, 8)
    }

    fn classify(&mut self, _input: &Array4<f32>) -> Result<Vec<f32>> {
        let mut scores = vec![0.0; RESULT_LABELS.len()];
        scores[self.label_index] = 1.0;
        Ok(scores)
    }
}

pub fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

pub fn fiducial_detector(model: Box<dyn DetectionModel>, config: &Config) -> FiducialDetector {
    FiducialDetector::new(
        "fiducial_detector",
        model,
        labels(&FIDUCIAL_LABELS),
        &config.detection,
        config.detection.box_confidence_threshold,
    )
}

/// Orchestrator with a scripted detector and a classifier fixed on `label_index`
pub fn scripted_orchestrator(
    config: &Config,
    script: Vec<RawDetections>,
    label_index: usize,
) -> (CaptureOrchestrator, Arc<AtomicUsize>) {
    let (detector, calls) = ScriptedDetector::new(script);
    let classifier = InterpretationClassifier::classifier(
        Box::new(FixedClassifier { label_index }),
        labels(&RESULT_LABELS),
    );
    (
        CaptureOrchestrator::new(config, fiducial_detector(Box::new(detector), config), classifier),
        calls,
    )
}

/// Camera that records requests
#[derive(Clone, Default)]
pub struct RecordingCamera {
    pub stills: Arc<AtomicUsize>,
    pub resumes: Arc<AtomicUsize>,
}

impl CameraControl for RecordingCamera {
    fn capture_still(&mut self) -> Result<()> {
        self.stills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn resume_preview(&mut self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Camera whose still capture always fails
#[derive(Clone, Default)]
pub struct FailingCamera {
    pub attempts: Arc<Mutex<usize>>,
}

impl CameraControl for FailingCamera {
    fn capture_still(&mut self) -> Result<()> {
        if let Ok(mut attempts) = self.attempts.lock() {
            *attempts += 1;
        }
        Err(Error::CameraControl("sensor busy".to_string()))
    }

    fn resume_preview(&mut self) -> Result<()> {
        Ok(())
    }
}
