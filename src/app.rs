//! Application layer: model loading and image-sequence replay.

use crate::aggregator::InterpretationResult;
use crate::classifier::InterpretationClassifier;
use crate::config::{Config, InterpretationKind};
use crate::detection::FiducialDetector;
use crate::events::PipelineEvent;
use crate::frame::Frame;
use crate::orchestrator::CaptureOrchestrator;
use crate::pipeline::{CameraControl, CaptureSink, DirectoryCaptureSink, Pipeline, SubmitOutcome};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// File extensions replayed as frames
const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Poll interval while waiting on the worker
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Build the fiducial detector, degrading to an unavailable one on failure
#[must_use]
pub fn load_fiducial_detector(config: &Config) -> FiducialDetector {
    match open_detector(
        &config.models.fiducial_detector,
        &config.models.fiducial_labels,
        config,
        config.detection.box_confidence_threshold,
    ) {
        Ok(detector) => detector,
        Err(e) => FiducialDetector::unavailable("fiducial_detector", e.to_string()),
    }
}

/// Build the interpretation model, degrading to an unavailable one on failure
#[must_use]
pub fn load_interpretation_classifier(config: &Config) -> InterpretationClassifier {
    let models = &config.models;
    let loaded = match models.interpretation_kind {
        InterpretationKind::LineDetector => open_detector(
            &models.interpretation_model,
            &models.interpretation_labels,
            config,
            config.detection.interpretation_confidence_threshold,
        )
        .map(InterpretationClassifier::line_detector),
        InterpretationKind::Classifier => open_classifier(config),
    };
    loaded.unwrap_or_else(|e| InterpretationClassifier::unavailable(e.to_string()))
}

/// Orchestrator with every model loaded from `config`
#[must_use]
pub fn build_orchestrator(config: &Config) -> CaptureOrchestrator {
    CaptureOrchestrator::new(
        config,
        load_fiducial_detector(config),
        load_interpretation_classifier(config),
    )
}

#[cfg(feature = "onnx")]
fn open_detector(model: &Path, labels: &Path, config: &Config, threshold: f32) -> Result<FiducialDetector> {
    let labels = crate::detection::load_labels(labels)?;
    let backend = crate::onnx::OnnxDetectionModel::new(model, config.detection.input_size)?;
    Ok(FiducialDetector::new(
        model.file_stem().map_or_else(|| "detector".to_string(), |s| s.to_string_lossy().into_owned()),
        Box::new(backend),
        labels,
        &config.detection,
        threshold,
    ))
}

#[cfg(not(feature = "onnx"))]
fn open_detector(model: &Path, _labels: &Path, _config: &Config, _threshold: f32) -> Result<FiducialDetector> {
    Err(Error::ModelError(format!(
        "cannot load {}: built without the `onnx` feature",
        model.display()
    )))
}

#[cfg(feature = "onnx")]
fn open_classifier(config: &Config) -> Result<InterpretationClassifier> {
    let labels = crate::detection::load_labels(&config.models.interpretation_labels)?;
    let backend = crate::onnx::OnnxClassificationModel::new(&config.models.interpretation_model, config.strip.window_size)?;
    Ok(InterpretationClassifier::classifier(Box::new(backend), labels))
}

#[cfg(not(feature = "onnx"))]
fn open_classifier(config: &Config) -> Result<InterpretationClassifier> {
    Err(Error::ModelError(format!(
        "cannot load {}: built without the `onnx` feature",
        config.models.interpretation_model.display()
    )))
}

/// Camera stand-in that replays files; a still request re-sends the last frame
#[derive(Debug, Clone, Default)]
pub struct ImageSequenceCamera {
    still_requested: Arc<AtomicBool>,
    preview_paused: Arc<AtomicBool>,
}

impl ImageSequenceCamera {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a pending still request
    #[must_use]
    pub fn take_still_request(&self) -> bool {
        self.still_requested.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_preview_paused(&self) -> bool {
        self.preview_paused.load(Ordering::Acquire)
    }
}

impl CameraControl for ImageSequenceCamera {
    fn capture_still(&mut self) -> Result<()> {
        self.preview_paused.store(true, Ordering::Release);
        self.still_requested.store(true, Ordering::Release);
        Ok(())
    }

    fn resume_preview(&mut self) -> Result<()> {
        self.preview_paused.store(false, Ordering::Release);
        Ok(())
    }
}

/// Options for a replay run
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Directory of frames, replayed in file-name order
    pub frames: PathBuf,
    /// Sensor rotation applied to every frame
    pub rotation_degrees: i32,
}

/// What a replay produced
#[derive(Debug, Clone, Default)]
pub struct ReplaySummary {
    pub frames_read: usize,
    pub stills_submitted: usize,
    pub events: usize,
    pub result: Option<InterpretationResult>,
}

/// Image files in `dir`, sorted by name
///
/// # Errors
///
/// Returns an error if the directory cannot be read or holds no frames
pub fn list_frames<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    if frames.is_empty() {
        return Err(Error::InvalidInput(format!("No frames found in {}", dir.display())));
    }
    frames.sort();
    Ok(frames)
}

/// Replays a directory of frames through the threaded pipeline
pub struct RdtApp {
    config: Config,
    options: ReplayOptions,
}

impl RdtApp {
    #[must_use]
    pub const fn new(config: Config, options: ReplayOptions) -> Self {
        Self { config, options }
    }

    /// Run with models loaded from the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if frames cannot be read or the worker cannot start
    pub fn run<W: Write>(&self, out: &mut W) -> Result<ReplaySummary> {
        self.run_with(build_orchestrator(&self.config), out)
    }

    /// Run with a prepared orchestrator, writing one JSON line per event
    ///
    /// # Errors
    ///
    /// Returns an error if frames cannot be read or the worker cannot start
    pub fn run_with<W: Write>(&self, orchestrator: CaptureOrchestrator, out: &mut W) -> Result<ReplaySummary> {
        let paths = list_frames(&self.options.frames)?;
        info!("Replaying {} frames from {}", paths.len(), self.options.frames.display());

        let camera = ImageSequenceCamera::new();
        let sink = self
            .config
            .capture
            .output_dir
            .as_ref()
            .map(|dir| Box::new(DirectoryCaptureSink::new(dir)) as Box<dyn CaptureSink>);
        let (mut pipeline, events) = Pipeline::spawn(orchestrator, Box::new(camera.clone()), sink)?;

        let mut summary = ReplaySummary::default();
        let mut last_frame: Option<Frame> = None;

        'frames: for path in &paths {
            let image = image::open(path)?.to_rgb8();
            let mut frame = Frame::new(image, self.options.rotation_degrees)?;
            summary.frames_read += 1;
            last_frame = Some(frame.clone());

            loop {
                self.forward_still(&pipeline, &camera, last_frame.as_ref(), &mut summary)?;
                Self::drain(&events, out, &mut summary)?;
                if summary.result.is_some() {
                    break 'frames;
                }
                match pipeline.submit_preview(frame) {
                    SubmitOutcome::Accepted(id) => {
                        debug!("{} submitted as frame {id}", path.display());
                        break;
                    }
                    SubmitOutcome::Dropped(returned) => {
                        frame = returned;
                        thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        }

        while summary.result.is_none() && (pipeline.is_busy() || pipeline.is_still_in_flight()) {
            self.forward_still(&pipeline, &camera, last_frame.as_ref(), &mut summary)?;
            Self::drain(&events, out, &mut summary)?;
            thread::sleep(POLL_INTERVAL);
        }

        pipeline.shutdown();
        Self::drain(&events, out, &mut summary)?;
        Ok(summary)
    }

    fn forward_still(
        &self,
        pipeline: &Pipeline,
        camera: &ImageSequenceCamera,
        frame: Option<&Frame>,
        summary: &mut ReplaySummary,
    ) -> Result<()> {
        if !camera.take_still_request() {
            return Ok(());
        }
        let Some(frame) = frame else {
            warn!("Still requested before any frame was read");
            return Ok(());
        };
        let id = pipeline.submit_still(frame.clone())?;
        debug!("Still submitted as frame {id} (rotation {})", self.options.rotation_degrees);
        summary.stills_submitted += 1;
        Ok(())
    }

    fn drain<W: Write>(events: &Receiver<PipelineEvent>, out: &mut W, summary: &mut ReplaySummary) -> Result<()> {
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::Interpreted(outcome) = &event {
                summary.result = Some(outcome.result);
            }
            let line = serde_json::to_string(&event)
                .map_err(|e| Error::Pipeline(format!("Could not encode {} event: {e}", event.name())))?;
            writeln!(out, "{line}")?;
            summary.events += 1;
        }
        Ok(())
    }
}
