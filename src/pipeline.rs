//! Threaded analysis pipeline.
//!
//! One worker thread owns the [`CaptureOrchestrator`]. Producers hand frames
//! to [`Pipeline::submit_preview`], which never blocks: if an analysis is
//! already running the frame is handed straight back as
//! [`SubmitOutcome::Dropped`]. A second flag covers the still capture, so no
//! preview is analyzed between a still request and the still's analysis.
//! Events are delivered on a channel in the order frames were analyzed.

use crate::constants::CAPTURE_FILE_NAME;
use crate::events::PipelineEvent;
use crate::frame::Frame;
use crate::motion::MotionSnapshot;
use crate::orchestrator::{CaptureAction, CaptureOrchestrator, StepOutput};
use crate::{Error, Result};
use image::RgbImage;
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Jobs waiting for the worker; previews are limited by the busy flag
const JOB_QUEUE_CAPACITY: usize = 4;

/// Camera actions the pipeline requests
pub trait CameraControl: Send {
    /// Take a full-resolution still and deliver it via [`Pipeline::submit_still`]
    ///
    /// # Errors
    ///
    /// Returns an error if the camera cannot take a still
    fn capture_still(&mut self) -> Result<()>;

    /// Restart preview delivery after a still
    ///
    /// # Errors
    ///
    /// Returns an error if preview cannot be resumed
    fn resume_preview(&mut self) -> Result<()>;
}

/// Hand-off of accepted stills for later upload
pub trait CaptureSink: Send {
    /// Persist the image and return a reference to it
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be stored
    fn store(&mut self, image: &RgbImage) -> Result<String>;
}

/// Writes each accepted still to a fixed file in a directory
#[derive(Debug, Clone)]
pub struct DirectoryCaptureSink {
    directory: PathBuf,
}

impl DirectoryCaptureSink {
    #[must_use]
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }
}

impl CaptureSink for DirectoryCaptureSink {
    fn store(&mut self, image: &RgbImage) -> Result<String> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| Error::Storage(format!("{}: {e}", self.directory.display())))?;
        let path = self.directory.join(CAPTURE_FILE_NAME);
        image
            .save(&path)
            .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
        Ok(path.display().to_string())
    }
}

/// Result of offering a preview frame
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Queued for analysis under this id
    Accepted(u64),
    /// Not analyzed; the frame is returned for reuse
    Dropped(Frame),
}

impl SubmitOutcome {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

enum Job {
    Preview { frame_id: u64, frame: Frame },
    Still { frame_id: u64, frame: Frame },
}

impl Job {
    fn into_frame(self) -> Frame {
        match self {
            Self::Preview { frame, .. } | Self::Still { frame, .. } => frame,
        }
    }
}

struct Shared {
    busy: AtomicBool,
    still_in_flight: AtomicBool,
    reset_requested: AtomicBool,
    next_frame_id: AtomicU64,
    motion: Mutex<MotionSnapshot>,
}

/// Clears the busy flag when the analysis ends, including by panic
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to the analysis worker
pub struct Pipeline {
    shared: Arc<Shared>,
    jobs: Option<SyncSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the worker thread.
    ///
    /// Components that failed to load are reported once as
    /// [`PipelineEvent::InitializationFailed`] before any frame event.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be started
    pub fn spawn(
        orchestrator: CaptureOrchestrator,
        camera: Box<dyn CameraControl>,
        sink: Option<Box<dyn CaptureSink>>,
    ) -> Result<(Self, Receiver<PipelineEvent>)> {
        let (event_tx, event_rx) = mpsc::channel();
        for (component, reason) in orchestrator.initialization_failures() {
            // Receiver is still held locally, so this cannot fail
            let _ = event_tx.send(PipelineEvent::InitializationFailed { component, reason });
        }

        let shared = Arc::new(Shared {
            busy: AtomicBool::new(false),
            still_in_flight: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            next_frame_id: AtomicU64::new(0),
            motion: Mutex::new(MotionSnapshot::default()),
        });
        let (job_tx, job_rx) = mpsc::sync_channel(JOB_QUEUE_CAPACITY);

        let mut worker = Worker {
            orchestrator,
            camera,
            sink,
            shared: Arc::clone(&shared),
            events: event_tx,
        };
        let handle = thread::Builder::new()
            .name("rdt-analysis".to_string())
            .spawn(move || worker.run(&job_rx))?;
        info!("Analysis worker started");

        Ok((
            Self {
                shared,
                jobs: Some(job_tx),
                worker: Some(handle),
            },
            event_rx,
        ))
    }

    /// Offer a preview frame without blocking
    pub fn submit_preview(&self, frame: Frame) -> SubmitOutcome {
        let frame_id = self.shared.next_frame_id.fetch_add(1, Ordering::Relaxed);
        if self.shared.still_in_flight.load(Ordering::Acquire) {
            debug!("Frame {frame_id} dropped: still capture in flight");
            return SubmitOutcome::Dropped(frame);
        }
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Frame {frame_id} dropped: analysis in flight");
            return SubmitOutcome::Dropped(frame);
        }
        let Some(jobs) = self.jobs.as_ref() else {
            self.shared.busy.store(false, Ordering::Release);
            return SubmitOutcome::Dropped(frame);
        };

        match jobs.try_send(Job::Preview { frame_id, frame }) {
            Ok(()) => SubmitOutcome::Accepted(frame_id),
            Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) => {
                self.shared.busy.store(false, Ordering::Release);
                warn!("Frame {frame_id} dropped: worker queue unavailable");
                SubmitOutcome::Dropped(job.into_frame())
            }
        }
    }

    /// Deliver the still requested through [`CameraControl::capture_still`]
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has stopped
    pub fn submit_still(&self, frame: Frame) -> Result<u64> {
        let frame_id = self.shared.next_frame_id.fetch_add(1, Ordering::Relaxed);
        self.send(Job::Still { frame_id, frame })?;
        Ok(frame_id)
    }

    /// Abandon the current session; the next analyzed frame starts a new one
    pub fn reset_session(&self) {
        self.shared.still_in_flight.store(false, Ordering::Release);
        self.shared.reset_requested.store(true, Ordering::Release);
    }

    /// Latest motion state published by the worker
    #[must_use]
    pub fn motion_snapshot(&self) -> MotionSnapshot {
        match self.shared.motion.lock() {
            Ok(snapshot) => *snapshot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// An analysis is running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// A still has been requested and not yet analyzed
    #[must_use]
    pub fn is_still_in_flight(&self) -> bool {
        self.shared.still_in_flight.load(Ordering::Acquire)
    }

    /// Stop accepting work and wait for queued jobs to finish
    pub fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Analysis worker panicked");
            }
        }
    }

    fn send(&self, job: Job) -> Result<()> {
        self.jobs
            .as_ref()
            .ok_or_else(|| Error::Pipeline("Pipeline is shut down".to_string()))?
            .send(job)
            .map_err(|_| Error::Pipeline("Analysis worker has stopped".to_string()))
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    orchestrator: CaptureOrchestrator,
    camera: Box<dyn CameraControl>,
    sink: Option<Box<dyn CaptureSink>>,
    shared: Arc<Shared>,
    events: Sender<PipelineEvent>,
}

impl Worker {
    fn run(&mut self, jobs: &Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            if self.shared.reset_requested.swap(false, Ordering::AcqRel) {
                self.orchestrator.reset_session();
                self.publish_motion();
            }
            match job {
                Job::Preview { frame_id, frame } => self.preview(frame_id, &frame),
                Job::Still { frame_id, frame } => self.still(frame_id, &frame),
            }
        }
        debug!("Analysis worker stopped");
    }

    fn preview(&mut self, frame_id: u64, frame: &Frame) {
        let guard = BusyGuard(&self.shared.busy);
        let orchestrator = &mut self.orchestrator;
        let result = panic::catch_unwind(AssertUnwindSafe(|| orchestrator.process_preview(frame_id, frame)));
        self.publish_motion();

        let output = match result {
            Ok(output) => output,
            Err(_) => {
                drop(guard);
                error!("Analysis of frame {frame_id} panicked");
                self.emit(PipelineEvent::AnalysisFailed {
                    frame_id,
                    reason: "analysis panicked".to_string(),
                });
                return;
            }
        };
        if output.action == CaptureAction::CaptureStill {
            self.shared.still_in_flight.store(true, Ordering::Release);
        }
        drop(guard);

        self.deliver(frame_id, frame, output);
    }

    fn still(&mut self, frame_id: u64, frame: &Frame) {
        let orchestrator = &mut self.orchestrator;
        let result = panic::catch_unwind(AssertUnwindSafe(|| orchestrator.process_still(frame_id, frame)));
        self.shared.still_in_flight.store(false, Ordering::Release);

        match result {
            Ok(output) => self.deliver(frame_id, frame, output),
            Err(_) => {
                error!("Analysis of still {frame_id} panicked");
                self.orchestrator.cancel_still_capture();
                self.emit(PipelineEvent::AnalysisFailed {
                    frame_id,
                    reason: "still analysis panicked".to_string(),
                });
                self.resume_preview(frame_id);
            }
        }
    }

    fn deliver(&mut self, frame_id: u64, frame: &Frame, output: StepOutput) {
        let StepOutput {
            report,
            action,
            interpreting,
            outcome,
        } = output;
        self.emit(PipelineEvent::FrameAnalyzed(report));

        match action {
            CaptureAction::CaptureStill => {
                self.emit(PipelineEvent::StillCaptureRequested { frame_id });
                if let Err(e) = self.camera.capture_still() {
                    warn!("Still capture failed: {e}");
                    self.shared.still_in_flight.store(false, Ordering::Release);
                    self.orchestrator.cancel_still_capture();
                    self.emit(PipelineEvent::AnalysisFailed {
                        frame_id,
                        reason: format!("still capture failed: {e}"),
                    });
                }
            }
            CaptureAction::ResumePreview => self.resume_preview(frame_id),
            CaptureAction::None => {}
        }

        if interpreting {
            self.emit(PipelineEvent::Interpreting { frame_id });
        }
        if let Some(mut outcome) = outcome {
            if let Some(sink) = self.sink.as_mut() {
                match sink.store(frame.image()) {
                    Ok(uri) => outcome.image_uri = Some(uri),
                    Err(e) => warn!("Could not store captured image: {e}"),
                }
            }
            self.emit(PipelineEvent::Interpreted(outcome));
        }
    }

    fn resume_preview(&mut self, frame_id: u64) {
        if let Err(e) = self.camera.resume_preview() {
            warn!("Could not resume preview: {e}");
        }
        self.emit(PipelineEvent::PreviewResumed { frame_id });
    }

    fn publish_motion(&self) {
        let snapshot = self.orchestrator.session().motion_snapshot();
        match self.shared.motion.lock() {
            Ok(mut shared) => *shared = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::InterpretationClassifier;
    use crate::config::Config;
    use crate::detection::FiducialDetector;
    use std::time::Duration;

    struct NoCamera;

    impl CameraControl for NoCamera {
        fn capture_still(&mut self) -> Result<()> {
            Ok(())
        }

        fn resume_preview(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn degraded() -> CaptureOrchestrator {
        CaptureOrchestrator::new(
            &Config::default(),
            FiducialDetector::unavailable("fiducial_detector", "missing"),
            InterpretationClassifier::unavailable("missing"),
        )
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(32, 32), 0).unwrap()
    }

    #[test]
    fn test_initialization_failures_reported_first() {
        let (pipeline, events) = Pipeline::spawn(degraded(), Box::new(NoCamera), None).unwrap();
        let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
        let second = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.name(), "initialization_failed");
        assert_eq!(second.name(), "initialization_failed");
        drop(pipeline);
    }

    #[test]
    fn test_preview_frames_are_analyzed_in_order() {
        let (pipeline, events) = Pipeline::spawn(degraded(), Box::new(NoCamera), None).unwrap();
        let mut analyzed = Vec::new();
        for _ in 0..3 {
            while !pipeline.submit_preview(frame()).is_accepted() {
                thread::sleep(Duration::from_millis(1));
            }
            loop {
                match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                    PipelineEvent::FrameAnalyzed(report) => {
                        analyzed.push(report.frame_id);
                        break;
                    }
                    _ => continue,
                }
            }
        }
        assert_eq!(analyzed.len(), 3);
        assert!(analyzed.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_directory_sink_writes_capture() {
        let dir = std::env::temp_dir().join(format!("rdt-sink-{}", std::process::id()));
        let mut sink = DirectoryCaptureSink::new(&dir);
        let uri = sink.store(&RgbImage::new(8, 8)).unwrap();
        assert!(uri.ends_with(CAPTURE_FILE_NAME));
        assert!(Path::new(&uri).exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_shutdown_rejects_work() {
        let (mut pipeline, _events) = Pipeline::spawn(degraded(), Box::new(NoCamera), None).unwrap();
        pipeline.shutdown();
        assert!(pipeline.submit_still(frame()).is_err());
        assert!(!pipeline.submit_preview(frame()).is_accepted());
    }
}
