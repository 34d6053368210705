//! Capture state machine.
//!
//! The orchestrator owns one instance of each capability (detector,
//! localizer, rectifier, centering guide, quality filter, classifier) and a
//! [`CaptureSession`] holding all per-session mutable state. Preview frames
//! drive `Scanning -> CenteredQualified -> StillCapturing`; the still frame
//! drives `StillCapturing -> Interpreting -> Resolved`. In voting mode the
//! preview path classifies directly and no still is requested.
//!
//! Per-frame failures never end a session: they are reported as "not found"
//! and the machine stays in (or returns to) `Scanning`.

use crate::aggregator::{AggregationPolicy, InterpretationAggregator, InterpretationResult};
use crate::classifier::InterpretationClassifier;
use crate::config::{Config, MotionConfig};
use crate::detection::FiducialDetector;
use crate::fiducial::{FiducialSet, StripGeometry};
use crate::frame::Frame;
use crate::localizer::FiducialLocalizer;
use crate::motion::{MotionSnapshot, MotionStabilityTracker};
use crate::outline::{CenteringGuide, Outline};
use crate::quality::{Exposure, ImageQualityFilter, QualityStatus, Resolution};
use crate::rectifier::{GeometricRectifier, RdtResult};
use image::RgbImage;
use log::{debug, info, warn};
use serde::Serialize;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Scanning,
    CenteredQualified,
    StillCapturing,
    Interpreting,
    Resolved,
}

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Preview,
    Still,
}

/// Camera request produced by a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureAction {
    None,
    CaptureStill,
    ResumePreview,
}

/// Per-frame overlay record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame_id: u64,
    pub kind: FrameKind,
    pub found: bool,
    pub steady: bool,
    pub centered: bool,
    pub sharp: bool,
    pub exposure: Option<Exposure>,
    pub sharpness: Option<f64>,
    /// Strip outline in display pixels
    pub outline: Option<Outline>,
    /// State after this frame
    pub state: CaptureState,
}

impl FrameReport {
    const fn new(frame_id: u64, kind: FrameKind, state: CaptureState) -> Self {
        Self {
            frame_id,
            kind,
            found: false,
            steady: false,
            centered: false,
            sharp: false,
            exposure: None,
            sharpness: None,
            outline: None,
            state,
        }
    }

    fn record_quality(&mut self, status: &QualityStatus) {
        self.sharp = status.sharp;
        self.exposure = Some(status.exposure);
        self.sharpness = Some(status.sharpness);
    }
}

/// Final result with the rectified images it was read from
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub frame_id: u64,
    #[serde(flatten)]
    pub result: InterpretationResult,
    #[serde(skip)]
    pub strip: Option<RgbImage>,
    #[serde(skip)]
    pub window: Option<RgbImage>,
    /// Stored still, when a sink accepted it
    pub image_uri: Option<String>,
}

/// Everything one frame produced
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub report: FrameReport,
    pub action: CaptureAction,
    /// The session entered `Interpreting` on this frame
    pub interpreting: bool,
    pub outcome: Option<CaptureOutcome>,
}

impl StepOutput {
    const fn passive(report: FrameReport) -> Self {
        Self {
            report,
            action: CaptureAction::None,
            interpreting: false,
            outcome: None,
        }
    }
}

/// Mutable state of one capture attempt
#[derive(Debug, Clone)]
pub struct CaptureSession {
    state: CaptureState,
    motion: MotionStabilityTracker,
    aggregator: InterpretationAggregator,
}

impl CaptureSession {
    #[must_use]
    pub fn new(motion: MotionConfig, policy: AggregationPolicy) -> Self {
        Self {
            state: CaptureState::Scanning,
            motion: MotionStabilityTracker::new(motion),
            aggregator: InterpretationAggregator::new(policy),
        }
    }

    #[must_use]
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    #[must_use]
    pub const fn aggregator(&self) -> &InterpretationAggregator {
        &self.aggregator
    }

    #[must_use]
    pub fn motion_snapshot(&self) -> MotionSnapshot {
        self.motion.snapshot()
    }
}

/// Drives detection through interpretation for one camera stream
#[derive(Debug)]
pub struct CaptureOrchestrator {
    detector: FiducialDetector,
    localizer: FiducialLocalizer,
    rectifier: GeometricRectifier,
    guide: CenteringGuide,
    quality: ImageQualityFilter,
    classifier: InterpretationClassifier,
    motion_config: MotionConfig,
    policy: AggregationPolicy,
    session: CaptureSession,
}

impl CaptureOrchestrator {
    /// Compose the pipeline stages from configuration and loaded models
    #[must_use]
    pub fn new(config: &Config, detector: FiducialDetector, classifier: InterpretationClassifier) -> Self {
        let geometry = StripGeometry::from_config(&config.strip);
        let display = (config.capture.display_width, config.capture.display_height);
        let policy = AggregationPolicy::from_config(&config.capture);

        Self {
            guide: CenteringGuide::new(geometry.aspect(), &config.capture),
            rectifier: GeometricRectifier::new(geometry.clone(), &config.strip, display),
            localizer: FiducialLocalizer::new(geometry, config.localizer.clone()),
            quality: ImageQualityFilter::new(config.quality.clone()),
            detector,
            classifier,
            motion_config: config.motion.clone(),
            policy,
            session: CaptureSession::new(config.motion.clone(), policy),
        }
    }

    #[must_use]
    pub const fn state(&self) -> CaptureState {
        self.session.state
    }

    #[must_use]
    pub const fn session(&self) -> &CaptureSession {
        &self.session
    }

    #[must_use]
    pub const fn guide(&self) -> &CenteringGuide {
        &self.guide
    }

    /// Components that failed to load, as `(component, reason)`
    #[must_use]
    pub fn initialization_failures(&self) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        if let Some(reason) = self.detector.unavailable_reason() {
            failures.push((self.detector.name().to_string(), reason.to_string()));
        }
        if let Some(reason) = self.classifier.unavailable_reason() {
            failures.push(("interpretation".to_string(), reason.to_string()));
        }
        failures
    }

    /// Discard the session and start scanning afresh
    pub fn reset_session(&mut self) {
        info!("Starting new capture session");
        self.session = CaptureSession::new(self.motion_config.clone(), self.policy);
    }

    /// Give up on a requested still that will not arrive
    pub fn cancel_still_capture(&mut self) {
        if self.session.state == CaptureState::StillCapturing {
            info!("Still capture abandoned, back to scanning");
            self.session.state = CaptureState::Scanning;
        }
    }

    /// Detect, localize and rectify one frame
    pub fn analyze(&mut self, frame: &Frame) -> RdtResult {
        let detections = self.detector.detect_default(frame.image());
        let set = FiducialSet::from_detections(self.localizer.geometry(), &detections);
        let solution = self.localizer.localize(&set, frame.width(), frame.height());
        if solution.is_none() {
            debug!("No fiducial combination among {} detections", detections.len());
        }
        self.rectifier.rectify(frame, solution.as_ref())
    }

    /// Process a preview frame
    pub fn process_preview(&mut self, frame_id: u64, frame: &Frame) -> StepOutput {
        let mut report = FrameReport::new(frame_id, FrameKind::Preview, self.session.state);
        if self.session.state != CaptureState::Scanning {
            debug!("Preview frame {frame_id} ignored in {:?}", self.session.state);
            return StepOutput::passive(report);
        }

        let motion = self.session.motion.update(frame.image());
        report.steady = motion.steady;

        let rdt = self.analyze(frame);
        report.found = rdt.found();
        report.outline = rdt.outline().copied();
        let Some(outline) = rdt.outline() else {
            return StepOutput::passive(report);
        };
        if !motion.steady {
            return StepOutput::passive(report);
        }
        report.centered = self.guide.is_centered(outline);
        if !report.centered {
            return StepOutput::passive(report);
        }

        self.session.state = CaptureState::CenteredQualified;
        let Some(strip) = rdt.strip.as_ref() else {
            self.session.state = CaptureState::Scanning;
            report.state = self.session.state;
            return StepOutput::passive(report);
        };
        let status = self.quality.assess(strip, Resolution::Preview);
        report.record_quality(&status);
        if !status.is_acceptable() {
            debug!(
                "Frame {frame_id} rejected: sharpness {:.1}, exposure {:?}",
                status.sharpness, status.exposure
            );
            self.session.state = CaptureState::Scanning;
            report.state = self.session.state;
            return StepOutput::passive(report);
        }

        match self.policy {
            AggregationPolicy::SingleShot => {
                info!("Frame {frame_id} qualified, requesting still capture");
                self.session.state = CaptureState::StillCapturing;
                report.state = self.session.state;
                StepOutput {
                    report,
                    action: CaptureAction::CaptureStill,
                    interpreting: false,
                    outcome: None,
                }
            }
            AggregationPolicy::Voting { .. } => self.interpret(frame_id, report, rdt, CaptureAction::None),
        }
    }

    /// Process the still requested by an earlier preview frame
    pub fn process_still(&mut self, frame_id: u64, frame: &Frame) -> StepOutput {
        let mut report = FrameReport::new(frame_id, FrameKind::Still, self.session.state);
        if self.session.state != CaptureState::StillCapturing {
            warn!("Unexpected still frame {frame_id} in {:?}", self.session.state);
            return StepOutput::passive(report);
        }

        let rdt = self.analyze(frame);
        report.found = rdt.found();
        report.outline = rdt.outline().copied();
        let (Some(strip), Some(_)) = (rdt.strip.as_ref(), rdt.window.as_ref()) else {
            info!("Still frame {frame_id}: result window not extracted, resuming preview");
            return self.resume_preview(report);
        };

        let status = self.quality.assess(strip, Resolution::Still);
        report.record_quality(&status);
        if !status.is_acceptable() {
            info!(
                "Still frame {frame_id} failed quality (sharpness {:.1}, exposure {:?}), resuming preview",
                status.sharpness, status.exposure
            );
            return self.resume_preview(report);
        }

        self.interpret(frame_id, report, rdt, CaptureAction::ResumePreview)
    }

    fn interpret(
        &mut self,
        frame_id: u64,
        mut report: FrameReport,
        rdt: RdtResult,
        on_failure: CaptureAction,
    ) -> StepOutput {
        self.session.state = CaptureState::Interpreting;
        let reading = rdt.window.as_ref().and_then(|window| self.classifier.classify(window));

        let Some(reading) = reading else {
            warn!("Frame {frame_id}: no interpretation available");
            self.session.state = CaptureState::Scanning;
            report.state = self.session.state;
            return StepOutput {
                report,
                action: on_failure,
                interpreting: true,
                outcome: None,
            };
        };

        let outcome = self.session.aggregator.add(reading).map(|result| CaptureOutcome {
            frame_id,
            result,
            strip: rdt.strip,
            window: rdt.window,
            image_uri: None,
        });
        self.session.state = if outcome.is_some() {
            CaptureState::Resolved
        } else {
            CaptureState::Scanning
        };
        report.state = self.session.state;

        StepOutput {
            report,
            action: CaptureAction::None,
            interpreting: true,
            outcome,
        }
    }

    fn resume_preview(&mut self, mut report: FrameReport) -> StepOutput {
        self.session.state = CaptureState::Scanning;
        report.state = self.session.state;
        StepOutput {
            report,
            action: CaptureAction::ResumePreview,
            interpreting: false,
            outcome: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> CaptureOrchestrator {
        CaptureOrchestrator::new(
            &Config::default(),
            FiducialDetector::unavailable("fiducial_detector", "no model"),
            InterpretationClassifier::unavailable("no model"),
        )
    }

    fn frame() -> Frame {
        Frame::new(RgbImage::new(64, 64), 0).unwrap()
    }

    #[test]
    fn test_degraded_mode_stays_scanning() {
        let mut orchestrator = orchestrator();
        for id in 0..5 {
            let output = orchestrator.process_preview(id, &frame());
            assert!(!output.report.found);
            assert_eq!(output.action, CaptureAction::None);
        }
        assert_eq!(orchestrator.state(), CaptureState::Scanning);
        assert_eq!(orchestrator.initialization_failures().len(), 2);
    }

    #[test]
    fn test_still_outside_capture_is_ignored() {
        let mut orchestrator = orchestrator();
        let output = orchestrator.process_still(1, &frame());
        assert_eq!(output.action, CaptureAction::None);
        assert_eq!(output.report.state, CaptureState::Scanning);
    }

    #[test]
    fn test_reset_session_clears_motion() {
        let mut orchestrator = orchestrator();
        orchestrator.process_preview(0, &frame());
        orchestrator.process_preview(1, &frame());
        assert!(orchestrator.session().motion_snapshot().samples > 0);

        orchestrator.reset_session();
        assert_eq!(orchestrator.session().motion_snapshot(), MotionSnapshot::default());
        assert_eq!(orchestrator.state(), CaptureState::Scanning);
    }

    #[test]
    fn test_report_serializes_state() {
        let report = FrameReport::new(3, FrameKind::Preview, CaptureState::CenteredQualified);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["state"], "centered_qualified");
        assert_eq!(json["kind"], "preview");
        assert_eq!(json["found"], false);
    }
}
