//! Discrete events emitted by the analysis pipeline.

use crate::orchestrator::{CaptureOutcome, FrameReport};
use serde::Serialize;

/// Named pipeline event, serialized with an `event` tag
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A model could not be loaded; emitted once at startup
    InitializationFailed { component: String, reason: String },
    /// Per-frame overlay record
    FrameAnalyzed(FrameReport),
    /// The camera was asked for a still
    StillCaptureRequested { frame_id: u64 },
    /// Classification started on a qualified window
    Interpreting { frame_id: u64 },
    /// Final result for the session
    Interpreted(CaptureOutcome),
    /// The still was unusable and preview resumed
    PreviewResumed { frame_id: u64 },
    /// A frame could not be processed at all
    AnalysisFailed { frame_id: u64, reason: String },
}

impl PipelineEvent {
    /// Short event name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InitializationFailed { .. } => "initialization_failed",
            Self::FrameAnalyzed(_) => "frame_analyzed",
            Self::StillCaptureRequested { .. } => "still_capture_requested",
            Self::Interpreting { .. } => "interpreting",
            Self::Interpreted(_) => "interpreted",
            Self::PreviewResumed { .. } => "preview_resumed",
            Self::AnalysisFailed { .. } => "analysis_failed",
        }
    }
}
