//! Rapid diagnostic test (RDT) strip capture and interpretation.
//!
//! This library locates an RDT strip in a live camera stream, checks that
//! the frame is sharp, well exposed and steady, rectifies the strip into a
//! canonical coordinate frame and reads the control and test lines once a
//! qualifying frame has been captured.
//!
//! The pipeline per frame is:
//! 1. Fiducial detection with a bounding-box model ([`detection`])
//! 2. Selection of the most consistent fiducial combination ([`localizer`])
//! 3. Similarity rectification of the strip and its result window ([`rectifier`])
//! 4. Sharpness, exposure and motion gating ([`quality`], [`motion`])
//! 5. The capture state machine ([`orchestrator`]) and, once a still is
//!    accepted, interpretation of the window ([`classifier`], [`aggregator`])
//!
//! [`pipeline::Pipeline`] runs all of this on one worker thread with
//! drop-when-busy backpressure and reports [`events::PipelineEvent`]s.
//!
//! # Examples
//!
//! ```no_run
//! use rdt_reader::app::build_orchestrator;
//! use rdt_reader::config::Config;
//! use rdt_reader::frame::Frame;
//! use rdt_reader::pipeline::{CameraControl, Pipeline};
//!
//! struct Camera;
//!
//! impl CameraControl for Camera {
//!     fn capture_still(&mut self) -> rdt_reader::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn resume_preview(&mut self) -> rdt_reader::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("config.yaml")?;
//! let (pipeline, events) = Pipeline::spawn(build_orchestrator(&config), Box::new(Camera), None)?;
//!
//! let image = image::open("frame.png")?.to_rgb8();
//! pipeline.submit_preview(Frame::new(image, 0)?);
//!
//! for event in events.iter() {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```

/// Error types and result handling
pub mod error;

/// Constants used throughout the library
pub mod constants;

/// Configuration management
pub mod config;

/// Camera frames and pixel format conversion
pub mod frame;

/// 2D transforms and rectangles
pub mod geometry;

/// Pixel sampling, warping and tensor conversion
pub mod utils;

/// Bounding-box detector adapter
pub mod detection;

/// Fiducial roles and per-frame assignment
pub mod fiducial;

/// Combinatorial fiducial localizer
pub mod localizer;

/// Strip outline and centering check
pub mod outline;

/// Similarity rectification of the strip
pub mod rectifier;

/// Sharpness and exposure gating
pub mod quality;

/// Frame-to-frame motion stability
pub mod motion;

/// Result window interpretation
pub mod classifier;

/// Result aggregation policies
pub mod aggregator;

/// Capture state machine
pub mod orchestrator;

/// Pipeline events
pub mod events;

/// Threaded analysis pipeline
pub mod pipeline;

/// ONNX Runtime model backends
#[cfg(feature = "onnx")]
pub mod onnx;

/// Model loading and image-sequence replay
pub mod app;

pub use error::{Error, Result};
