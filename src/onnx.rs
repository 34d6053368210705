//! ONNX Runtime backends for the detection and classification capabilities.

use crate::classifier::ClassificationModel;
use crate::detection::{DetectionModel, RawDetections};
use crate::error::Error;
use crate::utils::image_conversion::TensorLayout;
use crate::Result;
use log::{debug, info};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, LoggingLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

struct LoadedModel {
    session: Session,
    input_size: (u32, u32),
    layout: TensorLayout,
}

#[allow(clippy::cast_possible_truncation)] // Model dimensions are small positive integers
#[allow(clippy::cast_sign_loss)] // Model dimensions are small positive integers
fn load(name: &str, model_path: &Path, default_size: u32) -> Result<LoadedModel> {
    let environment = Arc::new(
        Environment::builder()
            .with_name(name)
            .with_log_level(LoggingLevel::Warning)
            .build()?,
    );

    let session = SessionBuilder::new(&environment)?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_model_from_file(model_path)?;

    let input = session
        .inputs
        .first()
        .ok_or_else(|| Error::ModelError(format!("{name} has no inputs")))?;
    let dims = &input.dimensions;
    if dims.len() != 4 {
        return Err(Error::ModelInputError(format!(
            "{name} expects a rank-{} input, need [batch, ..] rank 4",
            dims.len()
        )));
    }

    // NCHW models put the 3 channels second
    let layout = if dims[1] == Some(3) {
        TensorLayout::Nchw
    } else {
        TensorLayout::Nhwc
    };
    let (h, w) = match layout {
        TensorLayout::Nchw => (dims[2], dims[3]),
        TensorLayout::Nhwc => (dims[1], dims[2]),
    };
    let input_size = (
        w.map_or(default_size, |v| v as u32),
        h.map_or(default_size, |v| v as u32),
    );
    info!(
        "Loaded {name} from {} (input {}x{}, {layout:?})",
        model_path.display(),
        input_size.0,
        input_size.1
    );

    Ok(LoadedModel {
        session,
        input_size,
        layout,
    })
}

fn run(session: &Session, input: &Array4<f32>) -> Result<Vec<Vec<f32>>> {
    let cow_array = CowArray::from(input.clone().into_dyn());
    let input_tensor = Value::from_array(session.allocator(), &cow_array)?;
    let outputs = session.run(vec![input_tensor])?;

    outputs
        .iter()
        .map(|output| -> Result<Vec<f32>> {
            let tensor = output.try_extract::<f32>()?;
            let view = tensor.view();
            Ok(view.iter().copied().collect())
        })
        .collect()
}

/// Box detector with `boxes, classes, scores, count` outputs and an
/// optional fifth per-box orientation output
pub struct OnnxDetectionModel {
    model: LoadedModel,
}

impl OnnxDetectionModel {
    /// Load a detector model
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or has an unsupported input
    pub fn new<P: AsRef<Path>>(model_path: P, default_size: u32) -> Result<Self> {
        let model = load("rdt_detector", model_path.as_ref(), default_size)?;
        let outputs = model.session.outputs.len();
        if outputs < 4 {
            return Err(Error::ModelOutputError(format!(
                "Detector has {outputs} outputs, expected boxes, classes, scores and count"
            )));
        }
        Ok(Self { model })
    }
}

impl DetectionModel for OnnxDetectionModel {
    fn input_size(&self) -> (u32, u32) {
        self.model.input_size
    }

    fn layout(&self) -> TensorLayout {
        self.model.layout
    }

    #[allow(clippy::cast_possible_truncation)] // Count is a small non-negative float
    #[allow(clippy::cast_sign_loss)] // Negative counts clamp to zero
    fn infer(&mut self, input: &Array4<f32>) -> Result<RawDetections> {
        let outputs = run(&self.model.session, input)?;
        let [boxes, classes, scores, count, rest @ ..] = outputs.as_slice() else {
            return Err(Error::ModelOutputError(format!(
                "Detector returned {} outputs",
                outputs.len()
            )));
        };

        if boxes.len() % 4 != 0 {
            return Err(Error::ModelDataFormatError(format!(
                "Box output length {} is not a multiple of 4",
                boxes.len()
            )));
        }
        let boxes: Vec<[f32; 4]> = boxes.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]).collect();
        let count = count
            .first()
            .map_or(scores.len(), |c| c.max(0.0).round() as usize);
        debug!("Detector returned {count} boxes");

        Ok(RawDetections {
            boxes,
            classes: classes.clone(),
            scores: scores.clone(),
            orientations: rest.first().cloned(),
            count,
        })
    }
}

/// Whole-image classifier with a single score vector output
pub struct OnnxClassificationModel {
    model: LoadedModel,
}

impl OnnxClassificationModel {
    /// Load a classifier model
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded or has an unsupported input
    pub fn new<P: AsRef<Path>>(model_path: P, default_size: u32) -> Result<Self> {
        Ok(Self {
            model: load("rdt_classifier", model_path.as_ref(), default_size)?,
        })
    }
}

impl ClassificationModel for OnnxClassificationModel {
    fn input_size(&self) -> (u32, u32) {
        self.model.input_size
    }

    fn layout(&self) -> TensorLayout {
        self.model.layout
    }

    fn classify(&mut self, input: &Array4<f32>) -> Result<Vec<f32>> {
        run(&self.model.session, input)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ModelOutputError("Classifier produced no output".to_string()))
    }
}
