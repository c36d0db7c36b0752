use std::path::Path;

use rten::{Dimension, Model};
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use tracing::{debug, info};

use crate::classification::preprocessing::ImageTensor;
use crate::config::GraderConfig;
use crate::error::{GraderError, Result};

/// A loaded classifier runtime.
///
/// Implementations run a single forward pass; they are not required to be
/// safe for concurrent use, which is why [`InferenceEngine`] owns exactly one.
pub trait ScoreModel: Send {
    /// Declared input shape, `None` per dimension when it is symbolic.
    fn input_shape(&self) -> Option<Vec<Option<usize>>>;

    /// Declared output shape, `None` per dimension when it is symbolic.
    fn output_shape(&self) -> Option<Vec<Option<usize>>>;

    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>>;
}

/// `.rten` model executed with the rten runtime.
pub struct RtenModel {
    model: Model,
}

impl RtenModel {
    pub fn from_bytes(model_bytes: Vec<u8>) -> Result<Self> {
        if model_bytes.is_empty() {
            return Err(GraderError::ModelLoad("Model file is empty".to_string()));
        }
        let model = Model::load(model_bytes).map_err(|e| GraderError::ModelLoad(e.to_string()))?;
        if model.input_ids().is_empty() || model.output_ids().is_empty() {
            return Err(GraderError::ModelLoad(
                "Model declares no inputs or no outputs".to_string(),
            ));
        }
        Ok(Self { model })
    }

    fn declared_shape(&self, node_id: Option<rten::NodeId>) -> Option<Vec<Option<usize>>> {
        let info = self.model.node_info(node_id?)?;
        let shape = info.shape()?;
        Some(
            shape
                .iter()
                .map(|dim| match dim {
                    Dimension::Fixed(size) => Some(*size),
                    Dimension::Symbolic(_) => None,
                })
                .collect(),
        )
    }
}

impl ScoreModel for RtenModel {
    fn input_shape(&self) -> Option<Vec<Option<usize>>> {
        self.declared_shape(self.model.input_ids().first().copied())
    }

    fn output_shape(&self) -> Option<Vec<Option<usize>>> {
        self.declared_shape(self.model.output_ids().first().copied())
    }

    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let tensor = NdTensor::from_data(input.shape(), input.data().to_vec());
        let output = self
            .model
            .run_one(tensor.view().into(), None)
            .map_err(|e| GraderError::Inference(e.to_string()))?;
        let scores: NdTensor<f32, 2> = output
            .try_into()
            .map_err(|e| GraderError::Inference(format!("Unexpected output tensor: {:?}", e)))?;
        Ok(scores.iter().copied().collect())
    }
}

enum EngineState {
    Unloaded,
    Loaded(Box<dyn ScoreModel>),
    Closed,
}

/// Owns the classifier and its lifecycle: `Unloaded -> Loaded -> Closed`.
pub struct InferenceEngine {
    state: EngineState,
    input_shape: [usize; 4],
    num_classes: usize,
}

impl InferenceEngine {
    pub fn new(config: &GraderConfig) -> Self {
        Self {
            state: EngineState::Unloaded,
            input_shape: config.input_shape(),
            num_classes: config.num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.state, EngineState::Loaded(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, EngineState::Closed)
    }

    /// Load an `.rten` model from memory.
    pub fn load(&mut self, model_bytes: Vec<u8>) -> Result<()> {
        let model = RtenModel::from_bytes(model_bytes)?;
        self.load_model(Box::new(model))
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            GraderError::ModelLoad(format!("Failed to read model {}: {}", path.display(), e))
        })?;
        self.load(bytes)
    }

    /// Install an already constructed runtime after checking its declared shapes.
    pub fn load_model(&mut self, model: Box<dyn ScoreModel>) -> Result<()> {
        match self.state {
            EngineState::Unloaded => {}
            EngineState::Loaded(_) => {
                return Err(GraderError::ModelLoad("A model is already loaded".to_string()));
            }
            EngineState::Closed => {
                return Err(GraderError::ModelLoad("Engine has been closed".to_string()));
            }
        }

        let input_shape = model.input_shape();
        let output_shape = model.output_shape();
        check_shape("input", input_shape.as_deref(), &self.input_shape)?;
        check_shape("output", output_shape.as_deref(), &[1, self.num_classes])?;
        info!(
            "Classifier loaded: input {:?}, output {:?}",
            input_shape, output_shape
        );

        self.state = EngineState::Loaded(model);
        Ok(())
    }

    /// Run the model on one preprocessed image.
    pub fn classify(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let model = match &self.state {
            EngineState::Loaded(model) => model,
            EngineState::Unloaded => {
                return Err(GraderError::Inference("No model has been loaded".to_string()));
            }
            EngineState::Closed => {
                return Err(GraderError::Inference("Engine has been closed".to_string()));
            }
        };

        if input.shape() != self.input_shape {
            return Err(GraderError::Inference(format!(
                "Input tensor has shape {:?}, expected {:?}",
                input.shape(),
                self.input_shape
            )));
        }

        let scores = model.predict(input)?;
        if scores.len() != self.num_classes {
            return Err(GraderError::Inference(format!(
                "Model returned {} scores, expected {}",
                scores.len(),
                self.num_classes
            )));
        }
        debug!("Raw scores: {:?}", scores);
        Ok(scores)
    }

    /// Release the model. Calling this more than once is a no-op.
    pub fn close(&mut self) {
        if let EngineState::Loaded(_) = std::mem::replace(&mut self.state, EngineState::Closed) {
            info!("Classifier closed");
        }
    }
}

/// Fixed dimensions must match; symbolic or undeclared ones are accepted.
fn check_shape(kind: &str, declared: Option<&[Option<usize>]>, expected: &[usize]) -> Result<()> {
    let Some(declared) = declared else {
        return Ok(());
    };
    let compatible = declared.len() == expected.len()
        && declared
            .iter()
            .zip(expected)
            .all(|(dim, want)| dim.is_none_or(|size| size == *want));
    if compatible {
        Ok(())
    } else {
        Err(GraderError::ModelLoad(format!(
            "Model {} shape {:?} is incompatible with {:?}",
            kind, declared, expected
        )))
    }
}
