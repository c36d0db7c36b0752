pub mod inference;
pub mod interpreter;
pub mod preprocessing;
pub mod taxonomy;

use std::sync::Arc;

use tracing::info;

use crate::config::GraderConfig;
use crate::error::{GraderError, Result};

pub use inference::{InferenceEngine, RtenModel, ScoreModel};
pub use interpreter::{Interpretation, Rejection, ResultInterpreter, Timestamper, argmax};
pub use preprocessing::{ImagePreprocessor, ImageSource, ImageTensor, SourceImage};
pub use taxonomy::{GradeRule, Taxonomy, TaxonomyEntry};

/// Runs one image through preprocessing, inference and interpretation.
///
/// Owns its engine, so a pipeline must be used by one caller at a time; see
/// [`ClassifierWorker`](crate::worker::ClassifierWorker) for a shared handle.
pub struct ClassificationPipeline {
    preprocessor: ImagePreprocessor,
    engine: InferenceEngine,
    interpreter: ResultInterpreter,
}

impl ClassificationPipeline {
    /// Assemble a pipeline around a loaded engine.
    ///
    /// Fails unless the taxonomy covers exactly the engine's output classes.
    pub fn new(
        preprocessor: ImagePreprocessor,
        engine: InferenceEngine,
        interpreter: ResultInterpreter,
    ) -> Result<Self> {
        let classes = interpreter.taxonomy().len();
        if classes != engine.num_classes() {
            return Err(GraderError::Taxonomy(format!(
                "Taxonomy {} has {} classes but the model outputs {}",
                interpreter.taxonomy().model_version(),
                classes,
                engine.num_classes()
            )));
        }
        if !engine.is_loaded() {
            return Err(GraderError::ModelLoad("Engine has no model loaded".to_string()));
        }
        Ok(Self {
            preprocessor,
            engine,
            interpreter,
        })
    }

    /// Build the standard pipeline for `config` around a model file on disk.
    pub fn from_model_file(
        config: &GraderConfig,
        model_path: &std::path::Path,
        taxonomy: Arc<Taxonomy>,
    ) -> Result<Self> {
        let mut engine = InferenceEngine::new(config);
        engine.load_file(model_path)?;
        info!("Model {} ready", model_path.display());
        Self::new(
            ImagePreprocessor::new(config),
            engine,
            ResultInterpreter::new(taxonomy).with_threshold(config.confidence_threshold),
        )
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    pub fn taxonomy(&self) -> &Arc<Taxonomy> {
        self.interpreter.taxonomy()
    }

    pub fn classify(&self, source: impl Into<ImageSource>) -> Result<Interpretation> {
        let tensor = self.preprocessor.prepare(source)?;
        let scores = self.engine.classify(&tensor)?;
        let interpretation = self.interpreter.interpret(&scores);
        if let Interpretation::Accepted(classification) = &interpretation {
            info!(
                "Classified as {} ({:.2}%)",
                classification.class_name,
                classification.confidence * 100.0
            );
        }
        Ok(interpretation)
    }

    pub fn close(&mut self) {
        self.engine.close();
    }
}
