mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from mushroom_grader for tests
pub use mushroom_grader::classification::{
    ClassificationPipeline, ImagePreprocessor, ImageSource, ImageTensor, InferenceEngine,
    Interpretation, ResultInterpreter, ScoreModel, SourceImage, Taxonomy, TaxonomyEntry,
};
pub use mushroom_grader::config::GraderConfig;
pub use mushroom_grader::core::db::{ResultRepository, ResultStats, ResultStore};
pub use mushroom_grader::error::GraderError;
pub use mushroom_grader::models::{Category, Classification, ClassificationResult};
