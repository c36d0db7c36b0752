pub mod classification;
pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod worker;

pub use classification::{ClassificationPipeline, Interpretation, Taxonomy};
pub use config::GraderConfig;
pub use error::{GraderError, Result};
pub use models::{Category, Classification, ClassificationResult};
pub use pipeline::{DebugConfig, Pipeline, PipelineContext, PipelineStep};
pub use worker::{ClassifierWorker, PendingClassification};
