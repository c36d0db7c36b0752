use std::sync::Arc;

use image::{DynamicImage, ImageBuffer, Rgb};
use mushroom_grader::classification::{
    ClassificationPipeline, ImagePreprocessor, ImageTensor, InferenceEngine, ResultInterpreter,
    ScoreModel, Taxonomy,
};
use mushroom_grader::config::GraderConfig;
use mushroom_grader::core::db::ResultStore;
use mushroom_grader::error::Result;
use mushroom_grader::models::{Category, Classification};
use tempfile::NamedTempFile;
use time::OffsetDateTime;

/// Index of "Oyster - Class A" in the built-in taxonomy.
pub const OYSTER_CLASS_A: usize = 7;
/// Index of "Amanita phalloides (Death Cap)" in the built-in taxonomy.
pub const DEATH_CAP: usize = 1;
/// Index of "Shiitake Mushroom" in the built-in taxonomy.
pub const SHIITAKE: usize = 11;

/// Solid-color RGB image in memory.
pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |_, _| Rgb(color)))
}

/// Creates a solid-color PNG and returns the temp file.
/// The file will be automatically cleaned up when dropped.
pub fn create_test_image(color: [u8; 3]) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    solid_image(100, 80, color)
        .save_with_format(file.path(), image::ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Creates a ResultStore in a temporary directory.
/// Returns both the store and the temp directory (which must be kept alive).
pub async fn create_test_store() -> (ResultStore, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let store = ResultStore::open(dir.path().join("results.db"))
        .await
        .expect("Failed to create test store");
    (store, dir)
}

/// Timestamp at whole milliseconds since the Unix epoch.
pub fn at_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .expect("Timestamp out of range")
}

/// Creates a Classification with test data at the given timestamp.
pub fn make_classification(
    class_name: &str,
    category: Category,
    confidence: f32,
    millis: i64,
) -> Classification {
    Classification {
        class_name: class_name.to_string(),
        class_index: 0,
        confidence,
        category,
        is_poisonous: category == Category::Poisonous,
        grade: None,
        image_path: None,
        timestamp: at_millis(millis),
        notes: None,
    }
}

/// A score vector of `len` entries where `index` gets `score` and the rest share the remainder.
pub fn scores_with(len: usize, index: usize, score: f32) -> Vec<f32> {
    let rest = (1.0 - score) / (len - 1) as f32;
    (0..len).map(|i| if i == index { score } else { rest }).collect()
}

fn declared(dims: &[usize]) -> Option<Vec<Option<usize>>> {
    Some(dims.iter().copied().map(Some).collect())
}

/// Stand-in model that always returns the same scores.
pub struct FixedScores {
    pub scores: Vec<f32>,
    pub output_classes: usize,
}

impl FixedScores {
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            output_classes: scores.len(),
            scores,
        }
    }
}

impl ScoreModel for FixedScores {
    fn input_shape(&self) -> Option<Vec<Option<usize>>> {
        declared(&GraderConfig::default().input_shape())
    }

    fn output_shape(&self) -> Option<Vec<Option<usize>>> {
        declared(&[1, self.output_classes])
    }

    fn predict(&self, _input: &ImageTensor) -> Result<Vec<f32>> {
        Ok(self.scores.clone())
    }
}

/// Stand-in model that predicts Shiitake for bright images and Death Cap for dark ones.
pub struct BrightnessModel;

impl ScoreModel for BrightnessModel {
    fn input_shape(&self) -> Option<Vec<Option<usize>>> {
        // Symbolic batch dimension.
        Some(vec![None, Some(256), Some(256), Some(3)])
    }

    fn output_shape(&self) -> Option<Vec<Option<usize>>> {
        None
    }

    fn predict(&self, input: &ImageTensor) -> Result<Vec<f32>> {
        let index = if input.mean() >= 0.5 { SHIITAKE } else { DEATH_CAP };
        Ok(scores_with(12, index, 0.9))
    }
}

/// Builds the default pipeline around the given stand-in model.
pub fn make_pipeline(model: Box<dyn ScoreModel>) -> ClassificationPipeline {
    let config = GraderConfig::default();
    let mut engine = InferenceEngine::new(&config);
    engine.load_model(model).expect("Failed to load test model");
    let taxonomy = Arc::new(Taxonomy::builtin().expect("Built-in taxonomy is invalid"));
    ClassificationPipeline::new(
        ImagePreprocessor::new(&config),
        engine,
        ResultInterpreter::new(taxonomy).with_threshold(config.confidence_threshold),
    )
    .expect("Failed to build test pipeline")
}
