//! Integration tests for the inference engine and the assembled pipeline.
//!
//! Tests cover:
//! - Engine lifecycle: unloaded, loaded, closed
//! - Shape checks on load and on every call
//! - Rejection of unusable model files
//! - End-to-end classification with a stand-in model

mod common;

use std::sync::Arc;

use common::*;

fn prepared_tensor() -> ImageTensor {
    ImagePreprocessor::new(&GraderConfig::default())
        .prepare(solid_image(64, 64, [200, 180, 160]))
        .expect("Failed to preprocess test image")
}

#[test]
fn test_engine_lifecycle() -> anyhow::Result<()> {
    let config = GraderConfig::default();
    let mut engine = InferenceEngine::new(&config);
    let tensor = prepared_tensor();

    assert!(!engine.is_loaded());
    assert!(matches!(engine.classify(&tensor), Err(GraderError::Inference(_))));

    engine.load_model(Box::new(FixedScores::new(scores_with(12, 4, 0.7))))?;
    assert!(engine.is_loaded());
    let scores = engine.classify(&tensor)?;
    assert_eq!(scores.len(), 12);
    assert_eq!(scores[4], 0.7);

    let second = engine.load_model(Box::new(FixedScores::new(scores_with(12, 0, 0.7))));
    assert!(matches!(second, Err(GraderError::ModelLoad(_))));

    engine.close();
    engine.close();
    assert!(engine.is_closed());
    assert!(matches!(engine.classify(&tensor), Err(GraderError::Inference(_))));

    let reload = engine.load_model(Box::new(FixedScores::new(scores_with(12, 0, 0.7))));
    assert!(matches!(reload, Err(GraderError::ModelLoad(_))));

    Ok(())
}

#[test]
fn test_declared_output_shape_must_match() {
    let mut engine = InferenceEngine::new(&GraderConfig::default());

    let wrong_classes = engine.load_model(Box::new(FixedScores::new(scores_with(10, 0, 0.9))));
    assert!(matches!(wrong_classes, Err(GraderError::ModelLoad(_))));
    assert!(!engine.is_loaded());
}

#[test]
fn test_symbolic_dimensions_are_accepted() -> anyhow::Result<()> {
    let mut engine = InferenceEngine::new(&GraderConfig::default());
    engine.load_model(Box::new(BrightnessModel))?;

    let scores = engine.classify(&prepared_tensor())?;
    assert_eq!(scores.len(), 12);

    Ok(())
}

#[test]
fn test_wrong_score_count_is_an_error() -> anyhow::Result<()> {
    let mut engine = InferenceEngine::new(&GraderConfig::default());
    // Declares 12 outputs but returns 11.
    let mut model = FixedScores::new(vec![0.1; 11]);
    model.output_classes = 12;
    engine.load_model(Box::new(model))?;

    assert!(matches!(
        engine.classify(&prepared_tensor()),
        Err(GraderError::Inference(_))
    ));

    Ok(())
}

#[test]
fn test_input_tensor_shape_is_checked() -> anyhow::Result<()> {
    let mut engine = InferenceEngine::new(&GraderConfig::default());
    engine.load_model(Box::new(BrightnessModel))?;

    let small = GraderConfig {
        input_size: 32,
        ..GraderConfig::default()
    };
    let tensor = ImagePreprocessor::new(&small).prepare(solid_image(64, 64, [0, 0, 0]))?;
    assert_eq!(tensor.shape(), [1, 32, 32, 3]);
    assert!(matches!(engine.classify(&tensor), Err(GraderError::Inference(_))));

    Ok(())
}

#[test]
fn test_unusable_model_files_fail_to_load() -> anyhow::Result<()> {
    let mut engine = InferenceEngine::new(&GraderConfig::default());

    assert!(matches!(engine.load(Vec::new()), Err(GraderError::ModelLoad(_))));
    assert!(matches!(
        engine.load(b"this is not a model".to_vec()),
        Err(GraderError::ModelLoad(_))
    ));

    let dir = tempfile::TempDir::new()?;
    assert!(matches!(
        engine.load_file(dir.path().join("missing.rten")),
        Err(GraderError::ModelLoad(_))
    ));
    assert!(!engine.is_loaded());

    Ok(())
}

#[test]
fn test_pipeline_classifies_end_to_end() -> anyhow::Result<()> {
    let pipeline = make_pipeline(Box::new(FixedScores::new(scores_with(12, OYSTER_CLASS_A, 0.91))));

    let file = create_test_image([220, 210, 190]);
    let classification = pipeline
        .classify(file.path().to_path_buf())?
        .accepted()
        .expect("0.91 clears the threshold");
    assert_eq!(classification.class_name, "Oyster - Class A");
    assert_eq!(classification.grade.as_deref(), Some("Class A"));

    assert!(matches!(
        pipeline.classify(ImageSource::Bytes(vec![1, 2, 3])),
        Err(GraderError::Decode(_))
    ));

    Ok(())
}

#[test]
fn test_pipeline_requires_matching_taxonomy() -> anyhow::Result<()> {
    let config = GraderConfig::default();
    let small_taxonomy = Arc::new(Taxonomy::new(
        "small",
        vec![TaxonomyEntry::new("Only", false, Category::Edible)],
        1,
    )?);

    let mut engine = InferenceEngine::new(&config);
    engine.load_model(Box::new(BrightnessModel))?;
    let mismatch = ClassificationPipeline::new(
        ImagePreprocessor::new(&config),
        engine,
        ResultInterpreter::new(small_taxonomy),
    );
    assert!(matches!(mismatch, Err(GraderError::Taxonomy(_))));

    let unloaded = ClassificationPipeline::new(
        ImagePreprocessor::new(&config),
        InferenceEngine::new(&config),
        ResultInterpreter::new(Arc::new(Taxonomy::builtin()?)),
    );
    assert!(matches!(unloaded, Err(GraderError::ModelLoad(_))));

    Ok(())
}

#[test]
fn test_pipeline_sized_by_a_custom_taxonomy() -> anyhow::Result<()> {
    let taxonomy = Arc::new(Taxonomy::new(
        "tiny-v2",
        vec![
            TaxonomyEntry::new("Chanterelle", false, Category::Edible),
            TaxonomyEntry::new("Fly Agaric", true, Category::Poisonous),
            TaxonomyEntry::new("Bracket", false, Category::Inedible),
        ],
        3,
    )?);
    let config = GraderConfig::default().with_num_classes(taxonomy.len());

    let mut engine = InferenceEngine::new(&config);
    engine.load_model(Box::new(FixedScores::new(vec![0.1, 0.8, 0.1])))?;
    let pipeline = ClassificationPipeline::new(
        ImagePreprocessor::new(&config),
        engine,
        ResultInterpreter::new(taxonomy),
    )?;

    let classification = pipeline
        .classify(ImageSource::from(solid_image(64, 64, [90, 40, 30])))?
        .accepted()
        .expect("0.8 clears the threshold");
    assert_eq!(classification.class_name, "Fly Agaric");
    assert!(classification.is_poisonous);

    // A model built for the default 12 classes does not fit this table.
    let mut twelve = InferenceEngine::new(&config);
    let loaded = twelve.load_model(Box::new(FixedScores::new(scores_with(12, 0, 0.9))));
    assert!(matches!(loaded, Err(GraderError::ModelLoad(_))));

    Ok(())
}
