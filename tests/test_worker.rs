//! Integration tests for the background classifier worker.
//!
//! Tests cover:
//! - Results delivered in submission order
//! - Rejections and errors reported per job
//! - Shutdown behaviour

mod common;

use common::*;
use mushroom_grader::worker::ClassifierWorker;

#[test]
fn test_jobs_complete_in_submission_order() -> anyhow::Result<()> {
    let worker = ClassifierWorker::spawn(make_pipeline(Box::new(BrightnessModel)))?;

    let shades = [250u8, 5, 240, 10, 200];
    let pending = shades
        .iter()
        .map(|&shade| worker.submit(solid_image(64, 48, [shade, shade, shade])))
        .collect::<Result<Vec<_>, _>>()?;

    let names: Vec<String> = pending
        .into_iter()
        .map(|job| job.wait().map(|i| i.accepted().expect("accepted").class_name))
        .collect::<Result<_, _>>()?;
    assert_eq!(
        names,
        vec![
            "Shiitake Mushroom",
            "Amanita phalloides (Death Cap)",
            "Shiitake Mushroom",
            "Amanita phalloides (Death Cap)",
            "Shiitake Mushroom",
        ]
    );

    worker.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_classify_from_async_code() -> anyhow::Result<()> {
    let worker = ClassifierWorker::spawn(make_pipeline(Box::new(FixedScores::new(scores_with(
        12,
        OYSTER_CLASS_A,
        0.91,
    )))))?;
    let file = create_test_image([180, 170, 150]);

    let classification = worker
        .classify(file.path().to_path_buf())
        .await?
        .accepted()
        .expect("0.91 clears the threshold");
    assert_eq!(classification.class_name, "Oyster - Class A");

    let (store, _temp_dir) = create_test_store().await;
    let id = store.insert(&classification).await?;
    assert_eq!(store.get_by_id(id).await?.expect("stored"), classification);

    tokio::task::spawn_blocking(move || worker.shutdown()).await?;
    Ok(())
}

#[test]
fn test_rejections_and_errors_are_per_job() -> anyhow::Result<()> {
    let worker = ClassifierWorker::spawn(make_pipeline(Box::new(FixedScores::new(vec![
        1.0 / 12.0;
        12
    ]))))?;

    let broken = worker.submit(ImageSource::Bytes(b"garbage".to_vec()))?;
    let flat = worker.submit(solid_image(32, 32, [0, 0, 0]))?;

    assert!(matches!(broken.wait(), Err(GraderError::Decode(_))));
    assert!(flat.wait()?.is_rejected());

    worker.shutdown();
    Ok(())
}

#[test]
fn test_queued_jobs_finish_before_shutdown() -> anyhow::Result<()> {
    let worker = ClassifierWorker::spawn(make_pipeline(Box::new(BrightnessModel)))?;

    let pending = (0..4)
        .map(|_| worker.submit(solid_image(300, 200, [255, 255, 255])))
        .collect::<Result<Vec<_>, _>>()?;
    worker.shutdown();

    for job in pending {
        assert!(!job.wait()?.is_rejected());
    }
    Ok(())
}
