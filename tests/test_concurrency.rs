//! Integration tests for concurrent use of one ResultStore.

mod common;

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_get_distinct_ids() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;

    let mut handles = Vec::new();
    for task in 0..8i64 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..10 {
                let classification = make_classification(
                    "Shiitake Mushroom",
                    Category::Edible,
                    0.8,
                    task * 100 + i,
                );
                ids.push(store.insert(&classification).await?);
            }
            anyhow::Ok(ids)
        }));
    }

    let mut all_ids = Vec::new();
    for handle in handles {
        all_ids.extend(handle.await??);
    }
    all_ids.sort_unstable();
    all_ids.dedup();

    assert_eq!(all_ids.len(), 80);
    assert_eq!(store.count_all().await?, 80);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_writes_see_whole_batches() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for batch in 0..20i64 {
                let results: Vec<Classification> = (0..5)
                    .map(|i| {
                        make_classification("Button Mushroom", Category::Edible, 0.6, batch * 10 + i)
                    })
                    .collect();
                store.insert_many(&results).await?;
            }
            anyhow::Ok(())
        })
    };

    for _ in 0..20 {
        let count = store.count_all().await?;
        assert_eq!(count % 5, 0, "saw a partial batch: {}", count);
        tokio::task::yield_now().await;
    }

    writer.await??;
    assert_eq!(store.count_all().await?, 100);

    Ok(())
}
