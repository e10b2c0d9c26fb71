//! Concurrent access to the WAL storage

use std::sync::Arc;
use std::time::Duration;
use tally_core::storage::{Storage, StorageOptions, WalStorage};
use tally_core::{Metric, TallyError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_counter_updates() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("metrics.wal");
    let storage = Arc::new(WalStorage::open(&path, StorageOptions::synced()).unwrap());

    let tasks = 8;
    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let storage = storage.clone();
            tokio::spawn(async move {
                let ctx = CancellationToken::new();
                for _ in 0..100 {
                    storage
                        .save(&ctx, vec![Metric::counter("shared", 1)])
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let ctx = CancellationToken::new();
    assert_eq!(
        storage.get(&ctx, "shared").await.unwrap(),
        Metric::counter("shared", 100 * tasks)
    );
    storage.close().await.unwrap();

    let restored = WalStorage::open(&path, StorageOptions::synced()).unwrap();
    assert_eq!(
        restored.get(&ctx, "shared").await.unwrap().int64(),
        100 * tasks
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mixed_traffic_with_background_flush() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("metrics.wal");
    let options = StorageOptions {
        store_interval: Duration::from_millis(1),
        restore: true,
    };
    let storage = Arc::new(WalStorage::open(&path, options.clone()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let storage = storage.clone();
            tokio::spawn(async move {
                let ctx = CancellationToken::new();
                for i in 0..50 {
                    storage
                        .save(
                            &ctx,
                            vec![
                                Metric::counter("requests", 1),
                                Metric::gauge(format!("worker_{worker}"), f64::from(i)),
                            ],
                        )
                        .await
                        .unwrap();
                    storage.get_all(&ctx).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let ctx = CancellationToken::new();
    let before = storage.get_all(&ctx).await.unwrap();
    assert_eq!(before[0], Metric::counter("requests", 200));
    storage.close().await.unwrap();

    let restored = WalStorage::open(&path, options).unwrap();
    assert_eq!(restored.get_all(&ctx).await.unwrap(), before);
    restored.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_rejects_waiters() {
    let temp_dir = TempDir::new().unwrap();
    let storage = Arc::new(
        WalStorage::open(temp_dir.path().join("metrics.wal"), StorageOptions::synced()).unwrap(),
    );
    storage.close().await.unwrap();

    let ctx = CancellationToken::new();
    let result = tokio::time::timeout(Duration::from_secs(1), storage.get_all(&ctx)).await;
    assert!(matches!(result, Ok(Err(TallyError::StorageClosed))));
}

#[tokio::test]
async fn test_cancelled_save_leaves_state_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let storage =
        WalStorage::open(temp_dir.path().join("metrics.wal"), StorageOptions::synced()).unwrap();
    let ctx = CancellationToken::new();
    storage.save(&ctx, vec![Metric::gauge("g", 1.0)]).await.unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = storage
        .save(&cancelled, vec![Metric::gauge("g", 2.0)])
        .await
        .unwrap_err();
    assert!(matches!(err, TallyError::Cancelled));

    assert_eq!(
        storage.get_all(&ctx).await.unwrap(),
        vec![Metric::gauge("g", 1.0)]
    );
}
