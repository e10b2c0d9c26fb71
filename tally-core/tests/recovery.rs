//! Crash-recovery behaviour of the WAL storage

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tally_core::storage::{Storage, StorageOptions, WalStorage};
use tally_core::Metric;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn random_batch(rng: &mut StdRng) -> Vec<Metric> {
    (0..rng.gen_range(1..5))
        .map(|_| {
            let id = rng.gen_range(0..8);
            if rng.gen_bool(0.5) {
                Metric::counter(format!("counter_{id}"), rng.gen_range(-1_000..1_000))
            } else {
                Metric::gauge(format!("gauge_{id}"), rng.gen_range(-1.0e6..1.0e6))
            }
        })
        .collect()
}

async fn write_and_reopen(path: &Path, options: StorageOptions, seed: u64) {
    let ctx = CancellationToken::new();
    let mut rng = StdRng::seed_from_u64(seed);

    let storage = WalStorage::open(path, options.clone()).unwrap();
    for _ in 0..200 {
        storage.save(&ctx, random_batch(&mut rng)).await.unwrap();
    }
    let before = storage.get_all(&ctx).await.unwrap();
    storage.close().await.unwrap();

    let restored = WalStorage::open(path, options).unwrap();
    assert_eq!(restored.get_all(&ctx).await.unwrap(), before);
    restored.close().await.unwrap();
}

#[tokio::test]
async fn test_recovery_reproduces_state_synced() {
    for seed in 0..5 {
        let temp_dir = TempDir::new().unwrap();
        write_and_reopen(
            &temp_dir.path().join("metrics.wal"),
            StorageOptions::synced(),
            seed,
        )
        .await;
    }
}

#[tokio::test]
async fn test_recovery_reproduces_state_buffered() {
    let options = StorageOptions {
        store_interval: Duration::from_millis(5),
        restore: true,
    };
    for seed in 10..13 {
        let temp_dir = TempDir::new().unwrap();
        write_and_reopen(&temp_dir.path().join("metrics.wal"), options.clone(), seed).await;
    }
}

#[tokio::test]
async fn test_recovery_is_repeatable() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("metrics.wal");
    let ctx = CancellationToken::new();

    let storage = WalStorage::open(&path, StorageOptions::synced()).unwrap();
    storage
        .save(&ctx, vec![Metric::counter("hits", 3), Metric::gauge("load", 0.75)])
        .await
        .unwrap();
    storage.close().await.unwrap();

    // Reopening without writes must not change the log or the state
    let len = fs::metadata(&path).unwrap().len();
    for _ in 0..3 {
        let storage = WalStorage::open(&path, StorageOptions::synced()).unwrap();
        assert_eq!(
            storage.get_all(&ctx).await.unwrap(),
            vec![Metric::counter("hits", 3), Metric::gauge("load", 0.75)]
        );
        storage.close().await.unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
    }
}

#[tokio::test]
async fn test_torn_write_refuses_to_start() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("metrics.wal");
    let ctx = CancellationToken::new();

    let storage = WalStorage::open(&path, StorageOptions::synced()).unwrap();
    storage.save(&ctx, vec![Metric::counter("hits", 1)]).await.unwrap();
    storage.close().await.unwrap();

    // Simulate a crash halfway through appending the next frame
    let frame = fs::read(&path).unwrap();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&frame[..frame.len() / 2]).unwrap();
    drop(file);

    let err = WalStorage::open(&path, StorageOptions::synced()).err().unwrap();
    assert!(err.is_corruption(), "{err}");
}
