use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tally_core::storage::{Storage, StorageOptions, WalStorage};
use tally_core::wal::{Operation, WalRecord};
use tally_core::Metric;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn bench_codec(c: &mut Criterion) {
    let record = WalRecord::new(Operation::Set, Metric::gauge("cpu_utilization", 0.42));
    let frame = record.encode().unwrap();

    c.bench_function("record_encode", |b| b.iter(|| black_box(&record).encode().unwrap()));
    c.bench_function("record_decode", |b| {
        b.iter(|| WalRecord::decode(black_box(&frame)).unwrap())
    });
}

fn bench_save(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let temp_dir = TempDir::new().unwrap();
    let ctx = CancellationToken::new();

    let buffered = rt.block_on(async {
        WalStorage::open(temp_dir.path().join("buffered.wal"), StorageOptions::default()).unwrap()
    });
    c.bench_function("save_buffered", |b| {
        b.iter(|| {
            rt.block_on(buffered.save(&ctx, vec![Metric::counter("hits", 1)]))
                .unwrap()
        })
    });

    let synced =
        WalStorage::open(temp_dir.path().join("synced.wal"), StorageOptions::synced()).unwrap();
    c.bench_function("save_synced", |b| {
        b.iter(|| {
            rt.block_on(synced.save(&ctx, vec![Metric::counter("hits", 1)]))
                .unwrap()
        })
    });

    rt.block_on(async {
        buffered.close().await.unwrap();
        synced.close().await.unwrap();
    });
}

criterion_group!(benches, bench_codec, bench_save);
criterion_main!(benches);
