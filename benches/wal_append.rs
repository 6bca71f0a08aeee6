use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kestreldb::common::config::DEFAULT_MEMORY;
use kestreldb::{DataManager, Wal, Xid};
use tempfile::TempDir;

fn wal_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("wal/append");
    group.sample_size(20);
    for size in [16usize, 256, 4096] {
        let dir = tempfile::tempdir().expect("tmpdir");
        let wal = Wal::create(dir.path().join(format!("bench_{size}.log"))).expect("wal");
        let payload = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| wal.append(payload).expect("append"));
        });
    }
    group.finish();
}

fn data_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("data/insert");
    group.sample_size(20);
    let harness = InsertHarness::new();
    group.throughput(Throughput::Elements(1));
    group.bench_function("64b", |b| {
        b.iter(|| harness.dm.insert(Xid::SUPER, &harness.payload).expect("insert"));
    });
    group.finish();
}

struct InsertHarness {
    _tmpdir: TempDir,
    dm: DataManager,
    payload: Vec<u8>,
}

impl InsertHarness {
    fn new() -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let dm = DataManager::create(tmpdir.path().join("bench"), DEFAULT_MEMORY).expect("dm");
        Self {
            _tmpdir: tmpdir,
            dm,
            payload: vec![0xCD; 64],
        }
    }
}

criterion_group!(benches, wal_append, data_insert);
criterion_main!(benches);
