//! Hashing benchmarks for cluster slot computation.
//!
//! Every multi-key command issued in development mode against a cluster is
//! slot-checked, so this sits on the hot path of the gatekeeper.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use redix_core::slot::{key_slot, same_slot};
use redix_core::version::ServerInfo;

fn slot_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_slot");
    for key in ["foo", "{user1000}.following", "doing:{orders-queue-with-a-long-name}"] {
        group.bench_with_input(BenchmarkId::from_parameter(key), key, |b, key| {
            b.iter(|| key_slot(std::hint::black_box(key.as_bytes())));
        });
    }
    group.finish();
}

fn cross_slot_check(c: &mut Criterion) {
    let keys: Vec<String> = (0..64).map(|i| format!("{{tenant-7}}:item:{i}")).collect();
    c.bench_function("same_slot_64_keys", |b| {
        b.iter(|| same_slot(std::hint::black_box(&keys)));
    });
}

fn info_parsing(c: &mut Criterion) {
    let info = "# Server\r\nredis_version:7.2.4\r\nredis_mode:standalone\r\nos:Linux\r\n\r\n# Cluster\r\ncluster_enabled:0\r\n";
    c.bench_function("server_info_parse", |b| {
        b.iter(|| ServerInfo::parse(std::hint::black_box(info)));
    });
}

criterion_group!(benches, slot_hashing, cross_slot_check, info_parsing);
criterion_main!(benches);
