use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use phivault::audit::first_broken_link;
use phivault::{generate_master_key, AuditMeta, Cipher, LedgerEntry, Vault};
use serde_json::json;

fn benchmark_verify(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("ledger_verify");

    for len in [100usize, 1000, 2000] {
        let dir = tempfile::tempdir().unwrap();
        let cipher = Arc::new(Cipher::new(generate_master_key().unwrap()).unwrap());
        let vault = Vault::new(cipher, dir.path().join("auditChain.json"));
        let path = dir.path().join("responses.json");
        let meta = AuditMeta::new("response.submit", "QuestionnaireResponse", "q");

        let entries: Vec<LedgerEntry> = runtime.block_on(async {
            for i in 0..len {
                vault.secure_write(&path, &json!({"id": i, "score": i % 27}), &meta).await.unwrap();
            }
            vault.ledger().entries().await.unwrap()
        });

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("in_memory", len), &entries, |b, entries| {
            b.iter(|| assert_eq!(first_broken_link(entries), None));
        });
        group.bench_with_input(BenchmarkId::new("from_disk", len), &len, |b, _| {
            b.iter(|| assert!(runtime.block_on(vault.verify_ledger()).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_verify);
criterion_main!(benches);
