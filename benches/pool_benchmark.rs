use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dbengine::backend::{CursorDocumentStore, MemPool};
use dbengine::pool::{ClusterDescriptor, PoolRegistry};
use dbengine::query::{compile, DocumentDialect, Operator, Query, RuleSet};
use dbengine::{DocumentStore, MemStore, Result};
use rand::Rng;
use serde_json::json;

fn registry(spec: &str) -> PoolRegistry<usize> {
    let connector = |_: &ClusterDescriptor, replica: usize| -> Result<usize> { Ok(replica) };
    PoolRegistry::init(spec, &connector).unwrap()
}

/// Benchmark the three selection strategies
fn bench_selection(c: &mut Criterion) {
    let pool = registry("a[4],b[3],c[2],d");
    let keys: Vec<String> = (0..1024).map(|i| format!("counter:{}", i)).collect();

    let mut group = c.benchmark_group("selection");
    group.bench_function("first", |b| b.iter(|| black_box(pool.first())));
    group.bench_function("select_robin", |b| b.iter(|| black_box(pool.select_robin())));
    group.bench_function("select_shading", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % keys.len();
            black_box(pool.select_shading(&keys[i]))
        })
    });
    group.finish();
}

/// Benchmark compiling condition trees of growing width
fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for width in [1, 8, 64] {
        let mut rules = RuleSet::and();
        for i in 0..width {
            rules = rules.with_group(RuleSet::or()
                .with_condition(format!("f{}", i), Operator::SoftGt, i)
                .with_condition(format!("g{}", i), Operator::In, json!([1, 2, 3])));
        }
        let query = Query::new("bench", false).with_condition(rules.clone());
        group.bench_with_input(BenchmarkId::new("document_dialect", width), &rules, |b, rules| {
            b.iter(|| compile(&DocumentDialect, black_box(rules)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("signature", width), &query, |b, query| {
            b.iter(|| black_box(query.signature()))
        });
    }
    group.finish();
}

/// Benchmark cursor paging: deep jump vs. already walked page
fn bench_paging(c: &mut Criterion) {
    let store = CursorDocumentStore::local("bench").unwrap();
    let mut rng = rand::thread_rng();
    for i in 0..2000 {
        store
            .put_raw("items", &format!("i{:05}", i), json!({"score": rng.gen_range(0..500)}))
            .unwrap();
    }
    let base = Query::new("items", false).sort("score", false);

    c.bench_function("paging_cold_jump", |b| {
        b.iter(|| {
            store.clean_paging_info(&base.clone().paging(0, 50));
            store.query(&base.clone().paging(20, 50)).count()
        })
    });
    store.query(&base.clone().paging(20, 50));
    c.bench_function("paging_walked_page", |b| {
        b.iter(|| store.query(&base.clone().paging(19, 50)).count())
    });
}

fn bench_counters(c: &mut Criterion) {
    let mem = MemPool::local();
    c.bench_function("incr_int_shading", |b| {
        b.iter(|| mem.incr_int_shading(black_box("hits")).unwrap())
    });
}

criterion_group!(benches, bench_selection, bench_compile, bench_paging, bench_counters);
criterion_main!(benches);
