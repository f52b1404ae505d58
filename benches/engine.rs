//! End-to-end engine benchmarks.
//!
//! Compares `build_indexes` and `search` across corpus sizes and embedding
//! dimensions using the deterministic `HashEmbedder` (no real model
//! inference in the hot loop).

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rank_hybrid::{Document, Embedder, Engine, EngineConfig, HashEmbedder};

fn generate_docs(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| Document {
            id: format!("doc-{}", i),
            name: format!("Engineer {}", i),
            title: Some("Staff Software Engineer".to_string()),
            skills: vec!["rust".to_string(), "distributed systems".to_string(), format!("skill-{}", i % 37)],
            technologies: vec!["hnsw".to_string(), "bm25".to_string()],
            experience_years: (i % 20) as i32,
            ..Default::default()
        })
        .collect()
}

fn build_engine(n_docs: usize, dim: usize) -> Arc<Engine> {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(dim));
    let dir = std::env::temp_dir().join(format!("rank-hybrid-bench-{}-{}-{}", n_docs, dim, std::process::id()));
    let config = EngineConfig::new(dim, dir);
    let engine = Engine::new(config, embedder).unwrap();
    engine.build_indexes(&generate_docs(n_docs)).unwrap();
    engine
}

fn bench_build_indexes(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_build_indexes");

    for (n_docs, dim) in [(100, 128), (1000, 256), (10000, 384)].iter() {
        let docs = generate_docs(*n_docs);
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(*dim));

        group.bench_with_input(BenchmarkId::new("build", format!("{}docs_dim{}", n_docs, dim)), &docs, |b, docs| {
            b.iter(|| {
                let dir = std::env::temp_dir().join(format!("rank-hybrid-bench-build-{}", std::process::id()));
                let config = EngineConfig::new(*dim, dir);
                let engine = Engine::new(config, Arc::clone(&embedder)).unwrap();
                black_box(engine.build_indexes(docs).unwrap());
            })
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_search");

    for (n_docs, dim) in [(1000, 128), (10000, 256), (50000, 384)].iter() {
        let engine = build_engine(*n_docs, *dim);

        group.bench_with_input(BenchmarkId::new("search", format!("{}docs_dim{}", n_docs, dim)), &engine, |b, engine| {
            b.iter(|| {
                let _ = black_box(engine.search("staff software engineer rust", 20, None).unwrap());
            })
        });
    }

    group.finish();
}

fn bench_incremental_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_incremental_add");

    for n_docs in [1000, 10000].iter() {
        let engine = build_engine(*n_docs, 256);

        group.bench_with_input(BenchmarkId::new("apply_adds_and_updates", format!("{}docs", n_docs)), &engine, |b, engine| {
            let mut counter = 0usize;
            b.iter(|| {
                counter += 1;
                let doc = Document {
                    id: format!("bench-incremental-{}", counter),
                    name: "Benchmark Engineer".to_string(),
                    skills: vec!["rust".to_string()],
                    ..Default::default()
                };
                black_box(rank_hybrid::MutableIndexSink::apply_adds_and_updates(engine.as_ref(), &[doc]));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_indexes, bench_search, bench_incremental_add);
criterion_main!(benches);
