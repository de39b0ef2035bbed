use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use searchy::{Index, IndexConfig};

const WORDS: &[&str] = &[
    "market", "election", "storm", "court", "minister", "vote", "energy", "price", "team", "league",
    "river", "flood", "police", "school", "health", "virus", "budget", "trade", "border", "summit",
];

fn corpus(n: usize) -> Vec<(String, String)> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|i| {
            let len = rng.random_range(20..80);
            let body: Vec<&str> = (0..len).map(|_| WORDS[rng.random_range(0..WORDS.len())]).collect();
            (format!("doc-{i}"), body.join(" "))
        })
        .collect()
}

fn bench_ingest(c: &mut Criterion) {
    let docs = corpus(2_000);
    c.bench_function("ingest_2000", |b| {
        b.iter_batched(
            || Index::in_memory(IndexConfig::default()),
            |index| index.ingest(docs.iter().map(|(k, t)| (k.as_str(), t.as_str()))),
            BatchSize::LargeInput,
        )
    });
}

fn bench_query(c: &mut Criterion) {
    let index = Index::in_memory(IndexConfig::default());
    for chunk in corpus(10_000).chunks(1_000) {
        index.ingest(chunk.iter().map(|(k, t)| (k.as_str(), t.as_str()))).expect("ingest");
    }
    let mut group = c.benchmark_group("query");
    for q in ["market", "storm AND flood", "court OR police -vote", "\"energy price\""] {
        group.bench_function(q, |b| b.iter(|| index.search(q, 10, None)));
    }
    group.finish();
}

criterion_group!(benches, bench_ingest, bench_query);
criterion_main!(benches);
