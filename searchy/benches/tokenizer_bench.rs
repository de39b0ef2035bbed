use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use searchy::tokenizer::{tokenize, Analyzer};

const TEXT: &str = "The Federal Reserve held interest rates steady on Wednesday, \
    signalling that policymakers remain cautious about inflation. Markets rallied \
    after the announcement while analysts debated whether cuts would follow in the \
    coming months. Officials said the labour market was cooling but still resilient.";

fn bench_tokenize(c: &mut Criterion) {
    let text = TEXT.repeat(32);
    let mut group = c.benchmark_group("tokenize");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("default_chain", |b| b.iter(|| tokenize(&text)));
    let analyzer = Analyzer::default();
    group.bench_function("terms_only", |b| b.iter(|| analyzer.terms(&text)));
    group.finish();
}

criterion_group!(benches, bench_tokenize);
criterion_main!(benches);
