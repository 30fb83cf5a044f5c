//! Performance benchmarks for the shuffle and transform hot paths.
//!
//! Run with: `cargo bench --bench partition`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Bucket assignment | <200ns | Per key, xxh64 |
//! | Partition 10k pairs | <5ms | Including clones into buckets |
//! | Normalize 100KB | <10ms | Regex split + stopword lookup |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use anagram_pipeline::{
    map_to_pairs, normalize, parse_stopwords, reduce_groups, PartitionHash, PartitionHasher,
};

const SAMPLE: &str = "The quick brown fox jumps over the lazy dog. Listen, silent night; \
                      a thing of evil, vile and live. Don't study the dusty veil! ";

fn corpus(repeats: usize) -> String {
    SAMPLE.repeat(repeats)
}

fn bench_bucket(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket");
    for hash in [PartitionHash::Xxh64, PartitionHash::Sha256] {
        let hasher = PartitionHasher::new(16, hash).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(hash.name()), &hasher, |b, hasher| {
            b.iter(|| hasher.bucket(black_box("aeilnrst")))
        });
    }
    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    let stopwords = parse_stopwords("the,a,of,and");
    let mut group = c.benchmark_group("partition");
    for repeats in [10usize, 100, 1000] {
        let pairs = map_to_pairs(&normalize(&corpus(repeats), &stopwords));
        let hasher = PartitionHasher::new(8, PartitionHash::Xxh64).unwrap();
        group.throughput(Throughput::Elements(pairs.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pairs.len()), &pairs, |b, pairs| {
            b.iter(|| hasher.partition(black_box(pairs.clone())))
        });
    }
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let stopwords = parse_stopwords("the,a,of,and");
    let mut group = c.benchmark_group("normalize");
    for repeats in [10usize, 100, 1000] {
        let document = corpus(repeats);
        group.throughput(Throughput::Bytes(document.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(document.len()), &document, |b, doc| {
            b.iter(|| normalize(black_box(doc), &stopwords))
        });
    }
    group.finish();
}

fn bench_reduce(c: &mut Criterion) {
    let stopwords = parse_stopwords("the,a,of,and");
    let pairs = map_to_pairs(&normalize(&corpus(1000), &stopwords));
    c.bench_function("reduce_groups", |b| {
        b.iter(|| reduce_groups(black_box(pairs.clone())))
    });
}

criterion_group!(benches, bench_bucket, bench_partition, bench_normalize, bench_reduce);
criterion_main!(benches);
