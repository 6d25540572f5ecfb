//! Indexing and query benchmarks over a synthetic mailbox
//!
//! Run with: `cargo bench`
//! Save baseline: `cargo bench -- --save-baseline main`
//! Compare: `cargo bench -- --baseline main`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::time::Duration;
use tempfile::TempDir;
use termdex::index::{FullTextIndexer, SectionRegistry};
use termdex::utils::{CancellationToken, EngineConfig};

const WORDS: &[&str] = &[
    "report", "meeting", "budget", "release", "omea", "reader", "feed", "schedule", "project", "review",
    "draft", "invoice", "status", "weekly", "numbers", "customer", "support", "server", "backup", "plan",
];

fn body(doc: usize) -> String {
    let mut text = String::new();
    for sentence in 0..8 {
        for word in 0..12 {
            let pick = (doc * 31 + sentence * 7 + word * 13) % WORDS.len();
            text.push_str(WORDS[pick]);
            text.push(' ');
        }
        text.push_str(". ");
    }
    text
}

fn build_index(docs: usize) -> (TempDir, FullTextIndexer) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut indexer = FullTextIndexer::open(
        &dir.path().join("bench.idx"),
        EngineConfig::default(),
        &CancellationToken::new(),
    )
    .expect("Failed to open index");

    for doc in 0..docs {
        indexer
            .add_document_heading(doc as i32, &format!("{} {}", WORDS[doc % WORDS.len()], doc))
            .expect("Failed to add heading");
        indexer
            .add_document_fragment(doc as i32, &body(doc), None)
            .expect("Failed to add body");
        if doc % 100 == 99 {
            indexer.end_batch_update().expect("Failed to flush batch");
        }
    }
    indexer.end_batch_update().expect("Failed to flush batch");
    (dir, indexer)
}

fn bench_indexing(c: &mut Criterion) {
    let mut group = c.benchmark_group("indexing");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for docs in [100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(docs), &docs, |b, &docs| {
            b.iter(|| build_index(black_box(docs)))
        });
    }
    group.finish();
}

fn bench_query_parsing(c: &mut Criterion) {
    let sections = SectionRegistry::default();
    let queries = [
        "report",
        "weekly report",
        "\"budget review\"",
        "omea or reader",
        "meeting near schedule",
        "sched*",
        "[SU] status",
        "(draft or invoice) near customer",
    ];

    let mut group = c.benchmark_group("query_parsing");
    for query in queries {
        group.bench_with_input(BenchmarkId::from_parameter(query), &query, |b, &q| {
            b.iter(|| termdex::query::parse_query(black_box(q), &sections))
        });
    }
    group.finish();
}

fn bench_query_execution(c: &mut Criterion) {
    let (_dir, mut indexer) = build_index(1000);
    let queries = [
        "report",
        "weekly report",
        "\"budget review\"",
        "omea or reader",
        "meeting near schedule",
        "re*",
    ];

    let mut group = c.benchmark_group("query_execution");
    for query in queries {
        group.bench_with_input(BenchmarkId::from_parameter(query), &query, |b, &q| {
            b.iter(|| indexer.process_query_internal(black_box(q)).expect("Query failed"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_indexing, bench_query_parsing, bench_query_execution);
criterion_main!(benches);
