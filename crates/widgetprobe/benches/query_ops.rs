//! Query Operations Benchmarks
//!
//! Benchmarks for query construction, wire encoding, state decoding and
//! selection against an in-memory tree.
//!
//! Run with: `cargo bench --bench query_ops`

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use widgetprobe::fake::FakeAddress;
use widgetprobe::prelude::*;
use widgetprobe::{Query, Row};

fn bench_query_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_building");

    let cases = vec![
        ("child", 1),
        ("nested_3", 3),
        ("nested_8", 8),
    ];

    for (name, depth) in cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), &depth, |bench, depth| {
            bench.iter(|| {
                let mut query = Query::root("Application").unwrap();
                for level in 0..*depth {
                    query = query
                        .select_child("Widget", filters! { "level" => level, "visible" => true })
                        .unwrap();
                }
                black_box(query.server_query_bytes());
            });
        });
    }

    group.finish();
}

fn bench_filter_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_encoding");

    let texts = vec![
        ("plain", "OK"),
        ("quoted", "Say \"hello\" to 'them'"),
        ("long", "The quick brown fox jumps over the lazy dog, twice over"),
    ];

    for (name, text) in texts {
        group.bench_with_input(BenchmarkId::from_parameter(name), &text, |bench, text| {
            bench.iter(|| {
                let query = Query::whole_tree_search("Label", filters! { "text" => *text }).unwrap();
                black_box(query.server_query_bytes());
            });
        });
    }

    group.finish();
}

fn bench_state_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_decoding");

    let values = vec![
        ("string", json!([0, "label text"])),
        ("rectangle", json!([1, 10, 20, 640, 480])),
        ("point", json!([2, 5, 7])),
        ("color", json!([4, 255, 128, 0, 255])),
        ("datetime", json!([5, 1_700_000_000])),
    ];

    for (name, wire) in values {
        group.bench_with_input(BenchmarkId::from_parameter(name), &wire, |bench, wire| {
            bench.iter(|| black_box(PropertyValue::from_wire(black_box(wire)).unwrap()));
        });
    }

    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");

    for count in [10_i64, 100, 500] {
        let mut rows = vec![Row::new("/App", json!({"id": [0, 1]}))];
        rows.extend((0..count).map(|index| {
            Row::new(
                "/App/List/Item",
                json!({"id": [0, index + 2], "order": [0, count - index]}),
            )
        }));
        let context = ProbeContext::new_mocked();
        let root = make_proxy_object(&context, Arc::new(FakeAddress::tree(rows)), None).unwrap();

        group.bench_with_input(BenchmarkId::new("select_many_sorted", count), &root, |bench, root| {
            bench.iter(|| {
                let items = root
                    .select_many("Item", Filters::new(), Some(&["order"]))
                    .unwrap();
                black_box(items.len());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_query_building,
    bench_filter_encoding,
    bench_state_decoding,
    bench_selection
);
criterion_main!(benches);
