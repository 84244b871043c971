//! Evaluation benchmarks for kql-eval.
//!
//! Measures single-expression cost, pipeline throughput and the per-record
//! cost of a host running many standing queries.


use std::sync::Arc;

use chrono::TimeDelta;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use kql_eval::{Evaluator, FunctionRegistry, Host, HostConfig, Pipeline, record_from_json};
use kql_parser::parse_expression;

// ---------------------------------------------------------------------------
// Benchmark: individual expressions against one record
// ---------------------------------------------------------------------------

fn bench_expressions(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression");

    let event = record_from_json(datagen::gen_events(1, TimeDelta::seconds(1)).remove(0)).unwrap();
    let evaluator = Evaluator::new(Arc::new(FunctionRegistry::new()));
    for (name, text) in [
        ("equality", r#"Computer == "DC-01""#),
        ("has", r#"CommandLine has "whoami""#),
        ("regex", r#"CommandLine matches regex "(?i)power\\w+""#),
        ("arithmetic", "Bytes * 8 / 1024 + DestinationPort % 7"),
        ("in_list", r#"Computer in~ ("ws-001", "ws-002", "dc-01", "sql-01")"#),
        ("functions", r#"strcat(tolower(Computer), ":", tostring(DestinationPort))"#),
        ("datetime", "bin(todatetime(TimeCreated), 5m) + 1h"),
    ] {
        let expr = parse_expression(text).unwrap();
        group.bench_with_input(BenchmarkId::new("eval", name), &expr, |b, expr| {
            b.iter(|| black_box(evaluator.eval(black_box(expr), &event)));
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: one filter pipeline over many records
// ---------------------------------------------------------------------------

fn bench_pipeline_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_throughput");
    group.sample_size(20);

    let events: Vec<_> = datagen::gen_events(10_000, TimeDelta::seconds(1))
        .into_iter()
        .map(|e| record_from_json(e).unwrap())
        .collect();
    let query = datagen::gen_filter_query(&mut datagen::rng());

    group.bench_function("filter_10k", |b| {
        b.iter(|| {
            let mut pipeline = Pipeline::parse(&query, Arc::new(FunctionRegistry::new())).unwrap();
            for event in &events {
                black_box(pipeline.on_next(event).ok());
            }
        });
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: one record through a host with N standing queries
// ---------------------------------------------------------------------------

fn bench_host_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_per_record");

    let events: Vec<_> = datagen::gen_events(1_000, TimeDelta::seconds(1))
        .into_iter()
        .map(|e| record_from_json(e).unwrap())
        .collect();

    for n in [10, 100, 500] {
        let mut host = Host::with_registry(HostConfig::default(), Arc::new(FunctionRegistry::new()));
        for (i, query) in datagen::gen_queries(n).iter().enumerate() {
            host.add_query(&format!("// query {i}"), query);
        }

        group.bench_function(BenchmarkId::new("queries", n), |b| {
            let mut i = 0;
            b.iter(|| {
                let result = host.on_next(black_box(&events[i % events.len()]));
                i += 1;
                black_box(result);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_expressions,
    bench_pipeline_throughput,
    bench_host_queries,
);
criterion_main!(benches);
