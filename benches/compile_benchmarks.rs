//! Compilation benchmarks: cold pipeline runs, plan cache hits, and
//! materialization of scripted result rows.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sqlweave::ast::builders::{captured, lambda, lit, Query};
use sqlweave::{BoundParameter, ExecutionResult, QueryCompiler, Row, TableDescriptor, Value, ValueType};
use std::sync::Arc;
use std::time::Duration;

fn orders() -> Arc<TableDescriptor> {
    Arc::new(
        TableDescriptor::new("dbo", "Orders")
            .column("Id", ValueType::Int32)
            .nullable_column("Customer", ValueType::String)
            .column("Total", ValueType::Int32),
    )
}

fn paged(minimum: i32) -> Query {
    Query::from_table(orders())
        .filter(lambda("o", |o| o.member("Total").gt(captured("minimum", minimum))))
        .order_by(lambda("o", |o| o.member("Id")))
        .skip(lit(20))
        .take(lit(10))
        .filter(lambda("o", |o| o.member("Customer").is_not_null()))
}

fn bench_cold_compile(c: &mut Criterion) {
    let compiler = QueryCompiler::new().without_cache();
    let grouped = Query::from_table(orders())
        .group_by(lambda("o", |o| o.member("Customer")))
        .select(lambda("g", |g| {
            g.into_query().sum(lambda("x", |x| x.member("Total"))).into_expr()
        }))
        .into_op();
    let paged = paged(100).into_op();

    let mut group = c.benchmark_group("cold_compile");
    group.bench_function("paged", |b| b.iter(|| compiler.compile(black_box(&paged))));
    group.bench_function("grouped", |b| b.iter(|| compiler.compile(black_box(&grouped))));
    group.finish();
}

fn bench_cached_compile(c: &mut Criterion) {
    let compiler = QueryCompiler::new();
    let op = paged(100).into_op();
    let _ = compiler.compile(&op);

    c.bench_function("cached_compile", |b| b.iter(|| compiler.compile(black_box(&op))));
}

fn bench_materialize(c: &mut Criterion) {
    let compiled = match QueryCompiler::new().compile(&paged(0).into_op()) {
        Ok(compiled) => compiled,
        Err(e) => panic!("benchmark query failed to compile: {e}"),
    };

    let mut group = c.benchmark_group("materialize");
    for size in [100usize, 1_000, 10_000] {
        let rows: Vec<Row> = (0..size)
            .map(|i| {
                Row::new(vec![
                    Value::Int32(i as i32),
                    Value::from(format!("customer-{i}")),
                    Value::Int32((i % 500) as i32),
                ])
            })
            .collect();
        let executor =
            |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> { Ok(rows.clone()) };

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| compiled.execute(&executor));
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(5))
        .warm_up_time(Duration::from_secs(1));
    targets = bench_cold_compile, bench_cached_compile, bench_materialize
}
criterion_main!(benches);
