//! Execution Tests
//!
//! Plan reuse across calls, terminal operators and typed results, all
//! against scripted executors.

use serde::Deserialize;
use sqlweave::ast::builders::{captured, client_fn, lambda, new_object, Query};
use sqlweave::{
    BoundParameter, ExecutionError, ExecutionResult, PlanCache, QueryCompiler, Row,
    TableDescriptor, Value, ValueType,
};
use std::sync::Arc;
use std::thread;

fn orders() -> Arc<TableDescriptor> {
    Arc::new(
        TableDescriptor::new("dbo", "Orders")
            .column("Id", ValueType::Int32)
            .nullable_column("Customer", ValueType::String)
            .column("Total", ValueType::Int32),
    )
}

fn above(minimum: i32) -> Query {
    Query::from_table(orders()).filter(lambda("o", |o| o.member("Total").gt(captured("minimum", minimum))))
}

fn no_rows(_: &str, _: &[BoundParameter]) -> ExecutionResult<Vec<Row>> {
    Ok(Vec::new())
}

// Plan cache

#[test]
fn test_cached_plan_binds_new_values() {
    let compiler = QueryCompiler::new();
    let first = compiler.compile(&above(10).into_op()).unwrap();
    let second = compiler.compile(&above(250).into_op()).unwrap();

    assert!(second.is_cached());
    assert_eq!(first.sql(), second.sql());
    assert!(Arc::ptr_eq(first.plan(), second.plan()));

    let values = |q: &sqlweave::CompiledQuery| -> Vec<Value> {
        q.parameters().unwrap().into_iter().map(|p| p.value).collect()
    };
    assert_eq!(values(&first), vec![Value::Int32(10)]);
    assert_eq!(values(&second), vec![Value::Int32(250)]);
}

#[test]
fn test_null_capture_gets_its_own_plan() {
    let compiler = QueryCompiler::new();
    let by_customer = |name: Value| {
        Query::from_table(orders())
            .filter(lambda("o", |o| o.member("Customer").eq(captured("customer", name))))
            .into_op()
    };

    let typed = compiler.compile(&by_customer(Value::from("acme"))).unwrap();
    let null = compiler.compile(&by_customer(Value::Null)).unwrap();

    assert!(!null.is_cached());
    assert_ne!(typed.sql(), null.sql());
    assert!(null.sql().contains("IS NULL"), "{}", null.sql());
}

#[test]
fn test_shared_cache_across_threads() {
    let cache = Arc::new(PlanCache::new(8));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let compiler = QueryCompiler::new().with_cache(cache);
                compiler.compile(&above(i).into_op()).unwrap().sql().to_string()
            })
        })
        .collect();

    let sqls: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(sqls.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.len(), 1);
    let stats = cache.stats();
    assert_eq!(stats.hits + stats.misses, 4);
}

#[test]
fn test_cache_evicts_least_recently_used() {
    let cache = Arc::new(PlanCache::new(2));
    let compiler = QueryCompiler::new().with_cache(Arc::clone(&cache));

    let by_id = Query::from_table(orders()).filter(lambda("o", |o| o.member("Id").eq(captured("id", 1))));
    compiler.compile(&above(1).into_op()).unwrap();
    compiler.compile(&by_id.clone().into_op()).unwrap();
    compiler.compile(&above(2).into_op()).unwrap();
    compiler.compile(&Query::from_table(orders()).distinct().into_op()).unwrap();

    assert_eq!(cache.len(), 2);
    assert!(compiler.compile(&above(3).into_op()).unwrap().is_cached());
    assert!(!compiler.compile(&by_id.into_op()).unwrap().is_cached());
    assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn test_client_closure_is_not_reused_from_cache() {
    let compiler = QueryCompiler::new();
    let flagged = |threshold: i32| {
        Query::from_table(orders())
            .select(lambda("o", move |o| {
                new_object([
                    ("Total", o.clone().member("Total")),
                    (
                        "Large",
                        client_fn(
                            "is_large",
                            move |args: &[Value]| match &args[0] {
                                Value::Int32(total) => Ok(Value::Bool(*total > threshold)),
                                other => Err(format!("unexpected total {other:?}")),
                            },
                            vec![o.member("Total")],
                        ),
                    ),
                ])
            }))
            .into_op()
    };
    let large = |compiled: &sqlweave::CompiledQuery| -> Vec<Value> {
        let width = compiled.plan().columns().len();
        let executor = move |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
            Ok((1..=3).map(|t| Row::new(vec![Value::Int32(t); width])).collect())
        };
        match compiled.execute(&executor).unwrap() {
            Value::List(rows) => rows
                .iter()
                .map(|row| row.member("Large").cloned().unwrap_or(Value::Null))
                .collect(),
            other => panic!("expected a list, got {other:?}"),
        }
    };

    let loose = compiler.compile(&flagged(0)).unwrap();
    let strict = compiler.compile(&flagged(2)).unwrap();

    assert!(!strict.is_cached());
    assert_eq!(large(&loose), vec![Value::Bool(true); 3]);
    assert_eq!(
        large(&strict),
        vec![Value::Bool(false), Value::Bool(false), Value::Bool(true)]
    );
}

// Terminal operators

#[test]
fn test_count_of_empty_result_is_zero() {
    let compiler = QueryCompiler::new();
    let count = compiler
        .execute(&Query::from_table(orders()).count().into_op(), &no_rows)
        .unwrap();
    assert_eq!(count, Value::Int32(0));
}

#[test]
fn test_count_reads_scalar_row() {
    let compiled = QueryCompiler::new()
        .compile(&above(5).count().into_op())
        .unwrap();
    assert!(compiled.sql().contains("COUNT(*)"), "{}", compiled.sql());

    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Ok(vec![Row::new(vec![Value::Int32(3)])])
    };
    assert_eq!(compiled.execute(&executor).unwrap(), Value::Int32(3));
}

#[test]
fn test_first_on_empty_result_fails() {
    let compiler = QueryCompiler::new();
    let result = compiler.execute(&Query::from_table(orders()).first().into_op(), &no_rows);
    assert!(matches!(result, Err(ExecutionError::NoElements)));
}

#[test]
fn test_first_or_default_on_empty_result_is_null() {
    let compiler = QueryCompiler::new();
    let result = compiler
        .execute(&Query::from_table(orders()).first_or_default().into_op(), &no_rows)
        .unwrap();
    assert_eq!(result, Value::Null);
}

#[test]
fn test_scalar_first_or_default_uses_type_default() {
    let compiler = QueryCompiler::new();
    let op = Query::from_table(orders())
        .select(lambda("o", |o| o.member("Total")))
        .first_or_default()
        .into_op();
    assert_eq!(compiler.execute(&op, &no_rows).unwrap(), Value::Int32(0));
}

#[test]
fn test_any_reads_predicate_row() {
    let compiled = QueryCompiler::new()
        .compile(&above(100).any().into_op())
        .unwrap();
    assert!(compiled.sql().contains("EXISTS"), "{}", compiled.sql());

    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Ok(vec![Row::new(vec![Value::Bool(true)])])
    };
    assert_eq!(compiled.execute(&executor).unwrap(), Value::Bool(true));
}

// Typed results

#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Order {
    id: i32,
    customer: Option<String>,
    total: i32,
}

#[test]
fn test_execute_as_deserializes_rows() {
    let compiled = QueryCompiler::new().compile(&above(0).into_op()).unwrap();
    let executor = |_: &str, parameters: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        assert_eq!(parameters[0].name, "@p0");
        Ok(vec![
            Row::new(vec![Value::Int32(1), Value::from("acme"), Value::Int32(40)]),
            Row::new(vec![Value::Int32(2), Value::Null, Value::Int32(75)]),
        ])
    };

    let orders: Vec<Order> = compiled.execute_as(&executor).unwrap();
    assert_eq!(
        orders,
        vec![
            Order {
                id: 1,
                customer: Some("acme".to_string()),
                total: 40,
            },
            Order {
                id: 2,
                customer: None,
                total: 75,
            },
        ]
    );
}

#[test]
fn test_execute_as_reports_shape_mismatch() {
    let compiled = QueryCompiler::new()
        .compile(&Query::from_table(orders()).count().into_op())
        .unwrap();
    let result: ExecutionResult<Vec<Order>> = compiled.execute_as(&no_rows);
    assert!(matches!(result, Err(ExecutionError::Decode(_))));
}

#[test]
fn test_short_row_is_a_decode_error() {
    let compiled = QueryCompiler::new().compile(&above(0).into_op()).unwrap();
    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Ok(vec![Row::new(vec![Value::Int32(1)])])
    };
    assert!(matches!(
        compiled.execute(&executor),
        Err(ExecutionError::Decode(_))
    ));
}
