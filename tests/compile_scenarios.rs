//! End-to-end compilation scenarios
//!
//! Each test builds an operator tree over `MyClass1`, compiles it and checks
//! the rendered text, then runs it through a scripted executor where the
//! result shape matters.

use sqlweave::ast::builders::{captured, client_fn, lambda, list, lit, new_object, null, Query};
use sqlweave::{
    BoundParameter, CompileError, ExecutionError, ExecutionResult, QueryCompiler, Row,
    TableDescriptor, Value, ValueType,
};
use std::sync::Arc;

fn my_class() -> Arc<TableDescriptor> {
    Arc::new(
        TableDescriptor::new("dbo", "MyClass1")
            .nullable_column("Prop1", ValueType::String)
            .column("Prop2", ValueType::Int32),
    )
}

fn compile(query: Query) -> String {
    QueryCompiler::new()
        .without_cache()
        .compile(&query.into_op())
        .unwrap()
        .sql()
        .to_string()
}

// Pushdown and paging

#[test]
fn test_filter_on_nullable_column() {
    let sql = compile(
        Query::from_table(my_class()).filter(lambda("m", |m| m.member("Prop1").eq(lit("X")))),
    );
    assert_eq!(
        sql,
        "SELECT [m].[Prop1] AS [Prop1], [m].[Prop2] AS [Prop2]\n\
         FROM [dbo].[MyClass1] AS [m]\n\
         WHERE [m].[Prop1] = N'X'"
    );
}

#[test]
fn test_filter_after_take_pushes_down() {
    let sql = compile(
        Query::from_table(my_class())
            .take(1)
            .filter(lambda("m", |m| m.member("Prop2").gt(lit(1)))),
    );
    assert_eq!(
        sql,
        "SELECT [m].[Prop1] AS [Prop1], [m].[Prop2] AS [Prop2]\n\
         FROM (\n    \
         SELECT TOP (1) [m_0].[Prop1] AS [Prop1], [m_0].[Prop2] AS [Prop2]\n    \
         FROM [dbo].[MyClass1] AS [m_0]\n\
         ) AS [m]\n\
         WHERE [m].[Prop2] > 1"
    );
}

#[test]
fn test_skip_without_ordering_uses_row_number() {
    let sql = compile(Query::from_table(my_class()).skip(1));
    assert_eq!(
        sql,
        "SELECT [m].[Prop1] AS [Prop1], [m].[Prop2] AS [Prop2]\n\
         FROM [dbo].[MyClass1] AS [m]\n\
         ORDER BY ROW_NUMBER() OVER(ORDER BY (SELECT 1) ASC) ASC\n\
         OFFSET 1 ROWS"
    );
}

#[test]
fn test_ordering_then_take_with_captured_count() {
    let sql = compile(
        Query::from_table(my_class())
            .order_by(lambda("m", |m| m.member("Prop2")))
            .then_by_descending(lambda("m", |m| m.member("Prop1")))
            .take(captured("count", 10)),
    );
    assert!(sql.starts_with("SELECT TOP (@p0) "), "{sql}");
    assert!(sql.ends_with("ORDER BY [m].[Prop2] ASC, [m].[Prop1] DESC"), "{sql}");
}

#[test]
fn test_single_reads_two_rows() {
    let sql = compile(Query::from_table(my_class()).single());
    assert!(sql.starts_with("SELECT TOP (2) "), "{sql}");
}

#[test]
fn test_select_after_distinct_pushes_down() {
    let sql = compile(
        Query::from_table(my_class())
            .distinct()
            .select(lambda("m", |m| m.member("Prop2"))),
    );
    assert!(!sql.starts_with("SELECT DISTINCT"), "{sql}");
    assert!(sql.contains("FROM (\n    SELECT DISTINCT "), "{sql}");
    assert_eq!(sql.matches("SELECT").count(), 2, "{sql}");
}

// Ordering direction

#[test]
fn test_reverse_flips_existing_ordering() {
    let sql = compile(
        Query::from_table(my_class())
            .order_by(lambda("m", |m| m.member("Prop2")))
            .reverse(),
    );
    assert!(sql.ends_with("ORDER BY [m].[Prop2] DESC"), "{sql}");
}

#[test]
fn test_reverse_without_ordering_uses_row_number() {
    let sql = compile(Query::from_table(my_class()).reverse());
    assert!(
        sql.ends_with("ORDER BY ROW_NUMBER() OVER(ORDER BY (SELECT 1) ASC) DESC"),
        "{sql}"
    );
}

#[test]
fn test_last_reads_one_row_in_reverse_order() {
    let compiled = QueryCompiler::new()
        .compile(
            &Query::from_table(my_class())
                .order_by(lambda("m", |m| m.member("Prop2")))
                .last()
                .into_op(),
        )
        .unwrap();
    let sql = compiled.sql();
    assert!(sql.starts_with("SELECT TOP (1) "), "{sql}");
    assert!(sql.ends_with("ORDER BY [m].[Prop2] DESC"), "{sql}");

    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Ok(my_class_rows().into_iter().rev().take(1).collect())
    };
    assert_eq!(
        compiled.execute(&executor).unwrap(),
        Value::Object(vec![
            ("Prop1".to_string(), Value::from("Y")),
            ("Prop2".to_string(), Value::Int32(3)),
        ])
    );
}

// Positional operators

#[test]
fn test_take_while_compares_with_first_failing_row() {
    let sql = compile(
        Query::from_table(my_class())
            .order_by(lambda("m", |m| m.member("Prop2")))
            .take_while(lambda("m", |m| m.member("Prop2").lt(lit(3)))),
    );
    assert!(sql.contains("ROW_NUMBER() OVER(ORDER BY "), "{sql}");
    assert!(sql.contains("COALESCE(MIN("), "{sql}");
    assert!(sql.contains(" < ("), "{sql}");
    assert!(!sql.contains(" >= ("), "{sql}");
}

#[test]
fn test_skip_while_keeps_rows_from_first_failing_row() {
    let sql = compile(
        Query::from_table(my_class())
            .order_by(lambda("m", |m| m.member("Prop2")))
            .skip_while(lambda("m", |m| m.member("Prop2").lt(lit(3)))),
    );
    assert!(sql.contains("COALESCE(MIN("), "{sql}");
    assert!(sql.contains(" >= ("), "{sql}");
}

#[test]
fn test_element_at_past_the_end_fails() {
    let compiled = QueryCompiler::new()
        .compile(
            &Query::from_table(my_class())
                .order_by(lambda("m", |m| m.member("Prop2")))
                .element_at(captured("index", 5))
                .into_op(),
        )
        .unwrap();
    assert!(compiled.sql().contains("OFFSET @p0 ROWS"), "{}", compiled.sql());

    let executor = |_: &str, parameters: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        assert_eq!(parameters[0].value, Value::Int32(5));
        Ok(Vec::new())
    };
    assert!(matches!(
        compiled.execute(&executor),
        Err(ExecutionError::ElementOutOfRange(5))
    ));
}

#[test]
fn test_sequence_equal_full_joins_on_position() {
    let compiled = QueryCompiler::new()
        .compile(
            &Query::from_table(my_class())
                .select(lambda("m", |m| m.member("Prop2")))
                .sequence_equal(
                    Query::from_table(my_class()).select(lambda("n", |n| n.member("Prop2"))),
                )
                .into_op(),
        )
        .unwrap();
    let sql = compiled.sql();
    assert!(sql.contains("NOT EXISTS"), "{sql}");
    assert!(sql.contains("FULL JOIN"), "{sql}");
    assert_eq!(sql.matches("ROW_NUMBER() OVER(").count(), 2, "{sql}");

    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Ok(vec![Row::new(vec![Value::Bool(true)])])
    };
    assert_eq!(compiled.execute(&executor).unwrap(), Value::Bool(true));
}

#[test]
fn test_substring_at_int_max_compiles() {
    let sql = compile(Query::from_table(my_class()).select(lambda("m", |m| {
        m.member("Prop1").method("Substring", vec![lit(i32::MAX)])
    })));
    assert!(sql.contains("SUBSTRING("), "{sql}");
    assert!(sql.contains("2147483648"), "{sql}");
}

// Grouping

#[test]
fn test_group_by_with_aggregate_folds_into_one_select() {
    let sql = compile(
        Query::from_table(my_class())
            .group_by(lambda("m", |m| m.member("Prop2")))
            .select(lambda("g", |g| {
                g.into_query()
                    .sum(lambda("x", |x| x.member("Prop2")))
                    .into_expr()
            })),
    );
    assert!(sql.contains("GROUP BY "), "{sql}");
    assert!(sql.contains("SUM("), "{sql}");
    assert_eq!(sql.matches("SELECT").count(), 1, "{sql}");
    assert!(!sql.contains("FOR JSON"), "{sql}");
}

#[test]
fn test_raw_group_by_encodes_elements() {
    let sql = compile(Query::from_table(my_class()).group_by(lambda("m", |m| m.member("Prop2"))));
    assert!(sql.contains("GROUP BY "), "{sql}");
    assert!(sql.matches("SELECT").count() > 1, "{sql}");
    assert!(sql.contains("FOR JSON PATH, INCLUDE_NULL_VALUES"), "{sql}");
}

#[test]
fn test_where_after_grouped_projection_pushes_down() {
    let sql = compile(
        Query::from_table(my_class())
            .group_by(lambda("m", |m| m.member("Prop2")))
            .select(lambda("g", |g| {
                new_object([
                    ("Key", g.clone().member("Key")),
                    (
                        "Total",
                        g.into_query()
                            .sum(lambda("x", |x| x.member("Prop2")))
                            .into_expr(),
                    ),
                ])
            }))
            .filter(lambda("x", |x| x.member("Total").gt(lit(5)))),
    );
    assert!(!sql.contains("HAVING"), "{sql}");
    assert!(sql.contains("GROUP BY "), "{sql}");
    assert_eq!(sql.matches("SELECT").count(), 2, "{sql}");
    assert!(sql.ends_with("WHERE [x].[Total] > 5"), "{sql}");
}

// Contains

#[test]
fn test_contains_inline_list() {
    let sql = compile(
        Query::from_table(my_class())
            .filter(lambda("m", |m| list([1, 2, 3]).contains(m.member("Prop2")))),
    );
    assert!(sql.ends_with("WHERE [m].[Prop2] IN (1, 2, 3)"), "{sql}");
}

#[test]
fn test_contains_captured_list_uses_openjson() {
    let ids = Value::List(vec![Value::Int32(4), Value::Int32(5)]);
    let compiled = QueryCompiler::new()
        .compile(
            &Query::from_table(my_class())
                .filter(lambda("m", |m| captured("ids", ids).contains(m.member("Prop2"))))
                .into_op(),
        )
        .unwrap();
    assert!(
        compiled
            .sql()
            .ends_with("WHERE [m].[Prop2] IN (SELECT [value] FROM OPENJSON(@p0))"),
        "{}",
        compiled.sql()
    );

    let parameters = compiled.parameters().unwrap();
    assert_eq!(parameters.len(), 1);
    assert_eq!(parameters[0].ty, ValueType::Json);
    assert_eq!(parameters[0].value, Value::from("[4,5]"));
}

#[test]
fn test_negated_contains_keeps_null_rows() {
    let sql = compile(
        Query::from_table(my_class())
            .filter(lambda("m", |m| list(["a", "b"]).contains(m.member("Prop1")).not())),
    );
    assert!(
        sql.ends_with("WHERE ([m].[Prop1] IS NULL) OR NOT ([m].[Prop1] IN (N'a', N'b'))"),
        "{sql}"
    );
}

#[test]
fn test_null_list_item_matches_null_operand() {
    let sql = compile(Query::from_table(my_class()).filter(lambda("m", |m| {
        list([lit("a"), null()]).contains(m.member("Prop1"))
    })));
    assert!(sql.contains("[m].[Prop1] IN (N'a')"), "{sql}");
    assert!(sql.contains(" OR ([m].[Prop1] IS NULL)"), "{sql}");
    assert!(!sql.contains(", NULL"), "{sql}");
}

#[test]
fn test_empty_inline_list_matches_nothing() {
    let sql = compile(
        Query::from_table(my_class())
            .filter(lambda("m", |m| list(Vec::<i32>::new()).contains(m.member("Prop2")))),
    );
    assert!(!sql.contains(" IN ("), "{sql}");
}

// Execution through a scripted executor

fn my_class_rows() -> Vec<Row> {
    vec![
        Row::new(vec![Value::from("X"), Value::Int32(1)]),
        Row::new(vec![Value::Null, Value::Int32(2)]),
        Row::new(vec![Value::from("Y"), Value::Int32(3)]),
    ]
}

#[test]
fn test_filter_scenario_executes() {
    let compiled = QueryCompiler::new()
        .compile(
            &Query::from_table(my_class())
                .filter(lambda("m", |m| m.member("Prop1").eq(captured("wanted", "X"))))
                .into_op(),
        )
        .unwrap();

    let executor = |sql: &str, parameters: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        assert!(sql.ends_with("WHERE [m].[Prop1] = @p0"), "{sql}");
        assert_eq!(parameters.len(), 1);
        let wanted = parameters[0].value.clone();
        Ok(my_class_rows()
            .into_iter()
            .filter(|row| row.get(0) == Some(&wanted))
            .collect())
    };

    let result = compiled.execute(&executor).unwrap();
    assert_eq!(
        result,
        Value::List(vec![Value::Object(vec![
            ("Prop1".to_string(), Value::from("X")),
            ("Prop2".to_string(), Value::Int32(1)),
        ])])
    );
}

fn shout(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::String(s) => Ok(Value::from(s.to_uppercase())),
        Value::Null => Ok(Value::Null),
        other => Err(format!("cannot shout {other:?}")),
    }
}

#[test]
fn test_client_projection_runs_in_memory() {
    let query = Query::from_table(my_class()).select(lambda("m", |m| {
        new_object([
            ("Prop2", m.clone().member("Prop2")),
            ("Loud", client_fn("shout", shout, vec![m.member("Prop1")])),
        ])
    }));

    let compiled = QueryCompiler::new().compile(&query.into_op()).unwrap();
    assert!(!compiled.sql().contains("shout"));
    assert_eq!(compiled.plan().columns().len(), 2);

    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Ok(vec![
            Row::new(vec![Value::Int32(1), Value::from("x")]),
            Row::new(vec![Value::Int32(2), Value::Null]),
        ])
    };
    let result = compiled.execute(&executor).unwrap();
    assert_eq!(
        result,
        Value::List(vec![
            Value::Object(vec![
                ("Prop2".to_string(), Value::Int32(1)),
                ("Loud".to_string(), Value::from("X")),
            ]),
            Value::Object(vec![
                ("Prop2".to_string(), Value::Int32(2)),
                ("Loud".to_string(), Value::Null),
            ]),
        ])
    );
}

#[test]
fn test_single_with_two_rows_fails() {
    let compiled = QueryCompiler::new()
        .compile(&Query::from_table(my_class()).single().into_op())
        .unwrap();
    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Ok(my_class_rows().into_iter().take(2).collect())
    };
    assert!(matches!(
        compiled.execute(&executor),
        Err(ExecutionError::MoreThanOneElement)
    ));
}

#[test]
fn test_executor_error_is_propagated() {
    let compiled = QueryCompiler::new()
        .compile(&Query::from_table(my_class()).into_op())
        .unwrap();
    let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
        Err(ExecutionError::Executor("connection reset".to_string()))
    };
    assert!(matches!(
        compiled.execute(&executor),
        Err(ExecutionError::Executor(message)) if message == "connection reset"
    ));
}

#[test]
fn test_unknown_member_is_a_compile_error() {
    let err = QueryCompiler::new()
        .compile(
            &Query::from_table(my_class())
                .filter(lambda("m", |m| m.member("Missing").eq(lit(1))))
                .into_op(),
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::UnknownMember { member, .. } if member == "Missing"));
}
