//! Property-based tests (proptest)
//!
//! Null-safe equality translation is checked by interpreting the composed
//! predicate under SQL three-valued logic. Execution is checked by feeding
//! rows built straight from generated data to compiled plans (flat and with
//! a JSON-encoded nested collection) and comparing with the in-memory
//! evaluator over the same data.

use proptest::prelude::*;
use serde_json::json;
use sqlweave::ast::builders::{lambda, lit, new_object, Query};
use sqlweave::evaluator::{values_equal, Env, Frame};
use sqlweave::ir::{SqlBinaryOp, SqlExpr, SqlUnaryOp};
use sqlweave::{
    BoundParameter, Evaluator, Expr, ExecutionResult, Lambda, Optimizer, QueryCompiler, QueryComposer,
    Row, TableDescriptor, Value, ValueType,
};
use std::sync::Arc;

fn pairs() -> Arc<TableDescriptor> {
    Arc::new(
        TableDescriptor::new("dbo", "Pairs")
            .nullable_column("A", ValueType::Int32)
            .nullable_column("B", ValueType::Int32),
    )
}

/// SQL value under three-valued logic
#[derive(Debug, Clone, Copy, PartialEq)]
enum Sql {
    Int(Option<i32>),
    Bool(Option<bool>),
}

impl Sql {
    fn as_bool(self) -> Option<bool> {
        match self {
            Sql::Bool(b) => b,
            Sql::Int(_) => panic!("integer used as a predicate"),
        }
    }

    fn is_null(self) -> bool {
        matches!(self, Sql::Int(None) | Sql::Bool(None))
    }
}

fn interpret(expr: &SqlExpr, a: Option<i32>, b: Option<i32>) -> Sql {
    match expr {
        SqlExpr::Column(column) => match column.name.as_str() {
            "A" => Sql::Int(a),
            "B" => Sql::Int(b),
            other => panic!("unexpected column {other}"),
        },
        SqlExpr::Constant(Value::Int32(v)) => Sql::Int(Some(*v)),
        SqlExpr::Constant(Value::Bool(v)) => Sql::Bool(Some(*v)),
        SqlExpr::Constant(Value::Null) => Sql::Int(None),
        SqlExpr::IsNull { operand, negated } => {
            Sql::Bool(Some(interpret(operand, a, b).is_null() != *negated))
        }
        SqlExpr::Unary {
            op: SqlUnaryOp::Not,
            operand,
        } => Sql::Bool(interpret(operand, a, b).as_bool().map(|v| !v)),
        SqlExpr::Binary { op, left, right } => {
            let l = interpret(left, a, b);
            let r = interpret(right, a, b);
            match op {
                SqlBinaryOp::And => Sql::Bool(match (l.as_bool(), r.as_bool()) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }),
                SqlBinaryOp::Or => Sql::Bool(match (l.as_bool(), r.as_bool()) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }),
                SqlBinaryOp::Equal | SqlBinaryOp::NotEqual => {
                    let (Sql::Int(l), Sql::Int(r)) = (l, r) else {
                        panic!("comparison of non-integers");
                    };
                    Sql::Bool(l.zip(r).map(|(l, r)| (l == r) == (*op == SqlBinaryOp::Equal)))
                }
                other => panic!("unexpected operator {other:?}"),
            }
        }
        other => panic!("unexpected expression {other:?}"),
    }
}

fn compose_predicate(negated: bool) -> SqlExpr {
    let op = Query::from_table(pairs())
        .filter(lambda("m", |m| {
            let left = m.clone().member("A");
            let right = m.member("B");
            if negated {
                left.ne(right)
            } else {
                left.eq(right)
            }
        }))
        .into_op();
    let composed = QueryComposer::new().compose_query(&op).unwrap();
    let (select, _) = Optimizer::new().optimize(composed.select);
    select.predicate.expect("filter keeps a predicate")
}

fn nullable_int() -> impl Strategy<Value = Option<i32>> {
    prop::option::of(-3i32..3)
}

fn as_value(v: Option<i32>) -> Value {
    v.map_or(Value::Null, Value::Int32)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_equality_keeps_rows_like_memory(a in nullable_int(), b in nullable_int()) {
        let predicate = compose_predicate(false);
        let kept = interpret(&predicate, a, b).as_bool() == Some(true);
        prop_assert_eq!(kept, values_equal(&as_value(a), &as_value(b)));
    }

    #[test]
    fn prop_inequality_keeps_rows_like_memory(a in nullable_int(), b in nullable_int()) {
        let predicate = compose_predicate(true);
        let kept = interpret(&predicate, a, b).as_bool() == Some(true);
        prop_assert_eq!(kept, !values_equal(&as_value(a), &as_value(b)));
    }

    #[test]
    fn prop_compiled_projection_matches_evaluator(
        people in prop::collection::vec(
            (any::<i32>(), prop::option::of("[a-z]{0,6}"), -10_000i32..10_000),
            0..8,
        )
    ) {
        let table = Arc::new(
            TableDescriptor::new("dbo", "People")
                .column("Id", ValueType::Int32)
                .nullable_column("Name", ValueType::String)
                .column("Age", ValueType::Int32),
        );
        let selector = lambda("p", |p| {
            new_object([
                ("Id", p.clone().member("Id")),
                ("Name", p.clone().member("Name")),
                ("Twice", p.member("Age").mul(lit(2))),
            ])
        });

        let data: Vec<Value> = people
            .iter()
            .map(|(id, name, age)| {
                Value::Object(vec![
                    ("Id".to_string(), Value::Int32(*id)),
                    ("Name".to_string(), name.clone().map_or(Value::Null, Value::from)),
                    ("Age".to_string(), Value::Int32(*age)),
                ])
            })
            .collect();

        let compiled = QueryCompiler::new()
            .compile(&Query::from_table(table).select(selector.clone()).into_op())
            .unwrap();
        let columns: Vec<String> = compiled
            .plan()
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();

        let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
            Ok(people
                .iter()
                .map(|(id, name, age)| {
                    Row::new(
                        columns
                            .iter()
                            .map(|column| match column.as_str() {
                                "Id" => Value::Int32(*id),
                                "Name" => name.clone().map_or(Value::Null, Value::from),
                                "Twice" => Value::Int32(age * 2),
                                other => panic!("unexpected column {other}"),
                            })
                            .collect(),
                    )
                })
                .collect())
        };
        let compiled_result = compiled.execute(&executor).unwrap();

        prop_assert_eq!(compiled_result, in_memory(data, Query::select, selector));
    }

    #[test]
    fn prop_grouped_elements_match_evaluator(
        members in prop::collection::vec(
            (any::<i32>(), 0i32..3, prop::option::of("[a-z]{0,6}")),
            0..8,
        )
    ) {
        let table = Arc::new(
            TableDescriptor::new("dbo", "Members")
                .column("Id", ValueType::Int32)
                .column("Team", ValueType::Int32)
                .nullable_column("Name", ValueType::String),
        );
        let key = lambda("m", |m| m.member("Team"));
        let data: Vec<Value> = members
            .iter()
            .map(|(id, team, name)| {
                Value::Object(vec![
                    ("Id".to_string(), Value::Int32(*id)),
                    ("Team".to_string(), Value::Int32(*team)),
                    ("Name".to_string(), name.clone().map_or(Value::Null, Value::from)),
                ])
            })
            .collect();

        let compiled = QueryCompiler::new()
            .compile(&Query::from_table(table).group_by(key.clone()).into_op())
            .unwrap();
        prop_assert!(compiled.sql().contains("FOR JSON PATH"), "{}", compiled.sql());
        let columns: Vec<String> = compiled
            .plan()
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();

        // One row per team in first-seen order, elements as a JSON array
        let mut teams: Vec<i32> = Vec::new();
        for (_, team, _) in &members {
            if !teams.contains(team) {
                teams.push(*team);
            }
        }
        let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
            Ok(teams
                .iter()
                .map(|team| {
                    let elements: Vec<serde_json::Value> = members
                        .iter()
                        .filter(|(_, t, _)| t == team)
                        .map(|(id, t, name)| json!({"Id": id, "Team": t, "Name": name}))
                        .collect();
                    Row::new(
                        columns
                            .iter()
                            .map(|column| match column.as_str() {
                                "Key" => Value::Int32(*team),
                                "Elements" => Value::from(serde_json::Value::Array(elements.clone()).to_string()),
                                other => panic!("unexpected column {other}"),
                            })
                            .collect(),
                    )
                })
                .collect())
        };
        let compiled_result = compiled.execute(&executor).unwrap();

        prop_assert_eq!(compiled_result, in_memory(data, Query::group_by, key));
    }
}

/// Run `stage(selector)` over `data` with the in-memory evaluator
fn in_memory(data: Vec<Value>, stage: fn(Query, Lambda) -> Query, selector: Lambda) -> Value {
    let rows = Value::List(data);
    let frame = Frame::new("data", &rows, Env::root());
    let reference = stage(Query::from_expr(Expr::Parameter("data".to_string())), selector).into_op();
    Evaluator::new().run(&reference, frame.env()).unwrap()
}
