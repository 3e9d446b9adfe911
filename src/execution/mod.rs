//! Query Execution Module
//!
//! Compiled plans, the executor contract and result assembly:
//! - [`CompiledPlan`]: text, parameter shape, materializer, deferred client
//!   operators and the terminal cardinality rule; immutable and shared
//! - [`CompiledQuery`]: a plan plus the captured values of one call
//! - [`Executor`]: runs text with bound parameters and returns rows
//! - [`PlanCache`]: fingerprint-keyed LRU of compiled plans

pub mod cache;

pub use cache::{CacheStats, PlanCache};

use crate::ast::{AggregateOp, QueryOp};
use crate::code_generator::RenderedParameter;
use crate::error::{CompileError, ExecutionError, ExecutionResult};
use crate::evaluator::{element, truthy, Env, Evaluator, Frame};
use crate::ir_builder::{Terminal, ROWS_PARAMETER};
use crate::materializer::{ColumnInfo, RowMaterializer};
use crate::value::{Value, ValueType};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// Executor contract
// ============================================================================

/// One row returned by an executor, values by ordinal
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    /// Value of the column named `name` in `columns`
    pub fn get_named(&self, columns: &[ColumnInfo], name: &str) -> Option<&Value> {
        columns
            .iter()
            .position(|c| c.name == name)
            .and_then(|ordinal| self.values.get(ordinal))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// A parameter value bound to its placeholder
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// Placeholder name (`@p0`)
    pub name: String,
    pub value: Value,
    pub ty: ValueType,
}

/// Runs query text with bound parameters
pub trait Executor {
    fn execute(&self, sql: &str, parameters: &[BoundParameter]) -> ExecutionResult<Vec<Row>>;
}

impl<F> Executor for F
where
    F: Fn(&str, &[BoundParameter]) -> ExecutionResult<Vec<Row>>,
{
    fn execute(&self, sql: &str, parameters: &[BoundParameter]) -> ExecutionResult<Vec<Row>> {
        self(sql, parameters)
    }
}

// ============================================================================
// Compiled plans
// ============================================================================

/// Everything needed to run a query shape, independent of captured values
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub sql: String,
    pub parameters: Vec<RenderedParameter>,
    pub materializer: RowMaterializer,
    /// Operators evaluated in memory over the materialized rows
    pub client: Option<QueryOp>,
    pub terminal: Terminal,
}

impl CompiledPlan {
    /// Result columns in projection order
    pub fn columns(&self) -> &[ColumnInfo] {
        self.materializer.columns()
    }

    /// Bind every parameter slot to its captured value
    pub fn bind(&self, captured: &BTreeMap<String, Value>) -> ExecutionResult<Vec<BoundParameter>> {
        self.parameters
            .iter()
            .map(|parameter| {
                let slot = &parameter.slot;
                let value = captured
                    .get(&slot.name)
                    .ok_or_else(|| CompileError::UnboundParameter(slot.name.clone()))?;
                let (value, ty) = if slot.serialized {
                    let text = serde_json::to_string(&value.to_json())
                        .map_err(|e| ExecutionError::Decode(e.to_string()))?;
                    (Value::from(text), ValueType::Json)
                } else {
                    (value.clone().coerce(slot.ty), slot.ty)
                };
                Ok(BoundParameter {
                    name: parameter.placeholder.clone(),
                    value,
                    ty,
                })
            })
            .collect()
    }

    /// Materialize rows, run deferred operators and apply the terminal rule
    pub fn read(&self, rows: &[Row], captured: &BTreeMap<String, Value>) -> ExecutionResult<Value> {
        let evaluator = Evaluator::with_captured(captured);
        let values = rows
            .iter()
            .map(|row| self.materializer.materialize(row.values(), &evaluator))
            .collect::<ExecutionResult<Vec<_>>>()?;

        if let Some(client) = &self.client {
            let rows = Value::List(values);
            let frame = Frame::new(ROWS_PARAMETER, &rows, Env::root());
            return evaluator.run(client, frame.env());
        }

        match &self.terminal {
            Terminal::Sequence | Terminal::Client => Ok(Value::List(values)),
            Terminal::Element { kind, or_default } => {
                element(values, *kind, *or_default, self.materializer.default_value())
            }
            Terminal::ElementAt { index, or_default } => match values.into_iter().next() {
                Some(value) => Ok(value),
                None if *or_default => Ok(self.materializer.default_value()),
                None => Err(ExecutionError::ElementOutOfRange(
                    evaluator.index(index, Env::root())?,
                )),
            },
            Terminal::Scalar { op, nullable } => {
                let value = values.into_iter().next().unwrap_or(Value::Null);
                if !value.is_null() {
                    return Ok(value);
                }
                let ty = self.columns().first().map_or(ValueType::Int32, |c| c.ty);
                match op {
                    AggregateOp::Count | AggregateOp::LongCount | AggregateOp::Sum => {
                        Ok(Value::Int32(0).coerce(ty))
                    }
                    _ if *nullable => Ok(Value::Null),
                    _ => Err(ExecutionError::NoElements),
                }
            }
            Terminal::Predicate => Ok(Value::Bool(values.first().is_some_and(truthy))),
        }
    }
}

/// A compiled plan with the captured values of one call
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    plan: Arc<CompiledPlan>,
    captured: BTreeMap<String, Value>,
    cached: bool,
}

impl CompiledQuery {
    pub fn new(plan: Arc<CompiledPlan>, captured: BTreeMap<String, Value>, cached: bool) -> Self {
        CompiledQuery {
            plan,
            captured,
            cached,
        }
    }

    pub fn sql(&self) -> &str {
        &self.plan.sql
    }

    pub fn plan(&self) -> &Arc<CompiledPlan> {
        &self.plan
    }

    /// Captured values this call binds, by slot name
    pub fn captured(&self) -> &BTreeMap<String, Value> {
        &self.captured
    }

    /// True when the plan came from the plan cache
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Parameters in placeholder order
    pub fn parameters(&self) -> ExecutionResult<Vec<BoundParameter>> {
        self.plan.bind(&self.captured)
    }

    /// Run the query and assemble its result
    pub fn execute<E: Executor + ?Sized>(&self, executor: &E) -> ExecutionResult<Value> {
        let parameters = self.parameters()?;
        let rows = executor.execute(&self.plan.sql, &parameters)?;
        debug!(
            rows = rows.len(),
            parameters = parameters.len(),
            client = self.plan.client.is_some(),
            "executed query"
        );
        self.plan.read(&rows, &self.captured)
    }

    /// Run the query and deserialize its result into a caller-defined type
    pub fn execute_as<T: DeserializeOwned, E: Executor + ?Sized>(&self, executor: &E) -> ExecutionResult<T> {
        self.execute(executor)?
            .deserialize_into()
            .map_err(|e| ExecutionError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ElementKind;
    use crate::ir::{ColumnRef, ParameterSlot, Shape, SqlExpr};

    fn scalar_plan(terminal: Terminal, nullable: bool) -> CompiledPlan {
        let column = SqlExpr::Column(ColumnRef {
            table: 1,
            name: "Prop2".to_string(),
            ty: ValueType::Int32,
            nullable,
        });
        CompiledPlan {
            sql: "SELECT [m].[Prop2] FROM [dbo].[MyClass1] AS [m]".to_string(),
            parameters: Vec::new(),
            materializer: RowMaterializer::build(&Shape::Scalar(column)).unwrap(),
            client: None,
            terminal,
        }
    }

    fn rows(values: &[Value]) -> Vec<Row> {
        values.iter().map(|v| Row::new(vec![v.clone()])).collect()
    }

    #[test]
    fn test_single_rejects_two_rows() {
        let plan = scalar_plan(
            Terminal::Element {
                kind: ElementKind::Single,
                or_default: false,
            },
            false,
        );
        let result = plan.read(&rows(&[Value::Int32(1), Value::Int32(2)]), &BTreeMap::new());
        assert_eq!(result, Err(ExecutionError::MoreThanOneElement));
    }

    #[test]
    fn test_first_or_default_uses_type_default() {
        let plan = scalar_plan(
            Terminal::Element {
                kind: ElementKind::First,
                or_default: true,
            },
            false,
        );
        assert_eq!(plan.read(&[], &BTreeMap::new()), Ok(Value::Int32(0)));
    }

    #[test]
    fn test_element_at_reports_index() {
        let plan = scalar_plan(
            Terminal::ElementAt {
                index: crate::ast::builders::lit(4),
                or_default: false,
            },
            false,
        );
        assert_eq!(plan.read(&[], &BTreeMap::new()), Err(ExecutionError::ElementOutOfRange(4)));
    }

    #[test]
    fn test_null_aggregates() {
        let sum = scalar_plan(
            Terminal::Scalar {
                op: AggregateOp::Sum,
                nullable: false,
            },
            false,
        );
        assert_eq!(sum.read(&rows(&[Value::Null]), &BTreeMap::new()), Ok(Value::Int32(0)));

        let min = scalar_plan(
            Terminal::Scalar {
                op: AggregateOp::Min,
                nullable: false,
            },
            false,
        );
        assert_eq!(
            min.read(&rows(&[Value::Null]), &BTreeMap::new()),
            Err(ExecutionError::NoElements)
        );

        let nullable_max = scalar_plan(
            Terminal::Scalar {
                op: AggregateOp::Max,
                nullable: true,
            },
            true,
        );
        assert_eq!(nullable_max.read(&rows(&[Value::Null]), &BTreeMap::new()), Ok(Value::Null));
    }

    #[test]
    fn test_serialized_list_binds_json_text() {
        let mut plan = scalar_plan(Terminal::Sequence, false);
        plan.parameters = vec![RenderedParameter {
            placeholder: "@p0".to_string(),
            slot: ParameterSlot {
                name: "ids".to_string(),
                ty: ValueType::Int32,
                nullable: false,
                serialized: true,
            },
        }];
        let mut captured = BTreeMap::new();
        captured.insert("ids".to_string(), Value::from(vec![1, 2, 3]));
        let bound = plan.bind(&captured).unwrap();
        assert_eq!(bound[0].name, "@p0");
        assert_eq!(bound[0].value, Value::from("[1,2,3]"));
        assert_eq!(bound[0].ty, ValueType::Json);
    }

    #[test]
    fn test_missing_captured_value_is_unbound() {
        let mut plan = scalar_plan(Terminal::Sequence, false);
        plan.parameters = vec![RenderedParameter {
            placeholder: "@p0".to_string(),
            slot: ParameterSlot {
                name: "limit".to_string(),
                ty: ValueType::Int32,
                nullable: false,
                serialized: false,
            },
        }];
        assert_eq!(
            plan.bind(&BTreeMap::new()),
            Err(ExecutionError::Compile(CompileError::UnboundParameter("limit".to_string())))
        );
    }

    #[test]
    fn test_closure_executor_and_typed_results() {
        let plan = Arc::new(scalar_plan(Terminal::Sequence, false));
        let query = CompiledQuery::new(plan, BTreeMap::new(), false);
        let executor = |_: &str, _: &[BoundParameter]| -> ExecutionResult<Vec<Row>> {
            Ok(rows(&[Value::Int32(3), Value::Int32(4)]))
        };
        let typed: Vec<i32> = query.execute_as(&executor).unwrap();
        assert_eq!(typed, vec![3, 4]);
    }
}
