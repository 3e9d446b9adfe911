//! # In-Memory Evaluator
//!
//! Evaluates scalar expressions and operator trees over materialized values.
//!
//! ## Pipeline Position
//!
//! ```text
//! Rows → Materializer → [Evaluator] → client pipeline / client members → result
//! ```
//!
//! The evaluator runs whatever the composer could not send to the server:
//! operators appended to the client pipeline (which read the materialized
//! server rows from the [`ROWS_PARAMETER`](crate::ir_builder::ROWS_PARAMETER)
//! binding), projection members marked client-only, and the index of an
//! `ElementAt`. It is also the reference semantics in round-trip tests.
//!
//! Equality follows the in-memory convention: null equals null, numbers
//! compare across widths. Ordered comparisons against null are false.
//!
//! Captured values are looked up in an override map first, so a cached plan
//! whose client expressions still carry the values of the compilation that
//! produced it evaluates with the caller's current values.

use crate::ast::{
    AggregateOp, BinaryOp, ElementKind, Expr, Function, InValues, Lambda, QueryOp, SetOpKind,
    UnaryOp,
};
use crate::error::{ExecutionError, ExecutionResult};
use crate::value::{Value, ValueType};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::cmp::Ordering;
use std::collections::BTreeMap;

// ============================================================================
// Environment
// ============================================================================

/// Lambda parameter bindings, innermost first
#[derive(Debug, Clone, Copy, Default)]
pub struct Env<'a> {
    frame: Option<&'a Frame<'a>>,
}

/// One parameter binding; lives on the stack of the caller that binds it
#[derive(Debug)]
pub struct Frame<'a> {
    name: &'a str,
    value: &'a Value,
    parent: Env<'a>,
}

impl<'a> Env<'a> {
    pub fn root() -> Self {
        Env::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&'a Value> {
        let mut current = self.frame;
        while let Some(frame) = current {
            if frame.name == name {
                return Some(frame.value);
            }
            current = frame.parent.frame;
        }
        None
    }
}

impl<'a> Frame<'a> {
    pub fn new(name: &'a str, value: &'a Value, parent: Env<'a>) -> Self {
        Frame {
            name,
            value,
            parent,
        }
    }

    pub fn env(&self) -> Env<'_> {
        Env { frame: Some(self) }
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluates expressions and operator trees in memory
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator<'c> {
    captured: Option<&'c BTreeMap<String, Value>>,
}

fn evaluation_error(message: impl Into<String>) -> ExecutionError {
    ExecutionError::Evaluation(message.into())
}

impl<'c> Evaluator<'c> {
    pub fn new() -> Self {
        Evaluator { captured: None }
    }

    /// Evaluate with captured values taken from `captured` where present
    pub fn with_captured(captured: &'c BTreeMap<String, Value>) -> Self {
        Evaluator {
            captured: Some(captured),
        }
    }

    fn captured_value(&self, name: &str, fallback: &Value) -> Value {
        self.captured
            .and_then(|values| values.get(name))
            .unwrap_or(fallback)
            .clone()
    }

    /// Apply a lambda to positional arguments
    pub fn apply(&self, lambda: &Lambda, args: &[&Value], env: Env<'_>) -> ExecutionResult<Value> {
        if lambda.params.len() > args.len() {
            return Err(evaluation_error(format!(
                "lambda expects {} argument(s), got {}",
                lambda.params.len(),
                args.len()
            )));
        }
        self.bind(&lambda.body, &lambda.params, args, env)
    }

    fn bind(&self, body: &Expr, params: &[String], args: &[&Value], env: Env<'_>) -> ExecutionResult<Value> {
        match (params.split_first(), args.split_first()) {
            (Some((param, params)), Some((arg, args))) => {
                let frame = Frame::new(param, arg, env);
                self.bind(body, params, args, frame.env())
            }
            _ => self.eval(body, env),
        }
    }

    /// Apply an element lambda, passing the zero-based index to indexed forms
    fn apply_element(
        &self,
        lambda: &Lambda,
        item: &Value,
        index: usize,
        env: Env<'_>,
    ) -> ExecutionResult<Value> {
        if lambda.is_indexed() {
            let index = i32::try_from(index)
                .map(Value::Int32)
                .map_err(|_| evaluation_error("element index exceeds int range"))?;
            self.apply(lambda, &[item, &index], env)
        } else {
            self.apply(lambda, &[item], env)
        }
    }

    fn test(&self, lambda: &Lambda, item: &Value, index: usize, env: Env<'_>) -> ExecutionResult<bool> {
        Ok(truthy(&self.apply_element(lambda, item, index, env)?))
    }

    // ========================================================================
    // Scalar expressions
    // ========================================================================

    pub fn eval(&self, expr: &Expr, env: Env<'_>) -> ExecutionResult<Value> {
        match expr {
            Expr::Parameter(name) => env
                .lookup(name)
                .cloned()
                .ok_or_else(|| evaluation_error(format!("unbound parameter '{name}'"))),
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Captured(captured) => Ok(self.captured_value(&captured.name, &captured.value)),
            Expr::Member { target, name } => member_value(self.eval(target, env)?, name),
            Expr::Binary { op, left, right } => self.binary(*op, left, right, env),
            Expr::Unary { op, operand } => unary(*op, self.eval(operand, env)?),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                if truthy(&self.eval(test, env)?) {
                    self.eval(if_true, env)
                } else {
                    self.eval(if_false, env)
                }
            }
            Expr::Convert { operand, ty } => convert(self.eval(operand, env)?, *ty),
            Expr::TypeIs { element_type, .. } => Err(evaluation_error(format!(
                "type test against '{element_type}' needs runtime type information"
            ))),
            Expr::TypeAs { operand, .. } => self.eval(operand, env),
            Expr::New(members) => members
                .iter()
                .map(|(name, member)| Ok((name.clone(), self.eval(member, env)?)))
                .collect::<ExecutionResult<_>>()
                .map(Value::Object),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item, env))
                .collect::<ExecutionResult<_>>()
                .map(Value::List),
            Expr::Method { name, .. } => Err(evaluation_error(format!(
                "method '{name}' has no in-memory implementation"
            ))),
            Expr::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                call(*function, &args)
            }
            Expr::In { item, values } => {
                let item = self.eval(item, env)?;
                let values = match values {
                    InValues::Inline(items) => items
                        .iter()
                        .map(|v| self.eval(v, env))
                        .collect::<ExecutionResult<Vec<_>>>()?,
                    InValues::Captured(captured) => {
                        into_items(self.captured_value(&captured.name, &captured.value))?
                    }
                };
                Ok(Value::Bool(values.iter().any(|v| values_equal(&item, v))))
            }
            Expr::Query(op) => self.run(op, env),
            Expr::Client { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                (function.func)(&args)
                    .map_err(|e| evaluation_error(format!("{}: {e}", function.name)))
            }
            Expr::Raw { sql, .. } => Err(evaluation_error(format!(
                "raw fragment '{sql}' only runs on the server"
            ))),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr, env: Env<'_>) -> ExecutionResult<Value> {
        match op {
            BinaryOp::AndAlso => {
                let result = truthy(&self.eval(left, env)?) && truthy(&self.eval(right, env)?);
                return Ok(Value::Bool(result));
            }
            BinaryOp::OrElse => {
                let result = truthy(&self.eval(left, env)?) || truthy(&self.eval(right, env)?);
                return Ok(Value::Bool(result));
            }
            BinaryOp::Coalesce => {
                let left = self.eval(left, env)?;
                return if left.is_null() {
                    self.eval(right, env)
                } else {
                    Ok(left)
                };
            }
            _ => {}
        }
        let left = self.eval(left, env)?;
        let right = self.eval(right, env)?;
        match op {
            BinaryOp::Equal => Ok(Value::Bool(values_equal(&left, &right))),
            BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(&left, &right))),
            BinaryOp::LessThan
            | BinaryOp::LessThanOrEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanOrEqual => {
                if left.is_null() || right.is_null() {
                    return Ok(Value::Bool(false));
                }
                let ordering = left.cmp(&right);
                Ok(Value::Bool(match op {
                    BinaryOp::LessThan => ordering == Ordering::Less,
                    BinaryOp::LessThanOrEqual => ordering != Ordering::Greater,
                    BinaryOp::GreaterThan => ordering == Ordering::Greater,
                    _ => ordering != Ordering::Less,
                }))
            }
            _ => arithmetic(op, left, right),
        }
    }

    // ========================================================================
    // Operator trees
    // ========================================================================

    /// Evaluate an operator tree: terminals yield their value, sequences a list
    pub fn run(&self, op: &QueryOp, env: Env<'_>) -> ExecutionResult<Value> {
        if op.is_terminal() {
            self.terminal(op, env)
        } else {
            self.sequence(op, env).map(Value::List)
        }
    }

    /// Elements of a sequence operator
    pub fn sequence(&self, op: &QueryOp, env: Env<'_>) -> ExecutionResult<Vec<Value>> {
        match op {
            QueryOp::Table(table) => Err(evaluation_error(format!(
                "table {}.{} cannot be read in memory",
                table.schema, table.name
            ))),
            QueryOp::Source(expr) => into_items(self.eval(expr, env)?),
            QueryOp::Where { source, predicate } => {
                let mut out = Vec::new();
                for (i, item) in self.sequence(source, env)?.into_iter().enumerate() {
                    if self.test(predicate, &item, i, env)? {
                        out.push(item);
                    }
                }
                Ok(out)
            }
            QueryOp::Select { source, selector } => self
                .sequence(source, env)?
                .iter()
                .enumerate()
                .map(|(i, item)| self.apply_element(selector, item, i, env))
                .collect(),
            QueryOp::SelectMany {
                source,
                collection,
                result,
            } => {
                let mut out = Vec::new();
                for (i, outer) in self.sequence(source, env)?.iter().enumerate() {
                    let inners = into_items(self.apply_element(collection, outer, i, env)?)?;
                    for inner in &inners {
                        out.push(match result {
                            Some(result) => self.apply(result, &[outer, inner], env)?,
                            None => inner.clone(),
                        });
                    }
                }
                Ok(out)
            }
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                let inners = self.keyed(inner, inner_key, env)?;
                let mut out = Vec::new();
                for item in self.sequence(outer, env)? {
                    let key = self.apply(outer_key, &[&item], env)?;
                    if key.is_null() {
                        continue;
                    }
                    for (inner_key, inner) in &inners {
                        if values_equal(&key, inner_key) {
                            out.push(self.apply(result, &[&item, inner], env)?);
                        }
                    }
                }
                Ok(out)
            }
            QueryOp::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                let inners = self.keyed(inner, inner_key, env)?;
                let mut out = Vec::new();
                for item in self.sequence(outer, env)? {
                    let key = self.apply(outer_key, &[&item], env)?;
                    let group = inners
                        .iter()
                        .filter(|(k, _)| !key.is_null() && values_equal(&key, k))
                        .map(|(_, v)| v.clone())
                        .collect();
                    out.push(self.apply(result, &[&item, &Value::List(group)], env)?);
                }
                Ok(out)
            }
            QueryOp::GroupBy {
                source,
                key,
                element,
                result,
            } => {
                let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
                for item in self.sequence(source, env)? {
                    let group_key = self.apply(key, &[&item], env)?;
                    let value = match element {
                        Some(element) => self.apply(element, &[&item], env)?,
                        None => item,
                    };
                    match groups.iter_mut().find(|(k, _)| values_equal(k, &group_key)) {
                        Some((_, members)) => members.push(value),
                        None => groups.push((group_key, vec![value])),
                    }
                }
                groups
                    .into_iter()
                    .map(|(group_key, members)| match result {
                        Some(result) => self.apply(result, &[&group_key, &Value::List(members)], env),
                        None => Ok(grouping_value(group_key, members)),
                    })
                    .collect()
            }
            QueryOp::OrderBy { .. } | QueryOp::ThenBy { .. } => {
                let (base, keys) = sort_chain(op);
                self.sorted(self.sequence(base, env)?, &keys, env)
            }
            QueryOp::Reverse { source } => {
                let mut items = self.sequence(source, env)?;
                items.reverse();
                Ok(items)
            }
            QueryOp::Distinct { source } => Ok(distinct(self.sequence(source, env)?)),
            QueryOp::Take { source, count } => {
                let count = self.count(count, env)?;
                Ok(self.sequence(source, env)?.into_iter().take(count).collect())
            }
            QueryOp::Skip { source, count } => {
                let count = self.count(count, env)?;
                Ok(self.sequence(source, env)?.into_iter().skip(count).collect())
            }
            QueryOp::TakeWhile { source, predicate } => {
                let mut out = Vec::new();
                for (i, item) in self.sequence(source, env)?.into_iter().enumerate() {
                    if !self.test(predicate, &item, i, env)? {
                        break;
                    }
                    out.push(item);
                }
                Ok(out)
            }
            QueryOp::SkipWhile { source, predicate } => {
                let items = self.sequence(source, env)?;
                let mut start = items.len();
                for (i, item) in items.iter().enumerate() {
                    if !self.test(predicate, item, i, env)? {
                        start = i;
                        break;
                    }
                }
                Ok(items.into_iter().skip(start).collect())
            }
            QueryOp::DefaultIfEmpty { source } => {
                let items = self.sequence(source, env)?;
                Ok(if items.is_empty() { vec![Value::Null] } else { items })
            }
            QueryOp::SetOp { kind, left, right } => {
                let left = self.sequence(left, env)?;
                let right = self.sequence(right, env)?;
                Ok(match kind {
                    SetOpKind::Concat => left.into_iter().chain(right).collect(),
                    SetOpKind::Union => distinct(left.into_iter().chain(right).collect()),
                    SetOpKind::Intersect => distinct(
                        left.into_iter()
                            .filter(|l| right.iter().any(|r| values_equal(l, r)))
                            .collect(),
                    ),
                    SetOpKind::Except => distinct(
                        left.into_iter()
                            .filter(|l| !right.iter().any(|r| values_equal(l, r)))
                            .collect(),
                    ),
                })
            }
            QueryOp::Zip { left, right, result } => {
                let left = self.sequence(left, env)?;
                let right = self.sequence(right, env)?;
                left.iter()
                    .zip(right.iter())
                    .map(|(l, r)| self.apply(result, &[l, r], env))
                    .collect()
            }
            // Values carry no runtime type names; nulls never match a type
            QueryOp::OfType { source, .. } => Ok(self
                .sequence(source, env)?
                .into_iter()
                .filter(|v| !v.is_null())
                .collect()),
            QueryOp::Cast { source, .. } => self.sequence(source, env),
            terminal => Err(evaluation_error(format!(
                "{} does not produce a sequence",
                terminal.name()
            ))),
        }
    }

    fn terminal(&self, op: &QueryOp, env: Env<'_>) -> ExecutionResult<Value> {
        match op {
            QueryOp::Aggregate {
                source,
                op: aggregate,
                selector,
            } => {
                let items = self.sequence(source, env)?;
                match aggregate {
                    AggregateOp::Count | AggregateOp::LongCount => {
                        let mut count = 0usize;
                        for (i, item) in items.iter().enumerate() {
                            let counted = match selector {
                                Some(predicate) => self.test(predicate, item, i, env)?,
                                None => true,
                            };
                            count += usize::from(counted);
                        }
                        count_value(*aggregate, count)
                    }
                    _ => {
                        let values = match selector {
                            Some(selector) => items
                                .iter()
                                .map(|item| self.apply(selector, &[item], env))
                                .collect::<ExecutionResult<Vec<_>>>()?,
                            None => items,
                        };
                        aggregate_values(*aggregate, &values)
                    }
                }
            }
            QueryOp::Any { source, predicate } => {
                let items = self.sequence(source, env)?;
                match predicate {
                    None => Ok(Value::Bool(!items.is_empty())),
                    Some(predicate) => {
                        for (i, item) in items.iter().enumerate() {
                            if self.test(predicate, item, i, env)? {
                                return Ok(Value::Bool(true));
                            }
                        }
                        Ok(Value::Bool(false))
                    }
                }
            }
            QueryOp::All { source, predicate } => {
                for (i, item) in self.sequence(source, env)?.iter().enumerate() {
                    if !self.test(predicate, item, i, env)? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            QueryOp::Contains { source, item } => {
                let item = self.eval(item, env)?;
                let items = self.sequence(source, env)?;
                Ok(Value::Bool(items.iter().any(|v| values_equal(v, &item))))
            }
            QueryOp::SequenceEqual { left, right } => {
                let left = self.sequence(left, env)?;
                let right = self.sequence(right, env)?;
                Ok(Value::Bool(
                    left.len() == right.len()
                        && left.iter().zip(&right).all(|(l, r)| values_equal(l, r)),
                ))
            }
            QueryOp::Element {
                source,
                kind,
                or_default,
            } => element(self.sequence(source, env)?, *kind, *or_default, Value::Null),
            QueryOp::ElementAt {
                source,
                index,
                or_default,
            } => {
                let index = self.index(index, env)?;
                let mut items = self.sequence(source, env)?;
                if index < items.len() {
                    Ok(items.swap_remove(index))
                } else if *or_default {
                    Ok(Value::Null)
                } else {
                    Err(ExecutionError::ElementOutOfRange(index))
                }
            }
            other => Err(evaluation_error(format!("{} is not a terminal operator", other.name()))),
        }
    }

    /// Non-negative row count of `Take`/`Skip`
    fn count(&self, count: &Expr, env: Env<'_>) -> ExecutionResult<usize> {
        let value = self.eval(count, env)?;
        let count = value
            .as_i64()
            .ok_or_else(|| evaluation_error(format!("row count {value} is not an integer")))?;
        Ok(usize::try_from(count.max(0)).unwrap_or(usize::MAX))
    }

    /// Zero-based element index
    pub fn index(&self, index: &Expr, env: Env<'_>) -> ExecutionResult<usize> {
        let value = self.eval(index, env)?;
        let index = value
            .as_i64()
            .ok_or_else(|| evaluation_error(format!("index {value} is not an integer")))?;
        usize::try_from(index).map_err(|_| ExecutionError::ElementOutOfRange(0))
    }

    fn keyed(&self, op: &QueryOp, key: &Lambda, env: Env<'_>) -> ExecutionResult<Vec<(Value, Value)>> {
        self.sequence(op, env)?
            .into_iter()
            .map(|item| Ok((self.apply(key, &[&item], env)?, item)))
            .collect()
    }

    fn sorted(
        &self,
        items: Vec<Value>,
        keys: &[(&Lambda, bool)],
        env: Env<'_>,
    ) -> ExecutionResult<Vec<Value>> {
        let mut keyed = items
            .into_iter()
            .map(|item| {
                let values = keys
                    .iter()
                    .map(|(key, _)| self.apply(key, &[&item], env))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                Ok((values, item))
            })
            .collect::<ExecutionResult<Vec<_>>>()?;
        keyed.sort_by(|(a, _), (b, _)| {
            for ((x, y), (_, descending)) in a.iter().zip(b).zip(keys) {
                let ordering = x.cmp(y);
                if ordering != Ordering::Equal {
                    return if *descending { ordering.reverse() } else { ordering };
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, item)| item).collect())
    }
}

/// Base source and every key of an `OrderBy`/`ThenBy` chain, primary key first
fn sort_chain(op: &QueryOp) -> (&QueryOp, Vec<(&Lambda, bool)>) {
    let mut keys = Vec::new();
    let mut current = op;
    loop {
        match current {
            QueryOp::ThenBy {
                source,
                key,
                descending,
            } => {
                keys.push((key, *descending));
                current = source;
            }
            QueryOp::OrderBy {
                source,
                key,
                descending,
            } => {
                keys.push((key, *descending));
                current = source;
                break;
            }
            _ => break,
        }
    }
    keys.reverse();
    (current, keys)
}

// ============================================================================
// Value semantics
// ============================================================================

/// Predicate truth: null and non-boolean values are false
pub fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// In-memory equality: null equals null, numbers compare across widths,
/// structured values compare member by member
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::List(a), Value::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((n, x), (m, y))| n == m && values_equal(x, y))
        }
        (a, b) => a.loosely_equals(b),
    }
}

/// In-memory form of a grouping: its key and its elements
pub fn grouping_value(key: Value, elements: Vec<Value>) -> Value {
    Value::Object(vec![
        ("Key".to_string(), key),
        ("Elements".to_string(), Value::List(elements)),
    ])
}

/// Elements of a sequence-valued value; a grouping yields its elements
pub fn into_items(value: Value) -> ExecutionResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        Value::Object(members) => members
            .into_iter()
            .find(|(name, _)| name == "Elements")
            .map(|(_, elements)| into_items(elements))
            .unwrap_or_else(|| Err(evaluation_error("object is not a sequence"))),
        other => Err(evaluation_error(format!("{other} is not a sequence"))),
    }
}

fn distinct(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|seen| values_equal(seen, &item)) {
            out.push(item);
        }
    }
    out
}

/// Pick the element a `First`/`Last`/`Single` operator returns
pub fn element(
    mut items: Vec<Value>,
    kind: ElementKind,
    or_default: bool,
    default: Value,
) -> ExecutionResult<Value> {
    if kind == ElementKind::Single && items.len() > 1 {
        return Err(ExecutionError::MoreThanOneElement);
    }
    let picked = match kind {
        ElementKind::Last => items.pop(),
        ElementKind::First | ElementKind::Single => items.into_iter().next(),
    };
    match picked {
        Some(value) => Ok(value),
        None if or_default => Ok(default),
        None => Err(ExecutionError::NoElements),
    }
}

fn count_value(op: AggregateOp, count: usize) -> ExecutionResult<Value> {
    let overflow = || evaluation_error("count exceeds the integer range");
    match op {
        AggregateOp::LongCount => i64::try_from(count).map(Value::Int64).map_err(|_| overflow()),
        _ => i32::try_from(count).map(Value::Int32).map_err(|_| overflow()),
    }
}

/// Sum, average, minimum or maximum over the non-null values
pub fn aggregate_values(op: AggregateOp, values: &[Value]) -> ExecutionResult<Value> {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    match op {
        AggregateOp::Count | AggregateOp::LongCount => count_value(op, values.len()),
        AggregateOp::Sum => {
            let mut total = Value::Int32(0);
            for value in present {
                total = arithmetic(BinaryOp::Add, total, value.clone())?;
            }
            Ok(total)
        }
        AggregateOp::Average => {
            if values.is_empty() {
                return Err(ExecutionError::NoElements);
            }
            if present.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = 0.0;
            for value in &present {
                sum += value
                    .as_f64()
                    .ok_or_else(|| evaluation_error(format!("cannot average {value}")))?;
            }
            Ok(Value::Float64(sum / present.len() as f64))
        }
        AggregateOp::Min | AggregateOp::Max => {
            if values.is_empty() {
                return Err(ExecutionError::NoElements);
            }
            let picked = if op == AggregateOp::Min {
                present.into_iter().min()
            } else {
                present.into_iter().max()
            };
            Ok(picked.cloned().unwrap_or(Value::Null))
        }
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::DateTime(dt) => dt.format(crate::value::DATETIME_FORMAT).to_string(),
        other => other.to_string(),
    }
}

fn member_value(target: Value, name: &str) -> ExecutionResult<Value> {
    match &target {
        Value::Null => Ok(Value::Null),
        Value::Object(_) => target
            .member(name)
            .cloned()
            .ok_or_else(|| evaluation_error(format!("no member '{name}' on {target}"))),
        Value::String(s) if name == "Length" => char_count(s),
        Value::List(items) if name == "Count" => count_value(AggregateOp::Count, items.len()),
        Value::DateTime(dt) => {
            let function = match name {
                "Year" => Function::Year,
                "Month" => Function::Month,
                "Day" => Function::Day,
                "Hour" => Function::Hour,
                "Minute" => Function::Minute,
                "Second" => Function::Second,
                "Date" => Function::Date,
                _ => return Err(evaluation_error(format!("no member '{name}' on a date"))),
            };
            date_function(function, dt)
        }
        _ => Err(evaluation_error(format!("no member '{name}' on {target}"))),
    }
}

fn char_count(s: &str) -> ExecutionResult<Value> {
    i32::try_from(s.chars().count())
        .map(Value::Int32)
        .map_err(|_| evaluation_error("string length exceeds the integer range"))
}

fn unary(op: UnaryOp, value: Value) -> ExecutionResult<Value> {
    Ok(match (op, value) {
        (_, Value::Null) => Value::Null,
        (UnaryOp::Not, Value::Bool(b)) | (UnaryOp::OnesComplement, Value::Bool(b)) => Value::Bool(!b),
        (UnaryOp::Negate, Value::Int32(v)) => Value::Int32(
            v.checked_neg().ok_or_else(|| evaluation_error("integer overflow"))?,
        ),
        (UnaryOp::Negate, Value::Int64(v)) => Value::Int64(
            v.checked_neg().ok_or_else(|| evaluation_error("integer overflow"))?,
        ),
        (UnaryOp::Negate, Value::Float64(v)) => Value::Float64(-v),
        (UnaryOp::OnesComplement, Value::Int32(v)) => Value::Int32(!v),
        (UnaryOp::OnesComplement, Value::Int64(v)) => Value::Int64(!v),
        (op, other) => return Err(evaluation_error(format!("{op:?} of {other}"))),
    })
}

/// Arithmetic and bitwise operators; null operands yield null
fn arithmetic(op: BinaryOp, left: Value, right: Value) -> ExecutionResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if op == BinaryOp::Add && (left.as_str().is_some() || right.as_str().is_some()) {
        return Ok(Value::string(&format!("{}{}", text(&left), text(&right))));
    }
    if let (Value::Bool(a), Value::Bool(b)) = (&left, &right) {
        return match op {
            BinaryOp::BitAnd => Ok(Value::Bool(a & b)),
            BinaryOp::BitOr => Ok(Value::Bool(a | b)),
            BinaryOp::BitXor => Ok(Value::Bool(a ^ b)),
            _ => Err(evaluation_error(format!("{op:?} of booleans"))),
        };
    }
    let ty = match (left.value_type(), right.value_type()) {
        (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => a.widen(b),
        _ => return Err(evaluation_error(format!("{op:?} of {left} and {right}"))),
    };
    if ty == ValueType::Float64 {
        let (a, b) = match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(evaluation_error(format!("{op:?} of {left} and {right}"))),
        };
        return Ok(Value::Float64(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Modulo => a % b,
            _ => return Err(evaluation_error(format!("{op:?} of floating point values"))),
        }));
    }
    let (a, b) = match (left.as_i64(), right.as_i64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(evaluation_error(format!("{op:?} of {left} and {right}"))),
    };
    let overflow = || evaluation_error("integer overflow");
    let result = match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Subtract => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Divide | BinaryOp::Modulo if b == 0 => {
            return Err(evaluation_error("division by zero"))
        }
        BinaryOp::Divide => a.checked_div(b).ok_or_else(overflow)?,
        BinaryOp::Modulo => a.checked_rem(b).ok_or_else(overflow)?,
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        _ => return Err(evaluation_error(format!("{op:?} is not arithmetic"))),
    };
    if ty == ValueType::Int32 {
        i32::try_from(result).map(Value::Int32).map_err(|_| overflow())
    } else {
        Ok(Value::Int64(result))
    }
}

fn convert(value: Value, ty: ValueType) -> ExecutionResult<Value> {
    let failed = |value: &Value| evaluation_error(format!("cannot convert {value} to {ty}"));
    Ok(match (ty, value) {
        (_, Value::Null) => Value::Null,
        (ValueType::String, value) => Value::string(&text(&value)),
        (ValueType::Int32, Value::Float64(f)) => Value::Int32(f.trunc() as i32),
        (ValueType::Int64, Value::Float64(f)) => Value::Int64(f.trunc() as i64),
        (ValueType::Int32, Value::String(s)) => {
            Value::Int32(s.trim().parse().map_err(|_| failed(&Value::String(s.clone())))?)
        }
        (ValueType::Int64, Value::String(s)) => {
            Value::Int64(s.trim().parse().map_err(|_| failed(&Value::String(s.clone())))?)
        }
        (ValueType::Float64, Value::String(s)) => {
            Value::Float64(s.trim().parse().map_err(|_| failed(&Value::String(s.clone())))?)
        }
        (ValueType::Int32, Value::Int64(v)) => {
            Value::Int32(i32::try_from(v).map_err(|_| failed(&Value::Int64(v)))?)
        }
        (ty, value) => value.coerce(ty),
    })
}

/// Canonical functions over already evaluated arguments
fn call(function: Function, args: &[Value]) -> ExecutionResult<Value> {
    if function == Function::Coalesce {
        return Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null));
    }
    if args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    let string = |i: usize| -> ExecutionResult<&str> {
        args.get(i)
            .and_then(Value::as_str)
            .ok_or_else(|| evaluation_error(format!("{function:?} expects a string argument")))
    };
    let integer = |i: usize| -> ExecutionResult<i64> {
        args.get(i)
            .and_then(Value::as_i64)
            .ok_or_else(|| evaluation_error(format!("{function:?} expects an integer argument")))
    };
    Ok(match function {
        Function::ToUpper => Value::string(&string(0)?.to_uppercase()),
        Function::ToLower => Value::string(&string(0)?.to_lowercase()),
        Function::Trim => Value::string(string(0)?.trim()),
        Function::TrimStart => Value::string(string(0)?.trim_start()),
        Function::TrimEnd => Value::string(string(0)?.trim_end()),
        Function::Length => char_count(string(0)?)?,
        Function::Substring => {
            let s = string(0)?;
            let start = usize::try_from(integer(1)?.max(0)).unwrap_or(usize::MAX);
            let taken: String = match args.len() {
                2 => s.chars().skip(start).collect(),
                _ => {
                    let length = usize::try_from(integer(2)?.max(0)).unwrap_or(usize::MAX);
                    s.chars().skip(start).take(length).collect()
                }
            };
            Value::string(&taken)
        }
        Function::Replace => Value::string(&string(0)?.replace(string(1)?, string(2)?)),
        Function::IndexOf => {
            let s = string(0)?;
            match s.find(string(1)?) {
                Some(byte) => char_count(&s[..byte])?,
                None => Value::Int32(-1),
            }
        }
        Function::StringContains => Value::Bool(string(0)?.contains(string(1)?)),
        Function::StartsWith => Value::Bool(string(0)?.starts_with(string(1)?)),
        Function::EndsWith => Value::Bool(string(0)?.ends_with(string(1)?)),
        Function::Year
        | Function::Month
        | Function::Day
        | Function::Hour
        | Function::Minute
        | Function::Second
        | Function::Date => match args.first() {
            Some(Value::DateTime(dt)) => date_function(function, dt)?,
            _ => return Err(evaluation_error(format!("{function:?} expects a date"))),
        },
        Function::Abs => match args.first() {
            Some(Value::Int32(v)) => {
                Value::Int32(v.checked_abs().ok_or_else(|| evaluation_error("integer overflow"))?)
            }
            Some(Value::Int64(v)) => {
                Value::Int64(v.checked_abs().ok_or_else(|| evaluation_error("integer overflow"))?)
            }
            Some(Value::Float64(v)) => Value::Float64(v.abs()),
            _ => return Err(evaluation_error("Abs expects a number")),
        },
        Function::Coalesce => Value::Null,
    })
}

fn date_function(function: Function, dt: &NaiveDateTime) -> ExecutionResult<Value> {
    let part = |v: u32| {
        i32::try_from(v)
            .map(Value::Int32)
            .map_err(|_| evaluation_error("date part out of range"))
    };
    match function {
        Function::Year => Ok(Value::Int32(dt.year())),
        Function::Month => part(dt.month()),
        Function::Day => part(dt.day()),
        Function::Hour => part(dt.hour()),
        Function::Minute => part(dt.minute()),
        Function::Second => part(dt.second()),
        Function::Date => dt
            .date()
            .and_hms_opt(0, 0, 0)
            .map(Value::DateTime)
            .ok_or_else(|| evaluation_error("invalid date")),
        other => Err(evaluation_error(format!("{other:?} is not a date part"))),
    }
}
