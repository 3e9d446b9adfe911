//! Lambda-body translation: AST expressions become element shapes whose
//! leaves are server expressions over the tables of the node being composed.
//!
//! Sub-expressions classified as client-only become [`Shape::Client`] leaves
//! carrying the shapes of the parameters they read, so they can be evaluated
//! after materialization.

use super::scope::Scope;
use super::QueryComposer;
use crate::ast::{visit_op_exprs, BinaryOp, Captured, Expr, Function, InValues, QueryOp, UnaryOp};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    ClientShape, CollectionShape, CollectionSource, Correlation, DatePart, InSource,
    ParameterSlot, SelectNode, Shape, SqlBinaryOp, SqlExpr, SqlFunction, SqlUnaryOp,
};
use crate::translatability::{classify, Evaluation};
use crate::value::{Value, ValueType};

impl QueryComposer {
    /// Translate an expression into a shape over the bindings in `scope`
    pub(crate) fn translate(&mut self, expr: &Expr, scope: &Scope) -> CompileResult<Shape> {
        match expr {
            Expr::Parameter(name) => scope
                .lookup(name)
                .cloned()
                .ok_or_else(|| CompileError::UnboundParameter(name.clone())),
            Expr::Member { target, name } => {
                let target = self.translate(target, scope)?;
                member_of(target, name)
            }
            Expr::New(members) => Ok(Shape::Object(
                members
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.translate(e, scope)?)))
                    .collect::<CompileResult<_>>()?,
            )),
            Expr::Query(op) => self.translate_query(op, scope),
            _ if classify(expr, scope) == Evaluation::Client => client_shape(expr, scope),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = self.translate_predicate(test, scope)?;
                let if_true = self.translate(if_true, scope)?;
                let if_false = self.translate(if_false, scope)?;
                conditional_shape(&test, if_true, if_false)
            }
            Expr::Constant(value) => constant_shape(value),
            other => self.translate_scalar(other, scope).map(Shape::Scalar),
        }
    }

    /// Translate an expression that must be a single server value
    pub(crate) fn translate_value(&mut self, expr: &Expr, scope: &Scope) -> CompileResult<SqlExpr> {
        match self.translate(expr, scope)? {
            Shape::Scalar(e) => Ok(e),
            other => Err(CompileError::Untranslatable(format!(
                "expected a single server value, found {}",
                other.describe()
            ))),
        }
    }

    /// Translate a boolean expression into predicate form
    pub(crate) fn translate_predicate(&mut self, expr: &Expr, scope: &Scope) -> CompileResult<SqlExpr> {
        self.translate_value(expr, scope).map(as_predicate)
    }

    /// Translate `!expr`, inverting comparisons before null expansion
    pub(crate) fn translate_negated(&mut self, expr: &Expr, scope: &Scope) -> CompileResult<SqlExpr> {
        match expr {
            Expr::Binary {
                op: BinaryOp::AndAlso,
                left,
                right,
            } => Ok(SqlExpr::or(
                self.translate_negated(left, scope)?,
                self.translate_negated(right, scope)?,
            )),
            Expr::Binary {
                op: BinaryOp::OrElse,
                left,
                right,
            } => Ok(SqlExpr::and(
                self.translate_negated(left, scope)?,
                self.translate_negated(right, scope)?,
            )),
            Expr::Binary { op, left, right } if op.is_comparison() => match op.inverse() {
                Some(inverse) => self.translate_binary(inverse, left, right, scope),
                None => Ok(SqlExpr::not(self.translate_predicate(expr, scope)?)),
            },
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.translate_predicate(operand, scope),
            Expr::Constant(Value::Bool(b)) => Ok(SqlExpr::constant(!b)),
            Expr::In { item, values } => match self.translate_in(item, values, scope)? {
                // NOT (NULL IN ...) is unknown, but a null is never in a null-free list
                SqlExpr::In { operand, source } if operand.is_nullable() => Ok(SqlExpr::or(
                    SqlExpr::is_null((*operand).clone()),
                    SqlExpr::not(SqlExpr::In { operand, source }),
                )),
                positive => Ok(SqlExpr::not(positive)),
            },
            other => Ok(SqlExpr::not(self.translate_predicate(other, scope)?)),
        }
    }

    fn translate_scalar(&mut self, expr: &Expr, scope: &Scope) -> CompileResult<SqlExpr> {
        match expr {
            Expr::Captured(captured) => captured_parameter(captured),
            Expr::Binary { op, left, right } => self.translate_binary(*op, left, right, scope),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => self.translate_negated(operand, scope),
                UnaryOp::Negate => Ok(SqlExpr::Unary {
                    op: SqlUnaryOp::Negate,
                    operand: Box::new(self.translate_value(operand, scope)?),
                }),
                UnaryOp::OnesComplement => Ok(SqlExpr::Unary {
                    op: SqlUnaryOp::BitNot,
                    operand: Box::new(self.translate_value(operand, scope)?),
                }),
            },
            Expr::Convert { operand, ty } => {
                let value = self.translate_value(operand, scope)?;
                if value.value_type() == *ty {
                    Ok(value)
                } else {
                    Ok(SqlExpr::Cast {
                        operand: Box::new(value),
                        ty: *ty,
                    })
                }
            }
            Expr::Call { function, args } => self.translate_call(*function, args, scope),
            Expr::In { item, values } => self.translate_in(item, values, scope),
            Expr::Raw { sql, ty } => Ok(SqlExpr::Fragment {
                sql: sql.clone(),
                ty: *ty,
            }),
            Expr::List(_) => Err(CompileError::Untranslatable(
                "an in-memory list can only be used as the source of Contains".to_string(),
            )),
            other => Err(CompileError::InvariantViolation(format!(
                "unexpected server expression {other:?}"
            ))),
        }
    }

    pub(crate) fn translate_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Scope,
    ) -> CompileResult<SqlExpr> {
        match op {
            BinaryOp::Equal | BinaryOp::NotEqual => {
                let l = self.translate(left, scope)?;
                let r = self.translate(right, scope)?;
                shape_equality(&l, &r, op == BinaryOp::NotEqual)
            }
            BinaryOp::AndAlso => Ok(SqlExpr::and(
                self.translate_predicate(left, scope)?,
                self.translate_predicate(right, scope)?,
            )),
            BinaryOp::OrElse => Ok(SqlExpr::or(
                self.translate_predicate(left, scope)?,
                self.translate_predicate(right, scope)?,
            )),
            BinaryOp::Coalesce => Ok(SqlExpr::Function {
                function: SqlFunction::Coalesce,
                args: vec![
                    self.translate_value(left, scope)?,
                    self.translate_value(right, scope)?,
                ],
            }),
            other => {
                let sql_op = sql_binary_op(other).ok_or_else(|| {
                    CompileError::InvariantViolation(format!("operator {other:?} has no server form"))
                })?;
                Ok(SqlExpr::binary(
                    sql_op,
                    self.translate_value(left, scope)?,
                    self.translate_value(right, scope)?,
                ))
            }
        }
    }

    fn translate_call(&mut self, function: Function, args: &[Expr], scope: &Scope) -> CompileResult<SqlExpr> {
        let values = args
            .iter()
            .map(|a| self.translate_value(a, scope))
            .collect::<CompileResult<Vec<_>>>()?;
        let call = |function: SqlFunction, args: Vec<SqlExpr>| SqlExpr::Function { function, args };
        let part = |p: DatePart| SqlFunction::DatePart(p);
        Ok(match (function, values.as_slice()) {
            (Function::ToUpper, [s]) => call(SqlFunction::Upper, vec![s.clone()]),
            (Function::ToLower, [s]) => call(SqlFunction::Lower, vec![s.clone()]),
            (Function::Trim, [s]) => call(
                SqlFunction::LTrim,
                vec![call(SqlFunction::RTrim, vec![s.clone()])],
            ),
            (Function::TrimStart, [s]) => call(SqlFunction::LTrim, vec![s.clone()]),
            (Function::TrimEnd, [s]) => call(SqlFunction::RTrim, vec![s.clone()]),
            (Function::Length, [s]) => call(SqlFunction::Len, vec![s.clone()]),
            (Function::Substring, [s, start]) => call(
                SqlFunction::Substring,
                vec![
                    s.clone(),
                    one_based(start.clone()),
                    call(SqlFunction::Len, vec![s.clone()]),
                ],
            ),
            (Function::Substring, [s, start, length]) => call(
                SqlFunction::Substring,
                vec![s.clone(), one_based(start.clone()), length.clone()],
            ),
            (Function::Replace, [s, from, to]) => {
                call(SqlFunction::Replace, vec![s.clone(), from.clone(), to.clone()])
            }
            (Function::IndexOf, [s, x]) => SqlExpr::binary(
                SqlBinaryOp::Subtract,
                call(SqlFunction::CharIndex, vec![x.clone(), s.clone()]),
                SqlExpr::constant(1),
            ),
            (Function::StringContains, [_, SqlExpr::Constant(Value::String(x))]) if x.is_empty() => {
                SqlExpr::constant(true)
            }
            (Function::StringContains, [s, x]) => SqlExpr::binary(
                SqlBinaryOp::Greater,
                call(SqlFunction::CharIndex, vec![x.clone(), s.clone()]),
                SqlExpr::constant(0),
            ),
            (Function::StartsWith, [s, x]) => SqlExpr::eq(
                call(
                    SqlFunction::Left,
                    vec![s.clone(), call(SqlFunction::Len, vec![x.clone()])],
                ),
                x.clone(),
            ),
            (Function::EndsWith, [s, x]) => SqlExpr::eq(
                call(
                    SqlFunction::Right,
                    vec![s.clone(), call(SqlFunction::Len, vec![x.clone()])],
                ),
                x.clone(),
            ),
            (Function::Year, [d]) => call(part(DatePart::Year), vec![d.clone()]),
            (Function::Month, [d]) => call(part(DatePart::Month), vec![d.clone()]),
            (Function::Day, [d]) => call(part(DatePart::Day), vec![d.clone()]),
            (Function::Hour, [d]) => call(part(DatePart::Hour), vec![d.clone()]),
            (Function::Minute, [d]) => call(part(DatePart::Minute), vec![d.clone()]),
            (Function::Second, [d]) => call(part(DatePart::Second), vec![d.clone()]),
            (Function::Date, [d]) => call(SqlFunction::DateOnly, vec![d.clone()]),
            (Function::Coalesce, [_, _, ..]) => call(SqlFunction::Coalesce, values.clone()),
            (Function::Abs, [v]) => call(SqlFunction::Abs, vec![v.clone()]),
            (function, args) => {
                return Err(CompileError::Untranslatable(format!(
                    "{function:?} with {} argument(s)",
                    args.len()
                )))
            }
        })
    }

    fn translate_in(&mut self, item: &Expr, values: &InValues, scope: &Scope) -> CompileResult<SqlExpr> {
        let operand = self.translate_value(item, scope)?;
        match values {
            InValues::Inline(items) if items.is_empty() => Ok(SqlExpr::constant(false)),
            InValues::Inline(items) => {
                let (nulls, values): (Vec<_>, Vec<_>) = items
                    .iter()
                    .map(|e| self.translate_value(e, scope))
                    .collect::<CompileResult<Vec<_>>>()?
                    .into_iter()
                    .partition(|v| matches!(v, SqlExpr::Constant(Value::Null)));
                if nulls.is_empty() {
                    return Ok(SqlExpr::In {
                        operand: Box::new(operand),
                        source: InSource::Values(values),
                    });
                }
                // A null item matches a null operand
                let matches_null = SqlExpr::is_null(operand.clone());
                if values.is_empty() {
                    return Ok(matches_null);
                }
                Ok(SqlExpr::or(
                    SqlExpr::In {
                        operand: Box::new(operand),
                        source: InSource::Values(values),
                    },
                    matches_null,
                ))
            }
            InValues::Captured(captured) => {
                let ty = captured
                    .value
                    .as_list()
                    .and_then(|items| items.iter().find_map(Value::value_type))
                    .unwrap_or_else(|| operand.value_type());
                Ok(SqlExpr::In {
                    operand: Box::new(operand),
                    source: InSource::Serialized(ParameterSlot {
                        name: captured.name.clone(),
                        ty,
                        nullable: false,
                        serialized: true,
                    }),
                })
            }
        }
    }

    /// Nested operator tree inside a lambda body
    fn translate_query(&mut self, op: &QueryOp, scope: &Scope) -> CompileResult<Shape> {
        if let Some(aggregate) = self.fold_group_aggregate(op, scope)? {
            return Ok(Shape::Scalar(aggregate));
        }
        if op.is_terminal() {
            return self.nested_terminal(op, scope).map(Shape::Scalar);
        }
        let composed = self.compose(op, scope)?;
        if composed.client.is_some() {
            return Err(CompileError::Untranslatable(format!(
                "nested {} requires in-memory evaluation",
                op.name()
            )));
        }
        self.stats.nested_collections += 1;
        Ok(template_shape(composed.select, None))
    }
}

/// Collection whose rows come from `select`, re-identified at each use
pub(crate) fn template_shape(select: SelectNode, correlation: Option<Correlation>) -> Shape {
    Shape::Collection(Box::new(CollectionShape {
        element: select.shape().clone(),
        source: CollectionSource::Template {
            select: Box::new(select),
            correlation,
        },
    }))
}

pub(crate) fn member_of(shape: Shape, name: &str) -> CompileResult<Shape> {
    match shape {
        Shape::Object(members) => {
            let names: Vec<String> = members.iter().map(|(n, _)| n.clone()).collect();
            members
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, s)| s)
                .ok_or_else(|| CompileError::UnknownMember {
                    member: name.to_string(),
                    shape: format!("an object {{ {} }}", names.join(", ")),
                })
        }
        Shape::Grouping(grouping) if name == "Key" => Ok(grouping.key),
        Shape::Optional { inner, .. } => member_of(*inner, name),
        Shape::Client(client) => Ok(Shape::Client(Box::new(ClientShape {
            expr: Expr::Member {
                target: Box::new(client.expr),
                name: name.to_string(),
            },
            bindings: client.bindings,
        }))),
        other => Err(CompileError::UnknownMember {
            member: name.to_string(),
            shape: other.describe(),
        }),
    }
}

fn client_shape(expr: &Expr, scope: &Scope) -> CompileResult<Shape> {
    if reads_table(expr) {
        return Err(CompileError::Untranslatable(
            "a query over a table cannot be evaluated in memory".to_string(),
        ));
    }
    let bindings = expr
        .free_parameters()
        .into_iter()
        .map(|param| match scope.lookup(&param) {
            Some(shape) => Ok((param, shape.clone())),
            None => Err(CompileError::UnboundParameter(param)),
        })
        .collect::<CompileResult<_>>()?;
    Ok(Shape::Client(Box::new(ClientShape {
        expr: expr.clone(),
        bindings,
    })))
}

pub(crate) fn reads_table(expr: &Expr) -> bool {
    match expr {
        Expr::Query(op) => op_reads_table(op),
        other => other.children().into_iter().any(reads_table),
    }
}

fn op_reads_table(op: &QueryOp) -> bool {
    if matches!(op, QueryOp::Table(_)) || op.inputs().into_iter().any(op_reads_table) {
        return true;
    }
    let mut found = false;
    visit_op_exprs(op, &mut |e| found |= reads_table(e));
    found
}

fn constant_shape(value: &Value) -> CompileResult<Shape> {
    match value {
        Value::Object(members) => Ok(Shape::Object(
            members
                .iter()
                .map(|(name, v)| Ok((name.clone(), constant_shape(v)?)))
                .collect::<CompileResult<_>>()?,
        )),
        Value::List(_) => Err(CompileError::Untranslatable(
            "an in-memory list can only be used as the source of Contains".to_string(),
        )),
        scalar => Ok(Shape::Scalar(SqlExpr::Constant(scalar.clone()))),
    }
}

fn captured_parameter(captured: &Captured) -> CompileResult<SqlExpr> {
    match &captured.value {
        Value::List(_) => Err(CompileError::Untranslatable(format!(
            "captured collection '{}' can only be used with Contains",
            captured.name
        ))),
        Value::Object(_) => Err(CompileError::Untranslatable(format!(
            "captured object '{}' must be accessed through its members",
            captured.name
        ))),
        value => Ok(SqlExpr::Parameter(ParameterSlot {
            name: captured.name.clone(),
            ty: value.value_type().unwrap_or(ValueType::Int32),
            nullable: value.is_null(),
            serialized: false,
        })),
    }
}

fn conditional_shape(test: &SqlExpr, if_true: Shape, if_false: Shape) -> CompileResult<Shape> {
    let case = |then: SqlExpr, otherwise: Option<SqlExpr>| SqlExpr::Case {
        whens: vec![(test.clone(), then)],
        otherwise: otherwise.map(Box::new),
    };
    match (if_true, if_false) {
        (Shape::Scalar(a), Shape::Scalar(b)) => Ok(Shape::Scalar(case(a, Some(b)))),
        (Shape::Object(a), Shape::Object(b))
            if a.len() == b.len() && a.iter().zip(&b).all(|((x, _), (y, _))| x == y) =>
        {
            Ok(Shape::Object(
                a.into_iter()
                    .zip(b)
                    .map(|((name, t), (_, f))| Ok((name, conditional_shape(test, t, f)?)))
                    .collect::<CompileResult<_>>()?,
            ))
        }
        (object @ Shape::Object(_), Shape::Scalar(n)) if is_null_constant(&n) => Ok(Shape::Optional {
            flag: case(SqlExpr::constant(1), None),
            inner: Box::new(object),
        }),
        (Shape::Scalar(n), object @ Shape::Object(_)) if is_null_constant(&n) => Ok(Shape::Optional {
            flag: case(SqlExpr::Constant(Value::Null), Some(SqlExpr::constant(1))),
            inner: Box::new(object),
        }),
        (t, f) => Err(CompileError::Untranslatable(format!(
            "conditional choosing between {} and {}",
            t.describe(),
            f.describe()
        ))),
    }
}

fn one_based(index: SqlExpr) -> SqlExpr {
    match index {
        SqlExpr::Constant(Value::Int32(n)) => match n.checked_add(1) {
            Some(next) => SqlExpr::constant(next),
            None => SqlExpr::Constant(Value::Int64(i64::from(n) + 1)),
        },
        other => SqlExpr::binary(SqlBinaryOp::Add, other, SqlExpr::constant(1)),
    }
}

fn is_null_constant(expr: &SqlExpr) -> bool {
    matches!(expr, SqlExpr::Constant(Value::Null))
}

/// Predicate form of a boolean value: plain values compare against true
pub(crate) fn as_predicate(expr: SqlExpr) -> SqlExpr {
    if expr.is_predicate() || matches!(expr, SqlExpr::Constant(Value::Bool(_))) {
        expr
    } else {
        SqlExpr::eq(expr, SqlExpr::constant(true))
    }
}

fn sql_binary_op(op: BinaryOp) -> Option<SqlBinaryOp> {
    Some(match op {
        BinaryOp::Add => SqlBinaryOp::Add,
        BinaryOp::Subtract => SqlBinaryOp::Subtract,
        BinaryOp::Multiply => SqlBinaryOp::Multiply,
        BinaryOp::Divide => SqlBinaryOp::Divide,
        BinaryOp::Modulo => SqlBinaryOp::Modulo,
        BinaryOp::BitAnd => SqlBinaryOp::BitAnd,
        BinaryOp::BitOr => SqlBinaryOp::BitOr,
        BinaryOp::BitXor => SqlBinaryOp::BitXor,
        BinaryOp::Equal => SqlBinaryOp::Equal,
        BinaryOp::NotEqual => SqlBinaryOp::NotEqual,
        BinaryOp::LessThan => SqlBinaryOp::Less,
        BinaryOp::LessThanOrEqual => SqlBinaryOp::LessOrEqual,
        BinaryOp::GreaterThan => SqlBinaryOp::Greater,
        BinaryOp::GreaterThanOrEqual => SqlBinaryOp::GreaterOrEqual,
        BinaryOp::AndAlso => SqlBinaryOp::And,
        BinaryOp::OrElse => SqlBinaryOp::Or,
        BinaryOp::Coalesce => return None,
    })
}

// ============================================================================
// Equality
// ============================================================================

/// Equality of two values with in-memory null semantics: null equals null,
/// and a comparison against a null literal becomes a null test.
pub(crate) fn scalar_equality(a: &SqlExpr, b: &SqlExpr, negated: bool) -> SqlExpr {
    let null_test = |e: &SqlExpr| SqlExpr::IsNull {
        operand: Box::new(e.clone()),
        negated,
    };
    if is_null_constant(b) {
        return null_test(a);
    }
    if is_null_constant(a) {
        return null_test(b);
    }
    let op = if negated {
        SqlBinaryOp::NotEqual
    } else {
        SqlBinaryOp::Equal
    };
    let compare = SqlExpr::binary(op, a.clone(), b.clone());
    match (a.is_nullable(), b.is_nullable(), negated) {
        (true, true, false) => SqlExpr::or(
            SqlExpr::and(SqlExpr::is_null(a.clone()), SqlExpr::is_null(b.clone())),
            compare,
        ),
        (true, true, true) => SqlExpr::or(
            SqlExpr::or(
                SqlExpr::and(SqlExpr::is_null(a.clone()), SqlExpr::is_not_null(b.clone())),
                SqlExpr::and(SqlExpr::is_not_null(a.clone()), SqlExpr::is_null(b.clone())),
            ),
            compare,
        ),
        (true, false, true) => SqlExpr::or(SqlExpr::is_null(a.clone()), compare),
        (false, true, true) => SqlExpr::or(SqlExpr::is_null(b.clone()), compare),
        _ => compare,
    }
}

/// Structural equality: member-wise conjunction (disjunction when negated)
pub(crate) fn shape_equality(left: &Shape, right: &Shape, negated: bool) -> CompileResult<SqlExpr> {
    match (left, right) {
        (Shape::Scalar(a), Shape::Scalar(b)) => Ok(scalar_equality(a, b, negated)),
        (Shape::Optional { flag, .. }, Shape::Scalar(n)) | (Shape::Scalar(n), Shape::Optional { flag, .. })
            if is_null_constant(n) =>
        {
            Ok(SqlExpr::IsNull {
                operand: Box::new(flag.clone()),
                negated,
            })
        }
        // Constructed objects and groups are never null
        (Shape::Object(_) | Shape::Grouping(_), Shape::Scalar(n))
        | (Shape::Scalar(n), Shape::Object(_) | Shape::Grouping(_))
            if is_null_constant(n) =>
        {
            Ok(SqlExpr::constant(negated))
        }
        (Shape::Optional { inner: a, .. }, Shape::Optional { inner: b, .. }) => shape_equality(a, b, negated),
        (Shape::Grouping(a), Shape::Grouping(b)) => shape_equality(&a.key, &b.key, negated),
        (Shape::Object(a), Shape::Object(b)) if a.len() == b.len() => {
            let parts = a
                .iter()
                .map(|(name, l)| match b.iter().find(|(n, _)| n == name) {
                    Some((_, r)) => shape_equality(l, r, negated),
                    None => Err(CompileError::Untranslatable(format!(
                        "cannot compare objects that differ in member '{name}'"
                    ))),
                })
                .collect::<CompileResult<Vec<_>>>()?;
            let combined = if negated {
                parts.into_iter().reduce(SqlExpr::or)
            } else {
                parts.into_iter().reduce(SqlExpr::and)
            };
            Ok(combined.unwrap_or_else(|| SqlExpr::constant(!negated)))
        }
        (l, r) => Err(CompileError::Untranslatable(format!(
            "cannot compare {} with {}",
            l.describe(),
            r.describe()
        ))),
    }
}

/// Join-key equality; without null safety null keys never match
pub(crate) fn key_equality(left: &Shape, right: &Shape, null_safe: bool) -> CompileResult<SqlExpr> {
    if null_safe {
        return shape_equality(left, right, false);
    }
    match (left, right) {
        (Shape::Scalar(a), Shape::Scalar(b)) => Ok(SqlExpr::eq(a.clone(), b.clone())),
        (Shape::Object(a), Shape::Object(b)) if a.len() == b.len() => {
            let parts = a
                .iter()
                .map(|(name, l)| match b.iter().find(|(n, _)| n == name) {
                    Some((_, r)) => key_equality(l, r, false),
                    None => Err(CompileError::Untranslatable(format!(
                        "join keys differ in member '{name}'"
                    ))),
                })
                .collect::<CompileResult<Vec<_>>>()?;
            Ok(SqlExpr::conjunction(parts).unwrap_or_else(|| SqlExpr::constant(true)))
        }
        (l, r) => Err(CompileError::Untranslatable(format!(
            "join keys have different shapes: {} and {}",
            l.describe(),
            r.describe()
        ))),
    }
}
