//! Terminal operators (aggregates, quantifiers, element access) at the root
//! of a query or nested inside a projection, and aggregates folded into the
//! select that groups their rows.

use super::translate::shape_equality;
use super::{
    bind_lambda, lambda_param, classify_scope, replace_source, Composed, QueryComposer, RowNumbering,
    Scope,
};
use crate::ast::{AggregateOp, ElementKind, Expr, Lambda, QueryOp};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    AggregateKind, InSource, JoinKind, RowLimit, SelectNode, Shape, SqlExpr, SqlFunction, TableRef,
};
use crate::translatability::{classify, member_path, Evaluation};
use crate::value::{Value, ValueType};

/// How the single result of a query is produced from its rows
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// Every row is an element
    Sequence,
    Element {
        kind: ElementKind,
        or_default: bool,
    },
    ElementAt {
        index: Expr,
        or_default: bool,
    },
    /// One aggregate value; `nullable` when an empty input yields null
    /// rather than an error
    Scalar { op: AggregateOp, nullable: bool },
    /// One boolean
    Predicate,
    /// Produced by the client pipeline
    Client,
}

impl QueryComposer {
    pub(crate) fn compose_terminal(
        &mut self,
        op: &QueryOp,
        scope: &Scope,
        nested: bool,
    ) -> CompileResult<(Composed, Terminal)> {
        match op {
            QueryOp::Aggregate {
                source,
                op: aggregate,
                selector,
            } => {
                let current = self.compose(source, scope)?;
                self.apply_aggregate(current, op, *aggregate, selector.as_ref(), scope, nested)
            }
            QueryOp::Any { source, predicate } => {
                let mut current = self.compose(source, scope)?;
                if let Some(predicate) = predicate {
                    current = self.filter(current, predicate, scope)?;
                }
                if current.client.is_some() {
                    return Ok(self.client_terminal(current, |source| QueryOp::Any {
                        source,
                        predicate: None,
                    }));
                }
                Ok((predicate_node(exists(current.select)), Terminal::Predicate))
            }
            QueryOp::All { source, predicate } => {
                let mut current = self.compose(source, scope)?;
                let deferred = current.client.is_some()
                    || classify(&predicate.body, &classify_scope(&current, predicate, scope)?)
                        == Evaluation::Client;
                if deferred {
                    return Ok(self.client_terminal(current, |source| replace_source(op, source)));
                }
                if current.select.is_complex() {
                    current = self.push_down(current)?;
                }
                let bound = bind_lambda(&mut current, predicate, None, scope)?;
                let failing = self.translate_negated(&predicate.body, &bound)?;
                current.select.add_predicate(failing);
                Ok((predicate_node(SqlExpr::not(exists(current.select))), Terminal::Predicate))
            }
            QueryOp::Contains { source, item } => {
                let current = self.compose(source, scope)?;
                if current.client.is_some() {
                    return Ok(self.client_terminal(current, |source| replace_source(op, source)));
                }
                let item = self.translate(item, scope)?;
                if item.has_client_parts() {
                    return Ok(self.client_terminal(current, |source| replace_source(op, source)));
                }
                self.apply_contains(current, item)
            }
            QueryOp::SequenceEqual { left, right } => self.compose_sequence_equal(left, right, scope),
            QueryOp::Element {
                source,
                kind,
                or_default,
            } => {
                let current = self.compose(source, scope)?;
                if current.client.is_some() {
                    return Ok(self.client_terminal(current, |source| replace_source(op, source)));
                }
                if nested && current.select.shape().as_scalar().is_none() {
                    return Err(CompileError::Untranslatable(format!(
                        "{kind:?} of {} inside a projection",
                        current.select.shape().describe()
                    )));
                }
                let one = SqlExpr::constant(1);
                let current = match kind {
                    ElementKind::First => self.apply_take(current, one)?,
                    // A second row is fetched to detect duplicates
                    ElementKind::Single if !nested => self.apply_take(current, SqlExpr::constant(2))?,
                    ElementKind::Single => self.apply_take(current, one)?,
                    ElementKind::Last => {
                        let reversed = self.apply_reverse(current)?;
                        self.apply_take(reversed, one)?
                    }
                };
                let terminal = Terminal::Element {
                    kind: *kind,
                    or_default: *or_default,
                };
                Ok((current, terminal))
            }
            QueryOp::ElementAt {
                source,
                index,
                or_default,
            } => {
                let current = self.compose(source, scope)?;
                if current.client.is_some() {
                    return Ok(self.client_terminal(current, |source| replace_source(op, source)));
                }
                if nested && current.select.shape().as_scalar().is_none() {
                    return Err(CompileError::Untranslatable(
                        "ElementAt of an object inside a projection".to_string(),
                    ));
                }
                let offset = self.translate_value(index, scope)?;
                let current = self.apply_skip(current, offset)?;
                let current = self.apply_take(current, SqlExpr::constant(1))?;
                let terminal = Terminal::ElementAt {
                    index: (**index).clone(),
                    or_default: *or_default,
                };
                Ok((current, terminal))
            }
            other => Err(CompileError::InvariantViolation(format!(
                "{} is not a terminal operator",
                other.name()
            ))),
        }
    }

    /// A terminal inside a projection, as one scalar expression
    pub(crate) fn nested_terminal(&mut self, op: &QueryOp, scope: &Scope) -> CompileResult<SqlExpr> {
        let (composed, _) = self.compose_terminal(op, scope, true)?;
        if composed.client.is_some() {
            return Err(CompileError::Untranslatable(format!(
                "nested {} requires in-memory evaluation",
                op.name()
            )));
        }
        let select = composed.select;
        if select.from.is_none() {
            return match select.projection.into_shape() {
                Shape::Scalar(expr) => Ok(expr),
                other => Err(CompileError::InvariantViolation(format!(
                    "nested terminal produced {}",
                    other.describe()
                ))),
            };
        }
        Ok(SqlExpr::ScalarSubquery(Box::new(select)))
    }

    fn filter(&mut self, current: Composed, predicate: &Lambda, scope: &Scope) -> CompileResult<Composed> {
        if current.client.is_some() {
            let predicate = predicate.clone();
            return Ok(self.append_client(current, |source| QueryOp::Where { source, predicate }));
        }
        self.apply_where(current, predicate, scope)
    }

    fn client_terminal(
        &mut self,
        current: Composed,
        stage: impl FnOnce(Box<QueryOp>) -> QueryOp,
    ) -> (Composed, Terminal) {
        (self.append_client(current, stage), Terminal::Client)
    }

    fn apply_aggregate(
        &mut self,
        mut current: Composed,
        op: &QueryOp,
        aggregate: AggregateOp,
        selector: Option<&Lambda>,
        scope: &Scope,
        nested: bool,
    ) -> CompileResult<(Composed, Terminal)> {
        let counting = matches!(aggregate, AggregateOp::Count | AggregateOp::LongCount);
        let mut selector = selector;
        if counting {
            if let Some(predicate) = selector.take() {
                current = self.filter(current, predicate, scope)?;
            }
        }
        if current.client.is_some() {
            return Ok(self.client_terminal(current, |source| match op {
                QueryOp::Aggregate { op, .. } if counting => QueryOp::Aggregate {
                    source,
                    op: *op,
                    selector: None,
                },
                _ => replace_source(op, source),
            }));
        }
        if let Some(selector) = selector {
            let classifying = classify_scope(&current, selector, scope)?;
            if classify(&selector.body, &classifying) == Evaluation::Client {
                return Ok(self.client_terminal(current, |source| replace_source(op, source)));
            }
        }

        if current.select.is_complex() {
            current = self.push_down(current)?;
        } else {
            current.select.ordering.clear();
        }

        let operand = match selector {
            Some(selector) => {
                let bound = bind_lambda(&mut current, selector, None, scope)?;
                Some(self.translate_value(&selector.body, &bound)?)
            }
            None if counting => None,
            None => Some(current.select.shape().as_scalar().cloned().ok_or_else(|| {
                CompileError::Untranslatable(format!(
                    "{aggregate:?} over {}",
                    current.select.shape().describe()
                ))
            })?),
        };
        let nullable = operand.as_ref().is_some_and(SqlExpr::is_nullable);
        let mut value = aggregate_call(aggregate, false, operand);
        if nested && aggregate == AggregateOp::Sum {
            let zero = zero_of(value.value_type());
            value = SqlExpr::Function {
                function: SqlFunction::Coalesce,
                args: vec![value, zero],
            };
        }
        current.select.set_shape(Shape::Scalar(value));
        Ok((current, Terminal::Scalar { op: aggregate, nullable }))
    }

    fn apply_contains(&mut self, mut current: Composed, item: Shape) -> CompileResult<(Composed, Terminal)> {
        if let (Shape::Scalar(value), Shape::Scalar(item)) = (current.select.shape().clone(), &item) {
            if !matches!(current.select.limit, RowLimit::Top(_) | RowLimit::Offset { .. }) {
                current.select.ordering.clear();
            }
            current.select.set_shape(Shape::Scalar(value));
            let test = SqlExpr::In {
                operand: Box::new(item.clone()),
                source: InSource::Select(Box::new(current.select)),
            };
            return Ok((predicate_node(test), Terminal::Predicate));
        }
        if current.select.is_complex() {
            current = self.push_down(current)?;
        }
        let equal = shape_equality(current.select.shape(), &item, false)?;
        current.select.add_predicate(equal);
        Ok((predicate_node(exists(current.select)), Terminal::Predicate))
    }

    /// Pairwise comparison by position: a full join on row numbers with no
    /// unmatched or unequal pair
    fn compose_sequence_equal(
        &mut self,
        left: &QueryOp,
        right: &QueryOp,
        scope: &Scope,
    ) -> CompileResult<(Composed, Terminal)> {
        let left = self.compose(left, scope)?;
        let right = self.compose(right, scope)?;
        if left.client.is_some() || right.client.is_some() {
            return Err(CompileError::Untranslatable(
                "SequenceEqual over a sequence that requires in-memory evaluation".to_string(),
            ));
        }
        let (mut current, left_number) = self.push_down_numbered(left, RowNumbering::Number)?;
        let (mut right, right_number) = self.push_down_numbered(right, RowNumbering::Number)?;
        let left_shape = current.select.shape().clone();
        let right_shape = right.select.shape().clone();

        let unmatched = SqlExpr::or(
            SqlExpr::is_null(left_number.clone()),
            SqlExpr::is_null(right_number.clone()),
        );
        let differing = shape_equality(&left_shape, &right_shape, true)?;
        let (left_from, right_from) = match (current.select.from.take(), right.select.from.take()) {
            (Some(l), Some(r)) => (l, r),
            _ => {
                return Err(CompileError::InvariantViolation(
                    "pushdown produced no FROM".to_string(),
                ))
            }
        };
        current.select.from = Some(TableRef::join(
            JoinKind::Full,
            left_from,
            right_from,
            Some(SqlExpr::eq(left_number, right_number)),
        ));
        current.select.ordering.clear();
        current.select.add_predicate(SqlExpr::or(unmatched, differing));
        Ok((
            predicate_node(SqlExpr::not(exists(current.select))),
            Terminal::Predicate,
        ))
    }

    /// An aggregate over a group, computed by the select that groups it:
    /// `g.Where(p).Select(s).Distinct().Sum()` and the like
    pub(crate) fn fold_group_aggregate(&mut self, op: &QueryOp, scope: &Scope) -> CompileResult<Option<SqlExpr>> {
        let QueryOp::Aggregate {
            source,
            op: aggregate,
            selector,
        } = op
        else {
            return Ok(None);
        };

        let mut steps = Vec::new();
        let mut cursor = source.as_ref();
        let root = loop {
            match cursor {
                QueryOp::Source(expr) => break expr,
                QueryOp::Where { source, predicate } if !predicate.is_indexed() => {
                    steps.push(cursor);
                    cursor = source;
                }
                QueryOp::Select { source, selector } if !selector.is_indexed() => {
                    steps.push(cursor);
                    cursor = source;
                }
                QueryOp::Distinct { source } => {
                    steps.push(cursor);
                    cursor = source;
                }
                _ => return Ok(None),
            }
        };
        if member_path(root).is_none() {
            return Ok(None);
        }
        let Shape::Grouping(grouping) = self.translate(root, scope)? else {
            return Ok(None);
        };
        let Some(mut element) = grouping.in_place else {
            return Ok(None);
        };

        let mut filter: Option<SqlExpr> = None;
        let mut distinct = false;
        for step in steps.into_iter().rev() {
            match step {
                QueryOp::Where { predicate, .. } if !distinct => {
                    let bound = scope.bind(lambda_param(predicate)?, element.clone());
                    if classify(&predicate.body, &bound) == Evaluation::Client {
                        return Ok(None);
                    }
                    let condition = self.translate_predicate(&predicate.body, &bound)?;
                    filter = Some(and_option(filter, condition));
                }
                QueryOp::Select { selector, .. } if !distinct => {
                    let bound = scope.bind(lambda_param(selector)?, element.clone());
                    element = self.translate(&selector.body, &bound)?;
                }
                QueryOp::Distinct { .. } => distinct = true,
                _ => return Ok(None),
            }
        }

        let counting = matches!(aggregate, AggregateOp::Count | AggregateOp::LongCount);
        let operand = match selector {
            Some(predicate) if counting => {
                let bound = scope.bind(lambda_param(predicate)?, element.clone());
                let condition = self.translate_predicate(&predicate.body, &bound)?;
                filter = Some(and_option(filter, condition));
                None
            }
            Some(selector) => {
                let bound = scope.bind(lambda_param(selector)?, element.clone());
                Some(self.translate_value(&selector.body, &bound)?)
            }
            None if counting && !distinct => None,
            None => match element.as_scalar() {
                Some(value) => Some(value.clone()),
                None => return Ok(None),
            },
        };
        if distinct && filter.is_some() {
            return Ok(None);
        }

        let operand = operand.map(|o| average_operand(*aggregate, o));
        let operand = match filter {
            Some(condition) => Some(SqlExpr::Case {
                whens: vec![(condition, operand.unwrap_or_else(|| SqlExpr::constant(1)))],
                otherwise: Some(Box::new(SqlExpr::Constant(Value::Null))),
            }),
            None => operand,
        };
        Ok(Some(SqlExpr::Aggregate {
            kind: aggregate_kind(*aggregate),
            distinct,
            operand: operand.map(Box::new),
        }))
    }
}

fn aggregate_kind(op: AggregateOp) -> AggregateKind {
    match op {
        AggregateOp::Count => AggregateKind::Count,
        AggregateOp::LongCount => AggregateKind::CountBig,
        AggregateOp::Sum => AggregateKind::Sum,
        AggregateOp::Average => AggregateKind::Avg,
        AggregateOp::Min => AggregateKind::Min,
        AggregateOp::Max => AggregateKind::Max,
    }
}

/// Averages of integral values are computed in floating point
fn average_operand(op: AggregateOp, operand: SqlExpr) -> SqlExpr {
    if op == AggregateOp::Average && operand.value_type().is_integral() {
        SqlExpr::Cast {
            operand: Box::new(operand),
            ty: ValueType::Float64,
        }
    } else {
        operand
    }
}

fn aggregate_call(op: AggregateOp, distinct: bool, operand: Option<SqlExpr>) -> SqlExpr {
    SqlExpr::Aggregate {
        kind: aggregate_kind(op),
        distinct,
        operand: operand.map(|o| Box::new(average_operand(op, o))),
    }
}

fn zero_of(ty: ValueType) -> SqlExpr {
    match ty {
        ValueType::Int64 => SqlExpr::constant(0i64),
        ValueType::Float64 => SqlExpr::constant(0.0),
        _ => SqlExpr::constant(0),
    }
}

fn and_option(existing: Option<SqlExpr>, condition: SqlExpr) -> SqlExpr {
    match existing {
        Some(existing) => SqlExpr::and(existing, condition),
        None => condition,
    }
}

/// `EXISTS (SELECT 1 ...)` over a select's rows
fn exists(mut select: SelectNode) -> SqlExpr {
    if !matches!(select.limit, RowLimit::Top(_) | RowLimit::Offset { .. }) {
        select.ordering.clear();
    }
    select.hidden.clear();
    select.set_shape(Shape::Scalar(SqlExpr::constant(1)));
    SqlExpr::Exists(Box::new(select))
}

/// A select without FROM returning one computed value
fn predicate_node(test: SqlExpr) -> Composed {
    Composed::new(SelectNode::new(Shape::Scalar(test), None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{lambda, lit, Query};
    use crate::catalog::TableDescriptor;
    use std::sync::Arc;

    fn mappings() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("dbo", "MyClass1")
                .with_alias_seed("m")
                .nullable_column("Prop1", ValueType::String)
                .column("Prop2", ValueType::Int32),
        )
    }

    fn compose(query: Query) -> super::super::ComposedQuery {
        QueryComposer::new().compose_query(query.op()).unwrap()
    }

    #[test]
    fn test_count_is_scalar_terminal() {
        let composed = compose(Query::from_table(mappings()).count());
        assert_eq!(
            composed.terminal,
            Terminal::Scalar {
                op: AggregateOp::Count,
                nullable: false
            }
        );
        assert_eq!(
            composed.select.shape(),
            &Shape::Scalar(SqlExpr::Aggregate {
                kind: AggregateKind::Count,
                distinct: false,
                operand: None
            })
        );
    }

    #[test]
    fn test_any_wraps_exists() {
        let composed = compose(
            Query::from_table(mappings()).any_where(lambda("m", |m| m.member("Prop2").gt(lit(88)))),
        );
        assert_eq!(composed.terminal, Terminal::Predicate);
        assert!(composed.select.from.is_none());
        assert!(matches!(composed.select.shape(), Shape::Scalar(SqlExpr::Exists(_))));
    }

    #[test]
    fn test_single_fetches_two_rows() {
        let composed = compose(Query::from_table(mappings()).single());
        assert_eq!(composed.select.limit, RowLimit::Top(SqlExpr::constant(2)));
    }

    #[test]
    fn test_group_aggregate_folds_into_grouping_select() {
        let query = Query::from_table(mappings())
            .group_by(lambda("m", |m| m.member("Prop1")))
            .select(lambda("g", |g| {
                g.into_query()
                    .filter(lambda("x", |x| x.member("Prop2").gt(lit(7))))
                    .count()
                    .into_expr()
            }));
        let composed = compose(query);
        assert!(composed.select.from.is_some());
        assert_eq!(composed.select.grouping.len(), 1);
        match composed.select.shape() {
            Shape::Scalar(SqlExpr::Aggregate {
                kind: AggregateKind::Count,
                operand: Some(operand),
                ..
            }) => assert!(matches!(**operand, SqlExpr::Case { .. })),
            other => panic!("expected a folded count, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_object_element_is_untranslatable() {
        let query = Query::from_table(mappings()).select(lambda("m", |_| {
            Query::from_table(mappings()).first().into_expr()
        }));
        let err = QueryComposer::new().compose_query(query.op()).unwrap_err();
        assert!(matches!(err, CompileError::Untranslatable(_)));
    }
}
