//! Operators combining two sequences: joins, SelectMany, Zip, set operations
//! and DefaultIfEmpty.

use super::translate::key_equality;
use super::{
    bind_lambda, lambda_param, lambda_params2, pin_alias, pin_table, uses_index, Composed,
    QueryComposer, RowNumbering, Scope,
};
use crate::ast::{Expr, Lambda, QueryOp, SetOpKind};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    CollectionShape, CollectionSource, Correlation, JoinKind, RowLimit, SelectNode, SetKind,
    Shape, SqlExpr, TableAlias, TableRef,
};
use crate::value::Value;
use std::collections::HashSet;
use tracing::trace;

impl QueryComposer {
    /// Compose a sequence that must stay entirely on the server
    fn compose_server(&mut self, op: &QueryOp, scope: &Scope, context: &str) -> CompileResult<Composed> {
        let composed = self.compose(op, scope)?;
        if composed.client.is_some() {
            return Err(CompileError::Untranslatable(format!(
                "{context} over a sequence that requires in-memory evaluation"
            )));
        }
        Ok(composed)
    }

    pub(crate) fn compose_join(
        &mut self,
        outer: &QueryOp,
        inner: &QueryOp,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        let mut current = self.compose_server(outer, scope, "Join")?;
        if current.select.is_complex() {
            current = self.push_down(current)?;
        }
        let inner = self.compose_server(inner, scope, "Join")?;

        let outer_scope = bind_lambda(&mut current, outer_key, None, scope)?;
        let outer_key_shape = self.translate(&outer_key.body, &outer_scope)?;

        let (mut right, inner_shape) = self.as_table_ref(inner, false, false)?;
        let key_param = lambda_param(inner_key)?;
        pin_table(&mut right, key_param);
        let inner_key_shape = self.translate(&inner_key.body, &scope.bind(key_param, inner_shape.clone()))?;
        if outer_key_shape.has_client_parts() || inner_key_shape.has_client_parts() {
            return Err(CompileError::Untranslatable(
                "join keys must be evaluated on the server".to_string(),
            ));
        }
        let on = key_equality(&outer_key_shape, &inner_key_shape, false)?;

        let outer_shape = current.select.shape().clone();
        let left = take_from(&mut current.select)?;
        current.select.from = Some(TableRef::join(JoinKind::Inner, left, right, Some(on)));

        let (outer_param, inner_param) = lambda_params2(result)?;
        let result_scope = scope.bind(outer_param, outer_shape).bind(inner_param, inner_shape);
        let shape = self.translate(&result.body, &result_scope)?;
        current.select.set_shape(shape);
        current.order_keys.clear();
        self.stats.joins += 1;
        Ok(current)
    }

    /// GroupJoin keeps the outer rows and exposes the matching inner rows as a
    /// correlated collection
    pub(crate) fn compose_group_join(
        &mut self,
        outer: &QueryOp,
        inner: &QueryOp,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        let mut current = self.compose_server(outer, scope, "GroupJoin")?;
        let mut inner = self.compose_server(inner, scope, "GroupJoin")?;
        if inner.select.is_complex() {
            inner = self.push_down(inner)?;
        }

        let outer_scope = bind_lambda(&mut current, outer_key, None, scope)?;
        let outer_key_shape = self.translate(&outer_key.body, &outer_scope)?;
        let inner_scope = bind_lambda(&mut inner, inner_key, None, scope)?;
        let inner_key_shape = self.translate(&inner_key.body, &inner_scope)?;
        if outer_key_shape.has_client_parts() || inner_key_shape.has_client_parts() {
            return Err(CompileError::Untranslatable(
                "join keys must be evaluated on the server".to_string(),
            ));
        }

        let group = Shape::Collection(Box::new(CollectionShape {
            element: inner.select.shape().clone(),
            source: CollectionSource::Template {
                select: Box::new(inner.select),
                correlation: Some(Correlation {
                    outer: outer_key_shape,
                    inner: inner_key_shape,
                    null_safe: false,
                }),
            },
        }));

        let (outer_param, group_param) = lambda_params2(result)?;
        let result_scope = scope
            .bind(outer_param, current.select.shape().clone())
            .bind(group_param, group);
        let shape = self.translate(&result.body, &result_scope)?;
        current.select.set_shape(shape);
        current.order_keys.clear();
        Ok(current)
    }

    pub(crate) fn apply_select_many(
        &mut self,
        mut current: Composed,
        collection: &Lambda,
        result: Option<&Lambda>,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        if current.select.is_complex() {
            current = self.push_down(current)?;
        }
        let index = if uses_index(collection) {
            let (pushed, index) = self.push_down_numbered(current, RowNumbering::Index)?;
            current = pushed;
            Some(index)
        } else {
            None
        };
        let collection_scope = bind_lambda(&mut current, collection, index, scope)?;
        let (sequence, optional) = strip_default_if_empty(&collection.body);
        let element_name = result.and_then(|r| r.param(1));

        // Navigation into a correlated collection joins on its key
        let mut direct = None;
        if let QueryOp::Source(expr) = &sequence {
            match self.translate(expr, &collection_scope)? {
                Shape::Collection(c) if is_correlated_template(&c) => direct = Some(*c),
                Shape::Grouping(g) => direct = Some(g.elements),
                _ => {}
            }
        }

        let (right, kind, on, inner_shape) = match direct {
            Some(collection) => {
                let (select, correlation) = self.detach(collection)?;
                let correlation = correlation.ok_or_else(|| {
                    CompileError::InvariantViolation("correlated collection lost its key".to_string())
                })?;
                let (mut right, shape, key) = self.as_keyed_table_ref(
                    Composed::new(select),
                    optional,
                    false,
                    Some(&correlation.inner),
                )?;
                if let Some(name) = element_name {
                    pin_table(&mut right, name);
                }
                let key = key.ok_or_else(|| {
                    CompileError::InvariantViolation("join key was not exposed".to_string())
                })?;
                let on = key_equality(&correlation.outer, &key, correlation.null_safe)?;
                let kind = if optional { JoinKind::Left } else { JoinKind::Inner };
                (right, kind, Some(on), shape)
            }
            None => {
                let inner = self.compose_server(&sequence, &collection_scope, "SelectMany")?;
                let visible: HashSet<_> = current
                    .select
                    .from
                    .as_ref()
                    .map(TableRef::visible_ids)
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                let outer_refs = inner.select.outer_references();
                let correlated = outer_refs.iter().any(|id| visible.contains(id));
                let (mut right, shape, kind, on) = if correlated || inner.select.is_correlated() {
                    let (right, shape) = self.as_table_ref(inner, optional, true)?;
                    let kind = if optional {
                        JoinKind::OuterApply
                    } else {
                        JoinKind::CrossApply
                    };
                    (right, shape, kind, None)
                } else if optional {
                    let (right, shape) = self.as_table_ref(inner, true, false)?;
                    (right, shape, JoinKind::Left, Some(SqlExpr::constant(true)))
                } else {
                    let (right, shape) = self.as_table_ref(inner, false, false)?;
                    (right, shape, JoinKind::Cross, None)
                };
                if let Some(name) = element_name {
                    pin_table(&mut right, name);
                }
                (right, kind, on, shape)
            }
        };
        trace!(?kind, "SelectMany joined");

        let outer_shape = current.select.shape().clone();
        let left = take_from(&mut current.select)?;
        current.select.from = Some(TableRef::join(kind, left, right, on));
        let shape = match result {
            Some(result) => {
                let (outer_param, inner_param) = lambda_params2(result)?;
                let result_scope = scope.bind(outer_param, outer_shape).bind(inner_param, inner_shape);
                self.translate(&result.body, &result_scope)?
            }
            None => inner_shape,
        };
        current.select.set_shape(shape);
        current.order_keys.clear();
        self.stats.joins += 1;
        Ok(current)
    }

    /// Pair rows of two sequences by position
    pub(crate) fn compose_zip(
        &mut self,
        left: &QueryOp,
        right: &QueryOp,
        result: &Lambda,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        let left = self.compose_server(left, scope, "Zip")?;
        let right = self.compose_server(right, scope, "Zip")?;
        let (mut current, left_number) = self.push_down_numbered(left, RowNumbering::Number)?;
        let (right, right_number) = self.push_down_numbered(right, RowNumbering::Number)?;

        let (left_param, right_param) = lambda_params2(result)?;
        pin_alias(&mut current.select, left_param);
        let mut right_select = right.select;
        pin_alias(&mut right_select, right_param);

        let left_shape = current.select.shape().clone();
        let right_shape = right_select.shape().clone();
        let left_from = take_from(&mut current.select)?;
        let right_from = take_from(&mut right_select)?;
        current.select.from = Some(TableRef::join(
            JoinKind::Inner,
            left_from,
            right_from,
            Some(SqlExpr::eq(left_number, right_number)),
        ));

        let result_scope = scope.bind(left_param, left_shape).bind(right_param, right_shape);
        let shape = self.translate(&result.body, &result_scope)?;
        current.select.set_shape(shape);
        current.order_keys.clear();
        self.stats.joins += 1;
        Ok(current)
    }

    pub(crate) fn compose_set_op(
        &mut self,
        kind: SetOpKind,
        left: &QueryOp,
        right: &QueryOp,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        let left = self.compose_server(left, scope, "a set operation")?;
        let right = self.compose_server(right, scope, "a set operation")?;
        let left = self.set_operand(left)?;
        let right = self.set_operand(right)?;

        let left_columns = left.output_columns()?;
        let right_columns = right.output_columns()?;
        let aligned = left_columns.len() == right_columns.len()
            && left_columns
                .iter()
                .zip(&right_columns)
                .all(|(l, r)| l.name == r.name);
        if !aligned {
            return Err(CompileError::Untranslatable(
                "set operands project different columns".to_string(),
            ));
        }

        let id = self.table_id();
        let mut shape = left.shape().lift(id, false)?;
        shape.for_each_expr_mut(&mut |e| {
            if let SqlExpr::Column(c) = e {
                if c.table == id && right_columns.iter().any(|r| r.name == c.name && r.expr.is_nullable()) {
                    c.nullable = true;
                }
            }
        });
        let kind = match kind {
            SetOpKind::Concat => SetKind::UnionAll,
            SetOpKind::Union => SetKind::Union,
            SetOpKind::Intersect => SetKind::Intersect,
            SetOpKind::Except => SetKind::Except,
        };
        let from = TableRef::SetOp {
            kind,
            left: Box::new(left),
            right: Box::new(right),
            alias: TableAlias::new(id, "set"),
        };
        Ok(Composed::new(SelectNode::new(shape, Some(from))))
    }

    /// Operand of a set operation: ordering is meaningless unless it selects rows
    fn set_operand(&mut self, mut composed: Composed) -> CompileResult<SelectNode> {
        if !composed.select.ordering.is_empty() {
            if matches!(composed.select.limit, RowLimit::Top(_) | RowLimit::Offset { .. }) {
                composed = self.push_down(composed)?;
            }
            composed.select.ordering.clear();
        }
        let mut select = composed.select;
        self.encode_projection(&mut select, false)?;
        Ok(select)
    }

    /// A single row of defaults when the sequence is empty
    pub(crate) fn apply_default_if_empty(&mut self, current: Composed) -> CompileResult<Composed> {
        let (right, shape) = self.as_table_ref(current, true, false)?;
        let placeholder = SelectNode::new(
            Shape::Object(vec![(
                "$empty".to_string(),
                Shape::Scalar(SqlExpr::Constant(Value::Null)),
            )]),
            None,
        );
        let left = TableRef::Derived {
            select: Box::new(placeholder),
            alias: TableAlias::new(self.table_id(), "t"),
        };
        let from = TableRef::join(JoinKind::Left, left, right, Some(SqlExpr::constant(true)));
        Ok(Composed::new(SelectNode::new(shape, Some(from))))
    }
}

fn take_from(select: &mut SelectNode) -> CompileResult<TableRef> {
    select
        .from
        .take()
        .ok_or_else(|| CompileError::InvariantViolation("join side without a FROM".to_string()))
}

fn is_correlated_template(collection: &CollectionShape) -> bool {
    matches!(
        collection.source,
        CollectionSource::Template {
            correlation: Some(_),
            ..
        }
    )
}

/// `xs.DefaultIfEmpty()` as the collection of a SelectMany becomes an outer join
fn strip_default_if_empty(body: &Expr) -> (QueryOp, bool) {
    match body {
        Expr::Query(op) => match op.as_ref() {
            QueryOp::DefaultIfEmpty { source } => ((**source).clone(), true),
            other => (other.clone(), false),
        },
        other => (QueryOp::Source(Box::new(other.clone())), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{lambda, lambda2, new_object, Query};
    use crate::catalog::TableDescriptor;
    use crate::value::ValueType;
    use std::sync::Arc;

    fn parents() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("dbo", "MyClass1")
                .with_alias_seed("m")
                .column("Prop1", ValueType::Int32)
                .column("Prop2", ValueType::Int32),
        )
    }

    fn children() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("dbo", "MyClass2")
                .with_alias_seed("m")
                .column("Prop1", ValueType::Int32)
                .nullable_column("Prop2", ValueType::Int32),
        )
    }

    fn group_join() -> Query {
        Query::from_table(parents()).group_join(
            Query::from_table(children()),
            lambda("s1", |s1| s1.member("Prop1")),
            lambda("s2", |s2| s2.member("Prop1")),
            lambda2("s1", "g2", |s1, g2| new_object([("s1", s1), ("g2", g2)])),
        )
    }

    fn join_kind(select: &SelectNode) -> Option<JoinKind> {
        match &select.from {
            Some(TableRef::Join { kind, .. }) => Some(*kind),
            _ => None,
        }
    }

    #[test]
    fn test_group_join_flattened_is_inner_join() {
        let query = group_join().select_many_result(
            lambda("x", |x| x.member("g2")),
            lambda2("x", "s2", |x, s2| new_object([("s1", x.member("s1")), ("s2", s2)])),
        );
        let composed = QueryComposer::new().compose_query(query.op()).unwrap();
        assert_eq!(join_kind(&composed.select), Some(JoinKind::Inner));
    }

    #[test]
    fn test_group_join_with_default_is_left_join() {
        let query = group_join().select_many_result(
            lambda("x", |x| x.member("g2").into_query().default_if_empty().into_expr()),
            lambda2("x", "s2", |x, s2| new_object([("s1", x.member("s1")), ("s2", s2)])),
        );
        let composed = QueryComposer::new().compose_query(query.op()).unwrap();
        assert_eq!(join_kind(&composed.select), Some(JoinKind::Left));
    }

    #[test]
    fn test_limited_group_is_applied() {
        let query = group_join().select_many_result(
            lambda("x", |x| x.member("g2").into_query().take(1).into_expr()),
            lambda2("x", "s2", |x, s2| new_object([("s1", x.member("s1")), ("s2", s2)])),
        );
        let composed = QueryComposer::new().compose_query(query.op()).unwrap();
        assert_eq!(join_kind(&composed.select), Some(JoinKind::CrossApply));
    }

    #[test]
    fn test_uncorrelated_select_many_is_cross_join() {
        let query = Query::from_table(parents()).select_many_result(
            lambda("a", |_| Query::from_table(children()).into_expr()),
            lambda2("a", "b", |a, b| new_object([("a", a), ("b", b)])),
        );
        let composed = QueryComposer::new().compose_query(query.op()).unwrap();
        assert_eq!(join_kind(&composed.select), Some(JoinKind::Cross));
    }

    #[test]
    fn test_set_operands_must_align() {
        let left = Query::from_table(parents()).select(lambda("m", |m| m.member("Prop1")));
        let right = Query::from_table(parents());
        let err = QueryComposer::new()
            .compose_query(left.union(right).op())
            .unwrap_err();
        assert!(matches!(err, CompileError::Untranslatable(_)));
    }

    #[test]
    fn test_zip_joins_on_row_numbers() {
        let query = Query::from_table(parents()).zip(
            Query::from_table(children()),
            lambda2("m1", "m2", |m1, m2| new_object([("m1", m1), ("m2", m2)])),
        );
        let mut composer = QueryComposer::new();
        let composed = composer.compose_query(query.op()).unwrap();
        assert_eq!(join_kind(&composed.select), Some(JoinKind::Inner));
        assert_eq!(composer.stats.pushdowns, 2);
    }
}
