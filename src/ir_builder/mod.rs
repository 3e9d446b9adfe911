//! # Query Composer
//!
//! Turns a rewritten operator tree into one [`SelectNode`] tree, deciding for
//! each operator whether it can be expressed in the current SELECT or whether
//! the current SELECT must first be wrapped as a derived table ("pushdown").
//!
//! ## Pipeline Position
//!
//! ```text
//! QueryOp (rewritten) → [Query Composer] → SelectNode + client pipeline → Optimizer
//! ```
//!
//! ## Composition rules
//!
//! - A node with a row limit or grouping is *complex*: filtering, joining,
//!   aggregating or projecting through it would change its meaning, so those
//!   operators push it down first.
//! - Ordering follows the rows through pushdowns only when every ordering
//!   term is still an output column; otherwise it is dropped.
//! - Once any operator has to run in memory, it and every later operator are
//!   appended to the client pipeline, which runs over the materialized rows
//!   of the server query ([`ROWS_PARAMETER`]).
//! - Nested queries in a projection stay *templates* until the projection is
//!   finalized, then become structured-array columns.

mod joins;
mod scope;
mod shape;
mod terminal;
mod translate;

pub(crate) use scope::Scope;

use crate::ast::{Expr, Lambda, QueryOp};
use crate::catalog::TableDescriptor;
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    AggregateKind, CollectionShape, CollectionSource, Correlation, GroupingShape, Ordering,
    RowLimit, SelectNode, Shape, SqlBinaryOp, SqlExpr, SqlFunction, TableAlias, TableId, TableRef,
};
use crate::translatability::{split_predicate, Evaluation};
use crate::value::ValueType;
use std::sync::Arc;
use tracing::debug;
use translate::reads_table;

pub use terminal::Terminal;

/// Parameter the client pipeline reads the materialized server rows from
pub const ROWS_PARAMETER: &str = "$rows";

/// Hidden output column carrying a row number through a pushdown
pub(crate) const ROW_NUMBER_COLUMN: &str = "$rownumber";

/// Counters describing one composition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposeStats {
    /// Select nodes wrapped as derived tables
    pub pushdowns: usize,
    /// Nested queries composed as collection templates
    pub nested_collections: usize,
    /// Templates instantiated with fresh table ids
    pub instantiations: usize,
    pub joins: usize,
    /// Operators deferred to in-memory evaluation
    pub client_operators: usize,
}

/// A sequence under composition
#[derive(Debug, Clone)]
pub struct Composed {
    pub select: SelectNode,
    /// In-memory pipeline over the server rows
    pub client: Option<QueryOp>,
    /// Key lambdas of the current ordering, kept so a later in-memory
    /// ThenBy can re-sort by every key
    pub order_keys: Vec<(Lambda, bool)>,
}

impl Composed {
    pub fn new(select: SelectNode) -> Self {
        Composed {
            select,
            client: None,
            order_keys: Vec::new(),
        }
    }
}

/// Result of composing a whole query
#[derive(Debug, Clone)]
pub struct ComposedQuery {
    pub select: SelectNode,
    pub client: Option<QueryOp>,
    pub terminal: Terminal,
}

/// How a pushdown numbers its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowNumbering {
    /// Zero-based `int` index, for indexed lambdas
    Index,
    /// Raw one-based `ROW_NUMBER()`
    Number,
}

/// Composes operator trees into select nodes
#[derive(Debug, Default)]
pub struct QueryComposer {
    next_table: TableId,
    pub stats: ComposeStats,
}

impl QueryComposer {
    pub fn new() -> Self {
        QueryComposer::default()
    }

    /// Allocate a table id; ids start at 1
    pub(crate) fn table_id(&mut self) -> TableId {
        self.next_table += 1;
        self.next_table
    }

    /// Compose a query and finalize its projection
    pub fn compose_query(&mut self, op: &QueryOp) -> CompileResult<ComposedQuery> {
        let scope = Scope::default();
        let (mut composed, terminal) = if op.is_terminal() {
            self.compose_terminal(op, &scope, false)?
        } else {
            (self.compose(op, &scope)?, Terminal::Sequence)
        };
        self.encode_projection(&mut composed.select, false)?;
        debug!(
            operator = op.name(),
            pushdowns = self.stats.pushdowns,
            client_operators = self.stats.client_operators,
            "composed query"
        );
        Ok(ComposedQuery {
            select: composed.select,
            client: composed.client,
            terminal,
        })
    }

    /// Compose a sequence operator
    pub(crate) fn compose(&mut self, op: &QueryOp, scope: &Scope) -> CompileResult<Composed> {
        match op {
            QueryOp::Table(table) => return Ok(Composed::new(self.base_table(table))),
            QueryOp::Source(expr) => return self.compose_source(expr, scope),
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => return self.compose_join(outer, inner, outer_key, inner_key, result, scope),
            QueryOp::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => return self.compose_group_join(outer, inner, outer_key, inner_key, result, scope),
            QueryOp::SetOp { kind, left, right } => {
                return self.compose_set_op(*kind, left, right, scope)
            }
            QueryOp::Zip {
                left,
                right,
                result,
            } => return self.compose_zip(left, right, result, scope),
            _ if op.is_terminal() => {
                return Err(CompileError::InvariantViolation(format!(
                    "{} cannot be used as a sequence",
                    op.name()
                )))
            }
            _ => {}
        }

        let source = single_source(op).ok_or_else(|| {
            CompileError::InvariantViolation(format!("{} has no source sequence", op.name()))
        })?;
        let current = self.compose(source, scope)?;
        if current.client.is_some() {
            return self.defer(current, op);
        }

        match op {
            QueryOp::Where { predicate, .. } => self.apply_where(current, predicate, scope),
            QueryOp::Select { selector, .. } => self.apply_select(current, selector, scope),
            QueryOp::SelectMany {
                collection, result, ..
            } => self.apply_select_many(current, collection, result.as_ref(), scope),
            QueryOp::GroupBy {
                key,
                element,
                result,
                ..
            } => self.apply_group_by(current, op, key, element.as_ref(), result.as_ref(), scope),
            QueryOp::OrderBy {
                key, descending, ..
            } => self.apply_order_by(current, key, *descending, false, scope),
            QueryOp::ThenBy {
                key, descending, ..
            } => self.apply_order_by(current, key, *descending, true, scope),
            QueryOp::Reverse { .. } => self.apply_reverse(current),
            QueryOp::Distinct { .. } => self.apply_distinct(current),
            QueryOp::Take { count, .. } => {
                let count = self.translate_value(count, scope)?;
                self.apply_take(current, count)
            }
            QueryOp::Skip { count, .. } => {
                let count = self.translate_value(count, scope)?;
                self.apply_skip(current, count)
            }
            QueryOp::TakeWhile { predicate, .. } => {
                self.apply_while(current, op, predicate, true, scope)
            }
            QueryOp::SkipWhile { predicate, .. } => {
                self.apply_while(current, op, predicate, false, scope)
            }
            QueryOp::DefaultIfEmpty { .. } => self.apply_default_if_empty(current),
            QueryOp::OfType {
                source,
                element_type,
            }
            | QueryOp::Cast {
                source,
                element_type,
            } => match source.element_type() {
                Some(ty) if ty == element_type => Ok(current),
                _ => Err(CompileError::Untranslatable(format!(
                    "{} to '{element_type}' over a sequence of a different element type",
                    op.name()
                ))),
            },
            other => Err(CompileError::InvariantViolation(format!(
                "unexpected operator {}",
                other.name()
            ))),
        }
    }

    fn base_table(&mut self, table: &Arc<TableDescriptor>) -> SelectNode {
        let alias = TableAlias::new(self.table_id(), table.alias_seed.clone());
        SelectNode::from_table(Arc::clone(table), alias)
    }

    fn compose_source(&mut self, expr: &Expr, scope: &Scope) -> CompileResult<Composed> {
        match self.translate(expr, scope)? {
            Shape::Collection(collection) => self.instantiate(*collection),
            Shape::Grouping(grouping) => self.instantiate(grouping.elements),
            Shape::Client(_) => Err(CompileError::Untranslatable(
                "an in-memory sequence cannot be queried on the server".to_string(),
            )),
            other => Err(CompileError::Untranslatable(format!(
                "{} is not a sequence",
                other.describe()
            ))),
        }
    }

    // ========================================================================
    // Client pipeline
    // ========================================================================

    /// Append `op` (over the current client pipeline) to the in-memory stages
    fn defer(&mut self, current: Composed, op: &QueryOp) -> CompileResult<Composed> {
        if op.lambdas().iter().any(|l| reads_table(&l.body)) {
            return Err(CompileError::Untranslatable(format!(
                "{} reads a table after in-memory evaluation has started",
                op.name()
            )));
        }
        Ok(self.append_client(current, |source| replace_source(op, source)))
    }

    pub(crate) fn append_client(
        &mut self,
        mut current: Composed,
        stage: impl FnOnce(Box<QueryOp>) -> QueryOp,
    ) -> Composed {
        let source = current.client.take().unwrap_or_else(rows_source);
        current.client = Some(stage(Box::new(source)));
        self.stats.client_operators += 1;
        current
    }

    // ========================================================================
    // Filtering and projection
    // ========================================================================

    pub(crate) fn apply_where(
        &mut self,
        mut current: Composed,
        predicate: &Lambda,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        let indexed = uses_index(predicate);
        let classifying = classify_scope(&current, predicate, scope)?;
        let split = split_predicate(&predicate.body, &classifying);
        if split.server.is_empty() || (indexed && !split.client.is_empty()) {
            let predicate = predicate.clone();
            return Ok(self.append_client(current, |source| QueryOp::Where { source, predicate }));
        }

        let mut index = None;
        if indexed {
            let (pushed, row_index) = self.push_down_numbered(current, RowNumbering::Index)?;
            current = pushed;
            index = Some(row_index);
        } else if current.select.is_complex() {
            current = self.push_down(current)?;
        }

        let client = split.client_predicate();
        let server = conjoin(split.server);
        let scope_in = bind_lambda(&mut current, predicate, index.clone(), scope)?;
        let mut translated = self.translate_predicate(&server, &scope_in)?;
        if !indexed && translated.contains_window_or_aggregate() {
            current = self.push_down(current)?;
            let scope_in = bind_lambda(&mut current, predicate, index, scope)?;
            translated = self.translate_predicate(&server, &scope_in)?;
        }
        current.select.add_predicate(translated);

        if let Some(client) = client {
            let predicate = Lambda::new(predicate.params.clone(), client);
            current = self.append_client(current, |source| QueryOp::Where { source, predicate });
        }
        Ok(current)
    }

    fn apply_select(
        &mut self,
        mut current: Composed,
        selector: &Lambda,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        let indexed = uses_index(selector);
        if current.select.limit == RowLimit::Distinct
            || (indexed && matches!(current.select.limit, RowLimit::Offset { .. }))
        {
            current = self.push_down(current)?;
        }
        let index = indexed.then(|| row_index(current.select.ordering.clone()));
        let scope_in = bind_lambda(&mut current, selector, index, scope)?;
        let shape = self.translate(&selector.body, &scope_in)?;
        current.select.set_shape(shape);
        current.order_keys.clear();
        Ok(current)
    }

    fn apply_group_by(
        &mut self,
        mut current: Composed,
        op: &QueryOp,
        key: &Lambda,
        element: Option<&Lambda>,
        result: Option<&Lambda>,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        if current.select.is_complex() {
            current = self.push_down(current)?;
        }
        current.select.ordering.clear();
        current.order_keys.clear();

        // The grouped rows are named by the first lambda reading the groups
        let key_scope = scope.bind(lambda_param(key)?, current.select.shape().clone());
        let key_shape = self.translate(&key.body, &key_scope)?;
        let element_shape = match element {
            Some(selector) => {
                let element_scope = scope.bind(lambda_param(selector)?, current.select.shape().clone());
                self.translate(&selector.body, &element_scope)?
            }
            None => current.select.shape().clone(),
        };
        if key_shape.has_client_parts() || element_shape.has_client_parts() {
            return self.defer(current, op);
        }
        if key_shape.has_collections() {
            return Err(CompileError::Untranslatable(
                "a grouping key must be made of scalar values".to_string(),
            ));
        }

        let keys: Vec<SqlExpr> = key_shape
            .columns()?
            .into_iter()
            .map(|c| c.expr)
            .filter(|e| !matches!(e, SqlExpr::Constant(_) | SqlExpr::Parameter(_)))
            .collect();
        if keys.is_empty() {
            return Err(CompileError::Untranslatable(
                "grouping by a key that does not depend on the row".to_string(),
            ));
        }

        let mut template = current.select.clone();
        template.set_shape(element_shape.clone());
        let elements = CollectionShape {
            element: element_shape.clone(),
            source: CollectionSource::Template {
                select: Box::new(template),
                correlation: Some(Correlation {
                    outer: key_shape.clone(),
                    inner: key_shape.clone(),
                    null_safe: true,
                }),
            },
        };
        current.select.grouping = keys;
        current
            .select
            .set_shape(Shape::Grouping(Box::new(GroupingShape {
                key: key_shape.clone(),
                elements,
                in_place: Some(element_shape),
            })));

        if let Some(result) = result {
            let (key_param, group_param) = lambda_params2(result)?;
            let scope_in = scope
                .bind(key_param, key_shape)
                .bind(group_param, current.select.shape().clone());
            let shape = self.translate(&result.body, &scope_in)?;
            current.select.set_shape(shape);
        }
        Ok(current)
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    fn apply_order_by(
        &mut self,
        mut current: Composed,
        key: &Lambda,
        descending: bool,
        then_by: bool,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        if !then_by && current.select.limit != RowLimit::None {
            current = self.push_down(current)?;
        }
        let scope_in = bind_lambda(&mut current, key, None, scope)?;
        let key_shape = self.translate(&key.body, &scope_in)?;

        if key_shape.has_client_parts() {
            let mut keys = if then_by {
                std::mem::take(&mut current.order_keys)
            } else {
                Vec::new()
            };
            keys.push((key.clone(), descending));
            current.select.ordering.clear();
            let mut chain = rows_source();
            for (i, (key, descending)) in keys.iter().enumerate() {
                let (key, descending, source) = (key.clone(), *descending, Box::new(chain));
                chain = if i == 0 {
                    QueryOp::OrderBy {
                        source,
                        key,
                        descending,
                    }
                } else {
                    QueryOp::ThenBy {
                        source,
                        key,
                        descending,
                    }
                };
            }
            current.client = Some(chain);
            current.order_keys = keys;
            self.stats.client_operators += 1;
            return Ok(current);
        }

        let terms = ordering_terms(&key_shape, descending)?;
        if then_by {
            current.select.ordering.extend(terms);
            current.order_keys.push((key.clone(), descending));
        } else {
            current.select.ordering = terms;
            current.order_keys = vec![(key.clone(), descending)];
        }
        Ok(current)
    }

    pub(crate) fn apply_reverse(&mut self, mut current: Composed) -> CompileResult<Composed> {
        if current.select.limit != RowLimit::None {
            current = self.push_down(current)?;
        }
        if current.select.ordering.is_empty() {
            current.select.ordering = vec![Ordering {
                expr: SqlExpr::RowNumber {
                    ordering: Vec::new(),
                },
                descending: true,
            }];
        } else {
            for term in &mut current.select.ordering {
                term.descending = !term.descending;
            }
        }
        for (_, descending) in &mut current.order_keys {
            *descending = !*descending;
        }
        Ok(current)
    }

    // ========================================================================
    // Row limits
    // ========================================================================

    fn apply_distinct(&mut self, mut current: Composed) -> CompileResult<Composed> {
        match current.select.limit {
            RowLimit::Distinct => return Ok(current),
            RowLimit::Top(_) | RowLimit::Offset { .. } => current = self.push_down(current)?,
            RowLimit::None => {}
        }
        current.select.ordering.clear();
        current.order_keys.clear();
        current.select.limit = RowLimit::Distinct;
        Ok(current)
    }

    pub(crate) fn apply_take(&mut self, mut current: Composed, count: SqlExpr) -> CompileResult<Composed> {
        if let RowLimit::Offset { fetch: fetch @ None, .. } = &mut current.select.limit {
            *fetch = Some(count);
            return Ok(current);
        }
        if current.select.limit != RowLimit::None {
            current = self.push_down(current)?;
        }
        current.select.limit = RowLimit::Top(count);
        Ok(current)
    }

    pub(crate) fn apply_skip(&mut self, mut current: Composed, count: SqlExpr) -> CompileResult<Composed> {
        if current.select.limit != RowLimit::None {
            current = self.push_down(current)?;
        }
        if current.select.ordering.is_empty() {
            current.select.ordering = vec![Ordering::asc(SqlExpr::RowNumber {
                ordering: Vec::new(),
            })];
        }
        current.select.limit = RowLimit::Offset {
            offset: count,
            fetch: None,
        };
        Ok(current)
    }

    /// TakeWhile / SkipWhile: compare each row number with the first row
    /// number failing the predicate
    fn apply_while(
        &mut self,
        current: Composed,
        op: &QueryOp,
        predicate: &Lambda,
        take: bool,
        scope: &Scope,
    ) -> CompileResult<Composed> {
        let classifying = classify_scope(&current, predicate, scope)?;
        if crate::translatability::classify(&predicate.body, &classifying) == Evaluation::Client {
            return self.defer(current, op);
        }

        let (mut current, row_number) = self.push_down_numbered(current, RowNumbering::Number)?;
        let param = lambda_param(predicate)?;
        pin_alias(&mut current.select, param);

        let mut copy = current.select.clone();
        let fresh = self.fresh_ids(&copy.defined_tables());
        copy.remap_tables(&fresh);
        let mut copy_number = row_number.clone();
        copy_number.for_each_mut(&mut |e| {
            if let SqlExpr::Column(c) = e {
                if let Some(id) = fresh.get(&c.table) {
                    c.table = *id;
                }
            }
        });

        let mut scope_in = scope.bind(param, copy.shape().clone());
        if let Some(index) = predicate.param(1) {
            scope_in = scope_in.bind(index, Shape::Scalar(minus_one(copy_number.clone())));
        }
        let failing = self.translate_negated(&predicate.body, &scope_in)?;
        copy.add_predicate(failing);
        copy.ordering.clear();
        copy.set_shape(Shape::Scalar(SqlExpr::Function {
            function: SqlFunction::Coalesce,
            args: vec![
                SqlExpr::Aggregate {
                    kind: AggregateKind::Min,
                    distinct: false,
                    operand: Some(Box::new(copy_number)),
                },
                SqlExpr::binary(SqlBinaryOp::Add, row_number.clone(), SqlExpr::constant(1)),
            ],
        }));

        let comparison = if take {
            SqlBinaryOp::Less
        } else {
            SqlBinaryOp::GreaterOrEqual
        };
        current.select.add_predicate(SqlExpr::binary(
            comparison,
            row_number,
            SqlExpr::ScalarSubquery(Box::new(copy)),
        ));
        Ok(current)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn rows_source() -> QueryOp {
    QueryOp::Source(Box::new(Expr::Parameter(ROWS_PARAMETER.to_string())))
}

/// The single input of a sequence operator
fn single_source(op: &QueryOp) -> Option<&QueryOp> {
    match op {
        QueryOp::Table(_)
        | QueryOp::Source(_)
        | QueryOp::Join { .. }
        | QueryOp::GroupJoin { .. }
        | QueryOp::SetOp { .. }
        | QueryOp::Zip { .. }
        | QueryOp::SequenceEqual { .. } => None,
        other => other.inputs().into_iter().next(),
    }
}

/// Copy of `op` reading from `source` instead of its own input
pub(crate) fn replace_source(op: &QueryOp, source: Box<QueryOp>) -> QueryOp {
    let mut op = op.clone();
    match &mut op {
        QueryOp::Where { source: s, .. }
        | QueryOp::Select { source: s, .. }
        | QueryOp::SelectMany { source: s, .. }
        | QueryOp::GroupBy { source: s, .. }
        | QueryOp::OrderBy { source: s, .. }
        | QueryOp::ThenBy { source: s, .. }
        | QueryOp::Reverse { source: s }
        | QueryOp::Distinct { source: s }
        | QueryOp::Take { source: s, .. }
        | QueryOp::Skip { source: s, .. }
        | QueryOp::TakeWhile { source: s, .. }
        | QueryOp::SkipWhile { source: s, .. }
        | QueryOp::DefaultIfEmpty { source: s }
        | QueryOp::OfType { source: s, .. }
        | QueryOp::Cast { source: s, .. }
        | QueryOp::Aggregate { source: s, .. }
        | QueryOp::Any { source: s, .. }
        | QueryOp::All { source: s, .. }
        | QueryOp::Contains { source: s, .. }
        | QueryOp::Element { source: s, .. }
        | QueryOp::ElementAt { source: s, .. } => *s = source,
        QueryOp::Table(_)
        | QueryOp::Source(_)
        | QueryOp::Join { .. }
        | QueryOp::GroupJoin { .. }
        | QueryOp::SetOp { .. }
        | QueryOp::Zip { .. }
        | QueryOp::SequenceEqual { .. } => {}
    }
    op
}

/// True when an indexed lambda actually reads its index parameter
pub(crate) fn uses_index(lambda: &Lambda) -> bool {
    lambda.is_indexed()
        && lambda
            .param(1)
            .is_some_and(|index| lambda.body.free_parameters().contains(index))
}

pub(crate) fn lambda_param(lambda: &Lambda) -> CompileResult<&str> {
    lambda
        .param(0)
        .ok_or_else(|| CompileError::InvariantViolation("lambda without parameters".to_string()))
}

pub(crate) fn lambda_params2(lambda: &Lambda) -> CompileResult<(&str, &str)> {
    match (lambda.param(0), lambda.param(1)) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(CompileError::InvariantViolation(
            "expected a two-parameter lambda".to_string(),
        )),
    }
}

/// Let a lambda parameter name the single table of a select
pub(crate) fn pin_alias(select: &mut SelectNode, name: &str) {
    if let Some(table) = select.from.as_mut() {
        pin_table(table, name);
    }
    // Group elements are read from the same table under the same name
    if let Shape::Grouping(grouping) = select.projection.shape_mut() {
        if let CollectionSource::Template { select, .. } = &mut grouping.elements.source {
            pin_alias(select, name);
        }
    }
}

/// Name an unpinned FROM item after a lambda parameter; a derived table
/// passes the name on to its own single unpinned table
pub(crate) fn pin_table(table: &mut TableRef, name: &str) {
    if name == "_" {
        return;
    }
    match table.alias_mut() {
        Some(alias) if !alias.pinned => {
            alias.hint = name.to_string();
            alias.pinned = true;
        }
        _ => return,
    }
    if let TableRef::Derived { select, .. } = table {
        if let Some(inner) = select.from.as_mut() {
            pin_table(inner, name);
        }
    }
}

/// Bind a lambda's element parameter (and index, when given) to the current rows
pub(crate) fn bind_lambda(
    current: &mut Composed,
    lambda: &Lambda,
    index: Option<SqlExpr>,
    scope: &Scope,
) -> CompileResult<Scope> {
    let param = lambda_param(lambda)?;
    pin_alias(&mut current.select, param);
    let mut bound = scope.bind(param, current.select.shape().clone());
    if let (Some(name), Some(index)) = (lambda.param(1), index) {
        bound = bound.bind(name, Shape::Scalar(index));
    }
    Ok(bound)
}

/// Bindings used only to classify a lambda body
pub(crate) fn classify_scope(current: &Composed, lambda: &Lambda, scope: &Scope) -> CompileResult<Scope> {
    let mut classifying = scope.bind(lambda_param(lambda)?, current.select.shape().clone());
    if let Some(index) = lambda.param(1) {
        classifying = classifying.bind(index, Shape::Scalar(SqlExpr::constant(0)));
    }
    Ok(classifying)
}

fn conjoin(parts: Vec<Expr>) -> Expr {
    let mut parts = parts.into_iter();
    let first = parts.next().unwrap_or(Expr::Constant(true.into()));
    parts.fold(first, |acc, part| Expr::Binary {
        op: crate::ast::BinaryOp::AndAlso,
        left: Box::new(acc),
        right: Box::new(part),
    })
}

pub(crate) fn minus_one(expr: SqlExpr) -> SqlExpr {
    SqlExpr::binary(SqlBinaryOp::Subtract, expr, SqlExpr::constant(1))
}

/// Zero-based index of a row under `ordering`
pub(crate) fn row_index(ordering: Vec<Ordering>) -> SqlExpr {
    SqlExpr::Cast {
        operand: Box::new(minus_one(SqlExpr::RowNumber { ordering })),
        ty: ValueType::Int32,
    }
}

/// Ordering terms for every scalar column of a key; constant terms are dropped
fn ordering_terms(key: &Shape, descending: bool) -> CompileResult<Vec<Ordering>> {
    let key = match key {
        Shape::Grouping(grouping) => &grouping.key,
        other => other,
    };
    if key.has_collections() {
        return Err(CompileError::Untranslatable(
            "cannot order by a collection".to_string(),
        ));
    }
    Ok(key
        .columns()?
        .into_iter()
        .filter(|c| !matches!(c.expr, SqlExpr::Constant(_) | SqlExpr::Parameter(_)))
        .map(|c| Ordering {
            expr: c.expr,
            descending,
        })
        .collect())
}
