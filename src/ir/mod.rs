//! Relational IR: select nodes, table references, scalar expressions and the
//! element shapes that projections carry.
//!
//! Tables are identified by a [`TableId`] allocated during composition; column
//! references point at ids, and the renderer turns ids into unique aliases. A
//! select node can therefore be copied and re-identified without renaming
//! anything textual.

use crate::ast::Expr;
use crate::catalog::TableDescriptor;
use crate::error::{CompileError, CompileResult};
use crate::value::{Value, ValueType};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Identity of a table reference within one compiled statement
pub type TableId = u32;

/// Pseudo table whose columns are the members of one decoded structured-array element
pub const ELEMENT_ROW: TableId = TableId::MAX;

/// Alias of a table reference: its identity plus a naming hint
#[derive(Debug, Clone, PartialEq)]
pub struct TableAlias {
    pub id: TableId,
    pub hint: String,
    /// Set once a lambda parameter has named the table
    pub pinned: bool,
}

impl TableAlias {
    pub fn new(id: TableId, hint: impl Into<String>) -> Self {
        TableAlias {
            id,
            hint: hint.into(),
            pinned: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: TableId,
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
}

/// Runtime parameter bound to a captured value slot
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSlot {
    /// Captured slot name (not the placeholder)
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
    /// Bound as one serialized collection
    pub serialized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlBinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    BitAnd,
    BitOr,
    BitXor,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
}

impl SqlBinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            SqlBinaryOp::Add => "+",
            SqlBinaryOp::Subtract => "-",
            SqlBinaryOp::Multiply => "*",
            SqlBinaryOp::Divide => "/",
            SqlBinaryOp::Modulo => "%",
            SqlBinaryOp::BitAnd => "&",
            SqlBinaryOp::BitOr => "|",
            SqlBinaryOp::BitXor => "^",
            SqlBinaryOp::Equal => "=",
            SqlBinaryOp::NotEqual => "<>",
            SqlBinaryOp::Less => "<",
            SqlBinaryOp::LessOrEqual => "<=",
            SqlBinaryOp::Greater => ">",
            SqlBinaryOp::GreaterOrEqual => ">=",
            SqlBinaryOp::And => "AND",
            SqlBinaryOp::Or => "OR",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            SqlBinaryOp::Equal
                | SqlBinaryOp::NotEqual
                | SqlBinaryOp::Less
                | SqlBinaryOp::LessOrEqual
                | SqlBinaryOp::Greater
                | SqlBinaryOp::GreaterOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, SqlBinaryOp::And | SqlBinaryOp::Or)
    }

    /// Comparison with operands swapped
    pub fn mirrored(&self) -> SqlBinaryOp {
        match self {
            SqlBinaryOp::Less => SqlBinaryOp::Greater,
            SqlBinaryOp::LessOrEqual => SqlBinaryOp::GreaterOrEqual,
            SqlBinaryOp::Greater => SqlBinaryOp::Less,
            SqlBinaryOp::GreaterOrEqual => SqlBinaryOp::LessOrEqual,
            other => *other,
        }
    }

    /// Negated comparison; NOT over a comparison is equivalent to its inverse
    /// under SQL's three-valued logic
    pub fn inverted(&self) -> Option<SqlBinaryOp> {
        match self {
            SqlBinaryOp::Equal => Some(SqlBinaryOp::NotEqual),
            SqlBinaryOp::NotEqual => Some(SqlBinaryOp::Equal),
            SqlBinaryOp::Less => Some(SqlBinaryOp::GreaterOrEqual),
            SqlBinaryOp::LessOrEqual => Some(SqlBinaryOp::Greater),
            SqlBinaryOp::Greater => Some(SqlBinaryOp::LessOrEqual),
            SqlBinaryOp::GreaterOrEqual => Some(SqlBinaryOp::Less),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlUnaryOp {
    Not,
    Negate,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Count,
    CountBig,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// Server scalar functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    Upper,
    Lower,
    LTrim,
    RTrim,
    Len,
    Substring,
    Replace,
    CharIndex,
    Left,
    Right,
    DatePart(DatePart),
    /// Date portion of a date/time
    DateOnly,
    Coalesce,
    Abs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub expr: SqlExpr,
    pub descending: bool,
}

impl Ordering {
    pub fn asc(expr: SqlExpr) -> Self {
        Ordering {
            expr,
            descending: false,
        }
    }
}

/// Right-hand side of an IN test
#[derive(Debug, Clone, PartialEq)]
pub enum InSource {
    Values(Vec<SqlExpr>),
    Select(Box<SelectNode>),
    /// Serialized collection bound as a single parameter
    Serialized(ParameterSlot),
}

/// Scalar expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column(ColumnRef),
    Constant(Value),
    Parameter(ParameterSlot),
    Binary {
        op: SqlBinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Unary { op: SqlUnaryOp, operand: Box<SqlExpr> },
    IsNull { operand: Box<SqlExpr>, negated: bool },
    Case {
        whens: Vec<(SqlExpr, SqlExpr)>,
        otherwise: Option<Box<SqlExpr>>,
    },
    Cast { operand: Box<SqlExpr>, ty: ValueType },
    Function { function: SqlFunction, args: Vec<SqlExpr> },
    /// Aggregate call; no operand means `*`
    Aggregate {
        kind: AggregateKind,
        distinct: bool,
        operand: Option<Box<SqlExpr>>,
    },
    /// Ranking function; an empty ordering is the constant no-op ordering
    RowNumber { ordering: Vec<Ordering> },
    Exists(Box<SelectNode>),
    ScalarSubquery(Box<SelectNode>),
    /// Correlated row set encoded as one structured-array value
    JsonArray(Box<SelectNode>),
    In { operand: Box<SqlExpr>, source: InSource },
    /// Raw dialect text
    Fragment { sql: String, ty: ValueType },
}

impl SqlExpr {
    pub fn column(table: TableId, name: &str, ty: ValueType, nullable: bool) -> SqlExpr {
        SqlExpr::Column(ColumnRef {
            table,
            name: name.to_string(),
            ty,
            nullable,
        })
    }

    pub fn constant(value: impl Into<Value>) -> SqlExpr {
        SqlExpr::Constant(value.into())
    }

    pub fn binary(op: SqlBinaryOp, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(SqlBinaryOp::And, left, right)
    }

    pub fn or(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(SqlBinaryOp::Or, left, right)
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::binary(SqlBinaryOp::Equal, left, right)
    }

    pub fn not(operand: SqlExpr) -> SqlExpr {
        SqlExpr::Unary {
            op: SqlUnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn is_null(operand: SqlExpr) -> SqlExpr {
        SqlExpr::IsNull {
            operand: Box::new(operand),
            negated: false,
        }
    }

    pub fn is_not_null(operand: SqlExpr) -> SqlExpr {
        SqlExpr::IsNull {
            operand: Box::new(operand),
            negated: true,
        }
    }

    /// Conjunction of all parts, `None` when empty
    pub fn conjunction(parts: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
        parts.into_iter().reduce(SqlExpr::and)
    }

    /// Flatten top-level AND operands
    pub fn conjuncts(&self) -> Vec<&SqlExpr> {
        match self {
            SqlExpr::Binary {
                op: SqlBinaryOp::And,
                left,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            SqlExpr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_true_constant(&self) -> bool {
        matches!(self, SqlExpr::Constant(Value::Bool(true)))
    }

    pub fn is_false_constant(&self) -> bool {
        matches!(self, SqlExpr::Constant(Value::Bool(false)))
    }

    /// Boolean-valued in predicate position (renders without `= 1`)
    pub fn is_predicate(&self) -> bool {
        match self {
            SqlExpr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            SqlExpr::Unary {
                op: SqlUnaryOp::Not,
                ..
            } => true,
            SqlExpr::IsNull { .. } | SqlExpr::Exists(_) | SqlExpr::In { .. } => true,
            _ => false,
        }
    }

    /// Declared type; a null literal is typed `int` like SQL Server's
    pub fn value_type(&self) -> ValueType {
        match self {
            SqlExpr::Column(c) => c.ty,
            SqlExpr::Constant(v) => v.value_type().unwrap_or(ValueType::Int32),
            SqlExpr::Parameter(p) => p.ty,
            SqlExpr::Binary { op, left, right } => {
                if op.is_comparison() || op.is_logical() {
                    ValueType::Bool
                } else {
                    left.value_type().widen(right.value_type())
                }
            }
            SqlExpr::Unary { op, operand } => match op {
                SqlUnaryOp::Not => ValueType::Bool,
                _ => operand.value_type(),
            },
            SqlExpr::IsNull { .. } | SqlExpr::Exists(_) | SqlExpr::In { .. } => ValueType::Bool,
            SqlExpr::Case { whens, otherwise } => whens
                .first()
                .map(|(_, then)| then.value_type())
                .or_else(|| otherwise.as_ref().map(|e| e.value_type()))
                .unwrap_or(ValueType::Int32),
            SqlExpr::Cast { ty, .. } | SqlExpr::Fragment { ty, .. } => *ty,
            SqlExpr::Function { function, args } => match function {
                SqlFunction::Len | SqlFunction::CharIndex | SqlFunction::DatePart(_) => {
                    ValueType::Int32
                }
                SqlFunction::DateOnly => ValueType::DateTime,
                SqlFunction::Coalesce | SqlFunction::Abs => args
                    .first()
                    .map_or(ValueType::Int32, SqlExpr::value_type),
                _ => ValueType::String,
            },
            SqlExpr::Aggregate { kind, operand, .. } => match kind {
                AggregateKind::Count => ValueType::Int32,
                AggregateKind::CountBig => ValueType::Int64,
                AggregateKind::Avg => ValueType::Float64,
                _ => operand.as_ref().map_or(ValueType::Int32, |e| e.value_type()),
            },
            SqlExpr::RowNumber { .. } => ValueType::Int64,
            SqlExpr::ScalarSubquery(select) => select
                .projection
                .shape()
                .as_scalar()
                .map_or(ValueType::Int32, SqlExpr::value_type),
            SqlExpr::JsonArray(_) => ValueType::Json,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            SqlExpr::Column(c) => c.nullable,
            SqlExpr::Constant(v) => v.is_null(),
            SqlExpr::Parameter(p) => p.nullable,
            SqlExpr::Binary { op, left, right } => {
                !(op.is_comparison() || op.is_logical()) && (left.is_nullable() || right.is_nullable())
            }
            SqlExpr::Unary { op, operand } => *op != SqlUnaryOp::Not && operand.is_nullable(),
            SqlExpr::IsNull { .. } | SqlExpr::Exists(_) | SqlExpr::In { .. } => false,
            SqlExpr::Case { whens, otherwise } => {
                otherwise.as_ref().map_or(true, |e| e.is_nullable())
                    || whens.iter().any(|(_, then)| then.is_nullable())
            }
            SqlExpr::Cast { operand, .. } => operand.is_nullable(),
            SqlExpr::Function { function, args } => match function {
                SqlFunction::Coalesce => args.iter().all(SqlExpr::is_nullable),
                _ => args.iter().any(SqlExpr::is_nullable),
            },
            SqlExpr::Aggregate { kind, .. } => {
                !matches!(kind, AggregateKind::Count | AggregateKind::CountBig)
            }
            SqlExpr::RowNumber { .. } => false,
            SqlExpr::ScalarSubquery(_) | SqlExpr::JsonArray(_) | SqlExpr::Fragment { .. } => true,
        }
    }

    /// True when the expression contains a ranking or aggregate call at this level
    pub fn contains_window_or_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, SqlExpr::RowNumber { .. } | SqlExpr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }
}

// ============================================================================
// Shapes and projections
// ============================================================================

/// Element shape of a sequence: how a result value is assembled from server
/// expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Leaf bound to one column
    Scalar(SqlExpr),
    /// Constructor or member initialization, members in order
    Object(Vec<(String, Shape)>),
    /// Possibly absent row of an outer join; absent when `flag` is null
    Optional { flag: SqlExpr, inner: Box<Shape> },
    Collection(Box<CollectionShape>),
    Grouping(Box<GroupingShape>),
    /// Evaluated in memory from materialized bindings
    Client(Box<ClientShape>),
}

/// Nested sequence inside an element
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionShape {
    pub source: CollectionSource,
    /// Element shape over the template's tables, or over [`ELEMENT_ROW`] when encoded
    pub element: Shape,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionSource {
    /// Rows of a query, re-identified at each use
    Template {
        select: Box<SelectNode>,
        correlation: Option<Correlation>,
    },
    /// Already encoded as a structured-array column
    Encoded(SqlExpr),
}

/// Equality linking template rows to the enclosing row
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    /// Over the enclosing query's tables
    pub outer: Shape,
    /// Over the template's tables
    pub inner: Shape,
    /// Null keys match each other (grouping), or never match (join)
    pub null_safe: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingShape {
    pub key: Shape,
    /// Raw elements, correlated on the key
    pub elements: CollectionShape,
    /// Element shape over the grouped node's own tables, while still in that node
    pub in_place: Option<Shape>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientShape {
    pub expr: Expr,
    pub bindings: Vec<(String, Shape)>,
}

impl Shape {
    pub fn as_scalar(&self) -> Option<&SqlExpr> {
        match self {
            Shape::Scalar(e) => Some(e),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Shape> {
        match self {
            Shape::Object(members) => members.iter().find(|(n, _)| n == name).map(|(_, s)| s),
            _ => None,
        }
    }

    /// Short description for diagnostics
    pub fn describe(&self) -> String {
        match self {
            Shape::Scalar(_) => "a scalar".to_string(),
            Shape::Object(members) => format!(
                "an object {{ {} }}",
                members.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>().join(", ")
            ),
            Shape::Optional { inner, .. } => format!("an optional {}", inner.describe()),
            Shape::Collection(_) => "a collection".to_string(),
            Shape::Grouping(_) => "a grouping".to_string(),
            Shape::Client(_) => "a client-evaluated value".to_string(),
        }
    }

    /// True when the shape (or any part) is evaluated in memory
    pub fn has_client_parts(&self) -> bool {
        match self {
            Shape::Client(_) => true,
            Shape::Scalar(_) => false,
            Shape::Object(members) => members.iter().any(|(_, s)| s.has_client_parts()),
            Shape::Optional { inner, .. } => inner.has_client_parts(),
            Shape::Collection(c) => c.element.has_client_parts(),
            Shape::Grouping(g) => g.key.has_client_parts() || g.elements.element.has_client_parts(),
        }
    }

    /// True when a nested collection occurs anywhere inside
    pub fn has_collections(&self) -> bool {
        match self {
            Shape::Collection(_) | Shape::Grouping(_) => true,
            Shape::Scalar(_) => false,
            Shape::Object(members) => members.iter().any(|(_, s)| s.has_collections()),
            Shape::Optional { inner, .. } => inner.has_collections(),
            Shape::Client(c) => c.bindings.iter().any(|(_, s)| s.has_collections()),
        }
    }

    /// Flattened projection columns, named by member path
    pub fn columns(&self) -> CompileResult<Vec<ProjectedColumn>> {
        self.columns_at("")
    }

    /// Flattened columns of this shape placed at member path `prefix`
    pub fn columns_at(&self, prefix: &str) -> CompileResult<Vec<ProjectedColumn>> {
        let mut out = Vec::new();
        flatten(self, prefix, &mut out)?;
        Ok(out)
    }

    /// Re-expose this shape as columns of `table` (the shape's node wrapped as that table).
    ///
    /// Nested collections must already be encoded. Groupings keep their
    /// element template, correlated on the lifted key.
    pub fn lift(&self, table: TableId, force_nullable: bool) -> CompileResult<Shape> {
        lift(self, "", table, force_nullable)
    }
}

/// One flattened projection column
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub name: String,
    pub expr: SqlExpr,
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Name of a scalar column at `path`; a root scalar takes its column's name
pub fn column_name(path: &str, expr: &SqlExpr) -> String {
    if !path.is_empty() {
        return path.to_string();
    }
    match expr {
        SqlExpr::Column(c) => c.name.clone(),
        _ => "$c".to_string(),
    }
}

fn flatten(shape: &Shape, path: &str, out: &mut Vec<ProjectedColumn>) -> CompileResult<()> {
    match shape {
        Shape::Scalar(expr) => out.push(ProjectedColumn {
            name: column_name(path, expr),
            expr: expr.clone(),
        }),
        Shape::Object(members) => {
            for (name, member) in members {
                flatten(member, &join_path(path, name), out)?;
            }
        }
        Shape::Optional { flag, inner } => {
            out.push(ProjectedColumn {
                name: join_path(path, "$empty"),
                expr: flag.clone(),
            });
            flatten(inner, path, out)?;
        }
        Shape::Collection(collection) => match &collection.source {
            CollectionSource::Encoded(expr) => out.push(ProjectedColumn {
                name: column_name(path, expr),
                expr: expr.clone(),
            }),
            CollectionSource::Template { .. } => {
                return Err(CompileError::InvariantViolation(format!(
                    "nested collection at '{path}' was not encoded before projection"
                )))
            }
        },
        Shape::Grouping(grouping) => {
            flatten(&grouping.key, &join_path(path, "Key"), out)?;
            if let CollectionSource::Encoded(expr) = &grouping.elements.source {
                out.push(ProjectedColumn {
                    name: join_path(path, "Elements"),
                    expr: expr.clone(),
                });
            }
        }
        Shape::Client(client) => {
            for (name, binding) in &client.bindings {
                flatten(binding, &join_path(path, name), out)?;
            }
        }
    }
    Ok(())
}

fn lift(shape: &Shape, path: &str, table: TableId, force_nullable: bool) -> CompileResult<Shape> {
    let column = |name: String, expr: &SqlExpr| {
        SqlExpr::Column(ColumnRef {
            table,
            name,
            ty: expr.value_type(),
            nullable: force_nullable || expr.is_nullable(),
        })
    };
    Ok(match shape {
        Shape::Scalar(expr) => Shape::Scalar(column(column_name(path, expr), expr)),
        Shape::Object(members) => Shape::Object(
            members
                .iter()
                .map(|(name, member)| {
                    Ok((name.clone(), lift(member, &join_path(path, name), table, force_nullable)?))
                })
                .collect::<CompileResult<_>>()?,
        ),
        Shape::Optional { flag, inner } => Shape::Optional {
            flag: column(join_path(path, "$empty"), flag),
            inner: Box::new(lift(inner, path, table, force_nullable)?),
        },
        Shape::Collection(collection) => match &collection.source {
            CollectionSource::Encoded(expr) => Shape::Collection(Box::new(CollectionShape {
                source: CollectionSource::Encoded(column(column_name(path, expr), expr)),
                element: collection.element.clone(),
            })),
            CollectionSource::Template { .. } => {
                return Err(CompileError::InvariantViolation(format!(
                    "nested collection at '{path}' must be encoded before pushdown"
                )))
            }
        },
        Shape::Grouping(grouping) => {
            let key = lift(&grouping.key, &join_path(path, "Key"), table, force_nullable)?;
            let mut elements = grouping.elements.clone();
            if let CollectionSource::Template {
                correlation: Some(correlation),
                ..
            } = &mut elements.source
            {
                correlation.outer = key.clone();
            }
            if let CollectionSource::Encoded(expr) = &elements.source {
                elements.source =
                    CollectionSource::Encoded(column(join_path(path, "Elements"), expr));
            }
            Shape::Grouping(Box::new(GroupingShape {
                key,
                elements,
                in_place: None,
            }))
        }
        Shape::Client(client) => Shape::Client(Box::new(ClientShape {
            expr: client.expr.clone(),
            bindings: client
                .bindings
                .iter()
                .map(|(name, binding)| {
                    Ok((name.clone(), lift(binding, &join_path(path, name), table, force_nullable)?))
                })
                .collect::<CompileResult<_>>()?,
        })),
    })
}

/// Projection of a select node
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Leaves are scalar server expressions
    Server(Shape),
    /// Root is a grouping: key plus (possibly unmaterialized) elements
    Grouping(Shape),
    /// Contains nested correlated collections
    Composite(Shape),
}

impl Projection {
    pub fn new(shape: Shape) -> Self {
        match shape {
            Shape::Grouping(_) => Projection::Grouping(shape),
            s if s.has_collections() => Projection::Composite(s),
            s => Projection::Server(s),
        }
    }

    pub fn shape(&self) -> &Shape {
        match self {
            Projection::Server(s) | Projection::Grouping(s) | Projection::Composite(s) => s,
        }
    }

    pub fn shape_mut(&mut self) -> &mut Shape {
        match self {
            Projection::Server(s) | Projection::Grouping(s) | Projection::Composite(s) => s,
        }
    }

    pub fn into_shape(self) -> Shape {
        match self {
            Projection::Server(s) | Projection::Grouping(s) | Projection::Composite(s) => s,
        }
    }
}

// ============================================================================
// Select nodes and table references
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RowLimit {
    None,
    Distinct,
    Top(SqlExpr),
    Offset {
        offset: SqlExpr,
        fetch: Option<SqlExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
    CrossApply,
    OuterApply,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetKind {
    Union,
    UnionAll,
    Except,
    Intersect,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Base {
        table: Arc<TableDescriptor>,
        alias: TableAlias,
    },
    Derived {
        select: Box<SelectNode>,
        alias: TableAlias,
    },
    Join {
        kind: JoinKind,
        left: Box<TableRef>,
        right: Box<TableRef>,
        on: Option<SqlExpr>,
    },
    SetOp {
        kind: SetKind,
        left: Box<SelectNode>,
        right: Box<SelectNode>,
        alias: TableAlias,
    },
}

impl TableRef {
    /// Alias of a single (non-join) reference
    pub fn alias(&self) -> Option<&TableAlias> {
        match self {
            TableRef::Base { alias, .. }
            | TableRef::Derived { alias, .. }
            | TableRef::SetOp { alias, .. } => Some(alias),
            TableRef::Join { .. } => None,
        }
    }

    pub fn alias_mut(&mut self) -> Option<&mut TableAlias> {
        match self {
            TableRef::Base { alias, .. }
            | TableRef::Derived { alias, .. }
            | TableRef::SetOp { alias, .. } => Some(alias),
            TableRef::Join { .. } => None,
        }
    }

    /// Ids visible to the enclosing select (not descending into derived tables)
    pub fn visible_ids(&self) -> Vec<TableId> {
        match self {
            TableRef::Join { left, right, .. } => {
                let mut ids = left.visible_ids();
                ids.extend(right.visible_ids());
                ids
            }
            other => other.alias().map(|a| a.id).into_iter().collect(),
        }
    }

    pub fn join(kind: JoinKind, left: TableRef, right: TableRef, on: Option<SqlExpr>) -> TableRef {
        TableRef::Join {
            kind,
            left: Box::new(left),
            right: Box::new(right),
            on,
        }
    }
}

/// One SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectNode {
    pub projection: Projection,
    pub from: Option<TableRef>,
    pub predicate: Option<SqlExpr>,
    pub grouping: Vec<SqlExpr>,
    pub having: Option<SqlExpr>,
    pub ordering: Vec<Ordering>,
    pub limit: RowLimit,
    /// Extra output columns after the shape's own (row numbers, carried sort keys)
    pub hidden: Vec<ProjectedColumn>,
}

impl SelectNode {
    pub fn new(shape: Shape, from: Option<TableRef>) -> Self {
        SelectNode {
            projection: Projection::new(shape),
            hidden: Vec::new(),
            from,
            predicate: None,
            grouping: Vec::new(),
            having: None,
            ordering: Vec::new(),
            limit: RowLimit::None,
        }
    }

    /// `SELECT <columns> FROM <table>` with the table's mapped columns as an object
    pub fn from_table(table: Arc<TableDescriptor>, alias: TableAlias) -> Self {
        let shape = Shape::Object(
            table
                .columns
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        Shape::Scalar(SqlExpr::column(alias.id, &c.name, c.ty, c.nullable)),
                    )
                })
                .collect(),
        );
        SelectNode::new(shape, Some(TableRef::Base { table, alias }))
    }

    pub fn shape(&self) -> &Shape {
        self.projection.shape()
    }

    pub fn set_shape(&mut self, shape: Shape) {
        self.projection = Projection::new(shape);
    }

    /// Every output column in order: the shape's, then hidden ones
    pub fn output_columns(&self) -> CompileResult<Vec<ProjectedColumn>> {
        let mut columns = self.shape().columns()?;
        columns.extend(self.hidden.iter().cloned());
        Ok(columns)
    }

    /// A node with a row limit or grouping must be wrapped before
    /// non-distributive operators are applied
    pub fn is_complex(&self) -> bool {
        self.limit != RowLimit::None || !self.grouping.is_empty()
    }

    /// Nothing but a projection over one base table
    pub fn is_plain_table(&self) -> bool {
        matches!(self.from, Some(TableRef::Base { .. }))
            && self.predicate.is_none()
            && self.grouping.is_empty()
            && self.having.is_none()
            && self.ordering.is_empty()
            && self.limit == RowLimit::None
    }

    /// Simple enough to merge its FROM and WHERE into another node
    pub fn is_simple(&self) -> bool {
        !self.is_complex() && self.having.is_none() && self.ordering.is_empty()
    }

    pub fn add_predicate(&mut self, predicate: SqlExpr) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => SqlExpr::and(existing, predicate),
            None => predicate,
        });
    }
}

// ============================================================================
// Traversal
// ============================================================================
//
// Every select node is visited exactly once: its own expressions are walked
// shallowly and nested selects (derived tables, set operands, subqueries,
// collection templates) are reached through explicit recursion.

impl SqlExpr {
    /// Pre-order visit that does not enter subqueries
    pub fn walk(&self, f: &mut dyn FnMut(&SqlExpr)) {
        f(self);
        match self {
            SqlExpr::Column(_)
            | SqlExpr::Constant(_)
            | SqlExpr::Parameter(_)
            | SqlExpr::Fragment { .. }
            | SqlExpr::Exists(_)
            | SqlExpr::ScalarSubquery(_)
            | SqlExpr::JsonArray(_) => {}
            SqlExpr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            SqlExpr::Unary { operand, .. }
            | SqlExpr::IsNull { operand, .. }
            | SqlExpr::Cast { operand, .. } => operand.walk(f),
            SqlExpr::Case { whens, otherwise } => {
                for (when, then) in whens {
                    when.walk(f);
                    then.walk(f);
                }
                if let Some(e) = otherwise {
                    e.walk(f);
                }
            }
            SqlExpr::Function { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            SqlExpr::Aggregate { operand, .. } => {
                if let Some(e) = operand {
                    e.walk(f);
                }
            }
            SqlExpr::RowNumber { ordering } => {
                for o in ordering {
                    o.expr.walk(f);
                }
            }
            SqlExpr::In { operand, source } => {
                operand.walk(f);
                if let InSource::Values(values) = source {
                    for v in values {
                        v.walk(f);
                    }
                }
            }
        }
    }

    /// Post-order mutable visit that does not enter subqueries
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut SqlExpr)) {
        match self {
            SqlExpr::Column(_)
            | SqlExpr::Constant(_)
            | SqlExpr::Parameter(_)
            | SqlExpr::Fragment { .. }
            | SqlExpr::Exists(_)
            | SqlExpr::ScalarSubquery(_)
            | SqlExpr::JsonArray(_) => {}
            SqlExpr::Binary { left, right, .. } => {
                left.walk_mut(f);
                right.walk_mut(f);
            }
            SqlExpr::Unary { operand, .. }
            | SqlExpr::IsNull { operand, .. }
            | SqlExpr::Cast { operand, .. } => operand.walk_mut(f),
            SqlExpr::Case { whens, otherwise } => {
                for (when, then) in whens {
                    when.walk_mut(f);
                    then.walk_mut(f);
                }
                if let Some(e) = otherwise {
                    e.walk_mut(f);
                }
            }
            SqlExpr::Function { args, .. } => {
                for arg in args {
                    arg.walk_mut(f);
                }
            }
            SqlExpr::Aggregate { operand, .. } => {
                if let Some(e) = operand {
                    e.walk_mut(f);
                }
            }
            SqlExpr::RowNumber { ordering } => {
                for o in ordering {
                    o.expr.walk_mut(f);
                }
            }
            SqlExpr::In { operand, source } => {
                operand.walk_mut(f);
                if let InSource::Values(values) = source {
                    for v in values {
                        v.walk_mut(f);
                    }
                }
            }
        }
        f(self);
    }

    /// Subqueries directly inside this expression
    pub fn subqueries(&self) -> Vec<&SelectNode> {
        let mut out = Vec::new();
        collect_subqueries(self, &mut out);
        out
    }

    /// Deep visit, entering subqueries
    pub fn for_each(&self, f: &mut dyn FnMut(&SqlExpr)) {
        self.walk(f);
        for select in self.subqueries() {
            select.for_each_expr(f);
        }
    }

    /// Deep mutable visit, entering subqueries
    pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut SqlExpr)) {
        let mut subqueries = Vec::new();
        collect_subqueries_mut(self, &mut subqueries);
        for select in subqueries {
            select.for_each_expr_mut(f);
        }
        self.walk_mut(f);
    }

    fn remap_tables(&mut self, map: &HashMap<TableId, TableId>) {
        let mut subqueries = Vec::new();
        collect_subqueries_mut(self, &mut subqueries);
        for select in subqueries {
            select.remap_tables(map);
        }
        self.walk_mut(&mut |e| remap_column(e, map));
    }
}

fn collect_subqueries<'a>(expr: &'a SqlExpr, out: &mut Vec<&'a SelectNode>) {
    match expr {
        SqlExpr::Column(_)
        | SqlExpr::Constant(_)
        | SqlExpr::Parameter(_)
        | SqlExpr::Fragment { .. } => {}
        SqlExpr::Exists(s) | SqlExpr::ScalarSubquery(s) | SqlExpr::JsonArray(s) => out.push(s),
        SqlExpr::Binary { left, right, .. } => {
            collect_subqueries(left, out);
            collect_subqueries(right, out);
        }
        SqlExpr::Unary { operand, .. }
        | SqlExpr::IsNull { operand, .. }
        | SqlExpr::Cast { operand, .. } => collect_subqueries(operand, out),
        SqlExpr::Case { whens, otherwise } => {
            for (when, then) in whens {
                collect_subqueries(when, out);
                collect_subqueries(then, out);
            }
            if let Some(e) = otherwise {
                collect_subqueries(e, out);
            }
        }
        SqlExpr::Function { args, .. } => {
            for arg in args {
                collect_subqueries(arg, out);
            }
        }
        SqlExpr::Aggregate { operand, .. } => {
            if let Some(e) = operand {
                collect_subqueries(e, out);
            }
        }
        SqlExpr::RowNumber { ordering } => {
            for o in ordering {
                collect_subqueries(&o.expr, out);
            }
        }
        SqlExpr::In { operand, source } => {
            collect_subqueries(operand, out);
            match source {
                InSource::Values(values) => {
                    for v in values {
                        collect_subqueries(v, out);
                    }
                }
                InSource::Select(s) => out.push(s),
                InSource::Serialized(_) => {}
            }
        }
    }
}

fn collect_subqueries_mut<'a>(expr: &'a mut SqlExpr, out: &mut Vec<&'a mut SelectNode>) {
    match expr {
        SqlExpr::Column(_)
        | SqlExpr::Constant(_)
        | SqlExpr::Parameter(_)
        | SqlExpr::Fragment { .. } => {}
        SqlExpr::Exists(s) | SqlExpr::ScalarSubquery(s) | SqlExpr::JsonArray(s) => out.push(s),
        SqlExpr::Binary { left, right, .. } => {
            collect_subqueries_mut(left, out);
            collect_subqueries_mut(right, out);
        }
        SqlExpr::Unary { operand, .. }
        | SqlExpr::IsNull { operand, .. }
        | SqlExpr::Cast { operand, .. } => collect_subqueries_mut(operand, out),
        SqlExpr::Case { whens, otherwise } => {
            for (when, then) in whens {
                collect_subqueries_mut(when, out);
                collect_subqueries_mut(then, out);
            }
            if let Some(e) = otherwise {
                collect_subqueries_mut(e, out);
            }
        }
        SqlExpr::Function { args, .. } => {
            for arg in args {
                collect_subqueries_mut(arg, out);
            }
        }
        SqlExpr::Aggregate { operand, .. } => {
            if let Some(e) = operand {
                collect_subqueries_mut(e, out);
            }
        }
        SqlExpr::RowNumber { ordering } => {
            for o in ordering {
                collect_subqueries_mut(&mut o.expr, out);
            }
        }
        SqlExpr::In { operand, source } => {
            collect_subqueries_mut(operand, out);
            match source {
                InSource::Values(values) => {
                    for v in values {
                        collect_subqueries_mut(v, out);
                    }
                }
                InSource::Select(s) => out.push(s),
                InSource::Serialized(_) => {}
            }
        }
    }
}

fn remap_column(expr: &mut SqlExpr, map: &HashMap<TableId, TableId>) {
    if let SqlExpr::Column(c) = expr {
        if let Some(id) = map.get(&c.table) {
            c.table = *id;
        }
    }
}

/// Parts of a select node that belong to it directly
struct Parts<'a> {
    exprs: Vec<&'a SqlExpr>,
    selects: Vec<&'a SelectNode>,
    aliases: Vec<&'a TableAlias>,
}

struct PartsMut<'a> {
    exprs: Vec<&'a mut SqlExpr>,
    selects: Vec<&'a mut SelectNode>,
    aliases: Vec<&'a mut TableAlias>,
}

impl Shape {
    fn parts<'a>(&'a self, exprs: &mut Vec<&'a SqlExpr>, selects: &mut Vec<&'a SelectNode>) {
        match self {
            Shape::Scalar(e) => exprs.push(e),
            Shape::Object(members) => {
                for (_, m) in members {
                    m.parts(exprs, selects);
                }
            }
            Shape::Optional { flag, inner } => {
                exprs.push(flag);
                inner.parts(exprs, selects);
            }
            Shape::Collection(c) => c.parts(exprs, selects),
            Shape::Grouping(g) => {
                g.key.parts(exprs, selects);
                g.elements.parts(exprs, selects);
                if let Some(s) = &g.in_place {
                    s.parts(exprs, selects);
                }
            }
            Shape::Client(c) => {
                for (_, b) in &c.bindings {
                    b.parts(exprs, selects);
                }
            }
        }
    }

    fn parts_mut<'a>(
        &'a mut self,
        exprs: &mut Vec<&'a mut SqlExpr>,
        selects: &mut Vec<&'a mut SelectNode>,
    ) {
        match self {
            Shape::Scalar(e) => exprs.push(e),
            Shape::Object(members) => {
                for (_, m) in members {
                    m.parts_mut(exprs, selects);
                }
            }
            Shape::Optional { flag, inner } => {
                exprs.push(flag);
                inner.parts_mut(exprs, selects);
            }
            Shape::Collection(c) => c.parts_mut(exprs, selects),
            Shape::Grouping(g) => {
                g.key.parts_mut(exprs, selects);
                g.elements.parts_mut(exprs, selects);
                if let Some(s) = &mut g.in_place {
                    s.parts_mut(exprs, selects);
                }
            }
            Shape::Client(c) => {
                for (_, b) in &mut c.bindings {
                    b.parts_mut(exprs, selects);
                }
            }
        }
    }

    /// Deep visit of every scalar expression, including collection templates
    pub fn for_each_expr(&self, f: &mut dyn FnMut(&SqlExpr)) {
        let (mut exprs, mut selects) = (Vec::new(), Vec::new());
        self.parts(&mut exprs, &mut selects);
        for e in exprs {
            e.for_each(f);
        }
        for s in selects {
            s.for_each_expr(f);
        }
    }

    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut SqlExpr)) {
        let (mut exprs, mut selects) = (Vec::new(), Vec::new());
        self.parts_mut(&mut exprs, &mut selects);
        for e in exprs {
            e.for_each_mut(f);
        }
        for s in selects {
            s.for_each_expr_mut(f);
        }
    }

    /// Ids of tables defined by templates and subqueries inside this shape
    pub fn defined_tables(&self) -> HashSet<TableId> {
        let (mut exprs, mut selects) = (Vec::new(), Vec::new());
        self.parts(&mut exprs, &mut selects);
        let mut out = HashSet::new();
        for s in exprs.into_iter().flat_map(SqlExpr::subqueries).chain(selects) {
            out.extend(s.defined_tables());
        }
        out
    }

    /// Ids of tables this shape reads from outside its own templates
    pub fn outer_references(&self) -> HashSet<TableId> {
        let defined = self.defined_tables();
        let mut out = HashSet::new();
        self.for_each_expr(&mut |e| {
            if let SqlExpr::Column(c) = e {
                if c.table != ELEMENT_ROW && !defined.contains(&c.table) {
                    out.insert(c.table);
                }
            }
        });
        out
    }

    /// Replace table ids in aliases and column references
    pub fn remap_tables(&mut self, map: &HashMap<TableId, TableId>) {
        let (mut exprs, mut selects) = (Vec::new(), Vec::new());
        self.parts_mut(&mut exprs, &mut selects);
        for e in exprs {
            e.remap_tables(map);
        }
        for s in selects {
            s.remap_tables(map);
        }
    }
}

impl CollectionShape {
    fn parts<'a>(&'a self, exprs: &mut Vec<&'a SqlExpr>, selects: &mut Vec<&'a SelectNode>) {
        match &self.source {
            CollectionSource::Template {
                select,
                correlation,
            } => {
                selects.push(select);
                if let Some(c) = correlation {
                    c.outer.parts(exprs, selects);
                    c.inner.parts(exprs, selects);
                }
                self.element.parts(exprs, selects);
            }
            // Encoded element shapes read the element row, not any table
            CollectionSource::Encoded(e) => exprs.push(e),
        }
    }

    fn parts_mut<'a>(
        &'a mut self,
        exprs: &mut Vec<&'a mut SqlExpr>,
        selects: &mut Vec<&'a mut SelectNode>,
    ) {
        match &mut self.source {
            CollectionSource::Template {
                select,
                correlation,
            } => {
                selects.push(select);
                if let Some(c) = correlation {
                    c.outer.parts_mut(exprs, selects);
                    c.inner.parts_mut(exprs, selects);
                }
                self.element.parts_mut(exprs, selects);
            }
            CollectionSource::Encoded(e) => exprs.push(e),
        }
    }
}

impl TableRef {
    fn parts<'a>(&'a self, parts: &mut Parts<'a>) {
        match self {
            TableRef::Base { alias, .. } => parts.aliases.push(alias),
            TableRef::Derived { select, alias } => {
                parts.aliases.push(alias);
                parts.selects.push(select);
            }
            TableRef::Join {
                left, right, on, ..
            } => {
                left.parts(parts);
                right.parts(parts);
                if let Some(on) = on {
                    parts.exprs.push(on);
                }
            }
            TableRef::SetOp {
                left, right, alias, ..
            } => {
                parts.aliases.push(alias);
                parts.selects.push(left);
                parts.selects.push(right);
            }
        }
    }

    fn parts_mut<'a>(&'a mut self, parts: &mut PartsMut<'a>) {
        match self {
            TableRef::Base { alias, .. } => parts.aliases.push(alias),
            TableRef::Derived { select, alias } => {
                parts.aliases.push(alias);
                parts.selects.push(select);
            }
            TableRef::Join {
                left, right, on, ..
            } => {
                left.parts_mut(parts);
                right.parts_mut(parts);
                if let Some(on) = on {
                    parts.exprs.push(on);
                }
            }
            TableRef::SetOp {
                left, right, alias, ..
            } => {
                parts.aliases.push(alias);
                parts.selects.push(left);
                parts.selects.push(right);
            }
        }
    }
}

impl SelectNode {
    fn parts(&self) -> Parts<'_> {
        let mut parts = Parts {
            exprs: Vec::new(),
            selects: Vec::new(),
            aliases: Vec::new(),
        };
        if let Some(from) = &self.from {
            from.parts(&mut parts);
        }
        self.projection
            .shape()
            .parts(&mut parts.exprs, &mut parts.selects);
        parts.exprs.extend(self.hidden.iter().map(|c| &c.expr));
        parts.exprs.extend(self.predicate.iter());
        parts.exprs.extend(self.grouping.iter());
        parts.exprs.extend(self.having.iter());
        parts.exprs.extend(self.ordering.iter().map(|o| &o.expr));
        match &self.limit {
            RowLimit::Top(n) => parts.exprs.push(n),
            RowLimit::Offset { offset, fetch } => {
                parts.exprs.push(offset);
                parts.exprs.extend(fetch.iter());
            }
            RowLimit::None | RowLimit::Distinct => {}
        }
        parts
    }

    fn parts_mut(&mut self) -> PartsMut<'_> {
        let mut parts = PartsMut {
            exprs: Vec::new(),
            selects: Vec::new(),
            aliases: Vec::new(),
        };
        let SelectNode {
            projection,
            from,
            predicate,
            grouping,
            having,
            ordering,
            limit,
            hidden,
        } = self;
        if let Some(from) = from {
            from.parts_mut(&mut parts);
        }
        projection
            .shape_mut()
            .parts_mut(&mut parts.exprs, &mut parts.selects);
        parts.exprs.extend(hidden.iter_mut().map(|c| &mut c.expr));
        parts.exprs.extend(predicate.iter_mut());
        parts.exprs.extend(grouping.iter_mut());
        parts.exprs.extend(having.iter_mut());
        parts.exprs.extend(ordering.iter_mut().map(|o| &mut o.expr));
        match limit {
            RowLimit::Top(n) => parts.exprs.push(n),
            RowLimit::Offset { offset, fetch } => {
                parts.exprs.push(offset);
                parts.exprs.extend(fetch.iter_mut());
            }
            RowLimit::None | RowLimit::Distinct => {}
        }
        parts
    }

    /// Pre-order visit of this node and every nested select node
    pub fn for_each_select(&self, f: &mut dyn FnMut(&SelectNode)) {
        f(self);
        let parts = self.parts();
        for e in parts.exprs {
            for s in e.subqueries() {
                s.for_each_select(f);
            }
        }
        for s in parts.selects {
            s.for_each_select(f);
        }
    }

    /// Post-order mutable visit of every nested select node and then this one
    pub fn for_each_select_mut(&mut self, f: &mut dyn FnMut(&mut SelectNode)) {
        {
            let parts = self.parts_mut();
            for e in parts.exprs {
                let mut subqueries = Vec::new();
                collect_subqueries_mut(e, &mut subqueries);
                for s in subqueries {
                    s.for_each_select_mut(f);
                }
            }
            for s in parts.selects {
                s.for_each_select_mut(f);
            }
        }
        f(self);
    }

    /// Deep visit of every scalar expression
    pub fn for_each_expr(&self, f: &mut dyn FnMut(&SqlExpr)) {
        self.for_each_select(&mut |s| {
            for e in s.parts().exprs {
                e.walk(f);
            }
        });
    }

    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut SqlExpr)) {
        self.for_each_select_mut(&mut |s| {
            for e in s.parts_mut().exprs {
                e.walk_mut(f);
            }
        });
    }

    /// Every table alias defined in this node or any nested select
    pub fn for_each_alias(&self, f: &mut dyn FnMut(&TableAlias)) {
        self.for_each_select(&mut |s| {
            for alias in s.parts().aliases {
                f(alias);
            }
        });
    }

    pub fn for_each_alias_mut(&mut self, f: &mut dyn FnMut(&mut TableAlias)) {
        self.for_each_select_mut(&mut |s| {
            for alias in s.parts_mut().aliases {
                f(alias);
            }
        });
    }

    /// Ids of every table reference defined anywhere inside this node
    pub fn defined_tables(&self) -> HashSet<TableId> {
        let mut out = HashSet::new();
        self.for_each_alias(&mut |alias| {
            out.insert(alias.id);
        });
        out
    }

    /// Ids of tables referenced by columns anywhere inside this node
    pub fn referenced_tables(&self) -> HashSet<TableId> {
        let mut out = HashSet::new();
        self.for_each_expr(&mut |e| {
            if let SqlExpr::Column(c) = e {
                out.insert(c.table);
            }
        });
        out
    }

    /// Referenced tables defined outside this node
    pub fn outer_references(&self) -> HashSet<TableId> {
        let defined = self.defined_tables();
        self.referenced_tables()
            .into_iter()
            .filter(|id| *id != ELEMENT_ROW && !defined.contains(id))
            .collect()
    }

    pub fn is_correlated(&self) -> bool {
        !self.outer_references().is_empty()
    }

    /// Number of select nodes in this tree, including subqueries
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.for_each_select(&mut |_| count += 1);
        count
    }

    /// Replace table ids in aliases and column references
    pub fn remap_tables(&mut self, map: &HashMap<TableId, TableId>) {
        self.for_each_select_mut(&mut |s| {
            let parts = s.parts_mut();
            for alias in parts.aliases {
                if let Some(id) = map.get(&alias.id) {
                    alias.id = *id;
                }
            }
            for e in parts.exprs {
                e.walk_mut(&mut |e| remap_column(e, map));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("dbo", "MyClass1")
                .nullable_column("Prop1", ValueType::String)
                .column("Prop2", ValueType::Int32),
        )
    }

    #[test]
    fn test_base_shape_columns() {
        let node = SelectNode::from_table(table(), TableAlias::new(1, "m"));
        let columns = node.shape().columns().expect("flattens");
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Prop1", "Prop2"]);
        assert!(!node.is_complex());
        assert!(node.is_plain_table());
    }

    #[test]
    fn test_nested_member_paths_are_dotted() {
        let node = SelectNode::from_table(table(), TableAlias::new(1, "m"));
        let shape = Shape::Object(vec![
            ("m".to_string(), node.shape().clone()),
            ("i".to_string(), Shape::Scalar(SqlExpr::constant(1))),
        ]);
        let names: Vec<_> = shape
            .columns()
            .expect("flattens")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["m.Prop1", "m.Prop2", "i"]);
    }

    #[test]
    fn test_lift_points_at_wrapping_table() {
        let node = SelectNode::from_table(table(), TableAlias::new(1, "m"));
        let lifted = node.shape().lift(7, false).expect("lifts");
        let prop1 = lifted.member("Prop1").and_then(Shape::as_scalar).and_then(SqlExpr::as_column);
        assert_eq!(prop1.map(|c| (c.table, c.name.as_str(), c.nullable)), Some((7, "Prop1", true)));
    }

    #[test]
    fn test_root_scalar_takes_column_name() {
        let shape = Shape::Scalar(SqlExpr::column(3, "Prop2", ValueType::Int32, false));
        assert_eq!(shape.columns().expect("flattens")[0].name, "Prop2");
        let shape = Shape::Scalar(SqlExpr::constant(1));
        assert_eq!(shape.columns().expect("flattens")[0].name, "$c");
    }

    #[test]
    fn test_correlation_detection_and_remap() {
        let mut inner = SelectNode::from_table(table(), TableAlias::new(2, "z"));
        inner.add_predicate(SqlExpr::eq(
            SqlExpr::column(2, "Prop2", ValueType::Int32, false),
            SqlExpr::column(1, "Prop2", ValueType::Int32, false),
        ));
        assert!(inner.is_correlated());
        assert_eq!(inner.outer_references().into_iter().collect::<Vec<_>>(), vec![1]);

        let map: HashMap<TableId, TableId> = [(2, 9)].into_iter().collect();
        inner.remap_tables(&map);
        assert!(inner.defined_tables().contains(&9));
        assert!(!inner.referenced_tables().contains(&2));
    }

    #[test]
    fn test_unencoded_collection_cannot_be_projected() {
        let template = SelectNode::from_table(table(), TableAlias::new(2, "z"));
        let shape = Shape::Collection(Box::new(CollectionShape {
            element: template.shape().clone(),
            source: CollectionSource::Template {
                select: Box::new(template),
                correlation: None,
            },
        }));
        assert!(matches!(shape.columns(), Err(CompileError::InvariantViolation(_))));
    }

    #[test]
    fn test_nullability_of_comparisons() {
        let col = SqlExpr::column(1, "Prop1", ValueType::String, true);
        assert!(col.is_nullable());
        let cmp = SqlExpr::eq(col, SqlExpr::constant("x"));
        assert!(!cmp.is_nullable());
        assert!(cmp.is_predicate());
        assert_eq!(cmp.value_type(), ValueType::Bool);
    }
}
