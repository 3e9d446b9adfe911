//! Builder Patterns for Operator Trees
//!
//! Fluent APIs for composing queries: [`Query`] folds sequence operators onto
//! a source, and the combinators on [`Expr`] build lambda bodies.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use sqlweave::ast::builders::{captured, lambda, new_object, Query};
//! use sqlweave::catalog::TableDescriptor;
//! use sqlweave::value::ValueType;
//!
//! let table = Arc::new(
//!     TableDescriptor::new("dbo", "MyClass1")
//!         .nullable_column("Prop1", ValueType::String)
//!         .column("Prop2", ValueType::Int32),
//! );
//!
//! // from m in MyClass1 where m.Prop2 > limit select new { m.Prop1 }
//! let query = Query::from_table(table)
//!     .filter(lambda("m", |m| m.member("Prop2").gt(captured("limit", 7))))
//!     .select(lambda("m", |m| new_object([("Prop1", m.member("Prop1"))])));
//! ```

use super::{
    AggregateOp, BinaryOp, Captured, ClientFunction, ElementKind, Expr, Lambda, QueryOp,
    SetOpKind, UnaryOp,
};
use crate::catalog::TableDescriptor;
use crate::value::{Value, ValueType};
use std::sync::Arc;

// Lambdas and leaves

/// Build a one-parameter lambda
pub fn lambda(param: &str, body: impl FnOnce(Expr) -> Expr) -> Lambda {
    Lambda::new(vec![param.to_string()], body(Expr::Parameter(param.to_string())))
}

/// Build a two-parameter lambda (element/index, outer/inner, key/group)
pub fn lambda2(first: &str, second: &str, body: impl FnOnce(Expr, Expr) -> Expr) -> Lambda {
    Lambda::new(
        vec![first.to_string(), second.to_string()],
        body(
            Expr::Parameter(first.to_string()),
            Expr::Parameter(second.to_string()),
        ),
    )
}

/// Inline constant
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

pub fn null() -> Expr {
    Expr::Constant(Value::Null)
}

/// Runtime value captured from the caller, bound as a parameter
pub fn captured(name: &str, value: impl Into<Value>) -> Expr {
    Expr::Captured(Captured::new(name, value))
}

/// Object construction with members in declaration order
pub fn new_object<I, S>(members: I) -> Expr
where
    I: IntoIterator<Item = (S, Expr)>,
    S: Into<String>,
{
    Expr::New(members.into_iter().map(|(n, e)| (n.into(), e)).collect())
}

/// Inline list literal
pub fn list<I, T>(items: I) -> Expr
where
    I: IntoIterator<Item = T>,
    T: Into<Expr>,
{
    Expr::List(items.into_iter().map(Into::into).collect())
}

/// `test ? if_true : if_false`
pub fn conditional(test: Expr, if_true: impl Into<Expr>, if_false: impl Into<Expr>) -> Expr {
    Expr::Conditional {
        test: Box::new(test),
        if_true: Box::new(if_true.into()),
        if_false: Box::new(if_false.into()),
    }
}

/// Call a function that only exists in memory
pub fn client_fn(
    name: &str,
    func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    args: Vec<Expr>,
) -> Expr {
    Expr::Client {
        function: ClientFunction::new(name, func),
        args,
    }
}

/// Raw server fragment of a declared type
pub fn raw_sql(sql: &str, ty: ValueType) -> Expr {
    Expr::Raw {
        sql: sql.to_string(),
        ty,
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Constant(v)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        lit(v)
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        lit(v)
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        lit(v)
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        lit(v)
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        lit(v)
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        lit(v)
    }
}

// Expression combinators

impl Expr {
    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right.into()),
        }
    }

    fn unary(self, op: UnaryOp) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(self),
        }
    }

    /// Mapped member access
    pub fn member(self, name: &str) -> Expr {
        Expr::Member {
            target: Box::new(self),
            name: name.to_string(),
        }
    }

    /// Method or property call, normalized by the rewriting passes
    pub fn method(self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::Method {
            target: Box::new(self),
            name: name.to_string(),
            args,
        }
    }

    pub fn eq(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Equal, right)
    }

    pub fn ne(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::NotEqual, right)
    }

    pub fn lt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::LessThan, right)
    }

    pub fn le(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::LessThanOrEqual, right)
    }

    pub fn gt(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::GreaterThan, right)
    }

    pub fn ge(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::GreaterThanOrEqual, right)
    }

    pub fn and(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::AndAlso, right)
    }

    pub fn or(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::OrElse, right)
    }

    pub fn add(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Add, right)
    }

    pub fn sub(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Subtract, right)
    }

    pub fn mul(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Multiply, right)
    }

    pub fn div(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Divide, right)
    }

    pub fn rem(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Modulo, right)
    }

    pub fn bit_and(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::BitAnd, right)
    }

    pub fn bit_or(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::BitOr, right)
    }

    pub fn bit_xor(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::BitXor, right)
    }

    /// `self ?? right`
    pub fn coalesce(self, right: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Coalesce, right)
    }

    pub fn not(self) -> Expr {
        self.unary(UnaryOp::Not)
    }

    pub fn negate(self) -> Expr {
        self.unary(UnaryOp::Negate)
    }

    pub fn complement(self) -> Expr {
        self.unary(UnaryOp::OnesComplement)
    }

    pub fn is_null(self) -> Expr {
        self.eq(null())
    }

    pub fn is_not_null(self) -> Expr {
        self.ne(null())
    }

    pub fn convert(self, ty: ValueType) -> Expr {
        Expr::Convert {
            operand: Box::new(self),
            ty,
        }
    }

    /// `self is T`
    pub fn is_type(self, element_type: &str) -> Expr {
        Expr::TypeIs {
            operand: Box::new(self),
            element_type: element_type.to_string(),
        }
    }

    /// `self as T`
    pub fn as_type(self, element_type: &str) -> Expr {
        Expr::TypeAs {
            operand: Box::new(self),
            element_type: element_type.to_string(),
        }
    }

    /// `Contains` on a list, a captured collection or a string
    pub fn contains(self, item: impl Into<Expr>) -> Expr {
        self.method("Contains", vec![item.into()])
    }

    pub fn has_value(self) -> Expr {
        self.method("HasValue", vec![])
    }

    pub fn nullable_value(self) -> Expr {
        self.method("Value", vec![])
    }

    pub fn length(self) -> Expr {
        self.method("Length", vec![])
    }

    pub fn to_upper(self) -> Expr {
        self.method("ToUpper", vec![])
    }

    pub fn to_lower(self) -> Expr {
        self.method("ToLower", vec![])
    }

    pub fn trim(self) -> Expr {
        self.method("Trim", vec![])
    }

    pub fn starts_with(self, prefix: impl Into<Expr>) -> Expr {
        self.method("StartsWith", vec![prefix.into()])
    }

    pub fn ends_with(self, suffix: impl Into<Expr>) -> Expr {
        self.method("EndsWith", vec![suffix.into()])
    }

    /// Treat a sequence-valued expression (a group, a nested collection) as a query source
    pub fn into_query(self) -> Query {
        Query::from_expr(self)
    }
}

// Query builder

/// Fluent builder over [`QueryOp`]
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    op: QueryOp,
}

impl Query {
    /// Start from a mapped table
    pub fn from_table(table: Arc<TableDescriptor>) -> Self {
        Query {
            op: QueryOp::Table(table),
        }
    }

    /// Start from a sequence-valued expression
    pub fn from_expr(expr: Expr) -> Self {
        Query {
            op: QueryOp::Source(Box::new(expr)),
        }
    }

    pub fn op(&self) -> &QueryOp {
        &self.op
    }

    pub fn into_op(self) -> QueryOp {
        self.op
    }

    /// Embed as a nested query inside a lambda body
    pub fn into_expr(self) -> Expr {
        Expr::Query(Box::new(self.op))
    }

    fn wrap(self, f: impl FnOnce(Box<QueryOp>) -> QueryOp) -> Query {
        Query {
            op: f(Box::new(self.op)),
        }
    }

    pub fn filter(self, predicate: Lambda) -> Query {
        self.wrap(|source| QueryOp::Where { source, predicate })
    }

    pub fn select(self, selector: Lambda) -> Query {
        self.wrap(|source| QueryOp::Select { source, selector })
    }

    pub fn select_many(self, collection: Lambda) -> Query {
        self.wrap(|source| QueryOp::SelectMany {
            source,
            collection,
            result: None,
        })
    }

    pub fn select_many_result(self, collection: Lambda, result: Lambda) -> Query {
        self.wrap(|source| QueryOp::SelectMany {
            source,
            collection,
            result: Some(result),
        })
    }

    pub fn join(self, inner: Query, outer_key: Lambda, inner_key: Lambda, result: Lambda) -> Query {
        self.wrap(|outer| QueryOp::Join {
            outer,
            inner: Box::new(inner.op),
            outer_key,
            inner_key,
            result,
        })
    }

    pub fn group_join(
        self,
        inner: Query,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    ) -> Query {
        self.wrap(|outer| QueryOp::GroupJoin {
            outer,
            inner: Box::new(inner.op),
            outer_key,
            inner_key,
            result,
        })
    }

    pub fn group_by(self, key: Lambda) -> Query {
        self.group_by_with(key, None, None)
    }

    /// GroupBy with optional element and result selectors
    pub fn group_by_with(self, key: Lambda, element: Option<Lambda>, result: Option<Lambda>) -> Query {
        self.wrap(|source| QueryOp::GroupBy {
            source,
            key,
            element,
            result,
        })
    }

    pub fn order_by(self, key: Lambda) -> Query {
        self.wrap(|source| QueryOp::OrderBy {
            source,
            key,
            descending: false,
        })
    }

    pub fn order_by_descending(self, key: Lambda) -> Query {
        self.wrap(|source| QueryOp::OrderBy {
            source,
            key,
            descending: true,
        })
    }

    pub fn then_by(self, key: Lambda) -> Query {
        self.wrap(|source| QueryOp::ThenBy {
            source,
            key,
            descending: false,
        })
    }

    pub fn then_by_descending(self, key: Lambda) -> Query {
        self.wrap(|source| QueryOp::ThenBy {
            source,
            key,
            descending: true,
        })
    }

    pub fn reverse(self) -> Query {
        self.wrap(|source| QueryOp::Reverse { source })
    }

    pub fn distinct(self) -> Query {
        self.wrap(|source| QueryOp::Distinct { source })
    }

    pub fn take(self, count: impl Into<Expr>) -> Query {
        self.wrap(|source| QueryOp::Take {
            source,
            count: Box::new(count.into()),
        })
    }

    pub fn skip(self, count: impl Into<Expr>) -> Query {
        self.wrap(|source| QueryOp::Skip {
            source,
            count: Box::new(count.into()),
        })
    }

    pub fn take_while(self, predicate: Lambda) -> Query {
        self.wrap(|source| QueryOp::TakeWhile { source, predicate })
    }

    pub fn skip_while(self, predicate: Lambda) -> Query {
        self.wrap(|source| QueryOp::SkipWhile { source, predicate })
    }

    pub fn default_if_empty(self) -> Query {
        self.wrap(|source| QueryOp::DefaultIfEmpty { source })
    }

    fn set_op(self, kind: SetOpKind, right: Query) -> Query {
        self.wrap(|left| QueryOp::SetOp {
            kind,
            left,
            right: Box::new(right.op),
        })
    }

    pub fn concat(self, right: Query) -> Query {
        self.set_op(SetOpKind::Concat, right)
    }

    pub fn union(self, right: Query) -> Query {
        self.set_op(SetOpKind::Union, right)
    }

    pub fn intersect(self, right: Query) -> Query {
        self.set_op(SetOpKind::Intersect, right)
    }

    pub fn except(self, right: Query) -> Query {
        self.set_op(SetOpKind::Except, right)
    }

    pub fn zip(self, right: Query, result: Lambda) -> Query {
        self.wrap(|left| QueryOp::Zip {
            left,
            right: Box::new(right.op),
            result,
        })
    }

    pub fn of_type(self, element_type: &str) -> Query {
        self.wrap(|source| QueryOp::OfType {
            source,
            element_type: element_type.to_string(),
        })
    }

    pub fn cast(self, element_type: &str) -> Query {
        self.wrap(|source| QueryOp::Cast {
            source,
            element_type: element_type.to_string(),
        })
    }

    // Terminal operators

    fn aggregate(self, op: AggregateOp, selector: Option<Lambda>) -> Query {
        self.wrap(|source| QueryOp::Aggregate {
            source,
            op,
            selector,
        })
    }

    pub fn count(self) -> Query {
        self.aggregate(AggregateOp::Count, None)
    }

    pub fn count_where(self, predicate: Lambda) -> Query {
        self.filter(predicate).count()
    }

    pub fn long_count(self) -> Query {
        self.aggregate(AggregateOp::LongCount, None)
    }

    pub fn sum(self, selector: impl Into<Option<Lambda>>) -> Query {
        self.aggregate(AggregateOp::Sum, selector.into())
    }

    pub fn average(self, selector: impl Into<Option<Lambda>>) -> Query {
        self.aggregate(AggregateOp::Average, selector.into())
    }

    pub fn min(self, selector: impl Into<Option<Lambda>>) -> Query {
        self.aggregate(AggregateOp::Min, selector.into())
    }

    pub fn max(self, selector: impl Into<Option<Lambda>>) -> Query {
        self.aggregate(AggregateOp::Max, selector.into())
    }

    pub fn any(self) -> Query {
        self.wrap(|source| QueryOp::Any {
            source,
            predicate: None,
        })
    }

    pub fn any_where(self, predicate: Lambda) -> Query {
        self.wrap(|source| QueryOp::Any {
            source,
            predicate: Some(predicate),
        })
    }

    pub fn all(self, predicate: Lambda) -> Query {
        self.wrap(|source| QueryOp::All { source, predicate })
    }

    pub fn contains(self, item: impl Into<Expr>) -> Query {
        self.wrap(|source| QueryOp::Contains {
            source,
            item: Box::new(item.into()),
        })
    }

    pub fn sequence_equal(self, right: Query) -> Query {
        self.wrap(|left| QueryOp::SequenceEqual {
            left,
            right: Box::new(right.op),
        })
    }

    fn element(self, kind: ElementKind, or_default: bool) -> Query {
        self.wrap(|source| QueryOp::Element {
            source,
            kind,
            or_default,
        })
    }

    pub fn first(self) -> Query {
        self.element(ElementKind::First, false)
    }

    pub fn first_where(self, predicate: Lambda) -> Query {
        self.filter(predicate).first()
    }

    pub fn first_or_default(self) -> Query {
        self.element(ElementKind::First, true)
    }

    pub fn last(self) -> Query {
        self.element(ElementKind::Last, false)
    }

    pub fn last_or_default(self) -> Query {
        self.element(ElementKind::Last, true)
    }

    pub fn single(self) -> Query {
        self.element(ElementKind::Single, false)
    }

    pub fn single_where(self, predicate: Lambda) -> Query {
        self.filter(predicate).single()
    }

    pub fn single_or_default(self) -> Query {
        self.element(ElementKind::Single, true)
    }

    pub fn element_at(self, index: impl Into<Expr>) -> Query {
        self.wrap(|source| QueryOp::ElementAt {
            source,
            index: Box::new(index.into()),
            or_default: false,
        })
    }

    pub fn element_at_or_default(self, index: impl Into<Expr>) -> Query {
        self.wrap(|source| QueryOp::ElementAt {
            source,
            index: Box::new(index.into()),
            or_default: true,
        })
    }
}

impl From<Query> for QueryOp {
    fn from(q: Query) -> Self {
        q.op
    }
}
