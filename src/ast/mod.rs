//! # Operator Tree
//!
//! The deferred description of a sequence computation: sequence operators
//! ([`QueryOp`]) whose lambdas carry scalar expression trees ([`Expr`]).
//! Runtime values captured by the caller appear as named [`Captured`] slots so
//! that two trees that differ only in captured values share one compiled plan.
//!
//! ## Builders
//!
//! For programmatic construction, see the [`builders`] module which provides
//! the fluent [`builders::Query`] API and expression combinators.

use crate::catalog::TableDescriptor;
use crate::value::{Value, ValueType};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub mod builders;

// ============================================================================
// Scalar Expressions
// ============================================================================

/// Binary operators of the expression language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
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
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    AndAlso,
    OrElse,
    /// `left ?? right`
    Coalesce,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    /// The comparison that holds exactly when this one does not
    pub fn inverse(&self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Equal => Some(BinaryOp::NotEqual),
            BinaryOp::NotEqual => Some(BinaryOp::Equal),
            BinaryOp::LessThan => Some(BinaryOp::GreaterThanOrEqual),
            BinaryOp::LessThanOrEqual => Some(BinaryOp::GreaterThan),
            BinaryOp::GreaterThan => Some(BinaryOp::LessThanOrEqual),
            BinaryOp::GreaterThanOrEqual => Some(BinaryOp::LessThan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    OnesComplement,
}

/// Canonical functions with a server equivalent.
///
/// Produced by the rewriting passes from method and member access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    ToUpper,
    ToLower,
    Trim,
    TrimStart,
    TrimEnd,
    Length,
    /// `(string, start[, length])`, zero-based start
    Substring,
    Replace,
    /// Zero-based, -1 when absent
    IndexOf,
    StringContains,
    StartsWith,
    EndsWith,
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Date,
    Coalesce,
    Abs,
}

/// A runtime value captured by the caller, bound as a parameter.
///
/// Hashing ignores the value (only its name and kind participate) so
/// structural fingerprints erase captured values.
#[derive(Debug, Clone, PartialEq)]
pub struct Captured {
    pub name: String,
    pub value: Value,
}

impl Captured {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Captured {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Hash for Captured {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.value.value_type().hash(state);
        matches!(self.value, Value::List(_)).hash(state);
        matches!(self.value, Value::Object(_)).hash(state);
    }
}

/// Signature of in-memory-only functions
pub type ClientFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A named function with no server equivalent, always evaluated in memory
#[derive(Clone)]
pub struct ClientFunction {
    pub name: String,
    pub func: Arc<ClientFn>,
}

impl ClientFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        ClientFunction {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for ClientFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientFunction({})", self.name)
    }
}

// Identity is the closure itself: two closures sharing a name may capture
// different runtime values, so a cached plan must not outlive its closure.
impl PartialEq for ClientFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.func, &other.func)
    }
}

impl Hash for ClientFunction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        (Arc::as_ptr(&self.func) as *const () as usize).hash(state);
    }
}

/// Values tested by a membership expression
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum InValues {
    /// Inline literal list, rendered value by value
    Inline(Vec<Expr>),
    /// Captured collection, bound as one serialized parameter
    Captured(Captured),
}

/// Scalar (and object-constructing) expression
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum Expr {
    /// Reference to a lambda parameter
    Parameter(String),
    Constant(Value),
    Captured(Captured),
    /// Mapped member access (column, object member, `Key` of a group)
    Member { target: Box<Expr>, name: String },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Convert { operand: Box<Expr>, ty: ValueType },
    /// `operand is T`
    TypeIs { operand: Box<Expr>, element_type: String },
    /// `operand as T`
    TypeAs { operand: Box<Expr>, element_type: String },
    /// Object construction, members in declaration order
    New(Vec<(String, Expr)>),
    /// Inline list literal
    List(Vec<Expr>),
    /// Method or property call before normalization
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// Canonical function call
    Call { function: Function, args: Vec<Expr> },
    /// Membership test
    In { item: Box<Expr>, values: InValues },
    /// Nested sequence or terminal operator
    Query(Box<QueryOp>),
    /// In-memory-only function
    Client {
        function: ClientFunction,
        args: Vec<Expr>,
    },
    /// Raw server fragment of a known type
    Raw { sql: String, ty: ValueType },
}

/// Lambda with ordered parameter names
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new(params: Vec<String>, body: Expr) -> Self {
        Lambda {
            params,
            body: Box::new(body),
        }
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Two-parameter form of an element lambda (element, index)
    pub fn is_indexed(&self) -> bool {
        self.params.len() == 2
    }
}

// ============================================================================
// Sequence Operators
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOpKind {
    Concat,
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    Count,
    LongCount,
    Sum,
    Average,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    First,
    Last,
    Single,
}

/// Sequence operator tree
#[derive(Debug, Clone, PartialEq, Hash)]
pub enum QueryOp {
    /// Base table
    Table(Arc<TableDescriptor>),
    /// Sequence-valued expression (a group, a nested collection, a list)
    Source(Box<Expr>),
    Where { source: Box<QueryOp>, predicate: Lambda },
    Select { source: Box<QueryOp>, selector: Lambda },
    SelectMany {
        source: Box<QueryOp>,
        collection: Lambda,
        result: Option<Lambda>,
    },
    Join {
        outer: Box<QueryOp>,
        inner: Box<QueryOp>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupJoin {
        outer: Box<QueryOp>,
        inner: Box<QueryOp>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupBy {
        source: Box<QueryOp>,
        key: Lambda,
        element: Option<Lambda>,
        result: Option<Lambda>,
    },
    OrderBy { source: Box<QueryOp>, key: Lambda, descending: bool },
    ThenBy { source: Box<QueryOp>, key: Lambda, descending: bool },
    Reverse { source: Box<QueryOp> },
    Distinct { source: Box<QueryOp> },
    Take { source: Box<QueryOp>, count: Box<Expr> },
    Skip { source: Box<QueryOp>, count: Box<Expr> },
    TakeWhile { source: Box<QueryOp>, predicate: Lambda },
    SkipWhile { source: Box<QueryOp>, predicate: Lambda },
    DefaultIfEmpty { source: Box<QueryOp> },
    SetOp {
        kind: SetOpKind,
        left: Box<QueryOp>,
        right: Box<QueryOp>,
    },
    Zip {
        left: Box<QueryOp>,
        right: Box<QueryOp>,
        result: Lambda,
    },
    OfType { source: Box<QueryOp>, element_type: String },
    Cast { source: Box<QueryOp>, element_type: String },

    // Terminal operators
    Aggregate {
        source: Box<QueryOp>,
        op: AggregateOp,
        selector: Option<Lambda>,
    },
    Any { source: Box<QueryOp>, predicate: Option<Lambda> },
    All { source: Box<QueryOp>, predicate: Lambda },
    Contains { source: Box<QueryOp>, item: Box<Expr> },
    SequenceEqual { left: Box<QueryOp>, right: Box<QueryOp> },
    Element {
        source: Box<QueryOp>,
        kind: ElementKind,
        or_default: bool,
    },
    ElementAt {
        source: Box<QueryOp>,
        index: Box<Expr>,
        or_default: bool,
    },
}

const FINGERPRINT_CHECK_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Two independently seeded structural hashes of an operator tree.
/// `hash` keys the plan cache; `check` must also match for a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub hash: u64,
    pub check: u64,
}

impl QueryOp {
    /// Terminal operators produce a single value rather than a sequence
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryOp::Aggregate { .. }
                | QueryOp::Any { .. }
                | QueryOp::All { .. }
                | QueryOp::Contains { .. }
                | QueryOp::SequenceEqual { .. }
                | QueryOp::Element { .. }
                | QueryOp::ElementAt { .. }
        )
    }

    /// Operator name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            QueryOp::Table(_) => "Table",
            QueryOp::Source(_) => "Source",
            QueryOp::Where { .. } => "Where",
            QueryOp::Select { .. } => "Select",
            QueryOp::SelectMany { .. } => "SelectMany",
            QueryOp::Join { .. } => "Join",
            QueryOp::GroupJoin { .. } => "GroupJoin",
            QueryOp::GroupBy { .. } => "GroupBy",
            QueryOp::OrderBy { .. } => "OrderBy",
            QueryOp::ThenBy { .. } => "ThenBy",
            QueryOp::Reverse { .. } => "Reverse",
            QueryOp::Distinct { .. } => "Distinct",
            QueryOp::Take { .. } => "Take",
            QueryOp::Skip { .. } => "Skip",
            QueryOp::TakeWhile { .. } => "TakeWhile",
            QueryOp::SkipWhile { .. } => "SkipWhile",
            QueryOp::DefaultIfEmpty { .. } => "DefaultIfEmpty",
            QueryOp::SetOp { .. } => "SetOp",
            QueryOp::Zip { .. } => "Zip",
            QueryOp::OfType { .. } => "OfType",
            QueryOp::Cast { .. } => "Cast",
            QueryOp::Aggregate { .. } => "Aggregate",
            QueryOp::Any { .. } => "Any",
            QueryOp::All { .. } => "All",
            QueryOp::Contains { .. } => "Contains",
            QueryOp::SequenceEqual { .. } => "SequenceEqual",
            QueryOp::Element { .. } => "Element",
            QueryOp::ElementAt { .. } => "ElementAt",
        }
    }

    /// Element type name when it is statically known
    pub fn element_type(&self) -> Option<&str> {
        match self {
            QueryOp::Table(table) => Some(&table.element_type),
            QueryOp::Where { source, .. }
            | QueryOp::OrderBy { source, .. }
            | QueryOp::ThenBy { source, .. }
            | QueryOp::Reverse { source }
            | QueryOp::Distinct { source }
            | QueryOp::Take { source, .. }
            | QueryOp::Skip { source, .. }
            | QueryOp::TakeWhile { source, .. }
            | QueryOp::SkipWhile { source, .. }
            | QueryOp::DefaultIfEmpty { source } => source.element_type(),
            QueryOp::OfType { element_type, .. } | QueryOp::Cast { element_type, .. } => {
                Some(element_type)
            }
            QueryOp::SetOp { left, .. } => left.element_type(),
            _ => None,
        }
    }

    /// Structural fingerprint with captured values erased
    pub fn fingerprint(&self) -> Fingerprint {
        let hash_with = |seed: Option<u64>| {
            let mut hasher = DefaultHasher::new();
            seed.hash(&mut hasher);
            self.hash(&mut hasher);
            hasher.finish()
        };
        Fingerprint {
            hash: hash_with(None),
            check: hash_with(Some(FINGERPRINT_CHECK_SEED)),
        }
    }

    /// Captured values by slot name
    pub fn captured_values(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        visit_op_exprs(self, &mut |expr| collect_captured(expr, &mut out));
        out
    }
}

fn collect_captured(expr: &Expr, out: &mut BTreeMap<String, Value>) {
    match expr {
        Expr::Captured(c) | Expr::In { values: InValues::Captured(c), .. } => {
            out.insert(c.name.clone(), c.value.clone());
        }
        _ => {}
    }
    if let Expr::Query(op) = expr {
        visit_op_exprs(op, &mut |e| collect_captured(e, out));
    }
    for child in expr.children() {
        collect_captured(child, out);
    }
}

/// Visit every top-level expression (lambda bodies, counts, items) of an operator tree
pub fn visit_op_exprs(op: &QueryOp, f: &mut dyn FnMut(&Expr)) {
    for lambda in op.lambdas() {
        f(&lambda.body);
    }
    match op {
        QueryOp::Source(expr) => f(expr),
        QueryOp::Take { count, .. } | QueryOp::Skip { count, .. } => f(count),
        QueryOp::Contains { item, .. } => f(item),
        QueryOp::ElementAt { index, .. } => f(index),
        _ => {}
    }
    for child in op.inputs() {
        visit_op_exprs(child, f);
    }
}

impl QueryOp {
    /// Child sequences
    pub fn inputs(&self) -> Vec<&QueryOp> {
        match self {
            QueryOp::Table(_) | QueryOp::Source(_) => vec![],
            QueryOp::Join { outer, inner, .. } | QueryOp::GroupJoin { outer, inner, .. } => {
                vec![&**outer, &**inner]
            }
            QueryOp::SetOp { left, right, .. }
            | QueryOp::Zip { left, right, .. }
            | QueryOp::SequenceEqual { left, right } => vec![&**left, &**right],
            QueryOp::Where { source, .. }
            | QueryOp::Select { source, .. }
            | QueryOp::SelectMany { source, .. }
            | QueryOp::GroupBy { source, .. }
            | QueryOp::OrderBy { source, .. }
            | QueryOp::ThenBy { source, .. }
            | QueryOp::Reverse { source }
            | QueryOp::Distinct { source }
            | QueryOp::Take { source, .. }
            | QueryOp::Skip { source, .. }
            | QueryOp::TakeWhile { source, .. }
            | QueryOp::SkipWhile { source, .. }
            | QueryOp::DefaultIfEmpty { source }
            | QueryOp::OfType { source, .. }
            | QueryOp::Cast { source, .. }
            | QueryOp::Aggregate { source, .. }
            | QueryOp::Any { source, .. }
            | QueryOp::All { source, .. }
            | QueryOp::Contains { source, .. }
            | QueryOp::Element { source, .. }
            | QueryOp::ElementAt { source, .. } => vec![&**source],
        }
    }

    /// Lambdas owned directly by this operator
    pub fn lambdas(&self) -> Vec<&Lambda> {
        match self {
            QueryOp::Where { predicate, .. }
            | QueryOp::TakeWhile { predicate, .. }
            | QueryOp::SkipWhile { predicate, .. }
            | QueryOp::All { predicate, .. } => vec![predicate],
            QueryOp::Select { selector, .. } => vec![selector],
            QueryOp::SelectMany {
                collection, result, ..
            } => std::iter::once(collection).chain(result.iter()).collect(),
            QueryOp::Join {
                outer_key,
                inner_key,
                result,
                ..
            }
            | QueryOp::GroupJoin {
                outer_key,
                inner_key,
                result,
                ..
            } => vec![outer_key, inner_key, result],
            QueryOp::GroupBy {
                key,
                element,
                result,
                ..
            } => std::iter::once(key)
                .chain(element.iter())
                .chain(result.iter())
                .collect(),
            QueryOp::OrderBy { key, .. } | QueryOp::ThenBy { key, .. } => vec![key],
            QueryOp::Zip { result, .. } => vec![result],
            QueryOp::Aggregate { selector, .. } => selector.iter().collect(),
            QueryOp::Any { predicate, .. } => predicate.iter().collect(),
            _ => vec![],
        }
    }
}

impl Expr {
    /// Direct scalar children (nested operator trees are not descended)
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Parameter(_)
            | Expr::Constant(_)
            | Expr::Captured(_)
            | Expr::Query(_)
            | Expr::Raw { .. } => vec![],
            Expr::Member { target, .. } => vec![&**target],
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Unary { operand, .. }
            | Expr::Convert { operand, .. }
            | Expr::TypeIs { operand, .. }
            | Expr::TypeAs { operand, .. } => vec![&**operand],
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => vec![&**test, &**if_true, &**if_false],
            Expr::New(members) => members.iter().map(|(_, e)| e).collect(),
            Expr::List(items) => items.iter().collect(),
            Expr::Method { target, args, .. } => std::iter::once(&**target).chain(args.iter()).collect(),
            Expr::Call { args, .. } | Expr::Client { args, .. } => args.iter().collect(),
            Expr::In { item, values } => {
                let mut out = vec![&**item];
                if let InValues::Inline(items) = values {
                    out.extend(items.iter());
                }
                out
            }
        }
    }

    /// Lambda parameters referenced anywhere inside, including nested queries
    pub fn free_parameters(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collect_parameters(self, &mut out);
        out
    }

    /// Top-level `&&` operands, flattened recursively
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::AndAlso,
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
}

impl Expr {
    /// Rebuild this node from transformed direct children.
    ///
    /// Nested operator trees are left untouched; callers that need to descend
    /// into them match on [`Expr::Query`] themselves.
    pub fn try_map_children<E>(
        self,
        f: &mut dyn FnMut(Expr) -> Result<Expr, E>,
    ) -> Result<Expr, E> {
        let mut boxed = |e: Box<Expr>| f(*e).map(Box::new);
        Ok(match self {
            leaf @ (Expr::Parameter(_)
            | Expr::Constant(_)
            | Expr::Captured(_)
            | Expr::Query(_)
            | Expr::Raw { .. }) => leaf,
            Expr::Member { target, name } => Expr::Member {
                target: boxed(target)?,
                name,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: boxed(left)?,
                right: boxed(right)?,
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: boxed(operand)?,
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::Conditional {
                test: boxed(test)?,
                if_true: boxed(if_true)?,
                if_false: boxed(if_false)?,
            },
            Expr::Convert { operand, ty } => Expr::Convert {
                operand: boxed(operand)?,
                ty,
            },
            Expr::TypeIs {
                operand,
                element_type,
            } => Expr::TypeIs {
                operand: boxed(operand)?,
                element_type,
            },
            Expr::TypeAs {
                operand,
                element_type,
            } => Expr::TypeAs {
                operand: boxed(operand)?,
                element_type,
            },
            Expr::New(members) => Expr::New(
                members
                    .into_iter()
                    .map(|(name, e)| Ok((name, f(e)?)))
                    .collect::<Result<_, E>>()?,
            ),
            Expr::List(items) => Expr::List(items.into_iter().map(&mut *f).collect::<Result<_, E>>()?),
            Expr::Method { target, name, args } => Expr::Method {
                target: boxed(target)?,
                name,
                args: args.into_iter().map(&mut *f).collect::<Result<_, E>>()?,
            },
            Expr::Call { function, args } => Expr::Call {
                function,
                args: args.into_iter().map(&mut *f).collect::<Result<_, E>>()?,
            },
            Expr::Client { function, args } => Expr::Client {
                function,
                args: args.into_iter().map(&mut *f).collect::<Result<_, E>>()?,
            },
            Expr::In { item, values } => Expr::In {
                item: boxed(item)?,
                values: match values {
                    InValues::Inline(items) => InValues::Inline(
                        items.into_iter().map(&mut *f).collect::<Result<_, E>>()?,
                    ),
                    captured => captured,
                },
            },
        })
    }
}

fn collect_parameters(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Parameter(name) => {
            out.insert(name.clone());
        }
        Expr::Query(op) => {
            // Lambda parameters bound inside the nested tree are not free
            let mut inner = BTreeSet::new();
            visit_op_exprs(op, &mut |e| collect_parameters(e, &mut inner));
            let mut bound = BTreeSet::new();
            collect_lambda_params(op, &mut bound);
            out.extend(inner.into_iter().filter(|p| !bound.contains(p)));
        }
        _ => {}
    }
    for child in expr.children() {
        collect_parameters(child, out);
    }
}

fn collect_lambda_params(op: &QueryOp, out: &mut BTreeSet<String>) {
    for lambda in op.lambdas() {
        out.extend(lambda.params.iter().cloned());
    }
    for child in op.inputs() {
        collect_lambda_params(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::builders::{captured, lambda, lit, Query};
    use super::*;
    use crate::catalog::TableDescriptor;

    fn table() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("dbo", "MyClass1")
                .nullable_column("Prop1", ValueType::String)
                .column("Prop2", ValueType::Int32),
        )
    }

    #[test]
    fn test_fingerprint_ignores_captured_values() {
        let build = |v: i32| {
            Query::from_table(table())
                .filter(lambda("m", |m| m.member("Prop2").eq(captured("limit", v))))
                .into_op()
        };
        assert_eq!(build(1).fingerprint(), build(2).fingerprint());
        assert_ne!(build(1), build(2));
    }

    #[test]
    fn test_fingerprint_distinguishes_shape() {
        let a = Query::from_table(table()).take(1).into_op();
        let b = Query::from_table(table()).skip(1).into_op();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_tracks_client_closure_identity() {
        let select = |function: &Expr| {
            let function = function.clone();
            Query::from_table(table())
                .select(Lambda::new(vec!["m".to_string()], function))
                .into_op()
        };
        let flag = |limit: i32| {
            builders::client_fn("flag", move |_| Ok(Value::Int32(limit)), Vec::new())
        };
        let first = flag(1);

        assert_eq!(select(&first).fingerprint(), select(&first).fingerprint());
        assert_ne!(select(&first).fingerprint(), select(&flag(2)).fingerprint());
        assert_ne!(select(&first), select(&flag(1)));
    }

    #[test]
    fn test_captured_values_collected_from_nested_queries() {
        let op = Query::from_table(table())
            .select(lambda("m", |_| {
                Query::from_table(table())
                    .filter(lambda("x", |x| x.member("Prop2").gt(captured("inner", 5))))
                    .count()
                    .into_expr()
            }))
            .take(captured("n", 3))
            .into_op();
        let values = op.captured_values();
        assert_eq!(values.get("inner"), Some(&Value::Int32(5)));
        assert_eq!(values.get("n"), Some(&Value::Int32(3)));
    }

    #[test]
    fn test_free_parameters_exclude_nested_lambda_params() {
        let expr = Query::from_table(table())
            .filter(lambda("z", |z| z.member("Prop2").eq(Expr::Parameter("m".into()).member("Prop2"))))
            .count()
            .into_expr();
        let free = expr.free_parameters();
        assert!(free.contains("m"));
        assert!(!free.contains("z"));
    }

    #[test]
    fn test_conjuncts_flatten_nested_ands() {
        let expr = lit(true).and(lit(1).eq(lit(1)).and(lit(false)));
        assert_eq!(expr.conjuncts().len(), 3);
    }
}
