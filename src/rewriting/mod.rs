//! # Rewriting Passes
//!
//! Tree-to-tree normalizations applied once to the raw operator tree before
//! composition. Each pass is a pure `QueryOp -> QueryOp` function; the pass
//! list is ordered data taken from configuration.
//!
//! | Pass | Effect |
//! |------|--------|
//! | `captured_members` | `captured.x` folds into the captured slot `captured.x` |
//! | `type_checks` | `is`/`as`/`Cast`/`OfType` against the declared element type |
//! | `nullable_members` | `HasValue`, `Value`, `GetValueOrDefault(d)` |
//! | `string_and_date_members` | string and date methods become canonical calls |
//! | `contains` | `Contains` over lists and captured collections becomes `IN` |
//!
//! ## Pipeline Position
//!
//! ```text
//! QueryOp (builder) -> [Rewriting] -> QueryComposer -> Optimizer -> SqlRenderer
//! ```

use crate::ast::{
    BinaryOp, Captured, Expr, Function, InValues, Lambda, QueryOp,
};
use crate::error::{CompileError, CompileResult};
use crate::value::Value;
use std::collections::HashMap;
use tracing::debug;

/// One rewriting pass, by configuration name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewritePass {
    CapturedMembers,
    TypeChecks,
    NullableMembers,
    StringAndDateMembers,
    Contains,
}

impl RewritePass {
    /// Default pipeline order
    pub const ALL: [RewritePass; 5] = [
        RewritePass::CapturedMembers,
        RewritePass::TypeChecks,
        RewritePass::NullableMembers,
        RewritePass::StringAndDateMembers,
        RewritePass::Contains,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RewritePass::CapturedMembers => "captured_members",
            RewritePass::TypeChecks => "type_checks",
            RewritePass::NullableMembers => "nullable_members",
            RewritePass::StringAndDateMembers => "string_and_date_members",
            RewritePass::Contains => "contains",
        }
    }

    pub fn from_name(name: &str) -> CompileResult<Self> {
        RewritePass::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| CompileError::Config(format!("unknown rewriting pass '{name}'")))
    }
}

/// Statistics about rewriting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteStats {
    /// Number of passes run
    pub passes_run: usize,
    /// Number of expression or operator nodes replaced
    pub nodes_rewritten: usize,
}

/// Element type of each lambda parameter in scope, when known
type Scope = HashMap<String, Option<String>>;

/// Runs the configured rewriting passes in order
#[derive(Debug, Clone)]
pub struct Rewriter {
    passes: Vec<RewritePass>,
    stats: RewriteStats,
}

impl Default for Rewriter {
    fn default() -> Self {
        Self::new(RewritePass::ALL.to_vec())
    }
}

impl Rewriter {
    pub fn new(passes: Vec<RewritePass>) -> Self {
        Rewriter {
            passes,
            stats: RewriteStats::default(),
        }
    }

    /// Build from configured pass names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> CompileResult<Self> {
        let passes = names
            .iter()
            .map(|n| RewritePass::from_name(n.as_ref()))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Self::new(passes))
    }

    pub fn passes(&self) -> &[RewritePass] {
        &self.passes
    }

    pub fn stats(&self) -> &RewriteStats {
        &self.stats
    }

    /// Apply every pass in order
    pub fn rewrite(&mut self, op: QueryOp) -> CompileResult<QueryOp> {
        let mut current = op;
        for pass in self.passes.clone() {
            let before = self.stats.nodes_rewritten;
            current = self.rewrite_op(pass, current, &Scope::new())?;
            self.stats.passes_run += 1;
            debug!(
                pass = pass.name(),
                rewritten = self.stats.nodes_rewritten - before,
                "rewriting pass applied"
            );
        }
        Ok(current)
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    fn input(&mut self, pass: RewritePass, op: Box<QueryOp>, scope: &Scope) -> CompileResult<Box<QueryOp>> {
        self.rewrite_op(pass, *op, scope).map(Box::new)
    }

    fn lambda(
        &mut self,
        pass: RewritePass,
        lambda: Lambda,
        types: &[Option<String>],
        scope: &Scope,
    ) -> CompileResult<Lambda> {
        let mut inner = scope.clone();
        for (i, param) in lambda.params.iter().enumerate() {
            inner.insert(param.clone(), types.get(i).cloned().flatten());
        }
        let body = self.expr(pass, *lambda.body, &inner)?;
        Ok(Lambda::new(lambda.params, body))
    }

    fn boxed_expr(&mut self, pass: RewritePass, expr: Box<Expr>, scope: &Scope) -> CompileResult<Box<Expr>> {
        self.expr(pass, *expr, scope).map(Box::new)
    }

    /// Bottom-up expression rewrite, descending into nested operator trees
    fn expr(&mut self, pass: RewritePass, expr: Expr, scope: &Scope) -> CompileResult<Expr> {
        let expr = match expr {
            Expr::Query(op) => Expr::Query(self.input(pass, op, scope)?),
            other => other.try_map_children(&mut |child| self.expr(pass, child, scope))?,
        };
        let rewritten = apply(pass, expr.clone(), scope)?;
        if rewritten != expr {
            self.stats.nodes_rewritten += 1;
        }
        Ok(rewritten)
    }

    fn rewrite_op(&mut self, pass: RewritePass, op: QueryOp, scope: &Scope) -> CompileResult<QueryOp> {
        let elem = |op: &QueryOp| op.element_type().map(str::to_string);
        let op = match op {
            QueryOp::Table(_) => op,
            QueryOp::Source(expr) => QueryOp::Source(self.boxed_expr(pass, expr, scope)?),
            QueryOp::Where { source, predicate } => {
                let source = self.input(pass, source, scope)?;
                let predicate = self.lambda(pass, predicate, &[elem(&source)], scope)?;
                QueryOp::Where { source, predicate }
            }
            QueryOp::Select { source, selector } => {
                let source = self.input(pass, source, scope)?;
                let selector = self.lambda(pass, selector, &[elem(&source)], scope)?;
                QueryOp::Select { source, selector }
            }
            QueryOp::SelectMany {
                source,
                collection,
                result,
            } => {
                let source = self.input(pass, source, scope)?;
                let collection = self.lambda(pass, collection, &[elem(&source)], scope)?;
                let result = result
                    .map(|r| self.lambda(pass, r, &[elem(&source)], scope))
                    .transpose()?;
                QueryOp::SelectMany {
                    source,
                    collection,
                    result,
                }
            }
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                let outer = self.input(pass, outer, scope)?;
                let inner = self.input(pass, inner, scope)?;
                QueryOp::Join {
                    outer_key: self.lambda(pass, outer_key, &[elem(&outer)], scope)?,
                    inner_key: self.lambda(pass, inner_key, &[elem(&inner)], scope)?,
                    result: self.lambda(pass, result, &[elem(&outer), elem(&inner)], scope)?,
                    outer,
                    inner,
                }
            }
            QueryOp::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => {
                let outer = self.input(pass, outer, scope)?;
                let inner = self.input(pass, inner, scope)?;
                QueryOp::GroupJoin {
                    outer_key: self.lambda(pass, outer_key, &[elem(&outer)], scope)?,
                    inner_key: self.lambda(pass, inner_key, &[elem(&inner)], scope)?,
                    result: self.lambda(pass, result, &[elem(&outer)], scope)?,
                    outer,
                    inner,
                }
            }
            QueryOp::GroupBy {
                source,
                key,
                element,
                result,
            } => {
                let source = self.input(pass, source, scope)?;
                let types = [elem(&source)];
                QueryOp::GroupBy {
                    key: self.lambda(pass, key, &types, scope)?,
                    element: element
                        .map(|e| self.lambda(pass, e, &types, scope))
                        .transpose()?,
                    result: result.map(|r| self.lambda(pass, r, &[], scope)).transpose()?,
                    source,
                }
            }
            QueryOp::OrderBy {
                source,
                key,
                descending,
            } => {
                let source = self.input(pass, source, scope)?;
                let key = self.lambda(pass, key, &[elem(&source)], scope)?;
                QueryOp::OrderBy {
                    source,
                    key,
                    descending,
                }
            }
            QueryOp::ThenBy {
                source,
                key,
                descending,
            } => {
                let source = self.input(pass, source, scope)?;
                let key = self.lambda(pass, key, &[elem(&source)], scope)?;
                QueryOp::ThenBy {
                    source,
                    key,
                    descending,
                }
            }
            QueryOp::Reverse { source } => QueryOp::Reverse {
                source: self.input(pass, source, scope)?,
            },
            QueryOp::Distinct { source } => QueryOp::Distinct {
                source: self.input(pass, source, scope)?,
            },
            QueryOp::Take { source, count } => QueryOp::Take {
                source: self.input(pass, source, scope)?,
                count: self.boxed_expr(pass, count, scope)?,
            },
            QueryOp::Skip { source, count } => QueryOp::Skip {
                source: self.input(pass, source, scope)?,
                count: self.boxed_expr(pass, count, scope)?,
            },
            QueryOp::TakeWhile { source, predicate } => {
                let source = self.input(pass, source, scope)?;
                let predicate = self.lambda(pass, predicate, &[elem(&source)], scope)?;
                QueryOp::TakeWhile { source, predicate }
            }
            QueryOp::SkipWhile { source, predicate } => {
                let source = self.input(pass, source, scope)?;
                let predicate = self.lambda(pass, predicate, &[elem(&source)], scope)?;
                QueryOp::SkipWhile { source, predicate }
            }
            QueryOp::DefaultIfEmpty { source } => QueryOp::DefaultIfEmpty {
                source: self.input(pass, source, scope)?,
            },
            QueryOp::SetOp { kind, left, right } => QueryOp::SetOp {
                kind,
                left: self.input(pass, left, scope)?,
                right: self.input(pass, right, scope)?,
            },
            QueryOp::Zip {
                left,
                right,
                result,
            } => {
                let left = self.input(pass, left, scope)?;
                let right = self.input(pass, right, scope)?;
                let result = self.lambda(pass, result, &[elem(&left), elem(&right)], scope)?;
                QueryOp::Zip {
                    left,
                    right,
                    result,
                }
            }
            QueryOp::OfType {
                source,
                element_type,
            } => QueryOp::OfType {
                source: self.input(pass, source, scope)?,
                element_type,
            },
            QueryOp::Cast {
                source,
                element_type,
            } => QueryOp::Cast {
                source: self.input(pass, source, scope)?,
                element_type,
            },
            QueryOp::Aggregate {
                source,
                op,
                selector,
            } => {
                let source = self.input(pass, source, scope)?;
                let selector = selector
                    .map(|s| self.lambda(pass, s, &[elem(&source)], scope))
                    .transpose()?;
                QueryOp::Aggregate {
                    source,
                    op,
                    selector,
                }
            }
            QueryOp::Any { source, predicate } => {
                let source = self.input(pass, source, scope)?;
                let predicate = predicate
                    .map(|p| self.lambda(pass, p, &[elem(&source)], scope))
                    .transpose()?;
                QueryOp::Any { source, predicate }
            }
            QueryOp::All { source, predicate } => {
                let source = self.input(pass, source, scope)?;
                let predicate = self.lambda(pass, predicate, &[elem(&source)], scope)?;
                QueryOp::All { source, predicate }
            }
            QueryOp::Contains { source, item } => QueryOp::Contains {
                source: self.input(pass, source, scope)?,
                item: self.boxed_expr(pass, item, scope)?,
            },
            QueryOp::SequenceEqual { left, right } => QueryOp::SequenceEqual {
                left: self.input(pass, left, scope)?,
                right: self.input(pass, right, scope)?,
            },
            QueryOp::Element {
                source,
                kind,
                or_default,
            } => QueryOp::Element {
                source: self.input(pass, source, scope)?,
                kind,
                or_default,
            },
            QueryOp::ElementAt {
                source,
                index,
                or_default,
            } => QueryOp::ElementAt {
                source: self.input(pass, source, scope)?,
                index: self.boxed_expr(pass, index, scope)?,
                or_default,
            },
        };
        if pass == RewritePass::TypeChecks {
            let (rewritten, changed) = strip_type_operators(op);
            if changed {
                self.stats.nodes_rewritten += 1;
            }
            return Ok(rewritten);
        }
        Ok(op)
    }
}

// ============================================================================
// Per-node rules
// ============================================================================

fn apply(pass: RewritePass, expr: Expr, scope: &Scope) -> CompileResult<Expr> {
    match pass {
        RewritePass::CapturedMembers => fold_captured_member(expr),
        RewritePass::TypeChecks => Ok(fold_type_check(expr, scope)),
        RewritePass::NullableMembers => Ok(rewrite_nullable_member(expr)),
        RewritePass::StringAndDateMembers => Ok(rewrite_string_or_date_member(expr)),
        RewritePass::Contains => Ok(rewrite_contains(expr)),
    }
}

fn fold_captured_member(expr: Expr) -> CompileResult<Expr> {
    match expr {
        Expr::Member { target, name } => match *target {
            Expr::Captured(captured) => {
                let value = match &captured.value {
                    Value::Null => Value::Null,
                    Value::Object(_) => captured.value.member(&name).cloned().ok_or_else(|| {
                        CompileError::UnknownMember {
                            member: name.clone(),
                            shape: format!("captured value '{}'", captured.name),
                        }
                    })?,
                    _ => {
                        return Ok(Expr::Member {
                            target: Box::new(Expr::Captured(captured)),
                            name,
                        })
                    }
                };
                Ok(Expr::Captured(Captured::new(format!("{}.{}", captured.name, name), value)))
            }
            target => Ok(Expr::Member {
                target: Box::new(target),
                name,
            }),
        },
        other => Ok(other),
    }
}

/// Element type of an expression when it is a lambda parameter with a known type
fn static_type<'a>(expr: &Expr, scope: &'a Scope) -> Option<&'a str> {
    match expr {
        Expr::Parameter(name) => scope.get(name).and_then(|t| t.as_deref()),
        _ => None,
    }
}

fn fold_type_check(expr: Expr, scope: &Scope) -> Expr {
    match expr {
        Expr::TypeIs {
            operand,
            element_type,
        } => match static_type(&operand, scope) {
            Some(actual) => Expr::Constant(Value::Bool(actual == element_type)),
            None => Expr::TypeIs {
                operand,
                element_type,
            },
        },
        Expr::TypeAs {
            operand,
            element_type,
        } => match static_type(&operand, scope) {
            Some(actual) if actual == element_type => *operand,
            Some(_) => Expr::Constant(Value::Null),
            None => Expr::TypeAs {
                operand,
                element_type,
            },
        },
        other => other,
    }
}

/// Remove `Cast`/`OfType` whose target matches the source element type
fn strip_type_operators(op: QueryOp) -> (QueryOp, bool) {
    match op {
        QueryOp::Cast {
            source,
            element_type,
        } if source.element_type() == Some(element_type.as_str()) => (*source, true),
        QueryOp::OfType {
            source,
            element_type,
        } => match source.element_type() {
            Some(actual) if actual == element_type => (*source, true),
            Some(_) => (
                QueryOp::Where {
                    source,
                    predicate: Lambda::new(vec!["_".to_string()], Expr::Constant(Value::Bool(false))),
                },
                true,
            ),
            None => (
                QueryOp::OfType {
                    source,
                    element_type,
                },
                false,
            ),
        },
        other => (other, false),
    }
}

fn rewrite_nullable_member(expr: Expr) -> Expr {
    match expr {
        Expr::Method { target, name, args } => match (name.as_str(), args.len()) {
            ("HasValue", 0) => Expr::Binary {
                op: BinaryOp::NotEqual,
                left: target,
                right: Box::new(Expr::Constant(Value::Null)),
            },
            ("Value", 0) => *target,
            ("GetValueOrDefault", 1) => {
                let mut args = args;
                let default = args.remove(0);
                Expr::Binary {
                    op: BinaryOp::Coalesce,
                    left: target,
                    right: Box::new(default),
                }
            }
            _ => Expr::Method { target, name, args },
        },
        other => other,
    }
}

/// Sequence-valued receivers keep their `Contains` for the membership pass
fn is_collection(expr: &Expr) -> bool {
    match expr {
        Expr::List(_) | Expr::Query(_) => true,
        Expr::Captured(c) => matches!(c.value, Value::List(_)),
        Expr::Constant(v) => matches!(v, Value::List(_)),
        _ => false,
    }
}

fn rewrite_string_or_date_member(expr: Expr) -> Expr {
    let Expr::Method { target, name, args } = expr else {
        return expr;
    };
    let function = match (name.as_str(), args.len()) {
        ("Length", 0) => Function::Length,
        ("ToUpper", 0) => Function::ToUpper,
        ("ToLower", 0) => Function::ToLower,
        ("Trim", 0) => Function::Trim,
        ("TrimStart", 0) => Function::TrimStart,
        ("TrimEnd", 0) => Function::TrimEnd,
        ("Substring", 1 | 2) => Function::Substring,
        ("Contains", 1) if !is_collection(&target) => Function::StringContains,
        ("StartsWith", 1) => Function::StartsWith,
        ("EndsWith", 1) => Function::EndsWith,
        ("Replace", 2) => Function::Replace,
        ("IndexOf", 1) => Function::IndexOf,
        ("Year", 0) => Function::Year,
        ("Month", 0) => Function::Month,
        ("Day", 0) => Function::Day,
        ("Hour", 0) => Function::Hour,
        ("Minute", 0) => Function::Minute,
        ("Second", 0) => Function::Second,
        ("Date", 0) => Function::Date,
        ("Abs", 0) => Function::Abs,
        _ => return Expr::Method { target, name, args },
    };
    let mut call_args = vec![*target];
    call_args.extend(args);
    Expr::Call {
        function,
        args: call_args,
    }
}

fn rewrite_contains(expr: Expr) -> Expr {
    let Expr::Method { target, name, args } = expr else {
        return expr;
    };
    if name != "Contains" || args.len() != 1 {
        return Expr::Method { target, name, args };
    }
    let mut args = args;
    let item = Box::new(args.remove(0));
    match *target {
        Expr::List(items) => Expr::In {
            item,
            values: InValues::Inline(items),
        },
        Expr::Constant(Value::List(values)) => Expr::In {
            item,
            values: InValues::Inline(values.into_iter().map(Expr::Constant).collect()),
        },
        Expr::Captured(captured) if matches!(captured.value, Value::List(_)) => Expr::In {
            item,
            values: InValues::Captured(captured),
        },
        Expr::Query(source) => Expr::Query(Box::new(QueryOp::Contains { source, item })),
        target => Expr::Method {
            target: Box::new(target),
            name,
            args: vec![*item],
        },
    }
}
