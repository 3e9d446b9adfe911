//! # Translatability Analysis
//!
//! Bottom-up classification of scalar expressions as server-evaluable or
//! client-evaluable, and the predicate splitter built on it.
//!
//! An expression is server-evaluable when every leaf is a mapped member, a
//! captured value or a constant, and every internal node has a server
//! equivalent. Unknown methods, in-memory functions and unresolved type
//! checks are client-only, as is any member whose binding is itself
//! client-evaluated.
//!
//! Predicates split only at top-level AND boundaries (recursively); a
//! disjunction with any client part is client-evaluated as a whole.

use crate::ast::{visit_op_exprs, Expr, QueryOp};
use std::collections::BTreeSet;

/// Where an expression is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Evaluation {
    Server,
    Client,
}

impl Evaluation {
    pub fn is_server(self) -> bool {
        self == Evaluation::Server
    }

    fn and(self, other: Evaluation) -> Evaluation {
        if self.is_server() && other.is_server() {
            Evaluation::Server
        } else {
            Evaluation::Client
        }
    }
}

/// Resolves lambda-parameter member paths to their evaluation side
pub trait BindingLookup {
    /// `None` when the parameter is not bound in this scope
    fn member_evaluation(&self, param: &str, path: &[&str]) -> Option<Evaluation>;
}

/// Member path rooted at a lambda parameter: `m.a.b` gives `("m", ["a", "b"])`
pub fn member_path(expr: &Expr) -> Option<(&str, Vec<&str>)> {
    match expr {
        Expr::Parameter(name) => Some((name.as_str(), Vec::new())),
        Expr::Member { target, name } => {
            let (root, mut path) = member_path(target)?;
            path.push(name.as_str());
            Some((root, path))
        }
        _ => None,
    }
}

/// Classify an expression against the bindings in scope
pub fn classify(expr: &Expr, bindings: &dyn BindingLookup) -> Evaluation {
    classify_with(expr, bindings, &BTreeSet::new())
}

fn classify_with(expr: &Expr, bindings: &dyn BindingLookup, local: &BTreeSet<String>) -> Evaluation {
    if let Some((root, path)) = member_path(expr) {
        if local.contains(root) {
            return Evaluation::Server;
        }
        // Unbound parameters surface as errors during translation
        return bindings
            .member_evaluation(root, &path)
            .unwrap_or(Evaluation::Server);
    }
    match expr {
        Expr::Method { .. }
        | Expr::Client { .. }
        | Expr::TypeIs { .. }
        | Expr::TypeAs { .. } => Evaluation::Client,
        Expr::Query(op) => classify_query(op, bindings, local),
        other => other
            .children()
            .into_iter()
            .fold(Evaluation::Server, |acc, child| {
                acc.and(classify_with(child, bindings, local))
            }),
    }
}

fn classify_query(op: &QueryOp, bindings: &dyn BindingLookup, local: &BTreeSet<String>) -> Evaluation {
    // Parameters bound inside the nested tree are resolved by its own composition
    let mut inner = local.clone();
    collect_lambda_params(op, &mut inner);
    let mut result = Evaluation::Server;
    visit_op_exprs(op, &mut |e| {
        result = result.and(classify_with(e, bindings, &inner));
    });
    result
}

fn collect_lambda_params(op: &QueryOp, out: &mut BTreeSet<String>) {
    for lambda in op.lambdas() {
        out.extend(lambda.params.iter().cloned());
    }
    for child in op.inputs() {
        collect_lambda_params(child, out);
    }
}

/// Result of splitting a predicate into server and client conjuncts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateSplit {
    pub server: Vec<Expr>,
    pub client: Vec<Expr>,
}

impl PredicateSplit {
    /// Client conjuncts recombined with AND
    pub fn client_predicate(&self) -> Option<Expr> {
        self.client.iter().cloned().reduce(|l, r| Expr::Binary {
            op: crate::ast::BinaryOp::AndAlso,
            left: Box::new(l),
            right: Box::new(r),
        })
    }
}

/// Split at top-level AND boundaries, recursively
pub fn split_predicate(predicate: &Expr, bindings: &dyn BindingLookup) -> PredicateSplit {
    let mut split = PredicateSplit::default();
    for conjunct in predicate.conjuncts() {
        match classify(conjunct, bindings) {
            Evaluation::Server => split.server.push(conjunct.clone()),
            Evaluation::Client => split.client.push(conjunct.clone()),
        }
    }
    split
}
