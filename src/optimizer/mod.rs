//! # IR Optimizer
//!
//! Tree rewrites over a composed select node, applied to fixpoint:
//!
//! - Key equality: join conditions compare the left side's columns first,
//!   and a column before a constant or parameter
//! - Column pruning: derived-table columns that nothing outside the derived
//!   table reads are dropped (`DISTINCT` nodes are left alone)
//! - Boolean simplification: constant folding of `AND`/`OR`/`NOT`, double
//!   negation, negated comparison inversion, constant `CASE` conditions
//!
//! ## Pipeline Position
//!
//! ```text
//! QueryComposer -> SelectNode -> [Optimizer] -> Optimized SelectNode -> SqlRenderer
//! ```

use crate::error::{CompileError, CompileResult};
use crate::ir::{
    column_name, ColumnRef, JoinKind, RowLimit, SelectNode, Shape, SqlBinaryOp, SqlExpr,
    SqlUnaryOp, TableId, TableRef,
};
use crate::value::Value;
use std::collections::HashSet;
use tracing::debug;

/// One optimizing pass, by configuration name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizePass {
    KeyEquality,
    PruneColumns,
    SimplifyBooleans,
}

impl OptimizePass {
    /// Default pipeline order
    pub const ALL: [OptimizePass; 3] = [
        OptimizePass::KeyEquality,
        OptimizePass::PruneColumns,
        OptimizePass::SimplifyBooleans,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OptimizePass::KeyEquality => "key_equality",
            OptimizePass::PruneColumns => "prune_columns",
            OptimizePass::SimplifyBooleans => "simplify_booleans",
        }
    }

    pub fn from_name(name: &str) -> CompileResult<Self> {
        OptimizePass::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| CompileError::Config(format!("unknown optimizing pass '{name}'")))
    }
}

/// What the optimizer changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerStats {
    /// Rounds run before reaching fixpoint
    pub iterations: usize,
    pub equalities_oriented: usize,
    pub columns_pruned: usize,
    pub expressions_simplified: usize,
}

/// IR optimizer with fixpoint iteration
#[derive(Debug, Clone)]
pub struct Optimizer {
    /// Maximum number of rounds over the pass list
    max_iterations: usize,
    passes: Vec<OptimizePass>,
}

impl Optimizer {
    /// Create an optimizer with every pass and the default iteration limit
    pub fn new() -> Self {
        Optimizer {
            max_iterations: 10,
            passes: OptimizePass::ALL.to_vec(),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_passes(mut self, passes: Vec<OptimizePass>) -> Self {
        self.passes = passes;
        self
    }

    /// Build from configured pass names
    pub fn from_names<S: AsRef<str>>(names: &[S], max_iterations: usize) -> CompileResult<Self> {
        let passes = names
            .iter()
            .map(|n| OptimizePass::from_name(n.as_ref()))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(Optimizer::new()
            .with_passes(passes)
            .with_max_iterations(max_iterations))
    }

    pub fn passes(&self) -> &[OptimizePass] {
        &self.passes
    }

    /// Optimize a select node to fixpoint
    ///
    /// Applies the pass list repeatedly until the tree stops changing or
    /// `max_iterations` is reached.
    pub fn optimize(&self, select: SelectNode) -> (SelectNode, OptimizerStats) {
        let mut stats = OptimizerStats::default();
        let mut current = select;

        for _iteration in 0..self.max_iterations {
            stats.iterations += 1;
            let optimized = self.apply_all_rules(current.clone(), &mut stats);
            if optimized == current {
                break;
            }
            current = optimized;
        }

        debug!(
            iterations = stats.iterations,
            oriented = stats.equalities_oriented,
            pruned = stats.columns_pruned,
            simplified = stats.expressions_simplified,
            "optimized select"
        );
        (current, stats)
    }

    /// Apply every configured pass once
    fn apply_all_rules(&self, mut select: SelectNode, stats: &mut OptimizerStats) -> SelectNode {
        for pass in &self.passes {
            match pass {
                OptimizePass::KeyEquality => {
                    stats.equalities_oriented += orient_join_keys(&mut select)
                }
                OptimizePass::PruneColumns => stats.columns_pruned += prune_columns(&mut select),
                OptimizePass::SimplifyBooleans => {
                    stats.expressions_simplified += simplify_booleans(&mut select)
                }
            }
        }
        select
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Key equality
// ============================================================================

/// Orient `ON` equalities: left-side columns first, columns before values
fn orient_join_keys(select: &mut SelectNode) -> usize {
    let mut count = 0;
    select.for_each_select_mut(&mut |s| {
        if let Some(from) = &mut s.from {
            count += orient_table(from);
        }
    });
    count
}

fn orient_table(table: &mut TableRef) -> usize {
    let TableRef::Join {
        kind,
        left,
        right,
        on,
    } = table
    else {
        return 0;
    };
    let mut count = orient_table(left) + orient_table(right);
    if matches!(kind, JoinKind::Cross | JoinKind::CrossApply | JoinKind::OuterApply) {
        return count;
    }
    let left_ids: HashSet<TableId> = left.visible_ids().into_iter().collect();
    let right_ids: HashSet<TableId> = right.visible_ids().into_iter().collect();
    if let Some(on) = on {
        on.walk_mut(&mut |e| {
            if let SqlExpr::Binary {
                op: SqlBinaryOp::Equal,
                left: l,
                right: r,
            } = e
            {
                let backwards = (reads_only(r, &left_ids) && reads_only(l, &right_ids))
                    || (is_value(l) && !is_value(r));
                if backwards {
                    std::mem::swap(l, r);
                    count += 1;
                }
            }
        });
    }
    count
}

/// Reads at least one column, all from `ids`
fn reads_only(expr: &SqlExpr, ids: &HashSet<TableId>) -> bool {
    let (mut any, mut all) = (false, true);
    expr.for_each(&mut |e| {
        if let SqlExpr::Column(c) = e {
            any = true;
            all &= ids.contains(&c.table);
        }
    });
    any && all
}

fn is_value(expr: &SqlExpr) -> bool {
    matches!(expr, SqlExpr::Constant(_) | SqlExpr::Parameter(_))
}

// ============================================================================
// Column pruning
// ============================================================================

/// Drop derived-table output columns that nothing reads
fn prune_columns(select: &mut SelectNode) -> usize {
    let mut read: HashSet<(TableId, String)> = HashSet::new();
    select.for_each_expr(&mut |e| {
        if let SqlExpr::Column(ColumnRef { table, name, .. }) = e {
            read.insert((*table, name.clone()));
        }
    });

    let mut count = 0;
    select.for_each_select_mut(&mut |s| {
        if let Some(from) = &mut s.from {
            count += prune_table(from, &read);
        }
    });
    count
}

fn prune_table(table: &mut TableRef, read: &HashSet<(TableId, String)>) -> usize {
    match table {
        TableRef::Join { left, right, .. } => prune_table(left, read) + prune_table(right, read),
        TableRef::Derived { select, alias } => {
            if select.limit == RowLimit::Distinct {
                return 0;
            }
            let keep: HashSet<&str> = read
                .iter()
                .filter(|(id, _)| *id == alias.id)
                .map(|(_, name)| name.as_str())
                .collect();
            // Some column must remain
            if keep.is_empty() {
                return 0;
            }
            let before = match select.output_columns() {
                Ok(columns) => columns.len(),
                Err(_) => return 0,
            };
            let shape = match prune_shape(select.shape(), "", &keep) {
                // A lone column member reads the same as a root column
                Some(Shape::Object(mut members))
                    if members.len() == 1
                        && matches!(&members[0].1, Shape::Scalar(SqlExpr::Column(c)) if c.name == members[0].0) =>
                {
                    members.remove(0).1
                }
                Some(shape) => shape,
                None => Shape::Object(Vec::new()),
            };
            select.set_shape(shape);
            select.hidden.retain(|c| keep.contains(c.name.as_str()));
            let after = select.output_columns().map_or(before, |c| c.len());
            before.saturating_sub(after)
        }
        TableRef::Base { .. } | TableRef::SetOp { .. } => 0,
    }
}

fn path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// The part of `shape` whose columns are in `keep`
fn prune_shape(shape: &Shape, prefix: &str, keep: &HashSet<&str>) -> Option<Shape> {
    match shape {
        Shape::Scalar(expr) => keep
            .contains(column_name(prefix, expr).as_str())
            .then(|| shape.clone()),
        Shape::Object(members) => {
            let kept: Vec<(String, Shape)> = members
                .iter()
                .filter_map(|(name, member)| {
                    prune_shape(member, &path(prefix, name), keep).map(|m| (name.clone(), m))
                })
                .collect();
            (!kept.is_empty()).then_some(Shape::Object(kept))
        }
        Shape::Optional { flag, inner } => {
            let inner = prune_shape(inner, prefix, keep);
            let flag_read = keep.contains(path(prefix, "$empty").as_str());
            match inner {
                None if !flag_read => None,
                inner => Some(Shape::Optional {
                    flag: flag.clone(),
                    inner: Box::new(inner.unwrap_or_else(|| Shape::Object(Vec::new()))),
                }),
            }
        }
        // Groupings, client values and collections keep all of their columns
        Shape::Grouping(_) | Shape::Client(_) | Shape::Collection(_) => shape
            .columns_at(prefix)
            .ok()?
            .iter()
            .any(|c| keep.contains(c.name.as_str()))
            .then(|| shape.clone()),
    }
}

// ============================================================================
// Boolean simplification
// ============================================================================

fn simplify_booleans(select: &mut SelectNode) -> usize {
    let mut count = 0;
    select.for_each_expr_mut(&mut |e| {
        if let Some(simpler) = simplify(e) {
            *e = simpler;
            count += 1;
        }
    });
    count
}

/// One simplification step at the root of `expr`; children are already simplified
fn simplify(expr: &SqlExpr) -> Option<SqlExpr> {
    match expr {
        SqlExpr::Binary { op, left, right } if op.is_logical() => {
            let and = *op == SqlBinaryOp::And;
            match (bool_constant(left), bool_constant(right)) {
                (Some(b), _) if b == and => Some((**right).clone()),
                (_, Some(b)) if b == and => Some((**left).clone()),
                (Some(b), _) | (_, Some(b)) => Some(SqlExpr::constant(b)),
                _ => None,
            }
        }
        SqlExpr::Unary {
            op: SqlUnaryOp::Not,
            operand,
        } => match &**operand {
            SqlExpr::Constant(Value::Bool(b)) => Some(SqlExpr::constant(!b)),
            SqlExpr::Unary {
                op: SqlUnaryOp::Not,
                operand: inner,
            } => Some((**inner).clone()),
            SqlExpr::IsNull { operand, negated } => Some(SqlExpr::IsNull {
                operand: operand.clone(),
                negated: !negated,
            }),
            // NOT (a op b) is unknown exactly when (a inverse-op b) is
            SqlExpr::Binary { op, left, right } => op
                .inverted()
                .map(|inverse| SqlExpr::binary(inverse, (**left).clone(), (**right).clone())),
            _ => None,
        },
        SqlExpr::Case { whens, otherwise } => {
            if !whens
                .iter()
                .any(|(when, _)| bool_constant(when).is_some())
            {
                return None;
            }
            let mut kept = Vec::new();
            for (when, then) in whens {
                match bool_constant(when) {
                    Some(false) => {}
                    Some(true) if kept.is_empty() => return Some(then.clone()),
                    Some(true) => {
                        return Some(SqlExpr::Case {
                            whens: kept,
                            otherwise: Some(Box::new(then.clone())),
                        })
                    }
                    None => kept.push((when.clone(), then.clone())),
                }
            }
            if kept.is_empty() {
                return Some(
                    otherwise
                        .as_deref()
                        .cloned()
                        .unwrap_or(SqlExpr::Constant(Value::Null)),
                );
            }
            Some(SqlExpr::Case {
                whens: kept,
                otherwise: otherwise.clone(),
            })
        }
        _ => None,
    }
}

fn bool_constant(expr: &SqlExpr) -> Option<bool> {
    match expr {
        SqlExpr::Constant(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}
