//! # Pipeline Trace
//!
//! Utility for visualizing the compilation pipeline.
//! Shows output of each stage: Rewrite -> Compose -> Optimize -> Render
//!
//! Useful for debugging why an operator tree produced the SQL it did.

use crate::ast::QueryOp;
use crate::code_generator::RenderedSql;
use crate::ir::{RowLimit, SelectNode, TableRef};
use crate::ir_builder::ComposeStats;
use crate::optimizer::OptimizerStats;
use crate::rewriting::RewriteStats;

/// Trace of one compilation
#[derive(Debug, Clone, Default)]
pub struct PipelineTrace {
    /// Operator tree as handed to the compiler
    pub op_before: Option<QueryOp>,

    /// Operator tree after the rewriting passes
    pub op_after: Option<QueryOp>,

    /// Composed IR (before optimization)
    pub ir_before: Option<SelectNode>,

    /// Optimized IR
    pub ir_after: Option<SelectNode>,

    pub sql: Option<RenderedSql>,

    /// The plan came from the cache; no IR was built
    pub cached: bool,

    pub stats: TraceStats,
}

/// Per-stage statistics
#[derive(Debug, Clone, Default)]
pub struct TraceStats {
    pub rewrite: RewriteStats,
    pub compose: ComposeStats,
    pub optimizer: OptimizerStats,

    /// Select nodes before optimization
    pub nodes_before: usize,

    /// Select nodes after optimization
    pub nodes_after: usize,
}

impl PipelineTrace {
    pub fn new() -> Self {
        PipelineTrace::default()
    }

    /// Record the rewriting stage
    pub fn record_rewrite(&mut self, before: QueryOp, after: QueryOp, stats: RewriteStats) {
        self.op_before = Some(before);
        self.op_after = Some(after);
        self.stats.rewrite = stats;
    }

    /// Record IR as composed
    pub fn record_ir_before(&mut self, ir: SelectNode, stats: ComposeStats) {
        self.stats.nodes_before = ir.node_count();
        self.stats.compose = stats;
        self.ir_before = Some(ir);
    }

    /// Record IR after optimization
    pub fn record_ir_after(&mut self, ir: SelectNode, stats: OptimizerStats) {
        self.stats.nodes_after = ir.node_count();
        self.stats.optimizer = stats;
        self.ir_after = Some(ir);
    }

    pub fn record_sql(&mut self, sql: RenderedSql) {
        self.sql = Some(sql);
    }

    pub fn record_cache_hit(&mut self, sql: RenderedSql) {
        self.cached = true;
        self.sql = Some(sql);
    }

    /// Format the trace for display
    pub fn format_trace(&self) -> String {
        let mut output = String::new();

        output.push_str("═══════════════════════════════════════════════════════════\n");
        output.push_str("                    PIPELINE TRACE                          \n");
        output.push_str("═══════════════════════════════════════════════════════════\n\n");

        if let (Some(before), Some(after)) = (&self.op_before, &self.op_after) {
            output.push_str(&banner("REWRITING"));
            output.push_str(&format!(
                "  Passes run: {}, nodes rewritten: {}\n\n",
                self.stats.rewrite.passes_run, self.stats.rewrite.nodes_rewritten
            ));
            output.push_str("  Input:\n");
            output.push_str(&Self::format_op_tree(before, 4));
            if before != after {
                output.push_str("  Rewritten:\n");
                output.push_str(&Self::format_op_tree(after, 4));
            }
            output.push('\n');
        }

        if self.cached {
            output.push_str(&banner("PLAN CACHE"));
            output.push_str("  Hit: composition and optimization skipped\n\n");
        }

        if let Some(ir) = &self.ir_before {
            let compose = &self.stats.compose;
            output.push_str(&banner("COMPOSITION"));
            output.push_str(&format!("  Select nodes: {}\n", self.stats.nodes_before));
            output.push_str(&format!(
                "  Pushdowns: {}, joins: {}, nested collections: {}, client operators: {}\n\n",
                compose.pushdowns, compose.joins, compose.nested_collections, compose.client_operators
            ));
            output.push_str(&Self::format_ir_tree(ir, 4));
            output.push('\n');
        }

        if let Some(ir) = &self.ir_after {
            let optimizer = &self.stats.optimizer;
            output.push_str(&banner("OPTIMIZATION"));
            output.push_str(&format!(
                "  Select nodes: {} -> {} ({} iterations)\n",
                self.stats.nodes_before, self.stats.nodes_after, optimizer.iterations
            ));
            if optimizer.equalities_oriented > 0 {
                output.push_str(&format!(
                    "  - Equalities oriented: {}\n",
                    optimizer.equalities_oriented
                ));
            }
            if optimizer.columns_pruned > 0 {
                output.push_str(&format!("  - Columns pruned: {}\n", optimizer.columns_pruned));
            }
            if optimizer.expressions_simplified > 0 {
                output.push_str(&format!(
                    "  - Expressions simplified: {}\n",
                    optimizer.expressions_simplified
                ));
            }
            output.push('\n');
            output.push_str(&Self::format_ir_tree(ir, 4));
            output.push('\n');
        }

        if let Some(sql) = &self.sql {
            output.push_str(&banner("RENDERING"));
            for line in sql.sql.lines() {
                output.push_str(&format!("  {line}\n"));
            }
            if !sql.parameters.is_empty() {
                output.push('\n');
                for parameter in &sql.parameters {
                    output.push_str(&format!(
                        "  {} <- {} ({}{})\n",
                        parameter.placeholder,
                        parameter.slot.name,
                        parameter.slot.ty,
                        if parameter.slot.serialized { ", serialized" } else { "" }
                    ));
                }
            }
            output.push('\n');
        }

        output.push_str("═══════════════════════════════════════════════════════════\n");

        output
    }

    /// Format an operator tree, one operator per line
    fn format_op_tree(op: &QueryOp, indent: usize) -> String {
        let prefix = " ".repeat(indent);
        let mut output = match op {
            QueryOp::Table(table) => format!("{prefix}Table([{}].[{}])\n", table.schema, table.name),
            QueryOp::OrderBy { descending, .. } | QueryOp::ThenBy { descending, .. } => format!(
                "{prefix}{}{}\n",
                op.name(),
                if *descending { " desc" } else { "" }
            ),
            QueryOp::SetOp { kind, .. } => format!("{prefix}SetOp({kind:?})\n"),
            QueryOp::Aggregate { op: aggregate, .. } => format!("{prefix}Aggregate({aggregate:?})\n"),
            QueryOp::Element { kind, or_default, .. } => format!(
                "{prefix}{kind:?}{}\n",
                if *or_default { "OrDefault" } else { "" }
            ),
            other => format!("{prefix}{}\n", other.name()),
        };
        for input in op.inputs() {
            output.push_str(&Self::format_op_tree(input, indent + 2));
        }
        output
    }

    /// Format a select node tree with indentation
    fn format_ir_tree(select: &SelectNode, indent: usize) -> String {
        let prefix = " ".repeat(indent);
        let mut clauses = Vec::new();
        if select.predicate.is_some() {
            clauses.push("where".to_string());
        }
        if !select.grouping.is_empty() {
            clauses.push(format!("group_by={}", select.grouping.len()));
        }
        if select.having.is_some() {
            clauses.push("having".to_string());
        }
        if !select.ordering.is_empty() {
            clauses.push(format!("order_by={}", select.ordering.len()));
        }
        match &select.limit {
            RowLimit::None => {}
            RowLimit::Distinct => clauses.push("distinct".to_string()),
            RowLimit::Top(_) => clauses.push("top".to_string()),
            RowLimit::Offset { fetch, .. } => clauses.push(
                if fetch.is_some() { "offset+fetch" } else { "offset" }.to_string(),
            ),
        }
        if !select.hidden.is_empty() {
            clauses.push(format!("hidden={}", select.hidden.len()));
        }

        let mut output = format!(
            "{prefix}Select[{}]{}\n",
            select.shape().describe(),
            if clauses.is_empty() {
                String::new()
            } else {
                format!(" {}", clauses.join(", "))
            }
        );
        if let Some(from) = &select.from {
            output.push_str(&Self::format_table_ref(from, indent + 2));
        }
        output
    }

    fn format_table_ref(table: &TableRef, indent: usize) -> String {
        let prefix = " ".repeat(indent);
        match table {
            TableRef::Base { table, alias } => format!(
                "{prefix}Table([{}].[{}]) as {}#{}\n",
                table.schema, table.name, alias.hint, alias.id
            ),
            TableRef::Derived { select, alias } => {
                let mut output = format!("{prefix}Derived as {}#{}\n", alias.hint, alias.id);
                output.push_str(&Self::format_ir_tree(select, indent + 2));
                output
            }
            TableRef::Join {
                kind,
                left,
                right,
                on,
            } => {
                let mut output = format!(
                    "{prefix}Join({kind:?}){}\n",
                    if on.is_some() { " on" } else { "" }
                );
                output.push_str(&format!("{prefix}|- Left:\n"));
                output.push_str(&Self::format_table_ref(left, indent + 4));
                output.push_str(&format!("{prefix}`- Right:\n"));
                output.push_str(&Self::format_table_ref(right, indent + 4));
                output
            }
            TableRef::SetOp {
                kind,
                left,
                right,
                alias,
            } => {
                let mut output = format!("{prefix}SetOp({kind:?}) as {}#{}\n", alias.hint, alias.id);
                output.push_str(&format!("{prefix}|- Left:\n"));
                output.push_str(&Self::format_ir_tree(left, indent + 4));
                output.push_str(&format!("{prefix}`- Right:\n"));
                output.push_str(&Self::format_ir_tree(right, indent + 4));
                output
            }
        }
    }
}

fn banner(stage: &str) -> String {
    format!(
        "┌---------------------------------------------------------┐\n\
         | {stage:<56}|\n\
         `---------------------------------------------------------┘\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{lambda, lit, Query};
    use crate::catalog::TableDescriptor;
    use crate::ir::{Shape, SqlExpr, TableAlias};
    use crate::value::ValueType;
    use std::sync::Arc;

    fn table() -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("dbo", "Orders")
                .column("Id", ValueType::Int32)
                .with_element_type("Order"),
        )
    }

    #[test]
    fn test_empty_trace_has_only_frame() {
        let trace = PipelineTrace::new();
        let text = trace.format_trace();
        assert!(text.contains("PIPELINE TRACE"));
        assert!(!text.contains("REWRITING"));
        assert!(!text.contains("OPTIMIZATION"));
    }

    #[test]
    fn test_ir_tree_lists_derived_tables() {
        let inner = SelectNode::from_table(table(), TableAlias::new(1, "o"));
        let mut outer = SelectNode::new(
            Shape::Scalar(SqlExpr::column(2, "Id", ValueType::Int32, false)),
            Some(TableRef::Derived {
                select: Box::new(inner),
                alias: TableAlias::new(2, "t"),
            }),
        );
        outer.limit = RowLimit::Distinct;

        let mut trace = PipelineTrace::new();
        trace.record_ir_before(outer.clone(), ComposeStats::default());
        trace.record_ir_after(outer, OptimizerStats::default());
        let text = trace.format_trace();

        assert_eq!(trace.stats.nodes_before, 2);
        assert!(text.contains("COMPOSITION"));
        assert!(text.contains("distinct"));
        assert!(text.contains("Derived as t#2"));
        assert!(text.contains("Table([dbo].[Orders]) as o#1"));
    }

    #[test]
    fn test_rewrite_stage_shows_operator_chain() {
        let op = Query::from_table(table())
            .filter(lambda("o", |o| o.member("Id").eq(lit(1))))
            .take(5)
            .into_op();
        let mut trace = PipelineTrace::new();
        trace.record_rewrite(op.clone(), op, RewriteStats::default());
        let text = trace.format_trace();

        assert!(text.contains("REWRITING"));
        assert!(text.contains("    Take\n      Where\n        Table([dbo].[Orders])"));
        assert!(!text.contains("Rewritten:"));
    }
}
