//! # Query Compiler
//!
//! Runs the whole pipeline for one operator tree and consults the plan cache.
//!
//! ## Pipeline Position
//!
//! ```text
//! QueryOp (with captured values)
//!     ↓
//! [Rewriter]       → normalized QueryOp
//!     ↓ fingerprint (captured values erased)
//! [PlanCache] ── hit ──────────────────────────┐
//!     ↓ miss                                   │
//! [QueryComposer]  → SelectNode + client ops   │
//!     ↓                                        │
//! [Optimizer]      → optimized SelectNode      │
//!     ↓                                        │
//! [SqlRenderer]    → text + parameter slots    │
//!     ↓                                        │
//! [RowMaterializer::build]                     │
//!     ↓                                        ↓
//! CompiledQuery = Arc<CompiledPlan> + this call's captured values
//! ```
//!
//! A compiler holds no per-query state, so one instance can compile from
//! several threads; the cache is shared through an `Arc`. A cache must only
//! be shared between compilers with the same pass lists and prefix, since
//! the key covers the operator tree only.

use crate::ast::QueryOp;
use crate::code_generator::{RenderedSql, SqlRenderer};
use crate::config::Config;
use crate::error::{CompileResult, ExecutionResult};
use crate::execution::{CompiledPlan, CompiledQuery, Executor, PlanCache};
use crate::ir_builder::QueryComposer;
use crate::materializer::RowMaterializer;
use crate::optimizer::Optimizer;
use crate::pipeline_trace::PipelineTrace;
use crate::rewriting::{RewritePass, Rewriter};
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Compiles operator trees into executable queries
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    rewriting: Vec<RewritePass>,
    optimizer: Optimizer,
    renderer: SqlRenderer,
    cache: Option<Arc<PlanCache>>,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCompiler {
    /// Every pass enabled and a default-sized plan cache
    pub fn new() -> Self {
        QueryCompiler {
            rewriting: RewritePass::ALL.to_vec(),
            optimizer: Optimizer::new(),
            renderer: SqlRenderer::new(),
            cache: Some(Arc::new(PlanCache::with_defaults())),
        }
    }

    /// Build from the `[compiler]` and `[cache]` sections
    pub fn from_config(config: &Config) -> CompileResult<Self> {
        let compiler = &config.compiler;
        let rewriter = Rewriter::from_names(&compiler.rewriting_passes)?;
        let optimizer =
            Optimizer::from_names(&compiler.optimizing_passes, compiler.max_optimizer_iterations)?;
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(PlanCache::new(config.cache.max_entries)));
        Ok(QueryCompiler {
            rewriting: rewriter.passes().to_vec(),
            optimizer,
            renderer: SqlRenderer::new().with_parameter_prefix(compiler.parameter_prefix.clone()),
            cache,
        })
    }

    pub fn with_rewriting_passes(mut self, passes: Vec<RewritePass>) -> Self {
        self.rewriting = passes;
        self
    }

    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_renderer(mut self, renderer: SqlRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Share an existing plan cache
    pub fn with_cache(mut self, cache: Arc<PlanCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn cache(&self) -> Option<&Arc<PlanCache>> {
        self.cache.as_ref()
    }

    /// Compile an operator tree, reusing a cached plan for the same shape
    pub fn compile(&self, op: &QueryOp) -> CompileResult<CompiledQuery> {
        self.compile_inner(op, None)
    }

    /// Compile and record every stage
    pub fn compile_traced(&self, op: &QueryOp) -> CompileResult<(CompiledQuery, PipelineTrace)> {
        let mut trace = PipelineTrace::new();
        let query = self.compile_inner(op, Some(&mut trace))?;
        Ok((query, trace))
    }

    /// Compile and run against `executor`
    pub fn execute<E: Executor + ?Sized>(&self, op: &QueryOp, executor: &E) -> ExecutionResult<Value> {
        self.compile(op)?.execute(executor)
    }

    fn compile_inner(
        &self,
        op: &QueryOp,
        mut trace: Option<&mut PipelineTrace>,
    ) -> CompileResult<CompiledQuery> {
        let mut rewriter = Rewriter::new(self.rewriting.clone());
        let rewritten = rewriter.rewrite(op.clone())?;
        if let Some(trace) = trace.as_deref_mut() {
            trace.record_rewrite(op.clone(), rewritten.clone(), rewriter.stats().clone());
        }

        let fingerprint = rewritten.fingerprint();
        let captured = rewritten.captured_values();

        if let Some(plan) = self.cache.as_ref().and_then(|c| c.get(fingerprint)) {
            debug!(fingerprint = fingerprint.hash, operator = op.name(), "plan cache hit");
            if let Some(trace) = trace {
                trace.record_cache_hit(RenderedSql {
                    sql: plan.sql.clone(),
                    parameters: plan.parameters.clone(),
                });
            }
            return Ok(CompiledQuery::new(plan, captured, true));
        }

        let mut composer = QueryComposer::new();
        let composed = composer.compose_query(&rewritten)?;
        if let Some(trace) = trace.as_deref_mut() {
            trace.record_ir_before(composed.select.clone(), composer.stats.clone());
        }

        let (select, stats) = self.optimizer.optimize(composed.select);
        let rendered = self.renderer.render(&select)?;
        let materializer = RowMaterializer::build(select.shape())?;
        trace!(fingerprint = fingerprint.hash, sql = %rendered.sql, "compiled query");

        if let Some(trace) = trace {
            trace.record_ir_after(select, stats);
            trace.record_sql(rendered.clone());
        }

        let plan = Arc::new(CompiledPlan {
            sql: rendered.sql,
            parameters: rendered.parameters,
            materializer,
            client: composed.client,
            terminal: composed.terminal,
        });

        if let Some(cache) = &self.cache {
            cache.insert(fingerprint, Arc::clone(&plan));
            let stats = cache.stats();
            info!(
                entries = stats.size,
                hits = stats.hits,
                misses = stats.misses,
                evictions = stats.evictions,
                hit_rate = stats.hit_rate(),
                "cached compiled plan"
            );
        }

        Ok(CompiledQuery::new(plan, captured, false))
    }
}
