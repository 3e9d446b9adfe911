//! # sqlweave
//!
//! A query compiler that turns composable, deferred operator trees into SQL
//! Server text, runs it through a caller-supplied executor and rebuilds
//! typed results from the returned rows.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Operator tree (ast::Query builder, captured values)
//!     ↓
//! [Rewriting Passes]      → normalized QueryOp
//!     ↓
//! [Plan Cache]            → hit: reuse plan, re-bind captured values
//!     ↓ miss
//! [Query Composer]        → SelectNode (relational IR) + client operators
//!     ↓
//! [Optimizing Passes]     → key orientation, column pruning, boolean folding
//!     ↓
//! [SQL Renderer]          → text + ordered parameter slots
//!     ↓
//! [Materializer Builder]  → row reconstruction plan
//!     ↓
//! [Executor] → rows → [Materializer] → [In-Memory Evaluator] → Value
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sqlweave::ast::builders::{captured, lambda, Query};
//! use sqlweave::{Catalog, QueryCompiler, ValueType};
//!
//! let mut catalog = Catalog::new();
//! let orders = catalog.register(
//!     catalog
//!         .define("Orders")
//!         .column("Id", ValueType::Int32)
//!         .column("Total", ValueType::Float64),
//! );
//!
//! let query = Query::from_table(orders)
//!     .filter(lambda("o", |o| o.member("Total").gt(captured("minimum", 100.0))))
//!     .into_op();
//!
//! let compiler = QueryCompiler::new();
//! let compiled = compiler.compile(&query)?;
//! println!("{}", compiled.sql());
//! let totals: Vec<serde_json::Value> = compiled.execute_as(&my_executor)?;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | Operator trees, expressions, fluent builder |
//! | `rewriting` | Tree-to-tree normalizations before composition |
//! | `translatability` | Server versus in-memory classification |
//! | `ir` | Select nodes, table references, scalar expressions, shapes |
//! | `ir_builder` | Query composer with pushdown and join rules |
//! | `optimizer` | Fixpoint IR passes |
//! | `code_generator` | SQL Server rendering |
//! | `materializer` | Row to value reconstruction |
//! | `evaluator` | In-memory evaluation of expressions and operators |
//! | `execution` | Compiled plans, executor contract, plan cache |
//! | `compiler` | Pipeline facade |

pub mod ast;
pub mod catalog;
pub mod code_generator;
pub mod compiler;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod execution;
pub mod ir;
pub mod ir_builder;
pub mod logging;
pub mod materializer;
pub mod optimizer;
pub mod pipeline_trace;
pub mod rewriting;
pub mod translatability;
pub mod value;

// Re-export public types
pub use ast::builders::Query;
pub use ast::{Expr, Fingerprint, Lambda, QueryOp};
pub use catalog::{Catalog, ColumnDescriptor, TableDescriptor};
pub use code_generator::{RenderedParameter, RenderedSql, SqlRenderer};
pub use compiler::QueryCompiler;
pub use config::Config;
pub use error::{CompileError, CompileResult, ExecutionError, ExecutionResult};
pub use evaluator::Evaluator;
pub use execution::{
    BoundParameter, CacheStats, CompiledPlan, CompiledQuery, Executor, PlanCache, Row,
};
pub use ir::SelectNode;
pub use ir_builder::QueryComposer;
pub use materializer::RowMaterializer;
pub use optimizer::Optimizer;
pub use pipeline_trace::PipelineTrace;
pub use rewriting::Rewriter;
pub use value::{Value, ValueType};
