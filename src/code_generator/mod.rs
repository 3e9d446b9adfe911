//! # SQL Renderer
//!
//! Serializes an optimized select node into query text plus an ordered
//! parameter list.
//!
//! ## Pipeline Position
//!
//! ```text
//! Optimized SelectNode -> [SqlRenderer] -> (SQL text, parameters) -> Executor
//! ```
//!
//! ## Layout
//!
//! - Every clause starts on its own line
//! - Nested selects are indented four spaces inside `(` ... `)`
//! - Table aliases are assigned at their first textual use; a hint already
//!   taken gets `_0`, `_1`, ... appended
//! - Parameters become positional placeholders in order of first use

pub mod dialect;

use crate::error::{CompileError, CompileResult};
use crate::ir::{
    column_name, CollectionSource, InSource, Ordering, ParameterSlot, RowLimit, SelectNode, Shape,
    SqlExpr, SqlUnaryOp, TableId, TableRef,
};
use crate::value::{Value, ValueType};
use dialect::{MssqlDialect, SqlDialect};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

/// One bound parameter of rendered text
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedParameter {
    /// Placeholder as it appears in the text (`@p0`)
    pub placeholder: String,
    pub slot: ParameterSlot,
}

/// Query text and its parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub parameters: Vec<RenderedParameter>,
}

/// Renders select nodes through a dialect
#[derive(Debug, Clone)]
pub struct SqlRenderer {
    dialect: Arc<dyn SqlDialect>,
    parameter_prefix: String,
}

impl Default for SqlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlRenderer {
    /// SQL Server renderer with `@p` placeholders
    pub fn new() -> Self {
        SqlRenderer {
            dialect: Arc::new(MssqlDialect),
            parameter_prefix: "@p".to_string(),
        }
    }

    pub fn with_dialect(mut self, dialect: Arc<dyn SqlDialect>) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_parameter_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.parameter_prefix = prefix.into();
        self
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Render a top-level select
    pub fn render(&self, select: &SelectNode) -> CompileResult<RenderedSql> {
        let mut hints = HashMap::new();
        select.for_each_alias(&mut |alias| {
            hints.insert(alias.id, alias.hint.clone());
        });
        let mut context = RenderContext {
            dialect: self.dialect.as_ref(),
            prefix: &self.parameter_prefix,
            hints,
            names: HashMap::new(),
            used: HashSet::new(),
            parameters: Vec::new(),
        };
        let sql = context.select(select, Context::TopLevel)?;
        trace!(sql = %sql, parameters = context.parameters.len(), "rendered SQL");
        Ok(RenderedSql {
            sql,
            parameters: context.parameters,
        })
    }
}

/// Where a select appears; decides how its root column is named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    TopLevel,
    /// Derived table or set operand: every column needs a name
    Table,
    /// Structured-array subquery: every column needs a name
    Json,
    /// Scalar subquery, `IN` source or `EXISTS` body
    Subquery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Value,
    Predicate,
}

struct RenderContext<'a> {
    dialect: &'a dyn SqlDialect,
    prefix: &'a str,
    hints: HashMap<TableId, String>,
    names: HashMap<TableId, String>,
    used: HashSet<String>,
    parameters: Vec<RenderedParameter>,
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The expression a root (unnamed) column carries, if the shape has one
fn root_scalar(shape: &Shape) -> Option<&SqlExpr> {
    match shape {
        Shape::Scalar(e) => Some(e),
        Shape::Optional { inner, .. } => root_scalar(inner),
        Shape::Collection(c) => match &c.source {
            CollectionSource::Encoded(e) => Some(e),
            CollectionSource::Template { .. } => None,
        },
        _ => None,
    }
}

impl RenderContext<'_> {
    // ========================================================================
    // Statements
    // ========================================================================

    fn select(&mut self, select: &SelectNode, context: Context) -> CompileResult<String> {
        if select.having.is_some() && select.grouping.is_empty() {
            return Err(CompileError::InvariantViolation(
                "HAVING without grouping keys".to_string(),
            ));
        }

        let mut head = String::from("SELECT ");
        match &select.limit {
            RowLimit::Distinct => head.push_str("DISTINCT "),
            RowLimit::Top(count) => {
                let count = self.expr(count, Position::Value)?;
                head.push_str(&self.dialect.emit_top(&count));
                head.push(' ');
            }
            RowLimit::None | RowLimit::Offset { .. } => {}
        }
        head.push_str(&self.columns(select, context)?);

        let mut lines = vec![head];
        if let Some(from) = &select.from {
            lines.push(format!("FROM {}", self.table(from)?));
        }
        if let Some(predicate) = &select.predicate {
            lines.push(format!("WHERE {}", self.expr(predicate, Position::Predicate)?));
        }
        if !select.grouping.is_empty() {
            let keys = select
                .grouping
                .iter()
                .map(|k| self.expr(k, Position::Value))
                .collect::<CompileResult<Vec<_>>>()?;
            lines.push(format!("GROUP BY {}", keys.join(", ")));
        }
        if let Some(having) = &select.having {
            lines.push(format!("HAVING {}", self.expr(having, Position::Predicate)?));
        }
        if !select.ordering.is_empty() {
            lines.push(format!("ORDER BY {}", self.ordering(&select.ordering)?));
        }
        if let RowLimit::Offset { offset, fetch } = &select.limit {
            if select.ordering.is_empty() {
                return Err(CompileError::InvariantViolation(
                    "OFFSET requires an ORDER BY list".to_string(),
                ));
            }
            let offset = self.expr(offset, Position::Value)?;
            let fetch = fetch
                .as_ref()
                .map(|f| self.expr(f, Position::Value))
                .transpose()?;
            lines.push(self.dialect.emit_offset(&offset, fetch.as_deref()));
        }
        if context == Context::Json {
            lines.push(self.dialect.json_directive().to_string());
        }
        Ok(lines.join("\n"))
    }

    /// `(` nested select `)` with the body indented
    fn nested(&mut self, select: &SelectNode, context: Context) -> CompileResult<String> {
        let body = self.select(select, context)?;
        Ok(format!("(\n{}\n)", indent(&body)))
    }

    fn columns(&mut self, select: &SelectNode, context: Context) -> CompileResult<String> {
        let shape_columns = select.shape().columns()?;
        if shape_columns.is_empty() && select.hidden.is_empty() {
            return Err(CompileError::InvariantViolation(
                "select has an empty projection".to_string(),
            ));
        }
        let root = root_scalar(select.shape());
        let mut out = Vec::with_capacity(shape_columns.len() + select.hidden.len());
        for column in &shape_columns {
            let text = self.projected(&column.expr)?;
            let is_root =
                root == Some(&column.expr) && column.name == column_name("", &column.expr);
            let named = match (is_root, context) {
                (false, _) => true,
                (true, Context::TopLevel | Context::Subquery) => false,
                (true, Context::Table | Context::Json) => {
                    !matches!(column.expr, SqlExpr::Column(_))
                }
            };
            out.push(if named {
                format!("{text} AS {}", self.dialect.quote_ident(&column.name))
            } else {
                text
            });
        }
        for column in &select.hidden {
            let text = self.projected(&column.expr)?;
            out.push(format!("{text} AS {}", self.dialect.quote_ident(&column.name)));
        }
        Ok(out.join(", "))
    }

    /// A projected value: predicates become `BIT` values
    fn projected(&mut self, expr: &SqlExpr) -> CompileResult<String> {
        match expr {
            SqlExpr::Constant(Value::Bool(b)) => Ok(format!(
                "CAST({} AS {})",
                self.dialect.emit_boolean(*b),
                self.dialect.type_name(ValueType::Bool)
            )),
            e if e.is_predicate() => Ok(format!(
                "CAST({} AS {})",
                self.expr(e, Position::Value)?,
                self.dialect.type_name(ValueType::Bool)
            )),
            e => self.expr(e, Position::Value),
        }
    }

    fn ordering(&mut self, ordering: &[Ordering]) -> CompileResult<String> {
        let terms = ordering
            .iter()
            .map(|o| {
                let direction = if o.descending { "DESC" } else { "ASC" };
                Ok(format!("{} {direction}", self.expr(&o.expr, Position::Value)?))
            })
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(terms.join(", "))
    }

    fn table(&mut self, table: &TableRef) -> CompileResult<String> {
        match table {
            TableRef::Base { table, alias } => {
                let name = format!(
                    "{}.{}",
                    self.dialect.quote_ident(&table.schema),
                    self.dialect.quote_ident(&table.name)
                );
                Ok(format!("{name} AS {}", self.alias(alias.id)?))
            }
            TableRef::Derived { select, alias } => {
                let body = self.nested(select, Context::Table)?;
                Ok(format!("{body} AS {}", self.alias(alias.id)?))
            }
            TableRef::Join {
                kind,
                left,
                right,
                on,
            } => {
                let left = self.table(left)?;
                let right = self.table(right)?;
                let mut text = format!("{left}\n{} {right}", self.dialect.emit_join_kind(*kind));
                if let Some(on) = on {
                    text.push_str(" ON ");
                    text.push_str(&self.expr(on, Position::Predicate)?);
                }
                Ok(text)
            }
            TableRef::SetOp {
                kind,
                left,
                right,
                alias,
            } => {
                let (l, r) = (left.output_columns()?, right.output_columns()?);
                if l.len() != r.len() {
                    return Err(CompileError::InvariantViolation(format!(
                        "set operands project {} and {} columns",
                        l.len(),
                        r.len()
                    )));
                }
                let left = self.select(left, Context::Table)?;
                let right = self.select(right, Context::Table)?;
                let body = format!("{left}\n{}\n{right}", self.dialect.emit_set_kind(*kind));
                Ok(format!("(\n{}\n) AS {}", indent(&body), self.alias(alias.id)?))
            }
        }
    }

    fn alias(&mut self, id: TableId) -> CompileResult<String> {
        if let Some(name) = self.names.get(&id) {
            return Ok(self.dialect.quote_ident(name));
        }
        let hint = self.hints.get(&id).cloned().ok_or_else(|| {
            CompileError::InvariantViolation(format!("column refers to undefined table #{id}"))
        })?;
        let mut name = hint.clone();
        let mut suffix = 0;
        while self.used.contains(&name) {
            name = format!("{hint}_{suffix}");
            suffix += 1;
        }
        self.used.insert(name.clone());
        self.names.insert(id, name.clone());
        Ok(self.dialect.quote_ident(&name))
    }

    fn parameter(&mut self, slot: &ParameterSlot) -> String {
        if let Some(p) = self.parameters.iter().find(|p| p.slot.name == slot.name) {
            return p.placeholder.clone();
        }
        let placeholder = self
            .dialect
            .parameter_placeholder(self.prefix, self.parameters.len());
        self.parameters.push(RenderedParameter {
            placeholder: placeholder.clone(),
            slot: slot.clone(),
        });
        placeholder
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expr(&mut self, expr: &SqlExpr, position: Position) -> CompileResult<String> {
        match (position, expr) {
            (Position::Predicate, SqlExpr::Constant(Value::Bool(b))) => {
                return Ok(self.dialect.emit_boolean_predicate(*b))
            }
            (Position::Predicate, e) if !e.is_predicate() => {
                let value = self.operand(e, Position::Value)?;
                return Ok(format!("{value} = {}", self.dialect.emit_boolean(true)));
            }
            (Position::Value, e) if e.is_predicate() => {
                let predicate = self.expr(e, Position::Predicate)?;
                return Ok(format!("(CASE WHEN {predicate} THEN 1 ELSE 0 END)"));
            }
            _ => {}
        }

        Ok(match expr {
            SqlExpr::Column(c) => {
                format!("{}.{}", self.alias(c.table)?, self.dialect.quote_ident(&c.name))
            }
            SqlExpr::Constant(value) => self.literal(value)?,
            SqlExpr::Parameter(slot) => self.parameter(slot),
            SqlExpr::Binary { op, left, right } => {
                let operands = if op.is_logical() {
                    Position::Predicate
                } else {
                    Position::Value
                };
                let left = self.operand(left, operands)?;
                let right = self.operand(right, operands)?;
                format!("{left} {} {right}", op.symbol())
            }
            SqlExpr::Unary { op, operand } => match op {
                SqlUnaryOp::Not => match &**operand {
                    SqlExpr::Exists(select) => {
                        format!("NOT EXISTS {}", self.nested(select, Context::Subquery)?)
                    }
                    other => format!("NOT ({})", self.expr(other, Position::Predicate)?),
                },
                SqlUnaryOp::Negate => format!("-{}", self.operand(operand, Position::Value)?),
                SqlUnaryOp::BitNot => format!("~{}", self.operand(operand, Position::Value)?),
            },
            SqlExpr::IsNull { operand, negated } => {
                let operand = self.operand(operand, Position::Value)?;
                if *negated {
                    format!("{operand} IS NOT NULL")
                } else {
                    format!("{operand} IS NULL")
                }
            }
            SqlExpr::Case { whens, otherwise } => {
                let mut text = String::from("(CASE");
                for (when, then) in whens {
                    let when = self.expr(when, Position::Predicate)?;
                    let then = self.expr(then, Position::Value)?;
                    text.push_str(&format!(" WHEN {when} THEN {then}"));
                }
                match otherwise {
                    Some(e) => text.push_str(&format!(" ELSE {}", self.expr(e, Position::Value)?)),
                    None => text.push_str(&format!(" ELSE {}", self.dialect.emit_null())),
                }
                text.push_str(" END)");
                text
            }
            SqlExpr::Cast { operand, ty } => format!(
                "CAST({} AS {})",
                self.expr(operand, Position::Value)?,
                self.dialect.type_name(*ty)
            ),
            SqlExpr::Function { function, args } => {
                let args = args
                    .iter()
                    .map(|a| self.expr(a, Position::Value))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.dialect.emit_function(*function, &args)
            }
            SqlExpr::Aggregate {
                kind,
                distinct,
                operand,
            } => {
                let name = self.dialect.aggregate_name(*kind);
                match operand {
                    None => format!("{name}(*)"),
                    Some(operand) => {
                        let operand = self.expr(operand, Position::Value)?;
                        if *distinct {
                            format!("{name}(DISTINCT {operand})")
                        } else {
                            format!("{name}({operand})")
                        }
                    }
                }
            }
            SqlExpr::RowNumber { ordering } => {
                let terms = if ordering.is_empty() {
                    format!("{} ASC", self.dialect.noop_ordering())
                } else {
                    self.ordering(ordering)?
                };
                format!("ROW_NUMBER() OVER(ORDER BY {terms})")
            }
            SqlExpr::Exists(select) => format!("EXISTS {}", self.nested(select, Context::Subquery)?),
            SqlExpr::ScalarSubquery(select) => self.nested(select, Context::Subquery)?,
            SqlExpr::JsonArray(select) => self.nested(select, Context::Json)?,
            SqlExpr::In { operand, source } => {
                let operand = self.operand(operand, Position::Value)?;
                match source {
                    InSource::Values(values) if values.is_empty() => {
                        self.dialect.emit_boolean_predicate(false)
                    }
                    InSource::Values(values) => {
                        let values = values
                            .iter()
                            .map(|v| self.expr(v, Position::Value))
                            .collect::<CompileResult<Vec<_>>>()?;
                        format!("{operand} IN ({})", values.join(", "))
                    }
                    InSource::Select(select) => {
                        format!("{operand} IN {}", self.nested(select, Context::Subquery)?)
                    }
                    InSource::Serialized(slot) => {
                        let placeholder = self.parameter(slot);
                        format!("{operand} IN ({})", self.dialect.emit_serialized_list(&placeholder))
                    }
                }
            }
            SqlExpr::Fragment { sql, .. } => sql.clone(),
        })
    }

    /// An operand of an operator: bare binary forms are parenthesized
    fn operand(&mut self, expr: &SqlExpr, position: Position) -> CompileResult<String> {
        let text = self.expr(expr, position)?;
        let becomes_case = position == Position::Value && expr.is_predicate();
        if matches!(expr, SqlExpr::Binary { .. } | SqlExpr::IsNull { .. }) && !becomes_case {
            Ok(format!("({text})"))
        } else {
            Ok(text)
        }
    }

    fn literal(&self, value: &Value) -> CompileResult<String> {
        Ok(match value {
            Value::Null => self.dialect.emit_null().to_string(),
            Value::Bool(b) => self.dialect.emit_boolean(*b),
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Float64(f) => format!("{f:?}"),
            Value::String(s) => self.dialect.quote_string(s),
            Value::DateTime(dt) => self.dialect.emit_datetime(dt),
            Value::List(_) | Value::Object(_) => {
                return Err(CompileError::InvariantViolation(format!(
                    "structured constant {value:?} has no SQL literal"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableDescriptor;
    use crate::ir::{AggregateKind, JoinKind, ProjectedColumn, SqlBinaryOp, TableAlias};

    fn table(name: &str) -> Arc<TableDescriptor> {
        Arc::new(
            TableDescriptor::new("dbo", name)
                .nullable_column("Prop1", ValueType::String)
                .column("Prop2", ValueType::Int32),
        )
    }

    fn prop2(id: TableId) -> SqlExpr {
        SqlExpr::column(id, "Prop2", ValueType::Int32, false)
    }

    fn render(select: &SelectNode) -> String {
        SqlRenderer::new().render(select).expect("renders").sql
    }

    #[test]
    fn test_simple_select_with_filter() {
        let mut select = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        select.add_predicate(SqlExpr::eq(
            SqlExpr::column(1, "Prop1", ValueType::String, true),
            SqlExpr::constant("What the"),
        ));
        assert_eq!(
            render(&select),
            "SELECT [m].[Prop1] AS [Prop1], [m].[Prop2] AS [Prop2]\n\
             FROM [dbo].[MyClass1] AS [m]\n\
             WHERE [m].[Prop1] = N'What the'"
        );
    }

    #[test]
    fn test_aliases_follow_text_order() {
        // The derived table is referenced in the select list before its body
        let mut inner = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        inner.limit = RowLimit::Top(SqlExpr::constant(1));
        let select = SelectNode::new(
            Shape::Scalar(prop2(2)),
            Some(TableRef::Derived {
                select: Box::new(inner),
                alias: TableAlias::new(2, "m"),
            }),
        );
        assert_eq!(
            render(&select),
            "SELECT [m].[Prop2]\n\
             FROM (\n    \
             SELECT TOP (1) [m_0].[Prop1] AS [Prop1], [m_0].[Prop2] AS [Prop2]\n    \
             FROM [dbo].[MyClass1] AS [m_0]\n\
             ) AS [m]"
        );
    }

    #[test]
    fn test_skip_renders_offset_after_noop_ordering() {
        let mut select = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        select.ordering.push(Ordering::asc(SqlExpr::RowNumber {
            ordering: Vec::new(),
        }));
        select.limit = RowLimit::Offset {
            offset: SqlExpr::constant(1),
            fetch: None,
        };
        assert!(render(&select).ends_with(
            "ORDER BY ROW_NUMBER() OVER(ORDER BY (SELECT 1) ASC) ASC\nOFFSET 1 ROWS"
        ));
    }

    #[test]
    fn test_offset_without_ordering_fails() {
        let mut select = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        select.limit = RowLimit::Offset {
            offset: SqlExpr::constant(1),
            fetch: None,
        };
        assert!(matches!(
            SqlRenderer::new().render(&select),
            Err(CompileError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_exists_projection_is_cast_to_bit() {
        let mut body = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        body.set_shape(Shape::Scalar(SqlExpr::constant(1)));
        body.add_predicate(SqlExpr::binary(SqlBinaryOp::Greater, prop2(1), SqlExpr::constant(88)));
        let select = SelectNode::new(Shape::Scalar(SqlExpr::Exists(Box::new(body))), None);
        assert_eq!(
            render(&select),
            "SELECT CAST((CASE WHEN EXISTS (\n    \
             SELECT 1\n    \
             FROM [dbo].[MyClass1] AS [m]\n    \
             WHERE [m].[Prop2] > 88\n\
             ) THEN 1 ELSE 0 END) AS BIT)"
        );
    }

    #[test]
    fn test_parameters_are_numbered_once_per_slot() {
        let slot = ParameterSlot {
            name: "x".to_string(),
            ty: ValueType::Int32,
            nullable: false,
            serialized: false,
        };
        let mut select = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        select.add_predicate(SqlExpr::eq(prop2(1), SqlExpr::Parameter(slot.clone())));
        select.add_predicate(SqlExpr::binary(
            SqlBinaryOp::Less,
            SqlExpr::Parameter(slot),
            SqlExpr::constant(10),
        ));
        let rendered = SqlRenderer::new().render(&select).expect("renders");
        assert!(rendered.sql.ends_with("WHERE ([m].[Prop2] = @p0) AND (@p0 < 10)"));
        assert_eq!(rendered.parameters.len(), 1);
        assert_eq!(rendered.parameters[0].placeholder, "@p0");
    }

    #[test]
    fn test_serialized_list_reads_json_parameter() {
        let slot = ParameterSlot {
            name: "ids".to_string(),
            ty: ValueType::Int32,
            nullable: false,
            serialized: true,
        };
        let mut select = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        select.add_predicate(SqlExpr::In {
            operand: Box::new(prop2(1)),
            source: InSource::Serialized(slot),
        });
        assert!(render(&select)
            .ends_with("WHERE [m].[Prop2] IN (SELECT [value] FROM OPENJSON(@p0))"));
    }

    #[test]
    fn test_left_join_on_true_and_empty_flag() {
        let placeholder = SelectNode::new(
            Shape::Object(vec![(
                "$empty".to_string(),
                Shape::Scalar(SqlExpr::Constant(Value::Null)),
            )]),
            None,
        );
        let mut right = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        let inner = right.shape().clone();
        right.set_shape(Shape::Optional {
            flag: SqlExpr::constant(0),
            inner: Box::new(inner),
        });
        let from = TableRef::join(
            JoinKind::Left,
            TableRef::Derived {
                select: Box::new(placeholder),
                alias: TableAlias::new(2, "t"),
            },
            TableRef::Derived {
                select: Box::new(right),
                alias: TableAlias::new(3, "t"),
            },
            Some(SqlExpr::constant(true)),
        );
        let select = SelectNode::new(
            Shape::Scalar(SqlExpr::column(3, "$empty", ValueType::Int32, true)),
            Some(from),
        );
        assert_eq!(
            render(&select),
            "SELECT [t].[$empty]\n\
             FROM (\n    \
             SELECT NULL AS [$empty]\n\
             ) AS [t_0]\n\
             LEFT JOIN (\n    \
             SELECT 0 AS [$empty], [m].[Prop1] AS [Prop1], [m].[Prop2] AS [Prop2]\n    \
             FROM [dbo].[MyClass1] AS [m]\n\
             ) AS [t] ON 1 = 1"
        );
    }

    #[test]
    fn test_hidden_row_number_and_filtered_count() {
        let mut select = SelectNode::from_table(table("MyClass1"), TableAlias::new(1, "m"));
        select.set_shape(Shape::Scalar(SqlExpr::Aggregate {
            kind: AggregateKind::Count,
            distinct: false,
            operand: Some(Box::new(SqlExpr::Case {
                whens: vec![(
                    SqlExpr::binary(SqlBinaryOp::Greater, prop2(1), SqlExpr::constant(7)),
                    SqlExpr::constant(1),
                )],
                otherwise: Some(Box::new(SqlExpr::Constant(Value::Null))),
            })),
        }));
        select.hidden.push(ProjectedColumn {
            name: "$rownumber".to_string(),
            expr: SqlExpr::RowNumber {
                ordering: vec![Ordering::asc(prop2(1))],
            },
        });
        assert_eq!(
            render(&select),
            "SELECT COUNT((CASE WHEN [m].[Prop2] > 7 THEN 1 ELSE NULL END)), \
             ROW_NUMBER() OVER(ORDER BY [m].[Prop2] ASC) AS [$rownumber]\n\
             FROM [dbo].[MyClass1] AS [m]"
        );
    }

    #[test]
    fn test_undefined_table_is_an_invariant_violation() {
        let select = SelectNode::new(Shape::Scalar(prop2(42)), None);
        assert!(matches!(
            SqlRenderer::new().render(&select),
            Err(CompileError::InvariantViolation(_))
        ));
    }
}
