//! Database dialect trait for SQL emission
//!
//! The renderer decides structure (clause order, nesting, aliasing); the
//! dialect supplies the vendor spelling of each piece.

use crate::ir::{AggregateKind, DatePart, JoinKind, SetKind, SqlFunction};
use crate::value::{ValueType, DATETIME_FORMAT};
use chrono::NaiveDateTime;
use std::fmt;

/// Vendor-specific spelling of SQL fragments
pub trait SqlDialect: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column or alias name)
    fn quote_ident(&self, ident: &str) -> String;

    /// Quote a string literal
    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    /// Boolean literal in value position
    fn emit_boolean(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }

    /// Boolean literal in predicate position
    fn emit_boolean_predicate(&self, value: bool) -> String {
        if value { "1 = 1" } else { "0 = 1" }.to_string()
    }

    fn emit_null(&self) -> &'static str {
        "NULL"
    }

    fn emit_datetime(&self, value: &NaiveDateTime) -> String {
        format!("'{}'", value.format(DATETIME_FORMAT))
    }

    fn type_name(&self, ty: ValueType) -> &'static str;

    fn parameter_placeholder(&self, prefix: &str, index: usize) -> String {
        format!("{prefix}{index}")
    }

    /// Row limit placed right after `SELECT`
    fn emit_top(&self, count: &str) -> String;

    /// Row limit clause placed after `ORDER BY`
    fn emit_offset(&self, offset: &str, fetch: Option<&str>) -> String;

    /// Ordering used where one is required but any order will do
    fn noop_ordering(&self) -> &'static str;

    /// Directive turning a select into one structured-array value
    fn json_directive(&self) -> &'static str;

    /// Row source reading the elements of a serialized collection parameter
    fn emit_serialized_list(&self, placeholder: &str) -> String;

    fn emit_join_kind(&self, kind: JoinKind) -> &'static str {
        match kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Cross => "CROSS JOIN",
            JoinKind::CrossApply => "CROSS APPLY",
            JoinKind::OuterApply => "OUTER APPLY",
            JoinKind::Full => "FULL JOIN",
        }
    }

    fn emit_set_kind(&self, kind: SetKind) -> &'static str {
        match kind {
            SetKind::Union => "UNION",
            SetKind::UnionAll => "UNION ALL",
            SetKind::Except => "EXCEPT",
            SetKind::Intersect => "INTERSECT",
        }
    }

    fn aggregate_name(&self, kind: AggregateKind) -> &'static str;

    /// Call of a scalar function over already rendered arguments
    fn emit_function(&self, function: SqlFunction, args: &[String]) -> String;
}

/// Microsoft SQL Server
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl SqlDialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn quote_string(&self, s: &str) -> String {
        format!("N'{}'", s.replace('\'', "''"))
    }

    fn type_name(&self, ty: ValueType) -> &'static str {
        match ty {
            ValueType::Bool => "BIT",
            ValueType::Int32 => "int",
            ValueType::Int64 => "bigint",
            ValueType::Float64 => "float",
            ValueType::String | ValueType::Json => "nvarchar(max)",
            ValueType::DateTime => "datetime2",
        }
    }

    fn emit_top(&self, count: &str) -> String {
        format!("TOP ({count})")
    }

    fn emit_offset(&self, offset: &str, fetch: Option<&str>) -> String {
        match fetch {
            Some(fetch) => format!("OFFSET {offset} ROWS FETCH NEXT {fetch} ROWS ONLY"),
            None => format!("OFFSET {offset} ROWS"),
        }
    }

    fn noop_ordering(&self) -> &'static str {
        "(SELECT 1)"
    }

    fn json_directive(&self) -> &'static str {
        "FOR JSON PATH, INCLUDE_NULL_VALUES"
    }

    fn emit_serialized_list(&self, placeholder: &str) -> String {
        format!("SELECT [value] FROM OPENJSON({placeholder})")
    }

    fn aggregate_name(&self, kind: AggregateKind) -> &'static str {
        match kind {
            AggregateKind::Count => "COUNT",
            AggregateKind::CountBig => "COUNT_BIG",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
        }
    }

    fn emit_function(&self, function: SqlFunction, args: &[String]) -> String {
        let call = |name: &str| format!("{name}({})", args.join(", "));
        match function {
            SqlFunction::Upper => call("UPPER"),
            SqlFunction::Lower => call("LOWER"),
            SqlFunction::LTrim => call("LTRIM"),
            SqlFunction::RTrim => call("RTRIM"),
            SqlFunction::Len => call("LEN"),
            SqlFunction::Substring => call("SUBSTRING"),
            SqlFunction::Replace => call("REPLACE"),
            SqlFunction::CharIndex => call("CHARINDEX"),
            SqlFunction::Left => call("LEFT"),
            SqlFunction::Right => call("RIGHT"),
            SqlFunction::Coalesce => call("COALESCE"),
            SqlFunction::Abs => call("ABS"),
            SqlFunction::DatePart(part) => {
                let part = match part {
                    DatePart::Year => "year",
                    DatePart::Month => "month",
                    DatePart::Day => "day",
                    DatePart::Hour => "hour",
                    DatePart::Minute => "minute",
                    DatePart::Second => "second",
                };
                format!("DATEPART({part}, {})", args.join(", "))
            }
            SqlFunction::DateOnly => format!("CAST({} AS date)", args.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_quoting_doubles_closing_bracket() {
        assert_eq!(MssqlDialect.quote_ident("Order Details"), "[Order Details]");
        assert_eq!(MssqlDialect.quote_ident("a]b"), "[a]]b]");
    }

    #[test]
    fn test_unicode_string_literal() {
        assert_eq!(MssqlDialect.quote_string("it's"), "N'it''s'");
    }

    #[test]
    fn test_offset_with_and_without_fetch() {
        assert_eq!(MssqlDialect.emit_offset("1", None), "OFFSET 1 ROWS");
        assert_eq!(
            MssqlDialect.emit_offset("0", Some("1")),
            "OFFSET 0 ROWS FETCH NEXT 1 ROWS ONLY"
        );
    }

    #[test]
    fn test_date_part_call() {
        let args = vec!["[m].[Created]".to_string()];
        assert_eq!(
            MssqlDialect.emit_function(SqlFunction::DatePart(DatePart::Year), &args),
            "DATEPART(year, [m].[Created])"
        );
    }
}
