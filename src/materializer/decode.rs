//! Structured-array column decoding.
//!
//! A nested collection is one column holding a JSON array, one object per
//! element, with properties named after the element's projected columns.
//! Dotted column names (`Inner.Prop`) may arrive either flat or as nested
//! objects, depending on how the server shaped the path.

use super::RowMaterializer;
use crate::error::{ExecutionError, ExecutionResult};
use crate::evaluator::Evaluator;
use crate::value::Value;
use serde_json::Value as Json;

static MISSING: Json = Json::Null;

/// Decode one structured-array column; SQL `NULL` is an empty collection
pub(crate) fn decode_collection(
    column: &Value,
    element: &RowMaterializer,
    evaluator: &Evaluator<'_>,
) -> ExecutionResult<Value> {
    let json = match column {
        Value::Null => return Ok(Value::List(Vec::new())),
        Value::String(text) => serde_json::from_str::<Json>(text)
            .map_err(|e| ExecutionError::Decode(format!("structured column: {e}")))?,
        // Some executors hand nested arrays back already parsed
        Value::List(_) => column.to_json(),
        other => {
            return Err(ExecutionError::Decode(format!(
                "expected a structured array, found {other}"
            )))
        }
    };
    let items = match json {
        Json::Array(items) => items,
        Json::Null => return Ok(Value::List(Vec::new())),
        other => {
            return Err(ExecutionError::Decode(format!(
                "expected a JSON array, found {other}"
            )))
        }
    };
    items
        .iter()
        .map(|item| {
            let row: Vec<Value> = element
                .columns()
                .iter()
                .map(|column| Value::from_json(property(item, &column.name), column.ty))
                .collect();
            element.materialize(&row, evaluator)
        })
        .collect::<ExecutionResult<_>>()
        .map(Value::List)
}

/// Property `name` of an element object; missing properties read as null
fn property<'j>(item: &'j Json, name: &str) -> &'j Json {
    if let Some(value) = item.get(name) {
        return value;
    }
    let mut current = item;
    for segment in name.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return &MISSING,
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_and_nested_paths_resolve() {
        let flat = json!({"Inner.Prop": 1});
        let nested = json!({"Inner": {"Prop": 2}});
        assert_eq!(property(&flat, "Inner.Prop"), &json!(1));
        assert_eq!(property(&nested, "Inner.Prop"), &json!(2));
        assert_eq!(property(&nested, "Inner.Other"), &Json::Null);
    }

    #[test]
    fn test_malformed_column_is_a_decode_error() {
        let plan = RowMaterializer::build(&crate::ir::Shape::Object(vec![])).unwrap();
        let result = decode_collection(&Value::from("{not json"), &plan, &Evaluator::new());
        assert!(matches!(result, Err(ExecutionError::Decode(_))));
        let result = decode_collection(&Value::Int32(3), &plan, &Evaluator::new());
        assert!(matches!(result, Err(ExecutionError::Decode(_))));
    }
}
