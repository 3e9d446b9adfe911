//! # Materializer
//!
//! Plans for rebuilding result values from the rows the server returns.
//!
//! ## Pipeline Position
//!
//! ```text
//! Root Shape → [Materializer::build] → RowMaterializer
//! Row values → [RowMaterializer::materialize] → Value
//! ```
//!
//! A plan walks the shape in the same order the projection flattens it, so
//! every scalar leaf is bound to the ordinal of its column. Nested
//! collections arrive as one structured-array column per row; their elements
//! are decoded by name into element rows and rebuilt with the element plan
//! (see [`decode`]). Client-evaluated members are computed from their
//! materialized bindings by the [`Evaluator`].

mod decode;

use crate::ast::Lambda;
use crate::error::{CompileError, CompileResult, ExecutionError, ExecutionResult};
use crate::evaluator::{grouping_value, Env, Evaluator};
use crate::ir::{CollectionSource, Shape, SqlExpr};
use crate::value::{Value, ValueType};

/// Name, type and nullability of one materialized column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
}

/// Reconstruction plan for one value of a row
#[derive(Debug, Clone, PartialEq)]
pub enum Materializer {
    /// Scalar read from a column and converted to its declared type
    Column { ordinal: usize, ty: ValueType },
    /// Member-initialized object, members in declaration order
    Object(Vec<(String, Materializer)>),
    /// Null when the `$empty` discriminator column is null
    Optional { flag: usize, inner: Box<Materializer> },
    /// Structured-array column decoded element by element
    Collection {
        ordinal: usize,
        element: Box<RowMaterializer>,
    },
    /// Group key plus its correlated elements
    Grouping {
        key: Box<Materializer>,
        elements: Box<Materializer>,
    },
    /// Computed in memory from materialized bindings
    Client {
        function: Lambda,
        bindings: Vec<Materializer>,
    },
}

/// A materializer over a row with a known column layout
#[derive(Debug, Clone, PartialEq)]
pub struct RowMaterializer {
    columns: Vec<ColumnInfo>,
    root: Materializer,
}

impl RowMaterializer {
    /// Build the plan for rows projected from `shape`
    pub fn build(shape: &Shape) -> CompileResult<Self> {
        let columns = shape
            .columns()?
            .into_iter()
            .map(|c| ColumnInfo {
                ty: c.expr.value_type(),
                nullable: c.expr.is_nullable(),
                name: c.name,
            })
            .collect();
        let mut next = 0;
        let root = Materializer::build(shape, &mut next)?;
        Ok(RowMaterializer { columns, root })
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn root(&self) -> &Materializer {
        &self.root
    }

    /// Rebuild one value from a row laid out as [`columns`](Self::columns)
    /// (trailing columns are ignored)
    pub fn materialize(&self, row: &[Value], evaluator: &Evaluator<'_>) -> ExecutionResult<Value> {
        if row.len() < self.columns.len() {
            return Err(ExecutionError::Decode(format!(
                "row has {} value(s), plan reads {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.root.materialize(row, evaluator)
    }

    /// Value returned by an `OrDefault` operator when there is no row
    pub fn default_value(&self) -> Value {
        match (&self.root, self.columns.as_slice()) {
            (Materializer::Column { .. }, [column]) if !column.nullable => default_of(column.ty),
            _ => Value::Null,
        }
    }
}

/// Default of a non-nullable scalar type; reference-like types default to null
pub fn default_of(ty: ValueType) -> Value {
    match ty {
        ValueType::Bool => Value::Bool(false),
        ValueType::Int32 => Value::Int32(0),
        ValueType::Int64 => Value::Int64(0),
        ValueType::Float64 => Value::Float64(0.0),
        ValueType::String | ValueType::DateTime | ValueType::Json => Value::Null,
    }
}

impl Materializer {
    /// Build from a shape, assigning ordinals from `next` in projection order
    pub fn build(shape: &Shape, next: &mut usize) -> CompileResult<Self> {
        Ok(match shape {
            Shape::Scalar(expr) => Materializer::Column {
                ordinal: take(next),
                ty: expr.value_type(),
            },
            Shape::Object(members) => Materializer::Object(
                members
                    .iter()
                    .map(|(name, member)| Ok((name.clone(), Materializer::build(member, next)?)))
                    .collect::<CompileResult<_>>()?,
            ),
            Shape::Optional { inner, .. } => {
                let flag = take(next);
                Materializer::Optional {
                    flag,
                    inner: Box::new(Materializer::build(inner, next)?),
                }
            }
            Shape::Collection(collection) => {
                encoded(&collection.source)?;
                Materializer::Collection {
                    ordinal: take(next),
                    element: Box::new(RowMaterializer::build(&collection.element)?),
                }
            }
            Shape::Grouping(grouping) => {
                let key = Materializer::build(&grouping.key, next)?;
                encoded(&grouping.elements.source)?;
                let elements = Materializer::Collection {
                    ordinal: take(next),
                    element: Box::new(RowMaterializer::build(&grouping.elements.element)?),
                };
                Materializer::Grouping {
                    key: Box::new(key),
                    elements: Box::new(elements),
                }
            }
            Shape::Client(client) => {
                let mut params = Vec::with_capacity(client.bindings.len());
                let mut bindings = Vec::with_capacity(client.bindings.len());
                for (name, binding) in &client.bindings {
                    params.push(name.clone());
                    bindings.push(Materializer::build(binding, next)?);
                }
                Materializer::Client {
                    function: Lambda::new(params, client.expr.clone()),
                    bindings,
                }
            }
        })
    }

    pub fn materialize(&self, row: &[Value], evaluator: &Evaluator<'_>) -> ExecutionResult<Value> {
        match self {
            Materializer::Column { ordinal, ty } => Ok(read(row, *ordinal)?.clone().coerce(*ty)),
            Materializer::Object(members) => members
                .iter()
                .map(|(name, member)| Ok((name.clone(), member.materialize(row, evaluator)?)))
                .collect::<ExecutionResult<_>>()
                .map(Value::Object),
            Materializer::Optional { flag, inner } => {
                if read(row, *flag)?.is_null() {
                    Ok(Value::Null)
                } else {
                    inner.materialize(row, evaluator)
                }
            }
            Materializer::Collection { ordinal, element } => {
                decode::decode_collection(read(row, *ordinal)?, element, evaluator)
            }
            Materializer::Grouping { key, elements } => {
                let key = key.materialize(row, evaluator)?;
                match elements.materialize(row, evaluator)? {
                    Value::List(items) => Ok(grouping_value(key, items)),
                    other => Err(ExecutionError::Decode(format!(
                        "group elements decoded to {other}"
                    ))),
                }
            }
            Materializer::Client { function, bindings } => {
                let values = bindings
                    .iter()
                    .map(|binding| binding.materialize(row, evaluator))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                let args: Vec<&Value> = values.iter().collect();
                evaluator.apply(function, &args, Env::root())
            }
        }
    }
}

fn encoded(source: &CollectionSource) -> CompileResult<&SqlExpr> {
    match source {
        CollectionSource::Encoded(expr) => Ok(expr),
        CollectionSource::Template { .. } => Err(CompileError::InvariantViolation(
            "nested collection was not encoded before materialization".to_string(),
        )),
    }
}

fn take(next: &mut usize) -> usize {
    let ordinal = *next;
    *next += 1;
    ordinal
}

fn read(row: &[Value], ordinal: usize) -> ExecutionResult<&Value> {
    row.get(ordinal)
        .ok_or_else(|| ExecutionError::Decode(format!("row has no column {ordinal}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::lit;
    use crate::ast::Expr;
    use crate::ir::{ClientShape, CollectionShape, ColumnRef, GroupingShape, ELEMENT_ROW};

    fn column(table: u32, name: &str, ty: ValueType, nullable: bool) -> SqlExpr {
        SqlExpr::Column(ColumnRef {
            table,
            name: name.to_string(),
            ty,
            nullable,
        })
    }

    fn encoded_collection(element: Shape) -> CollectionShape {
        CollectionShape {
            source: CollectionSource::Encoded(SqlExpr::constant(Value::Null)),
            element,
        }
    }

    #[test]
    fn test_object_members_bind_in_projection_order() {
        let shape = Shape::Object(vec![
            ("A".to_string(), Shape::Scalar(column(1, "Prop1", ValueType::String, true))),
            (
                "B".to_string(),
                Shape::Object(vec![(
                    "C".to_string(),
                    Shape::Scalar(column(1, "Prop2", ValueType::Int32, false)),
                )]),
            ),
        ]);
        let plan = RowMaterializer::build(&shape).unwrap();
        let names: Vec<&str> = plan.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B.C"]);

        // Drivers may widen integers
        let row = vec![Value::from("x"), Value::Int64(4)];
        let value = plan.materialize(&row, &Evaluator::new()).unwrap();
        assert_eq!(
            value,
            Value::Object(vec![
                ("A".to_string(), Value::from("x")),
                (
                    "B".to_string(),
                    Value::Object(vec![("C".to_string(), Value::Int32(4))])
                ),
            ])
        );
    }

    #[test]
    fn test_null_discriminator_yields_null() {
        let shape = Shape::Optional {
            flag: column(2, "$empty", ValueType::Int32, true),
            inner: Box::new(Shape::Scalar(column(2, "Prop2", ValueType::Int32, true))),
        };
        let plan = RowMaterializer::build(&shape).unwrap();
        let eval = Evaluator::new();
        assert_eq!(plan.materialize(&[Value::Null, Value::Null], &eval).unwrap(), Value::Null);
        assert_eq!(
            plan.materialize(&[Value::Int32(1), Value::Int32(7)], &eval).unwrap(),
            Value::Int32(7)
        );
    }

    #[test]
    fn test_collection_column_decodes_elements_by_name() {
        let element = Shape::Object(vec![
            ("Id".to_string(), Shape::Scalar(column(ELEMENT_ROW, "Id", ValueType::Int32, false))),
            (
                "When".to_string(),
                Shape::Scalar(column(ELEMENT_ROW, "When", ValueType::DateTime, true)),
            ),
        ]);
        let shape = Shape::Collection(Box::new(encoded_collection(element)));
        let plan = RowMaterializer::build(&shape).unwrap();
        let json = r#"[{"Id":1,"When":"2024-01-02T03:04:05"},{"Id":2,"When":null}]"#;
        let value = plan
            .materialize(&[Value::from(json)], &Evaluator::new())
            .unwrap();
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].member("Id"), Some(&Value::Int32(1)));
        assert!(matches!(items[0].member("When"), Some(Value::DateTime(_))));
        assert_eq!(items[1].member("When"), Some(&Value::Null));
    }

    #[test]
    fn test_null_collection_column_is_empty() {
        let element = Shape::Scalar(column(ELEMENT_ROW, "Id", ValueType::Int32, false));
        let shape = Shape::Collection(Box::new(encoded_collection(element)));
        let plan = RowMaterializer::build(&shape).unwrap();
        let value = plan.materialize(&[Value::Null], &Evaluator::new()).unwrap();
        assert_eq!(value, Value::List(vec![]));
    }

    #[test]
    fn test_grouping_rebuilds_key_and_elements() {
        let shape = Shape::Grouping(Box::new(GroupingShape {
            key: Shape::Scalar(column(1, "Prop1", ValueType::String, true)),
            elements: encoded_collection(Shape::Scalar(column(
                ELEMENT_ROW,
                "Prop2",
                ValueType::Int32,
                false,
            ))),
            in_place: None,
        }));
        let plan = RowMaterializer::build(&shape).unwrap();
        let row = vec![Value::from("a"), Value::from(r#"[{"Prop2":1},{"Prop2":2}]"#)];
        let value = plan.materialize(&row, &Evaluator::new()).unwrap();
        assert_eq!(value.member("Key"), Some(&Value::from("a")));
        assert_eq!(value.member("Elements"), Some(&Value::from(vec![1, 2])));
    }

    #[test]
    fn test_client_member_is_computed_from_bindings() {
        let shape = Shape::Client(Box::new(ClientShape {
            expr: Expr::Parameter("m".to_string()).member("Prop2").add(lit(1)),
            bindings: vec![(
                "m".to_string(),
                Shape::Object(vec![(
                    "Prop2".to_string(),
                    Shape::Scalar(column(1, "Prop2", ValueType::Int32, false)),
                )]),
            )],
        }));
        let plan = RowMaterializer::build(&shape).unwrap();
        assert_eq!(plan.columns()[0].name, "m.Prop2");
        let value = plan.materialize(&[Value::Int32(41)], &Evaluator::new()).unwrap();
        assert_eq!(value, Value::Int32(42));
    }

    #[test]
    fn test_template_collection_is_rejected() {
        let select = crate::ir::SelectNode::new(Shape::Scalar(SqlExpr::constant(1)), None);
        let shape = Shape::Collection(Box::new(CollectionShape {
            element: select.shape().clone(),
            source: CollectionSource::Template {
                select: Box::new(select),
                correlation: None,
            },
        }));
        assert!(matches!(
            RowMaterializer::build(&shape),
            Err(CompileError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_default_value_of_non_nullable_scalar() {
        let plan =
            RowMaterializer::build(&Shape::Scalar(column(1, "Prop2", ValueType::Int32, false))).unwrap();
        assert_eq!(plan.default_value(), Value::Int32(0));
        let plan =
            RowMaterializer::build(&Shape::Scalar(column(1, "Prop1", ValueType::String, true))).unwrap();
        assert_eq!(plan.default_value(), Value::Null);
    }

    #[test]
    fn test_short_row_is_a_decode_error() {
        let plan =
            RowMaterializer::build(&Shape::Scalar(column(1, "Prop2", ValueType::Int32, false))).unwrap();
        assert!(matches!(
            plan.materialize(&[], &Evaluator::new()),
            Err(ExecutionError::Decode(_))
        ));
    }
}
