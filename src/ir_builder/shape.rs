//! Pushdown, template instantiation and projection encoding.

use super::{row_index, Composed, QueryComposer, RowNumbering, ROW_NUMBER_COLUMN};
use crate::error::{CompileError, CompileResult};
use crate::ir::{
    CollectionShape, CollectionSource, Correlation, Ordering, ProjectedColumn, RowLimit,
    SelectNode, Shape, SqlExpr, TableAlias, TableId, TableRef, ELEMENT_ROW,
};
use super::translate::key_equality;
use std::collections::{HashMap, HashSet};

impl QueryComposer {
    /// Fresh ids for a set of table ids, assigned in ascending order
    pub(crate) fn fresh_ids(&mut self, ids: &HashSet<TableId>) -> HashMap<TableId, TableId> {
        let mut ids: Vec<TableId> = ids.iter().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(|id| (id, self.table_id())).collect()
    }

    /// Wrap the current select as a derived table
    pub(crate) fn push_down(&mut self, composed: Composed) -> CompileResult<Composed> {
        Ok(self.wrap(composed, None)?.0)
    }

    /// Wrap the current select, numbering its rows in a hidden column.
    /// Returns the lifted row number expression.
    pub(crate) fn push_down_numbered(
        &mut self,
        mut composed: Composed,
        numbering: RowNumbering,
    ) -> CompileResult<(Composed, SqlExpr)> {
        // Numbers must be assigned to the rows the limit leaves
        if matches!(composed.select.limit, RowLimit::Distinct | RowLimit::Offset { .. }) {
            composed = self.push_down(composed)?;
        }
        match self.wrap(composed, Some(numbering))? {
            (composed, Some(row_number)) => Ok((composed, row_number)),
            _ => Err(CompileError::InvariantViolation(
                "numbered pushdown produced no row number".to_string(),
            )),
        }
    }

    fn wrap(
        &mut self,
        composed: Composed,
        numbering: Option<RowNumbering>,
    ) -> CompileResult<(Composed, Option<SqlExpr>)> {
        let Composed {
            select: mut inner,
            client,
            order_keys,
        } = composed;
        self.stats.pushdowns += 1;
        self.encode_projection(&mut inner, true)?;
        let id = self.table_id();

        let ordering = std::mem::take(&mut inner.ordering);
        if matches!(inner.limit, RowLimit::Top(_) | RowLimit::Offset { .. }) {
            inner.ordering = ordering.clone();
        }

        let row_number = numbering.map(|numbering| {
            let expr = match numbering {
                RowNumbering::Index => row_index(ordering.clone()),
                RowNumbering::Number => SqlExpr::RowNumber {
                    ordering: ordering.clone(),
                },
            };
            let column = SqlExpr::column(id, ROW_NUMBER_COLUMN, expr.value_type(), false);
            inner.hidden.push(ProjectedColumn {
                name: ROW_NUMBER_COLUMN.to_string(),
                expr,
            });
            column
        });

        let carried = match &row_number {
            Some(number) if !ordering.is_empty() => vec![Ordering::asc(number.clone())],
            _ => carry_ordering(&ordering, &inner.output_columns()?, id),
        };

        let shape = inner.shape().lift(id, false)?;
        let mut outer = SelectNode::new(
            shape,
            Some(TableRef::Derived {
                select: Box::new(inner),
                alias: TableAlias::new(id, "t"),
            }),
        );
        outer.ordering = carried;
        Ok((
            Composed {
                select: outer,
                client,
                order_keys,
            },
            row_number,
        ))
    }

    /// The current select as a FROM item, with its element shape over that item
    pub(crate) fn as_table_ref(
        &mut self,
        composed: Composed,
        optional: bool,
        force_derived: bool,
    ) -> CompileResult<(TableRef, Shape)> {
        let (table, shape, _) = self.as_keyed_table_ref(composed, optional, force_derived, None)?;
        Ok((table, shape))
    }

    /// Like [`as_table_ref`](Self::as_table_ref), also exposing `key` (an
    /// expression over the select's tables) as columns of the new item
    pub(crate) fn as_keyed_table_ref(
        &mut self,
        composed: Composed,
        optional: bool,
        force_derived: bool,
        key: Option<&Shape>,
    ) -> CompileResult<(TableRef, Shape, Option<Shape>)> {
        let mut select = composed.select;
        if !optional && !force_derived && select.is_plain_table() {
            let shape = select.shape().clone();
            if let Some(table) = select.from.take() {
                return Ok((table, shape, key.cloned()));
            }
        }

        self.encode_projection(&mut select, true)?;
        if !matches!(select.limit, RowLimit::Top(_) | RowLimit::Offset { .. }) {
            select.ordering.clear();
        }
        if optional {
            let inner = select.shape().clone();
            select.set_shape(Shape::Optional {
                flag: SqlExpr::constant(0),
                inner: Box::new(inner),
            });
        }
        let id = self.table_id();

        let lifted_key = match key {
            Some(key) => {
                let defined = select.defined_tables();
                let mut columns = select.output_columns()?;
                let mut next = 0;
                Some(map_key(key, &mut |expr| {
                    let lift = |c: &ProjectedColumn| {
                        SqlExpr::column(id, &c.name, c.expr.value_type(), optional || c.expr.is_nullable())
                    };
                    if let Some(column) = columns.iter().find(|c| &c.expr == expr) {
                        return lift(column);
                    }
                    // Re-express over projected columns when every column it reads is projected
                    let mut rewritten = expr.clone();
                    let mut complete = true;
                    rewritten.walk_mut(&mut |e| {
                        if let SqlExpr::Column(c) = e {
                            if defined.contains(&c.table) {
                                let current = SqlExpr::Column(c.clone());
                                match columns.iter().find(|p| p.expr == current) {
                                    Some(column) => *e = lift(column),
                                    None => complete = false,
                                }
                            }
                        }
                    });
                    if complete && !contains_subquery(expr) {
                        return rewritten;
                    }
                    let column = ProjectedColumn {
                        name: format!("$key{next}"),
                        expr: expr.clone(),
                    };
                    next += 1;
                    let lifted = lift(&column);
                    select.hidden.push(column.clone());
                    columns.push(column);
                    lifted
                })?)
            }
            None => None,
        };

        let shape = select.shape().lift(id, optional)?;
        let table = TableRef::Derived {
            select: Box::new(select),
            alias: TableAlias::new(id, "t"),
        };
        Ok((table, shape, lifted_key))
    }

    /// Fresh copy of a collection template, filtered to the enclosing row
    pub(crate) fn instantiate(&mut self, collection: CollectionShape) -> CompileResult<Composed> {
        let (mut select, correlation) = self.detach(collection)?;
        if let Some(correlation) = correlation {
            select.add_predicate(key_equality(
                &correlation.outer,
                &correlation.inner,
                correlation.null_safe,
            )?);
        }
        Ok(Composed::new(select))
    }

    /// Fresh copy of a collection template, its correlation returned rather than applied
    pub(crate) fn detach(
        &mut self,
        collection: CollectionShape,
    ) -> CompileResult<(SelectNode, Option<Correlation>)> {
        let CollectionShape {
            source,
            mut element,
        } = collection;
        let CollectionSource::Template {
            select,
            correlation,
        } = source
        else {
            return Err(CompileError::Untranslatable(
                "an encoded collection cannot be queried further".to_string(),
            ));
        };
        let mut select = *select;
        let fresh = self.fresh_ids(&select.defined_tables());
        select.remap_tables(&fresh);
        element.remap_tables(&fresh);
        let correlation = correlation.map(|mut correlation| {
            correlation.inner.remap_tables(&fresh);
            correlation
        });
        select.set_shape(element);
        self.stats.instantiations += 1;
        Ok((select, correlation))
    }

    /// Encode every nested collection of a select's projection as an
    /// structured-array column. Groupings stay templates when `keep_groupings`.
    pub(crate) fn encode_projection(
        &mut self,
        select: &mut SelectNode,
        keep_groupings: bool,
    ) -> CompileResult<()> {
        if !select.shape().has_collections() {
            return Ok(());
        }
        let mut shape = select.shape().clone();
        self.encode_shape(&mut shape, keep_groupings)?;
        select.set_shape(shape);
        Ok(())
    }

    fn encode_shape(&mut self, shape: &mut Shape, keep_groupings: bool) -> CompileResult<()> {
        match shape {
            Shape::Scalar(_) => {}
            Shape::Object(members) => {
                for (_, member) in members {
                    self.encode_shape(member, keep_groupings)?;
                }
            }
            Shape::Optional { inner, .. } => self.encode_shape(inner, keep_groupings)?,
            Shape::Client(client) => {
                for (_, binding) in &mut client.bindings {
                    self.encode_shape(binding, keep_groupings)?;
                }
            }
            Shape::Collection(collection) => {
                if matches!(collection.source, CollectionSource::Template { .. }) {
                    **collection = self.encode_collection((**collection).clone())?;
                }
            }
            Shape::Grouping(grouping) => {
                self.encode_shape(&mut grouping.key, keep_groupings)?;
                if !keep_groupings {
                    grouping.in_place = None;
                    if matches!(grouping.elements.source, CollectionSource::Template { .. }) {
                        grouping.elements = self.encode_collection(grouping.elements.clone())?;
                    }
                }
            }
        }
        Ok(())
    }

    fn encode_collection(&mut self, collection: CollectionShape) -> CompileResult<CollectionShape> {
        let mut composed = self.instantiate(collection)?;
        self.encode_projection(&mut composed.select, false)?;
        let element = composed.select.shape().lift(ELEMENT_ROW, false)?;
        Ok(CollectionShape {
            source: CollectionSource::Encoded(SqlExpr::JsonArray(Box::new(composed.select))),
            element,
        })
    }
}

/// Ordering terms that are output columns, re-expressed over the wrapper;
/// empty when any term is not projected
fn carry_ordering(ordering: &[Ordering], columns: &[ProjectedColumn], id: TableId) -> Vec<Ordering> {
    ordering
        .iter()
        .map(|term| {
            columns.iter().find(|c| c.expr == term.expr).map(|c| Ordering {
                expr: SqlExpr::column(id, &c.name, c.expr.value_type(), c.expr.is_nullable()),
                descending: term.descending,
            })
        })
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default()
}

fn contains_subquery(expr: &SqlExpr) -> bool {
    !expr.subqueries().is_empty()
}

/// Rebuild a key shape with each scalar replaced
fn map_key(key: &Shape, f: &mut dyn FnMut(&SqlExpr) -> SqlExpr) -> CompileResult<Shape> {
    match key {
        Shape::Scalar(expr) => Ok(Shape::Scalar(f(expr))),
        Shape::Object(members) => Ok(Shape::Object(
            members
                .iter()
                .map(|(name, member)| Ok((name.clone(), map_key(member, f)?)))
                .collect::<CompileResult<_>>()?,
        )),
        other => Err(CompileError::Untranslatable(format!(
            "a join key cannot be {}",
            other.describe()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableDescriptor;
    use crate::value::ValueType;
    use std::sync::Arc;

    fn table(composer: &mut QueryComposer) -> Composed {
        let descriptor = Arc::new(
            TableDescriptor::new("dbo", "MappingTests")
                .with_alias_seed("m")
                .column("Id", ValueType::Int32)
                .column("Prop2", ValueType::Int32),
        );
        let alias = TableAlias::new(composer.table_id(), "m");
        Composed::new(SelectNode::from_table(descriptor, alias))
    }

    #[test]
    fn test_pushdown_carries_projected_ordering() {
        let mut composer = QueryComposer::new();
        let mut composed = table(&mut composer);
        let prop = SqlExpr::column(1, "Prop2", ValueType::Int32, false);
        composed.select.ordering = vec![Ordering::asc(prop)];
        let pushed = composer.push_down(composed).unwrap();
        assert_eq!(
            pushed.select.ordering,
            vec![Ordering::asc(SqlExpr::column(2, "Prop2", ValueType::Int32, false))]
        );
        match &pushed.select.from {
            Some(TableRef::Derived { select, .. }) => assert!(select.ordering.is_empty()),
            other => panic!("expected a derived table, got {other:?}"),
        }
    }

    #[test]
    fn test_pushdown_drops_unprojected_ordering() {
        let mut composer = QueryComposer::new();
        let mut composed = table(&mut composer);
        composed.select.ordering = vec![Ordering::asc(SqlExpr::column(
            1,
            "Hidden",
            ValueType::Int32,
            false,
        ))];
        let pushed = composer.push_down(composed).unwrap();
        assert!(pushed.select.ordering.is_empty());
    }

    #[test]
    fn test_numbered_pushdown_adds_hidden_column() {
        let mut composer = QueryComposer::new();
        let composed = table(&mut composer);
        let (pushed, number) = composer
            .push_down_numbered(composed, RowNumbering::Index)
            .unwrap();
        assert_eq!(number, SqlExpr::column(2, ROW_NUMBER_COLUMN, ValueType::Int32, false));
        match &pushed.select.from {
            Some(TableRef::Derived { select, .. }) => assert_eq!(select.hidden.len(), 1),
            other => panic!("expected a derived table, got {other:?}"),
        }
    }

    #[test]
    fn test_instantiation_uses_fresh_ids() {
        let mut composer = QueryComposer::new();
        let composed = table(&mut composer);
        let collection = CollectionShape {
            element: composed.select.shape().clone(),
            source: CollectionSource::Template {
                select: Box::new(composed.select),
                correlation: None,
            },
        };
        let first = composer.instantiate(collection.clone()).unwrap();
        let second = composer.instantiate(collection).unwrap();
        assert_ne!(first.select.defined_tables(), second.select.defined_tables());
        assert_eq!(composer.stats.instantiations, 2);
    }
}
