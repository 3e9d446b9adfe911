//! Catalog: table descriptors for query sources
//!
//! Stands in for the mapping service: resolves an element type to the table
//! it is stored in (schema, name, alias seed) and to its ordered columns with
//! types and nullability.

use crate::config::Config;
use crate::error::{CompileError, CompileResult};
use crate::value::ValueType;
use std::collections::HashMap;
use std::sync::Arc;

/// One mapped column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
}

/// A mapped table and the element shape of its rows
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    /// Alias hint used until a lambda parameter names the table
    pub alias_seed: String,
    /// Name of the element type rows are materialized as
    pub element_type: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Key columns; empty means every column identifies the row
    pub primary_key: Vec<String>,
}

impl TableDescriptor {
    /// Create a descriptor with an alias seed taken from the table name
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let alias_seed = name
            .chars()
            .next()
            .map_or_else(|| "t".to_string(), |c| c.to_lowercase().to_string());
        TableDescriptor {
            schema: schema.into(),
            element_type: name.clone(),
            name,
            alias_seed,
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Add a non-nullable column
    pub fn column(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.into(),
            ty,
            nullable: false,
        });
        self
    }

    /// Add a nullable column
    pub fn nullable_column(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.columns.push(ColumnDescriptor {
            name: name.into(),
            ty,
            nullable: true,
        });
        self
    }

    pub fn with_alias_seed(mut self, seed: impl Into<String>) -> Self {
        self.alias_seed = seed.into();
        self
    }

    pub fn with_element_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = element_type.into();
        self
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that identify a row: the primary key, or all columns
    pub fn key_columns(&self) -> Vec<&ColumnDescriptor> {
        if self.primary_key.is_empty() {
            return self.columns.iter().collect();
        }
        self.columns
            .iter()
            .filter(|c| self.primary_key.contains(&c.name))
            .collect()
    }
}

/// Catalog of table descriptors keyed by element type
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: HashMap<String, Arc<TableDescriptor>>,
    default_schema: String,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Create a new empty catalog using the `dbo` schema
    pub fn new() -> Self {
        Catalog {
            tables: HashMap::new(),
            default_schema: "dbo".to_string(),
        }
    }

    /// Create an empty catalog using the configured default schema
    pub fn from_config(config: &Config) -> Self {
        Catalog::new().with_default_schema(config.compiler.default_schema.clone())
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    /// Start a descriptor for `name` in the default schema
    pub fn define(&self, name: impl Into<String>) -> TableDescriptor {
        TableDescriptor::new(self.default_schema.clone(), name)
    }

    /// Register a table under its element type name
    pub fn register(&mut self, table: TableDescriptor) -> Arc<TableDescriptor> {
        let table = Arc::new(table);
        self.tables.insert(table.element_type.clone(), Arc::clone(&table));
        table
    }

    /// Resolve an element type to its table
    pub fn table(&self, element_type: &str) -> CompileResult<Arc<TableDescriptor>> {
        self.tables
            .get(element_type)
            .cloned()
            .ok_or_else(|| CompileError::UnknownTable(element_type.to_string()))
    }

    pub fn has_table(&self, element_type: &str) -> bool {
        self.tables.contains_key(element_type)
    }

    /// All registered element types, sorted
    pub fn element_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}
