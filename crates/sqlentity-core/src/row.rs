//! Result rows as the persister sees them.
//!
//! A [`Row`] is a list of values plus the column names of its result set.
//! Entity mapping reads rows by column name through
//! [`Row::column_value`], which converts to the mapped field's type.

use crate::value::{Value, ValueType};
use std::collections::HashMap;
use std::sync::Arc;

/// Column names of one result set, shared by all of its rows.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let positions = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, positions }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of `name`: an exact match, else the first match ignoring
    /// ASCII case. Drivers differ on whether unquoted identifiers come back
    /// folded, and mapped column names are written in lower case.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied().or_else(|| {
            self.names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One row of a query result.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(column_names)), values)
    }

    /// A row of a result set whose column names are already built.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// The value under column `name`, see [`ColumnInfo::position`].
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.position(name).and_then(|i| self.values.get(i))
    }

    /// The value under `column` converted to `value_type`. A missing column
    /// reads as NULL.
    pub fn column_value(&self, column: &str, value_type: ValueType) -> Value {
        self.get_by_name(column)
            .cloned()
            .unwrap_or(Value::Null)
            .coerce(value_type)
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.position(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    /// `(column, value)` pairs in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.column_names().zip(self.values.iter())
    }
}
