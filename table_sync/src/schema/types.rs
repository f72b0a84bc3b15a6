//! Type definitions for database schema objects

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::value::Value;

/// Represents the tables of one database schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub tables: IndexMap<String, Table>,
    pub schema_name: Option<String>,
}

impl DatabaseSchema {
    /// Create a new empty database schema
    pub fn new(schema_name: Option<String>) -> Self {
        Self {
            tables: IndexMap::new(),
            schema_name,
        }
    }

    /// Add a table to the schema
    pub fn add_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Tables that carry a primary key. Tables without one cannot be
    /// ordered or deduplicated and are left out of synchronization.
    pub fn key_bearing_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values().filter(|table| table.has_primary_key())
    }
}

/// Represents a database table; column order is projection and insert order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: IndexMap<String, Column>,
}

impl Table {
    /// Create a new table with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: IndexMap::new(),
        }
    }

    /// Add a column to the table
    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Primary key columns, in declaration order
    pub fn primary_key(&self) -> Vec<&Column> {
        self.columns.values().filter(|col| col.primary_key).collect()
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.values().any(|col| col.primary_key)
    }

    /// Positions of the primary key columns within the column order
    pub fn primary_key_positions(&self) -> Vec<usize> {
        self.columns
            .values()
            .enumerate()
            .filter(|(_, col)| col.primary_key)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Represents a database column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
}

impl Column {
    /// Create a new column with the given name and type
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            primary_key: false,
        }
    }

    /// Set whether the column is part of the primary key
    pub fn primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }
}

/// Primary key values of one row, ordered like `Table::primary_key`.
///
/// Keys order lexicographically by component, using [`Value`] ordering,
/// which is the ordering the generated `ORDER BY` clauses produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Key(values)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}
