//! Per-entity column schemas and bind types.
//!
//! A [`ColumnSchema`] maps column names to the primitive type each one
//! binds as. The executor consults it to infer a bind type for every
//! staged column, and dynamic field assignment validates against it.
//! The schema is owned by the entity definition and never mutated after
//! construction; per-query additions (for example typing a junction-table
//! key) go through the model's bind-type overlay instead.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Primitive bind type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Integer column, binds as a signed integer.
    Int,
    /// Text column.
    Str,
    /// Double-precision float column.
    Double,
    /// Binary column.
    Blob,
}

impl ColumnType {
    /// One-letter tag used in statement debug logs.
    pub(crate) fn bind_letter(self) -> char {
        match self {
            ColumnType::Int => 'i',
            ColumnType::Str => 's',
            ColumnType::Double => 'd',
            ColumnType::Blob => 'b',
        }
    }
}

/// Mapping from column name to bind type for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSchema {
    columns: HashMap<String, ColumnType>,
}

impl ColumnSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column; replaces any previous type for the same name.
    pub fn insert(&mut self, column: impl Into<String>, column_type: ColumnType) {
        self.columns.insert(column.into(), column_type);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, column: impl Into<String>, column_type: ColumnType) -> Self {
        self.insert(column, column_type);
        self
    }

    /// Look up a column's bind type.
    pub fn get(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(column).copied()
    }

    /// Whether the schema declares the column.
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Number of declared columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema declares no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Terse [`ColumnSchema`] literal.
///
/// ```
/// use cobble::{columns, ColumnType};
///
/// let schema = columns! {
///     "id" => Int,
///     "name" => Str,
///     "score" => Double,
/// };
/// assert_eq!(schema.get("id"), Some(ColumnType::Int));
/// ```
#[macro_export]
macro_rules! columns {
    ($($name:literal => $ty:ident),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut schema = $crate::schema::ColumnSchema::new();
        $(schema.insert($name, $crate::schema::ColumnType::$ty);)*
        schema
    }};
}
