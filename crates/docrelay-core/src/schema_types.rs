// SPDX-License-Identifier: Apache-2.0

//! Schema descriptor types (§3.3–§3.5): `SchemaColumn`, `SchemaTable`,
//! `DatabaseSchema`. These are plain tagged records, not a class hierarchy
//! (§9 Design Notes — "tagged variants, not inheritance").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::DocKind;
use crate::sql_type::SqlType;

/// A single column in a `SchemaTable` (§3.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    /// Dot-joined original document path, relative to the table's own root
    /// (e.g. the field's name within its owning embedded document/array).
    pub field_path: String,
    /// The SQL identifier exposed to consumers (mangled via C3).
    pub sql_name: String,
    pub sql_type: SqlType,
    /// The original document kind last observed for this column, kept for
    /// round-trip fidelity (§3.3).
    pub db_type: DocKind,
    /// 1-based position of this column within its table.
    pub index_in_table: u32,
    /// 0 = not a primary-key column; >=1 = position within the composite key.
    pub primary_key_index: u32,
    /// 0 = not a foreign-key column; >=1 = position within the composite key.
    pub foreign_key_index: u32,
    pub foreign_key_table: Option<String>,
    pub foreign_key_column: Option<String>,
    /// True for synthesized array-index columns and synthesized `value`
    /// columns — never set by the user's own document fields.
    pub is_generated: bool,
    pub array_index_level: Option<u32>,
}

impl SchemaColumn {
    pub fn is_primary_key(&self) -> bool {
        self.primary_key_index > 0
    }

    pub fn is_foreign_key(&self) -> bool {
        self.foreign_key_index > 0
    }
}

/// A relational table descriptor (§3.4). `columns` preserves first-seen
/// insertion order — that order is the column order exposed to SQL — while
/// still allowing O(1) lookup by `sql_name`, which is why it is a
/// `BTreeMap` keyed by insertion-stable `index_in_table` rather than a
/// `HashMap` keyed by name: iterating a `BTreeMap<u32, _>` yields columns in
/// table order directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub sql_name: String,
    /// The origin collection this table was derived from.
    pub collection_name: String,
    /// Path segments from the collection's document root to this table's
    /// own root; empty for the base table. Not part of the wire format
    /// (§6.2) — used internally to address this table's columns within the
    /// raw document (e.g. by the translator when building `$match`/
    /// `$unwind` field paths).
    pub source_path: Vec<String>,
    /// True when this table's own (innermost) path segment came from an
    /// array rather than an embedded document — i.e. whether scanning it
    /// requires its own `$unwind` stage. Not part of the wire format.
    pub is_array_derived: bool,
    pub columns: BTreeMap<u32, SchemaColumn>,
}

impl SchemaTable {
    pub fn new(sql_name: impl Into<String>, collection_name: impl Into<String>) -> Self {
        Self {
            sql_name: sql_name.into(),
            collection_name: collection_name.into(),
            source_path: Vec::new(),
            is_array_derived: false,
            columns: BTreeMap::new(),
        }
    }

    pub fn with_source_path(mut self, source_path: Vec<String>) -> Self {
        self.source_path = source_path;
        self
    }

    pub fn with_array_derived(mut self, is_array_derived: bool) -> Self {
        self.is_array_derived = is_array_derived;
        self
    }

    /// The dotted document path (from the collection root) for a column
    /// belonging to this table, e.g. `"doc.field1"` for column `field1` on
    /// the virtual table rooted at `doc`.
    pub fn document_path_for(&self, column: &SchemaColumn) -> String {
        if self.source_path.is_empty() {
            column.field_path.clone()
        } else {
            format!("{}.{}", self.source_path.join("."), column.field_path)
        }
    }

    /// True when this table is the base table for its collection.
    pub fn is_base(&self) -> bool {
        self.sql_name == self.collection_name
    }

    pub fn column_by_name(&self, sql_name: &str) -> Option<&SchemaColumn> {
        self.columns.values().find(|c| c.sql_name == sql_name)
    }

    pub fn column_by_name_mut(&mut self, sql_name: &str) -> Option<&mut SchemaColumn> {
        self.columns.values_mut().find(|c| c.sql_name == sql_name)
    }

    /// Columns in table order (first-seen / `index_in_table` order).
    pub fn ordered_columns(&self) -> impl Iterator<Item = &SchemaColumn> {
        self.columns.values()
    }

    /// Primary-key columns, in `primary_key_index` order.
    pub fn primary_key_columns(&self) -> Vec<&SchemaColumn> {
        let mut pk: Vec<&SchemaColumn> = self
            .columns
            .values()
            .filter(|c| c.is_primary_key())
            .collect();
        pk.sort_by_key(|c| c.primary_key_index);
        pk
    }

    /// Appends a new column, assigning the next `index_in_table`.
    pub fn push_column(&mut self, mut column: SchemaColumn) {
        let next_index = self.columns.len() as u32 + 1;
        column.index_in_table = next_index;
        self.columns.insert(next_index, column);
    }
}

/// The database-level descriptor (§3.5). Tables themselves are stored and
/// referenced separately (by `SchemaTable::sql_name`) so large schemas can
/// be loaded lazily by the Schema Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    pub schema_name: String,
    pub sql_name: String,
    pub schema_version: u64,
    pub modified_at: chrono::DateTime<chrono::Utc>,
    pub table_references: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_column(name: &str, sql_type: SqlType) -> SchemaColumn {
        SchemaColumn {
            field_path: name.to_string(),
            sql_name: name.to_string(),
            sql_type,
            db_type: DocKind::Int32,
            index_in_table: 0,
            primary_key_index: 0,
            foreign_key_index: 0,
            foreign_key_table: None,
            foreign_key_column: None,
            is_generated: false,
            array_index_level: None,
        }
    }

    #[test]
    fn push_column_assigns_sequential_indices() {
        let mut table = SchemaTable::new("coll", "coll");
        table.push_column(sample_column("a", SqlType::Integer));
        table.push_column(sample_column("b", SqlType::Varchar));
        let ordered: Vec<_> = table.ordered_columns().map(|c| c.sql_name.clone()).collect();
        assert_eq!(ordered, vec!["a", "b"]);
        assert_eq!(table.column_by_name("a").unwrap().index_in_table, 1);
        assert_eq!(table.column_by_name("b").unwrap().index_in_table, 2);
    }

    #[test]
    fn base_table_detection() {
        let table = SchemaTable::new("coll", "coll");
        assert!(table.is_base());
        let virt = SchemaTable::new("_doc", "coll");
        assert!(!virt.is_base());
    }

    #[test]
    fn primary_key_columns_sorted_by_position() {
        let mut table = SchemaTable::new("_arr", "coll");
        let mut pk2 = sample_column("array_index_lvl_0", SqlType::Bigint);
        pk2.primary_key_index = 2;
        let mut pk1 = sample_column("__id", SqlType::Varchar);
        pk1.primary_key_index = 1;
        table.push_column(pk2);
        table.push_column(pk1);
        let pks: Vec<_> = table.primary_key_columns().iter().map(|c| c.sql_name.clone()).collect();
        assert_eq!(pks, vec!["__id", "array_index_lvl_0"]);
    }
}
