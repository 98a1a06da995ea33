// SPDX-License-Identifier: Apache-2.0

//! Schema Inference Engine (C4, §4.1).
//!
//! `generate(collection_name, documents)` consumes a finite, possibly
//! fallible stream of documents from one collection and returns the
//! complete set of tables describing it: one base table plus zero or more
//! virtual tables for embedded documents and arrays.

use std::collections::{BTreeMap, HashMap};

use bson::{Bson, Document};
use docrelay_core::document::DocKind;
use docrelay_core::error::DriverResult;
use docrelay_core::mangle::{
    array_index_column_name, mangle_field_name, virtual_table_name, ARRAY_VALUE_COLUMN,
};
use docrelay_core::schema_types::{SchemaColumn, SchemaTable};
use docrelay_core::sql_type::{promote, SqlType};

/// One step in the nesting trail from a collection's root document down to
/// the table currently being populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    EmbeddedDoc,
    Array,
}

/// Whether a field, within one table, has been observed as a scalar value,
/// a complex (document/array) value, or both (§4.1.2 conflict).
#[derive(Debug, Default, Clone, Copy)]
struct FieldShape {
    seen_scalar: bool,
    seen_complex: bool,
}

impl FieldShape {
    fn conflicted(&self) -> bool {
        self.seen_scalar && self.seen_complex
    }
}

struct InferCtx {
    collection_name: String,
    tables: BTreeMap<String, SchemaTable>,
    /// sql_name -> path segments from the collection root, for descendant
    /// lookups when a scalar-complex conflict discards a virtual subtree.
    table_paths: HashMap<String, Vec<String>>,
    /// (table sql_name, field name) -> observation shape.
    field_shapes: HashMap<(String, String), FieldShape>,
}

impl InferCtx {
    fn new(collection_name: &str) -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(
            collection_name.to_string(),
            SchemaTable::new(collection_name, collection_name),
        );
        let mut table_paths = HashMap::new();
        table_paths.insert(collection_name.to_string(), Vec::new());
        Self {
            collection_name: collection_name.to_string(),
            tables,
            table_paths,
            field_shapes: HashMap::new(),
        }
    }

    fn base_name(&self) -> String {
        self.collection_name.clone()
    }

    /// Ensures a virtual table exists for `path`/`kinds`, wiring its PK/FK
    /// prefix from `parent_sql_name`'s current PK columns, and appending a
    /// synthesized array-index PK column when `is_array` is true. Returns
    /// the table's `sql_name`.
    fn ensure_virtual_table(
        &mut self,
        parent_sql_name: &str,
        path: &[String],
        kinds: &[StepKind],
        is_array: bool,
    ) -> String {
        let sql_name = virtual_table_name(path);
        if self.tables.contains_key(&sql_name) {
            return sql_name;
        }

        let mut table = SchemaTable::new(&sql_name, &self.collection_name)
            .with_source_path(path.to_vec())
            .with_array_derived(is_array);
        let parent_pk: Vec<SchemaColumn> = self
            .tables
            .get(parent_sql_name)
            .map(|t| t.primary_key_columns().into_iter().cloned().collect())
            .unwrap_or_default();

        for pk_col in &parent_pk {
            let mut fk_col = pk_col.clone();
            fk_col.foreign_key_index = pk_col.primary_key_index;
            fk_col.foreign_key_table = Some(parent_sql_name.to_string());
            fk_col.foreign_key_column = Some(pk_col.sql_name.clone());
            fk_col.is_generated = pk_col.is_generated;
            table.push_column(fk_col);
        }

        if is_array {
            let depth = kinds.iter().filter(|k| **k == StepKind::Array).count() as u32 - 1;
            let mut idx_col = SchemaColumn {
                field_path: array_index_column_name(depth as usize),
                sql_name: array_index_column_name(depth as usize),
                sql_type: SqlType::Bigint,
                db_type: DocKind::Int64,
                index_in_table: 0,
                primary_key_index: 0,
                foreign_key_index: 0,
                foreign_key_table: None,
                foreign_key_column: None,
                is_generated: true,
                array_index_level: Some(depth),
            };
            idx_col.primary_key_index = parent_pk.len() as u32 + 1;
            table.push_column(idx_col);
        }

        self.table_paths.insert(sql_name.clone(), path.to_vec());
        self.tables.insert(sql_name.clone(), table);
        sql_name
    }

    /// Discards the virtual table at `path` and every descendant virtual
    /// table nested under it (§4.1.2: the whole subtree is thrown away when
    /// a scalar-complex conflict is detected).
    fn discard_subtree(&mut self, path: &[String]) {
        let doomed: Vec<String> = self
            .table_paths
            .iter()
            .filter(|(_, p)| p.len() >= path.len() && p[..path.len()] == *path)
            .map(|(name, _)| name.clone())
            .collect();
        for name in doomed {
            self.tables.remove(&name);
            self.table_paths.remove(&name);
        }
    }

    fn upsert_scalar_column(&mut self, table_name: &str, field_name: &str, kind: DocKind) {
        let sql_name = mangle_field_name(field_name);
        let table = self.tables.get_mut(table_name).expect("table must exist");
        if let Some(col) = table.column_by_name_mut(&sql_name) {
            col.sql_type = promote(col.sql_type, SqlType::of_scalar_kind(kind));
            col.db_type = kind;
        } else {
            let column = SchemaColumn {
                field_path: field_name.to_string(),
                sql_name,
                sql_type: promote(SqlType::Null, SqlType::of_scalar_kind(kind)),
                db_type: kind,
                index_in_table: 0,
                primary_key_index: 0,
                foreign_key_index: 0,
                foreign_key_table: None,
                foreign_key_column: None,
                is_generated: false,
                array_index_level: None,
            };
            table.push_column(column);
        }
    }

    fn force_varchar_column(&mut self, table_name: &str, field_name: &str) {
        let sql_name = mangle_field_name(field_name);
        let table = self.tables.get_mut(table_name).expect("table must exist");
        if let Some(col) = table.column_by_name_mut(&sql_name) {
            col.sql_type = SqlType::Varchar;
        } else {
            table.push_column(SchemaColumn {
                field_path: field_name.to_string(),
                sql_name,
                sql_type: SqlType::Varchar,
                db_type: DocKind::String,
                index_in_table: 0,
                primary_key_index: 0,
                foreign_key_index: 0,
                foreign_key_table: None,
                foreign_key_column: None,
                is_generated: false,
                array_index_level: None,
            });
        }
    }
}

/// Consumes a finite, possibly fallible stream of documents from one
/// collection and returns `mapping<table_sql_name, table>`.
///
/// Deterministic given the same document order (§4.1 contract). Fails only
/// on an I/O error from the stream (§4.1.6); every document shape, however
/// inconsistent, resolves to a defined schema.
pub fn generate<I>(collection_name: &str, documents: I) -> DriverResult<BTreeMap<String, SchemaTable>>
where
    I: IntoIterator<Item = DriverResult<Document>>,
{
    let mut ctx = InferCtx::new(collection_name);
    // Tracks every SQL type `_id` has been observed as, across the whole
    // stream, so the second pass (§4.1.5) can propagate the final widened
    // type to every FK column that references it.
    let mut id_type_seen = SqlType::Null;

    for doc_result in documents {
        let doc = doc_result?;
        let base_name = ctx.base_name();
        walk_document(&mut ctx, &doc, &base_name, &[], &[]);
        if let Some(id_val) = doc.get("_id") {
            let observed = id_sql_type(id_val);
            id_type_seen = promote(id_type_seen, observed);
        }
    }

    propagate_id_type(&mut ctx, id_type_seen);
    Ok(ctx.tables)
}

/// `_id`'s SQL type is forced to VARCHAR when it is itself a document
/// (§4.1.5); otherwise it follows the ordinary scalar promotion rules.
fn id_sql_type(value: &Bson) -> SqlType {
    let kind = DocKind::from_bson(value);
    if kind == DocKind::Document {
        SqlType::Varchar
    } else if kind == DocKind::Array {
        // Not covered explicitly by §4.1.5, but an array `_id` is exactly as
        // unrepresentable relationally as a document one.
        SqlType::Varchar
    } else {
        SqlType::of_scalar_kind(kind)
    }
}

/// Second pass: propagate `_id`'s final widened type to the base table's PK
/// column and to every FK column across every table that references it.
fn propagate_id_type(ctx: &mut InferCtx, id_type: SqlType) {
    if id_type == SqlType::Null {
        return;
    }
    let base_name = ctx.base_name();
    for table in ctx.tables.values_mut() {
        for column in table.columns.values_mut() {
            let references_id = (table.sql_name == base_name && column.sql_name == "__id")
                || (column.foreign_key_table.as_deref() == Some(base_name.as_str())
                    && column.foreign_key_column.as_deref() == Some("__id"));
            if references_id {
                column.sql_type = id_type;
            }
        }
    }
}

fn walk_document(
    ctx: &mut InferCtx,
    doc: &Document,
    current_table: &str,
    path: &[String],
    kinds: &[StepKind],
) {
    for (field_name, value) in doc.iter() {
        let kind = DocKind::from_bson(value);
        let is_pk_field = path.is_empty() && field_name == "_id";

        if is_pk_field {
            // `_id`'s own type is resolved stream-wide in `propagate_id_type`;
            // still upsert here so the column exists with a sane interim
            // type and its PK metadata is set once. A document/array `_id`
            // is forced to VARCHAR (§4.1.5) rather than routed through
            // `handle_complex_field` — it never gets a virtual table of its
            // own, just a PK column holding its VARCHAR representation.
            let table = ctx.tables.get_mut(current_table).expect("table exists");
            if table.column_by_name("__id").is_none() {
                table.push_column(SchemaColumn {
                    field_path: "_id".to_string(),
                    sql_name: "__id".to_string(),
                    sql_type: id_sql_type(value),
                    db_type: kind,
                    index_in_table: 0,
                    primary_key_index: 1,
                    foreign_key_index: 0,
                    foreign_key_table: None,
                    foreign_key_column: None,
                    is_generated: false,
                    array_index_level: None,
                });
            } else if let Some(col) = table.column_by_name_mut("__id") {
                col.sql_type = promote(col.sql_type, id_sql_type(value));
                col.db_type = kind;
            }
        } else if kind.is_complex() {
            handle_complex_field(ctx, current_table, field_name, value, kind, path, kinds);
        } else {
            handle_scalar_field(ctx, current_table, field_name, kind);
        }
    }
}

fn handle_scalar_field(ctx: &mut InferCtx, current_table: &str, field_name: &str, kind: DocKind) {
    let key = (current_table.to_string(), field_name.to_string());
    let shape = ctx.field_shapes.entry(key.clone()).or_default();
    let was_complex_only = shape.seen_complex && !shape.seen_scalar;
    shape.seen_scalar = true;
    let conflicted_now = shape.conflicted();

    if was_complex_only && conflicted_now {
        // Fresh conflict: discard the virtual table subtree this field used
        // to own and replace it with a single VARCHAR column.
        let mut child_path = path_for(ctx, current_table);
        child_path.push(field_name.to_string());
        ctx.discard_subtree(&child_path);
        ctx.force_varchar_column(current_table, field_name);
        return;
    }
    if ctx
        .field_shapes
        .get(&key)
        .map(|s| s.conflicted())
        .unwrap_or(false)
    {
        // Already conflicted from an earlier document: stays VARCHAR.
        ctx.force_varchar_column(current_table, field_name);
        return;
    }
    // NULL never conflicts with anything (§4.1.2); falls through to the
    // ordinary scalar upsert below like any other scalar kind.
    ctx.upsert_scalar_column(current_table, field_name, kind);
}

#[allow(clippy::too_many_arguments)]
fn handle_complex_field(
    ctx: &mut InferCtx,
    current_table: &str,
    field_name: &str,
    value: &Bson,
    kind: DocKind,
    path: &[String],
    kinds: &[StepKind],
) {
    let key = (current_table.to_string(), field_name.to_string());
    let shape = ctx.field_shapes.entry(key.clone()).or_default();
    let was_scalar_only = shape.seen_scalar && !shape.seen_complex;
    shape.seen_complex = true;
    let conflicted_now = shape.conflicted();

    if was_scalar_only && conflicted_now {
        ctx.force_varchar_column(current_table, field_name);
        return;
    }
    if ctx
        .field_shapes
        .get(&key)
        .map(|s| s.conflicted())
        .unwrap_or(false)
    {
        // Already conflicted: stays VARCHAR, never recurse into this field
        // again (its virtual table was discarded for good).
        return;
    }

    let mut child_path = path.to_vec();
    child_path.push(field_name.to_string());
    let mut child_kinds = kinds.to_vec();

    match (kind, value) {
        (DocKind::Document, Bson::Document(inner)) => {
            child_kinds.push(StepKind::EmbeddedDoc);
            let child_table =
                ctx.ensure_virtual_table(current_table, &child_path, &child_kinds, false);
            walk_document(ctx, inner, &child_table, &child_path, &child_kinds);
        }
        (DocKind::Array, Bson::Array(elements)) => {
            child_kinds.push(StepKind::Array);
            let child_table =
                ctx.ensure_virtual_table(current_table, &child_path, &child_kinds, true);
            for element in elements {
                walk_array_element(ctx, &child_table, element, &child_path, &child_kinds);
            }
            if elements.is_empty() {
                // §4.1.4: an empty array still produces a `value` column of
                // SQL type NULL if no element has ever set it.
                let table = ctx.tables.get_mut(&child_table).expect("table exists");
                if table.column_by_name(ARRAY_VALUE_COLUMN).is_none() {
                    table.push_column(SchemaColumn {
                        field_path: ARRAY_VALUE_COLUMN.to_string(),
                        sql_name: ARRAY_VALUE_COLUMN.to_string(),
                        sql_type: SqlType::Null,
                        db_type: DocKind::Null,
                        index_in_table: 0,
                        primary_key_index: 0,
                        foreign_key_index: 0,
                        foreign_key_table: None,
                        foreign_key_column: None,
                        is_generated: true,
                        array_index_level: None,
                    });
                }
            }
        }
        _ => unreachable!("handle_complex_field called with a non-complex kind"),
    }
}

fn walk_array_element(
    ctx: &mut InferCtx,
    array_table: &str,
    element: &Bson,
    path: &[String],
    kinds: &[StepKind],
) {
    let kind = DocKind::from_bson(element);
    match kind {
        DocKind::Document => {
            if let Bson::Document(inner) = element {
                walk_document(ctx, inner, array_table, path, kinds);
            }
        }
        DocKind::Array => {
            // Array of arrays: enter one more virtual table level (§4.1.1).
            // There is no field name at this point, so the nested level is
            // distinguished by an implementation-chosen synthesized segment
            // (see DESIGN.md) rather than a worked-example-derived name.
            let depth = kinds.iter().filter(|k| **k == StepKind::Array).count();
            let mut nested_path = path.to_vec();
            nested_path.push(format!("idx{depth}"));
            let mut nested_kinds = kinds.to_vec();
            nested_kinds.push(StepKind::Array);
            let nested_table =
                ctx.ensure_virtual_table(array_table, &nested_path, &nested_kinds, true);
            if let Bson::Array(inner_elements) = element {
                for inner in inner_elements {
                    walk_array_element(ctx, &nested_table, inner, &nested_path, &nested_kinds);
                }
            }
        }
        _ => {
            ctx.upsert_scalar_column(array_table, ARRAY_VALUE_COLUMN, kind);
            let table = ctx.tables.get_mut(array_table).expect("table exists");
            if let Some(col) = table.column_by_name_mut(ARRAY_VALUE_COLUMN) {
                col.is_generated = true;
            }
        }
    }
}

fn path_for(ctx: &InferCtx, table_name: &str) -> Vec<String> {
    ctx.table_paths.get(table_name).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn gen(collection: &str, docs: Vec<Document>) -> BTreeMap<String, SchemaTable> {
        generate(collection, docs.into_iter().map(Ok)).expect("generation must not fail")
    }

    #[test]
    fn scenario_two_level_document() {
        // §8.2 scenario 1.
        let tables = gen("coll", vec![doc! { "_id": "key", "doc": { "field": 1 } }]);
        assert_eq!(tables.len(), 2);

        let base = &tables["coll"];
        assert_eq!(base.columns.len(), 1);
        let id_col = base.column_by_name("__id").unwrap();
        assert_eq!(id_col.sql_type, SqlType::Varchar);
        assert_eq!(id_col.primary_key_index, 1);

        let virt = &tables["_doc"];
        let fk_id = virt.column_by_name("__id").unwrap();
        assert_eq!(fk_id.primary_key_index, 1);
        assert_eq!(fk_id.foreign_key_index, 1);
        assert_eq!(fk_id.foreign_key_table.as_deref(), Some("coll"));
        assert_eq!(fk_id.sql_type, SqlType::Varchar);

        let field = virt.column_by_name("field").unwrap();
        assert_eq!(field.sql_type, SqlType::Integer);
    }

    #[test]
    fn scenario_scalar_complex_conflict() {
        // §8.2 scenario 2.
        let tables = gen(
            "coll",
            vec![
                doc! { "_id": "k0", "array": [ { "f1": 1, "f2": 2 } ] },
                doc! { "_id": "k1", "array": [1, 2, 3] },
            ],
        );
        let base = &tables["coll"];
        let array_col = base.column_by_name("array").unwrap();
        assert_eq!(array_col.sql_type, SqlType::Varchar);
        assert!(!tables.contains_key("_array"));
    }

    #[test]
    fn scenario_scalar_complex_conflict_reverse_order() {
        let tables = gen(
            "coll",
            vec![
                doc! { "_id": "k0", "array": [1, 2, 3] },
                doc! { "_id": "k1", "array": [ { "f1": 1 } ] },
            ],
        );
        let base = &tables["coll"];
        let array_col = base.column_by_name("array").unwrap();
        assert_eq!(array_col.sql_type, SqlType::Varchar);
        assert!(!tables.contains_key("_array"));
    }

    #[test]
    fn scenario_pk_widening() {
        // §8.2 scenario 3.
        let tables = gen(
            "coll",
            vec![
                doc! { "_id": 1, "arr": [1] },
                doc! { "_id": 2.1, "arr": [0.0] },
            ],
        );
        assert_eq!(
            tables["coll"].column_by_name("__id").unwrap().sql_type,
            SqlType::Double
        );
        assert_eq!(
            tables["_arr"].column_by_name("__id").unwrap().sql_type,
            SqlType::Double
        );
    }

    #[test]
    fn document_valued_id_is_forced_to_varchar_not_a_virtual_table() {
        // §4.1.5: a document/array `_id` is forced to VARCHAR, not routed
        // through `handle_complex_field` as if it were an ordinary nested
        // field.
        let tables = gen("coll", vec![doc! { "_id": { "a": 1, "b": 2 } }]);
        assert_eq!(tables.len(), 1);
        assert!(!tables.contains_key("_id"));
        let id_col = tables["coll"].column_by_name("__id").unwrap();
        assert_eq!(id_col.sql_type, SqlType::Varchar);
        assert_eq!(id_col.primary_key_index, 1);
    }

    #[test]
    fn array_valued_id_is_forced_to_varchar_not_a_virtual_table() {
        let tables = gen("coll", vec![doc! { "_id": [1, 2, 3] }]);
        assert_eq!(tables.len(), 1);
        assert!(!tables.contains_key("_id"));
        let id_col = tables["coll"].column_by_name("__id").unwrap();
        assert_eq!(id_col.sql_type, SqlType::Varchar);
    }

    #[test]
    fn null_does_not_conflict_with_array() {
        let tables = gen(
            "coll",
            vec![
                doc! { "_id": 1, "field": Bson::Null },
                doc! { "_id": 2, "field": [1, 2] },
            ],
        );
        assert!(tables.contains_key("_field"));
        assert!(tables["coll"].column_by_name("field").is_none());
    }

    #[test]
    fn empty_embedded_document_still_produces_virtual_table() {
        let tables = gen(
            "coll",
            vec![
                doc! { "_id": 1, "doc": {} },
                doc! { "_id": 2, "doc": {} },
            ],
        );
        let virt = &tables["_doc"];
        assert_eq!(virt.columns.len(), 1);
        assert!(virt.column_by_name("__id").is_some());
    }

    #[test]
    fn empty_array_produces_index_and_null_value_column() {
        let tables = gen("coll", vec![doc! { "_id": 1, "arr": [] }]);
        let virt = &tables["_arr"];
        assert!(virt.column_by_name("array_index_lvl_0").is_some());
        let value_col = virt.column_by_name("value").unwrap();
        assert_eq!(value_col.sql_type, SqlType::Null);
    }

    #[test]
    fn missing_field_discovered_later_appends_at_end() {
        let tables = gen(
            "coll",
            vec![
                doc! { "_id": 1, "a": 1 },
                doc! { "_id": 2, "a": 2, "b": 3 },
            ],
        );
        let base = &tables["coll"];
        let names: Vec<_> = base.ordered_columns().map(|c| c.sql_name.clone()).collect();
        assert_eq!(names, vec!["__id", "a", "b"]);
    }

    #[test]
    fn array_of_documents_populates_columns_directly() {
        let tables = gen(
            "coll",
            vec![doc! { "_id": 1, "items": [ { "x": 1 }, { "y": "s" } ] }],
        );
        let virt = &tables["_items"];
        assert!(virt.column_by_name("x").is_some());
        assert!(virt.column_by_name("y").is_some());
    }
}
