// SPDX-License-Identifier: Apache-2.0

//! Schema Inference Engine (C4) and Schema Store (C5).

pub mod inference;
pub mod store;
pub mod wire;

pub use inference::generate;
pub use store::{LoadedSchema, SchemaStore};

use bson::Document;
use docrelay_core::error::DriverResult;
use docrelay_core::schema_types::SchemaTable;
use std::collections::BTreeMap;

/// Infers a fresh schema for one collection's document stream and persists
/// it as the next version in `store`. The single entry point most callers
/// want; `inference::generate` and `SchemaStore::regenerate` remain public
/// for callers assembling a multi-collection `DatabaseSchema` by hand.
#[tracing::instrument(skip(store, documents), fields(schema_name = %schema_name, collection = %collection_name))]
pub fn infer_and_store<I>(
    store: &SchemaStore,
    schema_name: &str,
    sql_name: &str,
    collection_name: &str,
    expected_current: Option<u64>,
    documents: I,
) -> DriverResult<LoadedSchema>
where
    I: IntoIterator<Item = DriverResult<Document>>,
{
    let tables: BTreeMap<String, SchemaTable> = generate(collection_name, documents)?;
    tracing::debug!(tables = tables.len(), "schema inferred");
    store.regenerate(schema_name, sql_name, expected_current, tables, now())
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn infer_and_store_persists_first_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path());
        let docs = vec![Ok(doc! { "_id": 1, "name": "a" })];
        let loaded = infer_and_store(&store, "mydb", "mydb", "users", None, docs).unwrap();
        assert_eq!(loaded.descriptor.schema_version, 1);
        assert!(loaded.tables.contains_key("users"));
    }
}
