// SPDX-License-Identifier: Apache-2.0

//! Schema Store (C5, §4 table, §3.7 lifecycle).
//!
//! Reads, writes, and versions schema descriptors keyed by
//! `(schema_name, version)`. A schema is created once by the Schema
//! Inference Engine, persisted here, and is thereafter immutable; a
//! "regenerate" produces `version + 1`. Reads are lock-free cache snapshots;
//! writes are serialized through a single mutex per the concurrency model
//! (§5) — mirrors the cache-plus-JSON-file idiom used elsewhere in this
//! codebase for small versioned per-key documents, generalized here to a
//! two-part key and an immutable-once-written file per version.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use docrelay_core::error::{DriverError, DriverResult};
use docrelay_core::schema_types::{DatabaseSchema, SchemaTable};

use crate::wire::{table_from_wire, table_to_wire, WireTable};

type SchemaKey = (String, u64);

/// A fully materialized schema: its database-level descriptor plus every
/// table it references.
#[derive(Debug, Clone)]
pub struct LoadedSchema {
    pub descriptor: DatabaseSchema,
    pub tables: BTreeMap<String, SchemaTable>,
}

pub struct SchemaStore {
    data_dir: PathBuf,
    cache: RwLock<HashMap<SchemaKey, LoadedSchema>>,
    write_lock: Mutex<()>,
}

impl SchemaStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let _ = std::fs::create_dir_all(&data_dir);
        Self {
            data_dir,
            cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    fn schema_dir(&self, schema_name: &str) -> PathBuf {
        self.data_dir.join(schema_name)
    }

    fn descriptor_path(&self, schema_name: &str, version: u64) -> PathBuf {
        self.schema_dir(schema_name).join(format!("v{version}.schema.json"))
    }

    fn tables_path(&self, schema_name: &str, version: u64) -> PathBuf {
        self.schema_dir(schema_name).join(format!("v{version}.tables.json"))
    }

    /// The highest version persisted for `schema_name`, or `None` if it has
    /// never been generated.
    pub fn latest_version(&self, schema_name: &str) -> Option<u64> {
        let dir = self.schema_dir(schema_name);
        let entries = std::fs::read_dir(&dir).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| parse_version_from_descriptor_name(&e.file_name().to_string_lossy()))
            .max()
    }

    /// Lock-free read of a previously persisted version from the cache, or
    /// a read-through from disk into the cache on first access.
    pub fn load(&self, schema_name: &str, version: u64) -> DriverResult<LoadedSchema> {
        let key = (schema_name.to_string(), version);
        if let Some(loaded) = self.cache.read().unwrap().get(&key) {
            return Ok(loaded.clone());
        }
        let loaded = self.read_from_disk(schema_name, version)?;
        self.cache.write().unwrap().insert(key, loaded.clone());
        Ok(loaded)
    }

    fn read_from_disk(&self, schema_name: &str, version: u64) -> DriverResult<LoadedSchema> {
        let descriptor_bytes = std::fs::read(self.descriptor_path(schema_name, version))
            .map_err(map_read_error)?;
        let descriptor: DatabaseSchema = serde_json::from_slice(&descriptor_bytes)
            .map_err(|e| DriverError::unsupported_sql(format!("malformed schema descriptor: {e}")))?;

        let tables_bytes =
            std::fs::read(self.tables_path(schema_name, version)).map_err(map_read_error)?;
        let wire_tables: Vec<WireTable> = serde_json::from_slice(&tables_bytes)
            .map_err(|e| DriverError::unsupported_sql(format!("malformed schema tables: {e}")))?;

        let mut tables = BTreeMap::new();
        for wire_table in &wire_tables {
            let table = table_from_wire(wire_table)?;
            tables.insert(table.sql_name.clone(), table);
        }
        Ok(LoadedSchema { descriptor, tables })
    }

    /// Persists a freshly generated schema as a new version. `expected_current`
    /// must match `latest_version(schema_name)` or the write is rejected as a
    /// `Schema-Version-Mismatch` (§7) — the caller races with another writer
    /// and must reload the latest version before retrying.
    pub fn regenerate(
        &self,
        schema_name: &str,
        sql_name: &str,
        expected_current: Option<u64>,
        tables: BTreeMap<String, SchemaTable>,
        modified_at: chrono::DateTime<chrono::Utc>,
    ) -> DriverResult<LoadedSchema> {
        let _guard = self.write_lock.lock().unwrap();

        let current = self.latest_version(schema_name);
        if current != expected_current {
            return Err(DriverError::SchemaVersionMismatch {
                expected: expected_current.unwrap_or(0),
                found: current.unwrap_or(0),
            });
        }
        let next_version = current.map(|v| v + 1).unwrap_or(1);

        let descriptor = DatabaseSchema {
            schema_name: schema_name.to_string(),
            sql_name: sql_name.to_string(),
            schema_version: next_version,
            modified_at,
            table_references: tables.keys().cloned().collect(),
        };

        let dir = self.schema_dir(schema_name);
        std::fs::create_dir_all(&dir).map_err(map_write_error)?;

        let wire_tables: Vec<WireTable> = tables.values().map(table_to_wire).collect();
        let tables_json = serde_json::to_vec_pretty(&wire_tables)
            .map_err(|e| DriverError::unsupported_sql(format!("failed to serialize tables: {e}")))?;
        std::fs::write(self.tables_path(schema_name, next_version), tables_json)
            .map_err(map_write_error)?;

        let descriptor_json = serde_json::to_vec_pretty(&descriptor)
            .map_err(|e| DriverError::unsupported_sql(format!("failed to serialize descriptor: {e}")))?;
        std::fs::write(self.descriptor_path(schema_name, next_version), descriptor_json)
            .map_err(map_write_error)?;

        let loaded = LoadedSchema { descriptor, tables };
        self.cache
            .write()
            .unwrap()
            .insert((schema_name.to_string(), next_version), loaded.clone());
        Ok(loaded)
    }

    /// Every `(schema_name, version)` currently persisted under this store's
    /// data directory, for the management CLI's `list-schema` (§6.3).
    pub fn list_schema_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.data_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }
}

fn parse_version_from_descriptor_name(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix('v')?
        .strip_suffix(".schema.json")?
        .parse()
        .ok()
}

fn map_read_error(err: std::io::Error) -> DriverError {
    if err.kind() == std::io::ErrorKind::NotFound {
        DriverError::unsupported_sql("schema version not found")
    } else if err.kind() == std::io::ErrorKind::PermissionDenied {
        DriverError::unauthorized(err.to_string())
    } else {
        DriverError::from(err)
    }
}

fn map_write_error(err: std::io::Error) -> DriverError {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        DriverError::unauthorized(err.to_string())
    } else {
        DriverError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrelay_core::document::DocKind;
    use docrelay_core::schema_types::SchemaColumn;
    use docrelay_core::sql_type::SqlType;

    fn one_table() -> BTreeMap<String, SchemaTable> {
        let mut table = SchemaTable::new("coll", "coll");
        table.push_column(SchemaColumn {
            field_path: "_id".to_string(),
            sql_name: "__id".to_string(),
            sql_type: SqlType::Varchar,
            db_type: DocKind::String,
            index_in_table: 0,
            primary_key_index: 1,
            foreign_key_index: 0,
            foreign_key_table: None,
            foreign_key_column: None,
            is_generated: false,
            array_index_level: None,
        });
        let mut map = BTreeMap::new();
        map.insert("coll".to_string(), table);
        map
    }

    #[test]
    fn first_generation_requires_no_current_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path());
        let loaded = store
            .regenerate("mydb", "mydb", None, one_table(), chrono::Utc::now())
            .unwrap();
        assert_eq!(loaded.descriptor.schema_version, 1);
        assert_eq!(store.latest_version("mydb"), Some(1));
    }

    #[test]
    fn regenerate_bumps_version_and_keeps_earlier_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path());
        store
            .regenerate("mydb", "mydb", None, one_table(), chrono::Utc::now())
            .unwrap();
        store
            .regenerate("mydb", "mydb", Some(1), one_table(), chrono::Utc::now())
            .unwrap();

        assert_eq!(store.latest_version("mydb"), Some(2));
        let v1 = store.load("mydb", 1).unwrap();
        assert_eq!(v1.descriptor.schema_version, 1);
        let v2 = store.load("mydb", 2).unwrap();
        assert_eq!(v2.descriptor.schema_version, 2);
    }

    #[test]
    fn stale_expected_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path());
        store
            .regenerate("mydb", "mydb", None, one_table(), chrono::Utc::now())
            .unwrap();
        let err = store
            .regenerate("mydb", "mydb", Some(5), one_table(), chrono::Utc::now())
            .unwrap_err();
        assert!(matches!(err, DriverError::SchemaVersionMismatch { .. }));
    }

    #[test]
    fn load_round_trips_table_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchemaStore::new(dir.path());
        store
            .regenerate("mydb", "mydb", None, one_table(), chrono::Utc::now())
            .unwrap();
        let loaded = store.load("mydb", 1).unwrap();
        let table = &loaded.tables["coll"];
        assert_eq!(table.column_by_name("__id").unwrap().primary_key_index, 1);
    }
}
