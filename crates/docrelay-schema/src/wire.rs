// SPDX-License-Identifier: Apache-2.0

//! Schema persistence wire format (§6.2): an array of table objects with
//! `sqlName`/`collectionName`/`columns[]`, each column carrying
//! `fieldPath`/`sqlName`/`sqlType`/`dbType` and optional key flags. This is
//! the on-disk/export shape the Schema Store and the management CLI (§6.3)
//! exchange; it is intentionally flatter than `SchemaTable` (booleans
//! instead of composite-key positions), so conversion both ways lives here
//! rather than on the core types themselves.

use serde::{Deserialize, Serialize};

use docrelay_core::document::DocKind;
use docrelay_core::error::{DriverError, DriverResult};
use docrelay_core::schema_types::{SchemaColumn, SchemaTable};
use docrelay_core::sql_type::SqlType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireColumn {
    pub field_path: String,
    pub sql_name: String,
    pub sql_type: String,
    pub db_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_primary_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_index: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key_table_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key_column_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTable {
    pub sql_name: String,
    pub collection_name: String,
    pub columns: Vec<WireColumn>,
}

fn wire_name_for(kind: DocKind) -> String {
    kind.wire_name().to_string()
}

pub fn table_to_wire(table: &SchemaTable) -> WireTable {
    WireTable {
        sql_name: table.sql_name.clone(),
        collection_name: table.collection_name.clone(),
        columns: table
            .ordered_columns()
            .map(|c| WireColumn {
                field_path: c.field_path.clone(),
                sql_name: c.sql_name.clone(),
                sql_type: c.sql_type.wire_name().to_string(),
                db_type: wire_name_for(c.db_type),
                is_primary_key: c.is_primary_key().then_some(true),
                is_index: None,
                foreign_key_table_name: c.foreign_key_table.clone(),
                foreign_key_column_name: c.foreign_key_column.clone(),
            })
            .collect(),
    }
}

/// Rebuilds a `SchemaTable` from its wire form. Composite-key position is
/// not carried on the wire (only a boolean flag is), so PK/FK ordinals are
/// reassigned in column-appearance order — the only ordering the format
/// preserves.
pub fn table_from_wire(wire: &WireTable) -> DriverResult<SchemaTable> {
    let mut table = SchemaTable::new(wire.sql_name.clone(), wire.collection_name.clone());
    let mut seen_names = std::collections::HashSet::new();
    let mut pk_counter = 0u32;
    let mut fk_counter = 0u32;

    for wc in &wire.columns {
        if !seen_names.insert(wc.sql_name.clone()) {
            let first = table
                .column_by_name(&wc.sql_name)
                .map(|c| c.sql_name.clone())
                .unwrap_or_default();
            return Err(DriverError::schema_conflict(
                wire.sql_name.clone(),
                first,
                wc.sql_name.clone(),
            ));
        }
        let sql_type = SqlType::from_wire_name(&wc.sql_type).ok_or_else(|| {
            DriverError::unsupported_sql(format!("unknown sqlType '{}' on the wire", wc.sql_type))
        })?;
        let db_type = DocKind::from_wire_name(&wc.db_type).ok_or_else(|| {
            DriverError::unsupported_sql(format!("unknown dbType '{}' on the wire", wc.db_type))
        })?;
        let is_pk = wc.is_primary_key.unwrap_or(false);
        let is_fk = wc.foreign_key_table_name.is_some();
        if is_pk {
            pk_counter += 1;
        }
        if is_fk {
            fk_counter += 1;
        }
        table.push_column(SchemaColumn {
            field_path: wc.field_path.clone(),
            sql_name: wc.sql_name.clone(),
            sql_type,
            db_type,
            index_in_table: 0,
            primary_key_index: if is_pk { pk_counter } else { 0 },
            foreign_key_index: if is_fk { fk_counter } else { 0 },
            foreign_key_table: wc.foreign_key_table_name.clone(),
            foreign_key_column: wc.foreign_key_column_name.clone(),
            is_generated: false,
            array_index_level: None,
        });
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrelay_core::document::DocKind;

    fn sample_table() -> SchemaTable {
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
        table
    }

    #[test]
    fn round_trips_through_wire() {
        let table = sample_table();
        let wire = table_to_wire(&table);
        assert_eq!(wire.columns[0].is_primary_key, Some(true));
        let back = table_from_wire(&wire).unwrap();
        assert_eq!(back.column_by_name("__id").unwrap().primary_key_index, 1);
    }

    #[test]
    fn duplicate_sql_name_rejects_import() {
        let wire = WireTable {
            sql_name: "coll".to_string(),
            collection_name: "coll".to_string(),
            columns: vec![
                WireColumn {
                    field_path: "a".to_string(),
                    sql_name: "a".to_string(),
                    sql_type: "varchar".to_string(),
                    db_type: "string".to_string(),
                    is_primary_key: None,
                    is_index: None,
                    foreign_key_table_name: None,
                    foreign_key_column_name: None,
                },
                WireColumn {
                    field_path: "a_dup".to_string(),
                    sql_name: "a".to_string(),
                    sql_type: "integer".to_string(),
                    db_type: "int32".to_string(),
                    is_primary_key: None,
                    is_index: None,
                    foreign_key_table_name: None,
                    foreign_key_column_name: None,
                },
            ],
        };
        let err = table_from_wire(&wire).unwrap_err();
        assert!(matches!(err, DriverError::SchemaConflict { .. }));
    }
}
