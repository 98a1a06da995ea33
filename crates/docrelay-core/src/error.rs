// SPDX-License-Identifier: Apache-2.0

//! Normalized error types shared by every crate in this workspace.
//!
//! Driver-, schema-, and translator-specific errors are mapped to these
//! unified kinds so callers see one consistent error surface regardless of
//! which subsystem raised it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all driver operations.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum DriverError {
    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("schema conflict in table '{table}': duplicate column '{first}' and '{second}'")]
    SchemaConflict {
        table: String,
        first: String,
        second: String,
    },

    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: u64, found: u64 },

    #[error("unsupported SQL: {message}")]
    UnsupportedSql { message: String },

    #[error("incomplete join key: {message}")]
    IncompleteJoinKey { message: String },

    #[error("unknown table: {table}")]
    UnknownTable { table: String },

    #[error("unknown column: {column} (table {table})")]
    UnknownColumn { table: String, column: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("tunnel startup failed: {message}")]
    TunnelStartup { message: String },
}

impl DriverError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection { message: msg.into() }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized { message: msg.into() }
    }

    pub fn schema_conflict(
        table: impl Into<String>,
        first: impl Into<String>,
        second: impl Into<String>,
    ) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            first: first.into(),
            second: second.into(),
        }
    }

    pub fn schema_version_mismatch(expected: u64, found: u64) -> Self {
        Self::SchemaVersionMismatch { expected, found }
    }

    pub fn unsupported_sql(msg: impl Into<String>) -> Self {
        Self::UnsupportedSql { message: msg.into() }
    }

    pub fn incomplete_join_key(msg: impl Into<String>) -> Self {
        Self::IncompleteJoinKey { message: msg.into() }
    }

    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable { table: table.into() }
    }

    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io { message: msg.into() }
    }

    pub fn tunnel_startup(msg: impl Into<String>) -> Self {
        Self::TunnelStartup { message: msg.into() }
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
