// SPDX-License-Identifier: Apache-2.0

//! Translator failure model (§4.2.9, §7). A sub-enum rather than reusing
//! `DriverError` directly, mirroring the teacher's `EngineError` /
//! higher-level error split: the translator's own failure kinds carry
//! translator-specific context, then convert into the workspace-wide
//! `DriverError` at the crate boundary.

use docrelay_core::error::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("cross-collection join is not supported: {message}")]
    UnsupportedCrossCollectionJoin { message: String },

    #[error("CROSS JOIN is not supported")]
    UnsupportedCrossJoin,

    #[error("incomplete join key between '{left_table}' and '{right_table}': {message}")]
    IncompleteJoinKey {
        left_table: String,
        right_table: String,
        message: String,
    },

    #[error("expression has no pipeline operator equivalent: {message}")]
    UnsupportedExpression { message: String },

    #[error("unknown table: {table}")]
    UnknownTable { table: String },

    #[error("unknown column: {column} (table {table})")]
    UnknownColumn { table: String, column: String },
}

impl From<TranslateError> for DriverError {
    fn from(err: TranslateError) -> Self {
        match err {
            TranslateError::UnsupportedCrossCollectionJoin { message }
            | TranslateError::UnsupportedExpression { message } => {
                DriverError::unsupported_sql(message)
            }
            TranslateError::UnsupportedCrossJoin => {
                DriverError::unsupported_sql("CROSS JOIN is not supported")
            }
            TranslateError::IncompleteJoinKey {
                left_table,
                right_table,
                message,
            } => DriverError::incomplete_join_key(format!(
                "{left_table} / {right_table}: {message}"
            )),
            TranslateError::UnknownTable { table } => DriverError::unknown_table(table),
            TranslateError::UnknownColumn { table, column } => {
                DriverError::unknown_column(table, column)
            }
        }
    }
}

pub type TranslateResult<T> = Result<T, TranslateError>;
