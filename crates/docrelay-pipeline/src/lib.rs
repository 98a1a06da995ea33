// SPDX-License-Identifier: Apache-2.0

//! The SQL-to-Pipeline Translator (C7, §4.2): a pure function from a logical
//! query plan plus an inferred schema to an aggregation pipeline.

pub mod ast;
pub mod error;
pub mod sql_plan;
pub mod translate;

pub use ast::{LogicalPlan, PipelineContext};
pub use error::{TranslateError, TranslateResult};
pub use translate::{translate, SchemaMap};

/// Parses `sql` and lowers it against `schema` in one call, matching the
/// common case where the caller has SQL text rather than an
/// already-built `LogicalPlan`.
#[tracing::instrument(skip(schema), fields(sql_len = sql.len()))]
pub fn translate_sql(sql: &str, schema: &SchemaMap) -> TranslateResult<PipelineContext> {
    let plan = sql_plan::parse_to_logical_plan(sql)?;
    tracing::debug!("parsed SQL into a logical plan");
    translate::translate(&plan, schema)
}
