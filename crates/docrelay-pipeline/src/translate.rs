// SPDX-License-Identifier: Apache-2.0

//! The SQL-to-Pipeline Translator (C7, §4.2). Pure — performs no I/O.
//! `translate(plan, schema)` accepts only plans whose leaves are `Scan`
//! nodes over tables belonging to a single collection.
//!
//! Grounded on `src-tauri/src/federation/planner.rs`'s staged plan-building
//! flow (resolve → lower → rewrite), generalized from "rewrite one SQL
//! string for DuckDB" to "lower one logical plan into aggregation stages".

use std::collections::{BTreeMap, HashSet};

use docrelay_core::mangle::virtual_table_name;
use docrelay_core::schema_types::SchemaTable;
use docrelay_core::sql_type::SqlType;

use crate::ast::{
    Aggregate, AggFn, CmpOp, JoinKind, Literal, LogicalPlan, Predicate, ResultColumn, Stage,
    ValueExpr,
};
use crate::error::{TranslateError, TranslateResult};

pub type SchemaMap = BTreeMap<String, SchemaTable>;

struct Lowered {
    stages: Vec<Stage>,
    columns: Vec<ResultColumn>,
}

/// Entry point (§4.2 contract).
pub fn translate(plan: &LogicalPlan, schema: &SchemaMap) -> TranslateResult<crate::ast::PipelineContext> {
    let leaves = collect_scan_tables(plan);
    let mut collection_name: Option<String> = None;
    for table_name in &leaves {
        let table = get_table(schema, table_name)?;
        match &collection_name {
            None => collection_name = Some(table.collection_name.clone()),
            Some(existing) if *existing != table.collection_name => {
                return Err(TranslateError::UnsupportedCrossCollectionJoin {
                    message: format!(
                        "'{table_name}' belongs to collection '{}', expected '{existing}'",
                        table.collection_name
                    ),
                });
            }
            _ => {}
        }
    }
    let collection_name = collection_name.ok_or_else(|| TranslateError::UnknownTable {
        table: "<plan has no scan leaves>".to_string(),
    })?;

    let mut flag_seq = 0u32;
    let mut lowered = lower_node(plan, schema, &mut flag_seq)?;

    // A bare `SELECT *` never builds an explicit `LogicalPlan::Project`
    // (`sql_plan::build_projection_plan` special-cases it away), so a scan
    // over a virtual table would otherwise end with no stage that flattens
    // its nested document paths back to SQL column names. Aggregates
    // already give their output flat names via `Stage::Group`, and an
    // explicit projection already ends in its own `Stage::Project`; neither
    // needs this.
    let already_projected = matches!(lowered.stages.last(), Some(Stage::Project(_)));
    let scans_virtual_table = leaves
        .iter()
        .any(|name| schema.get(name).map(|t| !t.is_base()).unwrap_or(false));
    if !already_projected && scans_virtual_table && !contains_aggregate(plan) {
        lowered
            .stages
            .push(Stage::Project(flatten_columns(&lowered.columns, schema)));
    }

    Ok(crate::ast::PipelineContext {
        collection_name,
        stages: lowered.stages,
        result_columns: lowered.columns,
    })
}

fn contains_aggregate(plan: &LogicalPlan) -> bool {
    match plan {
        LogicalPlan::Aggregate { .. } => true,
        LogicalPlan::Scan { .. } => false,
        LogicalPlan::Filter { input, .. }
        | LogicalPlan::Project { input, .. }
        | LogicalPlan::Sort { input, .. }
        | LogicalPlan::Limit { input, .. } => contains_aggregate(input),
        LogicalPlan::Join { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
    }
}

/// Maps each result column back to its origin table's document path
/// (§4.2.2 addressing), producing the identity `$project` that flattens a
/// virtual table's nested fields to their SQL names.
fn flatten_columns(columns: &[ResultColumn], schema: &SchemaMap) -> Vec<(String, ValueExpr)> {
    columns
        .iter()
        .map(|c| {
            let path = schema
                .get(&c.table_name)
                .and_then(|t| t.column_by_name(&c.sql_name).map(|sc| document_path(t, sc)))
                .unwrap_or_else(|| c.sql_name.clone());
            (c.sql_name.clone(), ValueExpr::Field(path))
        })
        .collect()
}

fn collect_scan_tables(plan: &LogicalPlan) -> Vec<String> {
    match plan {
        LogicalPlan::Scan { table } => vec![table.clone()],
        LogicalPlan::Filter { input, .. }
        | LogicalPlan::Project { input, .. }
        | LogicalPlan::Sort { input, .. }
        | LogicalPlan::Limit { input, .. }
        | LogicalPlan::Aggregate { input, .. } => collect_scan_tables(input),
        LogicalPlan::Join { left, right, .. } => {
            let mut tables = collect_scan_tables(left);
            tables.extend(collect_scan_tables(right));
            tables
        }
    }
}

fn get_table<'a>(schema: &'a SchemaMap, name: &str) -> TranslateResult<&'a SchemaTable> {
    schema.get(name).ok_or_else(|| TranslateError::UnknownTable {
        table: name.to_string(),
    })
}

/// The dotted document path used to address a column in `$match`/`$project`
/// expressions. Inherited PK/FK columns (the base `_id`, or a synthesized
/// array-index column promoted to top level by its owning `$unwind`) are
/// always addressed by their bare name; only a table's own genuinely new,
/// non-key columns are addressed through the nested path (§4.2.2).
fn document_path(table: &SchemaTable, column: &docrelay_core::schema_types::SchemaColumn) -> String {
    if column.is_foreign_key() || column.array_index_level.is_some() {
        column.field_path.clone()
    } else {
        table.document_path_for(column)
    }
}

fn lower_node(plan: &LogicalPlan, schema: &SchemaMap, flag_seq: &mut u32) -> TranslateResult<Lowered> {
    match plan {
        LogicalPlan::Scan { table } => {
            let t = get_table(schema, table)?;
            let stages = lower_scan(t, schema, true)?;
            let columns = t
                .ordered_columns()
                .map(|c| ResultColumn {
                    sql_name: c.sql_name.clone(),
                    sql_type: c.sql_type,
                    nullable: !c.is_primary_key(),
                    table_name: t.sql_name.clone(),
                })
                .collect();
            Ok(Lowered { stages, columns })
        }
        LogicalPlan::Filter { input, predicate } => {
            let mut lowered = lower_node(input, schema, flag_seq)?;
            lowered.stages.extend(lower_filter(predicate, flag_seq)?);
            Ok(lowered)
        }
        LogicalPlan::Project { input, columns } => {
            let lowered = lower_node(input, schema, flag_seq)?;
            let mut stages = lowered.stages;
            stages.push(Stage::Project(columns.clone()));
            let result_columns = columns
                .iter()
                .map(|(out_name, expr)| project_result_column(out_name, expr, &lowered.columns))
                .collect();
            Ok(Lowered { stages, columns: result_columns })
        }
        LogicalPlan::Join { left, right, kind, on } => lower_join(left, right, *kind, on, schema),
        LogicalPlan::Aggregate {
            input,
            group_key,
            aggregates,
            having,
        } => lower_aggregate(input, group_key, aggregates, having.as_ref(), schema, flag_seq),
        LogicalPlan::Sort { input, keys } => {
            let mut lowered = lower_node(input, schema, flag_seq)?;
            lowered.stages.push(Stage::Sort(keys.clone()));
            Ok(lowered)
        }
        LogicalPlan::Limit { input, n } => {
            let mut lowered = lower_node(input, schema, flag_seq)?;
            lowered.stages.push(Stage::Limit(*n));
            Ok(lowered)
        }
    }
}

fn project_result_column(out_name: &str, expr: &ValueExpr, scope: &[ResultColumn]) -> ResultColumn {
    if let ValueExpr::Field(f) = expr {
        if let Some(existing) = scope.iter().find(|c| &c.sql_name == f) {
            return ResultColumn {
                sql_name: out_name.to_string(),
                sql_type: existing.sql_type,
                nullable: existing.nullable,
                table_name: existing.table_name.clone(),
            };
        }
    }
    // Computed expression: §4.2.8 — no type promotion happens at translation
    // time, so a computed column's type is left unresolved (VARCHAR stands
    // in for "unknown until the expression actually evaluates").
    ResultColumn {
        sql_name: out_name.to_string(),
        sql_type: SqlType::Varchar,
        nullable: true,
        table_name: String::new(),
    }
}

/// Scan lowering (§4.2.2). `override_preserve_null` lets join lowering force
/// an inner-join unwind to drop unmatched rows instead of preserving them.
fn lower_scan(table: &SchemaTable, schema: &SchemaMap, preserve_null: bool) -> TranslateResult<Vec<Stage>> {
    let mut stages = Vec::new();

    for depth in 0..table.source_path.len() {
        let prefix = &table.source_path[..=depth];
        let ancestor_name = virtual_table_name(prefix);
        let ancestor = get_table(schema, &ancestor_name)?;
        if ancestor.is_array_derived {
            let index_col = ancestor
                .primary_key_columns()
                .into_iter()
                .max_by_key(|c| c.primary_key_index)
                .expect("an array-derived table always synthesizes its own index PK column");
            stages.push(Stage::Unwind {
                path: prefix.join("."),
                preserve_null,
                index_as: index_col.sql_name.clone(),
            });
        }
    }

    if !table.source_path.is_empty() {
        let guard_fields: Vec<String> = table
            .columns
            .values()
            .filter(|c| !c.is_primary_key() && !c.is_foreign_key())
            .map(|c| document_path(table, c))
            .collect();
        if !guard_fields.is_empty() {
            let exists_checks = guard_fields
                .into_iter()
                .map(|field| Predicate::Exists { field, exists: true })
                .collect();
            stages.push(Stage::Match(Predicate::Or(exists_checks)));
        }
    }

    Ok(stages)
}

/// Filter lowering (§4.2.3, §4.2.4): try the DeMorgan NOT-pushdown first: if
/// every leaf still has a direct dual, the result stays in simple mode.
/// Otherwise the whole predicate enters expression mode.
fn lower_filter(predicate: &Predicate, flag_seq: &mut u32) -> TranslateResult<Vec<Stage>> {
    match predicate.push_not() {
        Some(pushed) if pushed.is_simple() => Ok(vec![Stage::Match(pushed)]),
        _ => lower_expression_mode(predicate, flag_seq),
    }
}

fn lower_expression_mode(predicate: &Predicate, flag_seq: &mut u32) -> TranslateResult<Vec<Stage>> {
    let expr = predicate_to_value_expr(predicate)?.guarded();
    *flag_seq += 1;
    let flag_name = format!("__expr_flag_{}_{}", flag_seq, random_hex_suffix());
    Ok(vec![
        Stage::AddFields(vec![(flag_name.clone(), expr)]),
        Stage::Match(Predicate::Cmp {
            field: flag_name.clone(),
            op: CmpOp::Eq,
            value: Literal::Bool(true),
        }),
        Stage::Exclude(vec![flag_name]),
    ])
}

fn predicate_to_value_expr(predicate: &Predicate) -> TranslateResult<ValueExpr> {
    Ok(match predicate {
        Predicate::Cmp { field, op, value } => ValueExpr::Cmp(
            Box::new(ValueExpr::Field(field.clone())),
            *op,
            Box::new(ValueExpr::Literal(value.clone())),
        ),
        Predicate::IsNull { field } => ValueExpr::Cmp(
            Box::new(ValueExpr::Field(field.clone())),
            CmpOp::Eq,
            Box::new(ValueExpr::Literal(Literal::Null)),
        ),
        Predicate::IsNotNull { field } => ValueExpr::Cmp(
            Box::new(ValueExpr::Field(field.clone())),
            CmpOp::Ne,
            Box::new(ValueExpr::Literal(Literal::Null)),
        ),
        Predicate::In { field, values } => ValueExpr::Or(
            values
                .iter()
                .map(|v| {
                    ValueExpr::Cmp(
                        Box::new(ValueExpr::Field(field.clone())),
                        CmpOp::Eq,
                        Box::new(ValueExpr::Literal(v.clone())),
                    )
                })
                .collect(),
        ),
        Predicate::NotIn { field, values } => ValueExpr::And(
            values
                .iter()
                .map(|v| {
                    ValueExpr::Cmp(
                        Box::new(ValueExpr::Field(field.clone())),
                        CmpOp::Ne,
                        Box::new(ValueExpr::Literal(v.clone())),
                    )
                })
                .collect(),
        ),
        Predicate::Exists { .. } => {
            return Err(TranslateError::UnsupportedExpression {
                message: "EXISTS has no aggregate-operator equivalent".to_string(),
            })
        }
        Predicate::And(ps) => ValueExpr::And(
            ps.iter()
                .map(predicate_to_value_expr)
                .collect::<TranslateResult<Vec<_>>>()?,
        ),
        Predicate::Or(ps) => ValueExpr::Or(
            ps.iter()
                .map(predicate_to_value_expr)
                .collect::<TranslateResult<Vec<_>>>()?,
        ),
        Predicate::Not(inner) => {
            let inner_expr = predicate_to_value_expr(inner)?;
            ValueExpr::Cond(
                Box::new(inner_expr),
                Box::new(ValueExpr::Literal(Literal::Bool(false))),
                Box::new(ValueExpr::Literal(Literal::Bool(true))),
            )
        }
        Predicate::ExprCmp { left, op, right } => {
            ValueExpr::Cmp(Box::new(left.clone()), *op, Box::new(right.clone()))
        }
    })
}

fn random_hex_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..8).map(|_| format!("{:x}", rng.gen_range(0..16u8))).collect()
}

/// Join lowering (§4.2.6), restricted to a two-way join of two `Scan` leaves
/// sharing one collection. A multi-table join chain is out of scope for
/// this translator; see DESIGN.md.
fn lower_join(
    left: &LogicalPlan,
    right: &LogicalPlan,
    kind: JoinKind,
    on: &[(String, String)],
    schema: &SchemaMap,
) -> TranslateResult<Lowered> {
    if kind == JoinKind::Cross {
        return Err(TranslateError::UnsupportedCrossJoin);
    }

    let (left_name, right_name) = match (left, right) {
        (LogicalPlan::Scan { table: l }, LogicalPlan::Scan { table: r }) => (l.clone(), r.clone()),
        _ => {
            return Err(TranslateError::UnsupportedCrossCollectionJoin {
                message: "only a join of two base/virtual table scans is supported".to_string(),
            })
        }
    };
    let left_table = get_table(schema, &left_name)?;
    let right_table = get_table(schema, &right_name)?;

    if left_table.collection_name != right_table.collection_name {
        return Err(TranslateError::UnsupportedCrossCollectionJoin {
            message: format!(
                "'{}' and '{}' are not derived from the same collection",
                left_table.sql_name, right_table.sql_name
            ),
        });
    }

    if kind == JoinKind::Full {
        return Err(TranslateError::UnsupportedExpression {
            message: "FULL JOIN requires the caller to union two separately lowered pipelines"
                .to_string(),
        });
    }

    let (base_table, array_table, effective_kind) = match kind {
        JoinKind::Right => (right_table, left_table, JoinKind::Left),
        other => (left_table, right_table, other),
    };

    let required: HashSet<(String, String)> = required_join_pairs(base_table, array_table)
        .into_iter()
        .map(|(a, b)| normalize_pair(&a, &b))
        .collect();
    let given: HashSet<(String, String)> = on.iter().map(|(a, b)| normalize_pair(a, b)).collect();

    if required.is_empty() {
        return Err(TranslateError::IncompleteJoinKey {
            left_table: base_table.sql_name.clone(),
            right_table: array_table.sql_name.clone(),
            message: "the two tables share no PK/FK relationship".to_string(),
        });
    }
    if given != required {
        return Err(TranslateError::IncompleteJoinKey {
            left_table: base_table.sql_name.clone(),
            right_table: array_table.sql_name.clone(),
            message: format!(
                "join predicate must be exactly the shared PK/FK columns {required:?}, got {given:?}"
            ),
        });
    }

    let mut stages = lower_scan(base_table, schema, true)?;
    let preserve_null = effective_kind == JoinKind::Left;
    stages.extend(lower_scan(array_table, schema, preserve_null)?);

    let mut columns: Vec<ResultColumn> = base_table
        .ordered_columns()
        .map(|c| ResultColumn {
            sql_name: c.sql_name.clone(),
            sql_type: c.sql_type,
            nullable: !c.is_primary_key(),
            table_name: base_table.sql_name.clone(),
        })
        .collect();
    columns.extend(array_table.ordered_columns().map(|c| ResultColumn {
        sql_name: c.sql_name.clone(),
        sql_type: c.sql_type,
        nullable: true,
        table_name: array_table.sql_name.clone(),
    }));

    Ok(Lowered { stages, columns })
}

fn normalize_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// The shared PK/FK column-name pairs between two tables (§4.2.6): every FK
/// column on either side that points at the other, paired with the PK
/// column it references.
fn required_join_pairs(left: &SchemaTable, right: &SchemaTable) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for col in left.columns.values() {
        if col.is_foreign_key() && col.foreign_key_table.as_deref() == Some(right.sql_name.as_str()) {
            if let Some(fk_col) = &col.foreign_key_column {
                pairs.push((col.sql_name.clone(), fk_col.clone()));
            }
        }
    }
    for col in right.columns.values() {
        if col.is_foreign_key() && col.foreign_key_table.as_deref() == Some(left.sql_name.as_str()) {
            if let Some(fk_col) = &col.foreign_key_column {
                pairs.push((fk_col.clone(), col.sql_name.clone()));
            }
        }
    }
    pairs
}

fn lower_aggregate(
    input: &LogicalPlan,
    group_key: &[String],
    aggregates: &[Aggregate],
    having: Option<&Predicate>,
    schema: &SchemaMap,
    flag_seq: &mut u32,
) -> TranslateResult<Lowered> {
    let lowered = lower_node(input, schema, flag_seq)?;
    let mut stages = lowered.stages;

    let group_key_exprs: Vec<(String, ValueExpr)> = group_key
        .iter()
        .map(|k| (k.clone(), ValueExpr::Field(k.clone())))
        .collect();
    stages.push(Stage::Group {
        group_key: group_key_exprs,
        aggregates: aggregates.to_vec(),
    });

    if let Some(predicate) = having {
        stages.extend(lower_filter(predicate, flag_seq)?);
    }

    let mut columns = Vec::new();
    for key in group_key {
        let sql_type = lowered
            .columns
            .iter()
            .find(|c| &c.sql_name == key)
            .map(|c| c.sql_type)
            .unwrap_or(SqlType::Varchar);
        columns.push(ResultColumn {
            sql_name: key.clone(),
            sql_type,
            nullable: true,
            table_name: String::new(),
        });
    }
    for agg in aggregates {
        let sql_type = match agg.func {
            AggFn::Count => SqlType::Bigint,
            AggFn::Sum | AggFn::Min | AggFn::Max | AggFn::Avg => SqlType::Double,
        };
        columns.push(ResultColumn {
            sql_name: agg.output_name.clone(),
            sql_type,
            nullable: false,
            table_name: String::new(),
        });
    }

    Ok(Lowered { stages, columns })
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrelay_core::document::DocKind;
    use docrelay_core::schema_types::SchemaColumn;
    use serde_json::json;

    fn col(
        field_path: &str,
        sql_name: &str,
        sql_type: SqlType,
        pk: u32,
        fk: (u32, Option<&str>, Option<&str>),
    ) -> SchemaColumn {
        SchemaColumn {
            field_path: field_path.to_string(),
            sql_name: sql_name.to_string(),
            sql_type,
            db_type: DocKind::String,
            index_in_table: 0,
            primary_key_index: pk,
            foreign_key_index: fk.0,
            foreign_key_table: fk.1.map(str::to_string),
            foreign_key_column: fk.2.map(str::to_string),
            is_generated: false,
            array_index_level: None,
        }
    }

    /// `users` (base) with an embedded `addresses` array, one level deep:
    /// `users` { __id PK, name }, `_addresses` { __id PK/FK, array_index_lvl_0 PK, city }.
    fn sample_schema() -> SchemaMap {
        let mut schema = SchemaMap::new();

        let mut users = SchemaTable::new("users", "users");
        users.push_column(col("_id", "__id", SqlType::Varchar, 1, (0, None, None)));
        users.push_column(col("name", "name", SqlType::Varchar, 0, (0, None, None)));
        schema.insert("users".to_string(), users);

        let mut addresses =
            SchemaTable::new("_addresses", "users").with_source_path(vec!["addresses".to_string()]);
        addresses.is_array_derived = true;
        addresses.push_column(col("_id", "__id", SqlType::Varchar, 1, (1, Some("users"), Some("__id"))));
        let mut idx_col = col(
            "array_index_lvl_0",
            "array_index_lvl_0",
            SqlType::Bigint,
            2,
            (0, None, None),
        );
        idx_col.array_index_level = Some(0);
        addresses.push_column(idx_col);
        addresses.push_column(col("city", "city", SqlType::Varchar, 0, (0, None, None)));
        schema.insert("_addresses".to_string(), addresses);

        schema
    }

    #[test]
    fn scan_base_table_emits_no_stages() {
        let schema = sample_schema();
        let plan = LogicalPlan::Scan { table: "users".to_string() };
        let ctx = translate(&plan, &schema).unwrap();
        assert_eq!(ctx.collection_name, "users");
        assert!(ctx.stages.is_empty());
        assert_eq!(ctx.result_columns.len(), 2);
    }

    #[test]
    fn scan_array_virtual_table_emits_unwind_guard_and_flatten_project() {
        let schema = sample_schema();
        let plan = LogicalPlan::Scan { table: "_addresses".to_string() };
        let ctx = translate(&plan, &schema).unwrap();
        assert_eq!(ctx.stages.len(), 3);
        match &ctx.stages[0] {
            Stage::Unwind { path, preserve_null, index_as } => {
                assert_eq!(path, "addresses");
                assert!(*preserve_null);
                assert_eq!(index_as, "array_index_lvl_0");
            }
            other => panic!("expected Unwind, got {other:?}"),
        }
        assert!(matches!(&ctx.stages[1], Stage::Match(Predicate::Or(_))));
        match &ctx.stages[2] {
            Stage::Project(columns) => {
                let city = columns.iter().find(|(name, _)| name == "city").unwrap();
                assert_eq!(city.1.to_json(), json!("$addresses.city"));
                let idx = columns
                    .iter()
                    .find(|(name, _)| name == "array_index_lvl_0")
                    .unwrap();
                assert_eq!(idx.1.to_json(), json!("$array_index_lvl_0"));
            }
            other => panic!("expected a flattening Project, got {other:?}"),
        }
    }

    #[test]
    fn scan_base_table_never_gets_a_flatten_project() {
        let schema = sample_schema();
        let plan = LogicalPlan::Scan { table: "users".to_string() };
        let ctx = translate(&plan, &schema).unwrap();
        assert!(!ctx.stages.iter().any(|s| matches!(s, Stage::Project(_))));
    }

    #[test]
    fn wildcard_select_over_virtual_table_filters_before_flattening() {
        let schema = sample_schema();
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table: "_addresses".to_string() }),
            predicate: Predicate::Cmp {
                field: "city".to_string(),
                op: CmpOp::Eq,
                value: Literal::Str("ny".to_string()),
            },
        };
        let ctx = translate(&plan, &schema).unwrap();
        assert_eq!(ctx.stages.len(), 4);
        assert!(matches!(ctx.stages[0], Stage::Unwind { .. }));
        assert!(matches!(ctx.stages[1], Stage::Match(Predicate::Or(_))));
        assert!(matches!(ctx.stages[2], Stage::Match(Predicate::Cmp { .. })));
        assert!(matches!(ctx.stages[3], Stage::Project(_)));
    }

    #[test]
    fn simple_filter_lowers_to_single_match() {
        let schema = sample_schema();
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            predicate: Predicate::Cmp {
                field: "name".to_string(),
                op: CmpOp::Eq,
                value: Literal::Str("ada".to_string()),
            },
        };
        let ctx = translate(&plan, &schema).unwrap();
        assert_eq!(ctx.stages.len(), 1);
        assert!(matches!(&ctx.stages[0], Stage::Match(_)));
    }

    #[test]
    fn not_over_comparison_pushes_down_without_expression_mode() {
        let schema = sample_schema();
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            predicate: Predicate::Not(Box::new(Predicate::Cmp {
                field: "name".to_string(),
                op: CmpOp::Eq,
                value: Literal::Str("ada".to_string()),
            })),
        };
        let ctx = translate(&plan, &schema).unwrap();
        assert_eq!(ctx.stages.len(), 1);
        let json = ctx.to_wire();
        assert_eq!(json[0]["$match"]["name"]["$ne"], json!("ada"));
    }

    #[test]
    fn field_vs_field_comparison_forces_expression_mode() {
        let schema = sample_schema();
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            predicate: Predicate::ExprCmp {
                left: ValueExpr::Field("name".to_string()),
                op: CmpOp::Eq,
                right: ValueExpr::Field("__id".to_string()),
            },
        };
        let ctx = translate(&plan, &schema).unwrap();
        // AddFields(flag), Match(flag=true), Exclude(flag)
        assert_eq!(ctx.stages.len(), 3);
        assert!(matches!(ctx.stages[0], Stage::AddFields(_)));
        assert!(matches!(ctx.stages[1], Stage::Match(_)));
        assert!(matches!(ctx.stages[2], Stage::Exclude(_)));
    }

    #[test]
    fn inner_join_overrides_preserve_null_to_false() {
        let schema = sample_schema();
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            right: Box::new(LogicalPlan::Scan { table: "_addresses".to_string() }),
            kind: JoinKind::Inner,
            on: vec![("__id".to_string(), "__id".to_string())],
        };
        let ctx = translate(&plan, &schema).unwrap();
        let unwind = ctx
            .stages
            .iter()
            .find_map(|s| match s {
                Stage::Unwind { preserve_null, .. } => Some(*preserve_null),
                _ => None,
            })
            .unwrap();
        assert!(!unwind);
    }

    #[test]
    fn left_join_preserves_unmatched_rows() {
        let schema = sample_schema();
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            right: Box::new(LogicalPlan::Scan { table: "_addresses".to_string() }),
            kind: JoinKind::Left,
            on: vec![("__id".to_string(), "__id".to_string())],
        };
        let ctx = translate(&plan, &schema).unwrap();
        let unwind = ctx
            .stages
            .iter()
            .find_map(|s| match s {
                Stage::Unwind { preserve_null, .. } => Some(*preserve_null),
                _ => None,
            })
            .unwrap();
        assert!(unwind);
    }

    #[test]
    fn duplicated_equality_conjuncts_are_accepted() {
        let schema = sample_schema();
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            right: Box::new(LogicalPlan::Scan { table: "_addresses".to_string() }),
            kind: JoinKind::Inner,
            on: vec![
                ("__id".to_string(), "__id".to_string()),
                ("__id".to_string(), "__id".to_string()),
            ],
        };
        assert!(translate(&plan, &schema).is_ok());
    }

    #[test]
    fn join_missing_key_predicate_is_rejected() {
        let schema = sample_schema();
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            right: Box::new(LogicalPlan::Scan { table: "_addresses".to_string() }),
            kind: JoinKind::Inner,
            on: vec![],
        };
        assert!(matches!(
            translate(&plan, &schema),
            Err(TranslateError::IncompleteJoinKey { .. })
        ));
    }

    #[test]
    fn cross_join_is_always_rejected() {
        let schema = sample_schema();
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            right: Box::new(LogicalPlan::Scan { table: "_addresses".to_string() }),
            kind: JoinKind::Cross,
            on: vec![],
        };
        assert!(matches!(
            translate(&plan, &schema),
            Err(TranslateError::UnsupportedCrossJoin)
        ));
    }

    #[test]
    fn aggregate_lowers_to_group_stage_with_count_and_sum() {
        let schema = sample_schema();
        let plan = LogicalPlan::Aggregate {
            input: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            group_key: vec!["name".to_string()],
            aggregates: vec![Aggregate {
                output_name: "total".to_string(),
                func: AggFn::Count,
                field: None,
            }],
            having: None,
        };
        let ctx = translate(&plan, &schema).unwrap();
        assert!(matches!(ctx.stages.last(), Some(Stage::Group { .. })));
        assert_eq!(ctx.result_columns.len(), 2);
        assert_eq!(ctx.result_columns[1].sql_type, SqlType::Bigint);
    }

    #[test]
    fn sort_and_limit_append_their_stages() {
        let schema = sample_schema();
        let plan = LogicalPlan::Limit {
            input: Box::new(LogicalPlan::Sort {
                input: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
                keys: vec![("name".to_string(), crate::ast::SortDir::Asc)],
            }),
            n: 10,
        };
        let ctx = translate(&plan, &schema).unwrap();
        assert!(matches!(ctx.stages[0], Stage::Sort(_)));
        assert!(matches!(ctx.stages[1], Stage::Limit(10)));
    }

    #[test]
    fn not_in_expands_to_and_of_nin_with_null() {
        let schema = sample_schema();
        let plan = LogicalPlan::Filter {
            input: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            predicate: Predicate::NotIn {
                field: "name".to_string(),
                values: vec![Literal::Str("a".to_string()), Literal::Str("b".to_string())],
            },
        };
        let ctx = translate(&plan, &schema).unwrap();
        let json = ctx.to_wire();
        let conjuncts = json[0]["$match"]["$and"].as_array().unwrap();
        assert_eq!(conjuncts.len(), 2);
        assert_eq!(conjuncts[0]["name"]["$nin"][0], json!(null));
    }

    #[test]
    fn cross_collection_join_is_rejected() {
        let mut schema = sample_schema();
        schema.insert("orders".to_string(), SchemaTable::new("orders", "orders"));
        let plan = LogicalPlan::Join {
            left: Box::new(LogicalPlan::Scan { table: "users".to_string() }),
            right: Box::new(LogicalPlan::Scan { table: "orders".to_string() }),
            kind: JoinKind::Inner,
            on: vec![],
        };
        assert!(matches!(
            translate(&plan, &schema),
            Err(TranslateError::UnsupportedCrossCollectionJoin { .. })
        ));
    }
}
