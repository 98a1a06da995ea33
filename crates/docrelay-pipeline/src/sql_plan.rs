// SPDX-License-Identifier: Apache-2.0

//! A thin SQL-text-to-`LogicalPlan` bridge, restricted to a single-collection
//! `SELECT` grammar (scan / filter / project / same-collection join / group /
//! having / order / limit). `translate::translate` takes a `LogicalPlan` as
//! given (§4.2 contract); this module is the thing that actually produces
//! one from SQL text, standing in for the external planner the contract
//! assumes.
//!
//! Grounded on `src-tauri/src/federation/parser.rs`'s sqlparser AST-walking
//! style (`extract_table_refs`/`rewrite_expr`'s per-variant match arms),
//! generalized from "rewrite identifiers for DuckDB" to "fold the AST into a
//! `LogicalPlan`".

use sqlparser::ast::{
    BinaryOperator, Expr, GroupByExpr, Ident, Join as SqlJoin, JoinConstraint, JoinOperator,
    ObjectNamePart, OrderByKind, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins, UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::ast::{CmpOp, JoinKind, Literal, LogicalPlan, Predicate, SortDir, ValueExpr};
use crate::error::{TranslateError, TranslateResult};

/// Parses a single `SELECT` statement into a `LogicalPlan`.
pub fn parse_to_logical_plan(sql: &str) -> TranslateResult<LogicalPlan> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql.trim()).map_err(|e| {
        TranslateError::UnsupportedExpression {
            message: format!("failed to parse SQL: {e}"),
        }
    })?;

    if statements.len() != 1 {
        return Err(TranslateError::UnsupportedExpression {
            message: "exactly one SQL statement is supported".to_string(),
        });
    }

    let Statement::Query(query) = &statements[0] else {
        return Err(TranslateError::UnsupportedExpression {
            message: "only SELECT statements are supported".to_string(),
        });
    };

    build_query_plan(query)
}

fn build_query_plan(query: &Query) -> TranslateResult<LogicalPlan> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(TranslateError::UnsupportedExpression {
            message: "only a plain SELECT body is supported (no UNION/INTERSECT/EXCEPT)".to_string(),
        });
    };

    let mut plan = build_from_plan(select)?;

    if let Some(selection) = &select.selection {
        plan = LogicalPlan::Filter {
            input: Box::new(plan),
            predicate: expr_to_predicate(selection)?,
        };
    }

    plan = build_group_by_plan(plan, select)?;

    plan = build_projection_plan(plan, select)?;

    if let Some(order_by) = &query.order_by {
        let OrderByKind::Expressions(exprs) = &order_by.kind else {
            return Err(TranslateError::UnsupportedExpression {
                message: "ORDER BY ALL is not supported".to_string(),
            });
        };
        let mut keys = Vec::new();
        for item in exprs {
            let field = identifier_name(&item.expr)?;
            let dir = if item.options.asc == Some(false) {
                SortDir::Desc
            } else {
                SortDir::Asc
            };
            keys.push((field, dir));
        }
        plan = LogicalPlan::Sort { input: Box::new(plan), keys };
    }

    if let Some(limit_expr) = &query.limit_clause {
        if let sqlparser::ast::LimitClause::LimitOffset { limit: Some(expr), .. } = limit_expr {
            let n = literal_u64(expr)?;
            plan = LogicalPlan::Limit { input: Box::new(plan), n };
        }
    }

    Ok(plan)
}

fn build_from_plan(select: &Select) -> TranslateResult<LogicalPlan> {
    if select.from.len() != 1 {
        return Err(TranslateError::UnsupportedExpression {
            message: "exactly one FROM item is supported (no comma-joins)".to_string(),
        });
    }
    build_table_with_joins(&select.from[0])
}

fn build_table_with_joins(twj: &TableWithJoins) -> TranslateResult<LogicalPlan> {
    let mut plan = LogicalPlan::Scan {
        table: table_factor_name(&twj.relation)?,
    };
    for join in &twj.joins {
        plan = apply_join(plan, join)?;
    }
    Ok(plan)
}

fn apply_join(left: LogicalPlan, join: &SqlJoin) -> TranslateResult<LogicalPlan> {
    let right_table = table_factor_name(&join.relation)?;
    let (kind, constraint) = match &join.join_operator {
        JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
        JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
        JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
        JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
        JoinOperator::CrossJoin => (JoinKind::Cross, None),
        _ => {
            return Err(TranslateError::UnsupportedExpression {
                message: "unsupported JOIN operator".to_string(),
            })
        }
    };

    let on = match constraint {
        Some(JoinConstraint::On(expr)) => equality_pairs(expr)?,
        Some(JoinConstraint::Using(_)) | None => Vec::new(),
        Some(JoinConstraint::Natural) => {
            return Err(TranslateError::UnsupportedExpression {
                message: "NATURAL JOIN is not supported".to_string(),
            })
        }
        Some(JoinConstraint::None) => Vec::new(),
    };

    Ok(LogicalPlan::Join {
        left: Box::new(left),
        right: Box::new(LogicalPlan::Scan { table: right_table }),
        kind,
        on,
    })
}

/// Flattens `a = b AND c = d ...` into field-name equality pairs (§4.2.6's
/// join predicate must be a conjunction of equalities).
fn equality_pairs(expr: &Expr) -> TranslateResult<Vec<(String, String)>> {
    match expr {
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            let mut pairs = equality_pairs(left)?;
            pairs.extend(equality_pairs(right)?);
            Ok(pairs)
        }
        Expr::BinaryOp { left, op: BinaryOperator::Eq, right } => {
            Ok(vec![(identifier_name(left)?, identifier_name(right)?)])
        }
        _ => Err(TranslateError::UnsupportedExpression {
            message: "join ON clause must be a conjunction of column equalities".to_string(),
        }),
    }
}

fn table_factor_name(tf: &TableFactor) -> TranslateResult<String> {
    match tf {
        TableFactor::Table { name, .. } => Ok(object_name_string(&name.0)),
        _ => Err(TranslateError::UnsupportedExpression {
            message: "only bare table references are supported in FROM".to_string(),
        }),
    }
}

fn object_name_string(parts: &[ObjectNamePart]) -> String {
    parts
        .iter()
        .map(|p| match p {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            _ => String::new(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn build_group_by_plan(input: LogicalPlan, select: &Select) -> TranslateResult<LogicalPlan> {
    let group_key = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) if !exprs.is_empty() => exprs
            .iter()
            .map(identifier_name)
            .collect::<TranslateResult<Vec<_>>>()?,
        _ => Vec::new(),
    };

    let aggregates = collect_aggregates(select)?;

    if group_key.is_empty() && aggregates.is_empty() {
        return Ok(input);
    }

    let having = select
        .having
        .as_ref()
        .map(expr_to_predicate)
        .transpose()?;

    Ok(LogicalPlan::Aggregate {
        input: Box::new(input),
        group_key,
        aggregates,
        having,
    })
}

fn collect_aggregates(select: &Select) -> TranslateResult<Vec<crate::ast::Aggregate>> {
    let mut aggregates = Vec::new();
    for item in &select.projection {
        let (expr, alias) = match item {
            SelectItem::UnnamedExpr(e) => (e, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
            _ => continue,
        };
        if let Expr::Function(func) = expr {
            if let Some(agg) = function_to_aggregate(func, alias)? {
                aggregates.push(agg);
            }
        }
    }
    Ok(aggregates)
}

fn function_to_aggregate(
    func: &sqlparser::ast::Function,
    alias: Option<String>,
) -> TranslateResult<Option<crate::ast::Aggregate>> {
    let name = object_name_string(&func.name.0).to_uppercase();
    let agg_fn = match name.as_str() {
        "SUM" => crate::ast::AggFn::Sum,
        "COUNT" => crate::ast::AggFn::Count,
        "MIN" => crate::ast::AggFn::Min,
        "MAX" => crate::ast::AggFn::Max,
        "AVG" => crate::ast::AggFn::Avg,
        _ => return Ok(None),
    };

    let field = match &func.args {
        sqlparser::ast::FunctionArguments::List(list) if list.args.len() == 1 => {
            match &list.args[0] {
                sqlparser::ast::FunctionArg::Unnamed(sqlparser::ast::FunctionArgExpr::Expr(e)) => {
                    Some(identifier_name(e)?)
                }
                sqlparser::ast::FunctionArg::Unnamed(sqlparser::ast::FunctionArgExpr::Wildcard) => None,
                _ => {
                    return Err(TranslateError::UnsupportedExpression {
                        message: "unsupported aggregate argument form".to_string(),
                    })
                }
            }
        }
        _ => None,
    };

    let output_name = alias.unwrap_or_else(|| format!("{}", name.to_lowercase()));
    Ok(Some(crate::ast::Aggregate { output_name, func: agg_fn, field }))
}

fn build_projection_plan(input: LogicalPlan, select: &Select) -> TranslateResult<LogicalPlan> {
    // A bare `SELECT *` with no other clauses needs no Project stage.
    if select.projection.len() == 1 && matches!(select.projection[0], SelectItem::Wildcard(_)) {
        return Ok(input);
    }

    let mut columns = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => continue,
            SelectItem::UnnamedExpr(e) => {
                // Aggregate projections are already folded into the Group
                // stage by `collect_aggregates`; skip them here.
                if matches!(e, Expr::Function(_)) {
                    continue;
                }
                let name = identifier_name(e)?;
                columns.push((name.clone(), ValueExpr::Field(name)));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                if matches!(expr, Expr::Function(_)) {
                    continue;
                }
                columns.push((alias.value.clone(), expr_to_value_expr(expr)?));
            }
            SelectItem::QualifiedWildcard(..) => {
                return Err(TranslateError::UnsupportedExpression {
                    message: "qualified wildcard projections are not supported".to_string(),
                })
            }
        }
    }

    if columns.is_empty() {
        return Ok(input);
    }

    Ok(LogicalPlan::Project { input: Box::new(input), columns })
}

fn identifier_name(expr: &Expr) -> TranslateResult<String> {
    match expr {
        Expr::Identifier(Ident { value, .. }) => Ok(value.clone()),
        Expr::CompoundIdentifier(parts) => {
            Ok(parts.last().map(|p| p.value.clone()).unwrap_or_default())
        }
        _ => Err(TranslateError::UnsupportedExpression {
            message: format!("expected a column reference, got {expr}"),
        }),
    }
}

fn literal_u64(expr: &Expr) -> TranslateResult<u64> {
    match expr {
        Expr::Value(ValueWithSpan { value: Value::Number(n, _), .. }) => n
            .parse::<u64>()
            .map_err(|_| TranslateError::UnsupportedExpression {
                message: format!("expected an integer literal, got {n}"),
            }),
        _ => Err(TranslateError::UnsupportedExpression {
            message: "LIMIT must be an integer literal".to_string(),
        }),
    }
}

fn expr_to_literal(expr: &Expr) -> TranslateResult<Literal> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Ok(match value {
            Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Literal::Int(i)
                } else {
                    Literal::Float(n.parse::<f64>().map_err(|_| {
                        TranslateError::UnsupportedExpression {
                            message: format!("malformed numeric literal: {n}"),
                        }
                    })?)
                }
            }
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Literal::Str(s.clone()),
            Value::Boolean(b) => Literal::Bool(*b),
            Value::Null => Literal::Null,
            other => {
                return Err(TranslateError::UnsupportedExpression {
                    message: format!("unsupported literal: {other}"),
                })
            }
        }),
        Expr::UnaryOp { op: UnaryOperator::Minus, expr } => match expr_to_literal(expr)? {
            Literal::Int(i) => Ok(Literal::Int(-i)),
            Literal::Float(f) => Ok(Literal::Float(-f)),
            other => Ok(other),
        },
        _ => Err(TranslateError::UnsupportedExpression {
            message: format!("expected a literal value, got {expr}"),
        }),
    }
}

fn binary_cmp_op(op: &BinaryOperator) -> Option<CmpOp> {
    Some(match op {
        BinaryOperator::Eq => CmpOp::Eq,
        BinaryOperator::NotEq => CmpOp::Ne,
        BinaryOperator::Gt => CmpOp::Gt,
        BinaryOperator::GtEq => CmpOp::Gte,
        BinaryOperator::Lt => CmpOp::Lt,
        BinaryOperator::LtEq => CmpOp::Lte,
        _ => return None,
    })
}

/// Converts a `WHERE`/`HAVING`/`ON` boolean expression into a `Predicate`
/// (§4.2.1). Anything that isn't directly a boolean connective, a simple
/// comparison, `IS [NOT] NULL`, or `IN`/`NOT IN` becomes an `ExprCmp`/
/// arithmetic leaf, which `translate::lower_filter` lowers in expression
/// mode (§4.2.3) rather than failing outright.
fn expr_to_predicate(expr: &Expr) -> TranslateResult<Predicate> {
    Ok(match expr {
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            Predicate::And(vec![expr_to_predicate(left)?, expr_to_predicate(right)?])
        }
        Expr::BinaryOp { left, op: BinaryOperator::Or, right } => {
            Predicate::Or(vec![expr_to_predicate(left)?, expr_to_predicate(right)?])
        }
        Expr::UnaryOp { op: UnaryOperator::Not, expr } => Predicate::Not(Box::new(expr_to_predicate(expr)?)),
        Expr::IsNull(inner) => Predicate::IsNull { field: identifier_name(inner)? },
        Expr::IsNotNull(inner) => Predicate::IsNotNull { field: identifier_name(inner)? },
        Expr::InList { expr, list, negated } => {
            let field = identifier_name(expr)?;
            let values = list.iter().map(expr_to_literal).collect::<TranslateResult<Vec<_>>>()?;
            if *negated {
                Predicate::NotIn { field, values }
            } else {
                Predicate::In { field, values }
            }
        }
        Expr::BinaryOp { left, op, right } => {
            if let Some(cmp) = binary_cmp_op(op) {
                match (identifier_name(left), expr_to_literal(right)) {
                    (Ok(field), Ok(value)) => Predicate::Cmp { field, op: cmp, value },
                    _ => Predicate::ExprCmp {
                        left: expr_to_value_expr(left)?,
                        op: cmp,
                        right: expr_to_value_expr(right)?,
                    },
                }
            } else {
                return Err(TranslateError::UnsupportedExpression {
                    message: format!("unsupported boolean operator in {expr}"),
                });
            }
        }
        Expr::Nested(inner) => expr_to_predicate(inner)?,
        _ => {
            return Err(TranslateError::UnsupportedExpression {
                message: format!("unsupported WHERE/HAVING expression: {expr}"),
            })
        }
    })
}

/// Converts an arithmetic/value expression (projection, or either side of an
/// `ExprCmp`) into a `ValueExpr` (§4.2.5).
fn expr_to_value_expr(expr: &Expr) -> TranslateResult<ValueExpr> {
    Ok(match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => ValueExpr::Field(identifier_name(expr)?),
        Expr::Value(_) => ValueExpr::Literal(expr_to_literal(expr)?),
        Expr::Nested(inner) => expr_to_value_expr(inner)?,
        Expr::BinaryOp { left, op, right } => {
            let l = Box::new(expr_to_value_expr(left)?);
            let r = Box::new(expr_to_value_expr(right)?);
            match op {
                BinaryOperator::Plus => ValueExpr::Add(l, r),
                BinaryOperator::Minus => ValueExpr::Sub(l, r),
                BinaryOperator::Multiply => ValueExpr::Mul(l, r),
                BinaryOperator::Divide => ValueExpr::Div(l, r),
                BinaryOperator::Modulo => ValueExpr::Mod(l, r),
                BinaryOperator::And => ValueExpr::And(vec![*l, *r]),
                BinaryOperator::Or => ValueExpr::Or(vec![*l, *r]),
                other => {
                    if let Some(cmp) = binary_cmp_op(other) {
                        ValueExpr::Cmp(l, cmp, r)
                    } else {
                        return Err(TranslateError::UnsupportedExpression {
                            message: format!("unsupported operator in {expr}"),
                        });
                    }
                }
            }
        }
        Expr::UnaryOp { op: UnaryOperator::Minus, expr: inner } => {
            ValueExpr::Sub(Box::new(ValueExpr::Literal(Literal::Int(0))), Box::new(expr_to_value_expr(inner)?))
        }
        _ => {
            return Err(TranslateError::UnsupportedExpression {
                message: format!("unsupported projection expression: {expr}"),
            })
        }
    })
}
