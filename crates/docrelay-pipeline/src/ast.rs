// SPDX-License-Identifier: Apache-2.0

//! Pipeline AST (C6, §4.2.1) and the logical plan the translator consumes.
//!
//! Both are tagged variants, not inheritance hierarchies (§9 Design Notes):
//! a pipeline is an ordered `Vec<Stage>`, predicates and value expressions
//! are separate trees (predicates never carry arithmetic; arithmetic never
//! carries boolean connectives), matching the split in §4.2.1 between the
//! "simple match form" and the "aggregate-operator tree".

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

/// A join kind between a base table and a same-collection virtual table
/// (§4.2.6). `Cross` is never lowered — it always fails translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

/// Comparison operators usable in simple-mode predicates (§4.2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    /// The operator's DeMorgan dual, used to push a `NOT` to a comparison
    /// leaf (§4.2.4) without entering expression mode.
    pub fn negate(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Gt => CmpOp::Lte,
            CmpOp::Gte => CmpOp::Lt,
            CmpOp::Lt => CmpOp::Gte,
            CmpOp::Lte => CmpOp::Gt,
        }
    }

    fn mongo_op(self) -> &'static str {
        match self {
            CmpOp::Eq => "$eq",
            CmpOp::Ne => "$ne",
            CmpOp::Gt => "$gt",
            CmpOp::Gte => "$gte",
            CmpOp::Lt => "$lt",
            CmpOp::Lte => "$lte",
        }
    }
}

/// A scalar literal appearing in a predicate or value expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    fn to_json(&self) -> Json {
        match self {
            Literal::Null => Json::Null,
            Literal::Bool(b) => json!(b),
            Literal::Int(i) => json!(i),
            Literal::Float(f) => json!(f),
            Literal::Str(s) => json!(s),
        }
    }
}

/// Predicate tree (§4.2.1). Carries no arithmetic — expressions that need
/// arithmetic or field-vs-field comparison go through expression mode
/// (§4.2.3) instead, represented by `ValueExpr`.
#[derive(Debug, Clone)]
pub enum Predicate {
    Cmp { field: String, op: CmpOp, value: Literal },
    In { field: String, values: Vec<Literal> },
    NotIn { field: String, values: Vec<Literal> },
    IsNull { field: String },
    IsNotNull { field: String },
    Exists { field: String, exists: bool },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// A comparison whose operands cannot be expressed as field-vs-literal
    /// (field-vs-field, or either side is arithmetic) — forces expression
    /// mode (§4.2.3).
    ExprCmp { left: ValueExpr, op: CmpOp, right: ValueExpr },
}

impl Predicate {
    /// True if every leaf in this predicate is a simple field-vs-literal
    /// comparison, `IS [NOT] NULL`, or a membership test (§4.2.3 simple
    /// mode). `ExprCmp` leaves always force expression mode.
    pub fn is_simple(&self) -> bool {
        match self {
            Predicate::Cmp { .. }
            | Predicate::In { .. }
            | Predicate::NotIn { .. }
            | Predicate::IsNull { .. }
            | Predicate::IsNotNull { .. }
            | Predicate::Exists { .. } => true,
            Predicate::And(ps) | Predicate::Or(ps) => ps.iter().all(Predicate::is_simple),
            Predicate::Not(p) => p.is_simple(),
            Predicate::ExprCmp { .. } => false,
        }
    }

    /// Pushes `NOT` down to leaves via DeMorgan, as long as every leaf has a
    /// direct dual operator (§4.2.4). Returns `None` when some leaf (e.g. an
    /// `ExprCmp`) has no direct dual, signaling the caller to fall back to
    /// expression mode for the whole subtree.
    pub fn push_not(&self) -> Option<Predicate> {
        match self {
            Predicate::Not(inner) => negate(inner),
            Predicate::And(ps) => {
                let pushed: Option<Vec<_>> = ps.iter().map(Predicate::push_not).collect();
                Some(Predicate::And(pushed?))
            }
            Predicate::Or(ps) => {
                let pushed: Option<Vec<_>> = ps.iter().map(Predicate::push_not).collect();
                Some(Predicate::Or(pushed?))
            }
            other => Some(other.clone()),
        }
    }

    /// Renders a simple-mode predicate to its native operator JSON
    /// (`$eq`, `$gt`, …, `$and`, `$or`). Callers must check `is_simple()`
    /// first; this panics on an `ExprCmp` leaf.
    pub fn to_match_json(&self) -> Json {
        match self {
            Predicate::Cmp { field, op, value } => {
                json!({ field: { op.mongo_op(): value.to_json() } })
            }
            Predicate::In { field, values } => {
                json!({ field: { "$in": values.iter().map(Literal::to_json).collect::<Vec<_>>() } })
            }
            Predicate::NotIn { field, values } => {
                // §4.2.3: NOT IN (a,b) -> $and of $nin:[null,a], $nin:[null,b]
                // so a missing field isn't accidentally matched.
                let arms: Vec<Json> = values
                    .iter()
                    .map(|v| json!({ field: { "$nin": [Json::Null, v.to_json()] } }))
                    .collect();
                json!({ "$and": arms })
            }
            Predicate::IsNull { field } => json!({ field: { "$eq": Json::Null } }),
            Predicate::IsNotNull { field } => json!({ field: { "$ne": Json::Null } }),
            Predicate::Exists { field, exists } => json!({ field: { "$exists": exists } }),
            Predicate::And(ps) => json!({ "$and": ps.iter().map(Predicate::to_match_json).collect::<Vec<_>>() }),
            Predicate::Or(ps) => json!({ "$or": ps.iter().map(Predicate::to_match_json).collect::<Vec<_>>() }),
            Predicate::Not(_) | Predicate::ExprCmp { .. } => {
                unreachable!("to_match_json called on a non-simple predicate")
            }
        }
    }
}

fn negate(p: &Predicate) -> Option<Predicate> {
    match p {
        Predicate::Cmp { field, op, value } => Some(Predicate::Cmp {
            field: field.clone(),
            op: op.negate(),
            value: value.clone(),
        }),
        Predicate::IsNull { field } => Some(Predicate::IsNotNull { field: field.clone() }),
        Predicate::IsNotNull { field } => Some(Predicate::IsNull { field: field.clone() }),
        Predicate::Exists { field, exists } => Some(Predicate::Exists {
            field: field.clone(),
            exists: !exists,
        }),
        Predicate::In { field, values } => Some(Predicate::NotIn {
            field: field.clone(),
            values: values.clone(),
        }),
        Predicate::NotIn { field, values } => Some(Predicate::In {
            field: field.clone(),
            values: values.clone(),
        }),
        Predicate::And(ps) => {
            let negated: Option<Vec<_>> = ps.iter().map(negate).collect();
            Some(Predicate::Or(negated?))
        }
        Predicate::Or(ps) => {
            let negated: Option<Vec<_>> = ps.iter().map(negate).collect();
            Some(Predicate::And(negated?))
        }
        Predicate::Not(inner) => Some((**inner).clone()),
        Predicate::ExprCmp { .. } => None,
    }
}

/// Arithmetic / conditional expression tree used by expression-mode filters
/// (§4.2.3) and computed projections (§4.2.5).
#[derive(Debug, Clone)]
pub enum ValueExpr {
    Field(String),
    Literal(Literal),
    Add(Box<ValueExpr>, Box<ValueExpr>),
    Sub(Box<ValueExpr>, Box<ValueExpr>),
    Mul(Box<ValueExpr>, Box<ValueExpr>),
    Div(Box<ValueExpr>, Box<ValueExpr>),
    Mod(Box<ValueExpr>, Box<ValueExpr>),
    Cmp(Box<ValueExpr>, CmpOp, Box<ValueExpr>),
    And(Vec<ValueExpr>),
    Or(Vec<ValueExpr>),
    /// `Cond(if, then, else)` — the store's `$cond`.
    Cond(Box<ValueExpr>, Box<ValueExpr>, Box<ValueExpr>),
}

impl ValueExpr {
    /// Every field operand that must be non-null for this expression to
    /// evaluate, used to build the null-guard conjunction (§4.2.3).
    pub fn operand_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            ValueExpr::Field(f) => out.push(f.clone()),
            ValueExpr::Literal(_) => {}
            ValueExpr::Add(a, b)
            | ValueExpr::Sub(a, b)
            | ValueExpr::Mul(a, b)
            | ValueExpr::Div(a, b)
            | ValueExpr::Mod(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
            ValueExpr::Cmp(a, _, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
            ValueExpr::And(xs) | ValueExpr::Or(xs) => xs.iter().for_each(|x| x.collect_fields(out)),
            ValueExpr::Cond(c, t, e) => {
                c.collect_fields(out);
                t.collect_fields(out);
                e.collect_fields(out);
            }
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            ValueExpr::Field(f) => json!(format!("${f}")),
            ValueExpr::Literal(l) => json!({ "$literal": l.to_json() }),
            ValueExpr::Add(a, b) => json!({ "$add": [a.to_json(), b.to_json()] }),
            ValueExpr::Sub(a, b) => json!({ "$subtract": [a.to_json(), b.to_json()] }),
            ValueExpr::Mul(a, b) => json!({ "$multiply": [a.to_json(), b.to_json()] }),
            ValueExpr::Div(a, b) => json!({ "$divide": [a.to_json(), b.to_json()] }),
            ValueExpr::Mod(a, b) => json!({ "$mod": [a.to_json(), b.to_json()] }),
            ValueExpr::Cmp(a, op, b) => json!({ op.mongo_op(): [a.to_json(), b.to_json()] }),
            ValueExpr::And(xs) => json!({ "$and": xs.iter().map(ValueExpr::to_json).collect::<Vec<_>>() }),
            ValueExpr::Or(xs) => json!({ "$or": xs.iter().map(ValueExpr::to_json).collect::<Vec<_>>() }),
            ValueExpr::Cond(c, t, e) => json!({ "$cond": [c.to_json(), t.to_json(), e.to_json()] }),
        }
    }

    /// Wraps every named field operand with a non-null guard, per §4.2.3:
    /// "the conditional expression must guard every operand".
    pub fn guarded(self) -> ValueExpr {
        let fields = self.operand_fields();
        if fields.is_empty() {
            return self;
        }
        let mut guards: Vec<ValueExpr> = fields
            .into_iter()
            .map(|f| {
                ValueExpr::Cmp(
                    Box::new(ValueExpr::Field(f)),
                    CmpOp::Ne,
                    Box::new(ValueExpr::Literal(Literal::Null)),
                )
            })
            .collect();
        guards.push(self);
        ValueExpr::And(guards)
    }
}

/// Aggregate function applied to one output column (§4.2.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    Sum,
    Count,
    Min,
    Max,
    Avg,
}

impl AggFn {
    fn mongo_op(self) -> &'static str {
        match self {
            AggFn::Sum => "$sum",
            AggFn::Count => "$sum",
            AggFn::Min => "$min",
            AggFn::Max => "$max",
            AggFn::Avg => "$avg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub output_name: String,
    pub func: AggFn,
    /// `None` for `COUNT(*)`, which sums the literal `1`.
    pub field: Option<String>,
}

/// One stage in the lowered pipeline (§4.2.1).
#[derive(Debug, Clone)]
pub enum Stage {
    Match(Predicate),
    Unwind {
        path: String,
        preserve_null: bool,
        index_as: String,
    },
    Project(Vec<(String, ValueExpr)>),
    AddFields(Vec<(String, ValueExpr)>),
    /// An exclusion-only `$project` that drops the named fields and keeps
    /// everything else — used to remove the scratch flag a filter lowered
    /// into expression mode adds (§4.2.3).
    Exclude(Vec<String>),
    Group {
        group_key: Vec<(String, ValueExpr)>,
        aggregates: Vec<Aggregate>,
    },
    Sort(Vec<(String, SortDir)>),
    Limit(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl Stage {
    /// Renders this stage to the wire format (§6.4): a JSON object whose
    /// single field name is exactly the store's operator (`$match`,
    /// `$unwind`, …).
    pub fn to_json(&self) -> Json {
        match self {
            Stage::Match(pred) => json!({ "$match": pred.to_match_json() }),
            Stage::Unwind { path, preserve_null, index_as } => json!({
                "$unwind": {
                    "path": format!("${path}"),
                    "preserveNullAndEmptyArrays": preserve_null,
                    "includeArrayIndex": index_as,
                }
            }),
            Stage::Project(map) => {
                let mut obj = serde_json::Map::new();
                obj.insert("_id".to_string(), json!(0));
                for (name, expr) in map {
                    obj.insert(name.clone(), expr.to_json());
                }
                json!({ "$project": obj })
            }
            Stage::AddFields(map) => {
                let mut obj = serde_json::Map::new();
                for (name, expr) in map {
                    obj.insert(name.clone(), expr.to_json());
                }
                json!({ "$addFields": obj })
            }
            Stage::Exclude(fields) => {
                let mut obj = serde_json::Map::new();
                for name in fields {
                    obj.insert(name.clone(), json!(0));
                }
                json!({ "$project": obj })
            }
            Stage::Group { group_key, aggregates } => {
                let mut id_obj = serde_json::Map::new();
                for (name, expr) in group_key {
                    id_obj.insert(name.clone(), expr.to_json());
                }
                let mut group_obj = serde_json::Map::new();
                group_obj.insert("_id".to_string(), Json::Object(id_obj));
                for agg in aggregates {
                    let operand = match (&agg.field, agg.func) {
                        (None, AggFn::Count) => json!(1),
                        (Some(f), _) => json!(format!("${f}")),
                        (None, _) => json!(1),
                    };
                    group_obj.insert(agg.output_name.clone(), json!({ agg.func.mongo_op(): operand }));
                }
                json!({ "$group": group_obj })
            }
            Stage::Sort(keys) => {
                let mut obj = serde_json::Map::new();
                for (name, dir) in keys {
                    obj.insert(name.clone(), json!(if *dir == SortDir::Asc { 1 } else { -1 }));
                }
                json!({ "$sort": obj })
            }
            Stage::Limit(n) => json!({ "$limit": n }),
        }
    }
}

/// `translate`'s output (§4.2 contract): the target collection, the
/// ordered stage list, and the result column metadata (§4.2.8).
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub collection_name: String,
    pub stages: Vec<Stage>,
    pub result_columns: Vec<ResultColumn>,
}

impl PipelineContext {
    /// The pipeline as the ordered JSON array the document store's
    /// aggregation call expects (§6.4).
    pub fn to_wire(&self) -> Json {
        Json::Array(self.stages.iter().map(Stage::to_json).collect())
    }
}

#[derive(Debug, Clone)]
pub struct ResultColumn {
    pub sql_name: String,
    pub sql_type: docrelay_core::sql_type::SqlType,
    pub nullable: bool,
    pub table_name: String,
}

/// Logical plan node — the assumed external planner's output (§4.2
/// contract takes `logical_plan` as a given; this crate supplies the node
/// shape a planner would target and a thin SQL-text bridge in `sql_plan`).
#[derive(Debug, Clone)]
pub enum LogicalPlan {
    Scan { table: String },
    Filter { input: Box<LogicalPlan>, predicate: Predicate },
    Project { input: Box<LogicalPlan>, columns: Vec<(String, ValueExpr)> },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        kind: JoinKind,
        on: Vec<(String, String)>,
    },
    Aggregate {
        input: Box<LogicalPlan>,
        group_key: Vec<String>,
        aggregates: Vec<Aggregate>,
        having: Option<Predicate>,
    },
    Sort { input: Box<LogicalPlan>, keys: Vec<(String, SortDir)> },
    Limit { input: Box<LogicalPlan>, n: u64 },
}
