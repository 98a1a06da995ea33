// SPDX-License-Identifier: Apache-2.0

//! SQL type closed set (§3.2) and the type promotion lattice (C2, §4.1.3).

use serde::{Deserialize, Serialize};

use crate::document::DocKind;

/// The closed set of SQL types a schema column can carry.
///
/// `Array` and `Document` are internal markers: §3.2 states a column never
/// keeps one of these two in the final schema — they exist only as
/// intermediate promotion results that the caller (the inference engine)
/// reacts to by spawning a virtual table instead of keeping the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Bigint,
    Boolean,
    Decimal,
    Double,
    Integer,
    Null,
    Timestamp,
    Varbinary,
    Varchar,
    Array,
    Document,
}

impl SqlType {
    /// The lowercase, underscore-separated spelling used in the schema
    /// persistence format (§6.2) for `sqlType`.
    pub fn wire_name(self) -> &'static str {
        match self {
            SqlType::Bigint => "bigint",
            SqlType::Boolean => "boolean",
            SqlType::Decimal => "decimal",
            SqlType::Double => "double",
            SqlType::Integer => "integer",
            SqlType::Null => "null",
            SqlType::Timestamp => "timestamp",
            SqlType::Varbinary => "varbinary",
            SqlType::Varchar => "varchar",
            SqlType::Array => "array",
            SqlType::Document => "document",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<SqlType> {
        Some(match name {
            "bigint" => SqlType::Bigint,
            "boolean" => SqlType::Boolean,
            "decimal" => SqlType::Decimal,
            "double" => SqlType::Double,
            "integer" => SqlType::Integer,
            "null" => SqlType::Null,
            "timestamp" => SqlType::Timestamp,
            "varbinary" => SqlType::Varbinary,
            "varchar" => SqlType::Varchar,
            "array" => SqlType::Array,
            "document" => SqlType::Document,
            _ => return None,
        })
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            SqlType::Integer | SqlType::Bigint | SqlType::Double | SqlType::Decimal
        )
    }

    /// The natural SQL type of a freshly observed scalar document kind, used
    /// as the `observed` side of `promote(NULL, observed)` the first time a
    /// column is seen.
    pub fn of_scalar_kind(kind: DocKind) -> SqlType {
        match kind {
            DocKind::Boolean => SqlType::Boolean,
            DocKind::Double => SqlType::Double,
            DocKind::Int32 => SqlType::Integer,
            DocKind::Int64 => SqlType::Bigint,
            DocKind::Decimal => SqlType::Decimal,
            DocKind::String | DocKind::ObjectId => SqlType::Varchar,
            DocKind::DateTime => SqlType::Timestamp,
            DocKind::Binary => SqlType::Varbinary,
            DocKind::Null | DocKind::MinKey | DocKind::MaxKey => SqlType::Null,
            // Legacy kinds promote as if VARCHAR (§4.1.3) starting from their
            // very first observation, per the resolved Open Question in
            // SPEC_FULL.md §9: all seven are treated identically.
            DocKind::LegacyDbPointer
            | DocKind::LegacyJavaScript
            | DocKind::LegacyJavaScriptWithScope
            | DocKind::LegacyRegularExpression
            | DocKind::LegacySymbol
            | DocKind::LegacyTimestamp
            | DocKind::LegacyUndefined => SqlType::Varchar,
            // Composite kinds never reach here: the inference engine branches
            // on DocKind::is_complex() before calling this function.
            DocKind::Document => SqlType::Document,
            DocKind::Array => SqlType::Array,
        }
    }
}

/// The scalar-scalar promotion lattice (§4.1.3). Pure, total, commutative,
/// and associative over `SqlType` (the 9x9 matrix enumerated in tests).
pub fn promote(current: SqlType, observed: SqlType) -> SqlType {
    use SqlType::*;

    if current == Null {
        return observed;
    }
    if observed == Null {
        return current;
    }
    if current == observed {
        return current;
    }

    // Canonicalize so the match below only has to handle one ordering.
    let (a, b) = if rank(current) <= rank(observed) {
        (current, observed)
    } else {
        (observed, current)
    };

    match (a, b) {
        // Numeric widening.
        (Integer, Bigint) => Bigint,
        (Integer, Double) => Double,
        (Integer, Decimal) => Decimal,
        (Bigint, Double) => Double,
        (Bigint, Decimal) => Decimal,
        (Double, Decimal) => Decimal,

        // Boolean combined with any numeric widens to that numeric. Every
        // numeric variant has a lower rank than Boolean, so after
        // canonicalization the numeric operand is always `a`.
        (other, Boolean) if other.is_numeric() => other,

        // Timestamp combined with any non-timestamp widens to VARCHAR.
        (Timestamp, _) => Varchar,
        (_, Timestamp) => Varchar,

        // Varbinary combined with any non-varbinary widens to VARCHAR.
        (Varbinary, _) => Varchar,
        (_, Varbinary) => Varchar,

        // Everything else (including Varchar with anything) widens to VARCHAR.
        _ => Varchar,
    }
}

/// Stable ordering used only to canonicalize operand order before matching;
/// it carries no semantic meaning about type width.
fn rank(t: SqlType) -> u8 {
    match t {
        SqlType::Integer => 0,
        SqlType::Bigint => 1,
        SqlType::Double => 2,
        SqlType::Decimal => 3,
        SqlType::Boolean => 4,
        SqlType::Timestamp => 5,
        SqlType::Varbinary => 6,
        SqlType::Varchar => 7,
        SqlType::Null => 8,
        SqlType::Array => 9,
        SqlType::Document => 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SqlType::*;

    const CONCRETE: [SqlType; 9] = [
        Bigint, Boolean, Decimal, Double, Integer, Timestamp, Varbinary, Varchar,
        // Null is included separately below as the identity element; Array/
        // Document never participate in scalar-scalar promotion.
        Null,
    ];

    #[test]
    fn null_is_identity() {
        for t in CONCRETE {
            assert_eq!(promote(Null, t), t);
            assert_eq!(promote(t, Null), t);
        }
    }

    #[test]
    fn idempotent() {
        for t in CONCRETE {
            assert_eq!(promote(t, t), t, "P2 violated for {t:?}");
        }
    }

    #[test]
    fn commutative_over_9x9_matrix() {
        for a in CONCRETE {
            for b in CONCRETE {
                assert_eq!(
                    promote(a, b),
                    promote(b, a),
                    "promotion not commutative for ({a:?}, {b:?})"
                );
            }
        }
    }

    #[test]
    fn associative_over_9x9_matrix() {
        for a in CONCRETE {
            for b in CONCRETE {
                for c in CONCRETE {
                    let left = promote(promote(a, b), c);
                    let right = promote(a, promote(b, c));
                    assert_eq!(
                        left, right,
                        "promotion not associative for ({a:?}, {b:?}, {c:?})"
                    );
                }
            }
        }
    }

    #[test]
    fn p1_commutativity_via_null_seed() {
        for a in CONCRETE {
            for b in CONCRETE {
                assert_eq!(
                    promote(promote(Null, a), b),
                    promote(promote(Null, b), a)
                );
            }
        }
    }

    fn arb_concrete() -> impl proptest::strategy::Strategy<Value = SqlType> {
        use proptest::prelude::*;
        prop_oneof![
            Just(Bigint),
            Just(Boolean),
            Just(Decimal),
            Just(Double),
            Just(Integer),
            Just(Null),
            Just(Timestamp),
            Just(Varbinary),
            Just(Varchar),
        ]
    }

    proptest::proptest! {
        #[test]
        fn prop_commutative(a in arb_concrete(), b in arb_concrete()) {
            proptest::prop_assert_eq!(promote(a, b), promote(b, a));
        }

        #[test]
        fn prop_associative(a in arb_concrete(), b in arb_concrete(), c in arb_concrete()) {
            proptest::prop_assert_eq!(promote(promote(a, b), c), promote(a, promote(b, c)));
        }

        #[test]
        fn prop_idempotent(a in arb_concrete()) {
            proptest::prop_assert_eq!(promote(a, a), a);
        }
    }

    #[test]
    fn numeric_widening_rules() {
        assert_eq!(promote(Integer, Bigint), Bigint);
        assert_eq!(promote(Integer, Double), Double);
        assert_eq!(promote(Integer, Decimal), Decimal);
        assert_eq!(promote(Bigint, Decimal), Decimal);
        assert_eq!(promote(Double, Decimal), Decimal);
        assert_eq!(promote(Integer, Double), Double);
        // mixed integer-and-floating widens to DOUBLE, not DECIMAL
        assert_eq!(promote(Bigint, Double), Double);
    }

    #[test]
    fn boolean_with_numeric_widens_to_numeric() {
        assert_eq!(promote(Boolean, Integer), Integer);
        assert_eq!(promote(Decimal, Boolean), Decimal);
    }

    #[test]
    fn timestamp_and_varbinary_collapse_to_varchar() {
        assert_eq!(promote(Timestamp, Integer), Varchar);
        assert_eq!(promote(Varchar, Timestamp), Varchar);
        assert_eq!(promote(Varbinary, Boolean), Varchar);
        assert_eq!(promote(Integer, Varbinary), Varchar);
    }

    #[test]
    fn legacy_kinds_force_varchar_from_first_observation() {
        assert_eq!(SqlType::of_scalar_kind(DocKind::LegacyTimestamp), Varchar);
        assert_eq!(SqlType::of_scalar_kind(DocKind::LegacySymbol), Varchar);
        assert_eq!(
            promote(
                SqlType::of_scalar_kind(DocKind::LegacyJavaScript),
                Integer
            ),
            Varchar
        );
    }

    #[test]
    fn wire_name_round_trips() {
        for t in [
            Bigint, Boolean, Decimal, Double, Integer, Null, Timestamp, Varbinary, Varchar, Array,
            Document,
        ] {
            assert_eq!(SqlType::from_wire_name(t.wire_name()), Some(t));
        }
    }
}
