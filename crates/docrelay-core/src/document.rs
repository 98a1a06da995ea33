// SPDX-License-Identifier: Apache-2.0

//! Document value model (C1).
//!
//! A document value is represented directly by `bson::Bson` — the same
//! tagged-variant type `mongodb`'s driver produces and consumes — rather
//! than a hand-rolled reimplementation of BSON's case analysis. `DocKind`
//! narrows that down to the closed set of kinds the schema inference engine
//! reasons about: the twelve concrete scalar/composite kinds from §3.1 plus
//! the seven legacy kinds that exist only to force a column to `VARCHAR`.

use bson::Bson;
use serde::{Deserialize, Serialize};

/// The document-value kinds the inference engine distinguishes.
///
/// `Document` and `Array` are composites; every other variant is a scalar.
/// The seven `Legacy*` kinds are never assigned their own SQL type — they
/// are recognized solely so that the promotion lattice (C2) can widen a
/// column to `VARCHAR` when one is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocKind {
    Binary,
    Boolean,
    Double,
    Int32,
    Int64,
    Decimal,
    String,
    ObjectId,
    DateTime,
    Null,
    MinKey,
    MaxKey,
    Document,
    Array,
    // Legacy kinds — promotion-only, see §4.1.3.
    LegacyDbPointer,
    LegacyJavaScript,
    LegacyJavaScriptWithScope,
    LegacyRegularExpression,
    LegacySymbol,
    LegacyTimestamp,
    LegacyUndefined,
}

impl DocKind {
    /// Classifies a `Bson` value into its document kind.
    pub fn from_bson(value: &Bson) -> DocKind {
        match value {
            Bson::Double(_) => DocKind::Double,
            Bson::String(_) => DocKind::String,
            Bson::Array(_) => DocKind::Array,
            Bson::Document(_) => DocKind::Document,
            Bson::Boolean(_) => DocKind::Boolean,
            Bson::Null => DocKind::Null,
            Bson::RegularExpression(_) => DocKind::LegacyRegularExpression,
            Bson::JavaScriptCode(_) => DocKind::LegacyJavaScript,
            Bson::JavaScriptCodeWithScope(_) => DocKind::LegacyJavaScriptWithScope,
            Bson::Int32(_) => DocKind::Int32,
            Bson::Int64(_) => DocKind::Int64,
            Bson::Timestamp(_) => DocKind::LegacyTimestamp,
            Bson::Binary(_) => DocKind::Binary,
            Bson::ObjectId(_) => DocKind::ObjectId,
            Bson::DateTime(_) => DocKind::DateTime,
            Bson::Symbol(_) => DocKind::LegacySymbol,
            Bson::Decimal128(_) => DocKind::Decimal,
            Bson::Undefined => DocKind::LegacyUndefined,
            Bson::MaxKey => DocKind::MaxKey,
            Bson::MinKey => DocKind::MinKey,
            Bson::DbPointer(_) => DocKind::LegacyDbPointer,
        }
    }

    /// True for the composite kinds (`Document`, `Array`).
    pub fn is_complex(self) -> bool {
        matches!(self, DocKind::Document | DocKind::Array)
    }

    /// The lowercase, underscore-separated spelling used in the schema
    /// persistence format (§6.2) for `dbType`.
    pub fn wire_name(self) -> &'static str {
        match self {
            DocKind::Binary => "binary",
            DocKind::Boolean => "boolean",
            DocKind::Double => "double",
            DocKind::Int32 => "int32",
            DocKind::Int64 => "int64",
            DocKind::Decimal => "decimal",
            DocKind::String => "string",
            DocKind::ObjectId => "object_id",
            DocKind::DateTime => "date_time",
            DocKind::Null => "null",
            DocKind::MinKey => "min_key",
            DocKind::MaxKey => "max_key",
            DocKind::Document => "document",
            DocKind::Array => "array",
            DocKind::LegacyDbPointer => "db_pointer",
            DocKind::LegacyJavaScript => "javascript",
            DocKind::LegacyJavaScriptWithScope => "javascript_with_scope",
            DocKind::LegacyRegularExpression => "regular_expression",
            DocKind::LegacySymbol => "symbol",
            DocKind::LegacyTimestamp => "timestamp",
            DocKind::LegacyUndefined => "undefined",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<DocKind> {
        Some(match name {
            "binary" => DocKind::Binary,
            "boolean" => DocKind::Boolean,
            "double" => DocKind::Double,
            "int32" => DocKind::Int32,
            "int64" => DocKind::Int64,
            "decimal" => DocKind::Decimal,
            "string" => DocKind::String,
            "object_id" => DocKind::ObjectId,
            "date_time" => DocKind::DateTime,
            "null" => DocKind::Null,
            "min_key" => DocKind::MinKey,
            "max_key" => DocKind::MaxKey,
            "document" => DocKind::Document,
            "array" => DocKind::Array,
            "db_pointer" => DocKind::LegacyDbPointer,
            "javascript" => DocKind::LegacyJavaScript,
            "javascript_with_scope" => DocKind::LegacyJavaScriptWithScope,
            "regular_expression" => DocKind::LegacyRegularExpression,
            "symbol" => DocKind::LegacySymbol,
            "timestamp" => DocKind::LegacyTimestamp,
            "undefined" => DocKind::LegacyUndefined,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn classifies_scalars() {
        assert_eq!(DocKind::from_bson(&Bson::Int32(1)), DocKind::Int32);
        assert_eq!(DocKind::from_bson(&Bson::String("x".into())), DocKind::String);
        assert_eq!(DocKind::from_bson(&Bson::Null), DocKind::Null);
        assert_eq!(DocKind::from_bson(&bson!(true)), DocKind::Boolean);
    }

    #[test]
    fn classifies_composites() {
        assert_eq!(DocKind::from_bson(&Bson::Array(vec![])), DocKind::Array);
        assert_eq!(DocKind::from_bson(&Bson::Document(doc! {})), DocKind::Document);
        assert!(DocKind::Array.is_complex());
        assert!(DocKind::Document.is_complex());
        assert!(!DocKind::Int32.is_complex());
    }

    #[test]
    fn wire_name_round_trips() {
        for kind in [
            DocKind::Binary,
            DocKind::Boolean,
            DocKind::Double,
            DocKind::Int32,
            DocKind::Int64,
            DocKind::Decimal,
            DocKind::String,
            DocKind::ObjectId,
            DocKind::DateTime,
            DocKind::Null,
            DocKind::MinKey,
            DocKind::MaxKey,
            DocKind::Document,
            DocKind::Array,
            DocKind::LegacyDbPointer,
            DocKind::LegacyJavaScript,
            DocKind::LegacyJavaScriptWithScope,
            DocKind::LegacyRegularExpression,
            DocKind::LegacySymbol,
            DocKind::LegacyTimestamp,
            DocKind::LegacyUndefined,
        ] {
            assert_eq!(DocKind::from_wire_name(kind.wire_name()), Some(kind));
        }
    }
}
