// SPDX-License-Identifier: Apache-2.0

//! Path & name mangling (C3) — canonical joining of document paths into SQL
//! identifiers.
//!
//! Two rules, applied uniformly everywhere a document field name or path
//! becomes a SQL identifier:
//!
//! 1. **Sanitize.** Any byte outside `[A-Za-z0-9_]` becomes `_`; a result
//!    that would start with a digit is prefixed with `_` (SQL identifiers
//!    cannot be bare numbers).
//! 2. **Escape a leading underscore by doubling it.** A field named `_id`
//!    mangles to `__id`. This keeps user fields that happen to start with
//!    `_` from ever colliding with the names the inference engine
//!    synthesizes itself (`value`, `array_index_lvl_N`), none of which start
//!    with an underscore.
//!
//! Virtual table names are the mangled, underscore-joined path *from the
//! collection root*, with one leading underscore marking it as virtual
//! (distinct from the base table, whose `sql_name` is the bare collection
//! name). This matches the worked examples in §8.2 of SPEC_FULL.md
//! (`_doc`, `_array`, `_arr`) — see the "Naming" entry in DESIGN.md for why
//! the collection name itself is not folded into the visible identifier.

/// Sanitizes a single path segment into a valid bare SQL identifier
/// fragment, without applying the leading-underscore escape.
fn sanitize_segment(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        out.insert(0, '_');
    }
    out
}

/// Mangles a single field name into the SQL identifier used for its column,
/// applying both the sanitize and leading-underscore-escape rules.
pub fn mangle_field_name(raw: &str) -> String {
    let sanitized = sanitize_segment(raw);
    if raw.starts_with('_') {
        format!("_{sanitized}")
    } else {
        sanitized
    }
}

/// Mangles a full document path (root to field, each segment already split
/// on `.`) into the underscore-joined identifier used internally to key a
/// virtual table by its nesting location.
pub fn mangle_path(segments: &[String]) -> String {
    segments
        .iter()
        .map(|s| mangle_field_name(s))
        .collect::<Vec<_>>()
        .join("_")
}

/// The `sql_name` of a virtual table rooted at `segments` (the path from the
/// owning collection's root to the embedded document/array that the table
/// was synthesized from).
pub fn virtual_table_name(segments: &[String]) -> String {
    format!("_{}", mangle_path(segments))
}

/// Joins `collection_name` and a mangled path into the key used internally
/// by the inference engine's working maps, so that running the engine over
/// several collections into one database schema cannot collide two
/// same-named nested paths from different collections. This key is never
/// exposed as a `sql_name`.
pub fn internal_table_key(collection_name: &str, segments: &[String]) -> String {
    format!("{collection_name}::{}", mangle_path(segments))
}

/// A synthesized array-index PK column name at nesting depth `level`.
pub fn array_index_column_name(level: usize) -> String {
    format!("array_index_lvl_{level}")
}

/// The synthesized column name used for a scalar element of an array.
pub const ARRAY_VALUE_COLUMN: &str = "value";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_underscore_is_escaped() {
        assert_eq!(mangle_field_name("_id"), "__id");
        assert_eq!(mangle_field_name("_private"), "__private");
    }

    #[test]
    fn ordinary_fields_pass_through() {
        assert_eq!(mangle_field_name("field"), "field");
        assert_eq!(mangle_field_name("field1"), "field1");
    }

    #[test]
    fn invalid_characters_are_replaced() {
        assert_eq!(mangle_field_name("a.b"), "a_b");
        assert_eq!(mangle_field_name("weird key!"), "weird_key_");
    }

    #[test]
    fn digit_leading_names_are_prefixed() {
        assert_eq!(mangle_field_name("123abc"), "_123abc");
    }

    #[test]
    fn virtual_table_naming_matches_worked_examples() {
        assert_eq!(virtual_table_name(&["doc".to_string()]), "_doc");
        assert_eq!(virtual_table_name(&["array".to_string()]), "_array");
        assert_eq!(virtual_table_name(&["arr".to_string()]), "_arr");
    }

    #[test]
    fn nested_path_joins_with_underscore() {
        assert_eq!(
            virtual_table_name(&["a".to_string(), "b".to_string()]),
            "_a_b"
        );
    }

    #[test]
    fn array_index_and_value_column_names() {
        assert_eq!(array_index_column_name(0), "array_index_lvl_0");
        assert_eq!(array_index_column_name(2), "array_index_lvl_2");
        assert_eq!(ARRAY_VALUE_COLUMN, "value");
    }
}
