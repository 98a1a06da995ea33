// SPDX-License-Identifier: Apache-2.0

//! Document value model, SQL type lattice, path mangling, schema descriptor
//! types, and the unified error type shared by every crate in this
//! workspace.

pub mod document;
pub mod error;
pub mod mangle;
pub mod schema_types;
pub mod sql_type;

pub use document::DocKind;
pub use error::{DriverError, DriverResult};
pub use schema_types::{DatabaseSchema, SchemaColumn, SchemaTable};
pub use sql_type::{promote, SqlType};
