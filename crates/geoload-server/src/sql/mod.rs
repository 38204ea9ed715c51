//! SQL text construction
//!
//! Every DDL/DML statement the import pipeline issues is built from a
//! [`SqlQuery`] template. Schema, table, trigger and index names can only be
//! substituted as validated [`Identifier`]s (always double-quoted), free text
//! only as escaped literals, and user-controlled values that the server can
//! bind are passed as positional parameters.

pub mod identifier;
pub mod template;

pub use identifier::{Identifier, IdentifierError};
pub use template::{SqlQuery, SqlStatement, SqlValue, TemplateError};
