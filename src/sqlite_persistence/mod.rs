//! Helpers for declaring and versioning SQLite schemas.

mod versioned_schema;

pub use versioned_schema::{
    open_versioned, Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

/// Offset added to every schema version stored in `PRAGMA user_version`.
///
/// A database whose user_version is below this value was not created by us.
pub const BASE_DB_VERSION: usize = 77000;
