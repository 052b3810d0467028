//! Database schema for the push subscription store.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const PUSH_SUBSCRIPTIONS_TABLE_V0: Table = Table {
    name: "push_subscriptions",
    columns: &[
        sqlite_column!("endpoint", &SqlType::Text, is_primary_key = true),
        sqlite_column!("p256dh", &SqlType::Text, non_null = true),
        sqlite_column!("auth", &SqlType::Text, non_null = true),
        sqlite_column!("owner_id", &SqlType::Text),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_push_subscriptions_owner", "owner_id")],
};

pub const PUSH_SUBSCRIPTION_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[PUSH_SUBSCRIPTIONS_TABLE_V0],
    migration: None,
}];
