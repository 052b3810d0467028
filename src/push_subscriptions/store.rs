//! Push subscription storage and persistence.
//!
//! Provides SQLite-backed storage for push subscriptions. The store is the
//! source of truth; in-memory views are rebuilt from it.

use super::models::{NewPushSubscription, PushSubscriptionRecord};
use super::schema::PUSH_SUBSCRIPTION_VERSIONED_SCHEMAS;
use crate::db_access::StoreError;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, InterruptHandle};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Trait for push subscription storage operations.
///
/// Calls are synchronous and may block; async callers run them on the
/// blocking pool through the query executor.
pub trait PushSubscriptionStore: Send + Sync {
    /// Insert a subscription, or refresh keys and timestamps of an existing endpoint.
    fn upsert(&self, subscription: &NewPushSubscription)
        -> Result<PushSubscriptionRecord, StoreError>;

    /// Delete a subscription. Returns false if the endpoint was not stored.
    fn delete(&self, endpoint: &str) -> Result<bool, StoreError>;

    /// Delete every subscription owned by a user. Returns the number deleted.
    fn delete_by_owner(&self, owner_id: &str) -> Result<usize, StoreError>;

    /// All stored subscriptions.
    fn list_all(&self) -> Result<Vec<PushSubscriptionRecord>, StoreError>;

    /// Subscriptions owned by a user.
    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<PushSubscriptionRecord>, StoreError>;

    fn count(&self) -> Result<usize, StoreError>;

    /// Aborts the statement currently running on the store, if any. The
    /// aborted call fails with [`StoreError::Unavailable`] and its changes are
    /// rolled back.
    fn interrupt(&self) {}
}

/// SQLite-backed push subscription store.
pub struct SqlitePushSubscriptionStore {
    conn: Arc<Mutex<Connection>>,
    interrupt_handle: InterruptHandle,
}

impl SqlitePushSubscriptionStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), PUSH_SUBSCRIPTION_VERSIONED_SCHEMAS)
            .with_context(|| {
                format!(
                    "Failed to open push subscription database at {:?}",
                    db_path.as_ref()
                )
            })?;
        conn.busy_timeout(std::time::Duration::from_millis(500))?;

        Ok(Self::from_connection(conn))
    }

    /// Create an in-memory store, for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        PUSH_SUBSCRIPTION_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            interrupt_handle: conn.get_interrupt_handle(),
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PushSubscriptionRecord> {
        Ok(PushSubscriptionRecord {
            endpoint: row.get("endpoint")?,
            p256dh: row.get("p256dh")?,
            auth: row.get("auth")?,
            owner_id: row.get("owner_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl PushSubscriptionStore for SqlitePushSubscriptionStore {
    fn upsert(
        &self,
        subscription: &NewPushSubscription,
    ) -> Result<PushSubscriptionRecord, StoreError> {
        subscription.validate()?;

        let now = Self::now();
        let conn = self.lock();
        let record = conn.query_row(
            r#"INSERT INTO push_subscriptions (endpoint, p256dh, auth, owner_id, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?5)
               ON CONFLICT(endpoint) DO UPDATE SET
                   p256dh = excluded.p256dh,
                   auth = excluded.auth,
                   owner_id = COALESCE(excluded.owner_id, push_subscriptions.owner_id),
                   updated_at = excluded.updated_at
               RETURNING endpoint, p256dh, auth, owner_id, created_at, updated_at"#,
            params![
                subscription.endpoint,
                subscription.p256dh,
                subscription.auth,
                subscription.owner_id,
                now,
            ],
            Self::row_to_record,
        )?;
        Ok(record)
    }

    fn delete(&self, endpoint: &str) -> Result<bool, StoreError> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM push_subscriptions WHERE endpoint = ?1",
            params![endpoint],
        )?;
        Ok(deleted > 0)
    }

    fn delete_by_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM push_subscriptions WHERE owner_id = ?1",
            params![owner_id],
        )?;
        Ok(deleted)
    }

    fn list_all(&self) -> Result<Vec<PushSubscriptionRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM push_subscriptions ORDER BY created_at, endpoint")?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<PushSubscriptionRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM push_subscriptions WHERE owner_id = ?1 ORDER BY created_at, endpoint",
        )?;
        let records = stmt
            .query_map([owner_id], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM push_subscriptions", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    fn interrupt(&self) {
        self.interrupt_handle.interrupt();
    }
}
