//! Pushboard Library
//!
//! Resilient store access and push notification fan-out, exposed for the
//! `pushboard` binary and for testing.

pub mod config;
pub mod db_access;
pub mod metrics;
pub mod notifications;
pub mod push_subscriptions;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use db_access::{CircuitBreaker, ExecutionError, QueryExecutor, StoreError};
pub use notifications::{NotificationConfig, NotificationService, PushProvider};
pub use push_subscriptions::{PushSubscriptionStore, SqlitePushSubscriptionStore};
