//! Push subscription data models

use serde::{Deserialize, Serialize};

use crate::db_access::StoreError;

/// A stored push subscription, one per endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscriptionRecord {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub owner_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Registration request coming from a browser's `PushSubscription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPushSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl NewPushSubscription {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.endpoint.trim().is_empty() {
            return Err(StoreError::Invalid("endpoint must not be empty".into()));
        }
        if self.p256dh.trim().is_empty() || self.auth.trim().is_empty() {
            return Err(StoreError::Invalid(format!(
                "subscription {} is missing key material",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Subscription counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    pub total_subscriptions: usize,
    /// Subscriptions whose most recent delivery attempt did not fail.
    pub active_subscriptions: usize,
}
