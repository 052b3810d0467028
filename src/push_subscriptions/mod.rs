//! Push subscription storage and the in-memory recipient cache

mod cache;
mod models;
mod schema;
mod store;

pub use cache::SubscriptionCache;
pub use models::{NewPushSubscription, PushSubscriptionRecord, SubscriptionStats};
pub use schema::PUSH_SUBSCRIPTION_VERSIONED_SCHEMAS;
pub use store::{PushSubscriptionStore, SqlitePushSubscriptionStore};
