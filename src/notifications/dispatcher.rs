//! Batched fan-out of a notification to cached subscribers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{DispatchResult, NotificationPayload};
use super::provider::{PushOptions, PushProvider, PushTarget, SendOutcome, Urgency};
use crate::metrics;
use crate::push_subscriptions::{PushSubscriptionRecord, SubscriptionCache};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to serialize notification payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How payloads are delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Recipients sent to concurrently; batches run one after the other.
    pub batch_size: usize,
    /// How long the push service keeps an undelivered message.
    pub ttl: Duration,
    pub urgency: Urgency,
    pub default_icon: String,
    pub default_badge: String,
    pub default_tag: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            ttl: Duration::from_secs(24 * 60 * 60),
            urgency: Urgency::Normal,
            default_icon: "/icon-192x192.png".to_string(),
            default_badge: "/badge-72x72.png".to_string(),
            default_tag: "notification".to_string(),
        }
    }
}

pub struct NotificationDispatcher {
    cache: Arc<SubscriptionCache>,
    provider: Arc<dyn PushProvider>,
    settings: DispatchSettings,
}

impl NotificationDispatcher {
    pub fn new(
        cache: Arc<SubscriptionCache>,
        provider: Arc<dyn PushProvider>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            cache,
            provider,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Sends `payload` to every cached subscription.
    ///
    /// Per-recipient failures are counted, never returned. Subscriptions the
    /// push service rejects permanently are removed before this returns.
    pub async fn send_to_all(
        &self,
        payload: &NotificationPayload,
    ) -> Result<DispatchResult, DispatchError> {
        self.cache.ensure_loaded().await;
        let recipients = self.cache.snapshot();
        self.dispatch("all", recipients, payload).await
    }

    /// Sends `payload` to the devices of one user.
    pub async fn send_to_owner(
        &self,
        owner_id: &str,
        payload: &NotificationPayload,
    ) -> Result<DispatchResult, DispatchError> {
        self.cache.ensure_loaded().await;
        let recipients = self.cache.subscriptions_for_owner(owner_id);
        self.dispatch("owner", recipients, payload).await
    }

    /// Serializes the payload with unset presentation fields filled in.
    fn render(&self, payload: &NotificationPayload) -> Result<String, DispatchError> {
        let mut rendered = payload.clone();
        rendered
            .icon
            .get_or_insert_with(|| self.settings.default_icon.clone());
        rendered
            .badge
            .get_or_insert_with(|| self.settings.default_badge.clone());
        rendered
            .tag
            .get_or_insert_with(|| self.settings.default_tag.clone());
        Ok(serde_json::to_string(&rendered)?)
    }

    fn options(&self) -> PushOptions {
        PushOptions {
            ttl_seconds: u32::try_from(self.settings.ttl.as_secs()).unwrap_or(u32::MAX),
            urgency: self.settings.urgency,
        }
    }

    async fn dispatch(
        &self,
        target: &str,
        recipients: Vec<PushSubscriptionRecord>,
        payload: &NotificationPayload,
    ) -> Result<DispatchResult, DispatchError> {
        let started = Instant::now();
        let body = self.render(payload)?;
        let options = self.options();
        let mut result = DispatchResult::default();

        if recipients.is_empty() {
            debug!("No subscribers for '{}', nothing to send", payload.title);
            return Ok(result);
        }

        let batch_size = self.settings.batch_size.max(1);
        for batch in recipients.chunks(batch_size) {
            let sends = batch.iter().map(|record| {
                let target = PushTarget {
                    endpoint: record.endpoint.clone(),
                    p256dh: record.p256dh.clone(),
                    auth: record.auth.clone(),
                };
                let provider = Arc::clone(&self.provider);
                let body = body.as_str();
                async move { provider.send(&target, body, &options).await }
            });
            let outcomes = join_all(sends).await;

            for (record, outcome) in batch.iter().zip(outcomes) {
                metrics::record_push_send(outcome.label());
                self.cache
                    .record_delivery(&record.endpoint, outcome.is_delivered());
                match outcome {
                    SendOutcome::Delivered => result.sent += 1,
                    SendOutcome::PermanentFailure { status } => {
                        result.failed += 1;
                        self.prune(&record.endpoint, status).await;
                    }
                    SendOutcome::TransientFailure { status, reason } => {
                        result.failed += 1;
                        warn!(
                            "Push to {} failed (status {:?}): {}",
                            record.endpoint, status, reason
                        );
                    }
                }
            }
        }

        metrics::record_dispatch(target, started.elapsed());
        info!(
            "Dispatched '{}' to {} subscribers: {} sent, {} failed",
            payload.title,
            result.total(),
            result.sent,
            result.failed
        );
        Ok(result)
    }

    /// Removes a subscription the push service will never accept again.
    async fn prune(&self, endpoint: &str, status: u16) {
        info!(
            "Removing push subscription {} rejected with status {}",
            endpoint, status
        );
        if let Err(err) = self.cache.remove_subscription(endpoint).await {
            warn!(
                "Failed to delete subscription {} from the store, evicting from cache only: {}",
                endpoint, err
            );
            self.cache.evict(endpoint);
        }
        metrics::record_subscription_pruned();
    }
}
