//! Notification service wiring the store, the cache and the dispatcher

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::{DispatchError, DispatchSettings, NotificationDispatcher};
use super::models::{
    DispatchResult, DomainEvent, IdeaStatusChangeNotification, NewEventNotification,
    NewIdeaNotification, NewLoanItemNotification, NotificationPayload,
};
use super::producers;
use super::provider::PushProvider;
use crate::db_access::{
    CircuitBreaker, CircuitBreakerConfig, ExecutionError, QueryExecutor, RetryPolicy,
    TimeoutProfiles,
};
use crate::push_subscriptions::{
    NewPushSubscription, PushSubscriptionRecord, PushSubscriptionStore, SubscriptionCache,
    SubscriptionStats,
};

/// Everything the service needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct NotificationConfig {
    /// VAPID public key handed to browsers when they subscribe.
    pub vapid_public_key: String,
    pub timeout_profiles: TimeoutProfiles,
    pub retry_policy: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub dispatch: DispatchSettings,
}

/// Push notification service.
///
/// Construction has no side effects; `start` loads subscribers and launches
/// the breaker monitor.
pub struct NotificationService {
    executor: Arc<QueryExecutor>,
    cache: Arc<SubscriptionCache>,
    dispatcher: NotificationDispatcher,
    vapid_public_key: String,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn PushSubscriptionStore>,
        provider: Arc<dyn PushProvider>,
        config: NotificationConfig,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let executor = Arc::new(QueryExecutor::new(
            config.timeout_profiles,
            config.retry_policy,
            breaker,
        ));
        let cache = Arc::new(SubscriptionCache::new(store, Arc::clone(&executor)));
        let dispatcher = NotificationDispatcher::new(Arc::clone(&cache), provider, config.dispatch);

        Self {
            executor,
            cache,
            dispatcher,
            vapid_public_key: config.vapid_public_key,
        }
    }

    /// Loads subscribers and starts the breaker monitor until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.cache.ensure_loaded().await;
        let stats = self.cache.stats();
        info!(
            "Notification service started with {} subscriptions",
            stats.total_subscriptions
        );
        self.executor.breaker().spawn_monitor(cancel)
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.executor.breaker()
    }

    pub fn cache(&self) -> &Arc<SubscriptionCache> {
        &self.cache
    }

    pub fn public_key(&self) -> &str {
        &self.vapid_public_key
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.cache.stats()
    }

    pub async fn add_subscription(
        &self,
        subscription: NewPushSubscription,
    ) -> Result<PushSubscriptionRecord, ExecutionError> {
        self.cache.ensure_loaded().await;
        self.cache.add_subscription(subscription).await
    }

    pub async fn remove_subscription(&self, endpoint: &str) -> Result<bool, ExecutionError> {
        self.cache.ensure_loaded().await;
        self.cache.remove_subscription(endpoint).await
    }

    /// Drops every device of a user, on logout or account deletion.
    pub async fn remove_subscriptions_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<usize, ExecutionError> {
        self.cache.ensure_loaded().await;
        self.cache.remove_subscriptions_for_owner(owner_id).await
    }

    pub async fn send_to_all(
        &self,
        payload: &NotificationPayload,
    ) -> Result<DispatchResult, DispatchError> {
        self.dispatcher.send_to_all(payload).await
    }

    pub async fn send_to_owner(
        &self,
        owner_id: &str,
        payload: &NotificationPayload,
    ) -> Result<DispatchResult, DispatchError> {
        self.dispatcher.send_to_owner(owner_id, payload).await
    }

    pub async fn notify_new_idea(
        &self,
        idea: &NewIdeaNotification,
    ) -> Result<DispatchResult, DispatchError> {
        self.send_to_all(&producers::new_idea_payload(idea)).await
    }

    pub async fn notify_new_event(
        &self,
        event: &NewEventNotification,
    ) -> Result<DispatchResult, DispatchError> {
        self.send_to_all(&producers::new_event_payload(event)).await
    }

    pub async fn notify_new_loan_item(
        &self,
        item: &NewLoanItemNotification,
    ) -> Result<DispatchResult, DispatchError> {
        self.send_to_all(&producers::new_loan_item_payload(item)).await
    }

    pub async fn notify_idea_status_change(
        &self,
        change: &IdeaStatusChangeNotification,
    ) -> Result<DispatchResult, DispatchError> {
        self.send_to_all(&producers::idea_status_change_payload(change))
            .await
    }

    pub async fn notify(&self, event: &DomainEvent) -> Result<DispatchResult, DispatchError> {
        match event {
            DomainEvent::NewIdea(idea) => self.notify_new_idea(idea).await,
            DomainEvent::NewEvent(event) => self.notify_new_event(event).await,
            DomainEvent::NewLoanItem(item) => self.notify_new_loan_item(item).await,
            DomainEvent::IdeaStatusChange(change) => self.notify_idea_status_change(change).await,
        }
    }

    /// Sends the notification for `event` without making the caller wait.
    pub fn notify_in_background(self: &Arc<Self>, event: DomainEvent) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            match service.notify(&event).await {
                Ok(result) => debug!(
                    "Background '{}' notification done: {} sent, {} failed",
                    event.name(),
                    result.sent,
                    result.failed
                ),
                Err(err) => warn!(
                    "Background '{}' notification failed: {}",
                    event.name(),
                    err
                ),
            }
        })
    }
}
