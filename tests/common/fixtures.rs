use pushboard::db_access::{CircuitBreakerConfig, RetryPolicy};
use pushboard::notifications::{NotificationConfig, NotificationService, PushProvider};
use pushboard::push_subscriptions::{NewPushSubscription, PushSubscriptionStore};
use std::sync::Arc;
use std::time::Duration;

use super::constants::TEST_VAPID_PUBLIC_KEY;

/// Service configuration with short backoffs so retries stay fast.
pub fn test_config() -> NotificationConfig {
    NotificationConfig {
        vapid_public_key: TEST_VAPID_PUBLIC_KEY.to_string(),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            monitor_interval: Duration::from_millis(50),
        },
        ..Default::default()
    }
}

pub fn build_service(
    store: Arc<dyn PushSubscriptionStore>,
    provider: Arc<dyn PushProvider>,
    config: NotificationConfig,
) -> NotificationService {
    NotificationService::new(store, provider, config)
}

/// The `index`-th test subscription, with a zero-padded endpoint.
pub fn subscription(index: usize) -> NewPushSubscription {
    NewPushSubscription {
        endpoint: endpoint(index),
        p256dh: format!("p256dh-{:02}", index),
        auth: format!("auth-{:02}", index),
        owner_id: None,
    }
}

pub fn endpoint(index: usize) -> String {
    format!("https://push.example.org/send/sub-{:02}", index)
}
