//! End-to-end tests for batched notification dispatch and pruning

mod common;

use common::{
    build_service, endpoint, subscription, test_config, RecordingProvider, ScriptedStore,
    TEST_OWNER, TEST_VAPID_PUBLIC_KEY,
};
use axum::http::StatusCode;
use pushboard::notifications::{
    DispatchResult, DispatchSettings, NewEventNotification, NewIdeaNotification,
    NotificationConfig, NotificationPayload, RelayPushProvider, VapidCredentials,
};
use pushboard::push_subscriptions::{NewPushSubscription, PushSubscriptionStore, SubscriptionStats};
use std::sync::Arc;
use std::time::Duration;

const SEND_DELAY: Duration = Duration::from_millis(20);

fn seed(store: &ScriptedStore, count: usize) {
    for i in 0..count {
        store.upsert(&subscription(i)).unwrap();
    }
}

/// Starts a relay on a free local port that gives every request the same answer.
async fn spawn_relay(status: StatusCode, body: &'static str) -> String {
    let app = axum::Router::new().route(
        "/send",
        axum::routing::post(move || async move { (status, body) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", address)
}

fn relay_provider(base_url: String) -> Arc<RelayPushProvider> {
    let vapid = VapidCredentials {
        public_key: TEST_VAPID_PUBLIC_KEY.to_string(),
        private_key: "test-private-key".to_string(),
        subject: "mailto:admin@example.org".to_string(),
    };
    Arc::new(RelayPushProvider::new(base_url, 5, vapid).unwrap())
}

#[tokio::test]
async fn test_fan_out_in_sequential_batches_and_prunes_gone_endpoint() {
    let store = Arc::new(ScriptedStore::new());
    seed(&store, 25);
    let provider = Arc::new(RecordingProvider::new(SEND_DELAY));
    provider.respond_with(&endpoint(7), 410);
    let service = build_service(store.clone(), provider.clone(), test_config());

    let result = service
        .send_to_all(&NotificationPayload::new("Hello", "Everyone"))
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 24, failed: 1 });
    assert_eq!(provider.send_count(), 25);
    assert_eq!(provider.waves(), vec![10, 10, 5]);
    assert_eq!(provider.max_in_flight(), 10);

    assert_eq!(service.stats().total_subscriptions, 24);
    assert!(!service.cache().contains(&endpoint(7)));
    assert_eq!(store.count().unwrap(), 24);
    assert!(store
        .list_all()
        .unwrap()
        .iter()
        .all(|r| r.endpoint != endpoint(7)));
}

#[tokio::test]
async fn test_batch_size_from_config() {
    let store = Arc::new(ScriptedStore::new());
    seed(&store, 7);
    let provider = Arc::new(RecordingProvider::new(SEND_DELAY));
    let config = NotificationConfig {
        dispatch: DispatchSettings {
            batch_size: 3,
            ..Default::default()
        },
        ..test_config()
    };
    let service = build_service(store, provider.clone(), config);

    let result = service
        .notify_new_idea(&NewIdeaNotification {
            title: "Seed swap".to_string(),
            proposed_by: "Noor".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 7, failed: 0 });
    assert_eq!(provider.waves(), vec![3, 3, 1]);
    assert_eq!(provider.max_in_flight(), 3);
}

#[tokio::test]
async fn test_bad_request_and_transient_failures() {
    let store = Arc::new(ScriptedStore::new());
    seed(&store, 4);
    let provider = Arc::new(RecordingProvider::new(SEND_DELAY));
    provider.respond_with(&endpoint(0), 400);
    provider.respond_with(&endpoint(1), 500);
    provider.respond_with(&endpoint(2), 429);
    let service = build_service(store.clone(), provider, test_config());

    let result = service
        .send_to_all(&NotificationPayload::new("Hello", "Everyone"))
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 1, failed: 3 });
    // Only the malformed subscription is gone; the others may recover.
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(
        service.stats(),
        SubscriptionStats {
            total_subscriptions: 3,
            active_subscriptions: 1,
        }
    );
}

#[tokio::test]
async fn test_prune_evicts_from_cache_when_store_delete_fails() {
    let store = Arc::new(ScriptedStore::new());
    seed(&store, 2);
    store.set_fail_deletes(true);
    let provider = Arc::new(RecordingProvider::new(SEND_DELAY));
    provider.respond_with(&endpoint(0), 410);
    let service = build_service(store.clone(), provider.clone(), test_config());

    let result = service
        .send_to_all(&NotificationPayload::new("Hello", "Everyone"))
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 1, failed: 1 });
    assert!(!service.cache().contains(&endpoint(0)));
    assert_eq!(store.count().unwrap(), 2);

    // The dead endpoint is not contacted again in this process.
    service
        .send_to_all(&NotificationPayload::new("Again", "Everyone"))
        .await
        .unwrap();
    assert_eq!(provider.send_count(), 3);
}

#[tokio::test]
async fn test_send_to_owner_only_reaches_their_devices() {
    let store = Arc::new(ScriptedStore::new());
    seed(&store, 5);
    for device in ["phone", "laptop"] {
        store
            .upsert(&NewPushSubscription {
                endpoint: format!("https://push.example.org/send/{}", device),
                p256dh: "key".to_string(),
                auth: "secret".to_string(),
                owner_id: Some(TEST_OWNER.to_string()),
            })
            .unwrap();
    }
    let provider = Arc::new(RecordingProvider::new(SEND_DELAY));
    let service = build_service(store, provider.clone(), test_config());

    let result = service
        .send_to_owner(TEST_OWNER, &NotificationPayload::new("Hi", "Just you"))
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 2, failed: 0 });
    let mut sent = provider.sent_endpoints();
    sent.sort();
    assert_eq!(
        sent,
        vec![
            "https://push.example.org/send/laptop".to_string(),
            "https://push.example.org/send/phone".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_dispatch_without_subscribers() {
    let store = Arc::new(ScriptedStore::new());
    let provider = Arc::new(RecordingProvider::new(SEND_DELAY));
    let service = build_service(store, provider.clone(), test_config());

    let result = service
        .notify_new_event(&NewEventNotification {
            title: "Picnic".to_string(),
            date: chrono::Utc::now(),
            location: None,
        })
        .await
        .unwrap();

    assert_eq!(result, DispatchResult::default());
    assert_eq!(provider.send_count(), 0);
}

#[tokio::test]
async fn test_re_registration_does_not_duplicate_recipient() {
    let store = Arc::new(ScriptedStore::new());
    let provider = Arc::new(RecordingProvider::new(SEND_DELAY));
    let service = build_service(store.clone(), provider.clone(), test_config());

    service.add_subscription(subscription(1)).await.unwrap();
    let mut refreshed = subscription(1);
    refreshed.p256dh = "rotated-key".to_string();
    service.add_subscription(refreshed).await.unwrap();

    let result = service
        .send_to_all(&NotificationPayload::new("Hello", "Once"))
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 1, failed: 0 });
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.list_all().unwrap()[0].p256dh, "rotated-key");
}

#[tokio::test]
async fn test_relay_rejection_prunes_nothing() {
    let store = Arc::new(ScriptedStore::new());
    seed(&store, 3);
    let relay = spawn_relay(StatusCode::BAD_REQUEST, "invalid VAPID subject").await;
    let service = build_service(store.clone(), relay_provider(relay), test_config());

    let result = service
        .send_to_all(&NotificationPayload::new("Hello", "Everyone"))
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 0, failed: 3 });
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(service.stats().total_subscriptions, 3);
}

#[tokio::test]
async fn test_push_service_gone_reported_by_relay_prunes() {
    let store = Arc::new(ScriptedStore::new());
    seed(&store, 2);
    let relay = spawn_relay(StatusCode::OK, r#"{"push_status":410}"#).await;
    let service = build_service(store.clone(), relay_provider(relay), test_config());

    let result = service
        .send_to_all(&NotificationPayload::new("Hello", "Everyone"))
        .await
        .unwrap();

    assert_eq!(result, DispatchResult { sent: 0, failed: 2 });
    assert_eq!(store.count().unwrap(), 0);
    assert!(service.cache().is_empty());
}
