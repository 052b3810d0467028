//! In-memory view of the push subscription store.
//!
//! The cache is filled lazily from the store the first time it is needed and
//! then kept in step through incremental adds and removals. Each write updates
//! the map on the same worker that applied it to the store, so a write that
//! lands after its caller timed out is still mirrored.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::{NewPushSubscription, PushSubscriptionRecord, SubscriptionStats};
use super::store::PushSubscriptionStore;
use crate::db_access::{
    ExecutionError, QueryExecutor, StoreError, PROFILE_BACKGROUND, PROFILE_NORMAL,
};
use crate::metrics;

struct CachedSubscription {
    record: PushSubscriptionRecord,
    last_delivery_failed: bool,
}

impl CachedSubscription {
    fn new(record: PushSubscriptionRecord) -> Self {
        Self {
            record,
            last_delivery_failed: false,
        }
    }
}

/// Removals seen while the initial load is reading the store.
#[derive(Default)]
struct PendingRemovals {
    endpoints: HashSet<String>,
    owners: HashSet<String>,
}

impl PendingRemovals {
    fn covers(&self, record: &PushSubscriptionRecord) -> bool {
        self.endpoints.contains(&record.endpoint)
            || record
                .owner_id
                .as_ref()
                .is_some_and(|owner| self.owners.contains(owner))
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedSubscription>,
    removed_while_loading: Option<PendingRemovals>,
}

#[derive(Default)]
struct Mirror {
    state: RwLock<CacheState>,
    /// Held across a store write and its map update.
    write_lane: Mutex<()>,
}

impl Mirror {
    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lane(&self) -> MutexGuard<'_, ()> {
        self.write_lane
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, record: PushSubscriptionRecord) {
        let mut state = self.write();
        state
            .entries
            .insert(record.endpoint.clone(), CachedSubscription::new(record));
        metrics::set_subscription_count(state.entries.len());
    }

    fn evict(&self, endpoint: &str) -> bool {
        let mut state = self.write();
        if let Some(removals) = state.removed_while_loading.as_mut() {
            removals.endpoints.insert(endpoint.to_string());
        }
        let removed = state.entries.remove(endpoint).is_some();
        metrics::set_subscription_count(state.entries.len());
        removed
    }

    fn evict_owner(&self, owner_id: &str) {
        let mut state = self.write();
        if let Some(removals) = state.removed_while_loading.as_mut() {
            removals.owners.insert(owner_id.to_string());
        }
        state
            .entries
            .retain(|_, cached| cached.record.owner_id.as_deref() != Some(owner_id));
        metrics::set_subscription_count(state.entries.len());
    }
}

/// Fails an attempt that was abandoned before it touched the store.
fn ensure_attempt_live(attempt: &CancellationToken) -> Result<(), StoreError> {
    if attempt.is_cancelled() {
        return Err(StoreError::Unavailable(
            "write abandoned after timeout".to_string(),
        ));
    }
    Ok(())
}

pub struct SubscriptionCache {
    store: Arc<dyn PushSubscriptionStore>,
    executor: Arc<QueryExecutor>,
    mirror: Arc<Mirror>,
    loaded: OnceCell<()>,
}

impl SubscriptionCache {
    pub fn new(store: Arc<dyn PushSubscriptionStore>, executor: Arc<QueryExecutor>) -> Self {
        Self {
            store,
            executor,
            mirror: Arc::new(Mirror::default()),
            loaded: OnceCell::new(),
        }
    }

    /// Loads the cache from the store unless that already happened.
    ///
    /// Callers arriving while the first load is in flight wait for that same
    /// load instead of starting another one.
    pub async fn ensure_loaded(&self) {
        self.loaded.get_or_init(|| self.load_subscriptions()).await;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Reads every subscription from the store into the map.
    ///
    /// A failed read leaves the cache with whatever it already holds: the
    /// notification path must keep working while the store is unavailable.
    async fn load_subscriptions(&self) {
        self.mirror.write().removed_while_loading = Some(PendingRemovals::default());

        let store = Arc::clone(&self.store);
        let result = self
            .executor
            .run_blocking(PROFILE_BACKGROUND, move || store.list_all())
            .await;

        let mut state = self.mirror.write();
        let removals = state.removed_while_loading.take().unwrap_or_default();
        match result {
            Ok(records) => {
                let fetched = records.len();
                for record in records {
                    if removals.covers(&record) {
                        continue;
                    }
                    // Entries added while the load was in flight are newer than the read.
                    state
                        .entries
                        .entry(record.endpoint.clone())
                        .or_insert_with(|| CachedSubscription::new(record));
                }
                metrics::set_subscription_count(state.entries.len());
                info!("Loaded {} push subscriptions", fetched);
            }
            Err(err) => {
                warn!(
                    "Failed to load push subscriptions, continuing with {} cached: {}",
                    state.entries.len(),
                    err
                );
            }
        }
    }

    fn interrupt_hook(&self) -> impl Fn() + Send + Sync + 'static {
        let store = Arc::clone(&self.store);
        move || store.interrupt()
    }

    /// Stores a subscription, then mirrors it in the cache.
    pub async fn add_subscription(
        &self,
        subscription: NewPushSubscription,
    ) -> Result<PushSubscriptionRecord, ExecutionError> {
        let store = Arc::clone(&self.store);
        let mirror = Arc::clone(&self.mirror);
        let record = self
            .executor
            .run_blocking_interruptible(
                PROFILE_NORMAL,
                move |attempt| {
                    let _lane = mirror.lane();
                    ensure_attempt_live(attempt)?;
                    let record = store.upsert(&subscription)?;
                    mirror.insert(record.clone());
                    Ok(record)
                },
                self.interrupt_hook(),
            )
            .await?;

        debug!("Registered push subscription {}", record.endpoint);
        Ok(record)
    }

    /// Deletes a subscription from the store, then from the cache.
    ///
    /// Removing an unknown endpoint is not an error. Returns whether the
    /// endpoint was known to either the store or the cache.
    pub async fn remove_subscription(&self, endpoint: &str) -> Result<bool, ExecutionError> {
        let store = Arc::clone(&self.store);
        let mirror = Arc::clone(&self.mirror);
        let endpoint = endpoint.to_string();
        self.executor
            .run_blocking_interruptible(
                PROFILE_NORMAL,
                move |attempt| {
                    let _lane = mirror.lane();
                    ensure_attempt_live(attempt)?;
                    let deleted = store.delete(&endpoint)?;
                    let evicted = mirror.evict(&endpoint);
                    Ok(deleted || evicted)
                },
                self.interrupt_hook(),
            )
            .await
    }

    /// Deletes every subscription of a user from the store and the cache.
    pub async fn remove_subscriptions_for_owner(
        &self,
        owner_id: &str,
    ) -> Result<usize, ExecutionError> {
        let store = Arc::clone(&self.store);
        let mirror = Arc::clone(&self.mirror);
        let owner_id = owner_id.to_string();
        self.executor
            .run_blocking_interruptible(
                PROFILE_NORMAL,
                move |attempt| {
                    let _lane = mirror.lane();
                    ensure_attempt_live(attempt)?;
                    let deleted = store.delete_by_owner(&owner_id)?;
                    mirror.evict_owner(&owner_id);
                    Ok(deleted)
                },
                self.interrupt_hook(),
            )
            .await
    }

    /// Drops an endpoint from the cache only.
    pub fn evict(&self, endpoint: &str) -> bool {
        self.mirror.evict(endpoint)
    }

    /// Remembers how the last delivery to an endpoint went.
    pub fn record_delivery(&self, endpoint: &str, delivered: bool) {
        if let Some(cached) = self.mirror.write().entries.get_mut(endpoint) {
            cached.last_delivery_failed = !delivered;
        }
    }

    /// All cached subscriptions, in no particular order.
    pub fn snapshot(&self) -> Vec<PushSubscriptionRecord> {
        self.mirror
            .read()
            .entries
            .values()
            .map(|cached| cached.record.clone())
            .collect()
    }

    /// Cached subscriptions of one user.
    pub fn subscriptions_for_owner(&self, owner_id: &str) -> Vec<PushSubscriptionRecord> {
        self.mirror
            .read()
            .entries
            .values()
            .filter(|cached| cached.record.owner_id.as_deref() == Some(owner_id))
            .map(|cached| cached.record.clone())
            .collect()
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.mirror.read().entries.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.mirror.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.read().entries.is_empty()
    }

    pub fn stats(&self) -> SubscriptionStats {
        let state = self.mirror.read();
        SubscriptionStats {
            total_subscriptions: state.entries.len(),
            active_subscriptions: state
                .entries
                .values()
                .filter(|cached| !cached.last_delivery_failed)
                .count(),
        }
    }
}
