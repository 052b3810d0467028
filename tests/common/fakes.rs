//! Scriptable collaborators for the notification service.

use async_trait::async_trait;
use pushboard::notifications::{PushOptions, PushProvider, PushTarget, SendOutcome};
use pushboard::push_subscriptions::{
    NewPushSubscription, PushSubscriptionRecord, PushSubscriptionStore,
    SqlitePushSubscriptionStore,
};
use pushboard::StoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-memory SQLite store whose reads and deletes can be made to fail, and
/// whose calls can be slowed down.
pub struct ScriptedStore {
    inner: SqlitePushSubscriptionStore,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
    list_calls: AtomicUsize,
    list_delay: Mutex<Duration>,
    write_delay: Mutex<Option<WriteDelay>>,
    interrupted: AtomicBool,
    interrupts: AtomicUsize,
}

#[derive(Clone, Copy)]
struct WriteDelay {
    delay: Duration,
    interruptible: bool,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            inner: SqlitePushSubscriptionStore::in_memory().expect("in-memory store"),
            fail_reads: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            list_delay: Mutex::new(Duration::ZERO),
            write_delay: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            interrupts: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Makes every `list_all` call block its thread for `delay` after it has
    /// read the rows.
    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    /// Makes upserts and deletes block for `delay` before they write.
    ///
    /// An interruptible write gives up without writing when `interrupt` is
    /// called during the delay, like an aborted SQLite statement.
    pub fn set_write_delay(&self, delay: Duration, interruptible: bool) {
        *self.write_delay.lock().unwrap() = Some(WriteDelay {
            delay,
            interruptible,
        });
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn stall_write(&self) -> Result<(), StoreError> {
        let Some(write_delay) = *self.write_delay.lock().unwrap() else {
            return Ok(());
        };
        let deadline = Instant::now() + write_delay.delay;
        while Instant::now() < deadline {
            if write_delay.interruptible && self.interrupted.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("interrupted".to_string()));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("database is locked".to_string())
    }
}

impl PushSubscriptionStore for ScriptedStore {
    fn upsert(
        &self,
        subscription: &NewPushSubscription,
    ) -> Result<PushSubscriptionRecord, StoreError> {
        self.stall_write()?;
        self.inner.upsert(subscription)
    }

    fn delete(&self, endpoint: &str) -> Result<bool, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.stall_write()?;
        self.inner.delete(endpoint)
    }

    fn delete_by_owner(&self, owner_id: &str) -> Result<usize, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete_by_owner(owner_id)
    }

    fn list_all(&self) -> Result<Vec<PushSubscriptionRecord>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.inner.list_all();
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        records
    }

    fn list_by_owner(&self, owner_id: &str) -> Result<Vec<PushSubscriptionRecord>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.list_by_owner(owner_id)
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.inner.count()
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
        self.inner.interrupt();
    }
}

/// Provider that records every send and how many ran at the same time.
///
/// Each send sleeps for `send_delay` so sends of the same batch overlap.
pub struct RecordingProvider {
    statuses: Mutex<HashMap<String, u16>>,
    send_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
    /// Completed sends observed when each send started.
    completed_at_start: Mutex<Vec<usize>>,
    sent_endpoints: Mutex<Vec<String>>,
}

impl RecordingProvider {
    pub fn new(send_delay: Duration) -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            send_delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            completed_at_start: Mutex::new(Vec::new()),
            sent_endpoints: Mutex::new(Vec::new()),
        }
    }

    /// Answers `status` for `endpoint`; unknown endpoints get 201.
    pub fn respond_with(&self, endpoint: &str, status: u16) {
        self.statuses
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), status);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.sent_endpoints.lock().unwrap().len()
    }

    pub fn sent_endpoints(&self) -> Vec<String> {
        self.sent_endpoints.lock().unwrap().clone()
    }

    /// Sizes of the groups of sends that started together, in start order.
    pub fn waves(&self) -> Vec<usize> {
        let starts = self.completed_at_start.lock().unwrap();
        let mut waves: Vec<(usize, usize)> = Vec::new();
        for completed in starts.iter() {
            match waves.last_mut() {
                Some((marker, size)) if marker == completed => *size += 1,
                _ => waves.push((*completed, 1)),
            }
        }
        waves.into_iter().map(|(_, size)| size).collect()
    }
}

#[async_trait]
impl PushProvider for RecordingProvider {
    async fn send(
        &self,
        target: &PushTarget,
        _payload: &str,
        _options: &PushOptions,
    ) -> SendOutcome {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.completed_at_start
            .lock()
            .unwrap()
            .push(self.completed.load(Ordering::SeqCst));
        self.sent_endpoints
            .lock()
            .unwrap()
            .push(target.endpoint.clone());

        tokio::time::sleep(self.send_delay).await;

        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(&target.endpoint)
            .copied()
            .unwrap_or(201);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        SendOutcome::from_status(status)
    }
}
