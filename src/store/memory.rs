//! MemoryStore — an ordered in-memory [`RangeStore`] with a cooperative
//! delivery queue.
//!
//! Records live in a `BTreeMap` keyed by full path, so range subscriptions
//! are plain ordered scans. Writes enqueue notifications instead of
//! delivering them inline; [`flush`](RangeStore::flush) drains the queue
//! FIFO until empty with no locks held during callbacks, which lets a
//! callback write, subscribe, or cancel without deadlocking. Deliveries
//! enqueued *during* a flush are drained by the same flush — this is the
//! single-threaded cooperative scheduling point the engine relies on.
//!
//! Child ordering follows the child name. Callers that use priorities are
//! expected to embed the priority in the name (the geohash index does),
//! so the `index_field` argument is accepted and ignored here.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, StoreError};

use super::traits::{RangeListener, RangeStore, SubscriptionId};

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Value,
    priority: Option<String>,
}

struct Subscription {
    path: String,
    start: String,
    end: String,
    listener: RangeListener,
}

impl Subscription {
    fn matches(&self, dir: &str, name: &str) -> bool {
        self.path == dir && self.start.as_str() <= name && name <= self.end.as_str()
    }
}

/// A queued callback delivery. `Read` resolves its value at delivery time,
/// not enqueue time — that is what makes it a confirmation read.
enum Delivery {
    Added {
        listener: RangeListener,
        name: String,
        value: Value,
    },
    Changed {
        listener: RangeListener,
        name: String,
        value: Value,
    },
    Removed {
        listener: RangeListener,
        name: String,
    },
    InitialSync {
        listener: RangeListener,
    },
    Read {
        path: String,
        callback: Box<dyn FnOnce(Option<Value>) + Send>,
    },
}

struct StoreInner {
    records: std::collections::BTreeMap<String, StoredRecord>,
    subs: HashMap<SubscriptionId, Subscription>,
    next_sub: SubscriptionId,
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory ordered store with queued, flush-driven notification delivery.
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    queue: Mutex<VecDeque<Delivery>>,
    /// Reentrancy guard: a flush triggered from inside a delivery callback
    /// returns immediately and lets the outer loop keep draining.
    flushing: AtomicBool,
    /// Error injection for tests: when set, every write rejects.
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                records: std::collections::BTreeMap::new(),
                subs: HashMap::new(),
                next_sub: 1,
            }),
            queue: Mutex::new(VecDeque::new()),
            flushing: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with [`StoreError::Sync`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of records currently stored (all paths).
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Priority attached to a record, if any.
    pub fn priority_of(&self, path: &str) -> Option<String> {
        self.inner.lock().records.get(path).and_then(|r| r.priority.clone())
    }

    fn split_path(path: &str) -> (&str, &str) {
        match path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", path),
        }
    }

    fn apply_write(&self, path: &str, value: Option<Value>, priority: Option<String>) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::sync(path, "injected write failure").into());
        }

        let (dir, name) = Self::split_path(path);
        let mut deliveries = Vec::new();
        {
            let mut inner = self.inner.lock();
            let previous = match value {
                Some(ref v) => inner.records.insert(
                    path.to_string(),
                    StoredRecord {
                        value: v.clone(),
                        priority,
                    },
                ),
                None => inner.records.remove(path),
            };

            for sub in inner.subs.values() {
                if !sub.matches(dir, name) {
                    continue;
                }
                match (&value, &previous) {
                    (Some(v), None) => deliveries.push(Delivery::Added {
                        listener: sub.listener.clone(),
                        name: name.to_string(),
                        value: v.clone(),
                    }),
                    (Some(v), Some(_)) => deliveries.push(Delivery::Changed {
                        listener: sub.listener.clone(),
                        name: name.to_string(),
                        value: v.clone(),
                    }),
                    (None, Some(_)) => deliveries.push(Delivery::Removed {
                        listener: sub.listener.clone(),
                        name: name.to_string(),
                    }),
                    (None, None) => {}
                }
            }
        }

        if !deliveries.is_empty() {
            self.queue.lock().extend(deliveries);
        }
        Ok(())
    }

    fn deliver(delivery: Delivery, store: &MemoryStore) {
        match delivery {
            Delivery::Added {
                listener,
                name,
                value,
            } => (listener.on_added)(&name, &value),
            Delivery::Changed {
                listener,
                name,
                value,
            } => (listener.on_changed)(&name, &value),
            Delivery::Removed { listener, name } => (listener.on_removed)(&name),
            Delivery::InitialSync { listener } => (listener.on_initial_sync)(),
            Delivery::Read { path, callback } => {
                let value = store.inner.lock().records.get(&path).map(|r| r.value.clone());
                callback(value);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RangeStore implementation
// ============================================================================

#[async_trait]
impl RangeStore for MemoryStore {
    async fn write(&self, path: &str, value: Option<Value>) -> Result<()> {
        self.apply_write(path, value, None)
    }

    async fn write_with_priority(&self, path: &str, value: Value, priority: &str) -> Result<()> {
        self.apply_write(path, Some(value), Some(priority.to_string()))
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.inner.lock().records.get(path).map(|r| r.value.clone()))
    }

    fn read_after_flush(&self, path: &str, callback: Box<dyn FnOnce(Option<Value>) + Send>) {
        self.queue.lock().push_back(Delivery::Read {
            path: path.to_string(),
            callback,
        });
    }

    fn subscribe_range(
        &self,
        path: &str,
        _index_field: &str,
        start: &str,
        end: &str,
        listener: RangeListener,
    ) -> SubscriptionId {
        let mut deliveries = Vec::new();
        let id;
        {
            let mut inner = self.inner.lock();
            id = inner.next_sub;
            inner.next_sub += 1;

            // Replay existing children in range, then the sync marker.
            let prefix = format!("{path}/");
            let lo = format!("{path}/{start}");
            let hi = format!("{path}/{end}");
            for (full_path, record) in inner.records.range(lo..=hi) {
                let Some(name) = full_path.strip_prefix(&prefix) else {
                    continue;
                };
                deliveries.push(Delivery::Added {
                    listener: listener.clone(),
                    name: name.to_string(),
                    value: record.value.clone(),
                });
            }
            deliveries.push(Delivery::InitialSync {
                listener: listener.clone(),
            });

            inner.subs.insert(
                id,
                Subscription {
                    path: path.to_string(),
                    start: start.to_string(),
                    end: end.to_string(),
                    listener,
                },
            );
        }
        self.queue.lock().extend(deliveries);
        tracing::debug!(id, path, start, end, "range subscription attached");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        // Deliveries already queued for this listener still run; consumers
        // guard with their own cancellation flag.
        if self.inner.lock().subs.remove(&id).is_some() {
            tracing::debug!(id, "range subscription released");
        }
    }

    fn flush(&self) {
        if self.flushing.swap(true, Ordering::Acquire) {
            return;
        }
        loop {
            let next = self.queue.lock().pop_front();
            let Some(delivery) = next else { break };
            // A panicking callback must not wedge the queue.
            let _ = catch_unwind(AssertUnwindSafe(|| Self::deliver(delivery, self)));
        }
        self.flushing.store(false, Ordering::Release);
    }
}

// ============================================================================
// Tests
// ============================================================================
