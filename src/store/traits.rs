//! The store collaborator contract.
//!
//! `RangeStore` is the narrow trait a backing store must implement: async
//! point operations, plus synchronous subscription management over a single
//! ordered index. The live query engine consumes change notifications
//! through [`RangeListener`] callbacks and never retains a subscription
//! past its explicit [`RangeStore::unsubscribe`] call — teardown is always
//! handle-based, never left to drop order.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Identifier for an active range subscription.
pub type SubscriptionId = u64;

/// Callback bundle attached to one range subscription.
///
/// `name` is the child's key under the subscribed path (for the geohash
/// index, `{geohash}{key}`). `on_initial_sync` fires exactly once, after
/// every child that existed at subscription time has been replayed through
/// `on_added` — the equivalent of the one-shot full read used to detect
/// completion of the initial synchronization.
#[derive(Clone)]
pub struct RangeListener {
    pub on_added: Arc<dyn Fn(&str, &Value) + Send + Sync>,
    pub on_changed: Arc<dyn Fn(&str, &Value) + Send + Sync>,
    pub on_removed: Arc<dyn Fn(&str) + Send + Sync>,
    pub on_initial_sync: Arc<dyn Fn() + Send + Sync>,
}

/// A key-value store supporting ordered range subscriptions on one indexed
/// field.
///
/// Point operations are async and resolve once the store acknowledges;
/// the library performs no retry on failure. Notification delivery is
/// cooperative: implementations queue deliveries and drain them serially
/// from [`flush`](RangeStore::flush) — a push-based remote store that
/// delivers from its own event loop may implement `flush` as a no-op.
#[async_trait]
pub trait RangeStore: Send + Sync {
    /// Point write. `None` deletes the record.
    async fn write(&self, path: &str, value: Option<Value>) -> Result<()>;

    /// Point write with a sortable index value attached.
    async fn write_with_priority(&self, path: &str, value: Value, priority: &str) -> Result<()>;

    /// One-shot point read.
    async fn read_once(&self, path: &str) -> Result<Option<Value>>;

    /// One-shot point read delivered through the same queue as change
    /// notifications, after any writes queued before it.
    ///
    /// The engine uses this to confirm removals: by the time the callback
    /// runs, in-flight writes from the same operation have landed, so the
    /// value reflects where the key actually ended up.
    fn read_after_flush(&self, path: &str, callback: Box<dyn FnOnce(Option<Value>) + Send>);

    /// Subscribe to children of `path` whose name lies in `[start, end]`,
    /// ordered by `index_field`. Existing children are replayed through
    /// `listener.on_added`, then `listener.on_initial_sync` fires.
    fn subscribe_range(
        &self,
        path: &str,
        index_field: &str,
        start: &str,
        end: &str,
        listener: RangeListener,
    ) -> SubscriptionId;

    /// Release a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Drain queued notification deliveries, serially, until none remain.
    fn flush(&self);
}
