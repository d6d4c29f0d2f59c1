//! The live query engine.
//!
//! A [`LiveQuery`] maintains the set of keys inside a circle by holding one
//! range subscription per covering interval and classifying every index
//! notification against the circle by exact distance. All shared state sits
//! behind a single mutex that is never held while user callbacks run:
//! classification happens under the lock, emission happens after it is
//! released, re-taking it per event so that a callback cancelling the query
//! suppresses the rest of the batch.
//!
//! Store listeners hold `Weak` references to the query core, so a store
//! that outlives its queries never keeps cancelled query state alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::covering::{covering_intervals, CoveringInterval};
use crate::error::{GeoLiveError, Result};
use crate::geohash::{distance_between, encode};
use crate::store::{RangeListener, RangeStore, SubscriptionId};
use crate::types::{Location, QueryCriteria, TrackedLocation};

use super::event::{QueryEvent, QueryEventKind};
use super::registration::CallbackRegistration;

/// Index field range subscriptions order by.
const PRIORITY_FIELD: &str = ".priority";

type EventCallback = Arc<dyn Fn(&QueryEvent) + Send + Sync>;

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Active,
    Cancelled,
}

struct IntervalState {
    interval: CoveringInterval,
    subscription: SubscriptionId,
    synced: bool,
}

struct QueryInner {
    state: QueryState,
    center: Location,
    radius_km: f64,
    /// One membership record per key across all intervals.
    tracked: HashMap<String, TrackedLocation>,
    /// Keyed by interval start prefix.
    intervals: HashMap<String, IntervalState>,
    listeners: HashMap<QueryEventKind, Vec<(u64, EventCallback)>>,
    next_listener: u64,
    ready_fired: bool,
}

pub(crate) struct QueryCore {
    store: Arc<dyn RangeStore>,
    locations_path: String,
    indices_path: String,
    storage_precision: usize,
    inner: Mutex<QueryInner>,
}

// ============================================================================
// LiveQuery — public handle
// ============================================================================

/// A standing circular query over a [`crate::GeoMap`]'s data.
///
/// Obtained from [`crate::GeoMap::query`]. Events are delivered to
/// callbacks registered with [`on`](LiveQuery::on) (or the typed
/// convenience variants) whenever the backing store flushes its
/// notification queue. The query runs until [`cancel`](LiveQuery::cancel).
pub struct LiveQuery {
    core: Arc<QueryCore>,
}

impl LiveQuery {
    pub(crate) fn new(
        store: Arc<dyn RangeStore>,
        locations_path: &str,
        indices_path: &str,
        storage_precision: usize,
        criteria: QueryCriteria,
    ) -> Result<Self> {
        let (center, radius_km) = criteria.validate_complete()?;
        let intervals = covering_intervals(center, radius_km, storage_precision)?;

        let core = Arc::new(QueryCore {
            store,
            locations_path: locations_path.to_string(),
            indices_path: indices_path.to_string(),
            storage_precision,
            inner: Mutex::new(QueryInner {
                state: QueryState::Active,
                center,
                radius_km,
                tracked: HashMap::new(),
                intervals: HashMap::new(),
                listeners: HashMap::new(),
                next_listener: 1,
                ready_fired: false,
            }),
        });

        {
            let mut inner = core.inner.lock();
            for interval in intervals {
                QueryCore::attach_interval(&core, &mut inner, interval);
            }
        }
        tracing::debug!(
            lat = center.lat,
            lon = center.lon,
            radius_km,
            "live query started"
        );

        Ok(Self { core })
    }

    /// Register a callback for one event kind.
    ///
    /// Registering for `Ready` after the query has already synchronized
    /// invokes the callback immediately. On a cancelled query the returned
    /// registration is inert and the callback will never fire.
    pub fn on(
        &self,
        kind: QueryEventKind,
        callback: impl Fn(&QueryEvent) + Send + Sync + 'static,
    ) -> CallbackRegistration {
        let callback: EventCallback = Arc::new(callback);
        let fire_ready_now;
        let id;
        {
            let mut inner = self.core.inner.lock();
            if inner.state == QueryState::Cancelled {
                return CallbackRegistration::inert();
            }
            id = inner.next_listener;
            inner.next_listener += 1;
            inner
                .listeners
                .entry(kind)
                .or_default()
                .push((id, callback.clone()));
            fire_ready_now = kind == QueryEventKind::Ready && inner.ready_fired;
        }
        if fire_ready_now {
            callback(&QueryEvent::Ready);
        }

        let weak = Arc::downgrade(&self.core);
        CallbackRegistration::new(move || {
            if let Some(core) = weak.upgrade() {
                let mut inner = core.inner.lock();
                if let Some(list) = inner.listeners.get_mut(&kind) {
                    list.retain(|(listener_id, _)| *listener_id != id);
                }
            }
        })
    }

    /// Register for the one-shot per-generation `ready` notification.
    pub fn on_ready(&self, callback: impl Fn() + Send + Sync + 'static) -> CallbackRegistration {
        self.on(QueryEventKind::Ready, move |_| callback())
    }

    pub fn on_key_entered(
        &self,
        callback: impl Fn(&str, Location, f64) + Send + Sync + 'static,
    ) -> CallbackRegistration {
        self.on(QueryEventKind::KeyEntered, move |event| {
            if let QueryEvent::KeyEntered {
                key,
                location,
                distance_km,
            } = event
            {
                callback(key, *location, *distance_km);
            }
        })
    }

    pub fn on_key_exited(
        &self,
        callback: impl Fn(&str, Option<Location>, Option<f64>) + Send + Sync + 'static,
    ) -> CallbackRegistration {
        self.on(QueryEventKind::KeyExited, move |event| {
            if let QueryEvent::KeyExited {
                key,
                location,
                distance_km,
            } = event
            {
                callback(key, *location, *distance_km);
            }
        })
    }

    pub fn on_key_moved(
        &self,
        callback: impl Fn(&str, Location, f64) + Send + Sync + 'static,
    ) -> CallbackRegistration {
        self.on(QueryEventKind::KeyMoved, move |event| {
            if let QueryEvent::KeyMoved {
                key,
                location,
                distance_km,
            } = event
            {
                callback(key, *location, *distance_km);
            }
        })
    }

    /// Update the query circle. Either field of `criteria` may be omitted
    /// to keep its current value.
    ///
    /// Keys whose membership changes under the new circle get a single
    /// `key_entered` or `key_exited`; unchanged keys emit nothing, and a
    /// criteria update never emits `key_moved`. Intervals added by the new
    /// circle start a fresh synchronization generation and `ready` fires
    /// again once they complete.
    pub fn update_criteria(&self, criteria: QueryCriteria) -> Result<()> {
        criteria.validate()?;

        let mut events = Vec::new();
        let mut released = Vec::new();
        {
            let mut inner = self.core.inner.lock();
            if inner.state == QueryState::Cancelled {
                return Err(GeoLiveError::QueryCancelled);
            }

            let center = criteria.center.unwrap_or(inner.center);
            let radius_km = criteria.radius_km.unwrap_or(inner.radius_km);
            let new_intervals = covering_intervals(center, radius_km, self.core.storage_precision)?;

            inner.center = center;
            inner.radius_km = radius_km;

            // Drop subscriptions the new circle no longer needs. The store
            // calls happen after the lock is released, as in cancel.
            let stale: Vec<String> = inner
                .intervals
                .keys()
                .filter(|start| !new_intervals.iter().any(|iv| &iv.start == *start))
                .cloned()
                .collect();
            for start in stale {
                if let Some(state) = inner.intervals.remove(&start) {
                    released.push(state.subscription);
                }
            }

            // Attach the new ones; any addition re-arms `ready`.
            let mut added = false;
            for interval in new_intervals {
                if !inner.intervals.contains_key(&interval.start) {
                    QueryCore::attach_interval(&self.core, &mut inner, interval);
                    added = true;
                }
            }
            if added {
                inner.ready_fired = false;
            }

            // Re-classify everything we track against the new circle.
            for (key, entry) in inner.tracked.iter_mut() {
                let distance_km = distance_between(entry.location, center);
                let in_range = distance_km <= radius_km;
                if in_range && !entry.in_query {
                    events.push(QueryEvent::KeyEntered {
                        key: key.clone(),
                        location: entry.location,
                        distance_km,
                    });
                } else if !in_range && entry.in_query {
                    events.push(QueryEvent::KeyExited {
                        key: key.clone(),
                        location: Some(entry.location),
                        distance_km: Some(distance_km),
                    });
                }
                entry.distance_km = distance_km;
                entry.in_query = in_range;
            }

            // Entries outside every interval can no longer receive
            // notifications; forget them. They are necessarily outside the
            // circle, so no event is owed.
            let covered: Vec<CoveringInterval> = inner
                .intervals
                .values()
                .map(|s| s.interval.clone())
                .collect();
            inner
                .tracked
                .retain(|_, entry| covered.iter().any(|iv| iv.covers(&entry.geohash)));
        }

        for id in released {
            self.core.store.unsubscribe(id);
        }
        self.core.emit(events);
        Ok(())
    }

    /// Stop the query: detach all subscriptions and callbacks and drop the
    /// tracked state. Idempotent, synchronous, and safe to call from inside
    /// one of the query's own callbacks.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.inner.lock().state == QueryState::Cancelled
    }

    /// Current query center.
    pub fn center(&self) -> Location {
        self.core.inner.lock().center
    }

    /// Current query radius in kilometers.
    pub fn radius_km(&self) -> f64 {
        self.core.inner.lock().radius_km
    }
}

// ============================================================================
// QueryCore — classification and emission
// ============================================================================

impl QueryCore {
    /// Subscribe one covering interval. Caller holds the lock.
    fn attach_interval(core: &Arc<QueryCore>, inner: &mut QueryInner, interval: CoveringInterval) {
        let listener = Self::make_listener(core, interval.start.clone());
        let subscription = core.store.subscribe_range(
            &core.indices_path,
            PRIORITY_FIELD,
            &interval.start,
            &interval.end,
            listener,
        );
        inner.intervals.insert(
            interval.start.clone(),
            IntervalState {
                interval,
                subscription,
                synced: false,
            },
        );
    }

    fn make_listener(core: &Arc<QueryCore>, interval_start: String) -> RangeListener {
        let added = Arc::downgrade(core);
        let changed = Arc::downgrade(core);
        let removed = Arc::downgrade(core);
        let synced = Arc::downgrade(core);
        RangeListener {
            on_added: Arc::new(move |name, value| {
                if let Some(core) = added.upgrade() {
                    core.handle_index_upsert(name, value);
                }
            }),
            on_changed: Arc::new(move |name, value| {
                if let Some(core) = changed.upgrade() {
                    core.handle_index_upsert(name, value);
                }
            }),
            on_removed: Arc::new(move |name| {
                if let Some(core) = removed.upgrade() {
                    core.handle_index_removed(name);
                }
            }),
            on_initial_sync: Arc::new(move || {
                if let Some(core) = synced.upgrade() {
                    core.handle_interval_synced(&interval_start);
                }
            }),
        }
    }

    /// Split an index child name into its geohash prefix and key. The
    /// stored geohash length is fixed at the storage precision, so the
    /// split point is constant.
    fn split_child_name<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)> {
        if name.len() <= self.storage_precision || !name.is_char_boundary(self.storage_precision) {
            return None;
        }
        Some(name.split_at(self.storage_precision))
    }

    fn handle_index_upsert(self: &Arc<Self>, name: &str, value: &Value) {
        let event;
        {
            let mut inner = self.inner.lock();
            if inner.state == QueryState::Cancelled {
                return;
            }
            let Some((geohash, key)) = self.split_child_name(name) else {
                tracing::warn!(name, "skipping malformed index child name");
                return;
            };
            let location = match serde_json::from_value::<Location>(value.clone()) {
                Ok(loc) if loc.is_valid() => loc,
                _ => {
                    tracing::warn!(name, %value, "skipping index record with malformed location");
                    return;
                }
            };

            let distance_km = distance_between(location, inner.center);
            let in_range = distance_km <= inner.radius_km;

            event = match inner.tracked.get(key) {
                Some(entry) if entry.in_query && in_range => {
                    if entry.location == location {
                        // Duplicate sighting through an overlapping
                        // interval; nothing changed.
                        None
                    } else {
                        Some(QueryEvent::KeyMoved {
                            key: key.to_string(),
                            location,
                            distance_km,
                        })
                    }
                }
                Some(entry) if entry.in_query && !in_range => Some(QueryEvent::KeyExited {
                    key: key.to_string(),
                    location: Some(location),
                    distance_km: Some(distance_km),
                }),
                _ if in_range => Some(QueryEvent::KeyEntered {
                    key: key.to_string(),
                    location,
                    distance_km,
                }),
                _ => None,
            };

            inner.tracked.insert(
                key.to_string(),
                TrackedLocation {
                    location,
                    distance_km,
                    in_query: in_range,
                    geohash: geohash.to_string(),
                },
            );
        }
        if let Some(event) = event {
            self.emit(vec![event]);
        }
    }

    /// An index-child removal is ambiguous: the key may be gone, or it may
    /// be mid-move (the writer deletes the old index record first). Confirm
    /// by reading the location record through the store's delivery queue,
    /// after any in-flight writes from the same operation have landed.
    fn handle_index_removed(self: &Arc<Self>, name: &str) {
        let location_path;
        let key;
        let geohash;
        {
            let inner = self.inner.lock();
            if inner.state == QueryState::Cancelled {
                return;
            }
            let Some((hash, child_key)) = self.split_child_name(name) else {
                return;
            };
            match inner.tracked.get(child_key) {
                // A stale removal for a cell the key already left.
                Some(entry) if entry.geohash != hash => return,
                Some(_) => {}
                None => return,
            }
            key = child_key.to_string();
            geohash = hash.to_string();
            location_path = format!("{}/{}", self.locations_path, key);
        }

        let weak = Arc::downgrade(self);
        self.store.read_after_flush(
            &location_path,
            Box::new(move |value| {
                if let Some(core) = weak.upgrade() {
                    core.confirm_removal(&key, &geohash, value);
                }
            }),
        );
    }

    fn confirm_removal(self: &Arc<Self>, key: &str, expected_geohash: &str, value: Option<Value>) {
        let event;
        {
            let mut inner = self.inner.lock();
            if inner.state == QueryState::Cancelled {
                return;
            }
            let Some(entry) = inner.tracked.get(key) else {
                return;
            };
            if entry.geohash != expected_geohash {
                // The key moved and the upsert path already reclassified it.
                return;
            }
            let was_in_query = entry.in_query;

            let surviving_location = value.and_then(|v| {
                serde_json::from_value::<Location>(v)
                    .ok()
                    .filter(Location::is_valid)
            });
            if let Some(location) = surviving_location {
                // Only trust the survivor if it would have escaped this
                // query's coverage; otherwise the add notification for the
                // new cell handles (or already handled) the reclassification.
                if let Ok(hash) = encode(location, self.storage_precision) {
                    if inner.intervals.values().any(|s| s.interval.covers(&hash)) {
                        return;
                    }
                }
                let distance_km = distance_between(location, inner.center);
                inner.tracked.remove(key);
                event = was_in_query.then(|| QueryEvent::KeyExited {
                    key: key.to_string(),
                    location: Some(location),
                    distance_km: Some(distance_km),
                });
            } else {
                // Deleted outright.
                inner.tracked.remove(key);
                event = was_in_query.then(|| QueryEvent::KeyExited {
                    key: key.to_string(),
                    location: None,
                    distance_km: None,
                });
            }
        }
        if let Some(event) = event {
            self.emit(vec![event]);
        }
    }

    fn handle_interval_synced(self: &Arc<Self>, interval_start: &str) {
        let fire_ready;
        {
            let mut inner = self.inner.lock();
            if inner.state == QueryState::Cancelled {
                return;
            }
            // A sync notification for an interval dropped by a criteria
            // update is stale; ignore it.
            let Some(state) = inner.intervals.get_mut(interval_start) else {
                return;
            };
            state.synced = true;

            fire_ready = !inner.ready_fired && inner.intervals.values().all(|s| s.synced);
            if fire_ready {
                inner.ready_fired = true;
            }
        }
        if fire_ready {
            self.emit(vec![QueryEvent::Ready]);
        }
    }

    /// Emit events with no lock held. Listeners are snapshotted per event,
    /// so a callback that cancels the query suppresses the rest of the
    /// batch.
    fn emit(&self, events: Vec<QueryEvent>) {
        for event in events {
            let callbacks: Vec<EventCallback> = {
                let inner = self.inner.lock();
                if inner.state == QueryState::Cancelled {
                    return;
                }
                inner
                    .listeners
                    .get(&event.kind())
                    .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                    .unwrap_or_default()
            };
            for callback in &callbacks {
                callback(&event);
            }
        }
    }

    fn cancel(&self) {
        let subscriptions: Vec<SubscriptionId>;
        {
            let mut inner = self.inner.lock();
            if inner.state == QueryState::Cancelled {
                return;
            }
            inner.state = QueryState::Cancelled;
            subscriptions = inner
                .intervals
                .drain()
                .map(|(_, s)| s.subscription)
                .collect();
            inner.tracked.clear();
            inner.listeners.clear();
        }
        for id in subscriptions {
            self.store.unsubscribe(id);
        }
        tracing::debug!("live query cancelled");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geohash::DEFAULT_PRECISION;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    fn make_log() -> Arc<StdMutex<Vec<String>>> {
        Arc::new(StdMutex::new(Vec::new()))
    }

    async fn write_point(store: &Arc<MemoryStore>, key: &str, lat: f64, lon: f64) {
        let location = Location::new(lat, lon);
        let hash = encode(location, DEFAULT_PRECISION).unwrap();
        let value = serde_json::to_value(location).unwrap();
        store
            .write(&format!("locations/{key}"), Some(value.clone()))
            .await
            .unwrap();
        store
            .write_with_priority(&format!("indices/{hash}{key}"), value, &hash)
            .await
            .unwrap();
    }

    fn start_query(store: &Arc<MemoryStore>, lat: f64, lon: f64, radius_km: f64) -> LiveQuery {
        LiveQuery::new(
            store.clone() as Arc<dyn RangeStore>,
            "locations",
            "indices",
            DEFAULT_PRECISION,
            QueryCriteria::new(Location::new(lat, lon), radius_km),
        )
        .unwrap()
    }

    fn record_all(query: &LiveQuery, log: &Arc<StdMutex<Vec<String>>>) -> Vec<CallbackRegistration> {
        let (l1, l2, l3, l4) = (log.clone(), log.clone(), log.clone(), log.clone());
        vec![
            query.on_ready(move || l1.lock().unwrap().push("ready".to_string())),
            query.on_key_entered(move |key, _, _| {
                l2.lock().unwrap().push(format!("entered:{key}"));
            }),
            query.on_key_exited(move |key, _, _| {
                l3.lock().unwrap().push(format!("exited:{key}"));
            }),
            query.on_key_moved(move |key, _, _| {
                l4.lock().unwrap().push(format!("moved:{key}"));
            }),
        ]
    }

    #[tokio::test]
    async fn existing_key_inside_circle_enters_before_ready() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "loc1", 0.0, 0.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();

        assert_eq!(*log.lock().unwrap(), vec!["entered:loc1", "ready"]);
    }

    #[tokio::test]
    async fn key_outside_circle_emits_nothing() {
        let store = Arc::new(MemoryStore::new());
        // Inside a covering interval but well outside the circle.
        write_point(&store, "far", 8.0, 2.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 100.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();

        assert_eq!(*log.lock().unwrap(), vec!["ready"]);
    }

    #[tokio::test]
    async fn ready_callback_after_sync_fires_immediately() {
        let store = Arc::new(MemoryStore::new());
        let query = start_query(&store, 1.0, 2.0, 1000.0);
        store.flush();

        let log = make_log();
        let l = log.clone();
        let _reg = query.on_ready(move || l.lock().unwrap().push("ready".to_string()));
        // No flush needed; delivery is immediate.
        assert_eq!(*log.lock().unwrap(), vec!["ready"]);
    }

    #[tokio::test]
    async fn in_circle_move_emits_exactly_one_moved() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "loc1", 0.0, 0.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();
        log.lock().unwrap().clear();

        // Move to a different cell, still inside the circle. The old index
        // record is deleted first, as the writer does.
        let old_hash = encode(Location::new(0.0, 0.0), DEFAULT_PRECISION).unwrap();
        store
            .write(&format!("indices/{old_hash}loc1"), None)
            .await
            .unwrap();
        write_point(&store, "loc1", 2.0, 2.0).await;
        store.flush();

        assert_eq!(*log.lock().unwrap(), vec!["moved:loc1"]);
    }

    #[tokio::test]
    async fn moving_out_of_circle_emits_one_exited() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "loc1", 0.0, 0.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();
        log.lock().unwrap().clear();

        let old_hash = encode(Location::new(0.0, 0.0), DEFAULT_PRECISION).unwrap();
        store
            .write(&format!("indices/{old_hash}loc1"), None)
            .await
            .unwrap();
        write_point(&store, "loc1", 80.0, 80.0).await;
        store.flush();

        assert_eq!(*log.lock().unwrap(), vec!["exited:loc1"]);
    }

    #[tokio::test]
    async fn deleting_a_key_emits_exited_with_no_location() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "loc1", 0.0, 0.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let exits = Arc::new(StdMutex::new(Vec::new()));
        let e = exits.clone();
        let _reg = query.on_key_exited(move |key, location, distance| {
            e.lock()
                .unwrap()
                .push((key.to_string(), location, distance));
        });
        store.flush();

        // Location first, then index, as the writer does.
        let hash = encode(Location::new(0.0, 0.0), DEFAULT_PRECISION).unwrap();
        store.write("locations/loc1", None).await.unwrap();
        store
            .write(&format!("indices/{hash}loc1"), None)
            .await
            .unwrap();
        store.flush();

        assert_eq!(*exits.lock().unwrap(), vec![("loc1".to_string(), None, None)]);
    }

    #[tokio::test]
    async fn duplicate_sightings_from_overlapping_intervals_report_once() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "loc1", 0.0, 0.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();
        log.lock().unwrap().clear();

        // Re-notify the same location through a changed event.
        write_point(&store, "loc1", 0.0, 0.0).await;
        store.flush();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn shrink_emits_exactly_one_exited_per_departed_key() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "near", 1.0, 2.0).await;
        write_point(&store, "edge", 2.0, 2.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();
        log.lock().unwrap().clear();

        // "edge" is ~111 km out; shrink below that. The finer circle uses
        // new intervals, so a second ready follows their replay.
        query
            .update_criteria(QueryCriteria::with_radius(50.0))
            .unwrap();
        store.flush();

        assert_eq!(*log.lock().unwrap(), vec!["exited:edge", "ready"]);
    }

    #[tokio::test]
    async fn grow_re_admits_retained_entries() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "edge", 2.0, 2.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 50.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();
        assert_eq!(*log.lock().unwrap(), vec!["ready"]);
        log.lock().unwrap().clear();

        query
            .update_criteria(QueryCriteria::with_radius(200.0))
            .unwrap();
        store.flush();

        let events = log.lock().unwrap().clone();
        assert!(events.contains(&"entered:edge".to_string()), "{events:?}");
        // No spurious moved for a criteria change.
        assert!(!events.iter().any(|e| e.starts_with("moved")), "{events:?}");
    }

    #[tokio::test]
    async fn update_criteria_with_new_intervals_re_fires_ready() {
        let store = Arc::new(MemoryStore::new());
        let query = start_query(&store, 1.0, 2.0, 50.0);
        let log = make_log();
        let l = log.clone();
        let _reg = query.on_ready(move || l.lock().unwrap().push("ready".to_string()));
        store.flush();
        assert_eq!(*log.lock().unwrap(), vec!["ready"]);

        // Move far away; entirely new intervals, new generation.
        query
            .update_criteria(QueryCriteria::with_center(Location::new(50.0, 50.0)))
            .unwrap();
        store.flush();
        assert_eq!(*log.lock().unwrap(), vec!["ready", "ready"]);
    }

    #[tokio::test]
    async fn update_criteria_on_cancelled_query_errors() {
        let store = Arc::new(MemoryStore::new());
        let query = start_query(&store, 1.0, 2.0, 50.0);
        query.cancel();
        let err = query
            .update_criteria(QueryCriteria::with_radius(10.0))
            .unwrap_err();
        assert!(matches!(err, GeoLiveError::QueryCancelled));
    }

    /// Delegates to a [`MemoryStore`] but runs a hook from `unsubscribe`,
    /// standing in for a store whose release path inspects the query.
    struct ReentrantReleaseStore {
        inner: Arc<MemoryStore>,
        on_unsubscribe: StdMutex<Option<Box<dyn Fn() + Send>>>,
    }

    #[async_trait]
    impl RangeStore for ReentrantReleaseStore {
        async fn write(&self, path: &str, value: Option<Value>) -> crate::error::Result<()> {
            self.inner.write(path, value).await
        }

        async fn write_with_priority(
            &self,
            path: &str,
            value: Value,
            priority: &str,
        ) -> crate::error::Result<()> {
            self.inner.write_with_priority(path, value, priority).await
        }

        async fn read_once(&self, path: &str) -> crate::error::Result<Option<Value>> {
            self.inner.read_once(path).await
        }

        fn read_after_flush(&self, path: &str, callback: Box<dyn FnOnce(Option<Value>) + Send>) {
            self.inner.read_after_flush(path, callback);
        }

        fn subscribe_range(
            &self,
            path: &str,
            index_field: &str,
            start: &str,
            end: &str,
            listener: RangeListener,
        ) -> SubscriptionId {
            self.inner.subscribe_range(path, index_field, start, end, listener)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            if let Some(hook) = &*self.on_unsubscribe.lock().unwrap() {
                hook();
            }
            self.inner.unsubscribe(id);
        }

        fn flush(&self) {
            self.inner.flush();
        }
    }

    #[tokio::test]
    async fn criteria_updates_release_subscriptions_outside_the_query_lock() {
        let store = Arc::new(ReentrantReleaseStore {
            inner: Arc::new(MemoryStore::new()),
            on_unsubscribe: StdMutex::new(None),
        });
        let query = Arc::new(
            LiveQuery::new(
                store.clone() as Arc<dyn RangeStore>,
                "locations",
                "indices",
                DEFAULT_PRECISION,
                QueryCriteria::new(Location::new(1.0, 2.0), 50.0),
            )
            .unwrap(),
        );

        // Reading query state from the release path must not deadlock
        // against the criteria-update critical section.
        let observer = query.clone();
        *store.on_unsubscribe.lock().unwrap() = Some(Box::new(move || {
            let _ = observer.radius_km();
        }));

        // Moving the center far away drops every old interval.
        query
            .update_criteria(QueryCriteria::with_center(Location::new(50.0, 50.0)))
            .unwrap();
        assert_eq!(query.center(), Location::new(50.0, 50.0));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_silences_callbacks() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "loc1", 0.0, 0.0).await;
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        query.cancel();
        query.cancel();
        store.flush();

        assert!(log.lock().unwrap().is_empty());
        assert!(query.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_from_inside_a_callback_is_safe() {
        let store = Arc::new(MemoryStore::new());
        write_point(&store, "a", 1.0, 2.0).await;
        write_point(&store, "b", 1.1, 2.0).await;
        store.flush();

        let query = Arc::new(start_query(&store, 1.0, 2.0, 1000.0));
        let entered = Arc::new(StdMutex::new(0usize));
        let e = entered.clone();
        let q = query.clone();
        let _reg = query.on_key_entered(move |_, _, _| {
            *e.lock().unwrap() += 1;
            q.cancel();
        });
        store.flush();

        // The first entered callback cancels; the second key's event is
        // suppressed.
        assert_eq!(*entered.lock().unwrap(), 1);
        assert!(query.is_cancelled());
    }

    #[tokio::test]
    async fn registration_cancel_detaches_only_that_callback() {
        let store = Arc::new(MemoryStore::new());
        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let (l1, l2) = (log.clone(), log.clone());
        let first = query.on_key_entered(move |key, _, _| {
            l1.lock().unwrap().push(format!("first:{key}"));
        });
        let _second = query.on_key_entered(move |key, _, _| {
            l2.lock().unwrap().push(format!("second:{key}"));
        });
        first.cancel();
        first.cancel();

        write_point(&store, "loc1", 1.0, 2.0).await;
        store.flush();

        assert_eq!(*log.lock().unwrap(), vec!["second:loc1"]);
    }

    #[tokio::test]
    async fn malformed_index_records_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let hash = encode(Location::new(1.0, 2.0), DEFAULT_PRECISION).unwrap();
        // Value is not a [lat, lon] pair.
        store
            .write_with_priority(
                &format!("indices/{hash}bad"),
                serde_json::json!({"x": 1}),
                &hash,
            )
            .await
            .unwrap();
        // Name too short to contain a full geohash prefix.
        store
            .write_with_priority("indices/s", serde_json::json!([1.0, 2.0]), "s")
            .await
            .unwrap();
        store.flush();

        let query = start_query(&store, 1.0, 2.0, 1000.0);
        let log = make_log();
        let _regs = record_all(&query, &log);
        store.flush();

        assert_eq!(*log.lock().unwrap(), vec!["ready"]);
    }
}
