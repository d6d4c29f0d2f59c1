//! [`GeoMap`] — the point-write surface over a [`RangeStore`].
//!
//! Each key is persisted twice: a location record at `locations/{key}`
//! holding the raw `[lat, lon]` pair, and an index record at
//! `indices/{geohash}{key}` carrying the same pair with the geohash as its
//! priority. The stored geohash length is fixed at the configured storage
//! precision, which is what lets a query split an index child name back
//! into its geohash and key. The dual write is not transactional; a
//! failure mid-sequence leaves the phases already written in place.

use std::sync::Arc;

use crate::error::{GeoLiveError, Result, StoreError};
use crate::geohash::{encode, DEFAULT_PRECISION};
use crate::query::LiveQuery;
use crate::store::RangeStore;
use crate::types::{Location, QueryCriteria};

// ============================================================================
// Configuration
// ============================================================================

/// Storage layout options for a [`GeoMap`].
#[derive(Debug, Clone)]
pub struct GeoMapConfig {
    /// Geohash length of persisted index records.
    pub storage_precision: usize,
    /// Path root for location records.
    pub locations_path: String,
    /// Path root for geohash index records.
    pub indices_path: String,
}

impl Default for GeoMapConfig {
    fn default() -> Self {
        Self {
            storage_precision: DEFAULT_PRECISION,
            locations_path: "locations".to_string(),
            indices_path: "indices".to_string(),
        }
    }
}

// ============================================================================
// GeoMap
// ============================================================================

/// Keyed location storage with live circular queries.
pub struct GeoMap {
    store: Arc<dyn RangeStore>,
    config: GeoMapConfig,
}

impl GeoMap {
    pub fn new(store: Arc<dyn RangeStore>) -> Self {
        Self::with_config(store, GeoMapConfig::default())
    }

    pub fn with_config(store: Arc<dyn RangeStore>, config: GeoMapConfig) -> Self {
        Self { store, config }
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || key.contains('/') {
            return Err(GeoLiveError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn location_path(&self, key: &str) -> String {
        format!("{}/{}", self.config.locations_path, key)
    }

    fn index_path(&self, geohash: &str, key: &str) -> String {
        format!("{}/{}{}", self.config.indices_path, geohash, key)
    }

    async fn read_location(&self, path: &str) -> Result<Option<Location>> {
        match self.store.read_once(path).await? {
            None => Ok(None),
            Some(value) => match serde_json::from_value::<Location>(value) {
                Ok(location) => Ok(Some(location)),
                Err(_) => Err(StoreError::Corrupt {
                    path: path.to_string(),
                }
                .into()),
            },
        }
    }

    /// Write or delete a key's location.
    ///
    /// All validation happens before the first store call. The write
    /// sequence deletes the stale index record first, then writes the
    /// location, then the fresh index record, and finally flushes the
    /// store's delivery queue so observers see the change.
    pub async fn set(&self, key: &str, location: Option<Location>) -> Result<()> {
        Self::validate_key(key)?;
        let Some(location) = location else {
            return self.remove(key).await;
        };
        location.validate()?;
        let geohash = encode(location, self.config.storage_precision)?;

        let location_path = self.location_path(key);
        let previous = self.read_location(&location_path).await?;
        if let Some(previous) = previous {
            let old_hash = encode(previous, self.config.storage_precision)?;
            if old_hash != geohash {
                self.store
                    .write(&self.index_path(&old_hash, key), None)
                    .await?;
            }
        }

        let value = serde_json::to_value(location)
            .map_err(|e| StoreError::sync(&location_path, Box::new(e)))?;
        self.store.write(&location_path, Some(value.clone())).await?;
        self.store
            .write_with_priority(&self.index_path(&geohash, key), value, &geohash)
            .await?;

        tracing::trace!(key, lat = location.lat, lon = location.lon, "location set");
        self.store.flush();
        Ok(())
    }

    /// Delete a key. Removing an absent key is a no-op.
    ///
    /// The location record goes first so that a query confirming the index
    /// removal observes the deletion, not a stale location. A record that
    /// does not parse is still deleted, so removal doubles as the repair
    /// path for corrupt records; its index entry cannot be derived and is
    /// left to the next write.
    pub async fn remove(&self, key: &str) -> Result<()> {
        Self::validate_key(key)?;
        let location_path = self.location_path(key);
        let previous = match self.store.read_once(&location_path).await? {
            None => return Ok(()),
            Some(value) => serde_json::from_value::<Location>(value).ok(),
        };

        self.store.write(&location_path, None).await?;
        if let Some(previous) = previous {
            let geohash = encode(previous, self.config.storage_precision)?;
            self.store.write(&self.index_path(&geohash, key), None).await?;
        } else {
            tracing::warn!(key, "removed a location record that did not parse");
        }

        tracing::trace!(key, "location removed");
        self.store.flush();
        Ok(())
    }

    /// Read a key's current location.
    pub async fn get(&self, key: &str) -> Result<Option<Location>> {
        Self::validate_key(key)?;
        self.read_location(&self.location_path(key)).await
    }

    /// Start a live circular query. The initial criteria must carry both a
    /// center and a radius.
    ///
    /// Existing matching keys and the ready notification are delivered on
    /// the next [`flush`](GeoMap::flush), after callbacks have been
    /// registered.
    pub fn query(&self, criteria: QueryCriteria) -> Result<LiveQuery> {
        LiveQuery::new(
            self.store.clone(),
            &self.config.locations_path,
            &self.config.indices_path,
            self.config.storage_precision,
            criteria,
        )
    }

    /// Drive the store's cooperative notification queue.
    pub fn flush(&self) {
        self.store.flush();
    }
}

// ============================================================================
// Tests
// ============================================================================
