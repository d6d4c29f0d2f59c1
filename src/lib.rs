//! geo-live: real-time circular geospatial queries over an ordered
//! key-value store.
//!
//! The backing store only needs ordered range scans on one indexed field
//! plus child-level change notifications — no geospatial support. A query
//! circle is mapped onto a handful of lexicographic ranges over a geohash
//! index, and the set of keys inside the circle is maintained
//! incrementally as data changes, without ever materializing the whole
//! dataset client-side.
//!
//! # Architecture
//!
//! - [`geohash`] — encode/decode, neighbor lookup, haversine distance.
//! - [`covering`] — mapping a circle onto covering geohash intervals.
//! - [`store`] — the [`RangeStore`] collaborator trait and the bundled
//!   in-memory [`MemoryStore`].
//! - [`query`] — [`LiveQuery`]: per-key membership tracking, differential
//!   event emission, criteria updates, cancellation.
//! - [`map`] — [`GeoMap`]: keyed location writes with the dual
//!   location/index layout.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use geo_live::{GeoMap, Location, MemoryStore, QueryCriteria};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> geo_live::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let map = GeoMap::new(store);
//!
//! map.set("pickup", Some(Location::new(37.7853, -122.4054))).await?;
//!
//! let query = map.query(QueryCriteria::new(Location::new(37.79, -122.41), 5.0))?;
//! let registration = query.on_key_entered(|key, location, distance_km| {
//!     println!("{key} entered at [{}, {}] ({distance_km:.2} km)", location.lat, location.lon);
//! });
//! map.flush();
//!
//! registration.cancel();
//! query.cancel();
//! # Ok(())
//! # }
//! ```

pub mod covering;
pub mod error;
pub mod geohash;
pub mod map;
pub mod query;
pub mod store;
pub mod types;

pub use covering::{covering_intervals, CoveringInterval};
pub use error::{CriteriaError, GeoLiveError, GeohashError, Result, StoreError};
pub use map::{GeoMap, GeoMapConfig};
pub use query::{CallbackRegistration, LiveQuery, QueryEvent, QueryEventKind};
pub use store::{MemoryStore, RangeListener, RangeStore, SubscriptionId};
pub use types::{Location, QueryCriteria};
