//! Geohash codec — base-32 cell encoding over recursively halved
//! latitude/longitude space.
//!
//! # Modules
//!
//! - [`codec`] — [`encode`] / [`decode`] between locations and hashes.
//! - [`neighbor`] — adjacent-cell lookup via fixed transition tables.
//! - [`distance`] — great-circle distance ([`distance_between`]).
//!
//! Shared prefixes imply spatial proximity, which is what makes a geohash
//! usable as the sortable index value behind lexicographic range scans.

pub mod codec;
pub mod distance;
pub mod neighbor;

pub use codec::{decode, encode, BASE32, DEFAULT_PRECISION, MAX_PRECISION};
pub use distance::{distance_between, EARTH_RADIUS_KM};
pub use neighbor::{neighbor, neighbors, Direction};
