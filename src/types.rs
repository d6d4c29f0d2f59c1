//! Core value types: [`Location`], [`QueryCriteria`], [`TrackedLocation`].

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CriteriaError, GeohashError};

// ============================================================================
// Location
// ============================================================================

/// A latitude/longitude pair in degrees.
///
/// Serializes as a raw `[lat, lon]` JSON array — the persisted wire form of
/// a location record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check coordinate ranges: lat ∈ [-90, 90], lon ∈ [-180, 180], both
    /// finite.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    pub fn validate(&self) -> Result<(), GeohashError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(GeohashError::InvalidLocation {
                lat: self.lat,
                lon: self.lon,
            })
        }
    }
}

impl From<(f64, f64)> for Location {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.lat, self.lon).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Location {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v.as_array() {
            Some(arr) if arr.len() == 2 => {
                let lat = arr[0]
                    .as_f64()
                    .ok_or_else(|| D::Error::custom("latitude is not a number"))?;
                let lon = arr[1]
                    .as_f64()
                    .ok_or_else(|| D::Error::custom("longitude is not a number"))?;
                Ok(Self { lat, lon })
            }
            _ => Err(D::Error::custom("expected a [lat, lon] pair")),
        }
    }
}

// ============================================================================
// QueryCriteria
// ============================================================================

/// Criteria for a circular query: a center point and a radius in kilometers.
///
/// Both fields are optional so that [`crate::LiveQuery::update_criteria`]
/// can update either independently; the initial criteria passed to
/// [`crate::GeoMap::query`] must supply both. Unknown fields are rejected
/// during deserialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center: Option<Location>,
    #[serde(default, rename = "radius", skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
}

impl QueryCriteria {
    /// Criteria with both fields set.
    pub fn new(center: Location, radius_km: f64) -> Self {
        Self {
            center: Some(center),
            radius_km: Some(radius_km),
        }
    }

    /// Criteria updating only the center.
    pub fn with_center(center: Location) -> Self {
        Self {
            center: Some(center),
            radius_km: None,
        }
    }

    /// Criteria updating only the radius.
    pub fn with_radius(radius_km: f64) -> Self {
        Self {
            center: None,
            radius_km: Some(radius_km),
        }
    }

    /// Validate the fields that are present. At least one must be.
    pub fn validate(&self) -> Result<(), CriteriaError> {
        if self.center.is_none() && self.radius_km.is_none() {
            return Err(CriteriaError::Empty);
        }
        if let Some(center) = self.center {
            if !center.is_valid() {
                return Err(CriteriaError::InvalidCenter {
                    lat: center.lat,
                    lon: center.lon,
                });
            }
        }
        if let Some(radius) = self.radius_km {
            if !radius.is_finite() || radius < 0.0 {
                return Err(CriteriaError::InvalidRadius(radius));
            }
        }
        Ok(())
    }

    /// Validate and require both fields, for initial query construction.
    pub fn validate_complete(&self) -> Result<(Location, f64), CriteriaError> {
        self.validate()?;
        match (self.center, self.radius_km) {
            (Some(center), Some(radius)) => Ok((center, radius)),
            _ => Err(CriteriaError::Empty),
        }
    }
}

// ============================================================================
// TrackedLocation
// ============================================================================

/// Per-key membership state held by a live query.
///
/// One record per key across all of the query's covering intervals — never
/// per interval — which is what makes classification idempotent when
/// overlapping intervals report the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedLocation {
    pub location: Location,
    pub distance_km: f64,
    pub in_query: bool,
    pub geohash: String,
}

// ============================================================================
// Tests
// ============================================================================
