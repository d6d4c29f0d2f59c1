use thiserror::Error;

// ---------------------------------------------------------------------------
// GeohashError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GeohashError {
    #[error("Invalid location [{lat}, {lon}]: latitude must be in [-90, 90] and longitude in [-180, 180], both finite")]
    InvalidLocation { lat: f64, lon: f64 },

    #[error("Invalid geohash \"{hash}\": {reason}")]
    InvalidGeohash { hash: String, reason: String },

    #[error("Invalid precision {0}: must be between 1 and 22")]
    InvalidPrecision(usize),
}

impl GeohashError {
    pub(crate) fn invalid_geohash(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeohash {
            hash: hash.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// CriteriaError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("Query criteria must specify at least one of center or radius")]
    Empty,

    #[error("Invalid query center [{lat}, {lon}]: latitude must be in [-90, 90] and longitude in [-180, 180], both finite")]
    InvalidCenter { lat: f64, lon: f64 },

    #[error("Invalid query radius {0}: must be a finite, non-negative number of kilometers")]
    InvalidRadius(f64),
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store synchronization failed at \"{path}\"")]
    Sync {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Corrupt record at \"{path}\": expected a [lat, lon] pair")]
    Corrupt { path: String },
}

impl StoreError {
    pub fn sync(
        path: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Sync {
            path: path.into(),
            source: source.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GeoLiveError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GeoLiveError {
    #[error("Invalid key \"{0}\": keys must be non-empty and must not contain '/'")]
    InvalidKey(String),

    #[error("Query has been cancelled")]
    QueryCancelled,

    #[error(transparent)]
    Geohash(#[from] GeohashError),

    #[error(transparent)]
    Criteria(#[from] CriteriaError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convenience alias — the default error type is `GeoLiveError`.
pub type Result<T, E = GeoLiveError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
