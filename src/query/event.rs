//! Query event payloads.

use crate::types::Location;

/// The kind of a [`QueryEvent`], used to register callbacks for a single
/// event family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryEventKind {
    Ready,
    KeyEntered,
    KeyExited,
    KeyMoved,
}

/// An event emitted by a live query.
///
/// `KeyExited` carries `None` for location and distance when the key was
/// deleted from the store outright; when the key moved out of the circle
/// the last observed location and its distance from the center are given.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// All covering intervals have completed their initial synchronization.
    Ready,
    KeyEntered {
        key: String,
        location: Location,
        distance_km: f64,
    },
    KeyExited {
        key: String,
        location: Option<Location>,
        distance_km: Option<f64>,
    },
    KeyMoved {
        key: String,
        location: Location,
        distance_km: f64,
    },
}

impl QueryEvent {
    pub fn kind(&self) -> QueryEventKind {
        match self {
            QueryEvent::Ready => QueryEventKind::Ready,
            QueryEvent::KeyEntered { .. } => QueryEventKind::KeyEntered,
            QueryEvent::KeyExited { .. } => QueryEventKind::KeyExited,
            QueryEvent::KeyMoved { .. } => QueryEventKind::KeyMoved,
        }
    }

    /// The key this event concerns, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            QueryEvent::Ready => None,
            QueryEvent::KeyEntered { key, .. }
            | QueryEvent::KeyExited { key, .. }
            | QueryEvent::KeyMoved { key, .. } => Some(key),
        }
    }
}
