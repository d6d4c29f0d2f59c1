//! Covering-interval computation — mapping a query circle onto a small set
//! of lexicographic ranges over the geohash index.
//!
//! The precision is chosen so that a single cell's shortest bounding-box
//! edge is at least the query diameter; the center cell and its eight
//! neighbors (a 3×3 block) are then guaranteed to contain the circle. Each
//! distinct cell becomes one interval `[hash, hash + '~']` — `'~'` sorts
//! after every base-32 character, so the range matches exactly the children
//! carrying that prefix. The union over-approximates the circle by design;
//! membership is always finalized by exact distance, never by interval.

use std::collections::BTreeSet;

use crate::error::GeohashError;
use crate::geohash::{encode, neighbors, MAX_PRECISION};
use crate::types::Location;

/// Lexicographic upper-bound suffix; sorts after any geohash character.
pub const INTERVAL_END_SUFFIX: char = '~';

/// Shortest bounding-box edge, in kilometers, of a geohash cell at each
/// precision `1..=22` (equatorial worst case; cells only get wider toward
/// the equator, never shorter).
const CELL_EDGE_KM: [f64; MAX_PRECISION] = [
    4975.83,
    621.979,
    155.495,
    19.4368,
    4.85921,
    0.607401,
    0.15185,
    0.0189813,
    4.74532e-3,
    5.93165e-4,
    1.48291e-4,
    1.85364e-5,
    4.63410e-6,
    5.79263e-7,
    1.44816e-7,
    1.81020e-8,
    4.52549e-9,
    5.65686e-10,
    1.41422e-10,
    1.76777e-11,
    4.41942e-12,
    5.52428e-13,
];

/// A contiguous lexicographic range over the geohash index, used as a
/// store-level range filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoveringInterval {
    pub start: String,
    pub end: String,
}

impl CoveringInterval {
    fn from_prefix(prefix: &str) -> Self {
        let mut end = String::with_capacity(prefix.len() + 1);
        end.push_str(prefix);
        end.push(INTERVAL_END_SUFFIX);
        Self {
            start: prefix.to_string(),
            end,
        }
    }

    /// Whether a stored geohash falls inside this interval.
    pub fn covers(&self, geohash: &str) -> bool {
        geohash.starts_with(&self.start)
    }
}

/// The largest precision whose cells are still at least `2 * radius_km`
/// along their shortest edge.
///
/// Falls back to precision 1 for radii too large for any cell — the 3×3
/// block at precision 1 is then the best available cover.
pub fn precision_for_radius(radius_km: f64) -> usize {
    let diameter = 2.0 * radius_km;
    let mut best = 1;
    for (i, &edge) in CELL_EDGE_KM.iter().enumerate() {
        if edge >= diameter {
            best = i + 1;
        } else {
            break;
        }
    }
    best
}

/// Compute the minimal set of covering intervals for a circle.
///
/// `max_precision` clamps the query precision to the storage precision: a
/// prefix longer than the stored geohash could never match an index child.
/// Neighbors that fall off the grid (pole/antimeridian exhaustion) are
/// dropped, and duplicates collapse — the result is sorted and distinct.
pub fn covering_intervals(
    center: Location,
    radius_km: f64,
    max_precision: usize,
) -> Result<Vec<CoveringInterval>, GeohashError> {
    let precision = precision_for_radius(radius_km).min(max_precision).max(1);
    let center_hash = encode(center, precision)?;

    let mut prefixes: BTreeSet<String> = BTreeSet::new();
    for hash in neighbors(&center_hash)? {
        if !hash.is_empty() {
            prefixes.insert(hash);
        }
    }
    prefixes.insert(center_hash);

    Ok(prefixes
        .iter()
        .map(|p| CoveringInterval::from_prefix(p))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_shrinks_with_radius() {
        assert_eq!(precision_for_radius(1000.0), 1);
        assert_eq!(precision_for_radius(300.0), 2);
        assert_eq!(precision_for_radius(50.0), 3);
        assert_eq!(precision_for_radius(1.0), 5);
        assert_eq!(precision_for_radius(0.05), 7);
    }

    #[test]
    fn precision_for_zero_radius_is_finest() {
        assert_eq!(precision_for_radius(0.0), MAX_PRECISION);
    }

    #[test]
    fn precision_for_huge_radius_is_coarsest() {
        assert_eq!(precision_for_radius(10_000.0), 1);
    }

    #[test]
    fn intervals_use_tilde_upper_bound() {
        let intervals = covering_intervals(Location::new(1.0, 2.0), 1000.0, 12).unwrap();
        for interval in &intervals {
            assert_eq!(interval.end, format!("{}~", interval.start));
        }
    }

    #[test]
    fn equatorial_block_has_nine_intervals() {
        let intervals = covering_intervals(Location::new(1.0, 2.0), 1000.0, 12).unwrap();
        assert_eq!(intervals.len(), 9);
        assert!(intervals.iter().any(|i| i.start == "s"));
    }

    #[test]
    fn pole_neighbors_are_dropped_not_emitted_empty() {
        // Near the north pole several 3×3 cells fall off the grid.
        let intervals = covering_intervals(Location::new(89.0, 0.0), 3000.0, 12).unwrap();
        assert!(intervals.len() < 9);
        assert!(intervals.iter().all(|i| !i.start.is_empty()));
    }

    #[test]
    fn duplicates_collapse() {
        let intervals = covering_intervals(Location::new(0.0, 0.0), 100.0, 12).unwrap();
        let mut starts: Vec<_> = intervals.iter().map(|i| i.start.clone()).collect();
        let before = starts.len();
        starts.dedup();
        assert_eq!(before, starts.len());
    }

    #[test]
    fn precision_clamped_to_storage() {
        let intervals = covering_intervals(Location::new(1.0, 2.0), 0.0, 12).unwrap();
        for interval in &intervals {
            assert_eq!(interval.start.len(), 12);
        }
    }

    #[test]
    fn covers_is_prefix_membership() {
        let interval = CoveringInterval::from_prefix("9q8");
        assert!(interval.covers("9q8yywe56gcf"));
        assert!(!interval.covers("9q9yywe56gcf"));
    }

    #[test]
    fn circle_is_contained_in_interval_union() {
        // Sample points on the circle boundary and check each one's stored
        // geohash lands in some interval.
        let center = Location::new(37.0, -122.0);
        let radius = 25.0;
        let intervals = covering_intervals(center, radius, 12).unwrap();

        for i in 0..36 {
            let angle = f64::from(i) * 10.0_f64.to_radians();
            // Rough degree offsets; stay just inside the radius.
            let lat = center.lat + (radius * 0.95 / 110.574) * angle.cos();
            let lon =
                center.lon + (radius * 0.95 / (111.320 * center.lat.to_radians().cos())) * angle.sin();
            let hash = encode(Location::new(lat, lon), 12).unwrap();
            assert!(
                intervals.iter().any(|iv| iv.covers(&hash)),
                "boundary point [{lat}, {lon}] not covered"
            );
        }
    }
}
