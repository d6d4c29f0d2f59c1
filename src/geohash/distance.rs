//! Great-circle distance via the haversine formula.

use crate::types::Location;

/// Earth's mean radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometers.
///
/// Exactly zero for identical inputs and symmetric in its arguments.
pub fn distance_between(a: Location, b: Location) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_points_are_exactly_zero() {
        for loc in [
            Location::new(0.0, 0.0),
            Location::new(37.7853074, -122.4054274),
            Location::new(-90.0, -180.0),
        ] {
            assert_eq!(distance_between(loc, loc), 0.0);
        }
    }

    #[test]
    fn symmetric() {
        let a = Location::new(51.5007, -0.1246);
        let b = Location::new(40.6892, -74.0445);
        assert_eq!(distance_between(a, b), distance_between(b, a));
    }

    #[test]
    fn antipodal_poles() {
        let d = distance_between(Location::new(-90.0, -180.0), Location::new(90.0, 180.0));
        assert!((d - 20015.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn known_distance_london_to_new_york() {
        // Big Ben to the Statue of Liberty, roughly 5575 km.
        let d = distance_between(
            Location::new(51.5007, -0.1246),
            Location::new(40.6892, -74.0445),
        );
        assert!((d - 5575.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn short_distances_scale_with_latitude_degree() {
        // One degree of latitude is about 111 km anywhere on the globe.
        let d = distance_between(Location::new(10.0, 20.0), Location::new(11.0, 20.0));
        assert!((d - 111.2).abs() < 1.0, "got {d}");
    }
}
