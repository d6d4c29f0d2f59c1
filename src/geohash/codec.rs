//! Geohash encoding and decoding.
//!
//! A hash is built by interleaved binary subdivision of the longitude and
//! latitude ranges, longitude first; every accumulated 5-bit group maps
//! through the base-32 alphabet. Decoding reverses the halving and returns
//! the centroid of the final cell.

use crate::error::GeohashError;
use crate::types::Location;

/// The geohash base-32 alphabet. Note the absence of `a`, `i`, `l`, `o`.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Geohash length used for storage indexing.
pub const DEFAULT_PRECISION: usize = 12;

/// Upper bound on supported precision.
pub const MAX_PRECISION: usize = 22;

/// Position of `c` in the base-32 alphabet, or `None` if it is not a
/// geohash character.
pub(crate) fn alphabet_index(c: char) -> Option<usize> {
    BASE32.iter().position(|&b| b as char == c)
}

/// Validate a hash string: non-empty, every character in the alphabet.
pub(crate) fn validate_hash(hash: &str) -> Result<(), GeohashError> {
    if hash.is_empty() {
        return Err(GeohashError::invalid_geohash(hash, "hash is empty"));
    }
    for c in hash.chars() {
        if alphabet_index(c).is_none() {
            return Err(GeohashError::invalid_geohash(
                hash,
                format!("character '{c}' is not in the geohash alphabet"),
            ));
        }
    }
    Ok(())
}

/// Encode `location` as a geohash of `precision` characters.
pub fn encode(location: Location, precision: usize) -> Result<String, GeohashError> {
    location.validate()?;
    if precision == 0 || precision > MAX_PRECISION {
        return Err(GeohashError::InvalidPrecision(precision));
    }

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut even = true; // longitude bits on even steps
    let mut bits = 0u32;
    let mut value = 0usize;

    while hash.len() < precision {
        let (coord, range) = if even {
            (location.lon, &mut lon_range)
        } else {
            (location.lat, &mut lat_range)
        };
        let mid = (range.0 + range.1) / 2.0;
        if coord >= mid {
            value = value * 2 + 1;
            range.0 = mid;
        } else {
            value *= 2;
            range.1 = mid;
        }
        even = !even;
        bits += 1;
        if bits == 5 {
            hash.push(BASE32[value] as char);
            bits = 0;
            value = 0;
        }
    }

    Ok(hash)
}

/// Decode `hash` to the centroid of its cell.
pub fn decode(hash: &str) -> Result<Location, GeohashError> {
    validate_hash(hash)?;

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in hash.chars() {
        // validate_hash guarantees membership
        let value = alphabet_index(c).unwrap_or(0);
        for shift in (0..5).rev() {
            let bit = (value >> shift) & 1;
            let range = if even { &mut lon_range } else { &mut lat_range };
            let mid = (range.0 + range.1) / 2.0;
            if bit == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }

    Ok(Location {
        lat: (lat_range.0 + lat_range.1) / 2.0,
        lon: (lon_range.0 + lon_range.1) / 2.0,
    })
}

/// Width and height, in degrees, of a cell at `precision`.
///
/// Used to bound the decode error: the centroid is within half a cell of
/// the original point.
pub(crate) fn cell_size_degrees(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as u32;
    let lon_bits = bits.div_ceil(2);
    let lat_bits = bits / 2;
    (
        360.0 / 2f64.powi(lon_bits as i32),
        180.0 / 2f64.powi(lat_bits as i32),
    )
}
