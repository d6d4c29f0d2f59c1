//! Adjacent-cell lookup.
//!
//! The transition tables are the classic per-direction character maps: the
//! `NEIGHBORS` string for a direction gives, at the position of the last
//! hash character, its replacement in the adjacent cell; `BORDERS` lists
//! the characters on the cell grid's edge in that direction, where the
//! carry has to propagate into the parent cell. Odd and even hash lengths
//! swap the latitude/longitude roles, so each direction carries two tables.

use crate::error::GeohashError;

use super::codec::{validate_hash, BASE32};

/// A cardinal direction on the geohash grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

// Even-length tables; odd-length tables are the even tables of the
// perpendicular direction (north/east and south/west swap).
const NEIGHBOR_NORTH_EVEN: &str = "p0r21436x8zb9dcf5h7kjnmqesgutwvy";
const NEIGHBOR_SOUTH_EVEN: &str = "14365h7k9dcfesgujnmqp0r2twvyx8zb";
const NEIGHBOR_EAST_EVEN: &str = "bc01fg45238967deuvhjyznpkmstqrwx";
const NEIGHBOR_WEST_EVEN: &str = "238967debc01fg45kmstqrwxuvhjyznp";

const BORDER_NORTH_EVEN: &str = "prxz";
const BORDER_SOUTH_EVEN: &str = "028b";
const BORDER_EAST_EVEN: &str = "bcfguvyz";
const BORDER_WEST_EVEN: &str = "0145hjnp";

fn tables(direction: Direction, odd: bool) -> (&'static str, &'static str) {
    match (direction, odd) {
        (Direction::North, false) => (NEIGHBOR_NORTH_EVEN, BORDER_NORTH_EVEN),
        (Direction::South, false) => (NEIGHBOR_SOUTH_EVEN, BORDER_SOUTH_EVEN),
        (Direction::East, false) => (NEIGHBOR_EAST_EVEN, BORDER_EAST_EVEN),
        (Direction::West, false) => (NEIGHBOR_WEST_EVEN, BORDER_WEST_EVEN),
        (Direction::North, true) => (NEIGHBOR_EAST_EVEN, BORDER_EAST_EVEN),
        (Direction::South, true) => (NEIGHBOR_WEST_EVEN, BORDER_WEST_EVEN),
        (Direction::East, true) => (NEIGHBOR_NORTH_EVEN, BORDER_NORTH_EVEN),
        (Direction::West, true) => (NEIGHBOR_SOUTH_EVEN, BORDER_SOUTH_EVEN),
    }
}

/// Adjacency over an already-validated hash. Returns the empty string when
/// the border carry exhausts the hash (poles and the antimeridian).
fn adjacent(hash: &str, direction: Direction) -> String {
    if hash.is_empty() {
        return String::new();
    }

    let last = hash.chars().last().unwrap();
    let parent = &hash[..hash.len() - 1];
    let odd = hash.len() % 2 == 1;
    let (neighbor_table, border_table) = tables(direction, odd);

    let base = if border_table.contains(last) {
        let carried = adjacent(parent, direction);
        if carried.is_empty() {
            return String::new();
        }
        carried
    } else {
        parent.to_string()
    };

    // validate_hash on the public entry point guarantees membership
    let index = neighbor_table
        .chars()
        .position(|c| c == last)
        .unwrap_or(0);
    let mut result = base;
    result.push(BASE32[index] as char);
    result
}

/// The hash of the cell adjacent to `hash` in `direction`.
///
/// Returns the empty string when no adjacent cell exists at this precision
/// (carry propagated past the first character).
pub fn neighbor(hash: &str, direction: Direction) -> Result<String, GeohashError> {
    validate_hash(hash)?;
    Ok(adjacent(hash, direction))
}

/// All eight surrounding cells in order N, NE, E, SE, S, SW, W, NW.
///
/// Diagonals combine two cardinal steps; a diagonal built from an empty
/// cardinal is itself empty.
pub fn neighbors(hash: &str) -> Result<[String; 8], GeohashError> {
    validate_hash(hash)?;

    let n = adjacent(hash, Direction::North);
    let s = adjacent(hash, Direction::South);
    let e = adjacent(hash, Direction::East);
    let w = adjacent(hash, Direction::West);

    let ne = adjacent(&n, Direction::East);
    let se = adjacent(&s, Direction::East);
    let sw = adjacent(&s, Direction::West);
    let nw = adjacent(&n, Direction::West);

    Ok([n, ne, e, se, s, sw, w, nw])
}
