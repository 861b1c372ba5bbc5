//! Geographic distance scoring.
//!
//! Candidate repeaters are compared with an elevation-adjusted great-circle
//! distance: elevated repeaters cover further than the flat-earth distance
//! implies, so each sqrt(meter) of elevation subtracts a configurable number
//! of miles from the score. The result can go negative and is not a metric
//! in the mathematical sense; it is only used to rank candidates.

use geo::{Distance, Haversine, Point};

use crate::{Position, Repeater};

/// Meters in a statute mile.
const METERS_PER_MILE: f64 = 1609.34;

/// Great-circle distance between two positions in miles.
///
/// Uses the haversine formula on a spherical Earth (radius 6,371 km),
/// accurate to within 0.3% for the distances involved here.
#[inline]
pub fn haversine_miles(a: Position, b: Position) -> f64 {
    let from = Point::new(a.lon, a.lat);
    let to = Point::new(b.lon, b.lat);
    Haversine::distance(from, to) / METERS_PER_MILE
}

/// Elevation-adjusted distance score for a candidate repeater.
///
/// Negative elevations are clamped to zero before the adjustment.
#[inline]
pub fn coverage_score(from: Position, repeater: &Repeater, elevation_factor: f64) -> f64 {
    let elevation = repeater.elevation_m.max(0.0);
    haversine_miles(from, repeater.pos()) - elevation_factor * elevation.sqrt()
}
