//! Geohash encoding and decoding.
//!
//! Coverage tiles are keyed by fixed-precision geohash strings: 6 characters
//! for a tile (city-block granularity), 8 characters for a raw sample. An
//! 8-character hash's first 6 characters determine tile membership, so a
//! sample always lands inside the tile its prefix names.

use crate::Position;

/// Geohash base-32 alphabet (no a, i, l, o).
const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Bits per geohash character.
const BITS_PER_CHAR: usize = 5;

/// Geohash precision of a coverage tile key.
pub const TILE_PRECISION: usize = 6;

/// Geohash precision of a raw sample position.
pub const SAMPLE_PRECISION: usize = 8;

/// Geographic extent of a geohash cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Midpoint of the box.
    pub fn center(&self) -> Position {
        Position::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}

/// Encode a position to a geohash of the given precision.
///
/// Deterministic: the same rounded input and precision always produce the
/// same string, and a longer hash is always prefixed by the shorter hash of
/// the same position.
///
/// # Example
///
/// ```rust
/// use mesh_coverage::geohash::encode;
///
/// assert_eq!(encode(57.64911, 10.40744, 11), "u4pruydqqvj");
/// ```
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut hash = String::with_capacity(precision);
    let mut bits = 0usize;
    let mut bit_count = 0usize;
    let mut even_bit = true; // even bits refine longitude

    while hash.len() < precision {
        let (range, value) = if even_bit {
            (&mut lon_range, lon)
        } else {
            (&mut lat_range, lat)
        };

        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if value >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }

        even_bit = !even_bit;
        bit_count += 1;
        if bit_count == BITS_PER_CHAR {
            hash.push(BASE32[bits] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    hash
}

/// Decode a geohash to its bounding box.
///
/// There is no error path: a character outside the geohash alphabet stops
/// refinement, yielding the (coarser) box of the valid prefix. Callers are
/// expected to validate the charset upstream.
pub fn decode_bbox(hash: &str) -> BoundingBox {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut even_bit = true;

    'chars: for byte in hash.bytes() {
        let Some(index) = BASE32.iter().position(|&b| b == byte.to_ascii_lowercase()) else {
            break 'chars;
        };

        for shift in (0..BITS_PER_CHAR).rev() {
            let range = if even_bit {
                &mut lon_range
            } else {
                &mut lat_range
            };

            let mid = (range.0 + range.1) / 2.0;
            if (index >> shift) & 1 == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even_bit = !even_bit;
        }
    }

    BoundingBox {
        min_lat: lat_range.0,
        min_lon: lon_range.0,
        max_lat: lat_range.1,
        max_lon: lon_range.1,
    }
}

/// Center position of a geohash cell.
pub fn cell_center(hash: &str) -> Position {
    decode_bbox(hash).center()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(encode(57.64911, 10.40744, 11), "u4pruydqqvj");
        assert_eq!(encode(37.7749, -122.4194, 8), "9q8yyk8y");
    }

    #[test]
    fn test_decode_known_cell() {
        let bbox = decode_bbox("ezs42");
        let center = bbox.center();
        assert!((center.lat - 42.605).abs() < 0.01);
        assert!((center.lon - -5.603).abs() < 0.01);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let bbox = decode_bbox(&encode(37.7749, -122.4194, TILE_PRECISION));
        assert!(bbox.min_lat <= 37.7749 && 37.7749 <= bbox.max_lat);
        assert!(bbox.min_lon <= -122.4194 && -122.4194 <= bbox.max_lon);
    }

    #[test]
    fn test_sample_hash_prefixes_tile_hash() {
        let fine = encode(47.6205, -122.3493, SAMPLE_PRECISION);
        let coarse = encode(47.6205, -122.3493, TILE_PRECISION);
        assert!(fine.starts_with(&coarse));
    }

    #[test]
    fn test_malformed_char_degrades_to_prefix_box() {
        // 'a' is not in the geohash alphabet; refinement stops there.
        assert_eq!(decode_bbox("eza42"), decode_bbox("ez"));
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        assert_eq!(decode_bbox("EZS42"), decode_bbox("ezs42"));
    }

    #[test]
    fn test_empty_hash_covers_the_world() {
        let bbox = decode_bbox("");
        assert_eq!(bbox.min_lat, -90.0);
        assert_eq!(bbox.max_lat, 90.0);
        assert_eq!(bbox.min_lon, -180.0);
        assert_eq!(bbox.max_lon, 180.0);
    }
}
