//! # Mesh Coverage
//!
//! Coverage aggregation and repeater proximity mapping for mesh radio networks.
//!
//! This library turns sparse, noisy propagation samples (ping observed, heard
//! via relay, or lost) into:
//! - A durable, bounded-size coverage model keyed by geohash tile
//! - A proximity graph linking coverage tiles to the physical repeaters
//!   that most plausibly served them
//! - A ranked top-N list of repeaters by coverage reach
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel graph construction with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use mesh_coverage::{CoverageConfig, RawSample, Repeater};
//! use mesh_coverage::graph::{build_graph, rank_repeaters, RepeaterIndex};
//! use mesh_coverage::tile::CoverageSummary;
//!
//! let sample = RawSample {
//!     hash: "9q8yyk8y".to_string(),
//!     time: 1_700_000_000_000,
//!     observed: true,
//!     heard_via: vec!["r1".to_string()],
//!     snr: Some(8.5),
//!     rssi: Some(-92.0),
//! };
//!
//! let repeaters = vec![Repeater {
//!     id: "r1".to_string(),
//!     name: "Twin Peaks".to_string(),
//!     lat: 37.7544,
//!     lon: -122.4477,
//!     elevation_m: 280.0,
//!     last_advert: 1_700_000_000_000,
//! }];
//!
//! let mut summary = CoverageSummary::new(sample.tile_key());
//! summary.absorb(&sample);
//!
//! let config = CoverageConfig::default();
//! let index = RepeaterIndex::build(&repeaters);
//! let graph = build_graph(&[summary], &repeaters, &index, &config);
//! let ranked = rank_repeaters(&graph, &repeaters, config.top_repeaters);
//!
//! assert_eq!(graph.edges.len(), 1);
//! assert_eq!(ranked[0].edges, 1);
//! ```

use serde::{Deserialize, Serialize};

pub mod consolidate;
pub mod geo;
pub mod geohash;
pub mod graph;
pub mod run;
pub mod snapshot;
pub mod store;
pub mod tile;

pub use consolidate::{consolidate, group_by_tile, UberSample};
pub use geohash::{BoundingBox, SAMPLE_PRECISION, TILE_PRECISION};
pub use graph::{ProximityEdge, ProximityGraph, RepeaterIndex, RepeaterRank};
pub use run::{run_consolidation, ConsolidationReport};
pub use snapshot::{build_snapshot, Snapshot};
pub use store::{RepeaterStore, SampleStore, StoreError, TileStore};
pub use tile::{CoverageSummary, CoverageTile, TileMetadata};

// ============================================================================
// Core Types
// ============================================================================

/// A geographic position in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
}

impl Position {
    /// Create a new position.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check if the position has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat >= -90.0
            && self.lat <= 90.0
            && self.lon >= -180.0
            && self.lon <= 180.0
    }
}

/// One raw propagation observation, as stored by the ingestion layer.
///
/// A sample is "heard" if the round-trip ping succeeded (`observed`) or if
/// at least one repeater relayed it (`heard_via` non-empty). A sample that
/// is neither is "lost".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// High-precision geohash of the sender position.
    pub hash: String,
    /// Observation time in epoch milliseconds.
    pub time: i64,
    /// Whether a round-trip ping succeeded.
    pub observed: bool,
    /// Lower-cased ids of the repeaters that relayed the sample.
    #[serde(default)]
    pub heard_via: Vec<String>,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
}

impl RawSample {
    /// The coverage tile this sample falls in (first 6 geohash characters).
    pub fn tile_key(&self) -> &str {
        let end = self.hash.len().min(TILE_PRECISION);
        &self.hash[..end]
    }

    /// True if the sample was observed or relayed by at least one repeater.
    pub fn heard(&self) -> bool {
        self.observed || !self.heard_via.is_empty()
    }
}

/// A physical relay node. Multiple records may share the same logical `id`
/// (co-located or re-deployed hardware); each keeps its own position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeater {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Antenna elevation in meters.
    #[serde(default)]
    pub elevation_m: f64,
    /// Time of the last advertisement, epoch milliseconds.
    #[serde(default)]
    pub last_advert: i64,
}

impl Repeater {
    pub fn pos(&self) -> Position {
        Position::new(self.lat, self.lon)
    }
}

/// Configuration for coverage aggregation and graph construction.
#[derive(Debug, Clone)]
pub struct CoverageConfig {
    /// Weight of repeater elevation when scoring candidate distance.
    /// Each sqrt(meter) of elevation offsets this many miles.
    /// Default: 0.5 (deployments have used 0.25-0.5)
    pub elevation_factor: f64,

    /// Maximum uber-samples retained per tile; the oldest are evicted.
    /// Default: 15
    pub history_cap: usize,

    /// Maximum tiles merged per consolidation run; the rest are deferred
    /// to the next run. Default: 500
    pub merge_cap: usize,

    /// Samples older than this many days are eligible for consolidation.
    /// Default: 1.0
    pub max_age_days: f64,

    /// Length of the ranked repeater list. Default: 50
    pub top_repeaters: usize,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            elevation_factor: 0.5,
            history_cap: 15,
            merge_cap: 500,
            max_age_days: 1.0,
            top_repeaters: 50,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
