//! Proximity graph construction and repeater ranking.
//!
//! For every coverage tile and every repeater id the tile has heard, the
//! builder resolves the id to the best physical candidate by
//! elevation-adjusted distance and emits one edge. A tile that heard two
//! ids produces two edges; several repeaters can serve one tile at once.

use std::collections::{HashMap, HashSet};

use crate::geo::coverage_score;
use crate::geohash::cell_center;
use crate::tile::CoverageSummary;
use crate::{CoverageConfig, Position, Repeater};

/// Sentinel larger than any physically valid distance score, in miles.
const SCORE_SENTINEL: f64 = 30_000.0;

/// Index from logical repeater id to the physical installs sharing it.
///
/// Ids are lower-cased; insertion order is preserved per id and no dedup by
/// position happens, so co-located installs stay distinct candidates.
#[derive(Debug, Clone, Default)]
pub struct RepeaterIndex {
    by_id: HashMap<String, Vec<usize>>,
}

impl RepeaterIndex {
    /// Build the index over a repeater listing. O(n).
    pub fn build(repeaters: &[Repeater]) -> Self {
        let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, repeater) in repeaters.iter().enumerate() {
            by_id.entry(repeater.id.to_lowercase()).or_default().push(i);
        }
        Self { by_id }
    }

    /// Candidate indices for a logical id, in listing order.
    pub fn get(&self, id: &str) -> Option<&[usize]> {
        self.by_id.get(id).map(Vec::as_slice)
    }
}

/// Pick the best candidate for a position by elevation-adjusted distance.
///
/// A single candidate is returned without scoring. Otherwise candidates are
/// scanned for the strictly smallest score, so ties go to the candidate
/// encountered first: deterministic under a stable listing order.
pub fn select_best(
    from: Position,
    repeaters: &[Repeater],
    candidates: &[usize],
    elevation_factor: f64,
) -> Option<usize> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        _ => {
            let mut best = None;
            let mut min_score = SCORE_SENTINEL;
            for &index in candidates {
                let score = coverage_score(from, &repeaters[index], elevation_factor);
                if score < min_score {
                    min_score = score;
                    best = Some(index);
                }
            }
            best
        }
    }
}

/// One derived tile-to-repeater association. Indices refer to the site and
/// repeater slices the graph was built over. Recomputed on every build,
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityEdge {
    pub repeater: usize,
    pub site: usize,
}

/// The derived edge set plus the repeaters hit by at least one edge.
#[derive(Debug, Clone, Default)]
pub struct ProximityGraph {
    pub edges: Vec<ProximityEdge>,
    pub hit: HashSet<usize>,
}

impl ProximityGraph {
    /// Whether the repeater at `index` serves at least one tile.
    pub fn is_hit(&self, index: usize) -> bool {
        self.hit.contains(&index)
    }

    fn from_edges(edges: Vec<ProximityEdge>) -> Self {
        let hit = edges.iter().map(|e| e.repeater).collect();
        Self { edges, hit }
    }
}

fn site_edges(
    site_index: usize,
    site: &CoverageSummary,
    repeaters: &[Repeater],
    index: &RepeaterIndex,
    config: &CoverageConfig,
) -> Vec<ProximityEdge> {
    let from = cell_center(&site.key);
    let mut edges = Vec::with_capacity(site.repeaters.len());

    for id in &site.repeaters {
        // Repeaters churn independently of historical samples: an id with
        // no current listing entry is expected, not an error.
        let Some(candidates) = index.get(id) else {
            continue;
        };
        if let Some(best) = select_best(from, repeaters, candidates, config.elevation_factor) {
            edges.push(ProximityEdge {
                repeater: best,
                site: site_index,
            });
        }
    }

    edges
}

/// Build the proximity graph over a set of coverage summaries.
pub fn build_graph(
    sites: &[CoverageSummary],
    repeaters: &[Repeater],
    index: &RepeaterIndex,
    config: &CoverageConfig,
) -> ProximityGraph {
    let edges = sites
        .iter()
        .enumerate()
        .flat_map(|(i, site)| site_edges(i, site, repeaters, index, config))
        .collect();

    ProximityGraph::from_edges(edges)
}

/// Build the proximity graph in parallel. Edge order matches the sequential
/// build, so downstream ranking stays deterministic.
#[cfg(feature = "parallel")]
pub fn build_graph_parallel(
    sites: &[CoverageSummary],
    repeaters: &[Repeater],
    index: &RepeaterIndex,
    config: &CoverageConfig,
) -> ProximityGraph {
    use rayon::prelude::*;

    let edges = sites
        .par_iter()
        .enumerate()
        .flat_map_iter(|(i, site)| site_edges(i, site, repeaters, index, config))
        .collect();

    ProximityGraph::from_edges(edges)
}

/// One row of the ranked repeater list.
///
/// Ranking groups by display identity `(id, name)`, so same-id installs with
/// different names are listed separately even though they compete as one
/// logical id during edge selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeaterRank {
    pub id: String,
    pub name: String,
    pub edges: u32,
}

impl RepeaterRank {
    /// Label used by the rendering layer, e.g. `[r1] Twin Peaks`.
    pub fn display_id(&self) -> String {
        format!("[{}] {}", self.id, self.name)
    }
}

/// Rank repeaters by edge count, descending, truncated to `limit`.
/// The sort is stable over first-seen edge order, so ties break the same
/// way on every build of the same graph.
pub fn rank_repeaters(
    graph: &ProximityGraph,
    repeaters: &[Repeater],
    limit: usize,
) -> Vec<RepeaterRank> {
    let mut ranks: Vec<RepeaterRank> = Vec::new();
    let mut slots: HashMap<(&str, &str), usize> = HashMap::new();

    for edge in &graph.edges {
        let repeater = &repeaters[edge.repeater];
        let key = (repeater.id.as_str(), repeater.name.as_str());
        match slots.get(&key) {
            Some(&slot) => ranks[slot].edges += 1,
            None => {
                slots.insert(key, ranks.len());
                ranks.push(RepeaterRank {
                    id: repeater.id.clone(),
                    name: repeater.name.clone(),
                    edges: 1,
                });
            }
        }
    }

    ranks.sort_by(|a, b| b.edges.cmp(&a.edges));
    ranks.truncate(limit);
    ranks
}
