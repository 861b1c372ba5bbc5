//! Proximity graph demo: fold raw samples into tile summaries, link each
//! tile to its best repeater, and rank repeaters by reach.
//!
//! Run with: cargo run --example coverage_graph

use std::collections::HashMap;

use mesh_coverage::geohash::{encode, SAMPLE_PRECISION};
use mesh_coverage::graph::{build_graph, rank_repeaters, RepeaterIndex};
use mesh_coverage::tile::CoverageSummary;
use mesh_coverage::{CoverageConfig, RawSample, Repeater};

fn main() {
    let repeaters = vec![
        Repeater {
            id: "r1".to_string(),
            name: "Twin Peaks".to_string(),
            lat: 37.7544,
            lon: -122.4477,
            elevation_m: 280.0,
            last_advert: 0,
        },
        // Same logical id, redeployed across the bay at altitude.
        Repeater {
            id: "r1".to_string(),
            name: "Grizzly Peak".to_string(),
            lat: 37.8790,
            lon: -122.2440,
            elevation_m: 520.0,
            last_advert: 0,
        },
        Repeater {
            id: "r2".to_string(),
            name: "San Bruno Mountain".to_string(),
            lat: 37.6780,
            lon: -122.4340,
            elevation_m: 400.0,
            last_advert: 0,
        },
    ];

    let observations = [
        (37.7749, -122.4194, vec!["r1"]),
        (37.7755, -122.4180, vec!["r1", "r2"]),
        (37.8044, -122.2712, vec!["r1"]),
        (37.7080, -122.4420, vec!["r2"]),
        (37.7090, -122.4400, vec!["r2", "gone"]),
    ];

    // Fold samples into per-tile summaries, the in-memory way.
    let mut by_tile: HashMap<String, CoverageSummary> = HashMap::new();
    for (i, (lat, lon, path)) in observations.iter().enumerate() {
        let sample = RawSample {
            hash: encode(*lat, *lon, SAMPLE_PRECISION),
            time: 1_000 + i as i64,
            observed: false,
            heard_via: path.iter().map(|s| s.to_string()).collect(),
            snr: None,
            rssi: None,
        };
        by_tile
            .entry(sample.tile_key().to_string())
            .or_insert_with(|| CoverageSummary::new(sample.tile_key()))
            .absorb(&sample);
    }
    let mut sites: Vec<CoverageSummary> = by_tile.into_values().collect();
    sites.sort_by(|a, b| a.key.cmp(&b.key));

    let config = CoverageConfig::default();
    let index = RepeaterIndex::build(&repeaters);
    let graph = build_graph(&sites, &repeaters, &index, &config);

    println!("{} tiles, {} edges", sites.len(), graph.edges.len());
    for edge in &graph.edges {
        let repeater = &repeaters[edge.repeater];
        println!(
            "  tile {} <- {} [{}]",
            sites[edge.site].key, repeater.name, repeater.id
        );
    }

    println!("\nTop repeaters:");
    for (rank, row) in rank_repeaters(&graph, &repeaters, config.top_repeaters)
        .iter()
        .enumerate()
    {
        println!("  {}. {} ({} tiles)", rank + 1, row.display_id(), row.edges);
    }
}
