//! End-to-end consolidation demo: seed a sample backlog, run one
//! consolidation pass, then export a snapshot.
//!
//! Run with: cargo run --example consolidate_run

use mesh_coverage::geohash::{encode, SAMPLE_PRECISION};
use mesh_coverage::run::{run_consolidation, DAY_MS};
use mesh_coverage::snapshot::build_snapshot;
use mesh_coverage::store::{MemoryRepeaterStore, MemorySampleStore, MemoryTileStore};
use mesh_coverage::{CoverageConfig, RawSample, Repeater};

#[tokio::main]
async fn main() {
    let now = 30 * DAY_MS;
    let samples = MemorySampleStore::new();

    // A spread of observations around downtown San Francisco: some pings
    // observed, some only relayed, some lost.
    let spots = [
        (37.7749, -122.4194, true, vec!["r1"]),
        (37.7755, -122.4180, false, vec!["r1", "r2"]),
        (37.7790, -122.4312, false, vec![]),
        (37.7810, -122.4330, true, vec![]),
        (37.8044, -122.2712, false, vec!["r2"]),
    ];
    for (i, (lat, lon, observed, path)) in spots.iter().enumerate() {
        samples
            .insert(RawSample {
                hash: encode(*lat, *lon, SAMPLE_PRECISION),
                time: now - (2 * DAY_MS) - i as i64 * 60_000,
                observed: *observed,
                heard_via: path.iter().map(|s| s.to_string()).collect(),
                snr: Some(-2.5 + i as f64),
                rssi: Some(-100.0 - i as f64),
            })
            .await;
    }

    let tiles = MemoryTileStore::new();
    let config = CoverageConfig::default();

    let report = run_consolidation(&samples, &tiles, &config, now)
        .await
        .expect("consolidation run");
    println!("Consolidation report: {report:?}");

    let repeaters = MemoryRepeaterStore::new(vec![
        Repeater {
            id: "r1".to_string(),
            name: "Twin Peaks".to_string(),
            lat: 37.7544,
            lon: -122.4477,
            elevation_m: 280.0,
            last_advert: now,
        },
        Repeater {
            id: "r2".to_string(),
            name: "Grizzly Peak".to_string(),
            lat: 37.8790,
            lon: -122.2440,
            elevation_m: 520.0,
            last_advert: now,
        },
    ]);

    let snapshot = build_snapshot(&tiles, &samples, &repeaters)
        .await
        .expect("snapshot export");

    println!(
        "\nSnapshot: {} tiles, {} live samples, {} repeaters",
        snapshot.coverage.len(),
        snapshot.samples.len(),
        snapshot.repeaters.len()
    );
    for entry in &snapshot.coverage {
        println!(
            "  {} observed={} heard={} lost={} repeaters={:?}",
            entry.id, entry.obs, entry.hrd, entry.lost, entry.rptr
        );
    }
}
