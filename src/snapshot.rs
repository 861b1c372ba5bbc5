//! Snapshot export for the rendering layer.
//!
//! A snapshot is everything a map needs in one payload: coverage tile
//! summaries, recent raw samples, and the repeater listing. The payload is
//! large, so fields are minimized: short names, timestamps truncated to
//! whole seconds, and optional or empty fields omitted entirely. Absent
//! means "none" on the wire; consumers must not read it as zero.
//!
//! Snapshots are read-only and eventually consistent: building one
//! concurrently with a consolidation run just yields a slightly stale view.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::store::{RepeaterStore, SampleStore, StoreError, TileStore};
use crate::tile::{CoverageSummary, TileMetadata};
use crate::{RawSample, Repeater};

/// Wire timestamps carry whole seconds; internal logic keeps millis.
const TIME_TRUNC_MS: i64 = 1000;

/// Truncate an internal timestamp for the wire.
pub fn truncate_time(time: i64) -> i64 {
    time / TIME_TRUNC_MS
}

/// Restore a wire timestamp to internal precision.
pub fn from_truncated_time(time: i64) -> i64 {
    time * TIME_TRUNC_MS
}

/// Zero-valued signal readings are dropped along with absent ones.
fn omit_signal(value: &Option<f64>) -> bool {
    value.map_or(true, |v| v == 0.0)
}

/// One coverage tile on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEntry {
    /// Tile key (6-character geohash).
    pub id: String,
    pub obs: u32,
    pub hrd: u32,
    pub lost: u32,
    /// Last updated / heard / observed, truncated.
    pub ut: i64,
    pub lht: i64,
    pub lot: i64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub rptr: Vec<String>,
    #[serde(skip_serializing_if = "omit_signal", default)]
    pub snr: Option<f64>,
    #[serde(skip_serializing_if = "omit_signal", default)]
    pub rssi: Option<f64>,
}

impl CoverageEntry {
    fn from_metadata(key: &str, meta: &TileMetadata) -> Self {
        let summary = CoverageSummary::from_metadata(key, meta);
        Self {
            id: summary.key,
            obs: summary.observed,
            hrd: summary.heard,
            lost: summary.lost,
            ut: truncate_time(summary.updated),
            lht: truncate_time(summary.last_heard),
            lot: truncate_time(summary.last_observed),
            rptr: summary.repeaters,
            snr: summary.snr,
            rssi: summary.rssi,
        }
    }
}

/// One raw sample on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEntry {
    /// Sample position (8-character geohash).
    pub id: String,
    pub time: i64,
    pub obs: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
}

impl SampleEntry {
    fn from_sample(sample: &RawSample) -> Self {
        Self {
            id: sample.hash.clone(),
            time: truncate_time(sample.time),
            obs: sample.observed,
            path: sample.heard_via.clone(),
            snr: sample.snr,
            rssi: sample.rssi,
        }
    }
}

/// One repeater on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeaterEntry {
    pub time: i64,
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    /// Elevation rounded to whole meters.
    pub elev: i64,
}

impl RepeaterEntry {
    fn from_repeater(repeater: &Repeater) -> Self {
        Self {
            time: truncate_time(repeater.last_advert),
            id: repeater.id.clone(),
            name: repeater.name.clone(),
            lat: repeater.lat,
            lon: repeater.lon,
            elev: repeater.elevation_m.round() as i64,
        }
    }
}

/// The full snapshot consumed by the rendering layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub coverage: Vec<CoverageEntry>,
    pub samples: Vec<SampleEntry>,
    pub repeaters: Vec<RepeaterEntry>,
}

/// Build a snapshot from the stores. The three sections are independent
/// reads, fetched concurrently; the tile and repeater listings are paged
/// until exhausted.
pub async fn build_snapshot(
    tiles: &dyn TileStore,
    samples: &dyn SampleStore,
    repeaters: &dyn RepeaterStore,
) -> Result<Snapshot, StoreError> {
    let (coverage, samples, repeaters) = futures::try_join!(
        collect_coverage(tiles),
        collect_samples(samples),
        collect_repeaters(repeaters),
    )?;

    debug!(
        "Snapshot: {} tiles, {} samples, {} repeaters",
        coverage.len(),
        samples.len(),
        repeaters.len()
    );
    Ok(Snapshot {
        coverage,
        samples,
        repeaters,
    })
}

async fn collect_coverage(tiles: &dyn TileStore) -> Result<Vec<CoverageEntry>, StoreError> {
    let mut entries = Vec::new();
    let mut cursor = None;
    loop {
        let page = tiles.list(cursor).await?;
        for (key, meta) in &page.tiles {
            entries.push(CoverageEntry::from_metadata(key, meta));
        }
        cursor = page.cursor;
        if cursor.is_none() {
            return Ok(entries);
        }
    }
}

async fn collect_samples(store: &dyn SampleStore) -> Result<Vec<SampleEntry>, StoreError> {
    Ok(store
        .all_samples()
        .await?
        .iter()
        .map(SampleEntry::from_sample)
        .collect())
}

async fn collect_repeaters(store: &dyn RepeaterStore) -> Result<Vec<RepeaterEntry>, StoreError> {
    let mut entries = Vec::new();
    let mut cursor = None;
    loop {
        let page = store.list(cursor).await?;
        for repeater in &page.repeaters {
            entries.push(RepeaterEntry::from_repeater(repeater));
        }
        cursor = page.cursor;
        if cursor.is_none() {
            return Ok(entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepeaterStore, MemorySampleStore, MemoryTileStore};
    use crate::tile::{merge_tile, CoverageTile};
    use crate::CoverageConfig;

    fn sample(hash: &str, time: i64, observed: bool, heard_via: &[&str]) -> RawSample {
        RawSample {
            hash: hash.to_string(),
            time,
            observed,
            heard_via: heard_via.iter().map(|s| s.to_string()).collect(),
            snr: None,
            rssi: None,
        }
    }

    fn merged_tile(key: &str, samples: &[RawSample]) -> CoverageTile {
        merge_tile(key, None, samples, &CoverageConfig::default()).unwrap()
    }

    #[test]
    fn test_time_truncation_round_trip() {
        let time = 1_700_000_123_456;
        let truncated = truncate_time(time);
        assert_eq!(truncated, 1_700_000_123);
        assert_eq!(from_truncated_time(truncated), 1_700_000_123_000);
    }

    #[test]
    fn test_coverage_entry_omits_empty_fields() {
        let tile = merged_tile("9q8yyk", &[sample("9q8yyk8y", 5_000, false, &[])]);
        let entry = CoverageEntry::from_metadata(&tile.key, &tile.meta);
        let value = serde_json::to_value(&entry).unwrap();

        // Lost-only tile: no repeaters, no signal readings on the wire.
        assert!(value.get("rptr").is_none());
        assert!(value.get("snr").is_none());
        assert!(value.get("rssi").is_none());
        assert_eq!(value["lost"], 1);
        assert_eq!(value["ut"], 5);
    }

    #[test]
    fn test_coverage_entry_keeps_populated_fields() {
        let mut observed = sample("9q8yyk8y", 5_000, true, &["r1"]);
        observed.snr = Some(4.5);
        let tile = merged_tile("9q8yyk", &[observed]);
        let entry = CoverageEntry::from_metadata(&tile.key, &tile.meta);
        let value = serde_json::to_value(&entry).unwrap();

        assert_eq!(value["rptr"][0], "r1");
        assert_eq!(value["snr"], 4.5);
        assert_eq!(value["obs"], 1);
        assert_eq!(value["hrd"], 1);
    }

    #[test]
    fn test_zero_signal_reading_is_omitted() {
        let mut s = sample("9q8yyk8y", 5_000, true, &[]);
        s.snr = Some(0.0);
        let tile = merged_tile("9q8yyk", &[s]);
        let value = serde_json::to_value(CoverageEntry::from_metadata(&tile.key, &tile.meta)).unwrap();
        assert!(value.get("snr").is_none());
    }

    #[test]
    fn test_sample_entry_wire_shape() {
        let mut s = sample("9q8yyk8y", 7_000, false, &["r1", "r2"]);
        s.rssi = Some(-104.0);
        let value = serde_json::to_value(SampleEntry::from_sample(&s)).unwrap();

        assert_eq!(value["id"], "9q8yyk8y");
        assert_eq!(value["time"], 7);
        assert_eq!(value["obs"], false);
        assert_eq!(value["path"][1], "r2");
        assert_eq!(value["rssi"], -104.0);
        assert!(value.get("snr").is_none());
    }

    #[test]
    fn test_repeater_entry_rounds_elevation() {
        let repeater = Repeater {
            id: "r1".to_string(),
            name: "Twin Peaks".to_string(),
            lat: 37.7544,
            lon: -122.4477,
            elevation_m: 280.6,
            last_advert: 9_000,
        };
        let entry = RepeaterEntry::from_repeater(&repeater);
        assert_eq!(entry.elev, 281);
        assert_eq!(entry.time, 9);
    }

    #[tokio::test]
    async fn test_build_snapshot_collects_all_pages() {
        let tiles = MemoryTileStore::new();
        for i in 0..120 {
            let key = format!("tile{i:04}");
            tiles
                .put(&merged_tile(&key, &[sample("9q8yyk8y", 5_000, true, &[])]))
                .await
                .unwrap();
        }

        let samples = MemorySampleStore::new();
        samples.insert(sample("9q8yyk8y", 6_000, false, &["r1"])).await;

        let repeaters = MemoryRepeaterStore::new(vec![Repeater {
            id: "r1".to_string(),
            name: "north".to_string(),
            lat: 37.0,
            lon: -122.0,
            elevation_m: 10.0,
            last_advert: 1_000,
        }]);

        let snapshot = build_snapshot(&tiles, &samples, &repeaters).await.unwrap();
        assert_eq!(snapshot.coverage.len(), 120);
        assert_eq!(snapshot.samples.len(), 1);
        assert_eq!(snapshot.repeaters.len(), 1);
    }
}
