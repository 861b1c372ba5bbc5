//! The periodic consolidation run.
//!
//! One run folds the sample backlog into per-tile history: fetch everything
//! older than the age threshold, group by tile, merge at most `merge_cap`
//! tiles, then archive and delete the merged samples in one batch at the
//! end. Tiles are independent, so a single tile's store failure is counted
//! and its samples kept for the next run rather than aborting anything.
//!
//! The run takes no locks across invocations; callers must not overlap runs
//! (single-writer contract). If a second writer does slip in, the tile
//! store's generation check turns the race into a per-tile conflict that is
//! retried naturally on the next run.

use log::{info, warn};
use serde::Serialize;

use crate::consolidate::group_by_tile;
use crate::store::{SampleStore, StoreError, TileStore};
use crate::tile::merge_tile;
use crate::{CoverageConfig, RawSample};

/// Milliseconds in a day.
pub const DAY_MS: i64 = 86_400_000;

/// Counters reported by one consolidation run. Partial failure is normal
/// operation, never an error: failed and deferred tiles are counted here
/// and their samples stay eligible for the next run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    /// Samples old enough to consolidate.
    pub samples_to_update: usize,
    /// Tiles those samples fall into.
    pub tiles_to_update: usize,
    /// Tiles merged and written back.
    pub merged_ok: usize,
    /// Tiles whose merge failed at the store boundary.
    pub merged_fail: usize,
    /// Tiles deferred because the run hit its merge cap.
    pub merged_skip: usize,
}

/// Run one consolidation pass. `now` is the caller's clock in epoch millis;
/// everything downstream is a pure function of the inputs.
///
/// Only a failing backlog query (or the final archival batch) is fatal;
/// per-tile failures are isolated and reported.
pub async fn run_consolidation(
    samples: &dyn SampleStore,
    tiles: &dyn TileStore,
    config: &CoverageConfig,
    now: i64,
) -> Result<ConsolidationReport, StoreError> {
    let max_age_days = if config.max_age_days > 0.0 {
        config.max_age_days
    } else {
        1.0
    };
    let cutoff = now - (max_age_days * DAY_MS as f64) as i64;

    let backlog = samples.samples_before(cutoff).await?;
    info!("Consolidating {} samples older than {}", backlog.len(), cutoff);

    let mut report = ConsolidationReport {
        samples_to_update: backlog.len(),
        ..ConsolidationReport::default()
    };

    let groups = group_by_tile(backlog);
    report.tiles_to_update = groups.len();
    info!("{} tiles to update", groups.len());

    let mut archive: Vec<RawSample> = Vec::new();

    for (merged, (key, batch)) in groups.iter().enumerate() {
        // Bound the write volume of one invocation; the rest waits for the
        // next scheduled run.
        if merged >= config.merge_cap {
            break;
        }

        match merge_one(tiles, key, batch, config).await {
            Ok(()) => {
                report.merged_ok += 1;
                archive.extend_from_slice(batch);
            }
            Err(err) => {
                warn!("Merge failed for tile {}: {}", key, err);
                report.merged_fail += 1;
            }
        }
    }
    report.merged_skip = report.tiles_to_update - (report.merged_ok + report.merged_fail);

    // One shared batch after every merge has settled, so an interrupted run
    // never archives samples whose merge didn't land.
    if !archive.is_empty() {
        samples.archive_and_delete(now, &archive).await?;
    }

    Ok(report)
}

/// Merge one tile's batch and write it back. A batch that was entirely
/// consolidated by an earlier run produces no write but still succeeds, so
/// its samples get archived.
async fn merge_one(
    tiles: &dyn TileStore,
    key: &str,
    batch: &[RawSample],
    config: &CoverageConfig,
) -> Result<(), StoreError> {
    let prev = tiles.get(key).await?;
    let Some(tile) = merge_tile(key, prev.as_ref(), batch, config) else {
        return Ok(());
    };
    tiles.put(&tile).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemorySampleStore, MemoryTileStore, TilePage};
    use crate::tile::{CoverageTile, TileRecord};
    use async_trait::async_trait;

    const NOW: i64 = 10 * DAY_MS;

    fn old_sample(hash: &str, age_days: i64, observed: bool) -> RawSample {
        RawSample {
            hash: hash.to_string(),
            time: NOW - age_days * DAY_MS,
            observed,
            heard_via: vec![],
            snr: None,
            rssi: None,
        }
    }

    async fn seeded_store(samples: Vec<RawSample>) -> MemorySampleStore {
        let store = MemorySampleStore::new();
        for sample in samples {
            store.insert(sample).await;
        }
        store
    }

    #[tokio::test]
    async fn test_run_merges_and_archives() {
        let samples = seeded_store(vec![
            old_sample("9q8yyk8y", 2, true),
            old_sample("9q8yyk22", 3, false),
            old_sample("9q8yym11", 2, false),
            old_sample("9q8yyz99", 0, true), // too fresh
        ])
        .await;
        let tiles = MemoryTileStore::new();

        let report = run_consolidation(&samples, &tiles, &CoverageConfig::default(), NOW)
            .await
            .unwrap();

        assert_eq!(report.samples_to_update, 3);
        assert_eq!(report.tiles_to_update, 2);
        assert_eq!(report.merged_ok, 2);
        assert_eq!(report.merged_fail, 0);
        assert_eq!(report.merged_skip, 0);

        assert_eq!(tiles.len().await, 2);
        // The fresh sample stays live; the merged ones are archived.
        assert_eq!(samples.live_count().await, 1);
        assert_eq!(samples.archived_count().await, 3);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let samples = seeded_store(vec![
            old_sample("9q8yyk8y", 2, true),
            old_sample("9q8yyk22", 3, false),
        ])
        .await;
        let tiles = MemoryTileStore::new();
        let config = CoverageConfig::default();

        let first = run_consolidation(&samples, &tiles, &config, NOW).await.unwrap();
        assert_eq!(first.merged_ok, 1);
        let record = tiles.get("9q8yyk").await.unwrap().unwrap();
        assert_eq!(record.history.len(), 1);

        // Re-insert the already-consolidated samples, as if a deletion was
        // lost: the cutoff filter keeps them out of the history, and the
        // run archives them away again.
        samples.insert(old_sample("9q8yyk8y", 2, true)).await;
        samples.insert(old_sample("9q8yyk22", 3, false)).await;

        let second = run_consolidation(&samples, &tiles, &config, NOW).await.unwrap();
        assert_eq!(second.merged_ok, 1);
        let record = tiles.get("9q8yyk").await.unwrap().unwrap();
        assert_eq!(record.history.len(), 1);
        assert_eq!(samples.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_merge_cap_defers_tiles() {
        let samples = seeded_store(
            (0..5)
                .map(|i| old_sample(&format!("9q8yy{i}xx"), 2, false))
                .collect(),
        )
        .await;
        let tiles = MemoryTileStore::new();
        let config = CoverageConfig {
            merge_cap: 3,
            ..CoverageConfig::default()
        };

        let report = run_consolidation(&samples, &tiles, &config, NOW).await.unwrap();
        assert_eq!(report.tiles_to_update, 5);
        assert_eq!(report.merged_ok, 3);
        assert_eq!(report.merged_skip, 2);
        assert_eq!(report.merged_fail, 0);

        // Deferred tiles keep their samples for the next run.
        assert_eq!(samples.live_count().await, 2);

        let next = run_consolidation(&samples, &tiles, &config, NOW).await.unwrap();
        assert_eq!(next.merged_ok, 2);
        assert_eq!(samples.live_count().await, 0);
    }

    /// Tile store that fails writes for one poisoned key.
    struct FlakyTileStore {
        inner: MemoryTileStore,
        poisoned: String,
    }

    #[async_trait]
    impl TileStore for FlakyTileStore {
        async fn get(&self, key: &str) -> Result<Option<TileRecord>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, tile: &CoverageTile) -> Result<(), StoreError> {
            if tile.key == self.poisoned {
                return Err(StoreError::Unavailable("kv write timeout".to_string()));
            }
            self.inner.put(tile).await
        }

        async fn list(&self, cursor: Option<String>) -> Result<TilePage, StoreError> {
            self.inner.list(cursor).await
        }
    }

    #[tokio::test]
    async fn test_tile_failure_is_isolated_and_retained() {
        let samples = seeded_store(vec![
            old_sample("9q8yyk8y", 2, true),
            old_sample("9q8yym11", 2, false),
        ])
        .await;
        let tiles = FlakyTileStore {
            inner: MemoryTileStore::new(),
            poisoned: "9q8yyk".to_string(),
        };

        let report = run_consolidation(&samples, &tiles, &CoverageConfig::default(), NOW)
            .await
            .unwrap();

        assert_eq!(report.merged_ok, 1);
        assert_eq!(report.merged_fail, 1);
        assert_eq!(report.merged_skip, 0);

        // The failed tile's sample is still live for the next run; the
        // successful one was archived.
        let live = samples.all_samples().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].hash, "9q8yyk8y");
        assert_eq!(samples.archived_count().await, 1);
    }

    #[tokio::test]
    async fn test_run_migrates_legacy_tile() {
        use crate::tile::TileMetadata;
        use serde_json::json;

        let samples = seeded_store(vec![old_sample("9q8yyk8y", 2, true)]).await;
        let tiles = MemoryTileStore::new();
        // A tile written by the oldest generation: path list, string time.
        tiles
            .seed(
                "9q8yyk",
                &[json!({ "time": "1000", "path": ["R1"] })],
                TileMetadata::default(),
            )
            .await;

        let report = run_consolidation(&samples, &tiles, &CoverageConfig::default(), NOW)
            .await
            .unwrap();
        assert_eq!(report.merged_ok, 1);

        let record = tiles.get("9q8yyk").await.unwrap().unwrap();
        assert_eq!(record.history.len(), 2);
        // The legacy entry was rewritten into the current shape on the way
        // through.
        assert_eq!(record.history[0]["time"], 1000);
        assert_eq!(record.history[0]["heard"], 1);
        assert_eq!(record.history[0]["observed"], 1);
        assert_eq!(record.meta.heard, 2);
        assert!(record.meta.hit_repeaters.contains(&"r1".to_string()));
    }

    #[tokio::test]
    async fn test_empty_backlog_reports_zeroes() {
        let samples = MemorySampleStore::new();
        let tiles = MemoryTileStore::new();

        let report = run_consolidation(&samples, &tiles, &CoverageConfig::default(), NOW)
            .await
            .unwrap();
        assert_eq!(report, ConsolidationReport::default());
        assert!(tiles.is_empty().await);
    }

    #[tokio::test]
    async fn test_nonpositive_max_age_falls_back_to_one_day() {
        let samples = seeded_store(vec![
            old_sample("9q8yyk8y", 2, true),
            old_sample("9q8yym11", 0, false),
        ])
        .await;
        let tiles = MemoryTileStore::new();
        let config = CoverageConfig {
            max_age_days: 0.0,
            ..CoverageConfig::default()
        };

        let report = run_consolidation(&samples, &tiles, &config, NOW).await.unwrap();
        assert_eq!(report.samples_to_update, 1);
        assert_eq!(report.merged_ok, 1);
    }
}
