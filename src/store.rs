//! Store boundaries for samples, tiles, and repeaters.
//!
//! The engine itself is pure computation; every suspension point and every
//! transient failure lives behind these traits. Implementations back onto a
//! key-value store with metadata (tiles, repeaters) and a relational table
//! (samples); the in-memory versions here keep the same substrate shape so
//! the migration and pagination paths are exercised end to end.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::ops::Bound;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::tile::{CoverageTile, TileMetadata, TileRecord};
use crate::{RawSample, Repeater};

/// Listing page size for the in-memory stores.
const PAGE_SIZE: usize = 100;

/// Errors crossing the store boundary.
///
/// Transient failures are counted per tile by the consolidation run and the
/// affected samples retained for retry; only a wholly unreachable store is
/// fatal to a run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write conflict on tile {0}")]
    Conflict(String),
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// One page of a tile listing: keys with their metadata.
#[derive(Debug, Clone, Default)]
pub struct TilePage {
    pub tiles: Vec<(String, TileMetadata)>,
    pub cursor: Option<String>,
}

/// One page of a repeater listing.
#[derive(Debug, Clone, Default)]
pub struct RepeaterPage {
    pub repeaters: Vec<Repeater>,
    pub cursor: Option<String>,
}

/// Raw sample storage plus the archival sink for consolidated samples.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// All samples with `time` strictly below the cutoff.
    async fn samples_before(&self, cutoff: i64) -> Result<Vec<RawSample>, StoreError>;

    /// Every stored sample, for snapshot export.
    async fn all_samples(&self) -> Result<Vec<RawSample>, StoreError>;

    /// Archive the given samples (as opaque serialized records stamped with
    /// `archived_at`) and delete them from live storage, as one atomic
    /// batch. Called once per run, after all merges have completed.
    async fn archive_and_delete(
        &self,
        archived_at: i64,
        samples: &[RawSample],
    ) -> Result<(), StoreError>;
}

/// Durable per-tile coverage storage.
#[async_trait]
pub trait TileStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<TileRecord>, StoreError>;

    /// Full replace of the tile's history and metadata. The write succeeds
    /// only if the stored generation still matches `tile.generation`,
    /// turning concurrent writers into per-tile conflicts instead of silent
    /// interleaving.
    async fn put(&self, tile: &CoverageTile) -> Result<(), StoreError>;

    /// Paginated listing of all tile keys with metadata.
    async fn list(&self, cursor: Option<String>) -> Result<TilePage, StoreError>;
}

/// Read-only repeater listing; records are maintained by the advertisement
/// ingestion layer.
#[async_trait]
pub trait RepeaterStore: Send + Sync {
    async fn list(&self, cursor: Option<String>) -> Result<RepeaterPage, StoreError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

#[derive(Debug, Default)]
struct SampleInner {
    live: Vec<RawSample>,
    archive: Vec<(i64, String)>,
}

/// In-memory [`SampleStore`].
#[derive(Debug, Default)]
pub struct MemorySampleStore {
    inner: Mutex<SampleInner>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, sample: RawSample) {
        self.inner.lock().await.live.push(sample);
    }

    pub async fn live_count(&self) -> usize {
        self.inner.lock().await.live.len()
    }

    pub async fn archived_count(&self) -> usize {
        self.inner.lock().await.archive.len()
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn samples_before(&self, cutoff: i64) -> Result<Vec<RawSample>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .live
            .iter()
            .filter(|s| s.time < cutoff)
            .cloned()
            .collect())
    }

    async fn all_samples(&self) -> Result<Vec<RawSample>, StoreError> {
        Ok(self.inner.lock().await.live.clone())
    }

    async fn archive_and_delete(
        &self,
        archived_at: i64,
        samples: &[RawSample],
    ) -> Result<(), StoreError> {
        let mut archived = Vec::with_capacity(samples.len());
        for sample in samples {
            archived.push((archived_at, serde_json::to_string(sample)?));
        }

        let hashes: HashSet<&str> = samples.iter().map(|s| s.hash.as_str()).collect();

        let mut inner = self.inner.lock().await;
        inner.archive.extend(archived);
        inner.live.retain(|s| !hashes.contains(s.hash.as_str()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredTile {
    history_json: String,
    meta: TileMetadata,
    generation: u64,
}

/// In-memory [`TileStore`] over an ordered key space, mirroring a KV store
/// that keeps the history as an opaque serialized value with metadata
/// alongside.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    inner: Mutex<BTreeMap<String, StoredTile>>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tile directly from raw history values, bypassing migration;
    /// used to stage legacy-format fixtures.
    pub async fn seed(&self, key: &str, history: &[serde_json::Value], meta: TileMetadata) {
        let stored = StoredTile {
            history_json: serde_json::Value::Array(history.to_vec()).to_string(),
            meta,
            generation: 1,
        };
        self.inner.lock().await.insert(key.to_string(), stored);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[async_trait]
impl TileStore for MemoryTileStore {
    async fn get(&self, key: &str) -> Result<Option<TileRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(stored) = inner.get(key) else {
            return Ok(None);
        };

        let history: Vec<serde_json::Value> = serde_json::from_str(&stored.history_json)?;
        Ok(Some(TileRecord {
            key: key.to_string(),
            history,
            meta: stored.meta.clone(),
            generation: stored.generation,
        }))
    }

    async fn put(&self, tile: &CoverageTile) -> Result<(), StoreError> {
        let history_json = serde_json::to_string(&tile.history)?;

        let mut inner = self.inner.lock().await;
        let current = inner.get(&tile.key).map(|s| s.generation).unwrap_or(0);
        if current != tile.generation {
            return Err(StoreError::Conflict(tile.key.clone()));
        }

        inner.insert(
            tile.key.clone(),
            StoredTile {
                history_json,
                meta: tile.meta.clone(),
                generation: tile.generation + 1,
            },
        );
        Ok(())
    }

    async fn list(&self, cursor: Option<String>) -> Result<TilePage, StoreError> {
        let inner = self.inner.lock().await;
        let range = match &cursor {
            Some(c) => inner.range::<String, _>((Bound::Excluded(c.clone()), Bound::Unbounded)),
            None => inner.range::<String, _>(..),
        };

        let tiles: Vec<(String, TileMetadata)> = range
            .take(PAGE_SIZE)
            .map(|(k, v)| (k.clone(), v.meta.clone()))
            .collect();
        let cursor = if tiles.len() == PAGE_SIZE {
            tiles.last().map(|(k, _)| k.clone())
        } else {
            None
        };

        Ok(TilePage { tiles, cursor })
    }
}

/// In-memory [`RepeaterStore`] over a fixed listing.
#[derive(Debug, Default)]
pub struct MemoryRepeaterStore {
    repeaters: Vec<Repeater>,
}

impl MemoryRepeaterStore {
    pub fn new(repeaters: Vec<Repeater>) -> Self {
        Self { repeaters }
    }
}

#[async_trait]
impl RepeaterStore for MemoryRepeaterStore {
    async fn list(&self, cursor: Option<String>) -> Result<RepeaterPage, StoreError> {
        let start = match &cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|e| StoreError::Unavailable(format!("bad cursor: {e}")))?,
            None => 0,
        };

        let end = (start + PAGE_SIZE).min(self.repeaters.len());
        let repeaters = self.repeaters[start..end].to_vec();
        let cursor = if end < self.repeaters.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(RepeaterPage { repeaters, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::UberSample;

    fn sample(hash: &str, time: i64) -> RawSample {
        RawSample {
            hash: hash.to_string(),
            time,
            observed: false,
            heard_via: vec![],
            snr: None,
            rssi: None,
        }
    }

    fn tile(key: &str, generation: u64) -> CoverageTile {
        CoverageTile {
            key: key.to_string(),
            history: vec![UberSample {
                time: 100,
                observed: 1,
                heard: 1,
                lost: 0,
                snr: None,
                rssi: None,
                last_observed: 100,
                last_heard: 100,
                repeaters: vec![],
            }],
            meta: TileMetadata {
                updated: Some(100),
                ..TileMetadata::default()
            },
            generation,
        }
    }

    #[tokio::test]
    async fn test_samples_before_is_strict() {
        let store = MemorySampleStore::new();
        store.insert(sample("9q8yyk8y", 10)).await;
        store.insert(sample("9q8yym11", 20)).await;

        let old = store.samples_before(20).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].time, 10);
    }

    #[tokio::test]
    async fn test_archive_and_delete_removes_live_samples() {
        let store = MemorySampleStore::new();
        let a = sample("9q8yyk8y", 10);
        let b = sample("9q8yym11", 20);
        store.insert(a.clone()).await;
        store.insert(b).await;

        store.archive_and_delete(99, &[a]).await.unwrap();
        assert_eq!(store.live_count().await, 1);
        assert_eq!(store.archived_count().await, 1);
    }

    #[tokio::test]
    async fn test_tile_round_trip() {
        let store = MemoryTileStore::new();
        store.put(&tile("9q8yyk", 0)).await.unwrap();

        let record = store.get("9q8yyk").await.unwrap().unwrap();
        assert_eq!(record.history.len(), 1);
        assert_eq!(record.meta.updated, Some(100));
        assert_eq!(record.generation, 1);
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_rejects_stale_generation() {
        let store = MemoryTileStore::new();
        store.put(&tile("9q8yyk", 0)).await.unwrap();

        // A second writer derived from the pre-write record loses.
        let result = store.put(&tile("9q8yyk", 0)).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        // A writer derived from the current record wins.
        store.put(&tile("9q8yyk", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_tile_listing_paginates() {
        let store = MemoryTileStore::new();
        for i in 0..205 {
            store.put(&tile(&format!("tile{i:04}"), 0)).await.unwrap();
        }

        let mut cursor = None;
        let mut seen = 0;
        let mut pages = 0;
        loop {
            let page = store.list(cursor).await.unwrap();
            seen += page.tiles.len();
            pages += 1;
            cursor = page.cursor;
            if cursor.is_none() {
                break;
            }
        }
        assert_eq!(seen, 205);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_repeater_listing_paginates() {
        let repeaters: Vec<Repeater> = (0..150)
            .map(|i| Repeater {
                id: format!("r{i}"),
                name: "x".to_string(),
                lat: 0.0,
                lon: 0.0,
                elevation_m: 0.0,
                last_advert: 0,
            })
            .collect();
        let store = MemoryRepeaterStore::new(repeaters);

        let first = store.list(None).await.unwrap();
        assert_eq!(first.repeaters.len(), 100);
        let second = store.list(first.cursor).await.unwrap();
        assert_eq!(second.repeaters.len(), 50);
        assert!(second.cursor.is_none());
    }
}
