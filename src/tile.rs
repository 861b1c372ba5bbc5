//! Per-tile coverage state: bounded uber-sample history, derived metadata,
//! and migration of older stored record shapes.
//!
//! The stored format has gone through three generations. The oldest records
//! carry a `path` list (and sometimes a stringified `time`); the middle
//! generation tracks heard/lost but predates round-trip observations; the
//! current shape is [`UberSample`]. Reads migrate older shapes through a
//! pure transform into the current one; records that fit no known shape are
//! dropped individually so one bad entry cannot poison the tile.

use std::fmt;

use log::warn;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::consolidate::{consolidate, max_defined, UberSample};
use crate::{CoverageConfig, RawSample};

/// Derived metadata summarizing a tile's retained history.
///
/// `observed`, `updated`, and `last_observed` are optional because tiles
/// written before round-trip pings existed never recorded them; absent means
/// "not recorded", not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<u32>,
    pub heard: u32,
    pub lost: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_observed: Option<i64>,
    pub last_heard: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    /// Every repeater id ever seen in this tile's history. Monotonic: ids
    /// survive even after the history entries that referenced them are
    /// evicted by the cap.
    pub hit_repeaters: Vec<String>,
}

/// A tile as read back from the store: history entries still in their raw
/// serialized form, migrated lazily at merge time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileRecord {
    pub key: String,
    pub history: Vec<serde_json::Value>,
    pub meta: TileMetadata,
    /// Store generation counter used for compare-and-swap writes.
    pub generation: u64,
}

/// A fully migrated, freshly merged tile ready to be written back.
/// Write-back replaces the whole record; there are no partial updates.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageTile {
    pub key: String,
    pub history: Vec<UberSample>,
    pub meta: TileMetadata,
    /// Generation of the record this tile was derived from (0 if new).
    pub generation: u64,
}

// ============================================================================
// Stored record migration
// ============================================================================

/// The three stored history shapes, newest first. Untagged deserialization
/// tries each in order, so a record lands in the newest shape its fields
/// can satisfy.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredSample {
    Current(UberSample),
    Relayed(RelayedSample),
    PathOnly(PathSample),
}

/// Middle-generation record: heard/lost counts but no round-trip data.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayedSample {
    #[serde(deserialize_with = "de_loose_time")]
    time: i64,
    heard: u32,
    lost: u32,
    #[serde(default)]
    last_heard: i64,
    #[serde(default)]
    repeaters: Vec<String>,
}

/// Oldest record shape: a relay path and a timestamp that one version
/// stored as a string.
#[derive(Debug, Deserialize)]
struct PathSample {
    #[serde(deserialize_with = "de_loose_time")]
    time: i64,
    path: Vec<String>,
}

impl StoredSample {
    /// Migrate to the current shape. Records that predate round-trip
    /// observations are assumed to have been observed whenever heard.
    fn into_uber(self) -> UberSample {
        match self {
            StoredSample::Current(uber) => uber,
            StoredSample::Relayed(r) => UberSample {
                time: r.time,
                observed: r.heard,
                heard: r.heard,
                lost: r.lost,
                snr: None,
                rssi: None,
                last_observed: r.last_heard,
                last_heard: r.last_heard,
                repeaters: r.repeaters,
            },
            StoredSample::PathOnly(p) => {
                let heard = if p.path.is_empty() { 0 } else { 1 };
                let last_heard = if heard > 0 { p.time } else { 0 };
                UberSample {
                    time: p.time,
                    observed: heard,
                    heard,
                    lost: 1 - heard,
                    snr: None,
                    rssi: None,
                    last_observed: last_heard,
                    last_heard,
                    repeaters: p.path,
                }
            }
        }
    }
}

/// Accept a timestamp stored as a JSON number or a numeric string.
fn de_loose_time<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct LooseTime;

    impl Visitor<'_> for LooseTime {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a timestamp as a number or numeric string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            Ok(v as i64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            Ok(v as i64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.parse().map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(LooseTime)
}

/// Migrate raw stored history entries to the current shape.
///
/// Returns the migrated entries plus the number dropped because they fit no
/// known shape; dropped entries are logged and excluded from derived
/// metadata, but never take the rest of the tile down with them.
pub fn migrate_history(raw: &[serde_json::Value]) -> (Vec<UberSample>, usize) {
    let mut history = Vec::with_capacity(raw.len());
    let mut dropped = 0;

    for value in raw {
        match serde_json::from_value::<StoredSample>(value.clone()) {
            Ok(stored) => history.push(stored.into_uber()),
            Err(err) => {
                warn!("Dropping unreadable history entry: {}", err);
                dropped += 1;
            }
        }
    }

    (history, dropped)
}

// ============================================================================
// Merge
// ============================================================================

/// Merge a tile's pending samples into its persisted state.
///
/// Consolidates the batch against the tile's last update time, appends the
/// resulting uber-sample, evicts the oldest entries beyond the history cap,
/// and recomputes metadata across what remains. Returns `None` when every
/// sample was already consolidated (nothing to write).
pub fn merge_tile(
    key: &str,
    prev: Option<&TileRecord>,
    samples: &[RawSample],
    config: &CoverageConfig,
) -> Option<CoverageTile> {
    let cutoff = prev.and_then(|p| p.meta.updated).unwrap_or(0);
    let uber = consolidate(samples, cutoff)?;

    let (mut history, dropped) = match prev {
        Some(p) => migrate_history(&p.history),
        None => (Vec::new(), 0),
    };
    if dropped > 0 {
        warn!("Tile {}: excluded {} unreadable history entries", key, dropped);
    }

    history.push(uber);

    // Evict oldest-by-time, not oldest-by-insertion; merges can arrive out
    // of timestamp order.
    if history.len() > config.history_cap {
        history.sort_by_key(|u| u.time);
        let excess = history.len() - config.history_cap;
        history.drain(..excess);
    }

    // Start the repeater union from the previously persisted set so ids
    // outlive the history entries that earned them.
    let mut hit_repeaters: Vec<String> = prev
        .map(|p| p.meta.hit_repeaters.clone())
        .unwrap_or_default();

    let mut meta = TileMetadata {
        observed: Some(0),
        ..TileMetadata::default()
    };
    for entry in &history {
        meta.observed = Some(meta.observed.unwrap_or(0) + entry.observed);
        meta.heard += entry.heard;
        meta.lost += entry.lost;
        meta.snr = max_defined(meta.snr, entry.snr);
        meta.rssi = max_defined(meta.rssi, entry.rssi);
        meta.last_observed = Some(meta.last_observed.unwrap_or(0).max(entry.last_observed));
        meta.last_heard = meta.last_heard.max(entry.last_heard);
        meta.updated = Some(meta.updated.unwrap_or(0).max(entry.time));

        for id in &entry.repeaters {
            let id = id.to_lowercase();
            if !hit_repeaters.contains(&id) {
                hit_repeaters.push(id);
            }
        }
    }
    meta.hit_repeaters = hit_repeaters;

    Some(CoverageTile {
        key: key.to_string(),
        history,
        meta,
        generation: prev.map(|p| p.generation).unwrap_or(0),
    })
}

// ============================================================================
// In-memory summary
// ============================================================================

/// A tile-level coverage summary, either folded directly from raw samples or
/// projected from persisted metadata. This is the shape the proximity graph
/// is built over.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageSummary {
    pub key: String,
    pub observed: u32,
    pub heard: u32,
    pub lost: u32,
    pub snr: Option<f64>,
    pub rssi: Option<f64>,
    pub updated: i64,
    pub last_heard: i64,
    pub last_observed: i64,
    pub repeaters: Vec<String>,
}

impl CoverageSummary {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Fold one raw sample into the summary.
    pub fn absorb(&mut self, sample: &RawSample) {
        let heard = sample.heard();

        if sample.observed {
            self.observed += 1;
            self.last_observed = self.last_observed.max(sample.time);
        }
        if heard {
            self.heard += 1;
            self.last_heard = self.last_heard.max(sample.time);
        } else {
            self.lost += 1;
        }

        self.updated = self.updated.max(sample.time);
        self.snr = max_defined(self.snr, sample.snr);
        self.rssi = max_defined(self.rssi, sample.rssi);

        for id in &sample.heard_via {
            let id = id.to_lowercase();
            if !self.repeaters.contains(&id) {
                self.repeaters.push(id);
            }
        }
    }

    /// Project persisted tile metadata into a summary. Fields a legacy tile
    /// never recorded fall back the way the wire format defines: a tile that
    /// was heard was assumed observed, and an unknown update time falls back
    /// to the last-heard time.
    pub fn from_metadata(key: &str, meta: &TileMetadata) -> Self {
        let last_heard = if meta.heard > 0 { meta.last_heard } else { 0 };
        Self {
            key: key.to_string(),
            observed: meta.observed.unwrap_or(meta.heard),
            heard: meta.heard,
            lost: meta.lost,
            snr: meta.snr,
            rssi: meta.rssi,
            updated: meta.updated.unwrap_or(last_heard),
            last_heard,
            last_observed: meta.last_observed.unwrap_or(last_heard),
            repeaters: meta.hit_repeaters.clone(),
        }
    }
}
