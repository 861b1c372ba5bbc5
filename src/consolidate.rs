//! Batch consolidation of raw samples into uber-samples.
//!
//! A consolidation run folds every pending sample for a tile into a single
//! summary record. Merging the whole backlog into one record per run means a
//! burst of spam samples for one tile still costs only one history slot;
//! inflating long-term history takes a sustained effort across many runs.

use serde::{Deserialize, Serialize};

use crate::RawSample;

/// One consolidation run's summary record for a tile.
///
/// Every constituent sample counts toward exactly one of heard or lost;
/// observed samples also count as heard, so `observed <= heard` and
/// `heard + lost` equals the number of samples folded in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UberSample {
    /// Max timestamp of the constituent samples, epoch milliseconds.
    pub time: i64,
    pub observed: u32,
    pub heard: u32,
    pub lost: u32,
    /// Max SNR across the batch, if any sample carried one.
    pub snr: Option<f64>,
    /// Max RSSI across the batch, if any sample carried one.
    pub rssi: Option<f64>,
    #[serde(default)]
    pub last_observed: i64,
    #[serde(default)]
    pub last_heard: i64,
    /// Deduplicated lower-cased ids of every repeater that relayed a sample.
    #[serde(default)]
    pub repeaters: Vec<String>,
}

impl UberSample {
    fn empty() -> Self {
        Self {
            time: 0,
            observed: 0,
            heard: 0,
            lost: 0,
            snr: None,
            rssi: None,
            last_observed: 0,
            last_heard: 0,
            repeaters: Vec::new(),
        }
    }
}

/// Max of two optional readings, treating `None` as absent rather than zero.
pub(crate) fn max_defined(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

/// Fold a tile's pending samples into one uber-sample.
///
/// Samples with `time <= cutoff` were handled by a previous run and are
/// skipped, which makes re-running over overlapping data a no-op per sample.
/// Returns `None` when every sample in the batch was already consolidated.
pub fn consolidate(samples: &[RawSample], cutoff: i64) -> Option<UberSample> {
    let mut uber = UberSample::empty();

    for sample in samples {
        if sample.time <= cutoff {
            continue;
        }

        uber.time = uber.time.max(sample.time);
        uber.snr = max_defined(uber.snr, sample.snr);
        uber.rssi = max_defined(uber.rssi, sample.rssi);

        if sample.observed {
            uber.observed += 1;
            uber.last_observed = uber.last_observed.max(sample.time);
        }

        if sample.heard() {
            uber.heard += 1;
            uber.last_heard = uber.last_heard.max(sample.time);
        } else {
            uber.lost += 1;
        }

        for id in &sample.heard_via {
            let id = id.to_lowercase();
            if !uber.repeaters.contains(&id) {
                uber.repeaters.push(id);
            }
        }
    }

    // An unset time means the whole batch was filtered out; returning the
    // zeroed record would poison the tile history.
    if uber.time == 0 {
        None
    } else {
        Some(uber)
    }
}

/// Group samples by tile key, preserving first-seen tile order and per-tile
/// sample order. Built fresh for every run; nothing is shared across runs.
pub fn group_by_tile(samples: Vec<RawSample>) -> Vec<(String, Vec<RawSample>)> {
    let mut order: Vec<(String, Vec<RawSample>)> = Vec::new();
    let mut slots: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for sample in samples {
        let key = sample.tile_key().to_string();
        match slots.get(&key) {
            Some(&slot) => order[slot].1.push(sample),
            None => {
                slots.insert(key.clone(), order.len());
                order.push((key, vec![sample]));
            }
        }
    }

    order
}
