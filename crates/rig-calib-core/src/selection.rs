//! Declarative collection and sensor selection.
//!
//! Filters run on a [`Dataset`] before calibration starts. They only ever
//! remove whole sensors or whole collections.

use crate::dataset::{Dataset, Modality};
use log::info;
use serde::{Deserialize, Serialize};

/// Name-based predicate over sorted keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NameFilter {
    /// Keep exactly these names.
    Names { names: Vec<String> },
    /// Keep names starting with `prefix`.
    Prefix { prefix: String },
    /// Keep positions `start..end` of the sorted key order.
    IndexRange { start: usize, end: usize },
}

impl NameFilter {
    /// Keys from `keys` (already sorted) that pass the filter.
    pub fn select<'a>(&self, keys: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        keys.into_iter()
            .enumerate()
            .filter(|(pos, key)| match self {
                NameFilter::Names { names } => names.iter().any(|n| n == *key),
                NameFilter::Prefix { prefix } => key.starts_with(prefix.as_str()),
                NameFilter::IndexRange { start, end } => (*start..*end).contains(pos),
            })
            .map(|(_, key)| key.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub collections: Option<NameFilter>,
    pub sensors: Option<NameFilter>,
    /// Drop collections where any selected sensor missed the pattern.
    pub require_all_detected: bool,
    /// Drop collections where an image sensor saw fewer than this fraction of corners.
    pub min_corner_fraction: Option<f64>,
}

/// What a selection pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSummary {
    pub removed_sensors: Vec<String>,
    pub removed_collections: Vec<String>,
}

impl SelectionConfig {
    pub fn apply(&self, dataset: &mut Dataset) -> SelectionSummary {
        let mut summary = SelectionSummary::default();

        if let Some(filter) = &self.sensors {
            let keep = filter.select(dataset.sensors.keys());
            summary.removed_sensors = dataset
                .sensors
                .keys()
                .filter(|k| !keep.contains(k))
                .cloned()
                .collect();
            for name in &summary.removed_sensors {
                dataset.sensors.remove(name);
                for collection in dataset.collections.values_mut() {
                    collection.data.remove(name);
                    collection.labels.remove(name);
                }
            }
        }

        let mut drop: Vec<String> = match &self.collections {
            Some(filter) => {
                let keep = filter.select(dataset.collections.keys());
                dataset
                    .collections
                    .keys()
                    .filter(|k| !keep.contains(k))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        let expected_corners = dataset.pattern().num_corners() as f64;
        for (key, collection) in &dataset.collections {
            if drop.contains(key) {
                continue;
            }
            let incomplete = self.require_all_detected
                && dataset.sensors.keys().any(|s| !collection.detected(s));
            let partial = self.min_corner_fraction.is_some_and(|fraction| {
                dataset
                    .sensors
                    .iter()
                    .filter(|(_, s)| s.modality == Modality::Image)
                    .filter_map(|(name, _)| collection.labels.get(name))
                    .filter(|l| l.detected)
                    .any(|l| (l.corners.len() as f64) < fraction * expected_corners)
            });
            if incomplete || partial {
                drop.push(key.clone());
            }
        }

        for key in &drop {
            dataset.collections.remove(key);
        }
        summary.removed_collections = drop;

        if !summary.removed_sensors.is_empty() || !summary.removed_collections.is_empty() {
            info!(
                "selection removed {} sensor(s) and {} collection(s); {} collection(s) remain",
                summary.removed_sensors.len(),
                summary.removed_collections.len(),
                dataset.collections.len()
            );
        }
        summary
    }
}
