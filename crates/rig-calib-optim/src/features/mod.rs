//! Per-modality feature extraction.
//!
//! Extraction turns the detection labels of every `(collection, sensor)` pair
//! into [`Features`] that decide which residuals exist. It only writes the
//! `features` field of each label and never fails: problems are counted in
//! the returned [`ExtractionSummary`].

mod cloud;
mod image;
mod laser;

pub use cloud::{cluster_beams, BeamCluster, CloudFeatures};
pub use image::{extrema_corners, select_corners};
pub use laser::detect_edges;

use log::{info, warn};
use rig_calib_core::{Dataset, Features, Modality, SensorData};
use serde::{Deserialize, Serialize};

/// Which image corners become residuals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerMode {
    #[default]
    All,
    /// Only the four outermost detected corners.
    Extrema,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOptions {
    /// Fraction of image corners, laser beams and lidar middle points kept, in (0, 1].
    pub residual_sampling_ratio: f64,
    pub corner_mode: CornerMode,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            residual_sampling_ratio: 1.0,
            corner_mode: CornerMode::All,
        }
    }
}

impl FeatureOptions {
    /// Keep every `step()`-th index: `max(1, round(1 / ratio))`.
    pub fn step(&self) -> usize {
        let ratio = self.residual_sampling_ratio;
        if !(ratio > 0.0) {
            return 1;
        }
        ((1.0 / ratio).round() as usize).max(1)
    }
}

/// Counts gathered over one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    /// Pairs where the sensor did not detect the pattern.
    pub empty_detections: usize,
    /// Point-cloud detections where no hit index produced a beam cluster.
    pub empty_clusters: usize,
    /// Pairs whose raw data did not match the sensor modality.
    pub skipped_sensors: usize,
    /// Hit indices or corner ids that could not be used.
    pub invalid_points: usize,
    pub corners: usize,
    pub edges: usize,
    pub beams: usize,
    pub limit_points: usize,
    pub middle_points: usize,
}

/// Compute features for every detected `(collection, sensor)` pair.
pub fn extract_features(dataset: &mut Dataset, options: &FeatureOptions) -> ExtractionSummary {
    let mut summary = ExtractionSummary::default();
    let step = options.step();
    let pattern = dataset.calibration_config.calibration_pattern.clone();

    for (ckey, collection) in dataset.collections.iter_mut() {
        for (name, sensor) in &dataset.sensors {
            let Some(labels) = collection.labels.get_mut(name) else {
                summary.empty_detections += 1;
                continue;
            };
            labels.features = None;
            if !labels.detected {
                summary.empty_detections += 1;
                continue;
            }

            let data = collection.data.get(name);
            let features = match (sensor.modality, data) {
                (Modality::Image, _) => {
                    let (kept, invalid) =
                        select_corners(&labels.corners, &pattern, options.corner_mode, step);
                    summary.invalid_points += invalid;
                    summary.corners += kept.len();
                    Features::Corners { kept }
                }
                (Modality::LaserScan, Some(SensorData::LaserScan { ranges, .. })) => {
                    let valid: Vec<usize> = labels
                        .idxs
                        .iter()
                        .copied()
                        .filter(|&i| i < ranges.len())
                        .collect();
                    summary.invalid_points += labels.idxs.len() - valid.len();
                    let limits = valid.first().zip(valid.last()).map(|(&a, &b)| (a, b));
                    let edges = detect_edges(&valid);
                    let beams: Vec<usize> = valid.iter().copied().step_by(step).collect();
                    summary.edges += edges.len();
                    summary.beams += beams.len();
                    Features::LaserScan {
                        limits,
                        edges,
                        beams,
                    }
                }
                (Modality::PointCloud, Some(SensorData::PointCloud { points })) => {
                    let cloud = CloudFeatures::extract(points, &labels.idxs, step);
                    summary.invalid_points += cloud.invalid;
                    if cloud.limit_points.is_empty() {
                        summary.empty_clusters += 1;
                    }
                    summary.limit_points += cloud.limit_points.len();
                    summary.middle_points += cloud.middle_points.len();
                    Features::PointCloud {
                        limit_points: cloud.limit_points,
                        middle_points: cloud.middle_points,
                    }
                }
                (modality, _) => {
                    warn!(
                        "collection {ckey}: sensor {name} ({modality:?}) has no matching data, \
                         skipping"
                    );
                    summary.skipped_sensors += 1;
                    continue;
                }
            };
            labels.features = Some(features);
        }
    }

    info!(
        "features: {} corners, {} edges, {} beams, {} limit / {} middle points; \
         {} empty detections, {} empty clusters, {} skipped, {} invalid points",
        summary.corners,
        summary.edges,
        summary.beams,
        summary.limit_points,
        summary.middle_points,
        summary.empty_detections,
        summary.empty_clusters,
        summary.skipped_sensors,
        summary.invalid_points
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig_calib_core::synthetic::{mixed_rig, SyntheticRig};

    #[test]
    fn sampling_step_rounds_inverse_ratio() {
        let step = |r| FeatureOptions {
            residual_sampling_ratio: r,
            ..Default::default()
        }
        .step();
        assert_eq!(step(1.0), 1);
        assert_eq!(step(0.5), 2);
        assert_eq!(step(0.3), 3);
        assert_eq!(step(0.0), 1);
        assert_eq!(step(2.0), 1);
    }

    #[test]
    fn every_modality_gets_features() {
        let mut dataset = mixed_rig(&SyntheticRig::default()).dataset;
        let summary = extract_features(&mut dataset, &FeatureOptions::default());
        assert_eq!(summary.empty_detections, 0);
        assert_eq!(summary.skipped_sensors, 0);
        for collection in dataset.collections.values() {
            assert!(matches!(
                collection.labels["camera"].features,
                Some(Features::Corners { .. })
            ));
            assert!(matches!(
                collection.labels["laser"].features,
                Some(Features::LaserScan { .. })
            ));
            assert!(matches!(
                collection.labels["lidar"].features,
                Some(Features::PointCloud { .. })
            ));
        }
        assert!(summary.limit_points > 0 && summary.middle_points > 0);
    }

    #[test]
    fn undetected_pairs_are_counted_not_fatal() {
        let mut dataset = mixed_rig(&SyntheticRig::default()).dataset;
        let labels = dataset
            .collections
            .get_mut("0")
            .unwrap()
            .labels
            .get_mut("lidar")
            .unwrap();
        labels.detected = false;
        labels.idxs.clear();
        let summary = extract_features(&mut dataset, &FeatureOptions::default());
        assert_eq!(summary.empty_detections, 1);
        assert!(dataset.collections["0"].labels["lidar"].features.is_none());
    }

    #[test]
    fn laser_labels_are_left_untouched() {
        let mut dataset = mixed_rig(&SyntheticRig::default()).dataset;
        let labels = dataset
            .collections
            .get_mut("0")
            .unwrap()
            .labels
            .get_mut("laser")
            .unwrap();
        let first = labels.idxs[0];
        let last = *labels.idxs.last().unwrap();
        labels.idxs.push(100_000);
        let raw = labels.idxs.clone();

        let summary = extract_features(&mut dataset, &FeatureOptions::default());
        assert_eq!(summary.invalid_points, 1);
        let labels = &dataset.collections["0"].labels["laser"];
        assert_eq!(labels.idxs, raw);
        match &labels.features {
            Some(Features::LaserScan { limits, beams, .. }) => {
                assert_eq!(*limits, Some((first, last)));
                assert!(!beams.contains(&100_000));
            }
            other => panic!("unexpected features {other:?}"),
        }
    }

    #[test]
    fn mismatched_data_is_skipped() {
        let mut dataset = mixed_rig(&SyntheticRig::default()).dataset;
        dataset
            .collections
            .get_mut("1")
            .unwrap()
            .data
            .insert("laser".into(), SensorData::PointCloud { points: vec![] });
        let summary = extract_features(&mut dataset, &FeatureOptions::default());
        assert_eq!(summary.skipped_sensors, 1);
        assert!(dataset.collections["1"].labels["laser"].features.is_none());
    }
}
