//! The shared calibration dataset.
//!
//! A [`Dataset`] holds the calibration configuration, the sensor descriptions
//! and every [`Collection`] (one synchronized multi-sensor snapshot). Maps are
//! `BTreeMap`s so iteration order is the sorted key order everywhere; the
//! first collection in that order is the representative collection.

use crate::camera::CameraIntrinsics;
use crate::error::{DatasetError, DatasetResult};
use crate::math::{Pt3, Real};
use crate::pattern::PatternConfig;
use crate::transform::{Transform, TransformKey};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Sensor modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Camera producing corner detections.
    Image,
    /// 2D range scanner.
    LaserScan,
    /// 3D point-cloud sensor (lidar, depth camera).
    PointCloud,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub modality: Modality,
    /// Parent link of the transform this sensor calibrates.
    pub calibration_parent: String,
    /// Child link of the transform this sensor calibrates.
    pub calibration_child: String,
    /// Frame the raw observations are expressed in.
    pub frame_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<CameraIntrinsics>,
}

impl Sensor {
    pub fn calibration_key(&self) -> TransformKey {
        TransformKey::new(
            self.calibration_parent.clone(),
            self.calibration_child.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    pub world_link: String,
    /// Sensor whose calibrated transform is held fixed to remove gauge freedom.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchored_sensor: Option<String>,
    pub calibration_pattern: PatternConfig,
}

/// Raw observation payload of one sensor in one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorData {
    /// Image pixels live in a sibling file; only the reference is kept.
    Image {
        data_file: String,
        width: u32,
        height: u32,
    },
    LaserScan {
        angle_min: Real,
        angle_increment: Real,
        ranges: Vec<Real>,
    },
    PointCloud { points: Vec<[Real; 3]> },
}

impl SensorData {
    /// Cartesian point of a scan index in the sensor frame (scan plane is z = 0).
    pub fn scan_point(&self, idx: usize) -> Option<Pt3> {
        match self {
            SensorData::LaserScan {
                angle_min,
                angle_increment,
                ranges,
            } => {
                let r = *ranges.get(idx)?;
                let a = angle_min + angle_increment * idx as Real;
                Some(Pt3::new(r * a.cos(), r * a.sin(), 0.0))
            }
            SensorData::PointCloud { points } => points.get(idx).map(|p| Pt3::from(*p)),
            SensorData::Image { .. } => None,
        }
    }
}

/// One detected pattern corner in an image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CornerObservation {
    pub id: usize,
    pub x: Real,
    pub y: Real,
}

/// 2D laser edge: the hit indices on both sides of a gap in the hit sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaserEdge {
    pub before: usize,
    pub after: usize,
}

/// Derived features written by the extraction phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Features {
    Corners {
        kept: Vec<CornerObservation>,
    },
    LaserScan {
        /// First and last valid hit index.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limits: Option<(usize, usize)>,
        edges: Vec<LaserEdge>,
        beams: Vec<usize>,
    },
    PointCloud {
        limit_points: Vec<usize>,
        middle_points: Vec<usize>,
    },
}

/// Detection labels of one sensor in one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorLabels {
    pub detected: bool,
    /// Pattern-hit indices into a scan or point cloud.
    #[serde(default)]
    pub idxs: Vec<usize>,
    /// Corner detections of an image sensor.
    #[serde(default)]
    pub corners: Vec<CornerObservation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Features>,
}

/// One synchronized snapshot across all sensors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub data: BTreeMap<String, SensorData>,
    #[serde(default)]
    pub labels: BTreeMap<String, SensorLabels>,
    /// Transforms keyed by `"<parent>-<child>"`.
    #[serde(default)]
    pub transforms: BTreeMap<String, Transform>,
}

impl Collection {
    pub fn transform(&self, key: &TransformKey) -> Option<&Transform> {
        self.transforms.get(&key.as_string())
    }

    pub fn transform_mut(&mut self, key: &TransformKey) -> Option<&mut Transform> {
        self.transforms.get_mut(&key.as_string())
    }

    pub fn insert_transform(&mut self, transform: Transform) {
        self.transforms.insert(transform.key().as_string(), transform);
    }

    /// Whether `sensor` detected the pattern in this collection.
    pub fn detected(&self, sensor: &str) -> bool {
        self.labels.get(sensor).is_some_and(|l| l.detected)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub calibration_config: CalibrationConfig,
    pub sensors: BTreeMap<String, Sensor>,
    pub collections: BTreeMap<String, Collection>,
}

impl Dataset {
    pub fn from_json_str(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Read a dataset JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read dataset {}", path.display()))?;
        Self::from_json_str(&text)
            .with_context(|| format!("failed to parse dataset {}", path.display()))
    }

    pub fn pattern(&self) -> &PatternConfig {
        &self.calibration_config.calibration_pattern
    }

    pub fn sensor(&self, name: &str) -> DatasetResult<&Sensor> {
        self.sensors
            .get(name)
            .ok_or_else(|| DatasetError::UnknownSensor(name.to_string()))
    }

    pub fn sensor_mut(&mut self, name: &str) -> DatasetResult<&mut Sensor> {
        self.sensors
            .get_mut(name)
            .ok_or_else(|| DatasetError::UnknownSensor(name.to_string()))
    }

    pub fn collection(&self, key: &str) -> DatasetResult<&Collection> {
        self.collections
            .get(key)
            .ok_or_else(|| DatasetError::UnknownCollection(key.to_string()))
    }

    pub fn collection_mut(&mut self, key: &str) -> DatasetResult<&mut Collection> {
        self.collections
            .get_mut(key)
            .ok_or_else(|| DatasetError::UnknownCollection(key.to_string()))
    }

    /// Key of the first collection in sorted order.
    pub fn representative_collection(&self) -> Option<&str> {
        self.collections.keys().next().map(String::as_str)
    }

    /// Transform `key` in `collection`, or an error naming both.
    pub fn transform(&self, collection: &str, key: &TransformKey) -> DatasetResult<&Transform> {
        self.collection(collection)?
            .transform(key)
            .ok_or_else(|| DatasetError::MissingTransform {
                collection: collection.to_string(),
                key: key.as_string(),
            })
    }

    pub fn transform_mut(
        &mut self,
        collection: &str,
        key: &TransformKey,
    ) -> DatasetResult<&mut Transform> {
        self.collection_mut(collection)?
            .transform_mut(key)
            .ok_or_else(|| DatasetError::MissingTransform {
                collection: collection.to_string(),
                key: key.as_string(),
            })
    }
}
