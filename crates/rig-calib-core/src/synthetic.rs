//! Deterministic synthetic rigs for tests and demos.
//!
//! A rig is a set of sensors mounted on `base_link` observing a planar
//! pattern that moves between collections. Observations are generated from
//! the exact geometry (camera corners by projection, laser and lidar hits by
//! ray casting against the board rectangle), then every optimizable
//! transform is perturbed by a fixed offset to produce the initial guess.

use crate::camera::{BrownConrady5, CameraIntrinsics};
use crate::dataset::{
    CalibrationConfig, Collection, CornerObservation, Dataset, Modality, Sensor, SensorData,
    SensorLabels,
};
use crate::math::{Iso3, Pt3, Real, Vec3};
use crate::pattern::{BorderSize, GridSize, PatternConfig};
use crate::transform::Transform;
use nalgebra::{Rotation3, UnitQuaternion};
use std::collections::BTreeMap;

pub const WORLD_LINK: &str = "world";
pub const BASE_LINK: &str = "base_link";
pub const PATTERN_LINK: &str = "pattern";

/// Range written for laser beams and lidar rays that miss the board.
const BACKGROUND_RANGE: Real = 8.0;

/// A sensor to place on the synthetic rig.
#[derive(Debug, Clone)]
pub struct SyntheticSensor {
    pub name: String,
    pub modality: Modality,
    /// Pose of the sensor frame in `base_link`.
    pub pose: Iso3,
}

impl SyntheticSensor {
    pub fn camera(name: &str, translation: Vec3, rpy: [Real; 3]) -> Self {
        Self {
            name: name.to_string(),
            modality: Modality::Image,
            pose: Transform::from_rpy(BASE_LINK, name, translation, rpy).to_iso3(),
        }
    }

    /// Scanner whose scan plane contains the base X and Z axes (x forward along base Z).
    pub fn laser(name: &str, translation: Vec3) -> Self {
        Self {
            name: name.to_string(),
            modality: Modality::LaserScan,
            pose: Iso3::from_parts(translation.into(), forward_looking_rotation()),
        }
    }

    /// Multi-beam lidar with its up axis along base -Y and x forward along base Z.
    pub fn lidar(name: &str, translation: Vec3) -> Self {
        Self {
            name: name.to_string(),
            modality: Modality::PointCloud,
            pose: Iso3::from_parts(translation.into(), forward_looking_rotation()),
        }
    }
}

fn forward_looking_rotation() -> UnitQuaternion<Real> {
    let x = Vec3::new(0.0, 0.0, 1.0);
    let y = Vec3::new(-1.0, 0.0, 0.0);
    let z = x.cross(&y);
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_basis_unchecked(&[x, y, z]))
}

/// Synthetic rig options.
#[derive(Debug, Clone)]
pub struct SyntheticRig {
    pub num_collections: usize,
    pub fixed_pattern: bool,
    pub grid: GridSize,
    pub square: Real,
    /// Added to the translation of every optimizable transform in the initial guess.
    pub translation_offset: Vec3,
    /// Added to the rotation vector of every optimizable transform in the initial guess.
    pub rotation_offset: Vec3,
    /// When non-zero, every `n`-th laser hit is reported as a miss, splitting
    /// the hit sequence into segments.
    pub scan_dropout: usize,
}

impl Default for SyntheticRig {
    fn default() -> Self {
        Self {
            num_collections: 3,
            fixed_pattern: false,
            grid: GridSize { x: 5, y: 4 },
            square: 0.1,
            translation_offset: Vec3::new(0.02, -0.01, 0.015),
            rotation_offset: Vec3::new(0.01, -0.015, 0.01),
            scan_dropout: 0,
        }
    }
}

/// Generated dataset plus the exact dataset it was perturbed from.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub dataset: Dataset,
    pub truth: Dataset,
}

pub fn camera_intrinsics() -> CameraIntrinsics {
    CameraIntrinsics {
        width: 640,
        height: 480,
        fx: 500.0,
        fy: 500.0,
        cx: 320.0,
        cy: 240.0,
        distortion: BrownConrady5::default(),
    }
}

/// Pose of the pattern in `base_link` for collection `idx`.
pub fn pattern_pose(rig: &SyntheticRig, idx: usize) -> Iso3 {
    let i = idx as Real;
    let span_x = rig.grid.x.saturating_sub(1) as Real * rig.square;
    let span_y = rig.grid.y.saturating_sub(1) as Real * rig.square;
    Transform::from_rpy(
        BASE_LINK,
        PATTERN_LINK,
        Vec3::new(-0.5 * span_x + 0.05 * i, -0.5 * span_y, 2.0 + 0.1 * i),
        [0.1 * i - 0.1, 0.15 - 0.05 * i, 0.05 * i],
    )
    .to_iso3()
}

/// Two cameras, `left` at the base origin and `right` 0.3 m to its side.
pub fn two_camera_rig(rig: &SyntheticRig) -> SyntheticDataset {
    build(
        rig,
        &[
            SyntheticSensor::camera("left", Vec3::zeros(), [0.0, 0.0, 0.0]),
            SyntheticSensor::camera("right", Vec3::new(0.3, 0.0, 0.0), [0.0, -0.05, 0.0]),
        ],
    )
}

/// One camera, one 2D laser scanner and one 3D lidar.
pub fn mixed_rig(rig: &SyntheticRig) -> SyntheticDataset {
    build(
        rig,
        &[
            SyntheticSensor::camera("camera", Vec3::zeros(), [0.0, 0.0, 0.0]),
            SyntheticSensor::laser("laser", Vec3::new(0.1, 0.0, 0.0)),
            SyntheticSensor::lidar("lidar", Vec3::new(-0.1, 0.0, 0.0)),
        ],
    )
}

/// Build a dataset for an arbitrary sensor layout.
pub fn build(rig: &SyntheticRig, sensors: &[SyntheticSensor]) -> SyntheticDataset {
    let pattern = PatternConfig {
        fixed: rig.fixed_pattern,
        parent_link: BASE_LINK.to_string(),
        link: PATTERN_LINK.to_string(),
        dimension: rig.grid,
        size: rig.square,
        border_size: BorderSize { x: 0.05, y: 0.05 },
    };

    let sensor_map: BTreeMap<String, Sensor> = sensors
        .iter()
        .map(|s| {
            let sensor = Sensor {
                modality: s.modality,
                calibration_parent: BASE_LINK.to_string(),
                calibration_child: s.name.clone(),
                frame_id: s.name.clone(),
                intrinsics: (s.modality == Modality::Image).then(camera_intrinsics),
            };
            (s.name.clone(), sensor)
        })
        .collect();

    let mut collections = BTreeMap::new();
    for idx in 0..rig.num_collections {
        let pose_idx = if rig.fixed_pattern { 0 } else { idx };
        let base_from_pattern = pattern_pose(rig, pose_idx);

        let mut collection = Collection::default();
        collection.insert_transform(Transform::identity(WORLD_LINK, BASE_LINK));
        collection.insert_transform(Transform::from_iso3(
            BASE_LINK,
            PATTERN_LINK,
            &base_from_pattern,
        ));

        for s in sensors {
            collection.insert_transform(Transform::from_iso3(BASE_LINK, s.name.as_str(), &s.pose));
            let pattern_from_sensor = base_from_pattern.inverse() * s.pose;
            let (data, labels) = match s.modality {
                Modality::Image => observe_corners(&pattern, &s.name, idx, &pattern_from_sensor),
                Modality::LaserScan => {
                    observe_scan(&pattern, &pattern_from_sensor, rig.scan_dropout)
                }
                Modality::PointCloud => observe_cloud(&pattern, &pattern_from_sensor),
            };
            collection.data.insert(s.name.clone(), data);
            collection.labels.insert(s.name.clone(), labels);
        }
        collections.insert(idx.to_string(), collection);
    }

    let truth = Dataset {
        calibration_config: CalibrationConfig {
            world_link: WORLD_LINK.to_string(),
            anchored_sensor: None,
            calibration_pattern: pattern,
        },
        sensors: sensor_map,
        collections,
    };

    let mut dataset = truth.clone();
    for collection in dataset.collections.values_mut() {
        for t in collection.transforms.values_mut() {
            if t.parent == BASE_LINK {
                t.translation += rig.translation_offset;
                t.rotation += rig.rotation_offset;
            }
        }
    }

    SyntheticDataset { dataset, truth }
}

fn observe_corners(
    pattern: &PatternConfig,
    name: &str,
    idx: usize,
    pattern_from_sensor: &Iso3,
) -> (SensorData, SensorLabels) {
    let k = camera_intrinsics();
    let sensor_from_pattern = pattern_from_sensor.inverse();
    let corners: Vec<CornerObservation> = (0..pattern.num_corners())
        .filter_map(|id| {
            let p = sensor_from_pattern * pattern.corner(id)?;
            let uv = k.project(&p)?;
            let inside = (0.0..k.width as Real).contains(&uv.x)
                && (0.0..k.height as Real).contains(&uv.y);
            inside.then_some(CornerObservation {
                id,
                x: uv.x,
                y: uv.y,
            })
        })
        .collect();
    let data = SensorData::Image {
        data_file: format!("{name}_{idx}.jpg"),
        width: k.width,
        height: k.height,
    };
    let labels = SensorLabels {
        detected: !corners.is_empty(),
        corners,
        ..Default::default()
    };
    (data, labels)
}

/// Range along a unit ray from the sensor origin to the board, if it hits.
fn cast(pattern: &PatternConfig, pattern_from_sensor: &Iso3, dir: &Vec3) -> Option<Real> {
    let origin = pattern_from_sensor * Pt3::origin();
    let d = pattern_from_sensor.rotation * dir;
    if d.z.abs() < 1e-9 {
        return None;
    }
    let t = -origin.z / d.z;
    if t <= 0.0 {
        return None;
    }
    let hit = origin + d * t;
    let (x_min, x_max, y_min, y_max) = pattern.limits();
    let inside = hit.x >= x_min && hit.x <= x_max && hit.y >= y_min && hit.y <= y_max;
    inside.then_some(t)
}

fn observe_scan(
    pattern: &PatternConfig,
    pattern_from_sensor: &Iso3,
    dropout: usize,
) -> (SensorData, SensorLabels) {
    let angle_min = -0.6;
    let angle_increment = 0.005;
    let mut ranges = Vec::new();
    let mut idxs = Vec::new();
    let mut hits = 0;
    for i in 0..241 {
        let a = angle_min + angle_increment * i as Real;
        let dir = Vec3::new(a.cos(), a.sin(), 0.0);
        let hit = cast(pattern, pattern_from_sensor, &dir).filter(|_| {
            hits += 1;
            dropout == 0 || hits % dropout != 0
        });
        match hit {
            Some(range) => {
                ranges.push(range);
                idxs.push(i);
            }
            None => ranges.push(BACKGROUND_RANGE),
        }
    }
    let data = SensorData::LaserScan {
        angle_min,
        angle_increment,
        ranges,
    };
    let labels = SensorLabels {
        detected: !idxs.is_empty(),
        idxs,
        ..Default::default()
    };
    (data, labels)
}

fn observe_cloud(
    pattern: &PatternConfig,
    pattern_from_sensor: &Iso3,
) -> (SensorData, SensorLabels) {
    let mut points = Vec::new();
    let mut idxs = Vec::new();
    for ring in -3i32..=3 {
        let theta = std::f64::consts::FRAC_PI_2 + 0.03 * ring as Real;
        for step in -40i32..=40 {
            let phi = 0.01 * step as Real;
            let dir = Vec3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            );
            let range = match cast(pattern, pattern_from_sensor, &dir) {
                Some(range) => {
                    idxs.push(points.len());
                    range
                }
                None => BACKGROUND_RANGE,
            };
            let p = dir * range;
            points.push([p.x, p.y, p.z]);
        }
    }
    let labels = SensorLabels {
        detected: !idxs.is_empty(),
        idxs,
        ..Default::default()
    };
    (SensorData::PointCloud { points }, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_sensor_sees_the_pattern() {
        let synthetic = mixed_rig(&SyntheticRig::default());
        for (key, collection) in &synthetic.truth.collections {
            for name in ["camera", "laser", "lidar"] {
                assert!(collection.detected(name), "{name} missed pattern in {key}");
            }
            assert_eq!(collection.labels["camera"].corners.len(), 20);
        }
    }

    #[test]
    fn initial_guess_is_perturbed_only_below_base() {
        let rig = SyntheticRig::default();
        let synthetic = two_camera_rig(&rig);
        let c = &synthetic.dataset.collections["0"];
        let t = &synthetic.truth.collections["0"];
        assert_eq!(c.transforms["world-base_link"], t.transforms["world-base_link"]);
        let diff =
            c.transforms["base_link-left"].translation - t.transforms["base_link-left"].translation;
        assert!((diff - rig.translation_offset).norm() < 1e-12);
    }

    #[test]
    fn scan_dropout_splits_the_hits() {
        let rig = SyntheticRig {
            scan_dropout: 5,
            ..Default::default()
        };
        let synthetic = mixed_rig(&rig);
        let labels = &synthetic.truth.collections["0"].labels["laser"];
        let gaps = labels.idxs.windows(2).filter(|w| w[1] != w[0] + 1).count();
        assert!(gaps >= 4, "only {gaps} gaps");
        let contiguous = mixed_rig(&SyntheticRig::default());
        let full = &contiguous.truth.collections["0"].labels["laser"].idxs;
        assert_eq!(full.len() - labels.idxs.len(), full.len() / 5);
    }

    #[test]
    fn lidar_hits_lie_on_the_board() {
        let synthetic = mixed_rig(&SyntheticRig::default());
        let c = &synthetic.truth.collections["1"];
        let pose = c.lookup("1", PATTERN_LINK, "lidar").unwrap();
        for &idx in &c.labels["lidar"].idxs {
            let p = pose * c.data["lidar"].scan_point(idx).unwrap();
            assert!(p.z.abs() < 1e-9);
        }
    }
}
