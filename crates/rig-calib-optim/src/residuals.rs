//! Scalar residuals, their parameter dependencies and their evaluation.

use crate::error::{CalibError, CalibResult};
use crate::params::ParameterRegistry;
use nalgebra::DVector;
use rig_calib_core::{
    Dataset, DatasetError, DatasetResult, Iso3, PatternConfig, Pt3, Real, Vec2,
};
use std::collections::HashMap;

/// Pixel error assigned to a corner that projects behind the camera.
pub const BEHIND_CAMERA_PENALTY: Real = 1.0e4;

/// The `(collection, sensor)` pair a residual was generated from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResidualSite {
    pub collection: String,
    pub sensor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResidualKind {
    /// Pixel distance between a detected corner and its projection.
    Corner { id: usize, pixel: Vec2 },
    /// Distance of a scan point to the pattern plane.
    PlaneDistance { idx: usize },
    /// In-plane distance of a scan point to the board border.
    BorderDistance { idx: usize },
    /// Smaller border distance of the two endpoints of a laser edge.
    EdgeDistance { before: usize, after: usize },
}

#[derive(Debug, Clone)]
pub struct Residual {
    pub name: String,
    pub site: ResidualSite,
    pub kind: ResidualKind,
    /// Sorted parameter indices.
    pub dependencies: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ResidualRegistry {
    residuals: Vec<Residual>,
    index: HashMap<String, usize>,
}

impl ResidualRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a residual depending on the named parameters.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        site: ResidualSite,
        kind: ResidualKind,
        dependencies: &[String],
        params: &ParameterRegistry,
    ) -> CalibResult<usize> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(CalibError::DuplicateResidual(name));
        }
        let mut deps = dependencies
            .iter()
            .map(|p| {
                params
                    .index_of(p)
                    .ok_or_else(|| CalibError::DependencyResolution {
                        residual: name.clone(),
                        parameter: p.clone(),
                    })
            })
            .collect::<CalibResult<Vec<usize>>>()?;
        deps.sort_unstable();
        deps.dedup();

        let idx = self.residuals.len();
        self.index.insert(name.clone(), idx);
        self.residuals.push(Residual {
            name,
            site,
            kind,
            dependencies: deps,
        });
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.residuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residuals.is_empty()
    }

    pub fn residuals(&self) -> &[Residual] {
        &self.residuals
    }

    pub fn get(&self, name: &str) -> Option<&Residual> {
        self.index.get(name).map(|&i| &self.residuals[i])
    }

    /// Parameter indices residual `name` depends on.
    pub fn dependency_set(&self, name: &str) -> Option<&[usize]> {
        self.get(name).map(|r| r.dependencies.as_slice())
    }

    /// Current value of every residual, in declaration order.
    pub fn evaluate(&self, dataset: &Dataset) -> CalibResult<DVector<Real>> {
        let pattern = dataset.pattern();
        let mut poses: HashMap<&ResidualSite, Iso3> = HashMap::new();
        let mut out = DVector::zeros(self.len());
        for (i, r) in self.residuals.iter().enumerate() {
            let pattern_from_sensor = match poses.get(&r.site) {
                Some(pose) => *pose,
                None => {
                    let pose = site_pose(dataset, &r.site)?;
                    poses.insert(&r.site, pose);
                    pose
                }
            };
            out[i] = evaluate_one(dataset, pattern, r, &pattern_from_sensor)?;
        }
        Ok(out)
    }
}

/// Pose of the sensor data frame in the pattern frame.
fn site_pose(dataset: &Dataset, site: &ResidualSite) -> DatasetResult<Iso3> {
    let sensor = dataset.sensor(&site.sensor)?;
    dataset.collection(&site.collection)?.lookup(
        &site.collection,
        &dataset.pattern().link,
        &sensor.frame_id,
    )
}

fn scan_point_in_pattern(
    dataset: &Dataset,
    site: &ResidualSite,
    idx: usize,
    pattern_from_sensor: &Iso3,
) -> DatasetResult<Pt3> {
    let point = dataset
        .collection(&site.collection)?
        .data
        .get(&site.sensor)
        .and_then(|d| d.scan_point(idx))
        .ok_or_else(|| DatasetError::InvalidData {
            collection: site.collection.clone(),
            sensor: site.sensor.clone(),
            reason: format!("no scan point at index {idx}"),
        })?;
    Ok(pattern_from_sensor * point)
}

fn evaluate_one(
    dataset: &Dataset,
    pattern: &PatternConfig,
    r: &Residual,
    pattern_from_sensor: &Iso3,
) -> DatasetResult<Real> {
    let site = &r.site;
    let border = |idx: usize| -> DatasetResult<Real> {
        let p = scan_point_in_pattern(dataset, site, idx, pattern_from_sensor)?;
        Ok(pattern.border_distance(p.x, p.y))
    };
    match &r.kind {
        ResidualKind::Corner { id, pixel } => {
            let intrinsics = dataset
                .sensor(&site.sensor)?
                .intrinsics
                .as_ref()
                .ok_or_else(|| DatasetError::MissingIntrinsics {
                    sensor: site.sensor.clone(),
                })?;
            let corner = pattern.corner(*id).ok_or_else(|| DatasetError::InvalidData {
                collection: site.collection.clone(),
                sensor: site.sensor.clone(),
                reason: format!("corner id {id} outside the pattern grid"),
            })?;
            let p_cam = pattern_from_sensor.inverse_transform_point(&corner);
            Ok(intrinsics
                .project(&p_cam)
                .map_or(BEHIND_CAMERA_PENALTY, |uv| (uv - pixel).norm()))
        }
        ResidualKind::PlaneDistance { idx } => {
            Ok(scan_point_in_pattern(dataset, site, *idx, pattern_from_sensor)?
                .z
                .abs())
        }
        ResidualKind::BorderDistance { idx } => border(*idx),
        ResidualKind::EdgeDistance { before, after } => Ok(border(*before)?.min(border(*after)?)),
    }
}
