//! Named, bounded scalar parameters backed by accessors into the dataset.
//!
//! Every parameter group carries a [`Selector`]: a typed path into the
//! [`Dataset`] with a pure read and an explicit write. The registry is
//! append-only and its declaration order is the parameter index space used by
//! the solver vector, the bounds and the sparsity columns.

use crate::error::{CalibError, CalibResult};
use nalgebra::DVector;
use rig_calib_core::{
    Dataset, DatasetError, DatasetResult, Real, TransformKey, INTRINSICS_DIM, POSE_DIM,
};
use std::collections::HashMap;
use std::ops::Range;

/// Component names of a transform group.
pub const TRANSFORM_SUFFIXES: [&str; POSE_DIM] = ["x", "y", "z", "r1", "r2", "r3"];
/// Component names of an intrinsics group.
pub const INTRINSICS_SUFFIXES: [&str; INTRINSICS_DIM] =
    ["fx", "fy", "cx", "cy", "k1", "k2", "p1", "p2", "k3"];

/// Which copies of a transform a group reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformScope {
    /// One value shared by all collections: read from `representative`,
    /// written to every collection.
    Replicated { representative: String },
    /// The copy held by one collection.
    Collection(String),
}

/// Typed path from a parameter group to the dataset values it controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Transform {
        key: TransformKey,
        scope: TransformScope,
    },
    Intrinsics {
        sensor: String,
    },
}

impl Selector {
    pub fn dim(&self) -> usize {
        match self {
            Selector::Transform { .. } => POSE_DIM,
            Selector::Intrinsics { .. } => INTRINSICS_DIM,
        }
    }

    pub fn read(&self, dataset: &Dataset) -> DatasetResult<Vec<Real>> {
        match self {
            Selector::Transform { key, scope } => {
                let collection = match scope {
                    TransformScope::Replicated { representative } => representative,
                    TransformScope::Collection(c) => c,
                };
                Ok(dataset.transform(collection, key)?.to_params().to_vec())
            }
            Selector::Intrinsics { sensor } => {
                let intrinsics = dataset.sensor(sensor)?.intrinsics.as_ref().ok_or_else(|| {
                    DatasetError::MissingIntrinsics {
                        sensor: sensor.clone(),
                    }
                })?;
                Ok(intrinsics.to_params().to_vec())
            }
        }
    }

    pub fn write(&self, dataset: &mut Dataset, values: &[Real]) -> DatasetResult<()> {
        match self {
            Selector::Transform {
                key,
                scope: TransformScope::Collection(c),
            } => dataset.transform_mut(c, key)?.set_params(values),
            Selector::Transform {
                key,
                scope: TransformScope::Replicated { .. },
            } => {
                for (ckey, collection) in dataset.collections.iter_mut() {
                    collection
                        .transform_mut(key)
                        .ok_or_else(|| DatasetError::MissingTransform {
                            collection: ckey.clone(),
                            key: key.as_string(),
                        })?
                        .set_params(values)?;
                }
                Ok(())
            }
            Selector::Intrinsics { sensor } => dataset
                .sensor_mut(sensor)?
                .intrinsics
                .as_mut()
                .ok_or_else(|| DatasetError::MissingIntrinsics {
                    sensor: sensor.clone(),
                })?
                .set_params(values),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterGroup {
    pub name: String,
    pub selector: Selector,
    /// Indices of the group's scalars in the parameter vector.
    pub range: Range<usize>,
}

/// One scalar optimization unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// `<group>_<suffix>`
    pub name: String,
    /// Index into [`ParameterRegistry::groups`].
    pub group: usize,
    /// Component within the group's selector.
    pub component: usize,
    pub lower: Real,
    pub upper: Real,
}

#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    groups: Vec<ParameterGroup>,
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the scalars of one group.
    ///
    /// `suffixes`, `lower` and `upper` must all have the selector's dimension.
    pub fn declare(
        &mut self,
        group: impl Into<String>,
        selector: Selector,
        suffixes: &[&str],
        lower: &[Real],
        upper: &[Real],
    ) -> CalibResult<Range<usize>> {
        let group = group.into();
        if self.group(&group).is_some() {
            return Err(CalibError::DuplicateGroup(group));
        }
        let dim = selector.dim();
        for len in [suffixes.len(), lower.len(), upper.len()] {
            if len != dim {
                return Err(DatasetError::DimensionMismatch {
                    expected: dim,
                    got: len,
                }
                .into());
            }
        }

        let start = self.params.len();
        let gidx = self.groups.len();
        for (component, suffix) in suffixes.iter().enumerate() {
            let name = format!("{group}_{suffix}");
            self.index.insert(name.clone(), self.params.len());
            self.params.push(Parameter {
                name,
                group: gidx,
                component,
                lower: lower[component],
                upper: upper[component],
            });
        }
        let range = start..self.params.len();
        self.groups.push(ParameterGroup {
            name: group,
            selector,
            range: range.clone(),
        });
        Ok(range)
    }

    /// [`ParameterRegistry::declare`] with bounds `[-inf, +inf]`.
    pub fn declare_unbounded(
        &mut self,
        group: impl Into<String>,
        selector: Selector,
        suffixes: &[&str],
    ) -> CalibResult<Range<usize>> {
        let dim = selector.dim();
        self.declare(
            group,
            selector,
            suffixes,
            &vec![Real::NEG_INFINITY; dim],
            &vec![Real::INFINITY; dim],
        )
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    pub fn groups(&self) -> &[ParameterGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&ParameterGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Group that controls transform `key` as seen from `collection`.
    pub fn transform_group(&self, collection: &str, key: &TransformKey) -> Option<&ParameterGroup> {
        self.groups.iter().find(|g| match &g.selector {
            Selector::Transform { key: k, scope } if k == key => match scope {
                TransformScope::Replicated { .. } => true,
                TransformScope::Collection(c) => c == collection,
            },
            _ => false,
        })
    }

    /// Scalar names of a group, in component order.
    pub fn group_parameter_names(&self, group: &ParameterGroup) -> Vec<String> {
        self.params[group.range.clone()]
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Current values of all parameters, in declaration order.
    pub fn current_vector(&self, dataset: &Dataset) -> CalibResult<DVector<Real>> {
        let mut v = DVector::zeros(self.len());
        for g in &self.groups {
            let values = g.selector.read(dataset)?;
            v.rows_mut(g.range.start, g.range.len()).copy_from_slice(&values);
        }
        Ok(v)
    }

    /// Write every group's slice of `v` into the dataset.
    pub fn apply_vector(&self, dataset: &mut Dataset, v: &DVector<Real>) -> CalibResult<()> {
        if v.len() != self.len() {
            return Err(DatasetError::DimensionMismatch {
                expected: self.len(),
                got: v.len(),
            }
            .into());
        }
        for g in &self.groups {
            g.selector.write(dataset, &v.as_slice()[g.range.clone()])?;
        }
        Ok(())
    }

    /// Getter of parameter `idx`.
    pub fn get(&self, dataset: &Dataset, idx: usize) -> CalibResult<Real> {
        let p = self.param(idx)?;
        Ok(self.groups[p.group].selector.read(dataset)?[p.component])
    }

    /// Setter of parameter `idx`; the other components of its group are untouched.
    pub fn set(&self, dataset: &mut Dataset, idx: usize, value: Real) -> CalibResult<()> {
        let p = self.param(idx)?;
        let selector = &self.groups[p.group].selector;
        let mut values = selector.read(dataset)?;
        values[p.component] = value;
        selector.write(dataset, &values)?;
        Ok(())
    }

    /// `(lower, upper)` bound vectors.
    pub fn bounds(&self) -> (DVector<Real>, DVector<Real>) {
        (
            DVector::from_iterator(self.len(), self.params.iter().map(|p| p.lower)),
            DVector::from_iterator(self.len(), self.params.iter().map(|p| p.upper)),
        )
    }

    fn param(&self, idx: usize) -> CalibResult<&Parameter> {
        self.params.get(idx).ok_or_else(|| {
            DatasetError::DimensionMismatch {
                expected: self.len(),
                got: idx,
            }
            .into()
        })
    }
}

/// Bound band `[v - d, v + d]` with `d = EPSILON * max(1, |v|)`.
pub fn anchor_bounds(values: &[Real]) -> (Vec<Real>, Vec<Real>) {
    values
        .iter()
        .map(|v| {
            let d = Real::EPSILON * v.abs().max(1.0);
            (v - d, v + d)
        })
        .unzip()
}
