//! Rigid transforms between named frames.
//!
//! A [`Transform`] is the pose of `child` expressed in `parent`
//! (`p_parent = T * p_child`). In memory the rotation is kept as a rotation
//! vector so that the six optimization values are stored verbatim; on disk
//! it is written as a `[x, y, z, w]` quaternion next to the translation.

use crate::error::{DatasetError, DatasetResult};
use crate::math::{
    euler_xyz_intrinsic, iso3_from_rotvec, rotation_from_euler_xyz_intrinsic,
    rotvec_from_quaternion, Iso3, Real, Vec3,
};
use nalgebra::{Quaternion, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of scalars in the pose encoding: 3 translation + 3 rotation vector.
pub const POSE_DIM: usize = 6;

/// Key of a transform edge, `(parent, child)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransformKey {
    pub parent: String,
    pub child: String,
}

impl TransformKey {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
        }
    }

    /// Dictionary key used in [`crate::Collection::transforms`].
    pub fn as_string(&self) -> String {
        format!("{}-{}", self.parent, self.child)
    }
}

impl fmt::Display for TransformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.parent, self.child)
    }
}

/// Pose of `child` in `parent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TransformRecord", into = "TransformRecord")]
pub struct Transform {
    pub parent: String,
    pub child: String,
    pub translation: Vec3,
    /// Rotation vector (unit axis scaled by the angle in radians).
    pub rotation: Vec3,
}

impl Transform {
    pub fn identity(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            translation: Vec3::zeros(),
            rotation: Vec3::zeros(),
        }
    }

    pub fn from_iso3(parent: impl Into<String>, child: impl Into<String>, pose: &Iso3) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            translation: pose.translation.vector,
            rotation: rotvec_from_quaternion(&pose.rotation),
        }
    }

    /// Build from a translation and intrinsic X-Y-Z roll-pitch-yaw angles.
    pub fn from_rpy(
        parent: impl Into<String>,
        child: impl Into<String>,
        translation: Vec3,
        rpy: [Real; 3],
    ) -> Self {
        let q = rotation_from_euler_xyz_intrinsic(rpy);
        Self {
            parent: parent.into(),
            child: child.into(),
            translation,
            rotation: rotvec_from_quaternion(&q),
        }
    }

    pub fn key(&self) -> TransformKey {
        TransformKey::new(self.parent.clone(), self.child.clone())
    }

    pub fn to_iso3(&self) -> Iso3 {
        iso3_from_rotvec(&self.translation, &self.rotation)
    }

    pub fn quaternion(&self) -> UnitQuaternion<Real> {
        UnitQuaternion::from_scaled_axis(self.rotation)
    }

    /// Intrinsic X-Y-Z Euler angles of the rotation.
    pub fn rpy(&self) -> [Real; 3] {
        euler_xyz_intrinsic(&self.quaternion())
    }

    /// The six pose values `[tx, ty, tz, r1, r2, r3]`.
    pub fn to_params(&self) -> [Real; POSE_DIM] {
        let t = &self.translation;
        let r = &self.rotation;
        [t.x, t.y, t.z, r.x, r.y, r.z]
    }

    /// Overwrite the pose from `[tx, ty, tz, r1, r2, r3]`.
    pub fn set_params(&mut self, values: &[Real]) -> DatasetResult<()> {
        if values.len() != POSE_DIM {
            return Err(DatasetError::DimensionMismatch {
                expected: POSE_DIM,
                got: values.len(),
            });
        }
        self.translation = Vec3::new(values[0], values[1], values[2]);
        self.rotation = Vec3::new(values[3], values[4], values[5]);
        Ok(())
    }
}

/// Serialized layout: translation plus `[x, y, z, w]` quaternion.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TransformRecord {
    parent: String,
    child: String,
    trans: [Real; 3],
    quat: [Real; 4],
}

impl From<TransformRecord> for Transform {
    fn from(rec: TransformRecord) -> Self {
        let [x, y, z, w] = rec.quat;
        let q = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z));
        Self {
            parent: rec.parent,
            child: rec.child,
            translation: Vec3::from(rec.trans),
            rotation: rotvec_from_quaternion(&q),
        }
    }
}

impl From<Transform> for TransformRecord {
    fn from(t: Transform) -> Self {
        let q = t.quaternion();
        Self {
            trans: [t.translation.x, t.translation.y, t.translation.z],
            quat: [q.i, q.j, q.k, q.w],
            parent: t.parent,
            child: t.child,
        }
    }
}
