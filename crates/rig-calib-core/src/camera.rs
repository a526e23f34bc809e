use crate::error::{DatasetError, DatasetResult};
use crate::math::{Pt3, Real, Vec2};
use serde::{Deserialize, Serialize};

/// Number of intrinsic scalars: `fx fy cx cy k1 k2 p1 p2 k3`.
pub const INTRINSICS_DIM: usize = 9;

/// Brown-Conrady distortion with OpenCV coefficient order `(k1, k2, p1, p2, k3)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: Real,
    pub k2: Real,
    pub p1: Real,
    pub p2: Real,
    pub k3: Real,
}

impl BrownConrady5 {
    /// Apply distortion to undistorted normalized coordinates.
    pub fn distort(&self, n: &Vec2) -> Vec2 {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;

        let xy = x * y;
        let x_tan = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;

        Vec2::new(x * radial + x_tan, y * radial + y_tan)
    }
}

/// Pinhole intrinsics with Brown-Conrady distortion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: Real,
    pub fy: Real,
    pub cx: Real,
    pub cy: Real,
    #[serde(default)]
    pub distortion: BrownConrady5,
}

impl CameraIntrinsics {
    /// Project a point in the camera frame to pixels. `None` behind the camera.
    pub fn project(&self, p_cam: &Pt3) -> Option<Vec2> {
        if p_cam.z <= Real::EPSILON {
            return None;
        }
        let n = Vec2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        let d = self.distortion.distort(&n);
        Some(Vec2::new(self.fx * d.x + self.cx, self.fy * d.y + self.cy))
    }

    /// `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
    pub fn to_params(&self) -> [Real; INTRINSICS_DIM] {
        let d = &self.distortion;
        [
            self.fx, self.fy, self.cx, self.cy, d.k1, d.k2, d.p1, d.p2, d.k3,
        ]
    }

    pub fn set_params(&mut self, values: &[Real]) -> DatasetResult<()> {
        if values.len() != INTRINSICS_DIM {
            return Err(DatasetError::DimensionMismatch {
                expected: INTRINSICS_DIM,
                got: values.len(),
            });
        }
        self.fx = values[0];
        self.fy = values[1];
        self.cx = values[2];
        self.cy = values[3];
        self.distortion = BrownConrady5 {
            k1: values[4],
            k2: values[5],
            p1: values[6],
            p2: values[7],
            k3: values[8],
        };
        Ok(())
    }
}
