//! Mathematical utilities and type definitions.
//!
//! This module provides the fundamental linear algebra aliases used throughout
//! the workspace and the rotation conversions needed to move between the
//! 6-parameter pose encoding, quaternions and roll-pitch-yaw triples.

use nalgebra::{Isometry3, Point3, Rotation3, Translation3, UnitQuaternion, Vector2, Vector3};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D vector with [`Real`] components.
pub type Vec2 = Vector2<Real>;
/// 3D vector with [`Real`] components.
pub type Vec3 = Vector3<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// 3D rigid transform (SE(3)) using [`Real`].
pub type Iso3 = Isometry3<Real>;

/// Below this value of `|cos(pitch)|` the X-Y-Z decomposition is treated as gimbal locked.
const GIMBAL_EPS: Real = 1e-9;

/// Build an isometry from a translation and a rotation vector (axis * angle).
pub fn iso3_from_rotvec(translation: &Vec3, rotvec: &Vec3) -> Iso3 {
    Iso3::from_parts(
        Translation3::from(*translation),
        UnitQuaternion::from_scaled_axis(*rotvec),
    )
}

/// Rotation vector (axis * angle, angle in `[0, pi]`) of a unit quaternion.
pub fn rotvec_from_quaternion(q: &UnitQuaternion<Real>) -> Vec3 {
    q.scaled_axis()
}

/// Decompose a rotation into intrinsic X-Y-Z Euler angles `[roll, pitch, yaw]`.
///
/// The convention is `R = Rx(roll) * Ry(pitch) * Rz(yaw)`. At gimbal lock
/// (`pitch = ±pi/2`) the yaw is set to zero and the remaining rotation is
/// attributed to roll.
pub fn euler_xyz_intrinsic(rotation: &UnitQuaternion<Real>) -> [Real; 3] {
    let m = rotation.to_rotation_matrix().into_inner();
    let pitch = m[(0, 2)].clamp(-1.0, 1.0).asin();
    if pitch.cos().abs() > GIMBAL_EPS {
        let roll = (-m[(1, 2)]).atan2(m[(2, 2)]);
        let yaw = (-m[(0, 1)]).atan2(m[(0, 0)]);
        [roll, pitch, yaw]
    } else {
        let roll = m[(2, 1)].atan2(m[(1, 1)]);
        [roll, pitch, 0.0]
    }
}

/// Compose a rotation from intrinsic X-Y-Z Euler angles `[roll, pitch, yaw]`.
pub fn rotation_from_euler_xyz_intrinsic(rpy: [Real; 3]) -> UnitQuaternion<Real> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), rpy[0]);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), rpy[1]);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), rpy[2]);
    UnitQuaternion::from_rotation_matrix(&(rx * ry * rz))
}

/// Spherical coordinates `(radius, polar, azimuth)` of a point about the origin.
///
/// The polar angle is measured from +Z (`acos(z / r)`), the azimuth in the XY
/// plane from +X (`atan2(y, x)`). Returns `None` for the origin itself.
pub fn to_spherical(p: &Pt3) -> Option<(Real, Real, Real)> {
    let r = p.coords.norm();
    if r <= Real::EPSILON {
        return None;
    }
    let theta = (p.z / r).clamp(-1.0, 1.0).acos();
    let phi = p.y.atan2(p.x);
    Some((r, theta, phi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn euler_roundtrip_generic_angles() {
        let rpy = [0.3, -0.4, 1.1];
        let q = rotation_from_euler_xyz_intrinsic(rpy);
        let back = euler_xyz_intrinsic(&q);
        for k in 0..3 {
            assert_relative_eq!(back[k], rpy[k], epsilon = 1e-12);
        }
    }

    #[test]
    fn euler_is_intrinsic_xyz() {
        let rpy = [0.2, 0.1, -0.3];
        let q = rotation_from_euler_xyz_intrinsic(rpy);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), rpy[0])
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), rpy[1])
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), rpy[2]);
        assert_relative_eq!(q.angle_to(&expected), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn euler_gimbal_lock_reconstructs_rotation() {
        let q = rotation_from_euler_xyz_intrinsic([0.4, std::f64::consts::FRAC_PI_2, 0.25]);
        let rpy = euler_xyz_intrinsic(&q);
        assert_relative_eq!(rpy[1], std::f64::consts::FRAC_PI_2, epsilon = 1e-6);
        let back = rotation_from_euler_xyz_intrinsic(rpy);
        assert_relative_eq!(q.angle_to(&back), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn rotvec_matches_quaternion() {
        let rotvec = Vec3::new(0.1, -0.2, 0.3);
        let pose = iso3_from_rotvec(&Vec3::new(1.0, 2.0, 3.0), &rotvec);
        let back = rotvec_from_quaternion(&pose.rotation);
        assert_relative_eq!(back, rotvec, epsilon = 1e-12);
        assert_relative_eq!(pose.translation.vector, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn spherical_of_axis_points() {
        let (r, theta, phi) = to_spherical(&Pt3::new(0.0, 2.0, 0.0)).unwrap();
        assert_relative_eq!(r, 2.0);
        assert_relative_eq!(theta, std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(phi, std::f64::consts::FRAC_PI_2);
        assert!(to_spherical(&Pt3::origin()).is_none());
    }
}
