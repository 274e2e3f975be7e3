//! Rotation helpers for specimen placements.
//!
//! The specimen never moves: every placement is expressed by rotating the source
//! and detector around it instead, so the engine needs the *inverse* of the
//! specimen's placement rotation.

use glam::{Mat3, Vec3};

/// Rotation by `angle` radians about a unit `axis` (right-handed).
#[inline]
pub fn axis_rotation(axis: Vec3, angle: f32) -> Mat3 {
    Mat3::from_axis_angle(axis, angle)
}

/// Inverse placement rotation for specimen angles `(rx, ry, rz)`.
///
/// Z is undone first about the world Z axis; Y and X are then undone about the
/// Y and X axes carried along by that Z rotation. The product is `Rx * Ry * Rz`.
pub fn inverse_placement_rotation(rotation: Vec3) -> Mat3 {
    let rz = axis_rotation(Vec3::Z, -rotation.z);
    let ry = axis_rotation(rz * Vec3::Y, -rotation.y);
    let rx = axis_rotation(rz * Vec3::X, -rotation.x);
    rx * ry * rz
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn assert_vec_eq(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 0.0001, "{a:?} != {b:?}");
    }

    #[test]
    fn test_zero_rotation_is_identity() {
        let m = inverse_placement_rotation(Vec3::ZERO);
        assert_vec_eq(m * Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_axis_rotation_quarter_turn() {
        let m = axis_rotation(Vec3::Z, FRAC_PI_2);
        assert_vec_eq(m * Vec3::X, Vec3::Y);
    }

    #[test]
    fn test_inverse_of_z_rotation() {
        // Specimen turned +90 degrees about Z: the source turns -90 degrees.
        let m = inverse_placement_rotation(Vec3::new(0.0, 0.0, FRAC_PI_2));
        assert_vec_eq(m * Vec3::X, -Vec3::Y);
    }

    #[test]
    fn test_inverse_placement_rotation_is_orthonormal() {
        let m = inverse_placement_rotation(Vec3::new(0.3, 1.1, -0.7));
        assert!((m.determinant() - 1.0).abs() < 0.0001);
        let v = Vec3::new(0.2, -0.5, 0.9);
        assert!(((m * v).length() - v.length()).abs() < 0.0001);
    }
}
