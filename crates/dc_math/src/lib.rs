//! DreamCaster math - value types shared by the tree, scene and engine.
//!
//! Everything here is plain `Copy` data on top of glam's `Vec3`/`Mat3`.

// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod interval;
mod ray;
mod rotation;

pub use aabb::{Aabb, Axis};
pub use interval::Interval;
pub use ray::Ray;
pub use rotation::{axis_rotation, inverse_placement_rotation};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_indexing_matches_axis() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(v[Axis::X.index()], 1.0);
        assert_eq!(v[Axis::Y.index()], 2.0);
        assert_eq!(v[Axis::Z.index()], 3.0);
    }
}
