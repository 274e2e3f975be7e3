use crate::Vec3;

/// A ray in 3D space with origin and direction.
///
/// Casting rays carry a unit direction so that hit parameters are distances and
/// `direction.dot(normal)` is the incidence cosine.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Ray from `origin` aimed at `target`, with a normalized direction.
    pub fn towards(origin: Vec3, target: Vec3) -> Self {
        Self::new(origin, (target - origin).normalize())
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);

        assert_eq!(ray.at(0.0), Vec3::ZERO);
        assert_eq!(ray.at(2.0), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(ray.at(-1.0), Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_ray_towards_is_normalized() {
        let ray = Ray::towards(Vec3::new(0.0, 0.0, -10.0), Vec3::new(3.0, 4.0, -10.0));
        assert!((ray.direction.length() - 1.0).abs() < 0.0001);
        assert!((ray.direction.x - 0.6).abs() < 0.0001);
        assert!((ray.direction.y - 0.8).abs() < 0.0001);
    }
}
