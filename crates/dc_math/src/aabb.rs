use crate::{Interval, Ray, Vec3};

/// Coordinate axis used for split planes and dominant-axis projections.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Component index of this axis (0=X, 1=Y, 2=Z).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Axis for a component index, `None` for anything above 2.
    pub fn from_index(index: usize) -> Option<Axis> {
        match index {
            0 => Some(Axis::X),
            1 => Some(Axis::Y),
            2 => Some(Axis::Z),
            _ => None,
        }
    }
}

/// Axis-aligned box described by one interval per axis.
///
/// The interval bounds map one-to-one onto the `x1, x2, y1, y2, z1, z2` layout used
/// by the tree cache and results files (see [`Aabb::to_array`]). Unlike a BVH
/// bounding box this type is never padded implicitly: cut boxes may legitimately
/// be flat or empty.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
}

impl Aabb {
    /// Create a new box from three intervals.
    pub fn new(x: Interval, y: Interval, z: Interval) -> Self {
        Self { x, y, z }
    }

    /// Create a box from its six bounds.
    pub fn from_bounds(x1: f32, x2: f32, y1: f32, y2: f32, z1: f32, z2: f32) -> Self {
        Self::new(
            Interval::new(x1, x2),
            Interval::new(y1, y2),
            Interval::new(z1, z2),
        )
    }

    /// Create a box from two corner points.
    pub fn from_points(a: Vec3, b: Vec3) -> Self {
        let min = a.min(b);
        let max = a.max(b);
        Self::from_bounds(min.x, max.x, min.y, max.y, min.z, max.z)
    }

    /// Smallest box containing every point, or [`Aabb::EMPTY`] for no points.
    pub fn enclosing<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        points.into_iter().fold(Aabb::EMPTY, |acc, p| acc.include(*p))
    }

    /// Box rebuilt from `[x1, x2, y1, y2, z1, z2]`.
    pub fn from_array(v: [f32; 6]) -> Self {
        Self::from_bounds(v[0], v[1], v[2], v[3], v[4], v[5])
    }

    /// Bounds as `[x1, x2, y1, y2, z1, z2]`.
    pub fn to_array(&self) -> [f32; 6] {
        [
            self.x.min, self.x.max, self.y.min, self.y.max, self.z.min, self.z.max,
        ]
    }

    /// Get the interval for a specific axis.
    pub fn axis_interval(&self, axis: Axis) -> Interval {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn min(&self) -> Vec3 {
        Vec3::new(self.x.min, self.y.min, self.z.min)
    }

    pub fn max(&self) -> Vec3 {
        Vec3::new(self.x.max, self.y.max, self.z.max)
    }

    /// Returns the center point of the box.
    pub fn center(&self) -> Vec3 {
        Vec3::new(self.x.center(), self.y.center(), self.z.center())
    }

    /// Half of the extent along each axis.
    pub fn half_size(&self) -> Vec3 {
        Vec3::new(self.x.size(), self.y.size(), self.z.size()) * 0.5
    }

    /// Axis with the longest extent. Ties go to the later axis.
    pub fn main_axis(&self) -> Axis {
        let x_size = self.x.size();
        let y_size = self.y.size();
        let z_size = self.z.size();

        if x_size > y_size && x_size > z_size {
            Axis::X
        } else if y_size > z_size {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    pub fn surface_area(&self) -> f32 {
        let (dx, dy, dz) = (self.x.size(), self.y.size(), self.z.size());
        2.0 * (dx * dy + dy * dz + dz * dx)
    }

    /// Inclusive point containment.
    pub fn contains_point(&self, p: Vec3) -> bool {
        self.x.contains(p.x) && self.y.contains(p.y) && self.z.contains(p.z)
    }

    /// True when the box has no volume or its bounds are inverted/NaN.
    pub fn is_degenerate(&self) -> bool {
        !(self.x.size() > 0.0 && self.y.size() > 0.0 && self.z.size() > 0.0)
    }

    /// Extends the box so that it contains `p`.
    pub fn include(&self, p: Vec3) -> Aabb {
        Aabb::new(self.x.include(p.x), self.y.include(p.y), self.z.include(p.z))
    }

    /// Grows every side by `pad`.
    pub fn padded(&self, pad: f32) -> Aabb {
        Aabb::new(self.x.pad(pad), self.y.pad(pad), self.z.pad(pad))
    }

    /// Cuts the box with the plane `axis = coordinate` into (lower, upper) halves.
    pub fn split(&self, axis: Axis, coordinate: f32) -> (Aabb, Aabb) {
        let mut lower = *self;
        let mut upper = *self;
        match axis {
            Axis::X => {
                lower.x.max = coordinate;
                upper.x.min = coordinate;
            }
            Axis::Y => {
                lower.y.max = coordinate;
                upper.y.min = coordinate;
            }
            Axis::Z => {
                lower.z.max = coordinate;
                upper.z.min = coordinate;
            }
        }
        (lower, upper)
    }

    /// Slab test returning the entry/exit ray parameters.
    ///
    /// The parameters are not clamped to the positive half-line, so a ray starting
    /// inside the box reports a negative `min`.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<Interval> {
        let (mut tmin, mut tmax) = slab(self.x, ray.origin.x, ray.direction.x);
        let (ty_min, ty_max) = slab(self.y, ray.origin.y, ray.direction.y);
        if tmin > ty_max || ty_min > tmax {
            return None;
        }
        if ty_min > tmin {
            tmin = ty_min;
        }
        if ty_max < tmax {
            tmax = ty_max;
        }

        let (tz_min, tz_max) = slab(self.z, ray.origin.z, ray.direction.z);
        if tmin > tz_max || tz_min > tmax {
            return None;
        }
        if tz_min > tmin {
            tmin = tz_min;
        }
        if tz_max < tmax {
            tmax = tz_max;
        }

        Some(Interval::new(tmin, tmax))
    }

    /// A box containing nothing; the identity for [`Aabb::include`].
    pub const EMPTY: Aabb = Aabb {
        x: Interval::EMPTY,
        y: Interval::EMPTY,
        z: Interval::EMPTY,
    };
}

#[inline]
fn slab(bounds: Interval, origin: f32, direction: f32) -> (f32, f32) {
    let inv = 1.0 / direction;
    if inv >= 0.0 {
        ((bounds.min - origin) * inv, (bounds.max - origin) * inv)
    } else {
        ((bounds.max - origin) * inv, (bounds.min - origin) * inv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::from_bounds(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0)
    }

    #[test]
    fn test_aabb_from_points_orders_bounds() {
        let aabb = Aabb::from_points(Vec3::new(10.0, 0.0, 5.0), Vec3::new(0.0, 10.0, -5.0));
        assert_eq!(aabb.to_array(), [0.0, 10.0, 0.0, 10.0, -5.0, 5.0]);
    }

    #[test]
    fn test_aabb_center_and_half_size() {
        let aabb = Aabb::from_bounds(0.0, 4.0, -2.0, 2.0, 1.0, 2.0);
        assert_eq!(aabb.center(), Vec3::new(2.0, 0.0, 1.5));
        assert_eq!(aabb.half_size(), Vec3::new(2.0, 2.0, 0.5));
    }

    #[test]
    fn test_aabb_main_axis() {
        assert_eq!(Aabb::from_points(Vec3::ZERO, Vec3::new(10.0, 1.0, 1.0)).main_axis(), Axis::X);
        assert_eq!(Aabb::from_points(Vec3::ZERO, Vec3::new(1.0, 10.0, 1.0)).main_axis(), Axis::Y);
        assert_eq!(Aabb::from_points(Vec3::ZERO, Vec3::new(1.0, 1.0, 10.0)).main_axis(), Axis::Z);
        // cube: ties fall through to Z
        assert_eq!(unit_box().main_axis(), Axis::Z);
    }

    #[test]
    fn test_aabb_surface_area() {
        let aabb = Aabb::from_bounds(0.0, 1.0, 0.0, 2.0, 0.0, 3.0);
        assert!((aabb.surface_area() - 22.0).abs() < 0.001);
    }

    #[test]
    fn test_aabb_contains_point_inclusive() {
        let aabb = unit_box();
        assert!(aabb.contains_point(Vec3::new(1.0, -1.0, 0.0)));
        assert!(aabb.contains_point(Vec3::ZERO));
        assert!(!aabb.contains_point(Vec3::new(1.01, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_split() {
        let (lower, upper) = unit_box().split(Axis::Y, 0.25);
        assert_eq!(lower.y, Interval::new(-1.0, 0.25));
        assert_eq!(upper.y, Interval::new(0.25, 1.0));
        assert_eq!(lower.x, upper.x);
    }

    #[test]
    fn test_aabb_degenerate() {
        assert!(!unit_box().is_degenerate());
        assert!(Aabb::from_bounds(0.0, 0.0, 0.0, 1.0, 0.0, 1.0).is_degenerate());
        assert!(Aabb::EMPTY.is_degenerate());
    }

    #[test]
    fn test_aabb_enclosing() {
        let points = [Vec3::new(1.0, 2.0, 3.0), Vec3::new(-1.0, 0.0, 5.0)];
        let aabb = Aabb::enclosing(points.iter());
        assert_eq!(aabb.to_array(), [-1.0, 1.0, 0.0, 2.0, 3.0, 5.0]);
    }

    #[test]
    fn test_aabb_intersect_ray() {
        let aabb = unit_box();

        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let hit = aabb.intersect_ray(&ray).unwrap();
        assert!((hit.min - 4.0).abs() < 0.001);
        assert!((hit.max - 6.0).abs() < 0.001);

        // Parallel ray outside the slab
        let ray = Ray::new(Vec3::new(10.0, 0.0, 0.0), Vec3::Z);
        assert!(aabb.intersect_ray(&ray).is_none());

        // Diagonal miss
        let ray = Ray::new(Vec3::new(3.0, 0.0, -5.0), Vec3::new(0.0, 1.0, 1.0).normalize());
        assert!(aabb.intersect_ray(&ray).is_none());
    }

    #[test]
    fn test_aabb_intersect_ray_from_inside() {
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let hit = unit_box().intersect_ray(&ray).unwrap();
        assert!(hit.min < 0.0);
        assert!((hit.max - 1.0).abs() < 0.001);
    }
}
