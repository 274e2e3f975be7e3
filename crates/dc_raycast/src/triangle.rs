//! Triangle primitive for raycasting.
//!
//! Uses Wald's projection method: the triangle is projected onto the plane of
//! its dominant normal axis `k`, and everything the per-ray test needs is
//! precomputed once, so intersection is a handful of multiply-adds.
//!
//! The same primitive answers triangle/box overlap queries (separating axis
//! theorem) while the tree is being filled.

use dc_math::{Aabb, Ray, Vec3};

/// Outcome of a ray/triangle test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitKind {
    Miss,
    /// Ray crosses the face against its normal (entering the solid).
    Hit,
    /// Ray crosses the face along its normal, i.e. it started inside.
    EnteringFromInside,
}

impl HitKind {
    #[inline]
    pub fn is_hit(self) -> bool {
        self != HitKind::Miss
    }
}

/// A triangle with precomputed intersection coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct TriPrim {
    /// Index of the triangle in the source mesh
    index: u32,
    vertices: [Vec3; 3],
    /// Unit face normal
    normal: Vec3,
    /// Plane distance relative to the current specimen translation
    d: f32,
    surface: f32,
    /// Dominant normal axis and the two projection axes
    k: usize,
    u: usize,
    v: usize,
    nu: f32,
    nv: f32,
    nd: f32,
    bnu: f32,
    bnv: f32,
    cnu: f32,
    cnv: f32,
    /// Zero-area triangles never report a hit
    degenerate: bool,
}

impl TriPrim {
    /// Create a primitive for mesh triangle `index` and precompute it.
    pub fn new(index: u32, vertices: [Vec3; 3]) -> Self {
        let mut tri = Self {
            index,
            vertices,
            normal: Vec3::ZERO,
            d: 0.0,
            surface: 0.0,
            k: 0,
            u: 1,
            v: 2,
            nu: 0.0,
            nv: 0.0,
            nd: 0.0,
            bnu: 0.0,
            bnv: 0.0,
            cnu: 0.0,
            cnv: 0.0,
            degenerate: true,
        };
        tri.precompute();
        tri
    }

    fn precompute(&mut self) {
        let [a, b_vert, c_vert] = self.vertices;
        let c = b_vert - a;
        let b = c_vert - a;
        let n = b.cross(c);

        self.k = dominant_axis(n);
        self.u = (self.k + 1) % 3;
        self.v = (self.k + 2) % 3;
        let (k, u, v) = (self.k, self.u, self.v);

        self.surface = 0.5 * n.length();
        self.normal = n.normalize_or_zero();
        self.d = self.normal.dot(a);

        let det = b[u] * c[v] - b[v] * c[u];
        if n[k] == 0.0 || det == 0.0 || !det.is_finite() {
            self.degenerate = true;
            return;
        }
        self.degenerate = false;

        let krec = 1.0 / n[k];
        self.nu = n[u] * krec;
        self.nv = n[v] * krec;
        self.nd = n.dot(a) * krec;

        let reci = 1.0 / det;
        self.bnu = b[u] * reci;
        self.bnv = -b[v] * reci;
        self.cnu = c[v] * reci;
        self.cnv = -c[u] * reci;
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn vertices(&self) -> &[Vec3; 3] {
        &self.vertices
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// Plane distance as of the last [`TriPrim::recalculate_d`].
    pub fn d(&self) -> f32 {
        self.d
    }

    pub fn surface(&self) -> f32 {
        self.surface
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::enclosing(self.vertices.iter())
    }

    /// Cosine between `ray` and the face normal.
    #[inline]
    pub fn angle_cos(&self, ray: &Ray) -> f32 {
        ray.direction.dot(self.normal)
    }

    /// Updates the plane distance for a specimen moved by `-translation`.
    pub fn recalculate_d(&mut self, translation: Vec3) {
        self.d = self.normal.dot(self.vertices[0] - translation);
    }

    /// Wald ray/triangle test.
    ///
    /// A hit must lie strictly between 0 and `max_dist`; on a hit `max_dist` is
    /// tightened to the hit distance.
    #[inline]
    pub fn intersect(&self, ray: &Ray, max_dist: &mut f32) -> HitKind {
        if self.degenerate {
            return HitKind::Miss;
        }
        let (k, u, v) = (self.k, self.u, self.v);
        let o = ray.origin;
        let dir = ray.direction;

        let lnd = 1.0 / (dir[k] + self.nu * dir[u] + self.nv * dir[v]);
        let t = (self.nd - o[k] - self.nu * o[u] - self.nv * o[v]) * lnd;
        if !(*max_dist > t && t > 0.0) {
            return HitKind::Miss;
        }

        let hu = o[u] + t * dir[u] - self.vertices[0][u];
        let hv = o[v] + t * dir[v] - self.vertices[0][v];
        let beta = hv * self.bnu + hu * self.bnv;
        if beta < 0.0 {
            return HitKind::Miss;
        }
        let gamma = hu * self.cnu + hv * self.cnv;
        if gamma < 0.0 || beta + gamma > 1.0 {
            return HitKind::Miss;
        }

        *max_dist = t;
        if dir.dot(self.normal) > 0.0 {
            HitKind::EnteringFromInside
        } else {
            HitKind::Hit
        }
    }

    /// Triangle/box overlap (Akenine-Möller separating axis test).
    pub fn intersects_box(&self, box_center: Vec3, box_half_size: Vec3) -> bool {
        let v0 = self.vertices[0] - box_center;
        let v1 = self.vertices[1] - box_center;
        let v2 = self.vertices[2] - box_center;
        let edges = [v1 - v0, v2 - v1, v0 - v2];

        // 9 axes: cross products of the box axes with the triangle edges
        for edge in edges {
            for box_axis in [Vec3::X, Vec3::Y, Vec3::Z] {
                let axis = box_axis.cross(edge);
                let p0 = axis.dot(v0);
                let p1 = axis.dot(v1);
                let p2 = axis.dot(v2);
                let radius = box_half_size.dot(axis.abs());
                if p0.min(p1).min(p2) > radius || p0.max(p1).max(p2) < -radius {
                    return false;
                }
            }
        }

        // 3 box face normals
        for i in 0..3 {
            let lo = v0[i].min(v1[i]).min(v2[i]);
            let hi = v0[i].max(v1[i]).max(v2[i]);
            if lo > box_half_size[i] || hi < -box_half_size[i] {
                return false;
            }
        }

        // triangle plane
        plane_box_overlap(edges[0].cross(edges[1]), v0, box_half_size)
    }
}

/// Axis of the largest normal component; ties prefer the later axis.
fn dominant_axis(n: Vec3) -> usize {
    let a = n.abs();
    if a.x > a.y {
        if a.x > a.z {
            0
        } else {
            2
        }
    } else if a.y > a.z {
        1
    } else {
        2
    }
}

fn plane_box_overlap(normal: Vec3, vert: Vec3, half: Vec3) -> bool {
    let mut vmin = Vec3::ZERO;
    let mut vmax = Vec3::ZERO;
    for q in 0..3 {
        if normal[q] > 0.0 {
            vmin[q] = -half[q] - vert[q];
            vmax[q] = half[q] - vert[q];
        } else {
            vmin[q] = half[q] - vert[q];
            vmax[q] = -half[q] - vert[q];
        }
    }
    if normal.dot(vmin) > 0.0 {
        return false;
    }
    normal.dot(vmax) >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xy_triangle() -> TriPrim {
        // Normal = (v2 - v0) x (v1 - v0) points along -Z.
        TriPrim::new(0, [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)])
    }

    /// Barycentric weights of `p` for `tri`: (w0, w1, w2).
    fn barycentric(tri: &[Vec3; 3], p: Vec3) -> (f32, f32, f32) {
        let e1 = tri[1] - tri[0];
        let e2 = tri[2] - tri[0];
        let ep = p - tri[0];
        let d11 = e1.dot(e1);
        let d12 = e1.dot(e2);
        let d22 = e2.dot(e2);
        let dp1 = ep.dot(e1);
        let dp2 = ep.dot(e2);
        let denom = d11 * d22 - d12 * d12;
        let w1 = (d22 * dp1 - d12 * dp2) / denom;
        let w2 = (d11 * dp2 - d12 * dp1) / denom;
        (1.0 - w1 - w2, w1, w2)
    }

    #[test]
    fn test_precompute_normal_and_surface() {
        let tri = xy_triangle();
        assert!((tri.normal() - Vec3::new(0.0, 0.0, -1.0)).length() < 0.0001);
        assert!((tri.surface() - 2.0).abs() < 0.0001);
        assert!(!tri.is_degenerate());
        assert!(tri.d().abs() < 0.0001);
    }

    #[test]
    fn test_intersect_hit_and_distance() {
        let tri = xy_triangle();
        let ray = Ray::new(Vec3::new(0.5, 0.5, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let mut dist = 1e6;
        // direction . normal > 0: the ray runs along the normal
        assert_eq!(tri.intersect(&ray, &mut dist), HitKind::EnteringFromInside);
        assert!((dist - 5.0).abs() < 0.0001);

        let ray = Ray::new(Vec3::new(0.5, 0.5, -5.0), Vec3::Z);
        let mut dist = 1e6;
        assert_eq!(tri.intersect(&ray, &mut dist), HitKind::Hit);
    }

    #[test]
    fn test_intersect_respects_bounds() {
        let tri = xy_triangle();
        let ray = Ray::new(Vec3::new(0.5, 0.5, 5.0), Vec3::new(0.0, 0.0, -1.0));

        let mut dist = 4.0;
        assert_eq!(tri.intersect(&ray, &mut dist), HitKind::Miss);
        assert_eq!(dist, 4.0);

        // triangle behind the origin
        let behind = Ray::new(Vec3::new(0.5, 0.5, 5.0), Vec3::Z);
        let mut dist = 1e6;
        assert_eq!(tri.intersect(&behind, &mut dist), HitKind::Miss);

        // outside the barycentric range
        let outside = Ray::new(Vec3::new(1.5, 1.5, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let mut dist = 1e6;
        assert_eq!(tri.intersect(&outside, &mut dist), HitKind::Miss);
    }

    #[test]
    fn test_hit_point_has_valid_barycentrics() {
        let verts = [
            Vec3::new(-1.0, 0.3, 2.0),
            Vec3::new(2.0, -0.5, 1.0),
            Vec3::new(0.4, 2.2, -0.5),
        ];
        let tri = TriPrim::new(3, verts);
        let origin = Vec3::new(0.0, 0.0, -10.0);

        let mut hits = 0;
        for i in 0..15 {
            for j in 0..15 {
                let target = Vec3::new(-1.5 + i as f32 * 0.25, -1.0 + j as f32 * 0.25, 1.0);
                let ray = Ray::towards(origin, target);
                let mut dist = 1e6;
                if tri.intersect(&ray, &mut dist).is_hit() {
                    hits += 1;
                    let (w0, w1, w2) = barycentric(&verts, ray.at(dist));
                    assert!(w0 >= -1e-5 && w1 >= -1e-5 && w2 >= -1e-5);
                    assert!((w0 + w1 + w2 - 1.0).abs() < 1e-5);
                    // the point is on the plane
                    assert!((ray.at(dist) - verts[0]).dot(tri.normal()).abs() < 1e-3);
                }
            }
        }
        assert!(hits > 0);
    }

    #[test]
    fn test_degenerate_triangle_never_hits() {
        let tri = TriPrim::new(0, [Vec3::ZERO, Vec3::X, Vec3::X * 2.0]);
        assert!(tri.is_degenerate());
        assert_eq!(tri.surface(), 0.0);
        let ray = Ray::new(Vec3::new(0.5, 0.0, -1.0), Vec3::Z);
        let mut dist = 1e6;
        assert_eq!(tri.intersect(&ray, &mut dist), HitKind::Miss);
    }

    #[test]
    fn test_recalculate_d() {
        let mut tri = TriPrim::new(
            0,
            [Vec3::new(0.0, 0.0, 3.0), Vec3::new(1.0, 0.0, 3.0), Vec3::new(0.0, 1.0, 3.0)],
        );
        let original = tri.d();
        tri.recalculate_d(Vec3::ZERO);
        assert_eq!(tri.d(), original);

        // normal is -Z, so moving the specimen by +2 in Z shifts d by -2
        tri.recalculate_d(Vec3::new(0.0, 0.0, -2.0));
        assert!((tri.d() - (original - 2.0)).abs() < 0.0001);
    }

    #[test]
    fn test_box_overlap() {
        let tri = xy_triangle();
        assert!(tri.intersects_box(Vec3::new(0.5, 0.5, 0.0), Vec3::splat(0.25)));
        // box above the triangle plane
        assert!(!tri.intersects_box(Vec3::new(0.5, 0.5, 1.0), Vec3::splat(0.25)));
        // box beyond the hypotenuse
        assert!(!tri.intersects_box(Vec3::new(1.8, 1.8, 0.0), Vec3::splat(0.25)));
        // box containing the whole triangle
        assert!(tri.intersects_box(Vec3::ZERO, Vec3::splat(5.0)));
    }

    #[test]
    fn test_box_overlap_is_winding_independent() {
        let verts = [
            Vec3::new(0.1, 0.2, 0.3),
            Vec3::new(1.7, -0.4, 0.9),
            Vec3::new(0.6, 1.3, -0.8),
        ];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        let boxes = [
            (Vec3::new(0.5, 0.5, 0.5), Vec3::splat(0.3)),
            (Vec3::new(2.0, 2.0, 2.0), Vec3::splat(0.5)),
            (Vec3::new(1.2, 0.0, 0.5), Vec3::new(0.2, 0.1, 0.2)),
            (Vec3::new(-0.5, 1.0, 0.0), Vec3::splat(0.4)),
        ];
        for (center, half) in boxes {
            let reference = TriPrim::new(0, verts).intersects_box(center, half);
            for order in orders {
                let tri = TriPrim::new(0, [verts[order[0]], verts[order[1]], verts[order[2]]]);
                assert_eq!(tri.intersects_box(center, half), reference);
            }
        }
    }
}
