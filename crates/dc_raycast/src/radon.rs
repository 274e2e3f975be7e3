//! Radon-space bad-area analysis.
//!
//! A surface element is reconstructed reliably only if its plane is tangent to
//! some ray during the scan. With the specimen rotating about `axis` and the
//! source at distance `radius` from that axis, planes that are too far from the
//! torus of source positions are never tangent. Their area counts as bad.

use dc_math::Vec3;
use rayon::prelude::*;

use crate::triangle::TriPrim;

/// Fraction of the selected surface area outside the reachable Radon space.
///
/// Uses each triangle's current plane distance `d`, so the scene must have been
/// updated with `recalculate_d` for the placement being analysed. Returns 0 when
/// the selection has no area.
pub fn bad_area_fraction(triangles: &[TriPrim], selection: &[u32], axis: Vec3, radius: f32) -> f32 {
    let (bad, good) = selection
        .par_iter()
        .filter_map(|&i| triangles.get(i as usize))
        .fold(
            || (0.0f64, 0.0f64),
            |(bad, good), tri| {
                let surface = tri.surface() as f64;
                if is_outside_radon_space(tri, axis, radius) {
                    (bad + surface, good)
                } else {
                    (bad, good + surface)
                }
            },
        )
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

    let total = bad + good;
    if total == 0.0 {
        0.0
    } else {
        (bad / total) as f32
    }
}

fn is_outside_radon_space(tri: &TriPrim, axis: Vec3, radius: f32) -> bool {
    let d = tri.d();
    let a = d * tri.normal().dot(axis).abs();
    let b = (d * d - a * a).max(0.0).sqrt() - radius;
    (a * a + b * b).sqrt() > radius
}
