//! Specimen mesh representation.
//!
//! A shared vertex pool plus triangle indices. The scene builds its intersection
//! primitives from this; nothing downstream mutates it.

use dc_math::{Aabb, Vec3};

/// A triangle mesh with a shared vertex pool.
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Vertex positions (one Vec3 per vertex)
    pub positions: Vec<Vec3>,

    /// Triangle indices (every 3 indices form a triangle)
    pub indices: Vec<u32>,

    /// Axis-aligned bounding box
    pub bounds: Aabb,
}

impl Mesh {
    /// Create a new mesh from positions and indices.
    ///
    /// The bounds are the tight box around `positions`.
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let bounds = Aabb::enclosing(positions.iter());
        Self {
            positions,
            indices,
            bounds,
        }
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get the number of vertices in the mesh.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Vertices of triangle `index`, or `None` if the triangle references a
    /// vertex outside the pool.
    pub fn triangle(&self, index: usize) -> Option<[Vec3; 3]> {
        let face = self.indices.get(index * 3..index * 3 + 3)?;
        Some([
            *self.positions.get(face[0] as usize)?,
            *self.positions.get(face[1] as usize)?,
            *self.positions.get(face[2] as usize)?,
        ])
    }

    /// Iterate over triangle vertex triplets in index order.
    ///
    /// Faces with out-of-range indices are skipped with a warning, so the
    /// iterator position is not a triangle index for malformed meshes. Call
    /// [`Mesh::validate`] first when indices matter.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        (0..self.triangle_count()).filter_map(move |i| {
            let tri = self.triangle(i);
            if tri.is_none() {
                log::warn!(
                    "Invalid triangle {} indices: {:?}, vertex count: {}",
                    i,
                    &self.indices[i * 3..i * 3 + 3],
                    self.positions.len()
                );
            }
            tri
        })
    }

    /// True when the index count is a multiple of 3 and every index is in range.
    pub fn validate(&self) -> bool {
        self.indices.len() % 3 == 0
            && self
                .indices
                .iter()
                .all(|&i| (i as usize) < self.positions.len())
    }

    /// Get the mesh center (center of bounding box).
    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    /// Moves the bounds centre to the origin and multiplies every vertex by
    /// `scale`. The new bounds are padded by `pad` on each side.
    pub fn center_and_scale(&mut self, scale: f32, pad: f32) {
        let center = self.center();
        for p in &mut self.positions {
            *p = (*p - center) * scale;
        }
        self.bounds = Aabb::enclosing(self.positions.iter()).padded(pad);
    }
}
