//! DreamCaster raycast engine.
//!
//! Casts a detector raster of rays through a triangulated specimen and measures
//! how much material each ray crosses. Repeating this over a grid of specimen
//! rotations finds the placement with the least penetration for CT scanning.
//!
//! The specimen stays fixed; each placement rotates and translates the source
//! and detector around it instead.

mod backend;
mod batch;
mod bsp;
mod engine;
mod radon;
mod scene;
mod shading;
mod tree_cache;
mod triangle;

pub use backend::{BatchBuffers, BatchJob, ComputeBackend, CpuBackend};
pub use batch::{grid_rotation, run_batch, BatchConfig, BatchError, BatchResults, Grid3, RadonMode};
pub use bsp::{BspNode, BspTree, SplitPolicy, TraversalStack, TriHit, TRACE_MAX_DISTANCE};
pub use engine::{
    BatchItem, Engine, RayOutcome, RenderError, RenderOptions, ViewFrame, MAX_BATCH_SIZE,
};
pub use radon::bad_area_fraction;
pub use scene::{Scene, SceneError};
pub use shading::{save_png, shade_placements, shade_render, ShadeMode};
pub use tree_cache::TreeError;
pub use triangle::{HitKind, TriPrim};

/// Re-export math types from dc_math
pub use dc_math::{Aabb, Ray, Vec3};

#[cfg(test)]
pub(crate) mod test_meshes {
    use dc_core::Mesh;
    use dc_math::Vec3;

    use crate::TriPrim;

    /// Axis-aligned cube of edge `size` centred at the origin, 12 triangles.
    pub fn cube(size: f32) -> Mesh {
        let h = size * 0.5;
        let positions = vec![
            Vec3::new(-h, -h, -h),
            Vec3::new(h, -h, -h),
            Vec3::new(h, h, -h),
            Vec3::new(-h, h, -h),
            Vec3::new(-h, -h, h),
            Vec3::new(h, -h, h),
            Vec3::new(h, h, h),
            Vec3::new(-h, h, h),
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 1, 2, 0, 2, 3, // -z
            4, 6, 5, 4, 7, 6, // +z
            0, 4, 5, 0, 5, 1, // -y
            3, 2, 6, 3, 6, 7, // +y
            0, 3, 7, 0, 7, 4, // -x
            1, 5, 6, 1, 6, 2, // +x
        ];
        Mesh::new(positions, indices)
    }

    /// UV sphere of radius 1 centred at the origin.
    pub fn sphere(stacks: u32, slices: u32) -> Mesh {
        let mut positions = vec![Vec3::Y];
        for i in 1..stacks {
            let phi = std::f32::consts::PI * i as f32 / stacks as f32;
            for j in 0..slices {
                let theta = std::f32::consts::TAU * j as f32 / slices as f32;
                positions.push(Vec3::new(
                    phi.sin() * theta.cos(),
                    phi.cos(),
                    phi.sin() * theta.sin(),
                ));
            }
        }
        positions.push(-Vec3::Y);
        let bottom = positions.len() as u32 - 1;
        let ring = |i: u32, j: u32| 1 + i * slices + j % slices;

        let mut indices = Vec::new();
        for j in 0..slices {
            indices.extend([0, ring(0, j + 1), ring(0, j)]);
        }
        for i in 0..stacks - 2 {
            for j in 0..slices {
                indices.extend([ring(i, j), ring(i, j + 1), ring(i + 1, j)]);
                indices.extend([ring(i + 1, j), ring(i, j + 1), ring(i + 1, j + 1)]);
            }
        }
        for j in 0..slices {
            indices.extend([bottom, ring(stacks - 2, j), ring(stacks - 2, j + 1)]);
        }
        Mesh::new(positions, indices)
    }

    pub fn prims(mesh: &Mesh) -> Vec<TriPrim> {
        mesh.triangles()
            .enumerate()
            .map(|(i, v)| TriPrim::new(i as u32, v))
            .collect()
    }

    pub fn cube_prims(size: f32) -> Vec<TriPrim> {
        prims(&cube(size))
    }

    pub fn sphere_prims(stacks: u32, slices: u32) -> Vec<TriPrim> {
        prims(&sphere(stacks, slices))
    }
}
