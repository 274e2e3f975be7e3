//! Render engine: places source and detector around the specimen and traces
//! one ray per detector pixel.
//!
//! A render is driven in three steps:
//!
//! ```ignore
//! let mut engine = Engine::new(&settings).with_scene(&scene);
//! engine.set_rotations(Vec3::new(0.0, 0.5, 0.0));
//! let frame = engine.init_render();
//! let render = engine.render(&frame, RenderOptions::default())?;
//! ```
//!
//! Penetration along a ray is measured with the parity rule: sorted hits
//! alternate between entering and leaving the material, so odd-numbered gaps
//! are inside. Rays with an odd number of hits (open meshes, grazing hits)
//! contribute nothing.

use dc_core::{CutBoxList, Intersection, RayPenetration, RenderFromPosition, Settings};
use dc_math::{inverse_placement_rotation, Mat3, Ray, Vec3};
use rayon::prelude::*;
use thiserror::Error;

use crate::backend::{BatchJob, ComputeBackend, CpuBackend};
use crate::bsp::{TraversalStack, TriHit};
use crate::radon::bad_area_fraction;
use crate::scene::Scene;

/// Upper bound on placements per backend dispatch.
pub const MAX_BATCH_SIZE: usize = 500;

/// Errors from rendering.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Scene is not initialized")]
    SceneNotInitialized,

    #[error("Compute backend initialization failed: {0}")]
    BackendInit(String),

    #[error("Compute backend failed: {0}")]
    BackendCompute(String),

    #[error("Failed to allocate {bytes} bytes of ray buffers")]
    BufferAllocation { bytes: usize },
}

/// Detector placement for one render, in specimen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewFrame {
    /// Top-left and bottom-right detector corners
    pub corners: [Vec3; 2],
    /// Per-pixel steps along detector columns and rows
    pub deltas: [Vec3; 2],
    /// Source position
    pub origin: Vec3,
}

impl ViewFrame {
    /// Ray from the source through detector pixel (x, y).
    #[inline]
    pub fn ray(&self, x: u32, y: u32) -> Ray {
        let target = self.corners[0] + self.deltas[0] * x as f32 + self.deltas[1] * y as f32;
        Ray::towards(self.origin, target)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Keep per-ray records (and, for single renders, intersections).
    pub remember_data: bool,
}

/// One placement of a batch render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchItem {
    pub rotation: Vec3,
    pub frame: ViewFrame,
}

/// Measurements of a single ray.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RayOutcome {
    /// Summed length of the in-material segments
    pub penetration: f32,
    /// Sum of |cos| over the counted hits
    pub dip_sum: f32,
    pub hit_count: u32,
    pub segments: u32,
}

impl RayOutcome {
    /// Mean |cos| over the ray's hits.
    pub fn av_dip(&self) -> f32 {
        if self.hit_count == 0 {
            0.0
        } else {
            self.dip_sum / self.hit_count as f32
        }
    }
}

pub(crate) struct RayCaster<'a> {
    scene: &'a Scene,
    cut_boxes: &'a CutBoxList,
    stack: TraversalStack,
    hits: Vec<TriHit>,
}

impl<'a> RayCaster<'a> {
    pub(crate) fn new(scene: &'a Scene, cut_boxes: &'a CutBoxList) -> Self {
        Self {
            scene,
            cut_boxes,
            stack: TraversalStack::new(scene.tree().split_level()),
            hits: Vec::new(),
        }
    }

    pub(crate) fn cast(&mut self, ray: &Ray, mut intersections: Option<&mut Vec<Intersection>>) -> RayOutcome {
        if !self.cut_boxes.ray_passes(ray) {
            return RayOutcome::default();
        }
        let triangles = self.scene.triangles();
        if !self
            .scene
            .tree()
            .intersections(ray, triangles, &mut self.stack, &mut self.hits)
        {
            return RayOutcome::default();
        }

        self.hits.sort_by(|a, b| a.dist.total_cmp(&b.dist));
        // A triangle shared by two leaves is reported twice at the same distance.
        self.hits.dedup_by_key(|h| h.tri_index);
        if self.hits.is_empty() || self.hits.len() % 2 != 0 {
            return RayOutcome::default();
        }

        let mut outcome = RayOutcome::default();
        for (i, hit) in self.hits.iter().enumerate() {
            if i % 2 == 1 {
                outcome.penetration += hit.dist - self.hits[i - 1].dist;
                outcome.segments += 1;
            }
            let cos = triangles
                .get(hit.tri_index as usize)
                .map_or(0.0, |t| t.angle_cos(ray));
            outcome.dip_sum += cos.abs();
            outcome.hit_count += 1;
            if let Some(out) = intersections.as_deref_mut() {
                out.push(Intersection {
                    tri_index: hit.tri_index,
                    dip_cos: cos,
                });
            }
        }
        outcome
    }
}

#[derive(Debug, Default)]
struct RenderAccumulator {
    penetration_sum: f64,
    penetration_max: f32,
    penetrating_rays: u64,
    dip_sum: f64,
    hits: u64,
}

impl RenderAccumulator {
    fn add(&mut self, outcome: &RayOutcome) {
        if outcome.segments != 0 {
            self.penetrating_rays += 1;
            self.penetration_sum += outcome.penetration as f64;
            self.penetration_max = self.penetration_max.max(outcome.penetration);
        }
        self.dip_sum += outcome.dip_sum as f64;
        self.hits += outcome.hit_count as u64;
    }

    fn finish(&self, render: &mut RenderFromPosition) {
        render.av_penetration_len = if self.penetrating_rays == 0 {
            0.0
        } else {
            (self.penetration_sum / self.penetrating_rays as f64) as f32
        };
        render.av_dip_angle = if self.hits == 0 {
            0.0
        } else {
            (self.dip_sum / self.hits as f64) as f32
        };
        render.max_penetration_len = self.penetration_max;
    }
}

fn ray_record(x: u32, y: u32, outcome: &RayOutcome) -> RayPenetration {
    RayPenetration {
        x: x as i32,
        y: y as i32,
        total_penetration_len: outcome.penetration,
        av_dip_angle: outcome.av_dip(),
        penetrations: outcome.segments,
    }
}

/// Raycasting engine bound to one scene.
pub struct Engine<'s> {
    scene: Option<&'s Scene>,
    settings: Settings,
    rotation: Vec3,
    position: Vec3,
    rot_mat: Mat3,
    cut_boxes: CutBoxList,
    backend: Box<dyn ComputeBackend>,
}

impl<'s> Engine<'s> {
    /// Engine without a scene, using the CPU backend configured by `settings`.
    pub fn new(settings: &Settings) -> Self {
        Self {
            scene: None,
            settings: settings.clone(),
            rotation: Vec3::ZERO,
            position: Vec3::ZERO,
            rot_mat: Mat3::IDENTITY,
            cut_boxes: CutBoxList::default(),
            backend: Box::new(CpuBackend::from_settings(settings)),
        }
    }

    pub fn with_scene(mut self, scene: &'s Scene) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn with_backend(mut self, backend: Box<dyn ComputeBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_cut_boxes(mut self, cut_boxes: CutBoxList) -> Self {
        self.cut_boxes = cut_boxes;
        self
    }

    pub fn set_scene(&mut self, scene: &'s Scene) {
        self.scene = Some(scene);
    }

    /// Replaces the area-of-interest boxes used by subsequent renders.
    pub fn set_cut_boxes(&mut self, cut_boxes: CutBoxList) {
        self.cut_boxes = cut_boxes;
    }

    pub fn cut_boxes(&self) -> &CutBoxList {
        &self.cut_boxes
    }

    /// Specimen rotation about X, Y and Z in radians.
    pub fn set_rotations(&mut self, rotation: Vec3) {
        self.rotation = rotation;
        self.rot_mat = inverse_placement_rotation(rotation);
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn scene(&self) -> Result<&'s Scene, RenderError> {
        self.scene.ok_or(RenderError::SceneNotInitialized)
    }

    /// Detector and source placement for the current rotation and position.
    pub fn init_render(&self) -> ViewFrame {
        let s = &self.settings;
        let (hw, hh) = (s.plane_half_width, s.plane_half_height);
        let dx = 2.0 * hw / s.frame_width as f32;
        let dy = -2.0 * hh / s.frame_height as f32;

        ViewFrame {
            corners: [
                self.transform(Vec3::new(-hw, hh, s.plane_z)),
                self.transform(Vec3::new(hw, -hh, s.plane_z)),
            ],
            deltas: [self.rot_mat * Vec3::new(dx, 0.0, 0.0), self.rot_mat * Vec3::new(0.0, dy, 0.0)],
            origin: self.transform(Vec3::new(0.0, 0.0, s.origin_z)),
        }
    }

    /// Maps a point from the placement frame into specimen coordinates.
    pub fn transform(&self, v: Vec3) -> Vec3 {
        self.rot_mat * (v - self.position)
    }

    /// Traces the full detector raster for `frame`.
    ///
    /// Statistics are always filled. Rays that penetrate and every counted
    /// intersection are kept only with `options.remember_data`.
    pub fn render(&self, frame: &ViewFrame, options: RenderOptions) -> Result<RenderFromPosition, RenderError> {
        let scene = self.scene()?;
        let width = self.settings.frame_width;
        let cut_boxes = &self.cut_boxes;

        let rows: Vec<(Vec<RayOutcome>, Vec<Intersection>)> = (0..self.settings.frame_height)
            .into_par_iter()
            .map_init(
                || RayCaster::new(scene, cut_boxes),
                |caster, y| {
                    let mut intersections = Vec::new();
                    let outcomes: Vec<RayOutcome> = (0..width)
                        .map(|x| {
                            let record = options.remember_data.then_some(&mut intersections);
                            caster.cast(&frame.ray(x, y), record)
                        })
                        .collect();
                    (outcomes, intersections)
                },
            )
            .collect();

        let mut render = RenderFromPosition::new(self.rotation, self.position);
        let mut stats = RenderAccumulator::default();
        for (y, (outcomes, intersections)) in rows.into_iter().enumerate() {
            for (x, outcome) in outcomes.iter().enumerate() {
                stats.add(outcome);
                if options.remember_data && outcome.segments != 0 {
                    render.rays.push(ray_record(x as u32, y as u32, outcome));
                }
            }
            render.intersections.extend(intersections);
        }
        stats.finish(&mut render);
        Ok(render)
    }

    /// Renders many placements through the compute backend.
    ///
    /// Produces the same statistics as one [`Engine::render`] per item. Records
    /// never carry intersections; rays are kept with `options.remember_data`.
    pub fn render_batch(
        &self,
        items: &[BatchItem],
        options: RenderOptions,
    ) -> Result<Vec<RenderFromPosition>, RenderError> {
        let scene = self.scene()?;
        let width = self.settings.frame_width;
        let height = self.settings.frame_height;
        let rays_per_render = self.settings.ray_count();

        let batch_size = self.effective_batch_size(rays_per_render);
        let mut renders = Vec::with_capacity(items.len());

        for chunk in items.chunks(batch_size) {
            let frames: Vec<ViewFrame> = chunk.iter().map(|item| item.frame).collect();
            let job = BatchJob {
                scene,
                frames: &frames,
                width,
                height,
                cut_boxes: &self.cut_boxes,
            };
            let buffers = self.backend.raycast_batch(&job)?;
            if buffers.len() != job.total_rays() {
                return Err(RenderError::BackendCompute(format!(
                    "backend returned {} rays, expected {}",
                    buffers.len(),
                    job.total_rays()
                )));
            }

            for (i, item) in chunk.iter().enumerate() {
                let mut render = RenderFromPosition::new(item.rotation, self.position);
                let mut stats = RenderAccumulator::default();
                let base = i * rays_per_render;
                for ray in 0..rays_per_render {
                    let Some(outcome) = buffers.outcome(base + ray) else {
                        continue;
                    };
                    stats.add(&outcome);
                    if options.remember_data && outcome.segments != 0 {
                        let (x, y) = ((ray % width as usize) as u32, (ray / width as usize) as u32);
                        render.rays.push(ray_record(x, y, &outcome));
                    }
                }
                stats.finish(&mut render);
                renders.push(render);
            }
        }
        Ok(renders)
    }

    /// Placements per backend dispatch after applying every limit.
    pub fn effective_batch_size(&self, rays_per_render: usize) -> usize {
        let requested = self.settings.batch_size;
        let limit = MAX_BATCH_SIZE.min(self.backend.max_batch_size(rays_per_render));
        if requested > limit {
            log::warn!(
                "Batch size {requested} exceeds the {} backend limit, using {limit}",
                self.backend.name()
            );
        }
        requested.min(limit).max(1)
    }

    /// Bad-area fraction of `selection` for the current rotation.
    ///
    /// The scene's plane distances must match the current position
    /// (see [`Scene::recalculate_d`]).
    pub fn radon_space_analysis(&self, selection: &[u32]) -> Result<f32, RenderError> {
        let scene = self.scene()?;
        let axis = (self.rot_mat * Vec3::Y).normalize_or_zero();
        let radius = (0.5 * self.settings.origin_z).abs();
        Ok(bad_area_fraction(scene.triangles(), selection, axis, radius))
    }
}
