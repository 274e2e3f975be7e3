//! Compute backends for batched rendering.
//!
//! A backend traces the full raster of several placements in one call and
//! returns flat per-ray buffers; the engine turns those into render records.
//! Only a CPU backend exists, but the seam keeps device backends possible.

use dc_core::{CutBoxList, Settings};
use rayon::prelude::*;

use crate::engine::{RayCaster, RayOutcome, RenderError, ViewFrame};
use crate::scene::Scene;

/// Bytes of buffer space needed per traced ray.
const BYTES_PER_RAY: usize = std::mem::size_of::<RayOutcome>();

/// Default buffer budget of the CPU backend.
const DEFAULT_MEMORY_BUDGET: usize = 512 * 1024 * 1024;

/// One backend dispatch: `frames.len()` placements of the same raster.
#[derive(Debug, Clone, Copy)]
pub struct BatchJob<'a> {
    pub scene: &'a Scene,
    pub frames: &'a [ViewFrame],
    pub width: u32,
    pub height: u32,
    pub cut_boxes: &'a CutBoxList,
}

impl BatchJob<'_> {
    pub fn rays_per_frame(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn total_rays(&self) -> usize {
        self.rays_per_frame().saturating_mul(self.frames.len())
    }
}

/// Per-ray results of a batch, frame after frame, each frame row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchBuffers {
    pub outcomes: Vec<RayOutcome>,
}

impl BatchBuffers {
    /// Buffers for `rays` rays, all empty outcomes.
    pub fn zeroed(rays: usize) -> Result<Self, RenderError> {
        let mut outcomes = Vec::new();
        outcomes
            .try_reserve_exact(rays)
            .map_err(|_| RenderError::BufferAllocation {
                bytes: rays.saturating_mul(BYTES_PER_RAY),
            })?;
        outcomes.resize(rays, RayOutcome::default());
        Ok(Self { outcomes })
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcome(&self, index: usize) -> Option<RayOutcome> {
        self.outcomes.get(index).copied()
    }
}

/// Executes batched raycasts.
pub trait ComputeBackend: Send {
    fn name(&self) -> &str;

    /// Largest number of placements one dispatch can hold for the given raster.
    fn max_batch_size(&self, rays_per_render: usize) -> usize;

    fn raycast_batch(&self, job: &BatchJob<'_>) -> Result<BatchBuffers, RenderError>;
}

/// Traces batches on the CPU with rayon.
pub struct CpuBackend {
    pool: Option<rayon::ThreadPool>,
    memory_budget: usize,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            pool: None,
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }
}

impl CpuBackend {
    /// Backend running on the global rayon pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend configured by `threads` and `memory_budget_mb`.
    ///
    /// Falls back to the global pool when a dedicated pool cannot be built.
    pub fn from_settings(settings: &Settings) -> Self {
        let backend = if settings.threads == 0 {
            Self::new()
        } else {
            Self::with_threads(settings.threads).unwrap_or_else(|e| {
                log::warn!("{e}, using the shared thread pool");
                Self::new()
            })
        };
        backend.with_memory_budget(settings.memory_budget_bytes())
    }

    /// Backend with its own pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self, RenderError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("dc-raycast-{i}"))
            .build()
            .map_err(|e| RenderError::BackendInit(e.to_string()))?;
        Ok(Self {
            pool: Some(pool),
            ..Self::default()
        })
    }

    /// Caps the bytes of ray buffers one dispatch may allocate.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |pool| pool.current_num_threads())
    }

    fn trace(job: &BatchJob<'_>) -> Result<BatchBuffers, RenderError> {
        let width = job.width as usize;
        let height = job.height as usize;

        let mut buffers = BatchBuffers::zeroed(job.total_rays())?;
        buffers
            .outcomes
            .par_chunks_mut(width)
            .enumerate()
            .for_each_init(
                || RayCaster::new(job.scene, job.cut_boxes),
                |caster, (row, out)| {
                    let frame = &job.frames[row / height];
                    let y = (row % height) as u32;
                    for (x, slot) in out.iter_mut().enumerate() {
                        *slot = caster.cast(&frame.ray(x as u32, y), None);
                    }
                },
            );
        Ok(buffers)
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn max_batch_size(&self, rays_per_render: usize) -> usize {
        let per_render = rays_per_render.saturating_mul(BYTES_PER_RAY).max(1);
        (self.memory_budget / per_render).max(1)
    }

    fn raycast_batch(&self, job: &BatchJob<'_>) -> Result<BatchBuffers, RenderError> {
        if job.rays_per_frame() == 0 {
            return Err(RenderError::BackendCompute("empty detector raster".to_string()));
        }
        let limit = self.max_batch_size(job.rays_per_frame());
        if job.frames.len() > limit {
            return Err(RenderError::BackendCompute(format!(
                "{} placements exceed the limit of {limit} for this raster",
                job.frames.len()
            )));
        }
        log::debug!(
            "{} backend: {} placements x {} rays",
            self.name(),
            job.frames.len(),
            job.rays_per_frame()
        );
        match &self.pool {
            Some(pool) => pool.install(|| Self::trace(job)),
            None => Self::trace(job),
        }
    }
}
