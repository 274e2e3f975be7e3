//! Placement search over a grid of specimen rotations.
//!
//! For every placement (X, Z) the specimen is also turned through a full
//! revolution about Y, the scan axis. The per-rotation renders are streamed to
//! a results file and aggregated into per-placement statistics: the mean over
//! Y of the average penetration and dip cosine, and the maximum penetration.

use std::f32::consts::TAU;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dc_core::{
    CutBoxList, Diagnostics, FormatError, FormatResult, Parameter, PlacementParams,
    RenderFromPosition, ResultsHeader, ResultsReader, ResultsWriter, Settings, MAX_GRID_COUNT,
};
use dc_math::Vec3;
use thiserror::Error;

use crate::engine::{BatchItem, Engine, RenderError, RenderOptions};
use crate::scene::Scene;

/// Errors that abort a batch run.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Invalid batch configuration: {0}")]
    Config(String),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Results file error: {0}")]
    Format(#[from] FormatError),

    #[error("Batch cancelled")]
    Cancelled,
}

/// Whether and how the Radon-space bad area is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RadonMode {
    #[default]
    Off,
    /// Render every rotation and compute the bad area per placement.
    WithRender,
    /// Skip rendering. Every record is zeroed apart from the bad area.
    Only,
}

/// Rotation grid and options of a batch run. Angles are in radians.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    pub count_x: u32,
    pub min_x: f32,
    pub max_x: f32,
    /// Rotations per revolution about the scan axis
    pub count_y: u32,
    pub count_z: u32,
    pub min_z: f32,
    pub max_z: f32,
    /// Specimen position, in scaled units
    pub position: Vec3,
    pub radon_mode: RadonMode,
    /// Store rays and intersections of every render in the results file
    pub save_additional_data: bool,
    pub cut_boxes: CutBoxList,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            count_x: 4,
            min_x: 0.0,
            max_x: std::f32::consts::PI,
            count_y: 8,
            count_z: 4,
            min_z: 0.0,
            max_z: std::f32::consts::PI,
            position: Vec3::ZERO,
            radon_mode: RadonMode::Off,
            save_additional_data: false,
            cut_boxes: CutBoxList::default(),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), BatchError> {
        let counts = [self.count_x, self.count_y, self.count_z];
        if counts.contains(&0) {
            return Err(BatchError::Config("grid counts must be at least 1".to_string()));
        }
        if counts.iter().any(|&c| c > MAX_GRID_COUNT) || self.header().checked_total_renders().is_none() {
            return Err(BatchError::Config(format!(
                "grid counts must not exceed {MAX_GRID_COUNT}"
            )));
        }
        let limits = [self.min_x, self.max_x, self.min_z, self.max_z];
        if limits.iter().any(|v| !v.is_finite()) || !self.position.is_finite() {
            return Err(BatchError::Config("angles and position must be finite".to_string()));
        }
        Ok(())
    }

    pub fn header(&self) -> ResultsHeader {
        ResultsHeader {
            count_x: self.count_x,
            min_x: self.min_x,
            max_x: self.max_x,
            count_y: self.count_y,
            count_z: self.count_z,
            min_z: self.min_z,
            max_z: self.max_z,
            cut_boxes: self.cut_boxes.clone(),
        }
    }

    fn skip_additional_data(&self) -> bool {
        !self.save_additional_data || self.radon_mode == RadonMode::Only
    }
}

/// Specimen rotation of grid cell (x, y, z).
pub fn grid_rotation(header: &ResultsHeader, x: u32, y: u32, z: u32) -> Vec3 {
    let step_x = (header.max_x - header.min_x) / header.count_x.max(1) as f32;
    let step_z = (header.max_z - header.min_z) / header.count_z.max(1) as f32;
    Vec3::new(
        header.min_x + x as f32 * step_x,
        y as f32 * TAU / header.count_y.max(1) as f32,
        header.min_z + z as f32 * step_z,
    )
}

/// Dense 3D grid indexed `(x * count_y + y) * count_z + z`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid3<T> {
    dims: [u32; 3],
    data: Vec<T>,
}

impl<T> Grid3<T> {
    /// Fills the grid cell by cell in index order.
    pub fn from_fn(count_x: u32, count_y: u32, count_z: u32, mut f: impl FnMut(u32, u32, u32) -> T) -> Self {
        let mut data = Vec::new();
        for x in 0..count_x {
            for y in 0..count_y {
                for z in 0..count_z {
                    data.push(f(x, y, z));
                }
            }
        }
        Self {
            dims: [count_x, count_y, count_z],
            data,
        }
    }

    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    pub fn index(&self, x: u32, y: u32, z: u32) -> Option<usize> {
        let [cx, cy, cz] = self.dims;
        if x >= cx || y >= cy || z >= cz {
            return None;
        }
        Some((x as usize * cy as usize + y as usize) * cz as usize + z as usize)
    }

    pub fn get(&self, x: u32, y: u32, z: u32) -> Option<&T> {
        self.data.get(self.index(x, y, z)?)
    }

    pub fn get_mut(&mut self, x: u32, y: u32, z: u32) -> Option<&mut T> {
        let index = self.index(x, y, z)?;
        self.data.get_mut(index)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// Aggregated statistics of a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResults {
    header: ResultsHeader,
    /// Per (x, z) placement, indexed `x * count_z + z`
    placements: Vec<PlacementParams>,
    rotations: Grid3<PlacementParams>,
}

impl BatchResults {
    fn from_records(header: ResultsHeader, records: &[PlacementParams]) -> FormatResult<Self> {
        if header.checked_total_renders() != Some(records.len()) {
            return Err(FormatError::Invalid(format!(
                "{} records for a {} x {} x {} grid",
                records.len(),
                header.count_x,
                header.count_y,
                header.count_z
            )));
        }

        let placements = records
            .chunks(header.count_y.max(1) as usize)
            .map(|rotations| {
                let mut placement = PlacementParams {
                    bad_area_percentage: rotations.first().map_or(0.0, |r| r.bad_area_percentage),
                    ..PlacementParams::default()
                };
                for r in rotations {
                    placement.av_pen_len += r.av_pen_len;
                    placement.av_dip_ang += r.av_dip_ang;
                    placement.max_pen_len = placement.max_pen_len.max(r.max_pen_len);
                }
                placement.av_pen_len /= rotations.len() as f32;
                placement.av_dip_ang /= rotations.len() as f32;
                placement
            })
            .collect();

        let rotations = Grid3::from_fn(header.count_x, header.count_y, header.count_z, |x, y, z| {
            records
                .get(header.render_index(x, y, z))
                .copied()
                .unwrap_or_default()
        });

        Ok(Self {
            header,
            placements,
            rotations,
        })
    }

    /// Rebuilds the aggregates from a results file.
    pub fn from_results_file<R: Read>(reader: &mut ResultsReader<R>) -> FormatResult<Self> {
        let mut records = Vec::new();
        while let Some(render) = reader.next_summary()? {
            records.push(PlacementParams::from_render(&render));
        }
        Self::from_records(reader.header().clone(), &records)
    }

    pub fn header(&self) -> &ResultsHeader {
        &self.header
    }

    pub fn placement(&self, x: u32, z: u32) -> Option<&PlacementParams> {
        if x >= self.header.count_x || z >= self.header.count_z {
            return None;
        }
        self.placements
            .get(x as usize * self.header.count_z as usize + z as usize)
    }

    pub fn placements(&self) -> &[PlacementParams] {
        &self.placements
    }

    pub fn rotations(&self) -> &Grid3<PlacementParams> {
        &self.rotations
    }

    /// Specimen rotation of placement (x, z) at the first scan angle.
    pub fn placement_rotation(&self, x: u32, z: u32) -> Vec3 {
        grid_rotation(&self.header, x, 0, z)
    }

    /// Best placement for `parameter`: lowest value, or highest for the dip
    /// cosine. The first placement in (x, z) order wins ties.
    pub fn optimal(&self, parameter: Parameter) -> Option<(u32, u32, PlacementParams)> {
        let higher = parameter.higher_is_better();
        let mut best: Option<(u32, u32, PlacementParams)> = None;
        for x in 0..self.header.count_x {
            for z in 0..self.header.count_z {
                let Some(&params) = self.placement(x, z) else {
                    continue;
                };
                let value = params.get(parameter);
                let better = match &best {
                    None => true,
                    Some((_, _, current)) if higher => value > current.get(parameter),
                    Some((_, _, current)) => value < current.get(parameter),
                };
                if better {
                    best = Some((x, z, params));
                }
            }
        }
        best
    }
}

/// Runs a full batch over `scene`, streaming every render to `out`.
///
/// The scene's plane distances are updated for `config.position` before the
/// first render. `cancel` is polled before each placement.
pub fn run_batch<W: Write>(
    scene: &mut Scene,
    settings: &Settings,
    config: &BatchConfig,
    out: W,
    cancel: &AtomicBool,
    diagnostics: &dyn Diagnostics,
) -> Result<BatchResults, BatchError> {
    config.validate()?;
    let header = config.header();
    let mut writer = ResultsWriter::new(out, &header, config.skip_additional_data())?;

    scene.recalculate_d(-config.position);
    let selection = if config.radon_mode == RadonMode::Off {
        Vec::new()
    } else {
        scene.find_selected_triangles(&config.cut_boxes)
    };
    let scene: &Scene = scene;

    let mut engine = Engine::new(settings)
        .with_scene(scene)
        .with_cut_boxes(config.cut_boxes.clone());
    engine.set_position(config.position);

    let (cx, cy, cz) = (header.count_x, header.count_y, header.count_z);
    let total = cx as usize * cz as usize;
    diagnostics.info(&format!(
        "Batch: {cx} x {cz} placements, {cy} rotations each, {:?}",
        config.radon_mode
    ));
    let start = Instant::now();

    let mut records = Vec::new();
    let mut done = 0;
    for x in 0..cx {
        for z in 0..cz {
            if cancel.load(Ordering::Relaxed) {
                diagnostics.warn(&format!("Batch cancelled after {done} of {total} placements"));
                return Err(BatchError::Cancelled);
            }

            let bad_area = if config.radon_mode == RadonMode::Off {
                0.0
            } else {
                engine.set_rotations(grid_rotation(&header, x, 0, z));
                engine.radon_space_analysis(&selection)?
            };

            for mut render in render_placement(&mut engine, config, &header, x, z)? {
                render.bad_area_percentage = bad_area;
                writer.write_render(&render)?;
                records.push(PlacementParams::from_render(&render));
            }

            done += 1;
            diagnostics.progress(done, total);
        }
    }

    writer.finish()?;
    diagnostics.info(&format!(
        "Batch finished: {} renders in {:.2?}",
        records.len(),
        start.elapsed()
    ));
    Ok(BatchResults::from_records(header, &records)?)
}

fn render_placement(
    engine: &mut Engine<'_>,
    config: &BatchConfig,
    header: &ResultsHeader,
    x: u32,
    z: u32,
) -> Result<Vec<RenderFromPosition>, BatchError> {
    let count_y = header.count_y;

    if config.radon_mode == RadonMode::Only {
        return Ok((0..count_y)
            .map(|y| RenderFromPosition::new(grid_rotation(header, x, y, z), config.position))
            .collect());
    }

    if config.save_additional_data {
        let mut renders = Vec::with_capacity(count_y as usize);
        for y in 0..count_y {
            engine.set_rotations(grid_rotation(header, x, y, z));
            let frame = engine.init_render();
            renders.push(engine.render(&frame, RenderOptions { remember_data: true })?);
        }
        return Ok(renders);
    }

    let items: Vec<BatchItem> = (0..count_y)
        .map(|y| {
            let rotation = grid_rotation(header, x, y, z);
            engine.set_rotations(rotation);
            BatchItem {
                rotation,
                frame: engine.init_render(),
            }
        })
        .collect();
    log::debug!("Placement ({x}, {z}): dispatching {} rotations", items.len());
    Ok(engine.render_batch(&items, RenderOptions::default())?)
}
