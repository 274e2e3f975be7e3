//! Render records: per ray, per hit and per placement.

use std::io::{Read, Write};

use dc_math::Vec3;

use crate::binary::{read_f32, read_i32, read_u32, skip, write_f32, write_i32, write_u32};
use crate::results::{FormatError, FormatResult};

/// Serialized size of one [`RayPenetration`].
const RAY_RECORD_LEN: u64 = 20;
/// Serialized size of one [`Intersection`].
const INTERSECTION_RECORD_LEN: u64 = 8;
/// Upper bound on element counts accepted from a file before allocating.
const MAX_RECORD_COUNT: u32 = 1 << 26;

/// Result of one detector ray.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RayPenetration {
    /// Detector column
    pub x: i32,
    /// Detector row
    pub y: i32,
    /// Summed length of all in-material segments along the ray
    pub total_penetration_len: f32,
    /// Mean |cos| between ray and surface normal over the ray's hits
    pub av_dip_angle: f32,
    /// Number of entry/exit segment pairs
    pub penetrations: u32,
}

/// One surface crossing of a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub tri_index: u32,
    /// Signed cosine between ray direction and the triangle normal
    pub dip_cos: f32,
}

/// Statistics of one render, i.e. one specimen orientation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderFromPosition {
    /// Specimen rotation about X, Y, Z in radians
    pub rotation: Vec3,
    pub position: Vec3,
    pub av_penetration_len: f32,
    pub av_dip_angle: f32,
    pub max_penetration_len: f32,
    /// Fraction of surface area failing the Radon-space test
    pub bad_area_percentage: f32,
    pub rays: Vec<RayPenetration>,
    pub intersections: Vec<Intersection>,
}

impl RenderFromPosition {
    /// An empty record for the given placement.
    pub fn new(rotation: Vec3, position: Vec3) -> Self {
        Self {
            rotation,
            position,
            ..Default::default()
        }
    }

    /// Resets statistics and drops retained rays, keeping allocations.
    pub fn clear(&mut self) {
        self.rotation = Vec3::ZERO;
        self.position = Vec3::ZERO;
        self.av_penetration_len = 0.0;
        self.av_dip_angle = 0.0;
        self.max_penetration_len = 0.0;
        self.bad_area_percentage = 0.0;
        self.rays.clear();
        self.intersections.clear();
    }

    /// Writes the record; `skip_additional_data` writes zero ray and hit counts.
    pub fn write_to<W: Write>(&self, w: &mut W, skip_additional_data: bool) -> std::io::Result<()> {
        for v in self.rotation.to_array() {
            write_f32(w, v)?;
        }
        for v in self.position.to_array() {
            write_f32(w, v)?;
        }
        write_f32(w, self.av_penetration_len)?;
        write_f32(w, self.av_dip_angle)?;
        write_f32(w, self.max_penetration_len)?;
        write_f32(w, self.bad_area_percentage)?;

        if skip_additional_data {
            write_u32(w, 0)?;
            write_u32(w, 0)?;
            return Ok(());
        }

        write_u32(w, self.rays.len() as u32)?;
        for ray in &self.rays {
            write_i32(w, ray.x)?;
            write_i32(w, ray.y)?;
            write_f32(w, ray.total_penetration_len)?;
            write_f32(w, ray.av_dip_angle)?;
            write_u32(w, ray.penetrations)?;
        }
        write_u32(w, self.intersections.len() as u32)?;
        for isec in &self.intersections {
            write_i32(w, isec.tri_index as i32)?;
            write_f32(w, isec.dip_cos)?;
        }
        Ok(())
    }

    /// Reads a full record including rays and intersections.
    pub fn read_from<R: Read>(r: &mut R) -> FormatResult<Self> {
        let mut render = Self::read_stats(r)?;

        let ray_count = read_count(r, "ray count")?;
        render.rays.reserve(ray_count as usize);
        for _ in 0..ray_count {
            render.rays.push(RayPenetration {
                x: read_i32(r, "ray x")?,
                y: read_i32(r, "ray y")?,
                total_penetration_len: read_f32(r, "ray penetration")?,
                av_dip_angle: read_f32(r, "ray dip angle")?,
                penetrations: read_u32(r, "ray segment count")?,
            });
        }

        let isec_count = read_count(r, "intersection count")?;
        render.intersections.reserve(isec_count as usize);
        for _ in 0..isec_count {
            let tri_index = read_i32(r, "intersection triangle")?;
            let tri_index = u32::try_from(tri_index).map_err(|_| {
                FormatError::Invalid(format!("negative triangle index {tri_index}"))
            })?;
            render.intersections.push(Intersection {
                tri_index,
                dip_cos: read_f32(r, "intersection cosine")?,
            });
        }
        Ok(render)
    }

    /// Reads only the fixed statistics and skips over rays and intersections.
    pub fn read_summary<R: Read>(r: &mut R) -> FormatResult<Self> {
        let render = Self::read_stats(r)?;
        let rays = read_u32(r, "ray count")? as u64;
        skip(r, rays * RAY_RECORD_LEN, "rays")?;
        let intersections = read_u32(r, "intersection count")? as u64;
        skip(r, intersections * INTERSECTION_RECORD_LEN, "intersections")?;
        Ok(render)
    }

    fn read_stats<R: Read>(r: &mut R) -> FormatResult<Self> {
        let rotation = Vec3::new(
            read_f32(r, "rotation x")?,
            read_f32(r, "rotation y")?,
            read_f32(r, "rotation z")?,
        );
        let position = Vec3::new(
            read_f32(r, "position x")?,
            read_f32(r, "position y")?,
            read_f32(r, "position z")?,
        );
        Ok(Self {
            rotation,
            position,
            av_penetration_len: read_f32(r, "average penetration")?,
            av_dip_angle: read_f32(r, "average dip angle")?,
            max_penetration_len: read_f32(r, "max penetration")?,
            bad_area_percentage: read_f32(r, "bad area")?,
            rays: Vec::new(),
            intersections: Vec::new(),
        })
    }
}

fn read_count<R: Read>(r: &mut R, field: &'static str) -> FormatResult<u32> {
    let count = read_u32(r, field)?;
    if count > MAX_RECORD_COUNT {
        return Err(FormatError::Invalid(format!("{field} {count} is implausibly large")));
    }
    Ok(count)
}

/// Statistic selectable for plots and optimal-placement searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    AvPenetrationLen,
    AvDipAngle,
    MaxPenetrationLen,
    BadAreaPercentage,
}

impl Parameter {
    /// Whether larger values of this statistic are better.
    pub fn higher_is_better(self) -> bool {
        matches!(self, Parameter::AvDipAngle)
    }
}

/// Aggregated statistics of one placement or one rotation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlacementParams {
    pub av_pen_len: f32,
    pub av_dip_ang: f32,
    pub max_pen_len: f32,
    pub bad_area_percentage: f32,
}

impl PlacementParams {
    pub fn from_render(render: &RenderFromPosition) -> Self {
        Self {
            av_pen_len: render.av_penetration_len,
            av_dip_ang: render.av_dip_angle,
            max_pen_len: render.max_penetration_len,
            bad_area_percentage: render.bad_area_percentage,
        }
    }

    pub fn get(&self, parameter: Parameter) -> f32 {
        match parameter {
            Parameter::AvPenetrationLen => self.av_pen_len,
            Parameter::AvDipAngle => self.av_dip_ang,
            Parameter::MaxPenetrationLen => self.max_pen_len,
            Parameter::BadAreaPercentage => self.bad_area_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_render() -> RenderFromPosition {
        let mut render = RenderFromPosition::new(Vec3::new(0.1, 0.2, 0.3), Vec3::new(1.0, 2.0, 3.0));
        render.av_penetration_len = 4.5;
        render.av_dip_angle = 0.75;
        render.max_penetration_len = 9.0;
        render.bad_area_percentage = 0.25;
        render.rays.push(RayPenetration {
            x: 3,
            y: 7,
            total_penetration_len: 4.5,
            av_dip_angle: 0.75,
            penetrations: 1,
        });
        render.intersections.push(Intersection { tri_index: 11, dip_cos: -0.75 });
        render.intersections.push(Intersection { tri_index: 12, dip_cos: 0.75 });
        render
    }

    #[test]
    fn test_full_record_layout() {
        let render = sample_render();
        let mut bytes = Vec::new();
        render.write_to(&mut bytes, false).unwrap();
        // 10 floats + count + one ray + count + two intersections
        assert_eq!(bytes.len(), 40 + 4 + 20 + 4 + 16);
        assert_eq!(&bytes[40..44], &1u32.to_le_bytes());

        let read = RenderFromPosition::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, render);
    }

    #[test]
    fn test_skip_mode_writes_zero_counts() {
        let mut bytes = Vec::new();
        sample_render().write_to(&mut bytes, true).unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[40..48], &[0u8; 8]);

        let read = RenderFromPosition::read_from(&mut Cursor::new(bytes)).unwrap();
        assert!(read.rays.is_empty());
        assert!((read.bad_area_percentage - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_read_summary_skips_details() {
        let mut bytes = Vec::new();
        sample_render().write_to(&mut bytes, false).unwrap();
        sample_render().write_to(&mut bytes, true).unwrap();

        let mut cursor = Cursor::new(bytes);
        let first = RenderFromPosition::read_summary(&mut cursor).unwrap();
        assert!(first.rays.is_empty());
        assert!((first.max_penetration_len - 9.0).abs() < 1e-6);
        // The cursor must land on the second record.
        let second = RenderFromPosition::read_from(&mut cursor).unwrap();
        assert!((second.av_dip_angle - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_truncated_record_names_field() {
        let mut bytes = Vec::new();
        sample_render().write_to(&mut bytes, false).unwrap();
        bytes.truncate(50);
        match RenderFromPosition::read_from(&mut Cursor::new(bytes)) {
            Err(FormatError::Truncated { field }) => assert_eq!(field, "ray y"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_placement_params_get() {
        let params = PlacementParams::from_render(&sample_render());
        assert_eq!(params.get(Parameter::MaxPenetrationLen), 9.0);
        assert!(Parameter::AvDipAngle.higher_is_better());
        assert!(!Parameter::AvPenetrationLen.higher_is_better());
    }
}
