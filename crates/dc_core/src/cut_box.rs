//! Area-of-interest boxes.
//!
//! Cut boxes restrict penetration statistics to part of the specimen: when at
//! least one usable box exists, only rays passing through a box are traced and
//! only triangles lying wholly inside a box take part in the bad-area analysis.
//! Boxes are given in specimen coordinates.

use std::io::{Read, Write};

use dc_math::{Aabb, Ray, Vec3};

use crate::binary::{read_f32, read_i32, write_f32, write_i32};
use crate::results::FormatResult;

/// One area-of-interest box.
///
/// `slider_values` are the editor positions the box was built from. They carry
/// no meaning for the engine but are preserved in results files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutAab {
    pub aabb: Aabb,
    pub slider_values: [i32; 6],
}

impl CutAab {
    pub fn new(aabb: Aabb) -> Self {
        Self {
            aabb,
            slider_values: [0; 6],
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for v in self.aabb.to_array() {
            write_f32(w, v)?;
        }
        for v in self.slider_values {
            write_i32(w, v)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> FormatResult<Self> {
        let mut bounds = [0.0f32; 6];
        for b in &mut bounds {
            *b = read_f32(r, "cut box bounds")?;
        }
        let mut slider_values = [0i32; 6];
        for s in &mut slider_values {
            *s = read_i32(r, "cut box sliders")?;
        }
        Ok(Self {
            aabb: Aabb::from_array(bounds),
            slider_values,
        })
    }
}

/// The set of area-of-interest boxes active for a render or batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CutBoxList {
    boxes: Vec<CutAab>,
}

impl CutBoxList {
    pub fn new(boxes: Vec<CutAab>) -> Self {
        Self { boxes }
    }

    pub fn push(&mut self, cut: CutAab) {
        self.boxes.push(cut);
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CutAab> {
        self.boxes.iter()
    }

    /// Boxes with a positive volume; flat or inverted boxes never filter.
    pub fn active(&self) -> impl Iterator<Item = &Aabb> {
        self.boxes
            .iter()
            .map(|c| &c.aabb)
            .filter(|b| !b.is_degenerate())
    }

    /// True when at least one box restricts the area of interest.
    pub fn is_filtering(&self) -> bool {
        self.active().next().is_some()
    }

    /// Whether a ray should be traced: it must cross at least one active box,
    /// or there must be no active box at all.
    pub fn ray_passes(&self, ray: &Ray) -> bool {
        !self.is_filtering() || self.active().any(|b| b.intersect_ray(ray).is_some())
    }

    /// Whether every vertex of a triangle lies inside one active box.
    pub fn contains_triangle(&self, vertices: &[Vec3; 3]) -> bool {
        self.active()
            .any(|b| vertices.iter().all(|v| b.contains_point(*v)))
    }

    /// Indices of the triangles in the area of interest.
    ///
    /// With no active box every triangle is selected.
    pub fn select_triangles<I>(&self, triangles: I) -> Vec<u32>
    where
        I: IntoIterator<Item = [Vec3; 3]>,
    {
        let filtering = self.is_filtering();
        triangles
            .into_iter()
            .enumerate()
            .filter(|(_, tri)| !filtering || self.contains_triangle(tri))
            .map(|(i, _)| i as u32)
            .collect()
    }
}

impl FromIterator<CutAab> for CutBoxList {
    fn from_iter<T: IntoIterator<Item = CutAab>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn triangles() -> Vec<[Vec3; 3]> {
        vec![
            [Vec3::ZERO, Vec3::X, Vec3::Y],
            [Vec3::new(5.0, 5.0, 5.0), Vec3::new(6.0, 5.0, 5.0), Vec3::new(5.0, 6.0, 5.0)],
            // straddles the first box
            [Vec3::new(0.5, 0.5, 0.0), Vec3::new(3.0, 0.5, 0.0), Vec3::new(0.5, 1.0, 0.0)],
        ]
    }

    #[test]
    fn test_no_boxes_selects_everything() {
        let list = CutBoxList::default();
        assert_eq!(list.select_triangles(triangles()), vec![0, 1, 2]);
    }

    #[test]
    fn test_degenerate_boxes_select_everything() {
        let list: CutBoxList = [CutAab::new(Aabb::from_bounds(0.0, 0.0, 0.0, 1.0, 0.0, 1.0))]
            .into_iter()
            .collect();
        assert!(!list.is_filtering());
        assert_eq!(list.select_triangles(triangles()), vec![0, 1, 2]);
    }

    #[test]
    fn test_enclosing_box_selects_everything() {
        let list: CutBoxList = [CutAab::new(Aabb::from_bounds(-1.0, 10.0, -1.0, 10.0, -1.0, 10.0))]
            .into_iter()
            .collect();
        assert_eq!(list.select_triangles(triangles()), vec![0, 1, 2]);
    }

    #[test]
    fn test_partial_selection_requires_all_vertices() {
        let list: CutBoxList = [
            CutAab::new(Aabb::from_bounds(-0.5, 1.5, -0.5, 1.5, -0.5, 0.5)),
            CutAab::new(Aabb::from_bounds(4.0, 7.0, 4.0, 7.0, 4.0, 7.0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(list.select_triangles(triangles()), vec![0, 1]);
    }

    #[test]
    fn test_ray_passes() {
        let list: CutBoxList = [CutAab::new(Aabb::from_bounds(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0))]
            .into_iter()
            .collect();
        assert!(list.ray_passes(&Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z)));
        assert!(!list.ray_passes(&Ray::new(Vec3::new(3.0, 0.0, -5.0), Vec3::Z)));
        assert!(CutBoxList::default().ray_passes(&Ray::new(Vec3::new(3.0, 0.0, -5.0), Vec3::Z)));
    }

    #[test]
    fn test_cut_box_binary_layout() {
        let cut = CutAab {
            aabb: Aabb::from_bounds(1.0, 2.0, 3.0, 4.0, 5.0, 6.0),
            slider_values: [10, 20, 30, 40, 50, 60],
        };
        let mut bytes = Vec::new();
        cut.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(&bytes[4..8], &2.0f32.to_le_bytes());
        assert_eq!(&bytes[24..28], &10i32.to_le_bytes());

        let read = CutAab::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(read, cut);
    }
}
