//! STL specimen loading.
//!
//! Supports both STL flavours:
//! - binary: 80-byte header, `u32` facet count, 50-byte facet records
//! - ASCII: `solid ... facet normal ... outer loop / vertex x y z ... endsolid`
//!
//! Stored facet normals are ignored; the scene derives its own from the winding.
//! Identical vertices are merged into one shared pool.

use std::collections::HashMap;
use std::path::Path;

use dc_math::Vec3;
use thiserror::Error;

use crate::mesh::Mesh;

/// Bounding-box padding, in model units before scaling.
const BOUNDS_PADDING: f32 = 0.15;

const BINARY_HEADER_LEN: usize = 80;
const BINARY_FACET_LEN: usize = 50;

/// Errors that can occur during STL loading.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed ASCII STL at facet {facet}: {reason}")]
    Malformed { facet: usize, reason: String },

    #[error("Truncated binary STL: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("No triangles found in STL data")]
    NoGeometry,
}

/// Result type for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Load an STL file, centre it on the origin and apply `scale`.
///
/// # Example
///
/// ```ignore
/// use dc_core::load_stl;
///
/// let mesh = load_stl("specimen.stl", 1.0)?;
/// println!("{} triangles", mesh.triangle_count());
/// ```
pub fn load_stl<P: AsRef<Path>>(path: P, scale: f32) -> LoadResult<Mesh> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let mut mesh = parse_stl(&bytes)?;
    mesh.center_and_scale(scale, BOUNDS_PADDING / scale);
    log::info!(
        "Loaded {}: {} triangles, {} vertices",
        path.display(),
        mesh.triangle_count(),
        mesh.vertex_count()
    );
    Ok(mesh)
}

/// Parse STL bytes without any placement normalization.
pub fn parse_stl(bytes: &[u8]) -> LoadResult<Mesh> {
    let mesh = if is_binary(bytes) {
        parse_binary(bytes)?
    } else if bytes.trim_ascii_start().starts_with(b"solid") {
        parse_ascii(&String::from_utf8_lossy(bytes))?
    } else if bytes.len() >= BINARY_HEADER_LEN + 4 {
        // Not text, and the facet count disagrees with the size.
        return Err(LoadError::Truncated {
            expected: binary_len(facet_count(bytes)),
            actual: bytes.len(),
        });
    } else {
        return Err(LoadError::NoGeometry);
    };

    if mesh.triangle_count() == 0 {
        return Err(LoadError::NoGeometry);
    }
    Ok(mesh)
}

fn facet_count(bytes: &[u8]) -> usize {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[BINARY_HEADER_LEN..BINARY_HEADER_LEN + 4]);
    u32::from_le_bytes(word) as usize
}

fn binary_len(facets: usize) -> usize {
    BINARY_HEADER_LEN + 4 + facets * BINARY_FACET_LEN
}

/// Binary files are recognised by size: ASCII exporters also write `solid`
/// into binary headers, so the keyword alone proves nothing.
fn is_binary(bytes: &[u8]) -> bool {
    bytes.len() >= BINARY_HEADER_LEN + 4 && binary_len(facet_count(bytes)) == bytes.len()
}

fn parse_binary(bytes: &[u8]) -> LoadResult<Mesh> {
    let count = facet_count(bytes);
    let mut builder = MeshBuilder::with_capacity(count);

    for record in bytes[BINARY_HEADER_LEN + 4..].chunks_exact(BINARY_FACET_LEN) {
        // 12 bytes of stored normal, then three vertices, then 2 attribute bytes.
        let mut corners = [Vec3::ZERO; 3];
        for (c, corner) in corners.iter_mut().enumerate() {
            let base = 12 + c * 12;
            *corner = Vec3::new(
                read_f32(&record[base..]),
                read_f32(&record[base + 4..]),
                read_f32(&record[base + 8..]),
            );
        }
        builder.push_triangle(corners);
    }

    Ok(builder.finish())
}

fn read_f32(bytes: &[u8]) -> f32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    f32::from_le_bytes(word)
}

fn parse_ascii(text: &str) -> LoadResult<Mesh> {
    let mut builder = MeshBuilder::with_capacity(0);
    let mut corners = Vec::with_capacity(3);
    let mut facet = 0;
    let mut tokens = text.split_whitespace();

    while let Some(token) = tokens.next() {
        match token {
            "vertex" => {
                let mut coords = [0.0f32; 3];
                for coord in &mut coords {
                    let raw = tokens.next().ok_or_else(|| LoadError::Malformed {
                        facet,
                        reason: "vertex with fewer than 3 coordinates".into(),
                    })?;
                    *coord = raw.parse().map_err(|_| LoadError::Malformed {
                        facet,
                        reason: format!("invalid coordinate '{raw}'"),
                    })?;
                }
                corners.push(Vec3::from_array(coords));
            }
            "endloop" => {
                if corners.len() != 3 {
                    return Err(LoadError::Malformed {
                        facet,
                        reason: format!("loop has {} vertices", corners.len()),
                    });
                }
                builder.push_triangle([corners[0], corners[1], corners[2]]);
                corners.clear();
                facet += 1;
            }
            _ => {}
        }
    }

    Ok(builder.finish())
}

/// Accumulates triangles while merging bit-identical vertices.
struct MeshBuilder {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
    lookup: HashMap<[u32; 3], u32>,
}

impl MeshBuilder {
    fn with_capacity(triangles: usize) -> Self {
        Self {
            positions: Vec::with_capacity(triangles),
            indices: Vec::with_capacity(triangles * 3),
            lookup: HashMap::with_capacity(triangles),
        }
    }

    fn push_triangle(&mut self, corners: [Vec3; 3]) {
        for corner in corners {
            let key = corner.to_array().map(f32::to_bits);
            let next = self.positions.len() as u32;
            let index = *self.lookup.entry(key).or_insert(next);
            if index == next {
                self.positions.push(corner);
            }
            self.indices.push(index);
        }
    }

    fn finish(self) -> Mesh {
        Mesh::new(self.positions, self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TETRA_ASCII: &str = "solid tetra
  facet normal 0 0 -1
    outer loop
      vertex 0 0 0
      vertex 0 1 0
      vertex 1 0 0
    endloop
  endfacet
  facet normal 0 -1 0
    outer loop
      vertex 0 0 0
      vertex 1 0 0
      vertex 0 0 1
    endloop
  endfacet
  facet normal -1 0 0
    outer loop
      vertex 0 0 0
      vertex 0 0 1
      vertex 0 1 0
    endloop
  endfacet
  facet normal 1 1 1
    outer loop
      vertex 1 0 0
      vertex 0 1 0
      vertex 0 0 1
    endloop
  endfacet
endsolid tetra
";

    fn binary_stl(triangles: &[[Vec3; 3]]) -> Vec<u8> {
        let mut bytes = vec![0u8; BINARY_HEADER_LEN];
        bytes[..5].copy_from_slice(b"solid");
        bytes.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
        for tri in triangles {
            bytes.extend_from_slice(&[0u8; 12]);
            for v in tri {
                for c in v.to_array() {
                    bytes.extend_from_slice(&c.to_le_bytes());
                }
            }
            bytes.extend_from_slice(&[0u8; 2]);
        }
        bytes
    }

    #[test]
    fn test_parse_ascii_merges_vertices() {
        let mesh = parse_stl(TETRA_ASCII.as_bytes()).unwrap();
        assert_eq!(mesh.triangle_count(), 4);
        assert_eq!(mesh.vertex_count(), 4);
        assert!(mesh.validate());
    }

    #[test]
    fn test_parse_binary_with_solid_header() {
        let tri = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let bytes = binary_stl(&[tri, [Vec3::X, Vec3::Y, Vec3::Z]]);
        let mesh = parse_stl(&bytes).unwrap();

        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.triangle(0).unwrap(), tri);
    }

    #[test]
    fn test_truncated_binary() {
        let mut bytes = binary_stl(&[[Vec3::ZERO, Vec3::X, Vec3::Y]]);
        bytes[0] = b'x';
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(parse_stl(&bytes), Err(LoadError::Truncated { .. })));
    }

    #[test]
    fn test_malformed_ascii_vertex() {
        let text = "solid bad\nfacet normal 0 0 1\nouter loop\nvertex 0 0 zero\nendloop\nendfacet\nendsolid";
        assert!(matches!(
            parse_stl(text.as_bytes()),
            Err(LoadError::Malformed { facet: 0, .. })
        ));
    }

    #[test]
    fn test_empty_solid_has_no_geometry() {
        assert!(matches!(
            parse_stl(b"solid empty\nendsolid empty\n"),
            Err(LoadError::NoGeometry)
        ));
    }

    #[test]
    fn test_load_stl_centers_and_pads() {
        let path = std::env::temp_dir().join(format!("dc_core_tetra_{}.stl", std::process::id()));
        std::fs::write(&path, TETRA_ASCII).unwrap();
        let mesh = load_stl(&path, 1.0).unwrap();
        std::fs::remove_file(&path).ok();

        // Unit tetrahedron spans [0,1] on every axis before centering.
        assert!((mesh.bounds.x.min - (-0.5 - BOUNDS_PADDING)).abs() < 0.001);
        assert!((mesh.bounds.z.max - (0.5 + BOUNDS_PADDING)).abs() < 0.001);
    }
}
