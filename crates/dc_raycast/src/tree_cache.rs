//! On-disk tree cache.
//!
//! Building a deep tree over a large mesh is slow, so a finished tree is saved
//! next to the mesh and reloaded on the next run. Layout (little-endian):
//!
//! ```text
//! i32 split_level
//! f32 x1 x2 y1 y2 z1 z2        root box
//! u32 node_count
//! node_count x { u32 internal1, u32 internal2, u32 flags }
//! u32 index_count
//! index_count x u32            triangle indices
//! ```
//!
//! For leaves `internal1`/`internal2` are `tri_start`/`tri_count`; for internal
//! nodes they are the child offset and the bit pattern of the split coordinate.

use std::fs;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use dc_math::{Aabb, Axis};
use thiserror::Error;

use crate::bsp::{BspNode, BspTree};

const FLAG_LEAF: u32 = 0x80;
const FLAG_HAS_LEFT: u32 = 0x40;
const FLAG_HAS_RIGHT: u32 = 0x20;
const AXIS_MASK: u32 = 0x03;

const NODE_RECORD_LEN: usize = std::mem::size_of::<NodeRecord>();

/// Errors from saving or loading a tree cache.
#[derive(Error, Debug)]
pub enum TreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tree cache truncated while reading {what}")]
    Truncated { what: &'static str },

    #[error("Invalid tree header: {0}")]
    InvalidHeader(String),

    #[error("Invalid tree node {index}: {reason}")]
    InvalidNode { index: usize, reason: String },

    #[error("Triangle index {index} out of range for {triangle_count} triangles")]
    InvalidIndex { index: u32, triangle_count: usize },

    #[error("Cached split level {found} does not match expected {expected}")]
    SplitLevelMismatch { expected: u32, found: u32 },
}

/// Node as stored on disk.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct NodeRecord {
    internal1: u32,
    internal2: u32,
    flags: u32,
}

impl NodeRecord {
    fn from_node(node: &BspNode) -> Self {
        match *node {
            BspNode::Leaf {
                tri_start,
                tri_count,
            } => Self {
                internal1: tri_start,
                internal2: tri_count,
                flags: FLAG_LEAF,
            },
            BspNode::Internal {
                axis,
                split,
                offset,
                has_left,
                has_right,
            } => {
                let mut flags = axis.index() as u32;
                if has_left {
                    flags |= FLAG_HAS_LEFT;
                }
                if has_right {
                    flags |= FLAG_HAS_RIGHT;
                }
                Self {
                    internal1: offset,
                    internal2: split.to_bits(),
                    flags,
                }
            }
        }
    }

    /// Swaps between native and little-endian field order (a no-op on LE hosts).
    fn le_order(self) -> Self {
        Self {
            internal1: self.internal1.to_le(),
            internal2: self.internal2.to_le(),
            flags: self.flags.to_le(),
        }
    }

    /// Decodes and checks the record at arena position `index`.
    fn to_node(self, index: usize, node_count: usize, index_count: usize) -> Result<BspNode, TreeError> {
        let invalid = |reason: String| TreeError::InvalidNode { index, reason };

        if self.flags & FLAG_LEAF != 0 {
            let end = self.internal1 as u64 + self.internal2 as u64;
            if end > index_count as u64 {
                return Err(invalid(format!(
                    "leaf range {}+{} exceeds {index_count} indices",
                    self.internal1, self.internal2
                )));
            }
            return Ok(BspNode::Leaf {
                tri_start: self.internal1,
                tri_count: self.internal2,
            });
        }

        let axis = Axis::from_index((self.flags & AXIS_MASK) as usize)
            .ok_or_else(|| invalid(format!("axis bits {}", self.flags & AXIS_MASK)))?;
        let has_left = self.flags & FLAG_HAS_LEFT != 0;
        let has_right = self.flags & FLAG_HAS_RIGHT != 0;
        if !has_left && !has_right {
            return Err(invalid("internal node without children".to_string()));
        }

        let offset = self.internal1 as u64;
        let children = [(has_left, offset), (has_right, offset + 1)];
        for (present, child) in children {
            if present && (child <= index as u64 || child >= node_count as u64) {
                return Err(invalid(format!("child index {child} out of order or range")));
            }
        }

        Ok(BspNode::Internal {
            axis,
            split: f32::from_bits(self.internal2),
            offset: self.internal1,
            has_left,
            has_right,
        })
    }
}

impl BspTree {
    /// Serializes the tree in the cache layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let nodes = self.nodes();
        let indices = self.tri_indices();
        let mut out = Vec::with_capacity(4 + 24 + 4 + nodes.len() * NODE_RECORD_LEN + 4 + indices.len() * 4);

        out.extend_from_slice(&(self.split_level() as i32).to_le_bytes());
        for v in self.bounds().to_array() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(nodes.len() as u32).to_le_bytes());
        for node in nodes {
            out.extend_from_slice(bytemuck::bytes_of(&NodeRecord::from_node(node).le_order()));
        }
        out.extend_from_slice(&(indices.len() as u32).to_le_bytes());
        for i in indices {
            out.extend_from_slice(&i.to_le_bytes());
        }
        out
    }

    /// Parses a cached tree for a scene with `triangle_count` triangles.
    pub fn from_bytes(bytes: &[u8], triangle_count: usize) -> Result<Self, TreeError> {
        let mut reader = ByteReader { bytes, pos: 0 };

        let split_level = reader.i32("split level")?;
        let split_level = u32::try_from(split_level)
            .map_err(|_| TreeError::InvalidHeader(format!("negative split level {split_level}")))?;

        let mut bounds = [0.0f32; 6];
        for b in &mut bounds {
            *b = f32::from_bits(reader.u32("root box")?);
        }

        let node_count = reader.u32("node count")? as usize;
        if node_count == 0 {
            return Err(TreeError::InvalidHeader("tree has no nodes".to_string()));
        }
        let node_bytes = reader.take(node_count.saturating_mul(NODE_RECORD_LEN), "nodes")?;
        let records: Vec<NodeRecord> = node_bytes
            .chunks_exact(NODE_RECORD_LEN)
            .map(|chunk| bytemuck::pod_read_unaligned::<NodeRecord>(chunk).le_order())
            .collect();

        let index_count = reader.u32("index count")? as usize;
        let index_bytes = reader.take(index_count.saturating_mul(4), "triangle indices")?;
        let tri_indices: Vec<u32> = index_bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le(bytemuck::pod_read_unaligned(chunk)))
            .collect();

        if reader.pos != bytes.len() {
            return Err(TreeError::InvalidHeader(format!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }

        if let Some(&index) = tri_indices.iter().find(|&&i| i as usize >= triangle_count) {
            return Err(TreeError::InvalidIndex {
                index,
                triangle_count,
            });
        }

        let nodes = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| record.to_node(i, node_count, index_count))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(BspTree::from_parts(split_level, Aabb::from_array(bounds), nodes, tri_indices))
    }

    /// Writes the tree to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TreeError> {
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    /// Reads a tree from `path`, checking it against `triangle_count`.
    pub fn load<P: AsRef<Path>>(path: P, triangle_count: usize) -> Result<Self, TreeError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes, triangle_count)
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], TreeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(TreeError::Truncated { what })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, TreeError> {
        let chunk = self.take(4, what)?;
        Ok(u32::from_le(bytemuck::pod_read_unaligned(chunk)))
    }

    fn i32(&mut self, what: &'static str) -> Result<i32, TreeError> {
        Ok(self.u32(what)? as i32)
    }
}
