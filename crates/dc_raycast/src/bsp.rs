//! Binary space partitioning tree over the specimen triangles.
//!
//! Nodes live in one flat arena (`Vec<BspNode>`, root at index 0). An internal
//! node stores a single `offset`: its left child sits at `offset` and its right
//! child at `offset + 1`. Empty children are never created, and when only the
//! right child survives the offset is shifted down by one so that
//! `offset + 1` still addresses it.
//!
//! Unlike a BVH, a triangle overlapping the split plane is referenced from
//! both sides, so a ray may report the same triangle from several leaves.

use dc_core::Settings;
use dc_math::{Aabb, Axis, Interval, Ray};
use rayon::prelude::*;

use crate::triangle::TriPrim;

/// Per-triangle search bound used during traversal.
pub const TRACE_MAX_DISTANCE: f32 = 1_000_000.0;

/// Constant term of the SAH cost.
const SAH_TRAVERSAL_COST: f32 = 0.5;

/// One node of the tree arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BspNode {
    /// Range `tri_start..tri_start + tri_count` of the tree's triangle indices.
    Leaf { tri_start: u32, tri_count: u32 },
    Internal {
        axis: Axis,
        split: f32,
        offset: u32,
        has_left: bool,
        has_right: bool,
    },
}

impl BspNode {
    pub const EMPTY_LEAF: BspNode = BspNode::Leaf {
        tri_start: 0,
        tri_count: 0,
    };

    pub fn is_leaf(&self) -> bool {
        matches!(self, BspNode::Leaf { .. })
    }

    /// Arena index of the left child, if present.
    pub fn left(&self) -> Option<u32> {
        match *self {
            BspNode::Internal {
                offset,
                has_left: true,
                ..
            } => Some(offset),
            _ => None,
        }
    }

    /// Arena index of the right child, if present.
    pub fn right(&self) -> Option<u32> {
        match *self {
            BspNode::Internal {
                offset,
                has_right: true,
                ..
            } => Some(offset + 1),
            _ => None,
        }
    }
}

/// How a node picks its split plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Midpoint of the node's longest axis.
    Median,
    /// Surface area heuristic over triangle bounds. `max_candidates` caps the
    /// number of planes evaluated per node by striding over the candidate list.
    Sah { max_candidates: Option<usize> },
}

impl SplitPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        if settings.use_sah {
            SplitPolicy::Sah {
                max_candidates: settings.sah_max_candidates,
            }
        } else {
            SplitPolicy::Median
        }
    }
}

/// A ray/triangle hit found during traversal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriHit {
    pub tri_index: u32,
    pub dist: f32,
}

#[derive(Debug, Clone, Copy)]
struct TraceEntry {
    node: u32,
    tmin: f32,
    tmax: f32,
}

/// Reusable traversal stack. One per worker thread.
#[derive(Debug, Default)]
pub struct TraversalStack {
    entries: Vec<TraceEntry>,
}

impl TraversalStack {
    pub fn new(split_level: u32) -> Self {
        Self {
            entries: Vec::with_capacity(split_level as usize + 2),
        }
    }

    fn push(&mut self, node: u32, tmin: f32, tmax: f32) {
        self.entries.push(TraceEntry { node, tmin, tmax });
    }

    fn pop(&mut self) -> Option<TraceEntry> {
        self.entries.pop()
    }
}

/// The partition tree.
#[derive(Debug, Clone, PartialEq)]
pub struct BspTree {
    nodes: Vec<BspNode>,
    tri_indices: Vec<u32>,
    bounds: Aabb,
    split_level: u32,
}

impl BspTree {
    /// A tree holding only an empty root leaf.
    pub fn build(split_level: u32, bounds: Aabb) -> Self {
        Self {
            nodes: vec![BspNode::EMPTY_LEAF],
            tri_indices: Vec::new(),
            bounds,
            split_level,
        }
    }

    /// Assembles a tree from already validated parts.
    pub(crate) fn from_parts(
        split_level: u32,
        bounds: Aabb,
        nodes: Vec<BspNode>,
        tri_indices: Vec<u32>,
    ) -> Self {
        Self {
            nodes,
            tri_indices,
            bounds,
            split_level,
        }
    }

    pub fn nodes(&self) -> &[BspNode] {
        &self.nodes
    }

    pub fn tri_indices(&self) -> &[u32] {
        &self.tri_indices
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn split_level(&self) -> u32 {
        self.split_level
    }

    /// Distributes `triangles` over the tree, replacing any previous content.
    ///
    /// `triangles[i]` must be the primitive with mesh index `i`.
    pub fn fill(&mut self, triangles: &[TriPrim], policy: SplitPolicy, min_tri_per_node: usize) {
        let mut builder = TreeBuilder {
            triangles,
            policy,
            min_tri_per_node,
            split_level: self.split_level,
            nodes: vec![BspNode::EMPTY_LEAF],
            tri_indices: Vec::new(),
        };
        let members = (0..triangles.len() as u32).collect();
        builder.distribute(0, self.bounds, members, 0);

        self.nodes = builder.nodes;
        self.tri_indices = builder.tri_indices;
        log::debug!(
            "Filled tree: {} nodes, {} triangle references ({:?})",
            self.nodes.len(),
            self.tri_indices.len(),
            policy
        );
    }

    /// Triangle index ranges of all leaves, in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = &[u32]> + '_ {
        self.nodes.iter().filter_map(move |node| match *node {
            BspNode::Leaf {
                tri_start,
                tri_count,
            } => {
                let start = tri_start as usize;
                self.tri_indices.get(start..start + tri_count as usize)
            }
            BspNode::Internal { .. } => None,
        })
    }

    /// Collects every triangle hit along `ray` into `hits`.
    ///
    /// Hits come out in traversal order and may contain the same triangle more
    /// than once. Returns false when the ray misses the root box.
    pub fn intersections(
        &self,
        ray: &Ray,
        triangles: &[TriPrim],
        stack: &mut TraversalStack,
        hits: &mut Vec<TriHit>,
    ) -> bool {
        hits.clear();
        stack.entries.clear();

        let Some(root) = self.bounds.intersect_ray(ray) else {
            return false;
        };
        stack.push(0, root.min, root.max);

        while let Some(entry) = stack.pop() {
            let Some(node) = self.nodes.get(entry.node as usize) else {
                continue;
            };
            match *node {
                BspNode::Leaf {
                    tri_start,
                    tri_count,
                } => {
                    let start = tri_start as usize;
                    let Some(indices) = self.tri_indices.get(start..start + tri_count as usize)
                    else {
                        continue;
                    };
                    for &tri_index in indices {
                        let Some(tri) = triangles.get(tri_index as usize) else {
                            continue;
                        };
                        let mut dist = TRACE_MAX_DISTANCE;
                        if tri.intersect(ray, &mut dist).is_hit() {
                            hits.push(TriHit { tri_index, dist });
                        }
                    }
                }
                BspNode::Internal { axis, split, .. } => {
                    let mut rd = ray.direction[axis.index()];
                    if rd == 0.0 {
                        rd = 1e-8;
                    }
                    let t = (split - ray.origin[axis.index()]) / rd;
                    let (near, far) = if rd >= 0.0 {
                        (node.left(), node.right())
                    } else {
                        (node.right(), node.left())
                    };

                    if t < entry.tmin {
                        if let Some(far) = far {
                            stack.push(far, entry.tmin, entry.tmax);
                        }
                    } else if t > entry.tmax {
                        if let Some(near) = near {
                            stack.push(near, entry.tmin, entry.tmax);
                        }
                    } else {
                        if let Some(far) = far {
                            stack.push(far, t, entry.tmax);
                        }
                        if let Some(near) = near {
                            stack.push(near, entry.tmin, t);
                        }
                    }
                }
            }
        }
        true
    }
}

struct TreeBuilder<'a> {
    triangles: &'a [TriPrim],
    policy: SplitPolicy,
    min_tri_per_node: usize,
    split_level: u32,
    nodes: Vec<BspNode>,
    tri_indices: Vec<u32>,
}

impl TreeBuilder<'_> {
    fn distribute(&mut self, node: usize, bounds: Aabb, members: Vec<u32>, level: u32) {
        if level >= self.split_level || members.len() <= self.min_tri_per_node {
            self.make_leaf(node, &members);
            return;
        }

        let split = match self.policy {
            SplitPolicy::Median => {
                let axis = bounds.main_axis();
                Some((axis, bounds.axis_interval(axis).center()))
            }
            SplitPolicy::Sah { max_candidates } => self.best_sah_split(bounds, &members, max_candidates),
        };
        let Some((axis, coordinate)) = split else {
            self.make_leaf(node, &members);
            return;
        };

        let (left_box, right_box) = bounds.split(axis, coordinate);
        let left = self.overlapping(&members, &left_box);
        let right = self.overlapping(&members, &right_box);
        if left.is_empty() && right.is_empty() {
            self.make_leaf(node, &members);
            return;
        }
        drop(members);

        let has_left = !left.is_empty();
        let has_right = !right.is_empty();
        let first_child = self.nodes.len();
        let offset = if has_left { first_child } else { first_child - 1 };
        if has_left {
            self.nodes.push(BspNode::EMPTY_LEAF);
        }
        if has_right {
            self.nodes.push(BspNode::EMPTY_LEAF);
        }
        self.nodes[node] = BspNode::Internal {
            axis,
            split: coordinate,
            offset: offset as u32,
            has_left,
            has_right,
        };

        if has_left {
            self.distribute(offset, left_box, left, level + 1);
        }
        if has_right {
            self.distribute(offset + 1, right_box, right, level + 1);
        }
    }

    fn make_leaf(&mut self, node: usize, members: &[u32]) {
        let tri_start = self.tri_indices.len() as u32;
        self.tri_indices.extend_from_slice(members);
        self.nodes[node] = BspNode::Leaf {
            tri_start,
            tri_count: members.len() as u32,
        };
    }

    fn overlapping(&self, members: &[u32], bounds: &Aabb) -> Vec<u32> {
        let (center, half) = (bounds.center(), bounds.half_size());
        members
            .iter()
            .copied()
            .filter(|&i| {
                self.triangles
                    .get(i as usize)
                    .is_some_and(|t| t.intersects_box(center, half))
            })
            .collect()
    }

    fn count_overlapping(&self, members: &[u32], bounds: &Aabb) -> usize {
        let (center, half) = (bounds.center(), bounds.half_size());
        members
            .iter()
            .filter(|&&i| {
                self.triangles
                    .get(i as usize)
                    .is_some_and(|t| t.intersects_box(center, half))
            })
            .count()
    }

    /// Cheapest SAH plane, or `None` when no triangle bound lies strictly
    /// inside the node.
    fn best_sah_split(
        &self,
        bounds: Aabb,
        members: &[u32],
        max_candidates: Option<usize>,
    ) -> Option<(Axis, f32)> {
        let mut candidates = Vec::with_capacity(members.len() * 6);
        for &i in members {
            let Some(tri) = self.triangles.get(i as usize) else {
                continue;
            };
            let tri_bounds = tri.bounds();
            for axis in Axis::ALL {
                let extent = tri_bounds.axis_interval(axis);
                let node_extent: Interval = bounds.axis_interval(axis);
                for coordinate in [extent.min, extent.max] {
                    if node_extent.surrounds(coordinate) {
                        candidates.push((axis, coordinate));
                    }
                }
            }
        }

        let stride = match max_candidates {
            Some(cap) if cap > 0 && candidates.len() > cap => candidates.len().div_ceil(cap),
            _ => 1,
        };

        candidates
            .par_iter()
            .enumerate()
            .step_by(stride)
            .map(|(index, &(axis, coordinate))| {
                let (left, right) = bounds.split(axis, coordinate);
                let left_count = self.count_overlapping(members, &left) as f32;
                let right_count = self.count_overlapping(members, &right) as f32;
                let cost = SAH_TRAVERSAL_COST
                    + left.surface_area() * left_count
                    + right.surface_area() * right_count;
                (cost, index, axis, coordinate)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
            .map(|(_, _, axis, coordinate)| (axis, coordinate))
    }
}
