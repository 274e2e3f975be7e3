//! Raycasting scene: specimen triangles plus their partition tree.

use std::path::{Path, PathBuf};
use std::time::Instant;

use dc_core::{CutBoxList, Diagnostics, Mesh, Settings, SettingsError};
use dc_math::{Aabb, Vec3};
use rayon::prelude::*;
use thiserror::Error;

use crate::bsp::{BspTree, SplitPolicy};
use crate::tree_cache::TreeError;
use crate::triangle::TriPrim;

/// Extension appended to the mesh path for the tree cache file.
const CACHE_EXTENSION: &str = "kdtree";

/// Errors that prevent a scene from being built.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("Mesh contains no triangles")]
    NoTriangles,

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),
}

/// Triangles of one specimen and the tree over them.
///
/// `triangles()[i]` is mesh triangle `i`.
#[derive(Debug, Clone)]
pub struct Scene {
    triangles: Vec<TriPrim>,
    tree: BspTree,
}

impl Scene {
    /// Builds the scene for `mesh`.
    ///
    /// When `cache` is given the tree is loaded from it if possible; a missing,
    /// corrupt or mismatching cache is rebuilt and written back. Cache problems
    /// are reported through `diagnostics` and never fail the build.
    pub fn init(
        mesh: &Mesh,
        settings: &Settings,
        cache: Option<&Path>,
        diagnostics: &dyn Diagnostics,
    ) -> Result<Self, SceneError> {
        settings.validate()?;
        if !mesh.validate() {
            return Err(SceneError::InvalidMesh(format!(
                "{} indices over {} vertices",
                mesh.indices.len(),
                mesh.vertex_count()
            )));
        }
        if mesh.triangle_count() == 0 {
            return Err(SceneError::NoTriangles);
        }

        let triangles: Vec<TriPrim> = mesh
            .triangles()
            .enumerate()
            .map(|(i, vertices)| TriPrim::new(i as u32, vertices))
            .collect();
        let degenerate = triangles.iter().filter(|t| t.is_degenerate()).count();
        if degenerate > 0 {
            diagnostics.warn(&format!("{degenerate} degenerate triangles will never be hit"));
        }

        let split_level = settings.split_level_for(triangles.len());

        if let Some(path) = cache {
            match Self::load_cached(path, triangles.len(), split_level) {
                Ok(tree) => {
                    diagnostics.info(&format!(
                        "Loaded tree cache {} ({} nodes)",
                        path.display(),
                        tree.nodes().len()
                    ));
                    return Ok(Self { triangles, tree });
                }
                Err(e) => diagnostics.warn(&format!(
                    "Tree cache {} unusable, rebuilding: {e}",
                    path.display()
                )),
            }
        }

        let policy = SplitPolicy::from_settings(settings);
        diagnostics.info(&format!(
            "Building tree over {} triangles, split level {split_level}, {policy:?}",
            triangles.len()
        ));
        let start = Instant::now();
        let mut tree = BspTree::build(split_level, mesh.bounds);
        tree.fill(&triangles, policy, settings.min_tri_per_node);
        diagnostics.info(&format!(
            "Tree built in {:.2?}: {} nodes, {} triangle references",
            start.elapsed(),
            tree.nodes().len(),
            tree.tri_indices().len()
        ));

        if let Some(path) = cache {
            if let Err(e) = tree.save(path) {
                diagnostics.warn(&format!("Failed to write tree cache {}: {e}", path.display()));
            }
        }

        Ok(Self { triangles, tree })
    }

    fn load_cached(path: &Path, triangle_count: usize, split_level: u32) -> Result<BspTree, TreeError> {
        let tree = BspTree::load(path, triangle_count)?;
        if tree.split_level() != split_level {
            return Err(TreeError::SplitLevelMismatch {
                expected: split_level,
                found: tree.split_level(),
            });
        }
        Ok(tree)
    }

    /// Cache file location for a mesh file: the mesh path with `.kdtree` appended.
    pub fn cache_path_for(mesh_path: &Path) -> PathBuf {
        let mut path = mesh_path.as_os_str().to_owned();
        path.push(".");
        path.push(CACHE_EXTENSION);
        PathBuf::from(path)
    }

    pub fn triangles(&self) -> &[TriPrim] {
        &self.triangles
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn tree(&self) -> &BspTree {
        &self.tree
    }

    pub fn bounds(&self) -> Aabb {
        self.tree.bounds()
    }

    /// Recomputes every triangle's plane distance for a specimen translation.
    pub fn recalculate_d(&mut self, translation: Vec3) {
        self.triangles
            .par_iter_mut()
            .for_each(|t| t.recalculate_d(translation));
    }

    /// Indices of the triangles inside the area of interest.
    pub fn find_selected_triangles(&self, cut_boxes: &CutBoxList) -> Vec<u32> {
        cut_boxes.select_triangles(self.triangles.iter().map(|t| *t.vertices()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_meshes;
    use dc_core::{CollectedDiagnostics, CutAab};

    fn temp_cache(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dc_scene_{}_{name}.kdtree", std::process::id()))
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let mesh = Mesh::new(vec![Vec3::ZERO], vec![]);
        let result = Scene::init(&mesh, &Settings::default(), None, &CollectedDiagnostics::new());
        assert!(matches!(result, Err(SceneError::NoTriangles)));
    }

    #[test]
    fn test_invalid_indices_are_rejected() {
        let mesh = Mesh::new(vec![Vec3::ZERO, Vec3::X], vec![0, 1, 2]);
        let result = Scene::init(&mesh, &Settings::default(), None, &CollectedDiagnostics::new());
        assert!(matches!(result, Err(SceneError::InvalidMesh(_))));
    }

    #[test]
    fn test_split_level_follows_tier() {
        let settings = Settings {
            tree_l1: 3,
            ..Settings::default()
        };
        let scene = Scene::init(&test_meshes::cube(1.0), &settings, None, &CollectedDiagnostics::new())
            .unwrap();
        assert_eq!(scene.tree().split_level(), 3);
        assert_eq!(scene.triangle_count(), 12);
        assert_eq!(scene.triangles()[5].index(), 5);
    }

    #[test]
    fn test_cache_is_written_then_reused() {
        let path = temp_cache("reuse");
        let _ = std::fs::remove_file(&path);
        let mesh = test_meshes::sphere(6, 8);
        let settings = Settings::default();

        let diagnostics = CollectedDiagnostics::new();
        let built = Scene::init(&mesh, &settings, Some(&path), &diagnostics).unwrap();
        assert!(diagnostics.messages().iter().any(|m| m.contains("unusable")));
        assert!(path.exists());

        let diagnostics = CollectedDiagnostics::new();
        let loaded = Scene::init(&mesh, &settings, Some(&path), &diagnostics).unwrap();
        assert!(diagnostics.messages().iter().any(|m| m.starts_with("Loaded tree cache")));
        assert_eq!(loaded.tree(), built.tree());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_or_mismatched_cache_falls_back() {
        let path = temp_cache("corrupt");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let mesh = test_meshes::sphere(6, 8);
        let diagnostics = CollectedDiagnostics::new();
        let scene = Scene::init(&mesh, &Settings::default(), Some(&path), &diagnostics).unwrap();
        assert!(diagnostics.messages()[0].starts_with("warning: Tree cache"));
        assert!(scene.tree().nodes().len() > 1);

        // The rebuilt cache has split level 2; ask for a different tier.
        let settings = Settings {
            tree_l1: 4,
            ..Settings::default()
        };
        let diagnostics = CollectedDiagnostics::new();
        let scene = Scene::init(&mesh, &settings, Some(&path), &diagnostics).unwrap();
        assert_eq!(scene.tree().split_level(), 4);
        assert!(diagnostics.messages()[0].contains("does not match"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_recalculate_d() {
        let mut scene =
            Scene::init(&test_meshes::cube(2.0), &Settings::default(), None, &CollectedDiagnostics::new())
                .unwrap();
        let before: Vec<f32> = scene.triangles().iter().map(|t| t.d()).collect();
        scene.recalculate_d(Vec3::ZERO);
        let after: Vec<f32> = scene.triangles().iter().map(|t| t.d()).collect();
        assert_eq!(before, after);

        scene.recalculate_d(Vec3::new(0.0, 0.0, 1.0));
        for tri in scene.triangles() {
            let expected = tri.normal().dot(tri.vertices()[0] - Vec3::Z);
            assert!((tri.d() - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_find_selected_triangles() {
        let scene =
            Scene::init(&test_meshes::cube(2.0), &Settings::default(), None, &CollectedDiagnostics::new())
                .unwrap();
        assert_eq!(scene.find_selected_triangles(&CutBoxList::default()).len(), 12);

        // Only the -z face lies wholly inside this slab.
        let boxes: CutBoxList = [CutAab::new(Aabb::from_bounds(-2.0, 2.0, -2.0, 2.0, -1.5, -0.5))]
            .into_iter()
            .collect();
        assert_eq!(scene.find_selected_triangles(&boxes), vec![0, 1]);
    }

    #[test]
    fn test_cache_path_for() {
        assert_eq!(
            Scene::cache_path_for(Path::new("/data/part.stl")),
            PathBuf::from("/data/part.stl.kdtree")
        );
    }
}
