//! DreamCaster core - specimen data, settings and on-disk formats.
//!
//! This crate provides:
//!
//! - **Specimen geometry**: `Mesh` and the STL loader that fills it
//! - **Configuration**: `Settings`, read from TOML
//! - **Area of interest**: `CutAab` boxes and triangle selection
//! - **Render records**: per-ray, per-hit and per-placement statistics
//! - **Results files**: streaming writer/reader for batch runs
//! - **Diagnostics**: the injectable message sink used by long-running builds
//!
//! # Example
//!
//! ```ignore
//! use dc_core::{load_stl, Settings};
//!
//! let settings = Settings::load("dreamcaster.toml")?;
//! let mesh = load_stl("specimen.stl", settings.scale_coef)?;
//! println!("Loaded {} triangles", mesh.triangle_count());
//! ```

mod binary;
pub mod cut_box;
pub mod diagnostics;
pub mod mesh;
pub mod records;
pub mod results;
pub mod settings;
pub mod stl;

// Re-export commonly used types
pub use cut_box::{CutAab, CutBoxList};
pub use diagnostics::{CollectedDiagnostics, Diagnostics, LogDiagnostics};
pub use mesh::Mesh;
pub use records::{Intersection, Parameter, PlacementParams, RayPenetration, RenderFromPosition};
pub use results::{
    FormatError, FormatResult, ResultsHeader, ResultsReader, ResultsWriter, MAX_GRID_COUNT,
};
pub use settings::{ColorRange, Settings, SettingsError};
pub use stl::{load_stl, parse_stl, LoadError, LoadResult};
