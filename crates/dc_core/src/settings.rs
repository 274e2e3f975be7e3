//! Engine and tree configuration.
//!
//! Every field has a default, so a settings file only needs the values it
//! overrides:
//!
//! ```toml
//! frame_width = 256
//! frame_height = 256
//! use_sah = true
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Deepest split level accepted for any tier.
pub const MAX_SPLIT_LEVEL: u32 = 32;

/// Errors from reading or validating settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Linear colour ramp used when rendering dip angles as colours.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ColorRange {
    pub min: [u8; 3],
    pub max: [u8; 3],
}

impl Default for ColorRange {
    fn default() -> Self {
        Self {
            min: [255, 255, 255],
            max: [255, 0, 0],
        }
    }
}

impl ColorRange {
    /// Colour at `t` in [0, 1] along the ramp (clamped).
    pub fn lerp(&self, t: f32) -> [u8; 3] {
        let t = t.clamp(0.0, 1.0);
        let mut rgb = [0u8; 3];
        for (i, c) in rgb.iter_mut().enumerate() {
            let lo = self.min[i] as f32;
            let hi = self.max[i] as f32;
            *c = (lo + (hi - lo) * t) as u8;
        }
        rgb
    }
}

/// Numeric configuration consumed by the tree builder and the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Rays per row of the detector raster
    pub frame_width: u32,
    /// Rays per column of the detector raster
    pub frame_height: u32,
    /// Model-to-world scale applied on load and to user positions
    pub scale_coef: f32,
    /// Penetration length to grey level factor for penetration images
    pub coloring_coef: f32,
    /// Z of the ray origin (the source) before placement transforms
    pub origin_z: f32,
    /// Z of the detector plane before placement transforms
    pub plane_z: f32,
    pub plane_half_width: f32,
    pub plane_half_height: f32,
    /// Split level for meshes up to `tree_split1` triangles
    pub tree_l1: u32,
    /// Split level for meshes up to `tree_split2` triangles
    pub tree_l2: u32,
    /// Split level for larger meshes
    pub tree_l3: u32,
    pub tree_split1: usize,
    pub tree_split2: usize,
    /// Nodes with at most this many triangles become leaves
    pub min_tri_per_node: usize,
    /// Use the surface area heuristic instead of median splits
    pub use_sah: bool,
    /// Upper bound on SAH candidate planes per node (`None` = all of them)
    pub sah_max_candidates: Option<usize>,
    /// Renders dispatched per compute-backend call
    pub batch_size: usize,
    /// Worker threads of the CPU backend (0 = shared rayon pool)
    pub threads: usize,
    /// Ray buffer memory one backend dispatch may use, in MiB
    pub memory_budget_mb: usize,
    pub color_range: ColorRange,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            frame_width: 128,
            frame_height: 128,
            scale_coef: 1.0,
            coloring_coef: 0.007,
            origin_z: -469.3,
            plane_z: 1069.299,
            plane_half_width: 204.8,
            plane_half_height: 204.8,
            tree_l1: 2,
            tree_l2: 17,
            tree_l3: 25,
            tree_split1: 10_000,
            tree_split2: 100_000,
            min_tri_per_node: 1,
            use_sah: false,
            sah_max_candidates: None,
            batch_size: 10,
            threads: 0,
            memory_budget_mb: 512,
            color_range: ColorRange::default(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text and validate them.
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a TOML file and validate them.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the tree builder or engine cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> SettingsError {
            SettingsError::Invalid {
                name,
                reason: reason.into(),
            }
        }

        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(invalid("frame_width/frame_height", "frame must not be empty"));
        }
        if self.scale_coef.is_nan() || self.scale_coef <= 0.0 {
            return Err(invalid("scale_coef", "must be positive"));
        }
        for (name, level) in [
            ("tree_l1", self.tree_l1),
            ("tree_l2", self.tree_l2),
            ("tree_l3", self.tree_l3),
        ] {
            if level > MAX_SPLIT_LEVEL {
                return Err(invalid(name, format!("split level {level} exceeds {MAX_SPLIT_LEVEL}")));
            }
        }
        if self.tree_split1 > self.tree_split2 {
            return Err(invalid("tree_split1", "must not exceed tree_split2"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.memory_budget_mb == 0 {
            return Err(invalid("memory_budget_mb", "must be at least 1"));
        }
        if self.sah_max_candidates == Some(0) {
            return Err(invalid("sah_max_candidates", "must be at least 1 when set"));
        }
        Ok(())
    }

    /// Split level tier for a mesh with `triangle_count` triangles.
    pub fn split_level_for(&self, triangle_count: usize) -> u32 {
        if triangle_count > self.tree_split2 {
            self.tree_l3
        } else if triangle_count > self.tree_split1 {
            self.tree_l2
        } else {
            self.tree_l1
        }
    }

    pub fn memory_budget_bytes(&self) -> usize {
        self.memory_budget_mb.saturating_mul(1024 * 1024)
    }

    /// Detector raster size in rays.
    pub fn ray_count(&self) -> usize {
        self.frame_width as usize * self.frame_height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.ray_count(), 128 * 128);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            "frame_width = 64\nuse_sah = true\n[color_range]\nmax = [0, 0, 255]\n",
        )
        .unwrap();
        assert_eq!(settings.frame_width, 64);
        assert_eq!(settings.frame_height, 128);
        assert!(settings.use_sah);
        assert_eq!(settings.threads, 0);
        assert_eq!(settings.memory_budget_bytes(), 512 * 1024 * 1024);
        assert_eq!(settings.color_range.min, [255, 255, 255]);
        assert_eq!(settings.color_range.max, [0, 0, 255]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            Settings::from_toml_str("batch_size = 0"),
            Err(SettingsError::Invalid { name: "batch_size", .. })
        ));
        assert!(matches!(
            Settings::from_toml_str("tree_l3 = 40"),
            Err(SettingsError::Invalid { name: "tree_l3", .. })
        ));
        assert!(matches!(
            Settings::from_toml_str("memory_budget_mb = 0"),
            Err(SettingsError::Invalid { name: "memory_budget_mb", .. })
        ));
        assert!(matches!(
            Settings::from_toml_str("frame_width = \"wide\""),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_split_level_tiers() {
        let settings = Settings::default();
        assert_eq!(settings.split_level_for(12), 2);
        assert_eq!(settings.split_level_for(10_000), 2);
        assert_eq!(settings.split_level_for(10_001), 17);
        assert_eq!(settings.split_level_for(100_001), 25);
    }

    #[test]
    fn test_color_range_lerp() {
        let range = ColorRange::default();
        assert_eq!(range.lerp(0.0), [255, 255, 255]);
        assert_eq!(range.lerp(1.0), [255, 0, 0]);
        assert_eq!(range.lerp(2.0), [255, 0, 0]);
        assert_eq!(range.lerp(0.5)[1], 127);
    }
}
