//! Penetration images.

use std::path::Path;

use dc_core::{ColorRange, Parameter, RenderFromPosition, Settings};
use image::{ImageFormat, ImageResult, Rgb, RgbImage};

use crate::batch::BatchResults;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// What a render image shows per detector pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShadeMode {
    /// Grey level falling with the penetrated length
    #[default]
    Penetration,
    /// Colour ramp over the mean dip cosine
    DipAngle,
}

/// Image of a render's retained rays, one pixel per detector cell.
///
/// The render must have been made with `remember_data`; pixels without a
/// penetrating ray stay white. Columns are mirrored to match the detector view.
pub fn shade_render(render: &RenderFromPosition, settings: &Settings, mode: ShadeMode) -> RgbImage {
    let (width, height) = (settings.frame_width, settings.frame_height);
    let mut img = RgbImage::from_pixel(width, height, WHITE);

    for ray in &render.rays {
        if ray.penetrations == 0 || ray.x < 0 || ray.y < 0 {
            continue;
        }
        let (x, y) = (ray.x as u32, ray.y as u32);
        if x >= width || y >= height {
            continue;
        }
        let color = match mode {
            ShadeMode::Penetration => {
                let dark = (ray.total_penetration_len * settings.coloring_coef * 255.0).min(255.0);
                let grey = (255.0 - dark).max(0.0) as u8;
                [grey; 3]
            }
            ShadeMode::DipAngle => settings.color_range.lerp(1.0 - ray.av_dip_angle),
        };
        img.put_pixel(width - 1 - x, y, Rgb(color));
    }
    img
}

/// Map of one parameter over the (x, z) placement grid.
///
/// Values are normalised to the grid's range; the best placements get
/// `colors.min`, the worst `colors.max`.
pub fn shade_placements(results: &BatchResults, parameter: Parameter, colors: &ColorRange) -> RgbImage {
    let header = results.header();
    let values: Vec<f32> = results.placements().iter().map(|p| p.get(parameter)).collect();
    let lo = values.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = hi - lo;

    RgbImage::from_fn(header.count_x, header.count_z, |x, z| {
        let value = values
            .get(x as usize * header.count_z as usize + z as usize)
            .copied()
            .unwrap_or(lo);
        let mut t = if range > 0.0 { (value - lo) / range } else { 0.0 };
        if parameter.higher_is_better() {
            t = 1.0 - t;
        }
        Rgb(colors.lerp(t))
    })
}

pub fn save_png<P: AsRef<Path>>(img: &RgbImage, path: P) -> ImageResult<()> {
    img.save_with_format(path, ImageFormat::Png)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_core::RayPenetration;
    use dc_math::Vec3;

    fn settings() -> Settings {
        Settings {
            frame_width: 4,
            frame_height: 2,
            coloring_coef: 0.1,
            ..Settings::default()
        }
    }

    fn ray(x: i32, y: i32, len: f32, dip: f32) -> RayPenetration {
        RayPenetration {
            x,
            y,
            total_penetration_len: len,
            av_dip_angle: dip,
            penetrations: 1,
        }
    }

    #[test]
    fn test_penetration_grey_levels() {
        let mut render = RenderFromPosition::new(Vec3::ZERO, Vec3::ZERO);
        render.rays = vec![ray(0, 0, 2.0, 0.5), ray(1, 1, 100.0, 0.5)];
        let img = shade_render(&render, &settings(), ShadeMode::Penetration);

        assert_eq!(img.dimensions(), (4, 2));
        // 255 - 2 * 0.1 * 255 = 204, at the mirrored column
        assert_eq!(img.get_pixel(3, 0), &Rgb([204, 204, 204]));
        assert_eq!(img.get_pixel(2, 1), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(0, 0), &WHITE);
    }

    #[test]
    fn test_dip_colours() {
        let mut render = RenderFromPosition::new(Vec3::ZERO, Vec3::ZERO);
        render.rays = vec![ray(0, 0, 1.0, 1.0), ray(1, 0, 1.0, 0.0)];
        let settings = settings();
        let img = shade_render(&render, &settings, ShadeMode::DipAngle);
        assert_eq!(img.get_pixel(3, 0).0, settings.color_range.min);
        assert_eq!(img.get_pixel(2, 0).0, settings.color_range.max);
    }

    #[test]
    fn test_out_of_raster_and_empty_rays_are_skipped() {
        let mut render = RenderFromPosition::new(Vec3::ZERO, Vec3::ZERO);
        let mut empty = ray(0, 0, 5.0, 0.5);
        empty.penetrations = 0;
        render.rays = vec![empty, ray(4, 0, 5.0, 0.5), ray(-1, 0, 5.0, 0.5)];
        let img = shade_render(&render, &settings(), ShadeMode::Penetration);
        assert!(img.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn test_save_png() {
        let path = std::env::temp_dir().join(format!("dc_shading_{}.png", std::process::id()));
        let img = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        save_png(&img, &path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded, img);
        let _ = std::fs::remove_file(&path);
    }
}
