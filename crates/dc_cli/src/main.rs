//! dreamcaster - CT placement search from the command line
//!
//! Runs a rotation batch over an STL specimen, renders single placements to
//! PNG and summarises results files.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dc_core::{load_stl, CutAab, CutBoxList, LogDiagnostics, Parameter, ResultsReader, Settings};
use dc_math::{Aabb, Vec3};
use dc_raycast::{
    run_batch, save_png, shade_placements, shade_render, BatchConfig, BatchResults, Engine,
    RadonMode, RenderOptions, Scene, ShadeMode,
};

#[derive(Parser)]
#[command(name = "dreamcaster")]
#[command(about = "Find the CT scan placement with the least material penetration", long_about = None)]
struct Cli {
    /// Settings file (TOML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a grid of specimen rotations and write a results file
    Batch {
        /// Specimen STL file
        stl: PathBuf,
        /// Results file to write
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        grid: GridArgs,
        #[command(flatten)]
        scene: SceneArgs,
        /// Bad-area analysis in Radon space
        #[arg(long, value_enum, default_value_t = RadonArg::Off)]
        radon: RadonArg,
        /// Store per-ray data and intersections of every render
        #[arg(long)]
        save_additional_data: bool,
    },
    /// Render one placement to a PNG image
    Render {
        /// Specimen STL file
        stl: PathBuf,
        /// Image to write
        #[arg(short, long)]
        output: PathBuf,
        /// Rotation about X, Y, Z in degrees
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
        rotation: Option<Vec<f32>>,
        #[arg(long, value_enum, default_value_t = ShadeArg::Penetration)]
        mode: ShadeArg,
        #[command(flatten)]
        scene: SceneArgs,
    },
    /// Summarise a results file and report the optimal placements
    Inspect {
        /// Results file written by `batch`
        results: PathBuf,
        /// Write a placement map of this parameter
        #[arg(long, value_enum)]
        map: Option<ParameterArg>,
        /// Image for `--map`
        #[arg(long, default_value = "placements.png")]
        map_output: PathBuf,
    },
}

#[derive(clap::Args)]
struct GridArgs {
    #[arg(long, default_value_t = 4)]
    count_x: u32,
    /// Degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    min_x: f32,
    /// Degrees
    #[arg(long, default_value_t = 180.0, allow_negative_numbers = true)]
    max_x: f32,
    /// Rotations per revolution about the scan axis
    #[arg(long, default_value_t = 8)]
    count_y: u32,
    #[arg(long, default_value_t = 4)]
    count_z: u32,
    /// Degrees
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    min_z: f32,
    /// Degrees
    #[arg(long, default_value_t = 180.0, allow_negative_numbers = true)]
    max_z: f32,
}

#[derive(clap::Args)]
struct SceneArgs {
    /// Specimen position in model units
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    position: Option<Vec<f32>>,
    /// Area of interest box in scaled units, repeatable
    #[arg(
        long = "cut-box",
        num_args = 6,
        value_names = ["MIN_X", "MAX_X", "MIN_Y", "MAX_Y", "MIN_Z", "MAX_Z"],
        allow_negative_numbers = true
    )]
    cut_boxes: Vec<f32>,
    /// Ignore the tree cache next to the STL file
    #[arg(long)]
    no_cache: bool,
}

impl SceneArgs {
    fn position(&self, settings: &Settings) -> Result<Vec3> {
        Ok(vec3_arg(self.position.as_deref(), "position")? * settings.scale_coef)
    }

    fn cut_boxes(&self) -> CutBoxList {
        self.cut_boxes
            .chunks_exact(6)
            .map(|b| CutAab::new(Aabb::from_bounds(b[0], b[1], b[2], b[3], b[4], b[5])))
            .collect()
    }

    fn load_scene(&self, stl: &Path, settings: &Settings) -> Result<Scene> {
        let mesh = load_stl(stl, settings.scale_coef)
            .with_context(|| format!("Failed to load {}", stl.display()))?;
        log::info!(
            "Loaded {}: {} triangles, {} vertices",
            stl.display(),
            mesh.triangle_count(),
            mesh.vertex_count()
        );
        let cache = (!self.no_cache).then(|| Scene::cache_path_for(stl));
        let scene = Scene::init(&mesh, settings, cache.as_deref(), &LogDiagnostics)
            .context("Failed to build scene")?;
        Ok(scene)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RadonArg {
    Off,
    WithRender,
    Only,
}

impl From<RadonArg> for RadonMode {
    fn from(arg: RadonArg) -> Self {
        match arg {
            RadonArg::Off => RadonMode::Off,
            RadonArg::WithRender => RadonMode::WithRender,
            RadonArg::Only => RadonMode::Only,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ShadeArg {
    Penetration,
    Dip,
}

#[derive(Clone, Copy, ValueEnum)]
enum ParameterArg {
    AvPenetration,
    AvDip,
    MaxPenetration,
    BadArea,
}

impl From<ParameterArg> for Parameter {
    fn from(arg: ParameterArg) -> Self {
        match arg {
            ParameterArg::AvPenetration => Parameter::AvPenetrationLen,
            ParameterArg::AvDip => Parameter::AvDipAngle,
            ParameterArg::MaxPenetration => Parameter::MaxPenetrationLen,
            ParameterArg::BadArea => Parameter::BadAreaPercentage,
        }
    }
}

fn vec3_arg(values: Option<&[f32]>, name: &str) -> Result<Vec3> {
    match values {
        None => Ok(Vec3::ZERO),
        Some(&[x, y, z]) => Ok(Vec3::new(x, y, z)),
        Some(other) => bail!("--{name} takes 3 values, got {}", other.len()),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to read settings from {}", path.display())),
        None => Ok(Settings::default()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Batch {
            stl,
            output,
            grid,
            scene,
            radon,
            save_additional_data,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            run_batch_command(&stl, &output, &grid, &scene, radon.into(), save_additional_data, &settings)?;
        }
        Commands::Render {
            stl,
            output,
            rotation,
            mode,
            scene,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            let rotation = vec3_arg(rotation.as_deref(), "rotation")?;
            let mode = match mode {
                ShadeArg::Penetration => ShadeMode::Penetration,
                ShadeArg::Dip => ShadeMode::DipAngle,
            };
            render_placement(&stl, &output, rotation, mode, &scene, &settings)?;
        }
        Commands::Inspect {
            results,
            map,
            map_output,
        } => {
            let settings = load_settings(cli.config.as_deref())?;
            inspect(&results, map.map(Parameter::from), &map_output, &settings)?;
        }
    }

    Ok(())
}

fn run_batch_command(
    stl: &Path,
    output: &Path,
    grid: &GridArgs,
    scene_args: &SceneArgs,
    radon_mode: RadonMode,
    save_additional_data: bool,
    settings: &Settings,
) -> Result<()> {
    let config = BatchConfig {
        count_x: grid.count_x,
        min_x: grid.min_x.to_radians(),
        max_x: grid.max_x.to_radians(),
        count_y: grid.count_y,
        count_z: grid.count_z,
        min_z: grid.min_z.to_radians(),
        max_z: grid.max_z.to_radians(),
        position: scene_args.position(settings)?,
        radon_mode,
        save_additional_data,
        cut_boxes: scene_args.cut_boxes(),
    };
    let mut scene = scene_args.load_scene(stl, settings)?;

    let file = File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let cancel = AtomicBool::new(false);
    let results = run_batch(
        &mut scene,
        settings,
        &config,
        BufWriter::new(file),
        &cancel,
        &LogDiagnostics,
    )
    .context("Batch failed")?;

    println!("Wrote {} renders to {}", results.header().total_renders(), output.display());
    print_optimal(&results);
    Ok(())
}

fn render_placement(
    stl: &Path,
    output: &Path,
    rotation_deg: Vec3,
    mode: ShadeMode,
    scene_args: &SceneArgs,
    settings: &Settings,
) -> Result<()> {
    let scene = scene_args.load_scene(stl, settings)?;
    let mut engine = Engine::new(settings)
        .with_scene(&scene)
        .with_cut_boxes(scene_args.cut_boxes());
    engine.set_rotations(Vec3::new(
        rotation_deg.x.to_radians(),
        rotation_deg.y.to_radians(),
        rotation_deg.z.to_radians(),
    ));
    engine.set_position(scene_args.position(settings)?);

    let frame = engine.init_render();
    let render = engine
        .render(&frame, RenderOptions { remember_data: true })
        .context("Render failed")?;

    println!("Average penetration: {:.4}", render.av_penetration_len);
    println!("Average dip cosine:  {:.4}", render.av_dip_angle);
    println!("Max penetration:     {:.4}", render.max_penetration_len);
    println!("Penetrating rays:    {}", render.rays.len());

    let img = shade_render(&render, settings, mode);
    save_png(&img, output).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Saved {}", output.display());
    Ok(())
}

fn inspect(path: &Path, map: Option<Parameter>, map_output: &Path, settings: &Settings) -> Result<()> {
    let mut reader =
        ResultsReader::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let header = reader.header().clone();
    println!("Results file: {}", path.display());
    println!(
        "  X: {} steps over [{:.1}, {:.1}] deg",
        header.count_x,
        header.min_x.to_degrees(),
        header.max_x.to_degrees()
    );
    println!("  Y: {} steps over a full revolution", header.count_y);
    println!(
        "  Z: {} steps over [{:.1}, {:.1}] deg",
        header.count_z,
        header.min_z.to_degrees(),
        header.max_z.to_degrees()
    );
    println!("  Cut boxes: {}", header.cut_boxes.len());

    let results = BatchResults::from_results_file(&mut reader).context("Failed to read renders")?;
    print_optimal(&results);

    if let Some(parameter) = map {
        let img = shade_placements(&results, parameter, &settings.color_range);
        save_png(&img, map_output).with_context(|| format!("Failed to write {}", map_output.display()))?;
        println!("Saved {:?} map to {}", parameter, map_output.display());
    }
    Ok(())
}

fn print_optimal(results: &BatchResults) {
    let parameters = [
        ("average penetration", Parameter::AvPenetrationLen),
        ("average dip cosine", Parameter::AvDipAngle),
        ("max penetration", Parameter::MaxPenetrationLen),
    ];
    for (label, parameter) in parameters {
        if let Some((x, z, params)) = results.optimal(parameter) {
            let rotation = results.placement_rotation(x, z);
            println!(
                "Best {label}: {:.4} at X {:.1} deg, Z {:.1} deg (bad area {:.1}%)",
                params.get(parameter),
                rotation.x.to_degrees(),
                rotation.z.to_degrees(),
                params.bad_area_percentage * 100.0
            );
        }
    }
}
