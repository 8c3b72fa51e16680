//! Renders the volumetric light effect over a synthetic scene (or an input
//! image) and writes the result as a PNG.
//!
//! ```bash
//! cargo run --example headless -- --intensity 0.8 --loop-count 4
//! cargo run --example headless -- --input scene.png --backend wgpu
//! ```

use bevy_ecs::world::World;
use clap::Parser;
use image::{DynamicImage, Rgba, Rgba32FImage};
use std::path::PathBuf;
use volumetric_light::{
    resolve_settings, CameraFrame, FilterContext, HeadlessContext, SettingsOverrides,
    SettingsVolume, TextureFormat, VolumetricLightFeature, VolumetricLightKernels,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// CPU kernels, no GPU required
    #[default]
    Headless,
    /// Offscreen wgpu device
    Wgpu,
}

#[derive(Debug, Parser)]
#[command(about = "Apply volumetric light to an image")]
struct Args {
    /// Image to process; a synthetic scene is generated when omitted
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long, default_value = "volumetric_light.png")]
    output: PathBuf,
    #[arg(long, value_enum, default_value_t = CliBackend::Headless)]
    backend: CliBackend,
    #[arg(long, default_value_t = 256)]
    width: u32,
    #[arg(long, default_value_t = 256)]
    height: u32,
    #[arg(long, default_value_t = 0.8)]
    intensity: f32,
    #[arg(long, default_value_t = 16.0)]
    step_time: f32,
    #[arg(long, default_value_t = 3)]
    loop_count: i32,
    #[arg(long, default_value_t = 1.5)]
    kernel_size: f32,
}

/// Bright disc behind a row of dark bars
fn synthetic_scene(width: u32, height: u32) -> Rgba32FImage {
    let (cx, cy) = (width as f32 * 0.5, height as f32 * 0.5);
    let radius = width.min(height) as f32 * 0.15;
    Rgba32FImage::from_fn(width, height, |x, y| {
        let (dx, dy) = (x as f32 - cx, y as f32 - cy);
        let occluded = (x / 12) % 3 == 0 && (y as f32 - cy).abs() < radius * 1.5;
        if occluded {
            Rgba([0.02, 0.02, 0.03, 1.0])
        } else if dx * dx + dy * dy < radius * radius {
            Rgba([1.0, 0.95, 0.8, 1.0])
        } else {
            Rgba([0.05, 0.06, 0.1, 1.0])
        }
    })
}

fn render<C: FilterContext + ?Sized>(
    ctx: &mut C,
    frame: &CameraFrame,
    world: &mut World,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = resolve_settings(world);
    log::info!("Rendering with {:?}", settings);

    let mut feature = VolumetricLightFeature::default();
    feature.render_frame(ctx, frame, &settings)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let scene = match &args.input {
        Some(path) => image::open(path)?.to_rgba32f(),
        None => synthetic_scene(args.width, args.height),
    };

    let mut world = World::new();
    world.spawn(SettingsVolume::new(
        0,
        SettingsOverrides {
            intensity: Some(args.intensity),
            step_time: Some(args.step_time),
            loop_count: Some(args.loop_count),
            kernel_size: Some(args.kernel_size),
            ..Default::default()
        },
    ));

    let output = match args.backend {
        CliBackend::Headless => {
            let mut ctx = HeadlessContext::new();
            VolumetricLightKernels.install(&mut ctx);
            let source = ctx.insert_image(scene, TextureFormat::Rgba16Float);
            render(&mut ctx, &CameraFrame::new(source), &mut world)?;
            ctx.image(source).cloned().ok_or("camera target vanished")?
        }
        CliBackend::Wgpu => {
            let mut ctx = volumetric_light::WgpuFilterContext::new()?;
            let source = ctx.upload_image(&scene, TextureFormat::Rgba16Float)?;
            render(&mut ctx, &CameraFrame::new(source), &mut world)?;
            ctx.read_image(source)?
        }
    };

    DynamicImage::ImageRgba32F(output).to_rgba8().save(&args.output)?;
    log::info!("Wrote {}", args.output.display());
    Ok(())
}
