//! CPU stage kernels matching [`VOLUMETRIC_LIGHT_SHADER`](super::VOLUMETRIC_LIGHT_SHADER)
//!
//! Installed on a [`HeadlessContext`] they let the reference program run
//! without a GPU.

use super::pass::FINAL_TEXTURE_BINDING;
use super::settings::*;
use crate::backend::{BackendError, BackendResult, HeadlessContext, StageInput, StageKernel};
use crate::resources::FilterStage;
use glam::{Vec2, Vec3, Vec4};
use image::{Rgba, Rgba32FImage};

const LIGHT_POSITION: Vec2 = Vec2::new(0.5, 0.5);
const BRIGHT_THRESHOLD: f32 = 0.8;
const DECAY: f32 = 0.96;
const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// The three kernels of the reference program
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumetricLightKernels;

impl VolumetricLightKernels {
    pub fn install(self, ctx: &mut HeadlessContext) {
        ctx.set_kernel(FilterStage::Extract, Box::new(RadialExtractKernel));
        ctx.set_kernel(FilterStage::Blur, Box::new(BilateralBlurKernel));
        ctx.set_kernel(FilterStage::Composite, Box::new(AdditiveCompositeKernel));
    }
}

/// Stage 0: march towards the light, accumulating the bright part of the image
#[derive(Debug, Clone, Copy, Default)]
pub struct RadialExtractKernel;

impl StageKernel for RadialExtractKernel {
    fn apply(&self, input: &StageInput<'_>) -> BackendResult<Rgba32FImage> {
        let steps = required_float(input, STEP_TIME_BINDING)?.clamp(1.0, 64.0) as u32;
        let intensity = required_float(input, INTENSITY_BINDING)?;
        let source = input.source;
        let (width, height) = source.dimensions();

        Ok(Rgba32FImage::from_fn(width, height, |x, y| {
            let origin = texel_center(x, y, width, height);
            let delta = (origin - LIGHT_POSITION) / steps as f32;

            let mut uv = origin;
            let mut illumination = 1.0;
            let mut accumulated = Vec3::ZERO;
            for _ in 0..steps {
                accumulated += bright_pass(sample_bilinear(source, uv).truncate()) * illumination;
                illumination *= DECAY;
                uv -= delta;
            }

            to_pixel((accumulated / steps as f32 * intensity).extend(1.0))
        }))
    }
}

/// Stage 1: edge-preserving blur
#[derive(Debug, Clone, Copy, Default)]
pub struct BilateralBlurKernel;

impl StageKernel for BilateralBlurKernel {
    fn apply(&self, input: &StageInput<'_>) -> BackendResult<Rgba32FImage> {
        let space_sigma = required_float(input, SPATIAL_SIGMA_BINDING)?;
        let range_sigma = required_float(input, RANGE_SIGMA_BINDING)?;
        let radius = required_float(input, KERNEL_SIZE_BINDING)?.ceil() as i32;
        let space_denominator = 2.0 * space_sigma * space_sigma;
        let range_denominator = 2.0 * range_sigma * range_sigma;
        let source = input.source;
        let (width, height) = source.dimensions();

        Ok(Rgba32FImage::from_fn(width, height, |x, y| {
            let center = fetch_clamped(source, x as i32, y as i32);
            let mut total = Vec3::ZERO;
            let mut weight_sum = 0.0;

            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let tap = fetch_clamped(source, x as i32 + dx, y as i32 + dy).truncate();
                    let offset = Vec2::new(dx as f32, dy as f32);
                    let difference = tap - center.truncate();
                    let weight = (-offset.length_squared() / space_denominator).exp()
                        * (-difference.length_squared() / range_denominator).exp();
                    total += tap * weight;
                    weight_sum += weight;
                }
            }

            to_pixel((total / weight_sum.max(0.0001)).extend(center.w))
        }))
    }
}

/// Stage 2: add the light buffer on top of the original image
#[derive(Debug, Clone, Copy, Default)]
pub struct AdditiveCompositeKernel;

impl StageKernel for AdditiveCompositeKernel {
    fn apply(&self, input: &StageInput<'_>) -> BackendResult<Rgba32FImage> {
        let scene = input
            .texture(FINAL_TEXTURE_BINDING)
            .ok_or_else(|| BackendError::StageRejected {
                stage: input.stage,
                reason: format!("texture `{}` is not bound", FINAL_TEXTURE_BINDING),
            })?;
        let light = input.source;
        let (width, height) = light.dimensions();

        Ok(Rgba32FImage::from_fn(width, height, |x, y| {
            let uv = texel_center(x, y, width, height);
            let scene = sample_bilinear(scene, uv);
            let light = Vec4::from_array(light.get_pixel(x, y).0).truncate();
            to_pixel((scene.truncate() + light).extend(scene.w))
        }))
    }
}

fn required_float(input: &StageInput<'_>, name: &str) -> BackendResult<f32> {
    input.float(name).ok_or_else(|| BackendError::StageRejected {
        stage: input.stage,
        reason: format!("scalar `{}` is not bound", name),
    })
}

fn bright_pass(color: Vec3) -> Vec3 {
    let luminance = color.dot(LUMA);
    color * ((luminance - BRIGHT_THRESHOLD).max(0.0) / luminance.max(0.0001))
}

fn texel_center(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

fn fetch_clamped(image: &Rgba32FImage, x: i32, y: i32) -> Vec4 {
    let x = x.clamp(0, image.width() as i32 - 1) as u32;
    let y = y.clamp(0, image.height() as i32 - 1) as u32;
    Vec4::from_array(image.get_pixel(x, y).0)
}

/// Linear filtering with clamp-to-edge addressing
fn sample_bilinear(image: &Rgba32FImage, uv: Vec2) -> Vec4 {
    let size = Vec2::new(image.width() as f32, image.height() as f32);
    let position = uv * size - 0.5;
    let base = position.floor();
    let t = position - base;
    let (x, y) = (base.x as i32, base.y as i32);

    let top = fetch_clamped(image, x, y).lerp(fetch_clamped(image, x + 1, y), t.x);
    let bottom = fetch_clamped(image, x, y + 1).lerp(fetch_clamped(image, x + 1, y + 1), t.x);
    top.lerp(bottom, t.y)
}

fn to_pixel(color: Vec4) -> Rgba<f32> {
    Rgba(color.to_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilterContext, TextureFormat};
    use crate::resources::{FilterProgram, ProgramDescriptor};
    use crate::pipeline::postprocess::VOLUMETRIC_LIGHT_SHADER;

    fn context() -> HeadlessContext {
        let mut ctx = HeadlessContext::new();
        VolumetricLightKernels.install(&mut ctx);
        ctx
    }

    fn program() -> FilterProgram {
        FilterProgram::new(&ProgramDescriptor::wgsl("volumetric", VOLUMETRIC_LIGHT_SHADER))
            .unwrap()
    }

    fn bind_defaults(ctx: &mut HeadlessContext, settings: &VolumetricLightSettings) {
        for (name, value) in settings.filter_bindings() {
            ctx.set_float(name, value);
        }
    }

    #[test]
    fn dark_image_extracts_nothing() {
        let program = program();
        let mut ctx = context();
        let src = ctx.insert_image(
            Rgba32FImage::from_pixel(8, 8, Rgba([0.3, 0.3, 0.3, 1.0])),
            TextureFormat::Rgba16Float,
        );
        let dst = ctx.insert_image(Rgba32FImage::new(8, 8), TextureFormat::Rgba16Float);
        bind_defaults(&mut ctx, &VolumetricLightSettings::new().with_intensity(1.0));

        ctx.blit(&program, FilterStage::Extract, src, dst).unwrap();
        for pixel in ctx.image(dst).unwrap().pixels() {
            assert_eq!(pixel.0, [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn bright_center_lights_its_neighbourhood() {
        let program = program();
        let mut ctx = context();
        let src = ctx.insert_image(
            Rgba32FImage::from_fn(9, 9, |x, y| {
                if (3..6).contains(&x) && (3..6).contains(&y) {
                    Rgba([1.0, 1.0, 1.0, 1.0])
                } else {
                    Rgba([0.0, 0.0, 0.0, 1.0])
                }
            }),
            TextureFormat::Rgba16Float,
        );
        let dst = ctx.insert_image(Rgba32FImage::new(9, 9), TextureFormat::Rgba16Float);
        bind_defaults(&mut ctx, &VolumetricLightSettings::new().with_intensity(1.0));

        ctx.blit(&program, FilterStage::Extract, src, dst).unwrap();
        let out = ctx.image(dst).unwrap();
        assert!(out.get_pixel(4, 4).0[0] > 0.1);
        assert!(out.get_pixel(4, 4).0[0] > out.get_pixel(0, 0).0[0]);
    }

    #[test]
    fn blur_preserves_flat_images() {
        let program = program();
        let mut ctx = context();
        let flat = Rgba32FImage::from_pixel(5, 5, Rgba([0.4, 0.2, 0.1, 1.0]));
        let src = ctx.insert_image(flat, TextureFormat::Rgba32Float);
        let dst = ctx.insert_image(Rgba32FImage::new(5, 5), TextureFormat::Rgba32Float);
        bind_defaults(&mut ctx, &VolumetricLightSettings::new().with_kernel_size(2.0));

        ctx.blit(&program, FilterStage::Blur, src, dst).unwrap();
        for pixel in ctx.image(dst).unwrap().pixels() {
            for (channel, expected) in pixel.0.iter().zip([0.4, 0.2, 0.1, 1.0]) {
                assert!((channel - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn composite_requires_final_texture() {
        let program = program();
        let mut ctx = context();
        let src = ctx.insert_image(Rgba32FImage::new(2, 2), TextureFormat::Rgba8Unorm);
        let dst = ctx.insert_image(Rgba32FImage::new(2, 2), TextureFormat::Rgba8Unorm);

        let err = ctx
            .blit(&program, FilterStage::Composite, src, dst)
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::StageRejected {
                stage: FilterStage::Composite,
                ..
            }
        ));
    }

    #[test]
    fn composite_adds_light_to_scene() {
        let program = program();
        let mut ctx = context();
        let light = ctx.insert_image(
            Rgba32FImage::from_pixel(2, 2, Rgba([0.25, 0.0, 0.5, 1.0])),
            TextureFormat::Rgba16Float,
        );
        let scene = ctx.insert_image(
            Rgba32FImage::from_pixel(2, 2, Rgba([0.5, 0.5, 0.25, 0.75])),
            TextureFormat::Rgba16Float,
        );
        let dst = ctx.insert_image(Rgba32FImage::new(2, 2), TextureFormat::Rgba16Float);

        ctx.set_texture(FINAL_TEXTURE_BINDING, scene);
        ctx.blit(&program, FilterStage::Composite, light, dst).unwrap();
        assert_eq!(ctx.image(dst).unwrap().get_pixel(1, 0).0, [0.75, 0.5, 0.75, 0.75]);
    }

    #[test]
    fn bilinear_sampling_clamps_to_edge() {
        let image = Rgba32FImage::from_fn(2, 1, |x, _| Rgba([x as f32, 0.0, 0.0, 1.0]));
        assert_eq!(sample_bilinear(&image, Vec2::new(-1.0, 0.5)).x, 0.0);
        assert_eq!(sample_bilinear(&image, Vec2::new(2.0, 0.5)).x, 1.0);
        assert!((sample_bilinear(&image, Vec2::new(0.5, 0.5)).x - 0.5).abs() < 1e-6);
    }
}
