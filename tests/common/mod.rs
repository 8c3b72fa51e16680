//! Shared infrastructure for the integration tests.

#![allow(dead_code)]

use image::{Rgba, Rgba32FImage};
use volumetric_light::backend::{
    FilterContext, HeadlessContext, TextureDescriptor, TextureFormat, TextureHandle,
};
use volumetric_light::{FilterProgram, ProgramDescriptor};
use volumetric_light::resources::IDENTITY_FILTER_SHADER;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Contexts the tests can run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// CPU context, always available
    Headless,
    /// Offscreen wgpu device
    Wgpu,
}

pub enum TestContext {
    Headless(HeadlessContext),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(volumetric_light::WgpuFilterContext),
}

impl TestContext {
    /// `None` when the backend is not compiled in or has no adapter
    pub fn new(backend: Backend) -> Option<Self> {
        init_logging();
        match backend {
            Backend::Headless => Some(TestContext::Headless(HeadlessContext::new())),
            #[cfg(feature = "wgpu-backend")]
            Backend::Wgpu => match volumetric_light::WgpuFilterContext::new() {
                Ok(ctx) => Some(TestContext::Wgpu(ctx)),
                Err(err) => {
                    eprintln!("wgpu unavailable: {err}");
                    None
                }
            },
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::Wgpu => None,
        }
    }

    pub fn ctx(&mut self) -> &mut dyn FilterContext {
        match self {
            TestContext::Headless(ctx) => ctx,
            #[cfg(feature = "wgpu-backend")]
            TestContext::Wgpu(ctx) => ctx,
        }
    }

    pub fn upload(&mut self, pixels: &Rgba32FImage, format: TextureFormat) -> TextureHandle {
        match self {
            TestContext::Headless(ctx) => ctx.insert_image(pixels.clone(), format),
            #[cfg(feature = "wgpu-backend")]
            TestContext::Wgpu(ctx) => ctx.upload_image(pixels, format).unwrap(),
        }
    }

    /// Texture with explicit usage flags, filled with transparent black
    pub fn create(&mut self, desc: &TextureDescriptor) -> TextureHandle {
        match self {
            TestContext::Headless(ctx) => ctx.create_texture(desc),
            #[cfg(feature = "wgpu-backend")]
            TestContext::Wgpu(ctx) => ctx.create_texture(desc).unwrap(),
        }
    }

    pub fn read(&mut self, texture: TextureHandle) -> Rgba32FImage {
        match self {
            TestContext::Headless(ctx) => ctx.image(texture).unwrap().clone(),
            #[cfg(feature = "wgpu-backend")]
            TestContext::Wgpu(ctx) => ctx.read_image(texture).unwrap(),
        }
    }
}

pub fn identity_program() -> FilterProgram {
    FilterProgram::new(&ProgramDescriptor::wgsl("identity", IDENTITY_FILTER_SHADER)).unwrap()
}

/// Pattern whose channels are exact in 8-bit unorm
pub fn test_pattern(width: u32, height: u32) -> Rgba32FImage {
    Rgba32FImage::from_fn(width, height, |x, y| {
        let r = ((x * 37 + y * 11) % 256) as f32 / 255.0;
        let g = ((x * 5 + y * 53) % 256) as f32 / 255.0;
        let b = ((x ^ y) % 256) as f32 / 255.0;
        Rgba([r, g, b, 1.0])
    })
}

pub fn assert_images_close(actual: &Rgba32FImage, expected: &Rgba32FImage, tolerance: f32) {
    assert_eq!(actual.dimensions(), expected.dimensions());
    for (x, y, pixel) in actual.enumerate_pixels() {
        let want = expected.get_pixel(x, y);
        for channel in 0..4 {
            assert!(
                (pixel.0[channel] - want.0[channel]).abs() <= tolerance,
                "pixel ({x}, {y}) channel {channel}: {:?} != {:?}",
                pixel.0,
                want.0
            );
        }
    }
}
