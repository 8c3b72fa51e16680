//! Volumetric Light - a camera post-processing effect
//!
//! Extracts light shafts from the rendered image, softens them with an
//! iterated bilateral blur and composites them back onto the camera target.
//!
//! # Layout
//! - [`backend`]: the [`FilterContext`] trait and its headless and wgpu implementations
//! - [`resources`]: validated filter programs
//! - [`pipeline`]: settings and the pass itself
//! - [`scene`]: `bevy_ecs` settings volumes
//! - [`feature`]: registration object the host renderer drives per camera

pub mod backend;
pub mod error;
pub mod feature;
pub mod pipeline;
pub mod resources;
pub mod scene;

pub use backend::{FilterContext, HeadlessContext, TextureDescriptor, TextureFormat, TextureHandle};
#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuFilterContext;
pub use error::{EffectError, EffectResult};
pub use feature::{CameraFrame, FeatureSettings, VolumetricLightFeature};
pub use pipeline::postprocess::{VolumetricLightKernels, VOLUMETRIC_LIGHT_SHADER};
pub use pipeline::{RenderPassEvent, VolumetricLightPass, VolumetricLightSettings};
pub use resources::{FilterProgram, FilterStage, ProgramDescriptor, ProgramError};
pub use scene::{resolve_settings, SettingsOverrides, SettingsVolume};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
