//! Camera post-processing pipeline
//!
//! Effects run after the scene is rendered and operate on the camera color
//! target in place.

pub mod postprocess;

pub use postprocess::{VolumetricLightPass, VolumetricLightSettings};

/// Point in the camera frame at which a post-processing feature runs
///
/// Ordered by execution: sorting features by event yields the frame order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RenderPassEvent {
    BeforeRenderingOpaques,
    AfterRenderingOpaques,
    BeforeRenderingTransparents,
    AfterRenderingTransparents,
    #[default]
    BeforeRenderingPostProcessing,
    AfterRenderingPostProcessing,
    AfterRendering,
}
