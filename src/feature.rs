//! Host-facing registration of the volumetric light effect
//!
//! The feature owns the pass for the lifetime of the renderer. The host calls
//! [`VolumetricLightFeature::render_frame`] once per camera with the settings
//! resolved for that frame.

use crate::backend::{FilterContext, TextureHandle};
use crate::error::EffectResult;
use crate::pipeline::postprocess::{VolumetricLightPass, RENDER_TAG, VOLUMETRIC_LIGHT_SHADER};
use crate::pipeline::{RenderPassEvent, VolumetricLightSettings};
use crate::resources::ProgramDescriptor;

/// Configuration for registering the feature
#[derive(Debug, Clone)]
pub struct FeatureSettings {
    /// Point in the camera frame at which the pass runs
    pub render_pass_event: RenderPassEvent,
    /// Filter program the pass is built from
    pub program: ProgramDescriptor,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            render_pass_event: RenderPassEvent::default(),
            program: ProgramDescriptor::wgsl("volumetric_light", VOLUMETRIC_LIGHT_SHADER),
        }
    }
}

/// What the host knows about the camera being rendered
#[derive(Debug, Clone, Copy)]
pub struct CameraFrame {
    /// Camera color target; read and overwritten in place
    pub source: TextureHandle,
    pub post_processing_enabled: bool,
    /// Whether the renderer is executing this camera in tiles
    pub tiled: bool,
}

impl CameraFrame {
    pub fn new(source: TextureHandle) -> Self {
        Self {
            source,
            post_processing_enabled: true,
            tiled: false,
        }
    }

    pub fn with_post_processing(mut self, enabled: bool) -> Self {
        self.post_processing_enabled = enabled;
        self
    }

    pub fn with_tiling(mut self, tiled: bool) -> Self {
        self.tiled = tiled;
        self
    }
}

/// Volumetric light renderer feature
pub struct VolumetricLightFeature {
    settings: FeatureSettings,
    pass: Option<VolumetricLightPass>,
}

impl VolumetricLightFeature {
    pub fn new(settings: FeatureSettings) -> Self {
        Self {
            settings,
            pass: None,
        }
    }

    /// Build the pass; later calls keep the existing one
    pub fn create(&mut self) {
        if self.pass.is_none() {
            log::debug!("{}: building pass", RENDER_TAG);
            self.pass = Some(VolumetricLightPass::new(&self.settings.program));
        }
    }

    pub fn pass(&self) -> Option<&VolumetricLightPass> {
        self.pass.as_ref()
    }

    pub fn render_pass_event(&self) -> RenderPassEvent {
        self.settings.render_pass_event
    }

    /// Whether the pass should be scheduled for `frame`
    pub fn should_enqueue(&self, frame: &CameraFrame, settings: &VolumetricLightSettings) -> bool {
        let enabled = self.pass.as_ref().is_some_and(|pass| pass.is_enabled());
        let tiling_ok = !frame.tiled || VolumetricLightSettings::supports_tiling();
        enabled && tiling_ok && settings.is_active()
    }

    /// Run the pass for one camera
    ///
    /// Failures are logged and returned; the source is left as it was.
    pub fn render_frame<C: FilterContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        frame: &CameraFrame,
        settings: &VolumetricLightSettings,
    ) -> EffectResult<()> {
        self.create();
        if !self.should_enqueue(frame, settings) {
            return Ok(());
        }
        let Some(pass) = self.pass.as_mut() else {
            return Ok(());
        };

        pass.execute(ctx, frame.source, settings, frame.post_processing_enabled)
            .inspect_err(|err| log::warn!("{}: {}", RENDER_TAG, err))
    }
}

impl Default for VolumetricLightFeature {
    fn default() -> Self {
        Self::new(FeatureSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessContext, TextureDescriptor, TextureFormat, TextureUsage};

    fn camera_target(ctx: &mut HeadlessContext) -> TextureHandle {
        ctx.create_texture(&TextureDescriptor::new_2d(
            8,
            8,
            TextureFormat::Rgba16Float,
            TextureUsage::FILTER_TARGET,
        ))
    }

    #[test]
    fn default_feature_runs_before_post_processing() {
        let mut feature = VolumetricLightFeature::default();
        feature.create();
        assert_eq!(
            feature.render_pass_event(),
            RenderPassEvent::BeforeRenderingPostProcessing
        );
        assert!(feature.pass().is_some_and(|pass| pass.is_enabled()));
    }

    #[test]
    fn inactive_settings_are_not_enqueued() {
        let mut feature = VolumetricLightFeature::default();
        let mut ctx = HeadlessContext::new();
        let frame = CameraFrame::new(camera_target(&mut ctx));

        feature
            .render_frame(&mut ctx, &frame, &VolumetricLightSettings::default())
            .unwrap();
        assert!(ctx.commands().is_empty());
    }

    #[test]
    fn tiled_cameras_are_skipped() {
        let mut feature = VolumetricLightFeature::default();
        feature.create();
        let mut ctx = HeadlessContext::new();
        let frame = CameraFrame::new(camera_target(&mut ctx)).with_tiling(true);
        let settings = VolumetricLightSettings::new().with_intensity(0.5);

        assert!(!feature.should_enqueue(&frame, &settings));
        assert!(feature.should_enqueue(&frame.with_tiling(false), &settings));
    }

    #[test]
    fn active_frame_runs_the_pass() {
        let mut feature = VolumetricLightFeature::default();
        let mut ctx = HeadlessContext::new();
        let frame = CameraFrame::new(camera_target(&mut ctx));
        let settings = VolumetricLightSettings::new()
            .with_intensity(0.5)
            .with_loop_count(2);

        feature.render_frame(&mut ctx, &frame, &settings).unwrap();
        assert_eq!(ctx.buffer_operations().len(), 1 + 2 * 2 + 2);
    }

    #[test]
    fn broken_program_never_enqueues() {
        let mut feature = VolumetricLightFeature::new(FeatureSettings {
            program: ProgramDescriptor::wgsl("broken", "fn main( {"),
            ..Default::default()
        });
        feature.create();
        let settings = VolumetricLightSettings::new().with_intensity(1.0);
        let mut ctx = HeadlessContext::new();
        let frame = CameraFrame::new(camera_target(&mut ctx));

        assert!(!feature.should_enqueue(&frame, &settings));
        feature.render_frame(&mut ctx, &frame, &settings).unwrap();
        assert!(ctx.commands().is_empty());
    }
}
