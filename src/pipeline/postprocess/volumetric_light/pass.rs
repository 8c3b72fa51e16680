//! Volumetric light post-processing pass
//!
//! Per invocation:
//! 1. Extract: source -> A (stage 0)
//! 2. `loop_count` times: A -> B (stage 1), copy B -> A
//! 3. Bind the untouched source as `final_texture`
//! 4. Composite: A -> B (stage 2)
//! 5. Copy B -> source
//!
//! A and B are scratch targets that never outlive the invocation.

use super::settings::VolumetricLightSettings;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{EffectError, EffectResult};
use crate::resources::{FilterProgram, FilterStage, ProgramDescriptor, ProgramError};

/// Label used for logging and debug markers
pub const RENDER_TAG: &str = "Volumetric Light";

/// Texture binding through which the composite stage reads the original image
pub const FINAL_TEXTURE_BINDING: &str = "final_texture";

const PRIMARY_TARGET_LABEL: &str = "volumetric_light_a";
const SECONDARY_TARGET_LABEL: &str = "volumetric_light_b";

/// Progress of a single invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Allocated,
    Extracted,
    Blurring(u32),
    Composited,
    WrittenBack,
    Aborted,
}

/// The two scratch targets of one invocation
///
/// Dropping the guard releases both targets and clears the invocation's
/// bindings, whichever way the invocation ends.
struct ScratchTargets<'a, C: FilterContext + ?Sized> {
    ctx: &'a mut C,
    primary: TextureHandle,
    secondary: TextureHandle,
}

impl<'a, C: FilterContext + ?Sized> ScratchTargets<'a, C> {
    fn acquire(ctx: &'a mut C, source: &TextureDescriptor) -> BackendResult<Self> {
        let primary = ctx.acquire_scratch(&source.scratch(PRIMARY_TARGET_LABEL))?;
        let secondary = match ctx.acquire_scratch(&source.scratch(SECONDARY_TARGET_LABEL)) {
            Ok(handle) => handle,
            Err(err) => {
                ctx.release_scratch(primary);
                return Err(err);
            }
        };

        Ok(Self {
            ctx,
            primary,
            secondary,
        })
    }

    fn blit(
        &mut self,
        program: &FilterProgram,
        stage: FilterStage,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> EffectResult<()> {
        self.ctx
            .blit(program, stage, src, dst)
            .map_err(|source| EffectError::FilterInvocationFailure { stage, source })
    }

    fn copy(
        &mut self,
        stage: FilterStage,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> EffectResult<()> {
        self.ctx
            .copy(src, dst)
            .map_err(|source| EffectError::FilterInvocationFailure { stage, source })
    }
}

impl<C: FilterContext + ?Sized> Drop for ScratchTargets<'_, C> {
    fn drop(&mut self) {
        self.ctx.release_scratch(self.secondary);
        self.ctx.release_scratch(self.primary);
        self.ctx.clear_bindings();
    }
}

/// Volumetric light pass
///
/// Owns the filter program for its whole lifetime. When the program fails to
/// build, the pass is disabled for good and every `execute` is a no-op.
#[derive(Debug)]
pub struct VolumetricLightPass {
    program: Option<FilterProgram>,
    setup_error: Option<ProgramError>,
    last_state: PassState,
}

impl VolumetricLightPass {
    pub fn new(descriptor: &ProgramDescriptor) -> Self {
        match FilterProgram::new(descriptor) {
            Ok(program) => Self::from_program(program),
            Err(err) => {
                log::error!("{}: {}", RENDER_TAG, EffectError::SetupFailure(err.clone()));
                Self {
                    program: None,
                    setup_error: Some(err),
                    last_state: PassState::Idle,
                }
            }
        }
    }

    pub fn from_program(program: FilterProgram) -> Self {
        Self {
            program: Some(program),
            setup_error: None,
            last_state: PassState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        RENDER_TAG
    }

    /// False when the program failed to build
    pub fn is_enabled(&self) -> bool {
        self.program.is_some()
    }

    pub fn program(&self) -> Option<&FilterProgram> {
        self.program.as_ref()
    }

    pub fn setup_error(&self) -> Option<&ProgramError> {
        self.setup_error.as_ref()
    }

    /// Terminal state of the most recent invocation that ran
    pub fn last_state(&self) -> PassState {
        self.last_state
    }

    /// Run the full filter sequence over `source`, writing the result back into it
    pub fn execute<C: FilterContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        source: TextureHandle,
        settings: &VolumetricLightSettings,
        post_processing_enabled: bool,
    ) -> EffectResult<()> {
        let Some(program) = self.program.as_ref() else {
            return Ok(());
        };
        if !post_processing_enabled {
            return Ok(());
        }

        let mut state = PassState::Idle;
        let result = Self::render(program, ctx, source, settings, &mut state);
        if result.is_err() {
            advance(&mut state, PassState::Aborted);
        }
        self.last_state = state;
        result
    }

    fn render<C: FilterContext + ?Sized>(
        program: &FilterProgram,
        ctx: &mut C,
        source: TextureHandle,
        settings: &VolumetricLightSettings,
        state: &mut PassState,
    ) -> EffectResult<()> {
        let source_desc = ctx
            .texture_descriptor(source)
            .ok_or(EffectError::AllocationFailure(BackendError::UnknownTexture(source)))?;

        let mut targets =
            ScratchTargets::acquire(ctx, &source_desc).map_err(EffectError::AllocationFailure)?;
        let (a, b) = (targets.primary, targets.secondary);
        advance(state, PassState::Allocated);

        for (name, value) in settings.filter_bindings() {
            targets.ctx.set_float(name, value);
        }

        targets.blit(program, FilterStage::Extract, source, a)?;
        advance(state, PassState::Extracted);

        for iteration in 0..settings.loop_count() {
            advance(state, PassState::Blurring(iteration));
            targets.blit(program, FilterStage::Blur, a, b)?;
            targets.copy(FilterStage::Blur, b, a)?;
        }

        // Bound here, not earlier: the composite must see the original image.
        targets.ctx.set_texture(FINAL_TEXTURE_BINDING, source);
        targets.blit(program, FilterStage::Composite, a, b)?;
        advance(state, PassState::Composited);

        targets.copy(FilterStage::Composite, b, source)?;
        advance(state, PassState::WrittenBack);

        Ok(())
    }
}

fn advance(state: &mut PassState, next: PassState) {
    log::trace!("{}: {:?} -> {:?}", RENDER_TAG, state, next);
    *state = next;
}

/// Reference program: radial light extraction, bilateral blur, additive composite
pub const VOLUMETRIC_LIGHT_SHADER: &str = r#"
struct VolumetricLightParams {
    step_time: f32,
    intensity: f32,
    space_sigma: f32,
    range_sigma: f32,
    kernel_size: f32,
}

@group(0) @binding(0) var source_texture: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;
@group(0) @binding(2) var<uniform> params: VolumetricLightParams;
@group(0) @binding(3) var final_texture: texture_2d<f32>;

const LIGHT_POSITION: vec2<f32> = vec2<f32>(0.5, 0.5);
const BRIGHT_THRESHOLD: f32 = 0.8;
const DECAY: f32 = 0.96;
const LUMA: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

fn bright_pass(color: vec3<f32>) -> vec3<f32> {
    let luminance = dot(color, LUMA);
    let weight = max(luminance - BRIGHT_THRESHOLD, 0.0) / max(luminance, 0.0001);
    return color * weight;
}

@fragment
fn fs_extract(input: VertexOutput) -> @location(0) vec4<f32> {
    let steps = i32(clamp(params.step_time, 1.0, 64.0));
    let delta = (input.uv - LIGHT_POSITION) / f32(steps);
    var uv: vec2<f32> = input.uv;
    var illumination: f32 = 1.0;
    var accumulated: vec3<f32> = vec3<f32>(0.0, 0.0, 0.0);
    for (var i: i32 = 0; i < steps; i = i + 1) {
        let tap = textureSampleLevel(source_texture, source_sampler, uv, 0.0).rgb;
        accumulated = accumulated + bright_pass(tap) * illumination;
        illumination = illumination * DECAY;
        uv = uv - delta;
    }
    return vec4<f32>(accumulated / f32(steps) * params.intensity, 1.0);
}

@fragment
fn fs_blur(input: VertexOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / vec2<f32>(textureDimensions(source_texture));
    let center = textureSampleLevel(source_texture, source_sampler, input.uv, 0.0);
    let radius = i32(ceil(params.kernel_size));
    let space_denominator = 2.0 * params.space_sigma * params.space_sigma;
    let range_denominator = 2.0 * params.range_sigma * params.range_sigma;
    var total: vec3<f32> = vec3<f32>(0.0, 0.0, 0.0);
    var weight_sum: f32 = 0.0;
    for (var y: i32 = -radius; y <= radius; y = y + 1) {
        for (var x: i32 = -radius; x <= radius; x = x + 1) {
            let offset = vec2<f32>(f32(x), f32(y));
            let tap = textureSampleLevel(source_texture, source_sampler, input.uv + offset * texel, 0.0).rgb;
            let difference = tap - center.rgb;
            let weight = exp(-dot(offset, offset) / space_denominator)
                * exp(-dot(difference, difference) / range_denominator);
            total = total + tap * weight;
            weight_sum = weight_sum + weight;
        }
    }
    return vec4<f32>(total / max(weight_sum, 0.0001), center.a);
}

@fragment
fn fs_composite(input: VertexOutput) -> @location(0) vec4<f32> {
    let light = textureSampleLevel(source_texture, source_sampler, input.uv, 0.0).rgb;
    let scene = textureSampleLevel(final_texture, source_sampler, input.uv, 0.0);
    return vec4<f32>(scene.rgb + light, scene.a);
}
"#;
