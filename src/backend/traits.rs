//! Core filter context abstraction
//!
//! The host supplies a [`FilterContext`] each frame. It is a command-style
//! execution context: operations are enqueued in call order and the context
//! decides when the work actually runs.

use crate::backend::types::*;
use crate::resources::{FilterProgram, FilterStage};
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Unknown texture handle {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("Texture size mismatch: {src:?} -> {dst:?}")]
    SizeMismatch { src: (u32, u32), dst: (u32, u32) },
    #[error("Copy rejected: {0}")]
    CopyRejected(String),
    #[error("Stage {stage} rejected the invocation: {reason}")]
    StageRejected { stage: FilterStage, reason: String },
    #[error("Failed to read back texture: {0}")]
    ReadbackFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a texture owned by a filter context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Execution context a filter program runs against
///
/// Bindings set through [`set_float`](FilterContext::set_float) and
/// [`set_texture`](FilterContext::set_texture) are scoped to the current
/// invocation and never stored on the program.
pub trait FilterContext {
    /// Descriptor of a texture known to this context
    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor>;

    /// Allocate a temporary render target
    fn acquire_scratch(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Release a temporary render target obtained from `acquire_scratch`
    fn release_scratch(&mut self, texture: TextureHandle);

    /// Bind a named scalar parameter
    fn set_float(&mut self, name: &str, value: f32);

    /// Bind a named texture
    fn set_texture(&mut self, name: &str, texture: TextureHandle);

    /// Drop all scalar and texture bindings
    fn clear_bindings(&mut self);

    /// Run one stage of `program` reading `src` and writing `dst`
    fn blit(
        &mut self,
        program: &FilterProgram,
        stage: FilterStage,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> BackendResult<()>;

    /// Copy `src` into `dst` without any filtering
    fn copy(&mut self, src: TextureHandle, dst: TextureHandle) -> BackendResult<()>;
}
