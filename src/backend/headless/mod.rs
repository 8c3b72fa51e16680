//! Headless filter context
//!
//! Runs filter stages on the CPU over `image` buffers instead of a GPU. Every
//! operation is recorded as a [`FilterCommand`], and allocation or stage
//! failures can be injected, which makes this the context of choice for tests
//! and offline tools.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{FilterProgram, FilterStage};
use image::Rgba32FImage;
use std::collections::HashMap;

/// Operation recorded by [`HeadlessContext`]
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCommand {
    AcquireScratch {
        texture: TextureHandle,
        desc: TextureDescriptor,
    },
    ReleaseScratch(TextureHandle),
    SetFloat {
        name: String,
        value: f32,
    },
    SetTexture {
        name: String,
        texture: TextureHandle,
    },
    ClearBindings,
    Blit {
        stage: FilterStage,
        src: TextureHandle,
        dst: TextureHandle,
    },
    Copy {
        src: TextureHandle,
        dst: TextureHandle,
    },
}

impl FilterCommand {
    /// Blits and copies, the operations that move pixels
    pub fn is_buffer_operation(&self) -> bool {
        matches!(self, FilterCommand::Blit { .. } | FilterCommand::Copy { .. })
    }
}

/// Everything a stage kernel can read
pub struct StageInput<'a> {
    pub stage: FilterStage,
    pub source: &'a Rgba32FImage,
    floats: &'a HashMap<String, f32>,
    textures: HashMap<&'a str, &'a Rgba32FImage>,
}

impl<'a> StageInput<'a> {
    pub fn float(&self, name: &str) -> Option<f32> {
        self.floats.get(name).copied()
    }

    pub fn texture(&self, name: &str) -> Option<&'a Rgba32FImage> {
        self.textures.get(name).copied()
    }
}

/// CPU implementation of one filter stage
pub trait StageKernel: Send {
    /// Produce the stage output; it must match the destination size
    fn apply(&self, input: &StageInput<'_>) -> BackendResult<Rgba32FImage>;
}

/// Kernel that passes its source through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKernel;

impl StageKernel for IdentityKernel {
    fn apply(&self, input: &StageInput<'_>) -> BackendResult<Rgba32FImage> {
        Ok(input.source.clone())
    }
}

struct HeadlessTexture {
    desc: TextureDescriptor,
    pixels: Rgba32FImage,
    scratch: bool,
}

/// CPU filter context with an operation log and fault injection
pub struct HeadlessContext {
    textures: HashMap<u64, HeadlessTexture>,
    next_texture_id: u64,

    // Invocation-scoped bindings
    floats: HashMap<String, f32>,
    bound_textures: HashMap<String, TextureHandle>,

    /// Stages without a kernel behave like `IdentityKernel`
    kernels: HashMap<FilterStage, Box<dyn StageKernel>>,

    commands: Vec<FilterCommand>,
    acquired: usize,
    released: usize,

    // Fault injection
    allocation_budget: Option<usize>,
    copy_budget: Option<usize>,
    failing_stage: Option<FilterStage>,
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            next_texture_id: 1,
            floats: HashMap::new(),
            bound_textures: HashMap::new(),
            kernels: HashMap::new(),
            commands: Vec::new(),
            acquired: 0,
            released: 0,
            allocation_budget: None,
            copy_budget: None,
            failing_stage: None,
        }
    }

    /// Replace the kernel used for `stage`
    pub fn set_kernel(&mut self, stage: FilterStage, kernel: Box<dyn StageKernel>) {
        self.kernels.insert(stage, kernel);
    }

    pub fn with_kernel<K: StageKernel + 'static>(mut self, stage: FilterStage, kernel: K) -> Self {
        self.set_kernel(stage, Box::new(kernel));
        self
    }

    /// Create a host-owned texture filled with transparent black
    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> TextureHandle {
        let pixels = Rgba32FImage::new(desc.width, desc.height);
        self.insert(desc.clone(), pixels, false)
    }

    /// Register host-owned pixels under a new handle
    pub fn insert_image(&mut self, pixels: Rgba32FImage, format: TextureFormat) -> TextureHandle {
        let (width, height) = pixels.dimensions();
        let desc = TextureDescriptor::new_2d(width, height, format, TextureUsage::FILTER_TARGET);
        self.insert(desc, pixels, false)
    }

    fn insert(&mut self, desc: TextureDescriptor, pixels: Rgba32FImage, scratch: bool) -> TextureHandle {
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            HeadlessTexture {
                desc,
                pixels,
                scratch,
            },
        );
        TextureHandle(id)
    }

    /// Pixels of a texture
    pub fn image(&self, texture: TextureHandle) -> Option<&Rgba32FImage> {
        self.textures.get(&texture.0).map(|t| &t.pixels)
    }

    /// Every recorded operation, in call order
    pub fn commands(&self) -> &[FilterCommand] {
        &self.commands
    }

    /// Recorded blits and copies, in call order
    pub fn buffer_operations(&self) -> Vec<&FilterCommand> {
        self.commands
            .iter()
            .filter(|command| command.is_buffer_operation())
            .collect()
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired
    }

    pub fn released_count(&self) -> usize {
        self.released
    }

    /// Scratch targets currently alive
    pub fn live_scratch_count(&self) -> usize {
        self.textures.values().filter(|t| t.scratch).count()
    }

    /// Number of blits recorded for `stage`
    pub fn stage_invocations(&self, stage: FilterStage) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, FilterCommand::Blit { stage: s, .. } if *s == stage))
            .count()
    }

    /// Let `count` more scratch allocations succeed, then fail every one after
    pub fn fail_allocations_after(&mut self, count: usize) {
        self.allocation_budget = Some(count);
    }

    /// Let `count` more copies succeed, then reject every one after
    pub fn fail_copies_after(&mut self, count: usize) {
        self.copy_budget = Some(count);
    }

    /// Reject every blit of `stage`
    pub fn fail_stage(&mut self, stage: FilterStage) {
        self.failing_stage = Some(stage);
    }

    pub fn clear_faults(&mut self) {
        self.allocation_budget = None;
        self.copy_budget = None;
        self.failing_stage = None;
    }

    fn texture(&self, handle: TextureHandle) -> BackendResult<&HeadlessTexture> {
        self.textures
            .get(&handle.0)
            .ok_or(BackendError::UnknownTexture(handle))
    }

    fn texture_mut(&mut self, handle: TextureHandle) -> BackendResult<&mut HeadlessTexture> {
        self.textures
            .get_mut(&handle.0)
            .ok_or(BackendError::UnknownTexture(handle))
    }

    fn run_kernel(
        &self,
        stage: FilterStage,
        src: TextureHandle,
    ) -> BackendResult<Rgba32FImage> {
        let source = &self.texture(src)?.pixels;

        let mut textures = HashMap::new();
        for (name, handle) in &self.bound_textures {
            textures.insert(name.as_str(), &self.texture(*handle)?.pixels);
        }

        let input = StageInput {
            stage,
            source,
            floats: &self.floats,
            textures,
        };

        match self.kernels.get(&stage) {
            Some(kernel) => kernel.apply(&input),
            None => IdentityKernel.apply(&input),
        }
    }
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterContext for HeadlessContext {
    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| t.desc.clone())
    }

    fn acquire_scratch(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if let Some(budget) = self.allocation_budget.as_mut() {
            if *budget == 0 {
                log::trace!("HeadlessContext: allocation of {:?} refused", desc.label);
                return Err(BackendError::OutOfMemory);
            }
            *budget -= 1;
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }

        log::trace!(
            "HeadlessContext: acquiring scratch {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let pixels = Rgba32FImage::new(desc.width, desc.height);
        let texture = self.insert(desc.clone(), pixels, true);
        self.acquired += 1;
        self.commands.push(FilterCommand::AcquireScratch {
            texture,
            desc: desc.clone(),
        });
        Ok(texture)
    }

    fn release_scratch(&mut self, texture: TextureHandle) {
        match self.textures.get(&texture.0) {
            Some(t) if t.scratch => {
                self.textures.remove(&texture.0);
                self.released += 1;
                self.commands.push(FilterCommand::ReleaseScratch(texture));
            }
            _ => log::warn!("HeadlessContext: {:?} is not a live scratch target", texture),
        }
    }

    fn set_float(&mut self, name: &str, value: f32) {
        self.floats.insert(name.to_string(), value);
        self.commands.push(FilterCommand::SetFloat {
            name: name.to_string(),
            value,
        });
    }

    fn set_texture(&mut self, name: &str, texture: TextureHandle) {
        self.bound_textures.insert(name.to_string(), texture);
        self.commands.push(FilterCommand::SetTexture {
            name: name.to_string(),
            texture,
        });
    }

    fn clear_bindings(&mut self) {
        self.floats.clear();
        self.bound_textures.clear();
        self.commands.push(FilterCommand::ClearBindings);
    }

    fn blit(
        &mut self,
        program: &FilterProgram,
        stage: FilterStage,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> BackendResult<()> {
        let reject = |reason: String| BackendError::StageRejected { stage, reason };
        if self.failing_stage == Some(stage) {
            return Err(reject("injected failure".to_string()));
        }
        if src == dst {
            return Err(reject("source and destination are the same texture".to_string()));
        }
        if !self.texture(src)?.desc.usage.contains(TextureUsage::TEXTURE_BINDING) {
            return Err(reject(format!("{:?} cannot be sampled", src)));
        }
        if !self.texture(dst)?.desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(reject(format!("{:?} cannot be rendered to", dst)));
        }

        log::trace!(
            "HeadlessContext: '{}' stage {} {:?} -> {:?}",
            program.label(),
            stage,
            src,
            dst
        );
        let output = self.run_kernel(stage, src)?;

        let target = self.texture_mut(dst)?;
        if output.dimensions() != target.desc.size() {
            return Err(BackendError::SizeMismatch {
                src: output.dimensions(),
                dst: target.desc.size(),
            });
        }
        target.pixels = output;

        self.commands.push(FilterCommand::Blit { stage, src, dst });
        Ok(())
    }

    fn copy(&mut self, src: TextureHandle, dst: TextureHandle) -> BackendResult<()> {
        if src == dst {
            return Err(BackendError::CopyRejected(format!("{:?} copied onto itself", src)));
        }
        let source = self.texture(src)?;
        let target = self.texture(dst)?;
        if source.desc.size() != target.desc.size() {
            return Err(BackendError::SizeMismatch {
                src: source.desc.size(),
                dst: target.desc.size(),
            });
        }
        if source.desc.format != target.desc.format {
            return Err(BackendError::CopyRejected(format!(
                "{:?} -> {:?}",
                source.desc.format, target.desc.format
            )));
        }
        if !source.desc.usage.contains(TextureUsage::COPY_SRC) {
            return Err(BackendError::CopyRejected(format!("{:?} lacks COPY_SRC", src)));
        }
        if !target.desc.usage.contains(TextureUsage::COPY_DST) {
            return Err(BackendError::CopyRejected(format!("{:?} lacks COPY_DST", dst)));
        }
        let pixels = source.pixels.clone();

        if let Some(budget) = self.copy_budget.as_mut() {
            if *budget == 0 {
                log::trace!("HeadlessContext: copy {:?} -> {:?} refused", src, dst);
                return Err(BackendError::CopyRejected("injected failure".to_string()));
            }
            *budget -= 1;
        }

        self.texture_mut(dst)?.pixels = pixels;
        self.commands.push(FilterCommand::Copy { src, dst });
        Ok(())
    }
}
