//! wgpu filter context
//!
//! Offscreen implementation of [`FilterContext`]. Blits and copies are encoded
//! into a single command encoder in call order and submitted on
//! [`flush`](WgpuFilterContext::flush) or before a readback.

mod pipeline;
mod texels;

use self::pipeline::{FilterPipeline, PipelineKey};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{BindingKind, FilterProgram, FilterStage, SOURCE_TEXTURE_BINDING};
use image::Rgba32FImage;
use std::collections::HashMap;
use wgpu::util::DeviceExt;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
    scratch: bool,
}

/// wgpu filter context
pub struct WgpuFilterContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,

    // Resource storage
    textures: HashMap<u64, GpuTexture>,
    next_texture_id: u64,
    shaders: HashMap<u64, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineKey, FilterPipeline>,

    filtering_sampler: wgpu::Sampler,
    non_filtering_sampler: wgpu::Sampler,
    /// Bound to texture slots the current invocation left unset
    #[allow(dead_code)]
    fallback_texture: wgpu::Texture,
    fallback_view: wgpu::TextureView,

    // Invocation-scoped bindings
    floats: HashMap<String, f32>,
    bound_textures: HashMap<String, TextureHandle>,

    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuFilterContext {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }

    fn create_sampler(device: &wgpu::Device, desc: &SamplerDescriptor) -> wgpu::Sampler {
        device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::convert_address_mode(desc.address_mode_u),
            address_mode_v: Self::convert_address_mode(desc.address_mode_v),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: Self::convert_filter_mode(desc.mag_filter),
            min_filter: Self::convert_filter_mode(desc.min_filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        })
    }
}

impl WgpuFilterContext {
    /// Create a context on the best available adapter
    pub async fn new_async() -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Volumetric Light Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        Ok(Self::from_device(device, queue, adapter_info))
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    /// Wrap a device owned by the host renderer
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, adapter_info: wgpu::AdapterInfo) -> Self {
        let filtering_sampler = Self::create_sampler(
            &device,
            &SamplerDescriptor {
                label: Some("filter_linear".into()),
                ..Default::default()
            },
        );
        let non_filtering_sampler = Self::create_sampler(
            &device,
            &SamplerDescriptor {
                label: Some("filter_nearest".into()),
                mag_filter: FilterMode::Nearest,
                min_filter: FilterMode::Nearest,
                ..Default::default()
            },
        );

        let fallback_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("filter_fallback"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let fallback_view = fallback_texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            device,
            queue,
            adapter_info,
            textures: HashMap::new(),
            next_texture_id: 1,
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
            filtering_sampler,
            non_filtering_sampler,
            fallback_texture,
            fallback_view,
            floats: HashMap::new(),
            bound_textures: HashMap::new(),
            encoder: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Create a host-owned texture, such as a camera color target
    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.allocate(desc, false)
    }

    /// Create a host-owned texture holding `pixels`
    pub fn upload_image(
        &mut self,
        pixels: &Rgba32FImage,
        format: TextureFormat,
    ) -> BackendResult<TextureHandle> {
        let (width, height) = pixels.dimensions();
        let desc = TextureDescriptor::new_2d(width, height, format, TextureUsage::FILTER_TARGET);
        let texture = self.create_texture(&desc)?;
        self.write_image(texture, pixels)?;
        Ok(texture)
    }

    pub fn write_image(&mut self, texture: TextureHandle, pixels: &Rgba32FImage) -> BackendResult<()> {
        let tex = lookup(&self.textures, texture)?;
        if pixels.dimensions() != tex.desc.size() {
            return Err(BackendError::SizeMismatch {
                src: pixels.dimensions(),
                dst: tex.desc.size(),
            });
        }

        let data = texels::encode(pixels, tex.desc.format)?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(tex.desc.width * tex.desc.format.bytes_per_pixel()),
                rows_per_image: Some(tex.desc.height),
            },
            extent(&tex.desc),
        );
        Ok(())
    }

    /// Submit pending work and read `texture` back to the host
    pub fn read_image(&mut self, texture: TextureHandle) -> BackendResult<Rgba32FImage> {
        self.flush();

        let tex = lookup(&self.textures, texture)?;
        let (width, height) = tex.desc.size();
        let unpadded_row = width * tex.desc.format.bytes_per_pixel();
        let padded_row = unpadded_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent(&tex.desc),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let image = {
            let data = slice.get_mapped_range();
            texels::decode(&data, width, height, padded_row, tex.desc.format)
        };
        staging.unmap();
        image
    }

    /// Submit every operation encoded so far
    pub fn flush(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    /// Drop a host-owned texture
    pub fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn allocate(&mut self, desc: &TextureDescriptor, scratch: bool) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} is outside 1..={}",
                desc.width, desc.height, max
            )));
        }
        if desc.format.is_depth() {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} cannot hold filter output",
                desc.format
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: extent(desc),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            return Err(BackendError::OutOfMemory);
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: desc.clone(),
                scratch,
            },
        );

        Ok(TextureHandle(id))
    }

    /// Build (or fetch) the pipeline for one stage rendering into `format`
    fn ensure_pipeline(
        &mut self,
        program: &FilterProgram,
        stage: FilterStage,
        format: TextureFormat,
    ) -> BackendResult<PipelineKey> {
        let key = PipelineKey::new(program, stage, format);
        if self.pipelines.contains_key(&key) {
            return Ok(key);
        }

        if !self.shaders.contains_key(&program.id()) {
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = self
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(program.label()),
                    source: wgpu::ShaderSource::Wgsl(program.source().into()),
                });
            if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
                return Err(BackendError::PipelineCreationFailed(err.to_string()));
            }
            self.shaders.insert(program.id(), module);
        }
        let module = self
            .shaders
            .get(&program.id())
            .ok_or_else(|| BackendError::PipelineCreationFailed("Shader module not found".into()))?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = pipeline::create_filter_pipeline(&self.device, module, program, stage, format);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::PipelineCreationFailed(err.to_string()));
        }

        log::debug!("Created '{}' pipeline for stage {} ({:?})", program.label(), stage, format);
        self.pipelines.insert(key, pipeline);
        Ok(key)
    }
}

fn lookup(textures: &HashMap<u64, GpuTexture>, handle: TextureHandle) -> BackendResult<&GpuTexture> {
    textures
        .get(&handle.0)
        .ok_or(BackendError::UnknownTexture(handle))
}

fn extent(desc: &TextureDescriptor) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: desc.width,
        height: desc.height,
        depth_or_array_layers: 1,
    }
}

/// Lay out scalar bindings at the offsets reflected from the uniform block
///
/// The buffer is padded to a multiple of 16 bytes.
fn pack_uniform(size: u32, members: &[crate::resources::UniformMember], floats: &HashMap<String, f32>) -> Vec<f32> {
    let mut words = vec![0.0f32; (size as usize).div_ceil(16) * 4];
    for member in members {
        if let Some(value) = floats.get(&member.name) {
            words[member.offset as usize / 4] = *value;
        }
    }
    words
}

impl FilterContext for WgpuFilterContext {
    fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| t.desc.clone())
    }

    fn acquire_scratch(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.allocate(desc, true)
    }

    fn release_scratch(&mut self, texture: TextureHandle) {
        match self.textures.get(&texture.0) {
            // Encoded commands keep the wgpu texture alive until they complete
            Some(t) if t.scratch => {
                self.textures.remove(&texture.0);
            }
            _ => log::warn!("WgpuFilterContext: {:?} is not a live scratch target", texture),
        }
    }

    fn set_float(&mut self, name: &str, value: f32) {
        self.floats.insert(name.to_string(), value);
    }

    fn set_texture(&mut self, name: &str, texture: TextureHandle) {
        self.bound_textures.insert(name.to_string(), texture);
    }

    fn clear_bindings(&mut self) {
        self.floats.clear();
        self.bound_textures.clear();
    }

    fn blit(
        &mut self,
        program: &FilterProgram,
        stage: FilterStage,
        src: TextureHandle,
        dst: TextureHandle,
    ) -> BackendResult<()> {
        let reject = |reason: String| BackendError::StageRejected { stage, reason };
        if src == dst {
            return Err(reject("source and destination are the same texture".into()));
        }

        let (src_desc, dst_desc) = {
            let source = lookup(&self.textures, src)?;
            let target = lookup(&self.textures, dst)?;
            (source.desc.clone(), target.desc.clone())
        };
        // Render pass errors only surface when the encoder is finished
        if !src_desc.usage.contains(TextureUsage::TEXTURE_BINDING) {
            return Err(reject(format!("{:?} cannot be sampled", src)));
        }
        if !dst_desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(reject(format!("{:?} cannot be rendered to", dst)));
        }
        let src_size = src_desc.size();
        if src_size != dst_desc.size() {
            return Err(BackendError::SizeMismatch {
                src: src_size,
                dst: dst_desc.size(),
            });
        }

        let key = self.ensure_pipeline(program, stage, dst_desc.format)?;
        let pipeline = self
            .pipelines
            .get(&key)
            .ok_or_else(|| reject("pipeline not found".into()))?;
        let target = lookup(&self.textures, dst)?;

        let sampler = if dst_desc.format.is_filterable() {
            &self.filtering_sampler
        } else {
            &self.non_filtering_sampler
        };

        let mut uniforms = Vec::new();
        for binding in program.bindings() {
            if let BindingKind::Uniform { size, members } = &binding.kind {
                let words = pack_uniform(*size, members, &self.floats);
                let buffer = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(&binding.name),
                        contents: bytemuck::cast_slice(&words),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                uniforms.push((binding.binding, buffer));
            }
        }

        let mut entries = Vec::with_capacity(program.bindings().len());
        for binding in program.bindings() {
            let resource = match &binding.kind {
                BindingKind::Texture if binding.name == SOURCE_TEXTURE_BINDING => {
                    wgpu::BindingResource::TextureView(&lookup(&self.textures, src)?.view)
                }
                BindingKind::Texture => match self.bound_textures.get(&binding.name) {
                    Some(&bound) if bound == dst => {
                        return Err(reject(format!("`{}` is also the destination", binding.name)));
                    }
                    Some(&bound) => wgpu::BindingResource::TextureView(&lookup(&self.textures, bound)?.view),
                    None => wgpu::BindingResource::TextureView(&self.fallback_view),
                },
                BindingKind::Sampler => wgpu::BindingResource::Sampler(sampler),
                BindingKind::Uniform { .. } => uniforms
                    .iter()
                    .find(|(slot, _)| *slot == binding.binding)
                    .map(|(_, buffer)| buffer.as_entire_binding())
                    .ok_or_else(|| reject(format!("no buffer for `{}`", binding.name)))?,
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding.binding,
                resource,
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.label()),
            layout: &pipeline.layout,
            entries: &entries,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(reject(err.to_string()));
        }

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Filter Encoder"),
            })
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(stage.entry_point()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipeline.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        Ok(())
    }

    fn copy(&mut self, src: TextureHandle, dst: TextureHandle) -> BackendResult<()> {
        if src == dst {
            return Err(BackendError::CopyRejected(format!("{:?} copied onto itself", src)));
        }
        let source = lookup(&self.textures, src)?;
        let target = lookup(&self.textures, dst)?;
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
        // Copy errors only surface when the encoder is finished
        if !source.desc.usage.contains(TextureUsage::COPY_SRC) {
            return Err(BackendError::CopyRejected(format!("{:?} lacks COPY_SRC", src)));
        }
        if !target.desc.usage.contains(TextureUsage::COPY_DST) {
            return Err(BackendError::CopyRejected(format!("{:?} lacks COPY_DST", dst)));
        }

        let device = &self.device;
        let encoder = self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Filter Encoder"),
            })
        });
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent(&source.desc),
        );

        Ok(())
    }
}
