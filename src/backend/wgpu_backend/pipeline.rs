use super::WgpuFilterContext;
use crate::backend::types::TextureFormat;
use crate::resources::{BindingKind, FilterProgram, FilterStage, VERTEX_ENTRY_POINT};

/// Cache key: one pipeline per program, stage and target format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    program: u64,
    stage: FilterStage,
    format: TextureFormat,
}

impl PipelineKey {
    pub(super) fn new(program: &FilterProgram, stage: FilterStage, format: TextureFormat) -> Self {
        Self {
            program: program.id(),
            stage,
            format,
        }
    }
}

pub(super) struct FilterPipeline {
    pub(super) layout: wgpu::BindGroupLayout,
    pub(super) pipeline: wgpu::RenderPipeline,
}

/// Bind group layout entries mirroring the program's reflected bindings
///
/// Non-filterable targets get non-filtering texture and sampler slots.
fn layout_entries(program: &FilterProgram, filterable: bool) -> Vec<wgpu::BindGroupLayoutEntry> {
    program
        .bindings()
        .iter()
        .map(|binding| {
            let ty = match &binding.kind {
                BindingKind::Texture => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                BindingKind::Sampler => wgpu::BindingType::Sampler(if filterable {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                BindingKind::Uniform { size, .. } => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: std::num::NonZeroU64::new(*size as u64),
                },
            };

            wgpu::BindGroupLayoutEntry {
                binding: binding.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty,
                count: None,
            }
        })
        .collect()
}

pub(super) fn create_filter_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    program: &FilterProgram,
    stage: FilterStage,
    format: TextureFormat,
) -> FilterPipeline {
    let entries = layout_entries(program, format.is_filterable());
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(program.label()),
        entries: &entries,
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(program.label()),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let targets = [Some(wgpu::ColorTargetState {
        format: WgpuFilterContext::convert_texture_format(format),
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })];

    let label = format!("{} {}", program.label(), stage.entry_point());
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: VERTEX_ENTRY_POINT,
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: stage.entry_point(),
            targets: &targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        // Full-screen triangle generated from the vertex index
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    });

    FilterPipeline { layout, pipeline }
}
