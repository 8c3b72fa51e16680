//! Filter programs
//!
//! A filter program is a single WGSL module holding one fullscreen vertex
//! entry point and one fragment entry point per [`FilterStage`]. The module is
//! parsed and validated once, and its bindings are reflected so that filter
//! contexts can bind parameters by name.

use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Vertex entry point shared by every stage
pub const VERTEX_ENTRY_POINT: &str = "vs_main";

/// Texture binding that receives the blit source
pub const SOURCE_TEXTURE_BINDING: &str = "source_texture";

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Stage of a filter program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterStage {
    /// Stage 0: extract the light contribution from the source image
    Extract = 0,
    /// Stage 1: edge-aware blur
    Blur = 1,
    /// Stage 2: composite the blurred light over the original image
    Composite = 2,
}

impl FilterStage {
    pub const ALL: [FilterStage; 3] = [
        FilterStage::Extract,
        FilterStage::Blur,
        FilterStage::Composite,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(FilterStage::Extract),
            1 => Some(FilterStage::Blur),
            2 => Some(FilterStage::Composite),
            _ => None,
        }
    }

    /// Fragment entry point implementing this stage
    pub fn entry_point(self) -> &'static str {
        match self {
            FilterStage::Extract => "fs_extract",
            FilterStage::Blur => "fs_blur",
            FilterStage::Composite => "fs_composite",
        }
    }
}

impl std::fmt::Display for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.index(), self.entry_point())
    }
}

/// Identifies the program to load at setup time
#[derive(Debug, Clone, Default)]
pub struct ProgramDescriptor {
    pub label: Option<String>,
    /// WGSL source; `None` when the host has no program assigned
    pub source: Option<String>,
}

impl ProgramDescriptor {
    pub fn wgsl(label: &str, source: impl Into<String>) -> Self {
        Self {
            label: Some(label.to_string()),
            source: Some(source.into()),
        }
    }
}

/// Errors raised while building a [`FilterProgram`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("No program source assigned")]
    MissingSource,
    #[error("Failed to parse program: {0}")]
    Parse(String),
    #[error("Program failed validation: {0}")]
    Validation(String),
    #[error("Program is missing {stage} entry point `{name}`")]
    MissingEntryPoint { name: &'static str, stage: &'static str },
    #[error("Program does not declare the `{0}` texture binding")]
    MissingSourceBinding(&'static str),
    #[error("Binding `{name}` uses group {group}; only group 0 is supported")]
    UnsupportedGroup { name: String, group: u32 },
    #[error("Binding `{0}` has an unsupported type")]
    UnsupportedBinding(String),
}

/// Scalar member of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    pub offset: u32,
}

/// Kind of resource behind a program binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    Texture,
    Sampler,
    /// Uniform block; only `f32` members are addressable by name
    Uniform { size: u32, members: Vec<UniformMember> },
}

/// Reflected resource binding of a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinding {
    pub name: String,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Validated filter program
///
/// Read-only after construction; safe to share across sequential invocations.
#[derive(Debug)]
pub struct FilterProgram {
    id: u64,
    label: String,
    source: String,
    bindings: Vec<ProgramBinding>,
}

impl FilterProgram {
    pub fn new(descriptor: &ProgramDescriptor) -> Result<Self, ProgramError> {
        let source = descriptor
            .source
            .as_deref()
            .filter(|source| !source.trim().is_empty())
            .ok_or(ProgramError::MissingSource)?;

        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| ProgramError::Parse(e.emit_to_string(source)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| ProgramError::Validation(e.to_string()))?;

        Self::check_entry_point(&module, VERTEX_ENTRY_POINT, naga::ShaderStage::Vertex)?;
        for stage in FilterStage::ALL {
            Self::check_entry_point(&module, stage.entry_point(), naga::ShaderStage::Fragment)?;
        }

        let bindings = Self::reflect_bindings(&module)?;
        if !bindings
            .iter()
            .any(|b| b.name == SOURCE_TEXTURE_BINDING && b.kind == BindingKind::Texture)
        {
            return Err(ProgramError::MissingSourceBinding(SOURCE_TEXTURE_BINDING));
        }

        let label = descriptor
            .label
            .clone()
            .unwrap_or_else(|| "filter program".to_string());
        log::debug!("Filter program '{}' ready with {} bindings", label, bindings.len());

        Ok(Self {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            label,
            source: source.to_string(),
            bindings,
        })
    }

    fn check_entry_point(
        module: &naga::Module,
        name: &'static str,
        stage: naga::ShaderStage,
    ) -> Result<(), ProgramError> {
        let found = module
            .entry_points
            .iter()
            .any(|ep| ep.name == name && ep.stage == stage);
        if found {
            Ok(())
        } else {
            Err(ProgramError::MissingEntryPoint {
                name,
                stage: match stage {
                    naga::ShaderStage::Vertex => "vertex",
                    naga::ShaderStage::Fragment => "fragment",
                    naga::ShaderStage::Compute => "compute",
                },
            })
        }
    }

    fn reflect_bindings(module: &naga::Module) -> Result<Vec<ProgramBinding>, ProgramError> {
        let mut bindings = Vec::new();

        for (_, global) in module.global_variables.iter() {
            let Some(resource) = &global.binding else {
                continue;
            };
            let name = global.name.clone().unwrap_or_default();
            if resource.group != 0 {
                return Err(ProgramError::UnsupportedGroup {
                    name,
                    group: resource.group,
                });
            }

            let kind = match (global.space, &module.types[global.ty].inner) {
                (naga::AddressSpace::Uniform, naga::TypeInner::Struct { members, span }) => {
                    BindingKind::Uniform {
                        size: *span,
                        members: members
                            .iter()
                            .filter(|m| is_f32(&module.types[m.ty].inner))
                            .filter_map(|m| {
                                Some(UniformMember {
                                    name: m.name.clone()?,
                                    offset: m.offset,
                                })
                            })
                            .collect(),
                    }
                }
                (naga::AddressSpace::Uniform, inner) if is_f32(inner) => BindingKind::Uniform {
                    size: 4,
                    members: vec![UniformMember {
                        name: name.clone(),
                        offset: 0,
                    }],
                },
                (naga::AddressSpace::Handle, naga::TypeInner::Image { .. }) => BindingKind::Texture,
                (naga::AddressSpace::Handle, naga::TypeInner::Sampler { .. }) => BindingKind::Sampler,
                _ => return Err(ProgramError::UnsupportedBinding(name)),
            };

            bindings.push(ProgramBinding {
                name,
                binding: resource.binding,
                kind,
            });
        }

        bindings.sort_by_key(|b| b.binding);
        Ok(bindings)
    }

    /// Process-unique identifier, used to key pipeline caches
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bindings(&self) -> &[ProgramBinding] {
        &self.bindings
    }

    /// Names of all scalar parameters the program reads
    pub fn scalar_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().flat_map(|b| match &b.kind {
            BindingKind::Uniform { members, .. } => {
                members.iter().map(|m| m.name.as_str()).collect::<Vec<_>>()
            }
            _ => Vec::new(),
        })
    }

    /// Names of all texture bindings, including the blit source
    pub fn texture_names(&self) -> impl Iterator<Item = &str> {
        self.bindings
            .iter()
            .filter(|b| b.kind == BindingKind::Texture)
            .map(|b| b.name.as_str())
    }
}

fn is_f32(inner: &naga::TypeInner) -> bool {
    matches!(
        inner,
        naga::TypeInner::Scalar(naga::Scalar {
            kind: naga::ScalarKind::Float,
            width: 4,
        })
    )
}

/// Program whose every stage copies its source unchanged
pub const IDENTITY_FILTER_SHADER: &str = r#"
@group(0) @binding(0) var source_texture: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

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

@fragment
fn fs_extract(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(source_texture, source_sampler, input.uv, 0.0);
}

@fragment
fn fs_blur(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(source_texture, source_sampler, input.uv, 0.0);
}

@fragment
fn fs_composite(input: VertexOutput) -> @location(0) vec4<f32> {
    return textureSampleLevel(source_texture, source_sampler, input.uv, 0.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::postprocess::VOLUMETRIC_LIGHT_SHADER;

    #[test]
    fn identity_program_builds() {
        let program =
            FilterProgram::new(&ProgramDescriptor::wgsl("identity", IDENTITY_FILTER_SHADER))
                .unwrap();
        assert_eq!(program.label(), "identity");
        assert_eq!(program.bindings().len(), 2);
        assert_eq!(program.texture_names().collect::<Vec<_>>(), vec!["source_texture"]);
        assert_eq!(program.scalar_names().count(), 0);
    }

    #[test]
    fn volumetric_light_program_reflects_parameters() {
        let program =
            FilterProgram::new(&ProgramDescriptor::wgsl("volume light", VOLUMETRIC_LIGHT_SHADER))
                .unwrap();

        let scalars: Vec<_> = program.scalar_names().collect();
        assert_eq!(
            scalars,
            vec!["step_time", "intensity", "space_sigma", "range_sigma", "kernel_size"]
        );

        let textures: Vec<_> = program.texture_names().collect();
        assert_eq!(textures, vec!["source_texture", "final_texture"]);

        let uniform = program
            .bindings()
            .iter()
            .find_map(|b| match &b.kind {
                BindingKind::Uniform { size, members } => Some((*size, members.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(uniform.0, 20);
        assert_eq!(uniform.1[4].offset, 16);
    }

    #[test]
    fn missing_source_is_rejected() {
        let err = FilterProgram::new(&ProgramDescriptor::default()).unwrap_err();
        assert_eq!(err, ProgramError::MissingSource);

        let blank = ProgramDescriptor::wgsl("blank", "   \n");
        assert_eq!(FilterProgram::new(&blank).unwrap_err(), ProgramError::MissingSource);
    }

    #[test]
    fn syntax_errors_are_rejected() {
        let err = FilterProgram::new(&ProgramDescriptor::wgsl("broken", "fn fs_extract( {"))
            .unwrap_err();
        assert!(matches!(err, ProgramError::Parse(_)));
    }

    #[test]
    fn missing_stage_is_rejected() {
        let source = IDENTITY_FILTER_SHADER.replace("fn fs_composite", "fn fs_other");
        let err = FilterProgram::new(&ProgramDescriptor::wgsl("partial", source)).unwrap_err();
        assert_eq!(
            err,
            ProgramError::MissingEntryPoint {
                name: "fs_composite",
                stage: "fragment",
            }
        );
    }

    #[test]
    fn source_binding_is_required() {
        let source = IDENTITY_FILTER_SHADER.replace("source_texture", "main_texture");
        let err = FilterProgram::new(&ProgramDescriptor::wgsl("renamed", source)).unwrap_err();
        assert_eq!(err, ProgramError::MissingSourceBinding(SOURCE_TEXTURE_BINDING));
    }

    #[test]
    fn programs_get_distinct_ids() {
        let descriptor = ProgramDescriptor::wgsl("identity", IDENTITY_FILTER_SHADER);
        let a = FilterProgram::new(&descriptor).unwrap();
        let b = FilterProgram::new(&descriptor).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn stage_indices_are_stable() {
        for (index, stage) in FilterStage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), index as u32);
            assert_eq!(FilterStage::from_index(index as u32), Some(*stage));
        }
        assert_eq!(FilterStage::from_index(3), None);
    }
}
