//! Common types shared between filter contexts

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// Whether a linear sampler may read this format without extra device features
    pub fn is_filterable(&self) -> bool {
        !matches!(self, TextureFormat::Rgba32Float) && !self.is_depth()
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const STORAGE_BINDING: Self = Self(1 << 3);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    /// Everything a scratch target is used for during one invocation
    pub const SCRATCH: Self = Self((1 << 0) | (1 << 1) | (1 << 2) | (1 << 4));

    /// A camera target the filter chain reads from and writes back into
    pub const FILTER_TARGET: Self = Self((1 << 0) | (1 << 1) | (1 << 2) | (1 << 4));

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture descriptor
///
/// `depth_format` describes a depth attachment that travels with a camera
/// color target. Scratch targets never carry one.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            depth_format: None,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

impl TextureDescriptor {
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            width,
            height,
            format,
            depth_format: None,
            usage,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_depth(mut self, depth_format: TextureFormat) -> Self {
        self.depth_format = Some(depth_format);
        self
    }

    /// Descriptor for a scratch target matching this one: same size and color
    /// format, depth stripped.
    pub fn scratch(&self, label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            width: self.width,
            height: self.height,
            format: self.format,
            depth_format: None,
            usage: TextureUsage::SCRATCH,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_strips_depth_and_keeps_size() {
        let desc = TextureDescriptor::new_2d(
            640,
            360,
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_ATTACHMENT,
        )
        .with_label("camera_color")
        .with_depth(TextureFormat::Depth32Float);

        let scratch = desc.scratch("Temp1");
        assert_eq!(scratch.size(), (640, 360));
        assert_eq!(scratch.format, TextureFormat::Rgba16Float);
        assert_eq!(scratch.depth_format, None);
        assert_eq!(scratch.label.as_deref(), Some("Temp1"));
        assert!(scratch.usage.contains(TextureUsage::RENDER_ATTACHMENT));
        assert!(scratch.usage.contains(TextureUsage::COPY_SRC | TextureUsage::COPY_DST));
    }

    #[test]
    fn depth_formats_are_not_filterable() {
        assert!(TextureFormat::Depth32Float.is_depth());
        assert!(!TextureFormat::Depth32Float.is_filterable());
        assert!(!TextureFormat::Rgba32Float.is_filterable());
        assert!(TextureFormat::Rgba16Float.is_filterable());
    }
}
