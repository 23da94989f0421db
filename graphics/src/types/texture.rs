//! Image formats, usage flags and descriptors.

use bitflags::bitflags;

/// Texture format enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    R8Unorm,
    R32Float,
    Rg16Float,
    #[default]
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Depth16Unorm,
    Depth24PlusStencil8,
    Depth32Float,
}

impl TextureFormat {
    /// Returns true if this is a depth or stencil format.
    pub fn is_depth_stencil(&self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth24PlusStencil8 | Self::Depth32Float
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }

    /// Bytes per pixel.
    pub fn block_size(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Depth16Unorm => 2,
            Self::R32Float
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth24PlusStencil8
            | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const COLOR_ATTACHMENT = 1 << 3;
        const DEPTH_ATTACHMENT = 1 << 4;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::SAMPLED | Self::COPY_DST
    }
}

/// Descriptor for creating a GPU image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Array layers; 6 for cube maps.
    pub layers: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    /// Create a cube-compatible image. Requires `layers == 6`.
    pub cube: bool,
}

impl ImageDescriptor {
    /// A sampled 2D image.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            width,
            height,
            layers: 1,
            mip_levels: 1,
            format,
            usage: TextureUsage::default(),
            cube: false,
        }
    }

    /// A color attachment that can also be sampled and blitted.
    pub fn color_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            usage: TextureUsage::COLOR_ATTACHMENT
                | TextureUsage::SAMPLED
                | TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST,
            ..Self::new_2d(width, height, format)
        }
    }

    /// A sampled depth attachment with `layers` array layers.
    pub fn depth_target(width: u32, height: u32, format: TextureFormat, layers: u32) -> Self {
        Self {
            layers,
            usage: TextureUsage::DEPTH_ATTACHMENT | TextureUsage::SAMPLED,
            ..Self::new_2d(width, height, format)
        }
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    pub fn with_cube(mut self) -> Self {
        self.layers = 6;
        self.cube = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Bytes of the base mip level across all layers.
    pub fn base_level_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.layers as u64
            * self.format.block_size() as u64
    }
}

/// Number of mip levels in a full chain for the given size.
pub fn full_mip_chain(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(TextureFormat::Depth32Float.is_depth_stencil());
        assert!(!TextureFormat::Rgba16Float.is_depth_stencil());
        assert!(TextureFormat::Depth24PlusStencil8.has_stencil());
    }

    #[test]
    fn test_mip_chain() {
        assert_eq!(full_mip_chain(1, 1), 1);
        assert_eq!(full_mip_chain(256, 128), 9);
        assert_eq!(full_mip_chain(300, 2), 9);
    }

    #[test]
    fn test_cube_descriptor() {
        let desc = ImageDescriptor::depth_target(512, 512, TextureFormat::Depth32Float, 1).with_cube();
        assert_eq!(desc.layers, 6);
        assert!(desc.cube);
        assert_eq!(desc.base_level_size(), 512 * 512 * 6 * 4);
    }
}
