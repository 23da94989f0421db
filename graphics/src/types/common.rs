//! Render state enums, flags and viewport types shared across the renderer.

use bitflags::bitflags;

use crate::error::GraphicsError;

/// Implements lossless `u32` conversion for a fieldless `#[repr(u32)]` enum.
macro_rules! u32_enum {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }

        impl TryFrom<u32> for $name {
            type Error = GraphicsError;

            fn try_from(value: u32) -> Result<Self, GraphicsError> {
                $(
                    if value == $name::$variant as u32 {
                        return Ok($name::$variant);
                    }
                )+
                Err(GraphicsError::InvalidParameter(format!(
                    "{} has no variant {}",
                    stringify!($name),
                    value
                )))
            }
        }
    };
}

/// Face culling mode.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None = 0,
    #[default]
    Back = 1,
    Front = 2,
}

u32_enum!(CullMode { None, Back, Front });

impl CullMode {
    /// The mode to use when the winding is mirrored (cube-face rendering).
    pub fn flipped(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Back => Self::Front,
            Self::Front => Self::Back,
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList = 0,
    TriangleStrip = 1,
    LineList = 2,
    PointList = 3,
}

u32_enum!(PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
    PointList
});

/// Blend mode of a material.
///
/// Opaque materials are drawn into the G-buffer by the draw pass; every
/// other mode is drawn by the forward pass.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque = 0,
    AlphaBlend = 1,
    Additive = 2,
    Multiply = 3,
}

u32_enum!(BlendMode {
    Opaque,
    AlphaBlend,
    Additive,
    Multiply
});

impl BlendMode {
    pub fn is_opaque(self) -> bool {
        self == Self::Opaque
    }
}

/// Vertex attribute layout of a material's geometry.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexLayout {
    /// No vertex input; positions are generated in the shader (full-screen quads).
    #[default]
    None = 0,
    /// `float3` position.
    Position = 1,
    /// `float3` position, `float3` normal, `float2` uv.
    PositionNormalUv = 2,
    /// [`PositionNormalUv`](Self::PositionNormalUv) plus `float4` tangent.
    PositionNormalUvTangent = 3,
    /// [`PositionNormalUv`](Self::PositionNormalUv) plus `uint4` joints and `float4` weights.
    Skinned = 4,
    /// `float2` position, `float2` uv, `unorm8x4` color.
    Ui = 5,
}

u32_enum!(VertexLayout {
    None,
    Position,
    PositionNormalUv,
    PositionNormalUvTangent,
    Skinned,
    Ui
});

/// Vertex attribute formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float2,
    Float3,
    Float4,
    Uint4,
    Unorm8x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 | Self::Uint4 => 16,
            Self::Unorm8x4 => 4,
        }
    }
}

impl VertexLayout {
    /// Attribute formats in location order.
    pub fn attributes(self) -> &'static [VertexFormat] {
        use VertexFormat::*;
        match self {
            Self::None => &[],
            Self::Position => &[Float3],
            Self::PositionNormalUv => &[Float3, Float3, Float2],
            Self::PositionNormalUvTangent => &[Float3, Float3, Float2, Float4],
            Self::Skinned => &[Float3, Float3, Float2, Uint4, Float4],
            Self::Ui => &[Float2, Float2, Unorm8x4],
        }
    }

    /// Tightly packed stride of the layout.
    pub fn packed_stride(self) -> u32 {
        self.attributes().iter().map(|a| a.size()).sum()
    }
}

/// How a render pass treats existing attachment contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadMode {
    /// Clear color and depth.
    #[default]
    Clear,
    /// Keep color and depth.
    NoClear,
    /// Clear color, keep depth.
    ColorClearOnly,
}

impl LoadMode {
    pub fn clears_color(self) -> bool {
        matches!(self, Self::Clear | Self::ColorClearOnly)
    }

    pub fn clears_depth(self) -> bool {
        matches!(self, Self::Clear)
    }
}

bitflags! {
    /// Render-layer mask. Cameras and lights only see materials whose mask
    /// intersects their own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderLayers: u32 {
        const DEFAULT = 1 << 0;
        const UI = 1 << 1;
        const ALL = u32::MAX;
    }
}

impl Default for RenderLayers {
    fn default() -> Self {
        Self::DEFAULT
    }
}

bitflags! {
    /// Render program flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProgramFlags: u32 {
        /// Destroy the program's shaders together with the program.
        const DESTROY_OWNED_SHADERS = 1 << 0;
        /// Skip this program in every shadow pass.
        const NO_SHADOW_CAST = 1 << 1;
        /// Disable depth testing.
        const NO_DEPTH_TEST = 1 << 2;
        /// Disable depth writes.
        const NO_DEPTH_WRITE = 1 << 3;
    }
}

bitflags! {
    /// Shader stages that can see a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const PIXEL = 1 << 1;
    }
}

/// Programmable pipeline stage of a shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    pub fn flags(self) -> ShaderStageFlags {
        match self {
            Self::Vertex => ShaderStageFlags::VERTEX,
            Self::Pixel => ShaderStageFlags::PIXEL,
        }
    }
}

/// Descriptor category of a shader input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Combined image and sampler.
    Texture,
    Uniform,
    Storage,
    /// Written with push constants instead of a descriptor set.
    PushConstant,
}

/// Viewport in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Scissor rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Scissor rectangle covering the viewport.
    pub fn scissor(&self) -> ScissorRect {
        ScissorRect {
            x: self.x.max(0.0) as i32,
            y: self.y.max(0.0) as i32,
            width: self.width.max(0.0) as u32,
            height: self.height.max(0.0) as u32,
        }
    }
}
