//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, render state and
//! descriptor structs used throughout the renderer.

mod buffer;
mod common;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage};
pub use common::{
    BlendMode, CullMode, DescriptorKind, LoadMode, PrimitiveTopology, ProgramFlags, RenderLayers,
    ScissorRect, ShaderStage, ShaderStageFlags, VertexFormat, VertexLayout, Viewport,
};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use texture::{ImageDescriptor, TextureFormat, TextureUsage, full_mip_chain};
