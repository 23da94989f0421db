//! Renderer resources and their handles.
//!
//! Every resource lives in a [`LockedTable`](umbra_core::LockedTable) owned by
//! the [`Renderer`](crate::Renderer) and is referenced by a typed
//! [`Handle`]. Resources hold their GPU objects behind [`Arc`](std::sync::Arc)
//! so a recording thread can clone what it needs out of a table and release
//! the lock before touching the GPU.

mod camera;
mod light;
mod model;
mod render_texture;
mod renderers;
mod sampler;
mod shader;
mod texture;
mod video;

use umbra_core::Handle;

pub use camera::{CameraBuffer, CameraUniform, TimeUniform};
pub use light::{
    AmbientLight, AmbientLightUniform, Cascade, CascadeCamera, DirectionalLight,
    DirectionalLightUniform, PointLight, PointLightUniform, SHADOW_NEAR, SpotLight,
    SpotLightUniform, forward_axis,
};
pub use model::{Model, bounding_radius};
pub use render_texture::{
    DepthAttachment, DepthCubeRenderTexture, DepthRenderTexture, RenderTexture,
};
pub use renderers::{
    CanvasRenderer, MeshRenderBuffer, Particle, ParticleEmitter, SkinnedMeshRenderBuffer,
};
pub use sampler::TextureSampler;
pub use shader::{Shader, ShaderBufferInput, ShaderInputUsage};
pub use texture::{Texture, TextureData};
pub use video::VideoTexture;

use crate::program::RenderProgram;

pub type ShaderHandle = Handle<Shader>;
pub type ProgramHandle = Handle<RenderProgram>;
pub type ModelHandle = Handle<Model>;
pub type TextureHandle = Handle<Texture>;
pub type SamplerHandle = Handle<TextureSampler>;
pub type RenderTextureHandle = Handle<RenderTexture>;
pub type DepthTextureHandle = Handle<DepthRenderTexture>;
pub type DepthCubeHandle = Handle<DepthCubeRenderTexture>;
pub type AmbientLightHandle = Handle<AmbientLight>;
pub type DirectionalLightHandle = Handle<DirectionalLight>;
pub type PointLightHandle = Handle<PointLight>;
pub type SpotLightHandle = Handle<SpotLight>;
pub type CameraHandle = Handle<CameraBuffer>;
pub type MeshRendererHandle = Handle<MeshRenderBuffer>;
pub type SkinnedMeshRendererHandle = Handle<SkinnedMeshRenderBuffer>;
pub type ParticleEmitterHandle = Handle<ParticleEmitter>;
pub type CanvasHandle = Handle<CanvasRenderer>;
pub type VideoTextureHandle = Handle<VideoTexture>;
