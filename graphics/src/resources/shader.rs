//! Shaders and their declared buffer inputs.

use std::sync::Arc;

use crate::backend::GpuShaderModule;
use crate::types::{DescriptorKind, ShaderStage};

/// What a shader input carries. The usage decides the descriptor kind and,
/// for engine-provided inputs, what the renderer binds there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderInputUsage {
    /// Camera view/projection uniform.
    Camera,
    /// Frame time uniform.
    Time,
    /// The program's own uniform blob.
    UserUniform,
    AmbientLight,
    DirectionalLight,
    PointLight,
    SpotLight,
    /// Model matrix push constant.
    Transform,
    /// UI color and rectangle push constant.
    Ui,
    /// Shadow light and split index push constant.
    ShadowLight,
    /// Per-instance model matrices for instanced draws.
    InstanceTransforms,
    /// Skinning matrices.
    BoneMatrices,
    /// 2D particle instances.
    Particles,
    /// Array of shadow maps, one element per split.
    ShadowMap,
    /// The image being post-processed.
    SourceTexture,
    /// A user texture slot.
    Texture(u8),
    /// A G-buffer color attachment.
    GBuffer(u8),
    GBufferDepth,
}

impl ShaderInputUsage {
    pub fn kind(self) -> DescriptorKind {
        match self {
            Self::Camera
            | Self::Time
            | Self::UserUniform
            | Self::AmbientLight
            | Self::DirectionalLight
            | Self::PointLight
            | Self::SpotLight => DescriptorKind::Uniform,
            Self::Transform | Self::Ui | Self::ShadowLight => DescriptorKind::PushConstant,
            Self::InstanceTransforms | Self::BoneMatrices | Self::Particles => {
                DescriptorKind::Storage
            }
            Self::ShadowMap
            | Self::SourceTexture
            | Self::Texture(_)
            | Self::GBuffer(_)
            | Self::GBufferDepth => DescriptorKind::Texture,
        }
    }

    /// Byte range of push-constant inputs inside the push block.
    pub fn push_constant_range(self) -> Option<(u32, u32)> {
        match self {
            Self::Transform => Some((0, 64)),
            Self::Ui => Some((64, 32)),
            Self::ShadowLight => Some((96, 16)),
            _ => None,
        }
    }
}

/// One declared input. Push constants ignore `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderBufferInput {
    pub usage: ShaderInputUsage,
    /// Descriptor set index.
    pub slot: u32,
}

impl ShaderBufferInput {
    pub fn new(usage: ShaderInputUsage, slot: u32) -> Self {
        Self { usage, slot }
    }

    pub fn push_constant(usage: ShaderInputUsage) -> Self {
        Self { usage, slot: 0 }
    }

    pub fn kind(&self) -> DescriptorKind {
        self.usage.kind()
    }
}

/// A compiled vertex or pixel shader.
#[derive(Debug, Clone)]
pub struct Shader {
    pub stage: ShaderStage,
    pub module: Arc<GpuShaderModule>,
    pub inputs: Vec<ShaderBufferInput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_kinds() {
        assert_eq!(ShaderInputUsage::Camera.kind(), DescriptorKind::Uniform);
        assert_eq!(ShaderInputUsage::Transform.kind(), DescriptorKind::PushConstant);
        assert_eq!(ShaderInputUsage::BoneMatrices.kind(), DescriptorKind::Storage);
        assert_eq!(ShaderInputUsage::GBuffer(2).kind(), DescriptorKind::Texture);
    }

    #[test]
    fn test_push_constant_ranges_do_not_overlap() {
        let ranges: Vec<(u32, u32)> = [
            ShaderInputUsage::Transform,
            ShaderInputUsage::Ui,
            ShaderInputUsage::ShadowLight,
        ]
        .iter()
        .filter_map(|usage| usage.push_constant_range())
        .collect();
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].0 + pair[0].1, pair[1].0);
        }
        assert!(ShaderInputUsage::Camera.push_constant_range().is_none());
    }
}
