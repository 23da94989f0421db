//! Render targets and depth attachments.

use std::sync::Arc;

use crate::backend::GpuImage;
use crate::types::TextureFormat;

use super::{DepthCubeHandle, DepthTextureHandle};

/// A 2D depth target, optionally layered (cascade atlases).
#[derive(Debug, Clone)]
pub struct DepthRenderTexture {
    pub image: Arc<GpuImage>,
}

impl DepthRenderTexture {
    pub fn format(&self) -> TextureFormat {
        self.image.info().format
    }
}

/// A six-layer cube depth target for omnidirectional shadows.
#[derive(Debug, Clone)]
pub struct DepthCubeRenderTexture {
    pub image: Arc<GpuImage>,
}

impl DepthCubeRenderTexture {
    pub fn format(&self) -> TextureFormat {
        self.image.info().format
    }

    pub fn size(&self) -> u32 {
        self.image.info().width
    }
}

/// Where a render texture's depth comes from.
#[derive(Debug, Clone, Default)]
pub enum DepthAttachment {
    #[default]
    None,
    /// Created with and destroyed with the render texture.
    Owned(Arc<GpuImage>),
    /// A depth texture owned elsewhere, looked up when the target is bound.
    Depth(DepthTextureHandle),
    Cube(DepthCubeHandle),
}

impl DepthAttachment {
    pub fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn is_cube(&self) -> bool {
        matches!(self, Self::Cube(_))
    }
}

/// Color attachments plus an optional depth attachment.
#[derive(Debug, Clone)]
pub struct RenderTexture {
    pub colors: Vec<Arc<GpuImage>>,
    pub width: u32,
    pub height: u32,
    pub depth: DepthAttachment,
    /// Format of the depth attachment, owned or referenced.
    pub depth_format: Option<TextureFormat>,
}

impl RenderTexture {
    pub fn color_formats(&self) -> Vec<TextureFormat> {
        self.colors.iter().map(|image| image.info().format).collect()
    }

    /// Colors plus one for depth.
    pub fn attachment_count(&self) -> usize {
        self.colors.len() + usize::from(self.depth.is_some())
    }

    /// True for depth-only targets, which select the shadow pipelines.
    pub fn is_shadow_target(&self) -> bool {
        self.colors.is_empty() && self.depth.is_some()
    }
}
