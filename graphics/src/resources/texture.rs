//! Sampled textures.

use std::sync::Arc;

use crate::backend::GpuImage;
use crate::types::TextureFormat;

use super::SamplerHandle;

/// Pixel data and shape for a new texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Tightly packed base level.
    pub pixels: Vec<u8>,
    /// Null uses the renderer's default sampler.
    pub sampler: SamplerHandle,
}

impl TextureData {
    pub fn new(width: u32, height: u32, format: TextureFormat, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            pixels,
            sampler: SamplerHandle::NULL,
        }
    }

    pub fn with_sampler(mut self, sampler: SamplerHandle) -> Self {
        self.sampler = sampler;
        self
    }

    pub(crate) fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.block_size() as usize
    }
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub image: Arc<GpuImage>,
    pub sampler: SamplerHandle,
}

impl Texture {
    pub fn width(&self) -> u32 {
        self.image.info().width
    }

    pub fn height(&self) -> u32 {
        self.image.info().height
    }

    pub fn mip_levels(&self) -> u32 {
        self.image.info().mip_levels
    }
}
