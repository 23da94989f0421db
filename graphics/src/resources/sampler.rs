//! Texture samplers.

use std::sync::Arc;

use crate::backend::GpuSampler;
use crate::types::SamplerDescriptor;

/// A sampler and the descriptor it was created from.
#[derive(Debug, Clone)]
pub struct TextureSampler {
    pub sampler: Arc<GpuSampler>,
    pub descriptor: SamplerDescriptor,
}
