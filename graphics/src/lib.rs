//! # Umbra Graphics
//!
//! Core of a real-time deferred renderer. The embedder creates resources
//! through handles on an explicit [`Renderer`] and calls
//! [`Renderer::update`] once per frame to get the ordered command buffers
//! to submit.
//!
//! ## Overview
//!
//! - [`Renderer`] - owns every resource table, cache and per-frame pool
//! - [`PipelineCache`] - pipelines memoized per (target, program)
//! - [`PushDescriptorPool`] - per-frame descriptor sets that grow on demand
//! - [`RenderStacks`] - draw instances batched by program and model
//! - [`RenderCommand`] - records one pass into one command buffer
//! - [`passes`] - the seven passes recorded for every camera
//! - Backends: Vulkan (feature `vulkan-backend`) and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use umbra_graphics::{HookRegistry, Renderer, RendererConfig, SceneInterfaces};
//!
//! let renderer = Renderer::create(
//!     RendererConfig::default(),
//!     SceneInterfaces::default(),
//!     HookRegistry::new(),
//! )?;
//! let frame = renderer.update(delta, time, frame_index)?;
//! submit(frame.native_handles());
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod deletion;
pub mod descriptors;
pub mod error;
pub mod passes;
pub mod pipeline;
pub mod program;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod stack;
pub mod types;

// Re-export main types for convenience
pub use backend::{DummyBackend, GpuBackend, create_backend};
pub use command::{CommandState, CommandStats, LightRef, RenderCommand};
pub use config::{DepthBias, HookBinding, RendererConfig};
pub use descriptors::PushDescriptorPool;
pub use error::GraphicsError;
pub use passes::{HookRegistry, LightPrograms, PassContext, PassKind};
pub use pipeline::{PipelineCache, PipelineVariant, pipeline_key};
pub use program::{RenderProgramDesc, RenderProgramRecord};
pub use renderer::{
    CommandLabel, FrameCommandBuffer, FrameOutput, RenderTextureDepth, Renderer,
};
pub use scene::{PresentTarget, SceneInterfaces, TransformId, TransformStore};
pub use stack::RenderStacks;
pub use umbra_core::{Handle, HandleError};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy Backend");
    }
}
