//! Scene-facing renderers: meshes, particles and UI canvases.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::scene::{CanvasId, SkeletonId, TransformId};
use crate::types::RenderLayers;

use super::{ModelHandle, ProgramHandle, RenderTextureHandle};

/// A model drawn with a program at a transform.
///
/// `attached` mirrors membership in the program's render stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRenderBuffer {
    pub program: ProgramHandle,
    pub model: ModelHandle,
    pub transform: TransformId,
    pub attached: bool,
}

impl MeshRenderBuffer {
    pub fn new(program: ProgramHandle, model: ModelHandle, transform: TransformId) -> Self {
        Self {
            program,
            model,
            transform,
            attached: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkinnedMeshRenderBuffer {
    pub program: ProgramHandle,
    pub model: ModelHandle,
    pub transform: TransformId,
    pub skeleton: SkeletonId,
    pub attached: bool,
}

impl SkinnedMeshRenderBuffer {
    pub fn new(
        program: ProgramHandle,
        model: ModelHandle,
        transform: TransformId,
        skeleton: SkeletonId,
    ) -> Self {
        Self {
            program,
            model,
            transform,
            skeleton,
            attached: false,
        }
    }
}

/// One camera-facing particle quad.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Particle {
    /// Position relative to the emitter transform.
    pub position: Vec3,
    pub size: f32,
    pub color: Vec4,
}

static_assertions::const_assert_eq!(std::mem::size_of::<Particle>(), 32);

/// CPU-simulated particles, drawn as instanced quads in the forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleEmitter {
    pub program: ProgramHandle,
    pub transform: TransformId,
    pub render_layers: RenderLayers,
    pub particles: Vec<Particle>,
    pub active: bool,
}

impl ParticleEmitter {
    pub fn new(program: ProgramHandle, transform: TransformId) -> Self {
        Self {
            program,
            transform,
            render_layers: RenderLayers::ALL,
            particles: Vec::new(),
            active: true,
        }
    }
}

/// Draws a UI canvas into a render texture, or the presentation target when
/// `target` is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasRenderer {
    pub target: RenderTextureHandle,
    pub program: ProgramHandle,
    pub canvas: CanvasId,
    pub active: bool,
}

impl CanvasRenderer {
    pub fn new(program: ProgramHandle, canvas: CanvasId) -> Self {
        Self {
            target: RenderTextureHandle::NULL,
            program,
            canvas,
            active: true,
        }
    }
}
