//! Interfaces to the systems the renderer consumes but does not own.
//!
//! The renderer never evaluates transforms, animates skeletons, lays out UI
//! or decodes video itself. It queries these collaborators through the
//! traits below while recording a frame, from worker threads, so every
//! implementation must be `Send + Sync`:
//!
//! - [`TransformResolver`] - global matrices of scene transforms
//! - [`SkeletonProvider`] - bone hierarchies of skinned instances
//! - [`UiTree`] - laid-out elements of a UI canvas
//! - [`VideoFrameSource`] - decoded RGBA frames of a video texture
//!
//! [`TransformStore`] is a minimal in-memory [`TransformResolver`] used by
//! tests and simple embedders.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec4};
use parking_lot::RwLock;
use umbra_core::math::Rect;

use crate::resources::TextureHandle;
use crate::types::TextureFormat;

/// Identifier of a transform owned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformId(pub u32);

impl TransformId {
    pub const NULL: Self = Self(u32::MAX);

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }
}

impl Default for TransformId {
    fn default() -> Self {
        Self::NULL
    }
}

/// Identifier of a skeleton owned by the animation system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SkeletonId(pub u32);

/// Identifier of a canvas in the UI tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanvasId(pub u32);

/// Resolves scene transforms to world-space matrices.
pub trait TransformResolver: Send + Sync {
    /// Global (world) matrix, or `None` if the transform no longer exists.
    fn global_matrix(&self, transform: TransformId) -> Option<Mat4>;
}

/// One bone of a skeleton. Parents precede children only by convention;
/// the renderer follows `parent` links wherever they point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bone {
    /// Transform relative to the parent bone.
    pub local: Mat4,
    pub parent: Option<u16>,
    pub inverse_bind: Mat4,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Skeleton {
    /// Skinning matrices: each bone's chain of parent transforms times its
    /// inverse bind pose.
    ///
    /// A broken parent link ends the chain at that bone. Cycles are cut
    /// after visiting every bone once.
    pub fn skinning_matrices(&self) -> Vec<Mat4> {
        self.bones
            .iter()
            .map(|bone| {
                let mut matrix = bone.local;
                let mut parent = bone.parent;
                let mut steps = 0;
                while let Some(index) = parent {
                    let Some(parent_bone) = self.bones.get(index as usize) else {
                        log::error!("bone parent {} out of range", index);
                        break;
                    };
                    steps += 1;
                    if steps > self.bones.len() {
                        log::error!("cycle in skeleton bone hierarchy");
                        break;
                    }
                    matrix = parent_bone.local * matrix;
                    parent = parent_bone.parent;
                }
                matrix * bone.inverse_bind
            })
            .collect()
    }
}

/// Supplies evaluated skeletons for skinned instances.
pub trait SkeletonProvider: Send + Sync {
    fn skeleton(&self, skeleton: SkeletonId) -> Option<Arc<Skeleton>>;
}

/// A laid-out UI quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UiElement {
    /// Normalized rectangle inside the canvas target.
    pub rect: Rect,
    pub color: Vec4,
    /// Null draws an untextured quad.
    pub texture: TextureHandle,
}

/// Supplies the laid-out elements of UI canvases, back to front.
pub trait UiTree: Send + Sync {
    fn canvas_elements(&self, canvas: CanvasId) -> Vec<UiElement>;
}

/// A decoded video frame in tightly packed RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Produces frames for a video texture.
pub trait VideoFrameSource: Send {
    /// The next frame to display, or `None` if the image should not change.
    fn next_frame(&mut self) -> Option<VideoFrame>;
}

/// The image presentation renders into when a target handle is null.
#[derive(Debug, Clone)]
pub struct PresentTarget {
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    /// The image for the frame being recorded. `None` until the embedder
    /// acquires one; passes that would write it are skipped.
    pub image: Option<Arc<crate::backend::GpuImage>>,
}

impl Default for PresentTarget {
    fn default() -> Self {
        Self {
            format: TextureFormat::Bgra8UnormSrgb,
            width: 1,
            height: 1,
            image: None,
        }
    }
}

/// In-memory transform storage.
#[derive(Debug, Default)]
pub struct TransformStore {
    matrices: RwLock<HashMap<TransformId, Mat4>>,
}

impl TransformStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, transform: TransformId, matrix: Mat4) {
        self.matrices.write().insert(transform, matrix);
    }

    pub fn remove(&self, transform: TransformId) {
        self.matrices.write().remove(&transform);
    }
}

impl TransformResolver for TransformStore {
    fn global_matrix(&self, transform: TransformId) -> Option<Mat4> {
        self.matrices.read().get(&transform).copied()
    }
}

/// Stand-in for absent collaborators: no skeletons, empty canvases.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyScene;

impl SkeletonProvider for EmptyScene {
    fn skeleton(&self, _skeleton: SkeletonId) -> Option<Arc<Skeleton>> {
        None
    }
}

impl UiTree for EmptyScene {
    fn canvas_elements(&self, _canvas: CanvasId) -> Vec<UiElement> {
        Vec::new()
    }
}

/// The collaborators a renderer is built with.
#[derive(Clone)]
pub struct SceneInterfaces {
    pub transforms: Arc<dyn TransformResolver>,
    pub skeletons: Arc<dyn SkeletonProvider>,
    pub ui: Arc<dyn UiTree>,
}

impl SceneInterfaces {
    pub fn new(transforms: Arc<dyn TransformResolver>) -> Self {
        Self {
            transforms,
            skeletons: Arc::new(EmptyScene),
            ui: Arc::new(EmptyScene),
        }
    }

    pub fn with_skeletons(mut self, skeletons: Arc<dyn SkeletonProvider>) -> Self {
        self.skeletons = skeletons;
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiTree>) -> Self {
        self.ui = ui;
        self
    }
}

impl Default for SceneInterfaces {
    fn default() -> Self {
        Self::new(Arc::new(TransformStore::new()))
    }
}

impl std::fmt::Debug for SceneInterfaces {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneInterfaces").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn bone(offset: Vec3, parent: Option<u16>) -> Bone {
        Bone {
            local: Mat4::from_translation(offset),
            parent,
            inverse_bind: Mat4::IDENTITY,
        }
    }

    #[test]
    fn test_skinning_walks_parent_chain() {
        let skeleton = Skeleton {
            bones: vec![
                bone(Vec3::X, None),
                bone(Vec3::Y, Some(0)),
                bone(Vec3::Z, Some(1)),
            ],
        };
        let matrices = skeleton.skinning_matrices();
        assert_eq!(matrices.len(), 3);
        let tip = matrices[2].transform_point3(Vec3::ZERO);
        assert!((tip - Vec3::new(1.0, 1.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_skinning_applies_inverse_bind() {
        let mut root = bone(Vec3::X, None);
        root.inverse_bind = Mat4::from_translation(-Vec3::X);
        let skeleton = Skeleton { bones: vec![root] };
        assert!(skeleton.skinning_matrices()[0].abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn test_skinning_survives_cycles() {
        let skeleton = Skeleton {
            bones: vec![bone(Vec3::X, Some(1)), bone(Vec3::Y, Some(0))],
        };
        assert_eq!(skeleton.skinning_matrices().len(), 2);
    }

    #[test]
    fn test_transform_store() {
        let store = TransformStore::new();
        let id = TransformId(4);
        assert!(store.global_matrix(id).is_none());
        store.set(id, Mat4::from_translation(Vec3::ONE));
        assert!(store.global_matrix(id).is_some());
        store.remove(id);
        assert!(store.global_matrix(id).is_none());
    }
}
