//! Material render stacks: draw instances grouped by program, then model.
//!
//! Every attached mesh renderer contributes one instance to the stack of its
//! program. Inside a stack, instances are bucketed by model so a bucket is
//! drawn with a single vertex/index binding, and as a single instanced draw
//! when the program reads per-instance transforms from storage. Plain and
//! skinned instances live in two parallel bucket lists.
//!
//! Stacks only hold handles. A stack disappears with its last instance.

use glam::Mat4;
use umbra_core::SpinRwLock;
use umbra_core::math::{self, Frustum};

use crate::command::RenderCommand;
use crate::error::GraphicsError;
use crate::program::RenderProgram;
use crate::resources::{
    MeshRendererHandle, ModelHandle, ProgramHandle, ShaderInputUsage, SkinnedMeshRendererHandle,
};
use crate::scene::{SkeletonId, TransformId};
use crate::types::RenderLayers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshInstance {
    pub renderer: MeshRendererHandle,
    pub transform: TransformId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkinnedInstance {
    pub renderer: SkinnedMeshRendererHandle,
    pub transform: TransformId,
    pub skeleton: SkeletonId,
}

/// Instances of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBucket<I> {
    pub model: ModelHandle,
    pub instances: Vec<I>,
}

fn bucket_insert<I>(buckets: &mut Vec<ModelBucket<I>>, model: ModelHandle, instance: I) {
    match buckets.iter_mut().find(|bucket| bucket.model == model) {
        Some(bucket) => bucket.instances.push(instance),
        None => buckets.push(ModelBucket {
            model,
            instances: vec![instance],
        }),
    }
}

fn bucket_remove<I>(
    buckets: &mut Vec<ModelBucket<I>>,
    model: ModelHandle,
    matches: impl Fn(&I) -> bool,
) -> bool {
    let Some(index) = buckets.iter().position(|bucket| bucket.model == model) else {
        return false;
    };
    let bucket = &mut buckets[index];
    let Some(position) = bucket.instances.iter().position(matches) else {
        return false;
    };
    bucket.instances.swap_remove(position);
    if bucket.instances.is_empty() {
        buckets.swap_remove(index);
    }
    true
}

/// All instances drawn with one program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialRenderStack {
    pub program: ProgramHandle,
    pub meshes: Vec<ModelBucket<MeshInstance>>,
    pub skinned: Vec<ModelBucket<SkinnedInstance>>,
}

impl MaterialRenderStack {
    fn new(program: ProgramHandle) -> Self {
        Self {
            program,
            meshes: Vec::new(),
            skinned: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.skinned.is_empty()
    }

    pub fn instance_count(&self) -> usize {
        let meshes: usize = self.meshes.iter().map(|b| b.instances.len()).sum();
        let skinned: usize = self.skinned.iter().map(|b| b.instances.len()).sum();
        meshes + skinned
    }
}

/// The live render stacks, shared by every recording worker.
#[derive(Debug, Default)]
pub struct RenderStacks {
    stacks: SpinRwLock<Vec<MaterialRenderStack>>,
}

impl RenderStacks {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_with(&self, program: ProgramHandle, f: impl FnOnce(&mut MaterialRenderStack)) {
        let mut stacks = self.stacks.write();
        let index = match stacks.iter().position(|stack| stack.program == program) {
            Some(index) => index,
            None => {
                log::debug!("Creating render stack for program {:?}", program);
                stacks.push(MaterialRenderStack::new(program));
                stacks.len() - 1
            }
        };
        f(&mut stacks[index]);
    }

    fn remove_with(
        &self,
        program: ProgramHandle,
        f: impl FnOnce(&mut MaterialRenderStack) -> bool,
    ) -> bool {
        let mut stacks = self.stacks.write();
        let Some(index) = stacks.iter().position(|stack| stack.program == program) else {
            return false;
        };
        let removed = f(&mut stacks[index]);
        if stacks[index].is_empty() {
            log::debug!("Destroying empty render stack of program {:?}", program);
            stacks.swap_remove(index);
        }
        removed
    }

    pub fn insert_mesh(&self, program: ProgramHandle, model: ModelHandle, instance: MeshInstance) {
        self.insert_with(program, |stack| {
            bucket_insert(&mut stack.meshes, model, instance)
        });
    }

    pub fn remove_mesh(
        &self,
        program: ProgramHandle,
        model: ModelHandle,
        renderer: MeshRendererHandle,
    ) -> bool {
        self.remove_with(program, |stack| {
            bucket_remove(&mut stack.meshes, model, |i| i.renderer == renderer)
        })
    }

    pub fn insert_skinned(
        &self,
        program: ProgramHandle,
        model: ModelHandle,
        instance: SkinnedInstance,
    ) {
        self.insert_with(program, |stack| {
            bucket_insert(&mut stack.skinned, model, instance)
        });
    }

    pub fn remove_skinned(
        &self,
        program: ProgramHandle,
        model: ModelHandle,
        renderer: SkinnedMeshRendererHandle,
    ) -> bool {
        self.remove_with(program, |stack| {
            bucket_remove(&mut stack.skinned, model, |i| i.renderer == renderer)
        })
    }

    /// Drop the whole stack of `program`, returning it.
    pub fn remove_program(&self, program: ProgramHandle) -> Option<MaterialRenderStack> {
        let mut stacks = self.stacks.write();
        let index = stacks.iter().position(|stack| stack.program == program)?;
        Some(stacks.swap_remove(index))
    }

    pub fn contains(&self, program: ProgramHandle) -> bool {
        self.stacks.read().iter().any(|stack| stack.program == program)
    }

    pub fn instance_count(&self, program: ProgramHandle) -> usize {
        self.stacks
            .read()
            .iter()
            .find(|stack| stack.program == program)
            .map_or(0, MaterialRenderStack::instance_count)
    }

    pub fn len(&self) -> usize {
        self.stacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.read().is_empty()
    }

    /// Copy of the stacks, so drawing does not hold the lock while recording.
    pub fn snapshot(&self) -> Vec<MaterialRenderStack> {
        self.stacks.read().clone()
    }
}

/// Which stacks a pass draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPass {
    /// Opaque programs into the G-buffer.
    Opaque,
    /// Blended programs into the light target.
    Forward,
    /// Every shadow caster, opaque or not.
    Shadow,
}

impl StackPass {
    pub fn accepts(self, program: &RenderProgram) -> bool {
        match self {
            Self::Opaque => program.blend_mode().is_opaque(),
            Self::Forward => !program.blend_mode().is_opaque(),
            Self::Shadow => program.casts_shadows(),
        }
    }
}

/// Selection and culling parameters for [`draw_stacks`].
#[derive(Debug, Clone, Copy)]
pub struct StackFilter {
    /// Mask of the camera or light the pass renders for.
    pub layers: RenderLayers,
    pub pass: StackPass,
    pub frustum: Frustum,
    /// Shadow light index and split, pushed after every material bind.
    pub shadow_light: Option<(u32, u32)>,
}

/// World matrices of the instances whose bounding sphere intersects the
/// frustum. Returns the matrices and the number culled.
fn visible_instances<I>(
    cmd: &RenderCommand<'_>,
    instances: &[I],
    transform: impl Fn(&I) -> TransformId,
    radius: f32,
    frustum: &Frustum,
) -> (Vec<(usize, Mat4)>, u32) {
    let renderer = cmd.renderer();
    let mut culled = 0;
    let visible = instances
        .iter()
        .enumerate()
        .filter_map(|(index, instance)| {
            let Some(world) = renderer.world(transform(instance)) else {
                log::debug!("Skipping instance with unresolved transform");
                return None;
            };
            let (center, scaled) = math::instance_sphere(&world, radius);
            if frustum.intersects_sphere(center, scaled) {
                Some((index, world))
            } else {
                culled += 1;
                None
            }
        })
        .collect();
    (visible, culled)
}

/// Draw every stack `filter` selects into the command's bound target.
///
/// Instances outside the frustum are dropped before any GPU state changes;
/// a stack without visible instances never binds its material.
pub fn draw_stacks(
    cmd: &mut RenderCommand<'_>,
    stacks: &RenderStacks,
    filter: &StackFilter,
) -> Result<(), GraphicsError> {
    let renderer = cmd.renderer();
    for stack in stacks.snapshot() {
        let selected = renderer
            .programs
            .with(stack.program, |program| {
                program.render_layers().intersects(filter.layers) && filter.pass.accepts(program)
            })
            .unwrap_or(false);
        if !selected {
            continue;
        }

        let mut material_bound = false;
        let mut bind = |cmd: &mut RenderCommand<'_>| -> Result<bool, GraphicsError> {
            if material_bound {
                return Ok(true);
            }
            if !cmd.bind_material(stack.program)? {
                return Ok(false);
            }
            if let Some((light, split)) = filter.shadow_light {
                cmd.update_shadow_light(light, split);
            }
            material_bound = true;
            Ok(true)
        };

        for bucket in &stack.meshes {
            let Some(model) = renderer.models.get_cloned(bucket.model) else {
                continue;
            };
            let (visible, culled) = visible_instances(
                cmd,
                &bucket.instances,
                |instance| instance.transform,
                model.radius,
                &filter.frustum,
            );
            cmd.record_culled(culled);
            if visible.is_empty() || !bind(cmd)? {
                continue;
            }

            if cmd.declares(ShaderInputUsage::InstanceTransforms) {
                let matrices: Vec<Mat4> = visible.iter().map(|(_, world)| *world).collect();
                cmd.push_storage(
                    ShaderInputUsage::InstanceTransforms,
                    bytemuck::cast_slice(&matrices),
                )?;
                cmd.draw_model_instanced(&model, matrices.len() as u32);
            } else {
                for (_, world) in &visible {
                    cmd.draw_model_matrix(world, &model);
                }
            }
        }

        for bucket in &stack.skinned {
            let Some(model) = renderer.models.get_cloned(bucket.model) else {
                continue;
            };
            let (visible, culled) = visible_instances(
                cmd,
                &bucket.instances,
                |instance| instance.transform,
                model.radius,
                &filter.frustum,
            );
            cmd.record_culled(culled);
            if visible.is_empty() || !bind(cmd)? {
                continue;
            }

            for (index, world) in &visible {
                let instance = bucket.instances[*index];
                let Some(skeleton) = renderer.scene.skeletons.skeleton(instance.skeleton) else {
                    log::warn!(
                        "Skeleton {:?} of skinned renderer {:?} is unavailable",
                        instance.skeleton,
                        instance.renderer
                    );
                    continue;
                };
                let bones = skeleton.skinning_matrices();
                cmd.push_storage(ShaderInputUsage::BoneMatrices, bytemuck::cast_slice(&bones))?;
                cmd.draw_model_matrix(world, &model);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(renderer: u32, transform: u32) -> MeshInstance {
        MeshInstance {
            renderer: MeshRendererHandle::from_raw(renderer),
            transform: TransformId(transform),
        }
    }

    #[test]
    fn test_insert_groups_by_program_and_model() {
        let stacks = RenderStacks::new();
        let program = ProgramHandle::from_raw(0);
        let a = ModelHandle::from_raw(0);
        let b = ModelHandle::from_raw(1);
        stacks.insert_mesh(program, a, mesh(0, 0));
        stacks.insert_mesh(program, a, mesh(1, 1));
        stacks.insert_mesh(program, b, mesh(2, 2));
        stacks.insert_mesh(ProgramHandle::from_raw(1), a, mesh(3, 3));

        assert_eq!(stacks.len(), 2);
        let snapshot = stacks.snapshot();
        let first = snapshot.iter().find(|s| s.program == program).unwrap();
        assert_eq!(first.meshes.len(), 2);
        assert_eq!(first.meshes[0].instances.len(), 2);
        assert_eq!(stacks.instance_count(program), 3);
    }

    #[test]
    fn test_stack_destroyed_with_last_instance() {
        let stacks = RenderStacks::new();
        let program = ProgramHandle::from_raw(4);
        let model = ModelHandle::from_raw(0);
        stacks.insert_mesh(program, model, mesh(0, 0));
        stacks.insert_skinned(
            program,
            model,
            SkinnedInstance {
                renderer: SkinnedMeshRendererHandle::from_raw(0),
                transform: TransformId(1),
                skeleton: SkeletonId(0),
            },
        );

        assert!(stacks.remove_mesh(program, model, MeshRendererHandle::from_raw(0)));
        assert!(stacks.contains(program));
        assert!(stacks.remove_skinned(program, model, SkinnedMeshRendererHandle::from_raw(0)));
        assert!(!stacks.contains(program));
        assert!(stacks.is_empty());
    }

    #[test]
    fn test_remove_unknown_instance() {
        let stacks = RenderStacks::new();
        let program = ProgramHandle::from_raw(0);
        let model = ModelHandle::from_raw(0);
        stacks.insert_mesh(program, model, mesh(0, 0));
        assert!(!stacks.remove_mesh(program, model, MeshRendererHandle::from_raw(9)));
        assert!(!stacks.remove_mesh(program, ModelHandle::from_raw(5), MeshRendererHandle::from_raw(0)));
        assert!(!stacks.remove_mesh(ProgramHandle::from_raw(3), model, MeshRendererHandle::from_raw(0)));
        assert_eq!(stacks.instance_count(program), 1);
    }

    #[test]
    fn test_remove_program_returns_stack() {
        let stacks = RenderStacks::new();
        let program = ProgramHandle::from_raw(2);
        stacks.insert_mesh(program, ModelHandle::from_raw(0), mesh(7, 0));
        let removed = stacks.remove_program(program).unwrap();
        assert_eq!(removed.meshes[0].instances[0].renderer, MeshRendererHandle::from_raw(7));
        assert!(stacks.remove_program(program).is_none());
    }
}
