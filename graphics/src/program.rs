//! Render programs and the descriptor layouts derived from their shaders.
//!
//! A [`RenderProgram`] is a material's immutable shading setup: shaders,
//! fixed-function state and an optional user uniform blob. Building one
//! derives a [`ShaderData`] from the shaders' declared inputs, which knows
//! which descriptor set slot each input lives in and how to fill it.
//!
//! Programs cross the embedding boundary as a [`RenderProgramRecord`]
//! header followed by the uniform bytes.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::backend::{
    DescriptorBinding, DescriptorWrite, GpuBackend, GpuBuffer, GpuCommandBuffer,
    GpuDescriptorSetLayout, GpuImage, GpuPipelineLayout, GpuSampler, GpuShaderModule,
    PushConstantRange,
};
use crate::descriptors::PushDescriptorPool;
use crate::error::GraphicsError;
use crate::resources::{Shader, ShaderBufferInput, ShaderHandle, ShaderInputUsage};
use crate::types::{
    BlendMode, BufferDescriptor, BufferUsage, CullMode, DescriptorKind, PrimitiveTopology,
    ProgramFlags, RenderLayers, ShaderStageFlags, VertexLayout,
};

/// Everything needed to build a [`RenderProgram`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderProgramDesc {
    pub vertex_shader: ShaderHandle,
    /// Null for depth-only programs.
    pub pixel_shader: ShaderHandle,
    /// Replaces the vertex shader in shadow passes when set.
    pub shadow_vertex_shader: ShaderHandle,
    /// Bytes per vertex; 0 uses the layout's packed stride.
    pub vertex_stride: u32,
    pub vertex_layout: VertexLayout,
    pub cull_mode: CullMode,
    pub primitive: PrimitiveTopology,
    pub blend_mode: BlendMode,
    pub render_layers: RenderLayers,
    pub flags: ProgramFlags,
    /// Contents of the program's user uniform, empty for none.
    pub uniform: Vec<u8>,
}

impl RenderProgramDesc {
    pub fn new(vertex_shader: ShaderHandle, pixel_shader: ShaderHandle) -> Self {
        Self {
            vertex_shader,
            pixel_shader,
            ..Default::default()
        }
    }

    pub fn stride(&self) -> u32 {
        if self.vertex_stride == 0 {
            self.vertex_layout.packed_stride()
        } else {
            self.vertex_stride
        }
    }

    /// Append the record header and uniform blob to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        let record = RenderProgramRecord::from_desc(self);
        out.extend_from_slice(bytemuck::bytes_of(&record));
        out.extend_from_slice(&self.uniform);
    }

    /// Parse a record written by [`write_to`](Self::write_to).
    pub fn read_from(bytes: &[u8]) -> Result<Self, GraphicsError> {
        let header = bytes.get(..RenderProgramRecord::SIZE).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "program record needs {} header bytes, got {}",
                RenderProgramRecord::SIZE,
                bytes.len()
            ))
        })?;
        let record: RenderProgramRecord = bytemuck::pod_read_unaligned(header);

        let end = RenderProgramRecord::SIZE + record.uniform_size as usize;
        let uniform = bytes.get(RenderProgramRecord::SIZE..end).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "program record declares {} uniform bytes, got {}",
                record.uniform_size,
                bytes.len() - RenderProgramRecord::SIZE
            ))
        })?;

        let flags = ProgramFlags::from_bits(record.flags).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown program flags {:#x}", record.flags))
        })?;

        Ok(Self {
            vertex_shader: ShaderHandle::from_raw(record.vertex_shader),
            pixel_shader: ShaderHandle::from_raw(record.pixel_shader),
            shadow_vertex_shader: ShaderHandle::from_raw(record.shadow_vertex_shader),
            vertex_stride: record.vertex_stride,
            vertex_layout: VertexLayout::try_from(record.vertex_layout)?,
            cull_mode: CullMode::try_from(record.cull_mode)?,
            primitive: PrimitiveTopology::try_from(record.primitive)?,
            blend_mode: BlendMode::try_from(record.blend_mode)?,
            render_layers: RenderLayers::from_bits_retain(record.render_layers),
            flags,
            uniform: uniform.to_vec(),
        })
    }
}

/// Fixed header of a serialized program. Handles are raw, `u32::MAX` null.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RenderProgramRecord {
    pub vertex_shader: u32,
    pub pixel_shader: u32,
    pub shadow_vertex_shader: u32,
    pub vertex_stride: u32,
    pub vertex_layout: u32,
    pub cull_mode: u32,
    pub primitive: u32,
    pub blend_mode: u32,
    pub render_layers: u32,
    pub flags: u32,
    /// Bytes of uniform data following the header.
    pub uniform_size: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<RenderProgramRecord>(), 44);

impl RenderProgramRecord {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_desc(desc: &RenderProgramDesc) -> Self {
        Self {
            vertex_shader: desc.vertex_shader.raw(),
            pixel_shader: desc.pixel_shader.raw(),
            shadow_vertex_shader: desc.shadow_vertex_shader.raw(),
            vertex_stride: desc.vertex_stride,
            vertex_layout: desc.vertex_layout.into(),
            cull_mode: desc.cull_mode.into(),
            primitive: desc.primitive.into(),
            blend_mode: desc.blend_mode.into(),
            render_layers: desc.render_layers.bits(),
            flags: desc.flags.bits(),
            uniform_size: desc.uniform.len() as u32,
        }
    }
}

/// Where descriptor and push-constant updates go.
#[derive(Clone, Copy)]
pub struct PushTarget<'a> {
    pub backend: &'a dyn GpuBackend,
    pub descriptors: &'a PushDescriptorPool,
    pub frame: u32,
    pub cmd: &'a GpuCommandBuffer,
}

/// One descriptor set slot of a layout.
#[derive(Debug)]
pub struct SlotLayout {
    pub usage: Option<ShaderInputUsage>,
    pub binding: DescriptorBinding,
    pub layout: GpuDescriptorSetLayout,
}

/// Descriptor sets and push constants of one shader combination.
#[derive(Debug)]
pub struct ShaderLayout {
    inputs: Vec<ShaderBufferInput>,
    slots: Vec<SlotLayout>,
    push_constants: Vec<PushConstantRange>,
    pipeline_layout: GpuPipelineLayout,
}

impl ShaderLayout {
    /// Derive the layout of the given shaders' merged inputs.
    ///
    /// Gaps between declared slots get empty set layouts. Two different
    /// inputs declared at one slot are rejected.
    pub fn new(
        backend: &dyn GpuBackend,
        shaders: &[&Shader],
        max_shadow_splits: u32,
    ) -> Result<Self, GraphicsError> {
        let mut inputs: Vec<ShaderBufferInput> = Vec::new();
        let mut slots: Vec<Option<(ShaderInputUsage, DescriptorBinding)>> = Vec::new();
        let mut vertex_range: Option<(u32, u32)> = None;
        let mut pixel_range: Option<(u32, u32)> = None;

        for shader in shaders {
            let stage = shader.stage.flags();
            for input in &shader.inputs {
                if !inputs.iter().any(|known| known.usage == input.usage) {
                    inputs.push(*input);
                }

                if let Some((offset, size)) = input.usage.push_constant_range() {
                    let span = if stage.contains(ShaderStageFlags::VERTEX) {
                        &mut vertex_range
                    } else {
                        &mut pixel_range
                    };
                    *span = Some(match *span {
                        Some((start, end)) => (start.min(offset), end.max(offset + size)),
                        None => (offset, offset + size),
                    });
                    continue;
                }

                let slot = input.slot as usize;
                if slots.len() <= slot {
                    slots.resize(slot + 1, None);
                }
                match &mut slots[slot] {
                    Some((usage, binding)) if *usage == input.usage => {
                        binding.stages |= stage;
                    }
                    Some((usage, _)) => {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "shader slot {} declared as both {:?} and {:?}",
                            slot, usage, input.usage
                        )));
                    }
                    entry @ None => {
                        let count = if input.usage == ShaderInputUsage::ShadowMap {
                            max_shadow_splits
                        } else {
                            1
                        };
                        *entry = Some((
                            input.usage,
                            DescriptorBinding {
                                kind: input.kind(),
                                count,
                                stages: stage,
                            },
                        ));
                    }
                }
            }
        }

        let slots = slots
            .into_iter()
            .map(|entry| {
                let (usage, binding) = match entry {
                    Some((usage, binding)) => (Some(usage), binding),
                    None => (
                        None,
                        DescriptorBinding {
                            kind: DescriptorKind::Uniform,
                            count: 0,
                            stages: ShaderStageFlags::empty(),
                        },
                    ),
                };
                let layout = backend.create_descriptor_set_layout(&binding)?;
                Ok(SlotLayout {
                    usage,
                    binding,
                    layout,
                })
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;

        let push_constants = merge_push_ranges(vertex_range, pixel_range);
        let set_layouts: Vec<&GpuDescriptorSetLayout> = slots.iter().map(|s| &s.layout).collect();
        let pipeline_layout = backend.create_pipeline_layout(&set_layouts, &push_constants)?;

        Ok(Self {
            inputs,
            slots,
            push_constants,
            pipeline_layout,
        })
    }

    pub fn inputs(&self) -> &[ShaderBufferInput] {
        &self.inputs
    }

    pub fn slots(&self) -> &[SlotLayout] {
        &self.slots
    }

    pub fn push_constants(&self) -> &[PushConstantRange] {
        &self.push_constants
    }

    pub fn pipeline_layout(&self) -> &GpuPipelineLayout {
        &self.pipeline_layout
    }

    pub fn declares(&self, usage: ShaderInputUsage) -> bool {
        self.inputs.iter().any(|input| input.usage == usage)
    }

    /// Descriptor set slot of a descriptor input. Push constants have none.
    pub fn input_slot(&self, usage: ShaderInputUsage) -> Option<u32> {
        if usage.push_constant_range().is_some() {
            return None;
        }
        self.inputs
            .iter()
            .find(|input| input.usage == usage)
            .map(|input| input.slot)
    }

    fn slot(&self, slot: u32, kind: DescriptorKind) -> Result<&SlotLayout, GraphicsError> {
        let layout = self.slots.get(slot as usize).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "slot {} out of range ({} slots)",
                slot,
                self.slots.len()
            ))
        })?;
        if layout.usage.is_none() || layout.binding.kind != kind {
            return Err(GraphicsError::InvalidParameter(format!(
                "slot {} does not hold a {:?} input",
                slot, kind
            )));
        }
        Ok(layout)
    }

    fn push_set(
        &self,
        target: PushTarget<'_>,
        slot: u32,
        kind: DescriptorKind,
        write: &DescriptorWrite<'_>,
    ) -> Result<(), GraphicsError> {
        let layout = self.slot(slot, kind)?;
        let set = target.descriptors.allocate(
            target.backend,
            target.frame,
            kind,
            &layout.layout,
            layout.binding.count,
        )?;
        target.backend.write_descriptor_set(&set, write);
        target
            .backend
            .cmd_bind_descriptor_set(target.cmd, &self.pipeline_layout, slot, &set);
        Ok(())
    }

    /// Bind `images` (one per array element) with `sampler` at `slot`.
    pub fn push_texture(
        &self,
        target: PushTarget<'_>,
        slot: u32,
        images: &[&GpuImage],
        sampler: &GpuSampler,
    ) -> Result<(), GraphicsError> {
        let expected = self.slot(slot, DescriptorKind::Texture)?.binding.count as usize;
        if images.len() != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "slot {} takes {} images, got {}",
                slot,
                expected,
                images.len()
            )));
        }
        self.push_set(
            target,
            slot,
            DescriptorKind::Texture,
            &DescriptorWrite::Texture { images, sampler },
        )
    }

    pub fn push_uniform_buffer(
        &self,
        target: PushTarget<'_>,
        slot: u32,
        buffer: &GpuBuffer,
    ) -> Result<(), GraphicsError> {
        self.push_set(
            target,
            slot,
            DescriptorKind::Uniform,
            &DescriptorWrite::Uniform {
                buffer,
                offset: 0,
                range: buffer.size(),
            },
        )
    }

    pub fn push_storage_buffer(
        &self,
        target: PushTarget<'_>,
        slot: u32,
        buffer: &GpuBuffer,
    ) -> Result<(), GraphicsError> {
        self.push_set(
            target,
            slot,
            DescriptorKind::Storage,
            &DescriptorWrite::Storage {
                buffer,
                offset: 0,
                range: buffer.size(),
            },
        )
    }

    /// Stages whose push range overlaps `[offset, offset + size)`.
    fn push_stages(&self, offset: u32, size: u32) -> ShaderStageFlags {
        self.push_constants
            .iter()
            .filter(|range| range.offset < offset + size && offset < range.offset + range.size)
            .fold(ShaderStageFlags::empty(), |stages, range| {
                stages | range.stages
            })
    }

    fn push_constant(&self, target: PushTarget<'_>, usage: ShaderInputUsage, data: &[u8]) {
        if !self.declares(usage) {
            return;
        }
        let Some((offset, size)) = usage.push_constant_range() else {
            return;
        };
        debug_assert_eq!(data.len(), size as usize);
        let stages = self.push_stages(offset, size);
        target
            .backend
            .cmd_push_constants(target.cmd, &self.pipeline_layout, stages, offset, data);
    }

    pub fn update_transform(&self, target: PushTarget<'_>, model: &Mat4) {
        self.push_constant(target, ShaderInputUsage::Transform, bytemuck::bytes_of(model));
    }

    pub fn update_ui(&self, target: PushTarget<'_>, color: Vec4, rect: Vec4) {
        let data = [color, rect];
        self.push_constant(target, ShaderInputUsage::Ui, bytemuck::cast_slice(&data));
    }

    pub fn update_shadow_light(&self, target: PushTarget<'_>, light_index: u32, split: u32) {
        let data = [light_index, split, 0, 0];
        self.push_constant(
            target,
            ShaderInputUsage::ShadowLight,
            bytemuck::cast_slice(&data),
        );
    }
}

/// Push ranges covering each stage's inputs. Identical spans share one
/// range so no stage appears twice.
fn merge_push_ranges(
    vertex: Option<(u32, u32)>,
    pixel: Option<(u32, u32)>,
) -> Vec<PushConstantRange> {
    let range = |stages, (start, end): (u32, u32)| PushConstantRange {
        stages,
        offset: start,
        size: end - start,
    };
    match (vertex, pixel) {
        (Some(v), Some(p)) if v == p => {
            vec![range(ShaderStageFlags::VERTEX | ShaderStageFlags::PIXEL, v)]
        }
        (v, p) => v
            .map(|v| range(ShaderStageFlags::VERTEX, v))
            .into_iter()
            .chain(p.map(|p| range(ShaderStageFlags::PIXEL, p)))
            .collect(),
    }
}

/// Layouts of a program's normal and shadow shader combinations.
#[derive(Debug)]
pub struct ShaderData {
    pub normal: ShaderLayout,
    /// Present when the program has a shadow vertex shader.
    pub shadow: Option<ShaderLayout>,
}

impl ShaderData {
    pub fn new(
        backend: &dyn GpuBackend,
        vertex: &Shader,
        pixel: Option<&Shader>,
        shadow_vertex: Option<&Shader>,
        max_shadow_splits: u32,
    ) -> Result<Self, GraphicsError> {
        let mut shaders = vec![vertex];
        shaders.extend(pixel);
        let normal = ShaderLayout::new(backend, &shaders, max_shadow_splits)?;
        let shadow = shadow_vertex
            .map(|shader| ShaderLayout::new(backend, &[shader], max_shadow_splits))
            .transpose()?;
        Ok(Self { normal, shadow })
    }

    /// The layout shadow pipelines use.
    pub fn shadow_layout(&self) -> &ShaderLayout {
        self.shadow.as_ref().unwrap_or(&self.normal)
    }

    pub fn layout(&self, shadow: bool) -> &ShaderLayout {
        if shadow {
            self.shadow_layout()
        } else {
            &self.normal
        }
    }

    pub fn input_slot(&self, usage: ShaderInputUsage) -> Option<u32> {
        self.normal.input_slot(usage)
    }
}

/// A built material program.
#[derive(Debug, Clone)]
pub struct RenderProgram {
    pub desc: RenderProgramDesc,
    pub vertex: Arc<GpuShaderModule>,
    pub pixel: Option<Arc<GpuShaderModule>>,
    pub shadow_vertex: Option<Arc<GpuShaderModule>>,
    pub shader_data: Arc<ShaderData>,
    /// One user uniform buffer per flight frame, empty without a blob.
    pub user_uniforms: Vec<Arc<GpuBuffer>>,
}

impl RenderProgram {
    pub fn build(
        backend: &dyn GpuBackend,
        desc: RenderProgramDesc,
        vertex: &Shader,
        pixel: Option<&Shader>,
        shadow_vertex: Option<&Shader>,
        flight_frames: u32,
        max_shadow_splits: u32,
    ) -> Result<Self, GraphicsError> {
        let shader_data = ShaderData::new(backend, vertex, pixel, shadow_vertex, max_shadow_splits)?;

        let user_uniforms = if desc.uniform.is_empty() {
            Vec::new()
        } else {
            (0..flight_frames)
                .map(|_| {
                    let descriptor =
                        BufferDescriptor::new(desc.uniform.len() as u64, BufferUsage::UNIFORM)
                            .with_label("program uniform");
                    let buffer = backend.create_buffer(&descriptor)?;
                    backend.write_buffer(&buffer, 0, &desc.uniform)?;
                    Ok(Arc::new(buffer))
                })
                .collect::<Result<Vec<_>, GraphicsError>>()?
        };

        Ok(Self {
            vertex: vertex.module.clone(),
            pixel: pixel.map(|shader| shader.module.clone()),
            shadow_vertex: shadow_vertex.map(|shader| shader.module.clone()),
            shader_data: Arc::new(shader_data),
            user_uniforms,
            desc,
        })
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.desc.blend_mode
    }

    pub fn render_layers(&self) -> RenderLayers {
        self.desc.render_layers
    }

    pub fn casts_shadows(&self) -> bool {
        !self.desc.flags.contains(ProgramFlags::NO_SHADOW_CAST)
    }

    pub fn user_uniform(&self, frame: u32) -> Option<&Arc<GpuBuffer>> {
        if self.user_uniforms.is_empty() {
            return None;
        }
        self.user_uniforms
            .get(frame as usize % self.user_uniforms.len())
    }

    /// Copy the uniform blob into the buffer of `frame`.
    pub fn refresh_uniform(&self, backend: &dyn GpuBackend, frame: u32) -> Result<(), GraphicsError> {
        match self.user_uniform(frame) {
            Some(buffer) => backend.write_buffer(buffer, 0, &self.desc.uniform),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::backend::{DummyBackend, RecordedCommand};
    use crate::types::ShaderStage;

    fn shader(backend: &DummyBackend, stage: ShaderStage, inputs: &[ShaderBufferInput]) -> Shader {
        Shader {
            stage,
            module: Arc::new(backend.create_shader_module(stage, &[0x0723_0203]).unwrap()),
            inputs: inputs.to_vec(),
        }
    }

    fn sample_desc(uniform: Vec<u8>) -> RenderProgramDesc {
        RenderProgramDesc {
            vertex_shader: ShaderHandle::from_raw(2),
            pixel_shader: ShaderHandle::from_raw(5),
            shadow_vertex_shader: ShaderHandle::NULL,
            vertex_stride: 48,
            vertex_layout: VertexLayout::PositionNormalUvTangent,
            cull_mode: CullMode::Front,
            primitive: PrimitiveTopology::TriangleStrip,
            blend_mode: BlendMode::Additive,
            render_layers: RenderLayers::UI | RenderLayers::from_bits_retain(1 << 7),
            flags: ProgramFlags::DESTROY_OWNED_SHADERS | ProgramFlags::NO_SHADOW_CAST,
            uniform,
        }
    }

    #[rstest]
    #[case::no_uniform(Vec::new())]
    #[case::with_uniform(vec![1, 2, 3, 4, 5, 6, 7])]
    fn test_record_round_trip(#[case] uniform: Vec<u8>) {
        let desc = sample_desc(uniform);
        let mut bytes = Vec::new();
        desc.write_to(&mut bytes);
        assert_eq!(bytes.len(), RenderProgramRecord::SIZE + desc.uniform.len());
        assert_eq!(RenderProgramDesc::read_from(&bytes).unwrap(), desc);
    }

    #[test]
    fn test_record_reads_unaligned() {
        let desc = sample_desc(vec![9; 3]);
        let mut bytes = vec![0u8];
        desc.write_to(&mut bytes);
        assert_eq!(RenderProgramDesc::read_from(&bytes[1..]).unwrap(), desc);
    }

    #[test]
    fn test_record_rejects_truncation() {
        let mut bytes = Vec::new();
        sample_desc(vec![1; 8]).write_to(&mut bytes);
        assert!(RenderProgramDesc::read_from(&bytes[..10]).is_err());
        assert!(RenderProgramDesc::read_from(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_record_rejects_unknown_flags() {
        let mut record = RenderProgramRecord::from_desc(&sample_desc(Vec::new()));
        record.flags |= 1 << 30;
        let err = RenderProgramDesc::read_from(bytemuck::bytes_of(&record)).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_layout_fills_gaps_and_merges_stages() {
        let backend = DummyBackend::new();
        let vertex = shader(
            &backend,
            ShaderStage::Vertex,
            &[
                ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
                ShaderBufferInput::push_constant(ShaderInputUsage::Transform),
            ],
        );
        let pixel = shader(
            &backend,
            ShaderStage::Pixel,
            &[
                ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
                ShaderBufferInput::new(ShaderInputUsage::ShadowMap, 3),
            ],
        );
        let data = ShaderData::new(&backend, &vertex, Some(&pixel), None, 4).unwrap();
        let slots = data.normal.slots();

        assert_eq!(slots.len(), 4);
        assert_eq!(
            slots[0].binding.stages,
            ShaderStageFlags::VERTEX | ShaderStageFlags::PIXEL
        );
        assert!(slots[1].usage.is_none());
        assert_eq!(slots[1].binding.count, 0);
        assert!(slots[2].usage.is_none());
        assert_eq!(slots[3].binding.count, 4);
        assert_eq!(data.input_slot(ShaderInputUsage::ShadowMap), Some(3));
        assert_eq!(data.input_slot(ShaderInputUsage::Transform), None);
        assert!(data.normal.declares(ShaderInputUsage::Transform));
        assert_eq!(
            data.normal.push_constants(),
            &[PushConstantRange {
                stages: ShaderStageFlags::VERTEX,
                offset: 0,
                size: 64,
            }]
        );
        assert!(data.shadow.is_none());
        assert!(std::ptr::eq(data.shadow_layout(), &data.normal));
    }

    #[test]
    fn test_conflicting_slot_is_rejected() {
        let backend = DummyBackend::new();
        let vertex = shader(
            &backend,
            ShaderStage::Vertex,
            &[ShaderBufferInput::new(ShaderInputUsage::Camera, 1)],
        );
        let pixel = shader(
            &backend,
            ShaderStage::Pixel,
            &[ShaderBufferInput::new(ShaderInputUsage::Texture(0), 1)],
        );
        let err = ShaderData::new(&backend, &vertex, Some(&pixel), None, 4).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_shadow_vertex_gets_own_layout() {
        let backend = DummyBackend::new();
        let vertex = shader(
            &backend,
            ShaderStage::Vertex,
            &[ShaderBufferInput::new(ShaderInputUsage::Camera, 0)],
        );
        let shadow = shader(
            &backend,
            ShaderStage::Vertex,
            &[
                ShaderBufferInput::new(ShaderInputUsage::Camera, 0),
                ShaderBufferInput::push_constant(ShaderInputUsage::ShadowLight),
            ],
        );
        let data = ShaderData::new(&backend, &vertex, None, Some(&shadow), 4).unwrap();
        assert!(data.layout(true).declares(ShaderInputUsage::ShadowLight));
        assert!(!data.layout(false).declares(ShaderInputUsage::ShadowLight));
    }

    #[test]
    fn test_push_uniform_binds_set_at_slot() {
        let backend = DummyBackend::new();
        let vertex = shader(
            &backend,
            ShaderStage::Vertex,
            &[
                ShaderBufferInput::new(ShaderInputUsage::Time, 0),
                ShaderBufferInput::new(ShaderInputUsage::Camera, 1),
                ShaderBufferInput::push_constant(ShaderInputUsage::Transform),
            ],
        );
        let data = ShaderData::new(&backend, &vertex, None, None, 4).unwrap();
        let pool = backend.create_command_pool().unwrap();
        let cmd = backend.allocate_command_buffer(&pool).unwrap();
        let descriptors = PushDescriptorPool::new(1, 16);
        let target = PushTarget {
            backend: &backend,
            descriptors: &descriptors,
            frame: 0,
            cmd: &cmd,
        };
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::UNIFORM))
            .unwrap();

        data.normal.push_uniform_buffer(target, 1, &buffer).unwrap();
        data.normal.update_transform(target, &Mat4::IDENTITY);
        // Not declared: nothing is recorded.
        data.normal.update_ui(target, Vec4::ONE, Vec4::ONE);

        let log = cmd.recorded();
        assert_eq!(log.len(), 2);
        assert!(matches!(log[0], RecordedCommand::BindDescriptorSet { slot: 1, .. }));
        assert!(matches!(
            &log[1],
            RecordedCommand::PushConstants { offset: 0, data } if data.len() == 64
        ));
        assert_eq!(descriptors.allocated(0), 1);

        let wrong_kind = data.normal.push_storage_buffer(target, 1, &buffer);
        assert!(wrong_kind.is_err());
    }

    #[test]
    fn test_program_allocates_uniform_per_frame() {
        let backend = DummyBackend::new();
        let vertex = shader(&backend, ShaderStage::Vertex, &[]);
        let program = RenderProgram::build(
            &backend,
            RenderProgramDesc {
                uniform: vec![3; 32],
                ..Default::default()
            },
            &vertex,
            None,
            None,
            3,
            4,
        )
        .unwrap();
        assert_eq!(program.user_uniforms.len(), 3);
        assert_eq!(program.user_uniform(4).unwrap().dummy_contents(), vec![3; 32]);
        assert!(program.casts_shadows());
    }
}
