//! Recording one pass into one command buffer.
//!
//! A [`RenderCommand`] moves through three states:
//!
//! - `Unbound`: nothing to render into. Only target binds, blits and copies
//!   are accepted; draws are dropped with an error.
//! - `Bound`: a render texture (or the presentation image) is attached and
//!   dynamic rendering is open. Materials can be bound and drawn.
//! - `Flushed`: rendering was closed by [`RenderCommand::flush`]. Binding
//!   another target reopens it.
//!
//! The camera uniform is written once per command into the slot's own
//! buffer. Later changes (a second extent, a shadow view) go to transient
//! uniform buffers so earlier draws keep the data they were recorded with.

use std::sync::Arc;

use glam::{Mat4, UVec2, Vec4};

use crate::backend::{
    GpuBackend, GpuBuffer, GpuCommandBuffer, GpuCommandPool, GpuImage, GpuPipeline, GpuSampler,
    RenderingInfo,
};
use crate::descriptors::UniformKind;
use crate::error::GraphicsError;
use crate::pipeline::{PipelineVariant, TargetInfo, build_pipeline, pipeline_key};
use crate::program::{PushTarget, ShaderData, ShaderLayout};
use crate::renderer::Renderer;
use crate::resources::{
    AmbientLightHandle, CameraBuffer, CameraHandle, CameraUniform, DepthAttachment,
    DirectionalLightHandle, Model, ModelHandle, PointLightHandle, ProgramHandle,
    RenderTextureHandle, ShaderInputUsage, SpotLightHandle, TextureHandle,
};
use crate::scene::TransformId;
use crate::types::{BufferDescriptor, BufferUsage, LoadMode, Viewport};

/// A command pool, its command buffer and the buffer holding the camera
/// uniform of whatever the buffer records.
///
/// The renderer keeps one slot per pass per camera per flight frame and
/// reuses them every time the frame index comes around.
pub struct CommandSlot {
    pub(crate) cmd: Arc<GpuCommandBuffer>,
    pub(crate) camera_ubo: Arc<GpuBuffer>,
    pool: GpuCommandPool,
}

impl CommandSlot {
    pub fn new(backend: &dyn GpuBackend) -> Result<Self, GraphicsError> {
        let pool = backend.create_command_pool()?;
        let cmd = Arc::new(backend.allocate_command_buffer(&pool)?);
        let camera_ubo = backend.create_buffer(
            &BufferDescriptor::new(
                std::mem::size_of::<CameraUniform>() as u64,
                BufferUsage::UNIFORM,
            )
            .with_label("camera"),
        )?;
        Ok(Self {
            cmd,
            camera_ubo: Arc::new(camera_ubo),
            pool,
        })
    }

    /// Reset the pool so the command buffer can be recorded again.
    pub fn reset(&self, backend: &dyn GpuBackend) -> Result<(), GraphicsError> {
        backend.reset_command_pool(&self.pool)
    }

    pub fn command_buffer(&self) -> &Arc<GpuCommandBuffer> {
        &self.cmd
    }
}

impl std::fmt::Debug for CommandSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSlot")
            .field("cmd", &self.cmd)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Unbound,
    Bound,
    Flushed,
}

/// Counters for one recorded command buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub draws: u32,
    pub instances: u32,
    pub pipeline_binds: u32,
    /// Instances rejected by frustum culling.
    pub culled: u32,
}

/// A light whose data a light program reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightRef {
    Ambient(AmbientLightHandle),
    Directional(DirectionalLightHandle),
    Point(PointLightHandle),
    Spot(SpotLightHandle),
}

struct CameraState {
    handle: CameraHandle,
    buffer: CameraBuffer,
    world: Mat4,
}

struct BoundTarget {
    handle: RenderTextureHandle,
    info: TargetInfo,
    colors: Vec<Arc<GpuImage>>,
    depth: Option<Arc<GpuImage>>,
    extent: UVec2,
    variant: PipelineVariant,
}

struct BoundMaterial {
    handle: ProgramHandle,
    shader_data: Arc<ShaderData>,
    /// This flight frame's user uniform buffer, if the program has one.
    user_uniform: Option<Arc<GpuBuffer>>,
    pipeline: Arc<GpuPipeline>,
}

/// Records one pass. See the module docs for the state machine.
pub struct RenderCommand<'a> {
    renderer: &'a Renderer,
    slot: &'a CommandSlot,
    frame: u32,
    time: f32,
    state: CommandState,
    camera: Option<CameraState>,
    target: Option<BoundTarget>,
    material: Option<BoundMaterial>,
    shadow_view: Option<(Mat4, Mat4)>,
    camera_uniform: Option<CameraUniform>,
    camera_buffer: Option<Arc<GpuBuffer>>,
    slot_camera_written: bool,
    bound_vertex_buffer: Option<u64>,
    stats: CommandStats,
}

impl<'a> RenderCommand<'a> {
    /// Begin recording into `slot` for `camera` (null for camera-less work
    /// such as UI and video decode).
    pub fn begin(
        renderer: &'a Renderer,
        slot: &'a CommandSlot,
        frame: u32,
        time: f32,
        camera: CameraHandle,
    ) -> Result<Self, GraphicsError> {
        let camera = if camera.is_null() {
            None
        } else {
            renderer
                .cameras
                .read()
                .check(camera)
                .map_err(|e| GraphicsError::invalid_handle("camera", e))?;
            let buffer = renderer.cameras.get_cloned(camera).ok_or_else(|| {
                GraphicsError::Internal(format!("camera {camera:?} vanished while beginning"))
            })?;
            let world = renderer.world(buffer.transform).unwrap_or_else(|| {
                log::warn!("Camera {:?} has no resolvable transform", camera);
                Mat4::IDENTITY
            });
            Some(CameraState {
                handle: camera,
                buffer,
                world,
            })
        };

        renderer.backend().begin_command_buffer(&slot.cmd)?;
        Ok(Self {
            renderer,
            slot,
            frame,
            time,
            state: CommandState::Unbound,
            camera,
            target: None,
            material: None,
            shadow_view: None,
            camera_uniform: None,
            camera_buffer: None,
            slot_camera_written: false,
            bound_vertex_buffer: None,
            stats: CommandStats::default(),
        })
    }

    pub fn renderer(&self) -> &'a Renderer {
        self.renderer
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn stats(&self) -> CommandStats {
        self.stats
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn camera(&self) -> Option<&CameraBuffer> {
        self.camera.as_ref().map(|camera| &camera.buffer)
    }

    pub fn camera_handle(&self) -> CameraHandle {
        self.camera
            .as_ref()
            .map_or(CameraHandle::NULL, |camera| camera.handle)
    }

    pub fn camera_world(&self) -> Option<Mat4> {
        self.camera.as_ref().map(|camera| camera.world)
    }

    /// Extent of the bound target.
    pub fn extent(&self) -> Option<UVec2> {
        self.target.as_ref().map(|target| target.extent)
    }

    pub fn bound_program(&self) -> Option<ProgramHandle> {
        self.material.as_ref().map(|material| material.handle)
    }

    /// Layout of the bound material in the bound target's variant.
    pub fn bound_layout(&self) -> Option<&ShaderLayout> {
        let material = self.material.as_ref()?;
        let shadow = self.target.as_ref().is_some_and(|t| t.variant.is_shadow());
        Some(material.shader_data.layout(shadow))
    }

    /// Whether the bound material declares `usage`.
    pub fn declares(&self, usage: ShaderInputUsage) -> bool {
        self.bound_layout()
            .is_some_and(|layout| layout.declares(usage))
    }

    fn backend(&self) -> &'a dyn GpuBackend {
        self.renderer.backend()
    }

    fn push_target(&self) -> PushTarget<'a> {
        PushTarget {
            backend: self.renderer.backend(),
            descriptors: &self.renderer.descriptors,
            frame: self.frame,
            cmd: &self.slot.cmd,
        }
    }

    fn resolve_target(&self, handle: RenderTextureHandle) -> Option<BoundTarget> {
        if handle.is_null() {
            let present = self.renderer.present_target();
            let Some(image) = present.image.clone() else {
                log::warn!("No presentation image acquired, skipping output");
                return None;
            };
            return Some(BoundTarget {
                handle,
                info: TargetInfo::from_present(&present),
                colors: vec![image],
                depth: None,
                extent: UVec2::new(present.width, present.height),
                variant: PipelineVariant::Normal,
            });
        }

        let texture = self.renderer.render_textures.get_cloned(handle)?;
        let depth = match &texture.depth {
            DepthAttachment::None => None,
            DepthAttachment::Owned(image) => Some(image.clone()),
            DepthAttachment::Depth(depth) => self
                .renderer
                .depth_textures
                .with(*depth, |depth| depth.image.clone()),
            DepthAttachment::Cube(cube) => self
                .renderer
                .depth_cubes
                .with(*cube, |cube| cube.image.clone()),
        };
        if texture.depth.is_some() && depth.is_none() {
            log::warn!("Depth attachment of render texture {:?} is gone", handle);
        }
        let variant = match (texture.is_shadow_target(), texture.depth.is_cube()) {
            (false, _) => PipelineVariant::Normal,
            (true, false) => PipelineVariant::Shadow,
            (true, true) => PipelineVariant::CubeShadow,
        };
        Some(BoundTarget {
            handle,
            info: TargetInfo::from_render_texture(&texture),
            colors: texture.colors.clone(),
            depth,
            extent: UVec2::new(texture.width, texture.height),
            variant,
        })
    }

    /// Attach `target` (null for the presentation image) and open rendering.
    ///
    /// Returns false when the target cannot be bound; the command is then
    /// left unbound.
    pub fn bind_render_texture(
        &mut self,
        target: RenderTextureHandle,
        load: LoadMode,
    ) -> Result<bool, GraphicsError> {
        self.bind_target(target, None, load)
    }

    /// Attach one array layer of a layered target, such as a cube face.
    pub fn bind_render_texture_layer(
        &mut self,
        target: RenderTextureHandle,
        layer: u32,
        load: LoadMode,
    ) -> Result<bool, GraphicsError> {
        self.bind_target(target, Some(layer), load)
    }

    fn bind_target(
        &mut self,
        handle: RenderTextureHandle,
        layer: Option<u32>,
        load: LoadMode,
    ) -> Result<bool, GraphicsError> {
        self.flush();
        self.material = None;
        self.state = CommandState::Unbound;

        let Some(target) = self.resolve_target(handle) else {
            self.target = None;
            return Ok(false);
        };

        let backend = self.backend();
        let cmd = &self.slot.cmd;
        let colors: Vec<&GpuImage> = target.colors.iter().map(|image| image.as_ref()).collect();
        let clear_color = self
            .camera
            .as_ref()
            .map_or([0.0; 4], |camera| camera.buffer.clear_color);
        backend.cmd_begin_rendering(
            cmd,
            &RenderingInfo {
                colors: &colors,
                depth: target.depth.as_deref(),
                layer,
                width: target.extent.x,
                height: target.extent.y,
                load,
                clear_color,
            },
        );

        let viewport = match (&self.camera, target.variant.is_shadow()) {
            (Some(camera), false) => {
                let (offset, size) = camera.buffer.rect.to_pixels(target.extent);
                Viewport {
                    x: offset.x,
                    y: offset.y,
                    width: size.x,
                    height: size.y,
                }
            }
            _ => Viewport {
                x: 0.0,
                y: 0.0,
                width: target.extent.x as f32,
                height: target.extent.y as f32,
            },
        };
        backend.cmd_set_viewport(cmd, viewport);
        backend.cmd_set_scissor(cmd, viewport.scissor());
        if target.variant.is_shadow() {
            backend.cmd_set_depth_bias(cmd, self.renderer.config.shadow_depth_bias);
        }

        self.target = Some(target);
        self.state = CommandState::Bound;
        self.write_camera()?;
        Ok(true)
    }

    /// Render from an explicit light view instead of the camera.
    pub fn bind_shadow_view(&mut self, view: Mat4, projection: Mat4) -> Result<(), GraphicsError> {
        self.shadow_view = Some((view, projection));
        self.write_camera()?;
        if self.material.is_some() {
            self.push_camera()?;
        }
        Ok(())
    }

    /// Go back to the camera's own view.
    pub fn clear_shadow_view(&mut self) -> Result<(), GraphicsError> {
        self.shadow_view = None;
        self.write_camera()?;
        if self.material.is_some() {
            self.push_camera()?;
        }
        Ok(())
    }

    fn write_camera(&mut self) -> Result<(), GraphicsError> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let uniform = match (self.shadow_view, &self.camera) {
            (Some((view, projection)), _) => {
                CameraUniform::from_view(view, projection, target.extent, self.time)
            }
            (None, Some(camera)) => camera
                .buffer
                .uniform(&camera.world, target.extent, self.time),
            (None, None) => CameraUniform::screen(target.extent, self.time),
        };
        if self.camera_uniform == Some(uniform) && self.camera_buffer.is_some() {
            return Ok(());
        }

        let bytes = bytemuck::bytes_of(&uniform);
        let buffer = if self.slot_camera_written {
            self.renderer
                .transient
                .uniform(self.backend(), self.frame, UniformKind::Camera, bytes)?
        } else {
            self.backend().write_buffer(&self.slot.camera_ubo, 0, bytes)?;
            self.slot_camera_written = true;
            self.slot.camera_ubo.clone()
        };
        self.camera_uniform = Some(uniform);
        self.camera_buffer = Some(buffer);
        Ok(())
    }

    fn push_camera(&self) -> Result<(), GraphicsError> {
        let (Some(layout), Some(buffer)) = (self.bound_layout(), &self.camera_buffer) else {
            return Ok(());
        };
        if let Some(slot) = layout.input_slot(ShaderInputUsage::Camera) {
            layout.push_uniform_buffer(self.push_target(), slot, buffer)?;
        }
        Ok(())
    }

    /// Bind `program`'s pipeline for the bound target and push the engine
    /// inputs it declares (camera, time, user uniform).
    ///
    /// Returns false if nothing is bound or the program is gone.
    pub fn bind_material(&mut self, program: ProgramHandle) -> Result<bool, GraphicsError> {
        if self.state != CommandState::Bound {
            log::error!("bind_material({:?}) without a bound render texture", program);
            return Ok(false);
        }
        if self.bound_program() == Some(program) {
            return Ok(true);
        }
        let Some(target) = &self.target else {
            return Ok(false);
        };

        let backend = self.backend();
        let renderer = self.renderer;
        let frame = self.frame;
        let key = pipeline_key(target.handle, program);
        let bound = renderer.programs.with(program, |built| {
            let pipeline = renderer.pipelines.get_or_create(target.variant, key, || {
                build_pipeline(backend, built, target.variant, &target.info)
            })?;
            Ok::<_, GraphicsError>(BoundMaterial {
                handle: program,
                shader_data: built.shader_data.clone(),
                user_uniform: built.user_uniform(frame).cloned(),
                pipeline,
            })
        });
        let Some(material) = bound.transpose()? else {
            return Ok(false);
        };
        backend.cmd_bind_pipeline(&self.slot.cmd, &material.pipeline);
        self.stats.pipeline_binds += 1;

        self.material = Some(material);
        self.push_camera()?;

        let push = self.push_target();
        let (Some(layout), Some(material)) = (self.bound_layout(), &self.material) else {
            return Ok(true);
        };
        if let Some(slot) = layout.input_slot(ShaderInputUsage::Time) {
            let time_ubo = self.renderer.time_ubo(frame);
            layout.push_uniform_buffer(push, slot, time_ubo)?;
        }
        if let (Some(slot), Some(buffer)) = (
            layout.input_slot(ShaderInputUsage::UserUniform),
            material.user_uniform.as_ref(),
        ) {
            layout.push_uniform_buffer(push, slot, buffer)?;
        }
        Ok(true)
    }

    /// The pipeline of the bound material.
    pub fn bound_pipeline(&self) -> Option<&Arc<GpuPipeline>> {
        self.material.as_ref().map(|material| &material.pipeline)
    }

    fn bound_slot(&self, usage: ShaderInputUsage) -> Option<(&ShaderLayout, u32)> {
        let layout = self.bound_layout()?;
        layout.input_slot(usage).map(|slot| (layout, slot))
    }

    fn push_images(
        &self,
        usage: ShaderInputUsage,
        images: &[&GpuImage],
        sampler: &GpuSampler,
    ) -> Result<(), GraphicsError> {
        match self.bound_slot(usage) {
            Some((layout, slot)) => layout.push_texture(self.push_target(), slot, images, sampler),
            None => Ok(()),
        }
    }

    /// Bind a texture at the slot declared for `usage`. A null or dead
    /// texture binds the default white texture.
    pub fn push_texture(
        &mut self,
        usage: ShaderInputUsage,
        texture: TextureHandle,
    ) -> Result<(), GraphicsError> {
        if self.bound_slot(usage).is_none() {
            return Ok(());
        }
        let defaults = &self.renderer.defaults;
        let texture = if texture.is_null() {
            None
        } else {
            self.renderer.textures.get_cloned(texture)
        };
        let Some(texture) = texture else {
            return self.push_images(usage, &[defaults.white.as_ref()], &defaults.sampler);
        };
        let sampler = if texture.sampler.is_null() {
            None
        } else {
            self.renderer
                .samplers
                .with(texture.sampler, |sampler| sampler.sampler.clone())
        };
        match sampler {
            Some(sampler) => self.push_images(usage, &[texture.image.as_ref()], &sampler),
            None => self.push_images(usage, &[texture.image.as_ref()], &defaults.sampler),
        }
    }

    /// Bind color attachment `index` of a render texture.
    pub fn push_render_texture_color(
        &mut self,
        usage: ShaderInputUsage,
        target: RenderTextureHandle,
        index: usize,
    ) -> Result<(), GraphicsError> {
        if self.bound_slot(usage).is_none() {
            return Ok(());
        }
        let image = self
            .renderer
            .render_textures
            .with(target, |texture| texture.colors.get(index).cloned())
            .flatten();
        let defaults = &self.renderer.defaults;
        match image {
            Some(image) => self.push_images(usage, &[image.as_ref()], &defaults.sampler),
            None => {
                log::warn!("Render texture {:?} has no color attachment {}", target, index);
                self.push_images(usage, &[defaults.white.as_ref()], &defaults.sampler)
            }
        }
    }

    /// Bind the depth attachment of a render texture.
    pub fn push_render_texture_depth(
        &mut self,
        usage: ShaderInputUsage,
        target: RenderTextureHandle,
    ) -> Result<(), GraphicsError> {
        if self.bound_slot(usage).is_none() {
            return Ok(());
        }
        let defaults = &self.renderer.defaults;
        match self.renderer.depth_image(target) {
            Some(image) => self.push_images(usage, &[image.as_ref()], &defaults.sampler),
            None => self.push_images(usage, &[defaults.depth.as_ref()], &defaults.sampler),
        }
    }

    /// Bind every G-buffer attachment the material declares.
    pub fn push_gbuffer(&mut self, gbuffer: RenderTextureHandle) -> Result<(), GraphicsError> {
        let count = self
            .renderer
            .render_textures
            .with(gbuffer, |texture| texture.colors.len())
            .unwrap_or(0);
        for index in 0..count.min(u8::MAX as usize) {
            self.push_render_texture_color(ShaderInputUsage::GBuffer(index as u8), gbuffer, index)?;
        }
        self.push_render_texture_depth(ShaderInputUsage::GBufferDepth, gbuffer)
    }

    /// Write `light`'s uniform and bind it at the matching slot.
    pub fn push_light(&mut self, light: LightRef) -> Result<(), GraphicsError> {
        let renderer = self.renderer;
        let (usage, kind, data) = match light {
            LightRef::Ambient(handle) => {
                let Some(light) = renderer.ambient_lights.get_cloned(handle) else {
                    return Ok(());
                };
                (
                    ShaderInputUsage::AmbientLight,
                    UniformKind::AmbientLight,
                    bytemuck::bytes_of(&light.uniform()).to_vec(),
                )
            }
            LightRef::Directional(handle) => {
                let Some(light) = renderer.directional_lights.get_cloned(handle) else {
                    return Ok(());
                };
                let Some(world) = renderer.world(light.transform) else {
                    log::warn!("Directional light {:?} has no resolvable transform", handle);
                    return Ok(());
                };
                let cascades = match &self.camera {
                    Some(camera) => light.cascades(
                        &world,
                        &renderer.cascade_camera(&camera.buffer, camera.world),
                    ),
                    None => Vec::new(),
                };
                (
                    ShaderInputUsage::DirectionalLight,
                    UniformKind::DirectionalLight,
                    bytemuck::bytes_of(&light.uniform(&world, &cascades)).to_vec(),
                )
            }
            LightRef::Point(handle) => {
                let Some(light) = renderer.point_lights.get_cloned(handle) else {
                    return Ok(());
                };
                let Some(world) = renderer.world(light.transform) else {
                    log::warn!("Point light {:?} has no resolvable transform", handle);
                    return Ok(());
                };
                let uniform = light.uniform(&world, !light.shadow_maps.is_empty());
                (
                    ShaderInputUsage::PointLight,
                    UniformKind::PointLight,
                    bytemuck::bytes_of(&uniform).to_vec(),
                )
            }
            LightRef::Spot(handle) => {
                let Some(light) = renderer.spot_lights.get_cloned(handle) else {
                    return Ok(());
                };
                let Some(world) = renderer.world(light.transform) else {
                    log::warn!("Spot light {:?} has no resolvable transform", handle);
                    return Ok(());
                };
                let uniform = light.uniform(&world, !light.shadow_maps.is_empty());
                (
                    ShaderInputUsage::SpotLight,
                    UniformKind::SpotLight,
                    bytemuck::bytes_of(&uniform).to_vec(),
                )
            }
        };

        let Some((layout, slot)) = self.bound_slot(usage) else {
            return Ok(());
        };
        let buffer = renderer
            .transient
            .uniform(self.backend(), self.frame, kind, &data)?;
        layout.push_uniform_buffer(self.push_target(), slot, &buffer)
    }

    /// Bind `light`'s shadow maps as the shadow texture array, padded with
    /// the default depth texture up to the array length.
    pub fn push_shadow_texture_array(&mut self, light: LightRef) -> Result<(), GraphicsError> {
        let Some((layout, slot)) = self.bound_slot(ShaderInputUsage::ShadowMap) else {
            return Ok(());
        };
        let count = layout
            .slots()
            .get(slot as usize)
            .map_or(0, |slot| slot.binding.count) as usize;

        let renderer = self.renderer;
        let (maps, padding) = match light {
            LightRef::Ambient(_) => (Vec::new(), &renderer.defaults.depth),
            LightRef::Directional(handle) => (
                renderer
                    .directional_lights
                    .with(handle, |light| light.shadow_maps.clone())
                    .unwrap_or_default(),
                &renderer.defaults.depth,
            ),
            LightRef::Point(handle) => (
                renderer
                    .point_lights
                    .with(handle, |light| light.shadow_maps.clone())
                    .unwrap_or_default(),
                &renderer.defaults.depth_cube,
            ),
            LightRef::Spot(handle) => (
                renderer
                    .spot_lights
                    .with(handle, |light| light.shadow_maps.clone())
                    .unwrap_or_default(),
                &renderer.defaults.depth,
            ),
        };

        let resolved: Vec<Arc<GpuImage>> = maps
            .iter()
            .take(count)
            .map(|map| {
                renderer.depth_image(*map).unwrap_or_else(|| {
                    log::warn!("Shadow map {:?} has no depth attachment", map);
                    padding.clone()
                })
            })
            .collect();
        let mut images: Vec<&GpuImage> = resolved.iter().map(|image| image.as_ref()).collect();
        images.resize(count, padding.as_ref());
        layout.push_texture(
            self.push_target(),
            slot,
            &images,
            &renderer.defaults.shadow_sampler,
        )
    }

    /// Upload `data` to a transient storage buffer bound at `usage`.
    ///
    /// Returns false when the material does not declare `usage`.
    pub fn push_storage(
        &mut self,
        usage: ShaderInputUsage,
        data: &[u8],
    ) -> Result<bool, GraphicsError> {
        let Some((layout, slot)) = self.bound_slot(usage) else {
            return Ok(false);
        };
        let buffer = self
            .renderer
            .transient
            .storage(self.backend(), self.frame, data)?;
        layout.push_storage_buffer(self.push_target(), slot, &buffer)?;
        Ok(true)
    }

    pub fn set_transform(&mut self, model: &Mat4) {
        if let Some(layout) = self.bound_layout() {
            layout.update_transform(self.push_target(), model);
        }
    }

    pub fn update_ui(&mut self, color: Vec4, rect: Vec4) {
        if let Some(layout) = self.bound_layout() {
            layout.update_ui(self.push_target(), color, rect);
        }
    }

    pub fn update_shadow_light(&mut self, light_index: u32, split: u32) {
        if let Some(layout) = self.bound_layout() {
            layout.update_shadow_light(self.push_target(), light_index, split);
        }
    }

    fn can_draw(&self, what: &str) -> bool {
        if self.state != CommandState::Bound {
            log::error!("{} while no render texture is bound", what);
            return false;
        }
        if self.material.is_none() {
            log::error!("{} while no material is bound", what);
            return false;
        }
        true
    }

    /// Draw a full-screen triangle strip quad with the bound material.
    pub fn draw_material(&mut self) {
        self.draw_quads_instanced(1);
    }

    /// Draw `count` instanced quads (particles, UI elements).
    pub fn draw_quads_instanced(&mut self, count: u32) {
        if count == 0 || !self.can_draw("draw_quads_instanced") {
            return;
        }
        self.backend().cmd_draw(&self.slot.cmd, 4, count);
        self.stats.draws += 1;
        self.stats.instances += count;
    }

    fn bind_model(&mut self, model: &Model) {
        let id = model.vertex_buffer.id();
        if self.bound_vertex_buffer == Some(id) {
            return;
        }
        let backend = self.backend();
        backend.cmd_bind_vertex_buffer(&self.slot.cmd, &model.vertex_buffer);
        if model.index_count > 0 {
            backend.cmd_bind_index_buffer(&self.slot.cmd, &model.index_buffer);
        }
        self.bound_vertex_buffer = Some(id);
    }

    fn draw_bound_model(&mut self, model: &Model, instances: u32) {
        let backend = self.backend();
        if model.index_count > 0 {
            backend.cmd_draw_indexed(&self.slot.cmd, model.index_count, instances);
        } else {
            backend.cmd_draw(&self.slot.cmd, model.vertex_count, instances);
        }
        self.stats.draws += 1;
        self.stats.instances += instances;
    }

    /// Draw `model` at the world matrix of `transform`.
    pub fn draw_model(
        &mut self,
        transform: TransformId,
        model: ModelHandle,
    ) -> Result<(), GraphicsError> {
        let Some(world) = self.renderer.world(transform) else {
            log::warn!("draw_model: transform {:?} is not resolvable", transform);
            return Ok(());
        };
        let Some(model) = self.renderer.models.get_cloned(model) else {
            return Ok(());
        };
        self.draw_model_matrix(&world, &model);
        Ok(())
    }

    /// Draw `model` once at `world`.
    pub fn draw_model_matrix(&mut self, world: &Mat4, model: &Model) {
        if !self.can_draw("draw_model") {
            return;
        }
        self.bind_model(model);
        self.set_transform(world);
        self.draw_bound_model(model, 1);
    }

    /// Draw `count` instances of `model`; per-instance data must already
    /// be pushed.
    pub fn draw_model_instanced(&mut self, model: &Model, count: u32) {
        if count == 0 || !self.can_draw("draw_model_instanced") {
            return;
        }
        self.bind_model(model);
        self.draw_bound_model(model, count);
    }

    pub(crate) fn record_culled(&mut self, count: u32) {
        self.stats.culled += count;
    }

    /// Copy color attachment 0 of `src` onto `dst` (null for the
    /// presentation image). Closes any open rendering first.
    pub fn blit(
        &mut self,
        src: RenderTextureHandle,
        dst: RenderTextureHandle,
    ) -> Result<bool, GraphicsError> {
        self.flush();
        let source = self
            .renderer
            .render_textures
            .with(src, |texture| texture.colors.first().cloned())
            .flatten();
        let Some(source) = source else {
            log::warn!("blit: render texture {:?} has no color attachment", src);
            return Ok(false);
        };
        let Some(target) = self.resolve_target(dst) else {
            return Ok(false);
        };
        let Some(destination) = target.colors.first() else {
            log::warn!("blit: render texture {:?} has no color attachment", dst);
            return Ok(false);
        };
        self.backend()
            .cmd_blit(&self.slot.cmd, &source, destination);
        Ok(true)
    }

    pub(crate) fn copy_buffer_to_image(&mut self, buffer: &GpuBuffer, image: &GpuImage) {
        self.flush();
        self.backend()
            .cmd_copy_buffer_to_image(&self.slot.cmd, buffer, image);
    }

    /// Close the open rendering, if any. Idempotent.
    pub fn flush(&mut self) {
        if self.state == CommandState::Bound {
            self.backend().cmd_end_rendering(&self.slot.cmd);
            self.state = CommandState::Flushed;
        }
        self.material = None;
        self.bound_vertex_buffer = None;
    }

    /// Flush and end the command buffer.
    pub fn finish(mut self) -> Result<CommandStats, GraphicsError> {
        self.flush();
        self.backend().end_command_buffer(&self.slot.cmd)?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_command_slot_owns_camera_buffer() {
        let backend = DummyBackend::new();
        let slot = CommandSlot::new(&backend).unwrap();
        assert_eq!(
            slot.camera_ubo.size(),
            std::mem::size_of::<CameraUniform>() as u64
        );
        assert!(slot.reset(&backend).is_ok());
        assert!(slot.command_buffer().recorded().is_empty());
    }
}
