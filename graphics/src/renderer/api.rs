//! Resource lifecycle: `generate_*`, `get_*`, `set_*` and `destroy_*`.
//!
//! Destroying a GPU-backed resource removes its handle immediately and
//! hands the GPU objects to the deletion queue of the current flight frame.
//! Plain-data resources (lights, cameras, emitters, canvases) are dropped
//! on the spot.

use std::sync::Arc;

use umbra_core::{Handle, LockedTable};

use crate::deletion::DeferredResource;
use crate::error::GraphicsError;
use crate::passes::LightPrograms;
use crate::program::{RenderProgram, RenderProgramDesc};
use crate::resources::{
    AmbientLight, AmbientLightHandle, CameraBuffer, CameraHandle, CanvasHandle, CanvasRenderer,
    DepthAttachment, DepthCubeHandle, DepthCubeRenderTexture, DepthRenderTexture,
    DepthTextureHandle, DirectionalLight, DirectionalLightHandle, MeshRenderBuffer,
    MeshRendererHandle, Model, ModelHandle, ParticleEmitter, ParticleEmitterHandle, PointLight,
    PointLightHandle, ProgramHandle, RenderTexture, RenderTextureHandle, SamplerHandle, Shader,
    ShaderBufferInput, ShaderHandle, SkinnedMeshRenderBuffer, SkinnedMeshRendererHandle,
    SpotLight, SpotLightHandle, Texture, TextureData, TextureHandle, TextureSampler,
    VideoTexture, VideoTextureHandle, bounding_radius,
};
use crate::scene::{PresentTarget, VideoFrameSource};
use crate::stack::{MeshInstance, SkinnedInstance};
use crate::types::{
    BufferDescriptor, BufferUsage, ImageDescriptor, ProgramFlags, SamplerDescriptor,
    ShaderStage, TextureFormat, TextureUsage, full_mip_chain,
};

use super::Renderer;

/// Depth attachment requested for a new render texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderTextureDepth {
    #[default]
    None,
    /// A depth image created and destroyed with the render texture.
    Owned(TextureFormat),
    /// An existing depth render texture.
    Depth(DepthTextureHandle),
    /// An existing cube depth texture; selects the cube shadow pipelines.
    Cube(DepthCubeHandle),
}

/// Validate and erase `handle`, returning the value it held.
fn take<T>(
    table: &LockedTable<T>,
    kind: &'static str,
    handle: Handle<T>,
) -> Result<T, GraphicsError> {
    let mut table = table.write();
    table
        .check(handle)
        .map_err(|e| GraphicsError::invalid_handle(kind, e))?;
    table
        .erase(handle)
        .ok_or_else(|| GraphicsError::Internal(format!("{kind} {handle:?} vanished on erase")))
}

fn replace<T>(
    table: &LockedTable<T>,
    kind: &'static str,
    handle: Handle<T>,
    value: T,
) -> Result<T, GraphicsError> {
    table
        .write()
        .set(handle, value)
        .map_err(|e| GraphicsError::invalid_handle(kind, e))
}

fn require<T>(
    table: &LockedTable<T>,
    kind: &'static str,
    handle: Handle<T>,
) -> Result<(), GraphicsError> {
    table
        .read()
        .check(handle)
        .map_err(|e| GraphicsError::invalid_handle(kind, e))
}

/// generate/get/set/destroy for resources that hold no GPU objects.
macro_rules! plain_resource {
    ($ty:ty, $handle:ty, $field:ident, $kind:literal,
     $generate:ident, $get:ident, $set:ident, $destroy:ident) => {
        impl Renderer {
            pub fn $generate(&self, value: $ty) -> $handle {
                self.$field.push(value)
            }

            pub fn $get(&self, handle: $handle) -> Option<$ty> {
                self.$field.get_cloned(handle)
            }

            pub fn $set(&self, handle: $handle, value: $ty) -> Result<(), GraphicsError> {
                replace(&self.$field, $kind, handle, value).map(drop)
            }

            pub fn $destroy(&self, handle: $handle) -> Result<(), GraphicsError> {
                take(&self.$field, $kind, handle).map(drop)
            }
        }
    };
}

plain_resource!(
    AmbientLight,
    AmbientLightHandle,
    ambient_lights,
    "ambient light",
    generate_ambient_light,
    get_ambient_light,
    set_ambient_light,
    destroy_ambient_light
);
plain_resource!(
    DirectionalLight,
    DirectionalLightHandle,
    directional_lights,
    "directional light",
    generate_directional_light,
    get_directional_light,
    set_directional_light,
    destroy_directional_light
);
plain_resource!(
    PointLight,
    PointLightHandle,
    point_lights,
    "point light",
    generate_point_light,
    get_point_light,
    set_point_light,
    destroy_point_light
);
plain_resource!(
    SpotLight,
    SpotLightHandle,
    spot_lights,
    "spot light",
    generate_spot_light,
    get_spot_light,
    set_spot_light,
    destroy_spot_light
);
plain_resource!(
    CameraBuffer,
    CameraHandle,
    cameras,
    "camera",
    generate_camera_buffer,
    get_camera_buffer,
    set_camera_buffer,
    destroy_camera_buffer
);
plain_resource!(
    ParticleEmitter,
    ParticleEmitterHandle,
    particle_emitters,
    "particle emitter",
    generate_particle_emitter,
    get_particle_emitter,
    set_particle_emitter,
    destroy_particle_emitter
);
plain_resource!(
    CanvasRenderer,
    CanvasHandle,
    canvases,
    "canvas renderer",
    generate_canvas_renderer,
    get_canvas_renderer,
    set_canvas_renderer,
    destroy_canvas_renderer
);

// Shaders and programs.
impl Renderer {
    fn generate_shader(
        &self,
        stage: ShaderStage,
        spirv: &[u32],
        inputs: Vec<ShaderBufferInput>,
    ) -> Result<ShaderHandle, GraphicsError> {
        let module = self.backend().create_shader_module(stage, spirv)?;
        Ok(self.shaders.push(Shader {
            stage,
            module: Arc::new(module),
            inputs,
        }))
    }

    pub fn generate_vertex_shader(
        &self,
        spirv: &[u32],
        inputs: Vec<ShaderBufferInput>,
    ) -> Result<ShaderHandle, GraphicsError> {
        self.generate_shader(ShaderStage::Vertex, spirv, inputs)
    }

    pub fn generate_pixel_shader(
        &self,
        spirv: &[u32],
        inputs: Vec<ShaderBufferInput>,
    ) -> Result<ShaderHandle, GraphicsError> {
        self.generate_shader(ShaderStage::Pixel, spirv, inputs)
    }

    pub fn get_shader(&self, handle: ShaderHandle) -> Option<Shader> {
        self.shaders.get_cloned(handle)
    }

    /// Programs already built keep their module alive.
    pub fn destroy_shader(&self, handle: ShaderHandle) -> Result<(), GraphicsError> {
        let shader = take(&self.shaders, "shader", handle)?;
        self.deletion.queue(DeferredResource::Shader(shader));
        Ok(())
    }

    fn program_shader(
        &self,
        handle: ShaderHandle,
        stage: ShaderStage,
        required: bool,
    ) -> Result<Option<Shader>, GraphicsError> {
        if handle.is_null() && !required {
            return Ok(None);
        }
        require(&self.shaders, "shader", handle)?;
        let shader = self
            .shaders
            .get_cloned(handle)
            .ok_or_else(|| GraphicsError::Internal(format!("shader {handle:?} vanished")))?;
        if shader.stage != stage {
            return Err(GraphicsError::InvalidParameter(format!(
                "shader {:?} is a {:?} shader, expected {:?}",
                handle, shader.stage, stage
            )));
        }
        Ok(Some(shader))
    }

    /// Build a program from its shaders. Pipelines are created lazily, the
    /// first time the program is bound for a target.
    pub fn generate_render_program(
        &self,
        desc: RenderProgramDesc,
    ) -> Result<ProgramHandle, GraphicsError> {
        let vertex = self
            .program_shader(desc.vertex_shader, ShaderStage::Vertex, true)?
            .ok_or_else(|| GraphicsError::InvalidParameter("program needs a vertex shader".into()))?;
        let pixel = self.program_shader(desc.pixel_shader, ShaderStage::Pixel, false)?;
        let shadow_vertex =
            self.program_shader(desc.shadow_vertex_shader, ShaderStage::Vertex, false)?;

        let program = RenderProgram::build(
            self.backend(),
            desc,
            &vertex,
            pixel.as_ref(),
            shadow_vertex.as_ref(),
            self.config.flight_frames,
            self.config.max_shadow_splits,
        )?;
        let handle = self.programs.push(program);
        log::debug!("Generated render program {:?}", handle);
        Ok(handle)
    }

    /// Build a program from a serialized [`RenderProgramRecord`](crate::program::RenderProgramRecord).
    pub fn generate_render_program_from_record(
        &self,
        bytes: &[u8],
    ) -> Result<ProgramHandle, GraphicsError> {
        self.generate_render_program(RenderProgramDesc::read_from(bytes)?)
    }

    pub fn get_render_program(&self, handle: ProgramHandle) -> Option<RenderProgramDesc> {
        self.programs.with(handle, |program| program.desc.clone())
    }

    /// Replace a program's user uniform contents. The new blob must match
    /// the size the program was built with.
    pub fn set_render_program_uniform(
        &self,
        handle: ProgramHandle,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut programs = self.programs.write();
        programs
            .check(handle)
            .map_err(|e| GraphicsError::invalid_handle("render program", e))?;
        let Some(program) = programs.get_mut(handle) else {
            return Ok(());
        };
        if program.desc.uniform.len() != data.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "program {:?} uniform is {} bytes, got {}",
                handle,
                program.desc.uniform.len(),
                data.len()
            )));
        }
        program.desc.uniform.copy_from_slice(data);
        Ok(())
    }

    /// Destroy a program, its pipelines in every cache and its render
    /// stack. Mesh renderers of the program are left detached.
    pub fn destroy_render_program(&self, handle: ProgramHandle) -> Result<(), GraphicsError> {
        let program = take(&self.programs, "render program", handle)?;
        let evicted = self.pipelines.evict_program(handle, &self.deletion);

        if let Some(stack) = self.stacks.remove_program(handle) {
            for instance in stack.meshes.iter().flat_map(|bucket| &bucket.instances) {
                self.mesh_renderers
                    .with_mut(instance.renderer, |renderer| renderer.attached = false);
            }
            for instance in stack.skinned.iter().flat_map(|bucket| &bucket.instances) {
                self.skinned_mesh_renderers
                    .with_mut(instance.renderer, |renderer| renderer.attached = false);
            }
        }

        if program.desc.flags.contains(ProgramFlags::DESTROY_OWNED_SHADERS) {
            let shaders = [
                program.desc.vertex_shader,
                program.desc.pixel_shader,
                program.desc.shadow_vertex_shader,
            ];
            for shader in shaders {
                if self.shaders.exists(shader) {
                    self.destroy_shader(shader)?;
                }
            }
        }

        log::debug!(
            "Destroyed render program {:?} and {} pipelines",
            handle,
            evicted
        );
        self.deletion.queue(DeferredResource::Program(program));
        Ok(())
    }

    /// Programs drawing each light kind in the light pass.
    pub fn set_light_programs(&self, programs: LightPrograms) {
        *self.light_programs.write() = programs;
    }

    pub fn light_programs(&self) -> LightPrograms {
        *self.light_programs.read()
    }
}

// Geometry and textures.
impl Renderer {
    /// Upload a model. Vertices start with a `float3` position; `radius`
    /// overrides the bounding radius computed from those positions.
    pub fn generate_model(
        &self,
        vertices: &[u8],
        indices: &[u32],
        stride: u32,
        radius: Option<f32>,
    ) -> Result<ModelHandle, GraphicsError> {
        if stride == 0 || vertices.len() % stride as usize != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} vertex bytes do not divide into stride {}",
                vertices.len(),
                stride
            )));
        }
        let backend = self.backend();
        let vertex_buffer = backend.create_buffer(
            &BufferDescriptor::new(vertices.len().max(4) as u64, BufferUsage::VERTEX)
                .with_label("model vertices"),
        )?;
        backend.write_buffer(&vertex_buffer, 0, vertices)?;

        let index_bytes: &[u8] = bytemuck::cast_slice(indices);
        let index_buffer = backend.create_buffer(
            &BufferDescriptor::new(index_bytes.len().max(4) as u64, BufferUsage::INDEX)
                .with_label("model indices"),
        )?;
        backend.write_buffer(&index_buffer, 0, index_bytes)?;

        let radius = radius.unwrap_or_else(|| bounding_radius(vertices, stride as usize));
        Ok(self.models.push(Model {
            vertex_buffer: Arc::new(vertex_buffer),
            index_buffer: Arc::new(index_buffer),
            index_count: indices.len() as u32,
            vertex_count: (vertices.len() / stride as usize) as u32,
            radius,
        }))
    }

    pub fn get_model(&self, handle: ModelHandle) -> Option<Model> {
        self.models.get_cloned(handle)
    }

    pub fn destroy_model(&self, handle: ModelHandle) -> Result<(), GraphicsError> {
        let model = take(&self.models, "model", handle)?;
        self.deletion.queue(DeferredResource::Model(model));
        Ok(())
    }

    fn create_texture(
        &self,
        data: &TextureData,
        descriptor: ImageDescriptor,
    ) -> Result<TextureHandle, GraphicsError> {
        if data.pixels.len() != data.expected_len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{}x{} {:?} texture needs {} bytes, got {}",
                data.width,
                data.height,
                data.format,
                data.expected_len(),
                data.pixels.len()
            )));
        }
        if !data.sampler.is_null() {
            require(&self.samplers, "texture sampler", data.sampler)?;
        }
        let image = self.backend().create_image(&descriptor)?;
        self.backend().upload_image(&image, &data.pixels)?;
        Ok(self.textures.push(Texture {
            image: Arc::new(image),
            sampler: data.sampler,
        }))
    }

    pub fn generate_texture(&self, data: &TextureData) -> Result<TextureHandle, GraphicsError> {
        let descriptor =
            ImageDescriptor::new_2d(data.width, data.height, data.format).with_label("texture");
        self.create_texture(data, descriptor)
    }

    /// Upload the base level and generate the full mip chain from it.
    pub fn generate_texture_mipmapped(
        &self,
        data: &TextureData,
    ) -> Result<TextureHandle, GraphicsError> {
        let mut descriptor = ImageDescriptor::new_2d(data.width, data.height, data.format)
            .with_mip_levels(full_mip_chain(data.width, data.height))
            .with_label("mipmapped texture");
        descriptor.usage |= TextureUsage::COPY_SRC;
        self.create_texture(data, descriptor)
    }

    pub fn get_texture(&self, handle: TextureHandle) -> Option<Texture> {
        self.textures.get_cloned(handle)
    }

    pub fn destroy_texture(&self, handle: TextureHandle) -> Result<(), GraphicsError> {
        let texture = take(&self.textures, "texture", handle)?;
        self.deletion.queue(DeferredResource::Texture(texture));
        Ok(())
    }

    pub fn generate_texture_sampler(
        &self,
        descriptor: SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        let sampler = self.backend().create_sampler(&descriptor)?;
        Ok(self.samplers.push(TextureSampler {
            sampler: Arc::new(sampler),
            descriptor,
        }))
    }

    pub fn get_texture_sampler(&self, handle: SamplerHandle) -> Option<SamplerDescriptor> {
        self.samplers
            .with(handle, |sampler| sampler.descriptor.clone())
    }

    pub fn destroy_texture_sampler(&self, handle: SamplerHandle) -> Result<(), GraphicsError> {
        let sampler = take(&self.samplers, "texture sampler", handle)?;
        self.deletion.queue(DeferredResource::Sampler(sampler));
        Ok(())
    }
}

// Render targets.
impl Renderer {
    /// Create a render texture with one color attachment per format.
    ///
    /// Render texture slots are reused; reusing one drops every pipeline
    /// built for the previous occupant.
    pub fn generate_render_texture(
        &self,
        width: u32,
        height: u32,
        colors: &[TextureFormat],
        depth: RenderTextureDepth,
    ) -> Result<RenderTextureHandle, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "render texture size {width}x{height}"
            )));
        }
        let backend = self.backend();
        let color_images = colors
            .iter()
            .map(|format| {
                backend
                    .create_image(
                        &ImageDescriptor::color_target(width, height, *format)
                            .with_label("render texture color"),
                    )
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (depth, depth_format) = match depth {
            RenderTextureDepth::None => (DepthAttachment::None, None),
            RenderTextureDepth::Owned(format) => {
                if !format.is_depth_stencil() {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "{format:?} is not a depth format"
                    )));
                }
                let image = backend.create_image(
                    &ImageDescriptor::depth_target(width, height, format, 1)
                        .with_label("render texture depth"),
                )?;
                (DepthAttachment::Owned(Arc::new(image)), Some(format))
            }
            RenderTextureDepth::Depth(handle) => {
                require(&self.depth_textures, "depth render texture", handle)?;
                let format = self.depth_textures.with(handle, DepthRenderTexture::format);
                (DepthAttachment::Depth(handle), format)
            }
            RenderTextureDepth::Cube(handle) => {
                require(&self.depth_cubes, "depth cube render texture", handle)?;
                let format = self.depth_cubes.with(handle, DepthCubeRenderTexture::format);
                (DepthAttachment::Cube(handle), format)
            }
        };

        let (handle, reused) = self.render_textures.write().push_reusing(RenderTexture {
            colors: color_images,
            width,
            height,
            depth,
            depth_format,
        });
        if reused {
            let evicted = self.pipelines.evict_target(handle, &self.deletion);
            if evicted > 0 {
                log::debug!(
                    "Render texture slot {:?} reused, dropped {} stale pipelines",
                    handle,
                    evicted
                );
            }
        }
        Ok(handle)
    }

    pub fn get_render_texture(&self, handle: RenderTextureHandle) -> Option<RenderTexture> {
        self.render_textures.get_cloned(handle)
    }

    pub fn destroy_render_texture(&self, handle: RenderTextureHandle) -> Result<(), GraphicsError> {
        let texture = take(&self.render_textures, "render texture", handle)?;
        self.pipelines.evict_target(handle, &self.deletion);
        self.deletion.queue(DeferredResource::RenderTexture(texture));
        Ok(())
    }

    /// A depth texture with `layers` array layers, for shadow cascades.
    pub fn generate_depth_render_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        layers: u32,
    ) -> Result<DepthTextureHandle, GraphicsError> {
        if !format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} is not a depth format"
            )));
        }
        let image = self.backend().create_image(
            &ImageDescriptor::depth_target(width, height, format, layers.max(1))
                .with_label("depth render texture"),
        )?;
        Ok(self.depth_textures.push(DepthRenderTexture {
            image: Arc::new(image),
        }))
    }

    pub fn destroy_depth_render_texture(
        &self,
        handle: DepthTextureHandle,
    ) -> Result<(), GraphicsError> {
        let texture = take(&self.depth_textures, "depth render texture", handle)?;
        self.deletion.queue(DeferredResource::DepthTexture(texture));
        Ok(())
    }

    pub fn generate_depth_cube_render_texture(
        &self,
        size: u32,
        format: TextureFormat,
    ) -> Result<DepthCubeHandle, GraphicsError> {
        if !format.is_depth_stencil() {
            return Err(GraphicsError::InvalidParameter(format!(
                "{format:?} is not a depth format"
            )));
        }
        let image = self.backend().create_image(
            &ImageDescriptor::depth_target(size, size, format, 6)
                .with_cube()
                .with_label("depth cube render texture"),
        )?;
        Ok(self.depth_cubes.push(DepthCubeRenderTexture {
            image: Arc::new(image),
        }))
    }

    pub fn destroy_depth_cube_render_texture(
        &self,
        handle: DepthCubeHandle,
    ) -> Result<(), GraphicsError> {
        let texture = take(&self.depth_cubes, "depth cube render texture", handle)?;
        self.deletion.queue(DeferredResource::DepthCube(texture));
        Ok(())
    }

    /// Where null render texture handles render this frame.
    pub fn set_present_target(&self, target: PresentTarget) {
        *self.present.write() = target;
    }
}

// Mesh renderers and their render stacks.
impl Renderer {
    fn check_drawable(&self, program: ProgramHandle, model: ModelHandle) -> Result<(), GraphicsError> {
        require(&self.programs, "render program", program)?;
        require(&self.models, "model", model)
    }

    /// Register a mesh renderer. It draws nothing until attached with
    /// [`generate_render_stack`](Self::generate_render_stack).
    pub fn generate_mesh_render_buffer(
        &self,
        renderer: MeshRenderBuffer,
    ) -> Result<MeshRendererHandle, GraphicsError> {
        self.check_drawable(renderer.program, renderer.model)?;
        Ok(self.mesh_renderers.push(MeshRenderBuffer {
            attached: false,
            ..renderer
        }))
    }

    pub fn get_mesh_render_buffer(&self, handle: MeshRendererHandle) -> Option<MeshRenderBuffer> {
        self.mesh_renderers.get_cloned(handle)
    }

    /// Replace a mesh renderer, moving it between stacks if it is attached.
    pub fn set_mesh_render_buffer(
        &self,
        handle: MeshRendererHandle,
        renderer: MeshRenderBuffer,
    ) -> Result<(), GraphicsError> {
        self.check_drawable(renderer.program, renderer.model)?;
        let attached = self
            .mesh_renderers
            .with(handle, |current| current.attached)
            .unwrap_or(false);
        if attached {
            self.destroy_render_stack(handle)?;
        }
        replace(
            &self.mesh_renderers,
            "mesh render buffer",
            handle,
            MeshRenderBuffer {
                attached: false,
                ..renderer
            },
        )?;
        if attached {
            self.generate_render_stack(handle)?;
        }
        Ok(())
    }

    pub fn destroy_mesh_render_buffer(&self, handle: MeshRendererHandle) -> Result<(), GraphicsError> {
        let renderer = take(&self.mesh_renderers, "mesh render buffer", handle)?;
        if renderer.attached {
            self.stacks
                .remove_mesh(renderer.program, renderer.model, handle);
        }
        Ok(())
    }

    /// Attach a mesh renderer to its program's render stack. Idempotent.
    pub fn generate_render_stack(&self, handle: MeshRendererHandle) -> Result<(), GraphicsError> {
        let mut renderers = self.mesh_renderers.write();
        renderers
            .check(handle)
            .map_err(|e| GraphicsError::invalid_handle("mesh render buffer", e))?;
        let Some(renderer) = renderers.get_mut(handle) else {
            return Ok(());
        };
        if renderer.attached {
            return Ok(());
        }
        self.check_drawable(renderer.program, renderer.model)?;
        self.stacks.insert_mesh(
            renderer.program,
            renderer.model,
            MeshInstance {
                renderer: handle,
                transform: renderer.transform,
            },
        );
        // A program destroyed since the check may have torn its stack down
        // before this insert.
        if let Err(err) = require(&self.programs, "render program", renderer.program) {
            self.stacks
                .remove_mesh(renderer.program, renderer.model, handle);
            return Err(err);
        }
        renderer.attached = true;
        Ok(())
    }

    /// Detach a mesh renderer from its render stack. Idempotent.
    pub fn destroy_render_stack(&self, handle: MeshRendererHandle) -> Result<(), GraphicsError> {
        let mut renderers = self.mesh_renderers.write();
        renderers
            .check(handle)
            .map_err(|e| GraphicsError::invalid_handle("mesh render buffer", e))?;
        let Some(renderer) = renderers.get_mut(handle) else {
            return Ok(());
        };
        if renderer.attached {
            self.stacks
                .remove_mesh(renderer.program, renderer.model, handle);
            renderer.attached = false;
        }
        Ok(())
    }

    pub fn generate_skinned_mesh_render_buffer(
        &self,
        renderer: SkinnedMeshRenderBuffer,
    ) -> Result<SkinnedMeshRendererHandle, GraphicsError> {
        self.check_drawable(renderer.program, renderer.model)?;
        Ok(self.skinned_mesh_renderers.push(SkinnedMeshRenderBuffer {
            attached: false,
            ..renderer
        }))
    }

    pub fn get_skinned_mesh_render_buffer(
        &self,
        handle: SkinnedMeshRendererHandle,
    ) -> Option<SkinnedMeshRenderBuffer> {
        self.skinned_mesh_renderers.get_cloned(handle)
    }

    pub fn destroy_skinned_mesh_render_buffer(
        &self,
        handle: SkinnedMeshRendererHandle,
    ) -> Result<(), GraphicsError> {
        let renderer = take(&self.skinned_mesh_renderers, "skinned mesh render buffer", handle)?;
        if renderer.attached {
            self.stacks
                .remove_skinned(renderer.program, renderer.model, handle);
        }
        Ok(())
    }

    pub fn generate_skinned_render_stack(
        &self,
        handle: SkinnedMeshRendererHandle,
    ) -> Result<(), GraphicsError> {
        let mut renderers = self.skinned_mesh_renderers.write();
        renderers
            .check(handle)
            .map_err(|e| GraphicsError::invalid_handle("skinned mesh render buffer", e))?;
        let Some(renderer) = renderers.get_mut(handle) else {
            return Ok(());
        };
        if renderer.attached {
            return Ok(());
        }
        self.check_drawable(renderer.program, renderer.model)?;
        self.stacks.insert_skinned(
            renderer.program,
            renderer.model,
            SkinnedInstance {
                renderer: handle,
                transform: renderer.transform,
                skeleton: renderer.skeleton,
            },
        );
        if let Err(err) = require(&self.programs, "render program", renderer.program) {
            self.stacks
                .remove_skinned(renderer.program, renderer.model, handle);
            return Err(err);
        }
        renderer.attached = true;
        Ok(())
    }

    pub fn destroy_skinned_render_stack(
        &self,
        handle: SkinnedMeshRendererHandle,
    ) -> Result<(), GraphicsError> {
        let mut renderers = self.skinned_mesh_renderers.write();
        renderers
            .check(handle)
            .map_err(|e| GraphicsError::invalid_handle("skinned mesh render buffer", e))?;
        let Some(renderer) = renderers.get_mut(handle) else {
            return Ok(());
        };
        if renderer.attached {
            self.stacks
                .remove_skinned(renderer.program, renderer.model, handle);
            renderer.attached = false;
        }
        Ok(())
    }
}

// Video textures.
impl Renderer {
    /// Stream frames from `source` into `texture`, which must be RGBA8.
    pub fn generate_video_texture(
        &self,
        texture: TextureHandle,
        source: Box<dyn VideoFrameSource>,
    ) -> Result<VideoTextureHandle, GraphicsError> {
        require(&self.textures, "texture", texture)?;
        let info = self
            .textures
            .with(texture, |texture| texture.image.info())
            .ok_or_else(|| GraphicsError::Internal(format!("texture {texture:?} vanished")))?;
        if !matches!(
            info.format,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb
        ) {
            return Err(GraphicsError::InvalidParameter(format!(
                "video textures must be RGBA8, got {:?}",
                info.format
            )));
        }

        let size = info.width as u64 * info.height as u64 * 4;
        let staging = (0..self.config.flight_frames)
            .map(|_| {
                self.backend()
                    .create_buffer(
                        &BufferDescriptor::new(size, BufferUsage::COPY_SRC)
                            .with_label("video staging"),
                    )
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self.videos.push(VideoTexture {
            texture,
            source: Arc::new(parking_lot::Mutex::new(source)),
            staging,
            active: true,
        }))
    }

    pub fn set_video_texture_active(
        &self,
        handle: VideoTextureHandle,
        active: bool,
    ) -> Result<(), GraphicsError> {
        require(&self.videos, "video texture", handle)?;
        self.videos.with_mut(handle, |video| video.active = active);
        Ok(())
    }

    pub fn destroy_video_texture(&self, handle: VideoTextureHandle) -> Result<(), GraphicsError> {
        let video = take(&self.videos, "video texture", handle)?;
        self.deletion.queue(DeferredResource::Video(video));
        Ok(())
    }
}
