//! Geometry passes: opaque stacks into the G-buffer, then blended stacks
//! and particles into the light target.

use umbra_core::math::Frustum;

use crate::command::RenderCommand;
use crate::error::GraphicsError;
use crate::resources::ShaderInputUsage;
use crate::stack::{StackFilter, StackPass, draw_stacks};
use crate::types::LoadMode;

use super::{PassContext, PassHooks, camera_frustum};

fn stack_filter(cmd: &RenderCommand<'_>, pass: StackPass) -> Option<StackFilter> {
    let camera = cmd.camera()?;
    let frustum: Frustum = camera_frustum(cmd)?;
    Some(StackFilter {
        layers: camera.render_layers,
        pass,
        frustum,
        shadow_light: None,
    })
}

pub(super) fn record_draw(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    let Some(gbuffer) = cmd.camera().map(|camera| camera.gbuffer) else {
        return Ok(());
    };
    if gbuffer.is_null() {
        log::warn!("Camera {:?} has no G-buffer, skipping draw pass", ctx.camera);
        return Ok(());
    }
    if !cmd.bind_render_texture(gbuffer, LoadMode::Clear)? {
        return Ok(());
    }
    hooks.run_pre(cmd, ctx)?;

    if let Some(filter) = stack_filter(cmd, StackPass::Opaque) {
        let renderer = cmd.renderer();
        draw_stacks(cmd, &renderer.stacks, &filter)?;
    }

    hooks.run_post(cmd, ctx)
}

pub(super) fn record_forward(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    let Some(camera) = cmd.camera().cloned() else {
        return Ok(());
    };
    if !cmd.bind_render_texture(camera.light_target, LoadMode::NoClear)? {
        return Ok(());
    }
    hooks.run_pre(cmd, ctx)?;

    let renderer = cmd.renderer();
    if let Some(filter) = stack_filter(cmd, StackPass::Forward) {
        draw_stacks(cmd, &renderer.stacks, &filter)?;
    }

    let emitters: Vec<_> = renderer
        .particle_emitters
        .read()
        .iter()
        .filter(|(_, emitter)| {
            emitter.active
                && !emitter.particles.is_empty()
                && emitter.render_layers.intersects(camera.render_layers)
        })
        .map(|(handle, emitter)| (handle, emitter.clone()))
        .collect();

    for (handle, emitter) in emitters {
        let Some(world) = renderer.world(emitter.transform) else {
            log::warn!("Particle emitter {:?} has no resolvable transform", handle);
            continue;
        };
        if !cmd.bind_material(emitter.program)? {
            continue;
        }
        let pushed = cmd.push_storage(
            ShaderInputUsage::Particles,
            bytemuck::cast_slice(&emitter.particles),
        )?;
        if !pushed {
            log::warn!(
                "Program {:?} of emitter {:?} does not read particles",
                emitter.program,
                handle
            );
            continue;
        }
        cmd.set_transform(&world);
        cmd.draw_quads_instanced(emitter.particles.len() as u32);
    }

    hooks.run_post(cmd, ctx)
}
