//! Deferred light accumulation.
//!
//! Every active light drawn by a camera gets one full-screen quad with the
//! program registered for its kind. The quad reads the G-buffer, the
//! light's uniform and its shadow maps, and accumulates into the camera's
//! light target.

use umbra_core::{Handle, LockedTable};

use crate::command::{LightRef, RenderCommand};
use crate::error::GraphicsError;
use crate::resources::{ProgramHandle, RenderTextureHandle};
use crate::types::{LoadMode, RenderLayers};

use super::{PassContext, PassHooks};

/// Programs drawing each light kind. A null program skips that kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightPrograms {
    pub ambient: ProgramHandle,
    pub directional: ProgramHandle,
    pub point: ProgramHandle,
    pub spot: ProgramHandle,
}

fn visible_lights<T>(
    table: &LockedTable<T>,
    layers: RenderLayers,
    keep: impl Fn(&T) -> (bool, RenderLayers),
) -> Vec<Handle<T>> {
    table
        .read()
        .iter()
        .filter(|(_, light)| {
            let (active, light_layers) = keep(light);
            active && light_layers.intersects(layers)
        })
        .map(|(handle, _)| handle)
        .collect()
}

fn draw_light(
    cmd: &mut RenderCommand<'_>,
    program: ProgramHandle,
    gbuffer: RenderTextureHandle,
    light: LightRef,
) -> Result<(), GraphicsError> {
    if !cmd.bind_material(program)? {
        return Ok(());
    }
    cmd.push_gbuffer(gbuffer)?;
    cmd.push_light(light)?;
    cmd.push_shadow_texture_array(light)?;
    let index = match light {
        LightRef::Ambient(h) => h.raw(),
        LightRef::Directional(h) => h.raw(),
        LightRef::Point(h) => h.raw(),
        LightRef::Spot(h) => h.raw(),
    };
    cmd.update_shadow_light(index, 0);
    cmd.draw_material();
    Ok(())
}

pub(super) fn record(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    let Some(camera) = cmd.camera().cloned() else {
        return Ok(());
    };
    if !cmd.bind_render_texture(camera.light_target, LoadMode::Clear)? {
        return Ok(());
    }
    hooks.run_pre(cmd, ctx)?;

    let renderer = cmd.renderer();
    let programs = *renderer.light_programs.read();
    let layers = camera.render_layers;

    if !programs.ambient.is_null() {
        for light in visible_lights(&renderer.ambient_lights, layers, |l| (l.active, l.render_layers)) {
            draw_light(cmd, programs.ambient, camera.gbuffer, LightRef::Ambient(light))?;
        }
    }
    if !programs.directional.is_null() {
        for light in visible_lights(&renderer.directional_lights, layers, |l| {
            (l.active, l.render_layers)
        }) {
            draw_light(
                cmd,
                programs.directional,
                camera.gbuffer,
                LightRef::Directional(light),
            )?;
        }
    }
    if !programs.point.is_null() {
        for light in visible_lights(&renderer.point_lights, layers, |l| (l.active, l.render_layers)) {
            draw_light(cmd, programs.point, camera.gbuffer, LightRef::Point(light))?;
        }
    }
    if !programs.spot.is_null() {
        for light in visible_lights(&renderer.spot_lights, layers, |l| (l.active, l.render_layers)) {
            draw_light(cmd, programs.spot, camera.gbuffer, LightRef::Spot(light))?;
        }
    }

    hooks.run_post(cmd, ctx)
}
