//! Shadow map passes.
//!
//! Directional lights render one cascade per shadow map, point lights
//! render the six faces of the cube depth target behind their first shadow
//! map, and spot lights render a single perspective map. Lights without
//! shadow maps are skipped; a pass with no shadowed light records nothing
//! but its hooks.

use umbra_core::math::{self, Frustum};

use crate::command::RenderCommand;
use crate::error::GraphicsError;
use crate::resources::{CameraBuffer, RenderTextureHandle};
use crate::stack::{StackFilter, StackPass, draw_stacks};
use crate::types::{LoadMode, RenderLayers};

use super::{PassContext, PassHooks};

/// Bind one shadow map (or one face of it) and draw every caster.
fn draw_shadow_map(
    cmd: &mut RenderCommand<'_>,
    map: RenderTextureHandle,
    layer: Option<u32>,
    view: glam::Mat4,
    projection: glam::Mat4,
    layers: RenderLayers,
    shadow_light: (u32, u32),
) -> Result<(), GraphicsError> {
    let bound = match layer {
        Some(layer) => cmd.bind_render_texture_layer(map, layer, LoadMode::Clear)?,
        None => cmd.bind_render_texture(map, LoadMode::Clear)?,
    };
    if !bound {
        log::warn!("Shadow map {:?} could not be bound, light renders unshadowed", map);
        return Ok(());
    }
    cmd.bind_shadow_view(view, projection)?;
    let renderer = cmd.renderer();
    let filter = StackFilter {
        layers,
        pass: StackPass::Shadow,
        frustum: Frustum::from_view_proj(projection * view),
        shadow_light: Some(shadow_light),
    };
    draw_stacks(cmd, &renderer.stacks, &filter)?;
    cmd.flush();
    Ok(())
}

fn camera_layers(cmd: &RenderCommand<'_>) -> RenderLayers {
    cmd.camera()
        .map_or(RenderLayers::ALL, |camera| camera.render_layers)
}

pub(super) fn record_directional(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    hooks.run_pre(cmd, ctx)?;

    let renderer = cmd.renderer();
    let camera_layers = camera_layers(cmd);
    let lights: Vec<_> = renderer
        .directional_lights
        .read()
        .iter()
        .filter(|(_, light)| {
            light.active
                && !light.shadow_maps.is_empty()
                && light.render_layers.intersects(camera_layers)
        })
        .map(|(handle, light)| (handle, light.clone()))
        .collect();
    let camera: Option<(CameraBuffer, glam::Mat4)> =
        cmd.camera().cloned().zip(cmd.camera_world());

    if let Some((camera, camera_world)) = camera {
        for (handle, light) in &lights {
            let Some(world) = renderer.world(light.transform) else {
                log::warn!("Directional light {:?} has no resolvable transform", handle);
                continue;
            };
            let cascades =
                light.cascades(&world, &renderer.cascade_camera(&camera, camera_world));
            for (split, (map, cascade)) in light.shadow_maps.iter().zip(&cascades).enumerate() {
                draw_shadow_map(
                    cmd,
                    *map,
                    None,
                    cascade.view,
                    cascade.projection,
                    light.render_layers & camera_layers,
                    (handle.raw(), split as u32),
                )?;
            }
        }
    }

    hooks.run_post(cmd, ctx)
}

pub(super) fn record_point(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    hooks.run_pre(cmd, ctx)?;

    let renderer = cmd.renderer();
    let camera_layers = camera_layers(cmd);
    let lights: Vec<_> = renderer
        .point_lights
        .read()
        .iter()
        .filter(|(_, light)| {
            light.active
                && !light.shadow_maps.is_empty()
                && light.render_layers.intersects(camera_layers)
        })
        .map(|(handle, light)| (handle, light.clone()))
        .collect();

    for (handle, light) in &lights {
        let Some(world) = renderer.world(light.transform) else {
            log::warn!("Point light {:?} has no resolvable transform", handle);
            continue;
        };
        let map = light.shadow_maps[0];
        let is_cube = renderer
            .render_textures
            .with(map, |texture| texture.depth.is_cube())
            .unwrap_or(false);
        if !is_cube {
            log::warn!(
                "Shadow map {:?} of point light {:?} has no cube depth, light renders unshadowed",
                map,
                handle
            );
            continue;
        }
        let projection = light.shadow_projection();
        let views = math::cube_face_views(world.w_axis.truncate());
        for (face, view) in views.into_iter().enumerate() {
            draw_shadow_map(
                cmd,
                map,
                Some(face as u32),
                view,
                projection,
                light.render_layers & camera_layers,
                (handle.raw(), face as u32),
            )?;
        }
    }

    hooks.run_post(cmd, ctx)
}

pub(super) fn record_spot(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    hooks.run_pre(cmd, ctx)?;

    let renderer = cmd.renderer();
    let camera_layers = camera_layers(cmd);
    let lights: Vec<_> = renderer
        .spot_lights
        .read()
        .iter()
        .filter(|(_, light)| {
            light.active
                && !light.shadow_maps.is_empty()
                && light.render_layers.intersects(camera_layers)
        })
        .map(|(handle, light)| (handle, light.clone()))
        .collect();

    for (handle, light) in &lights {
        let Some(world) = renderer.world(light.transform) else {
            log::warn!("Spot light {:?} has no resolvable transform", handle);
            continue;
        };
        let (view, projection) = light.shadow_view(&world);
        draw_shadow_map(
            cmd,
            light.shadow_maps[0],
            None,
            view,
            projection,
            light.render_layers & camera_layers,
            (handle.raw(), 0),
        )?;
    }

    hooks.run_post(cmd, ctx)
}
