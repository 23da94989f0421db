//! Post-processing: the camera's program chain from the light target to
//! its output.
//!
//! With no programs the light target is blitted straight to the output.
//! Longer chains ping-pong between the light target and the scratch target,
//! and the last program always writes the output.

use crate::command::RenderCommand;
use crate::error::GraphicsError;
use crate::resources::{ProgramHandle, RenderTextureHandle, ShaderInputUsage};
use crate::types::LoadMode;

use super::{PassContext, PassHooks};

/// Source and destination of each step of a post chain.
pub(crate) fn chain_steps(
    programs: &[ProgramHandle],
    light_target: RenderTextureHandle,
    scratch: RenderTextureHandle,
    output: RenderTextureHandle,
) -> Vec<(ProgramHandle, RenderTextureHandle, RenderTextureHandle)> {
    let programs = if programs.len() > 1 && scratch.is_null() {
        log::warn!(
            "Post chain of {} programs has no scratch target, applying only the last",
            programs.len()
        );
        &programs[programs.len() - 1..]
    } else {
        programs
    };

    let mut source = light_target;
    programs
        .iter()
        .enumerate()
        .map(|(i, &program)| {
            let destination = if i + 1 == programs.len() {
                output
            } else if source == light_target {
                scratch
            } else {
                light_target
            };
            let step = (program, source, destination);
            source = destination;
            step
        })
        .collect()
}

pub(super) fn record(
    cmd: &mut RenderCommand<'_>,
    ctx: &PassContext,
    hooks: &PassHooks,
) -> Result<(), GraphicsError> {
    let Some(camera) = cmd.camera().cloned() else {
        return Ok(());
    };
    hooks.run_pre(cmd, ctx)?;

    if camera.post_programs.is_empty() {
        cmd.blit(camera.light_target, camera.output)?;
    } else {
        let steps = chain_steps(
            &camera.post_programs,
            camera.light_target,
            camera.post_scratch,
            camera.output,
        );
        for (program, source, destination) in steps {
            if !cmd.bind_render_texture(destination, LoadMode::NoClear)? {
                continue;
            }
            if !cmd.bind_material(program)? {
                continue;
            }
            cmd.push_render_texture_color(ShaderInputUsage::SourceTexture, source, 0)?;
            cmd.push_gbuffer(camera.gbuffer)?;
            cmd.draw_material();
        }
        cmd.flush();
    }

    hooks.run_post(cmd, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rt(raw: u32) -> RenderTextureHandle {
        RenderTextureHandle::from_raw(raw)
    }

    #[test]
    fn test_single_program_reads_light_writes_output() {
        let program = ProgramHandle::from_raw(0);
        let steps = chain_steps(&[program], rt(1), rt(2), RenderTextureHandle::NULL);
        assert_eq!(steps, vec![(program, rt(1), RenderTextureHandle::NULL)]);
    }

    #[test]
    fn test_chain_ping_pongs() {
        let programs: Vec<_> = (0..4).map(ProgramHandle::from_raw).collect();
        let steps = chain_steps(&programs, rt(1), rt(2), rt(3));
        let targets: Vec<_> = steps.iter().map(|&(_, src, dst)| (src, dst)).collect();
        assert_eq!(
            targets,
            vec![(rt(1), rt(2)), (rt(2), rt(1)), (rt(1), rt(2)), (rt(2), rt(3))]
        );
    }

    #[test]
    fn test_chain_without_scratch_keeps_last() {
        let programs: Vec<_> = (0..3).map(ProgramHandle::from_raw).collect();
        let steps = chain_steps(&programs, rt(1), RenderTextureHandle::NULL, rt(3));
        assert_eq!(steps, vec![(programs[2], rt(1), rt(3))]);
    }
}
