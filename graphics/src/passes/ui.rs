//! UI canvases, drawn after every camera.

use crate::command::RenderCommand;
use crate::error::GraphicsError;
use crate::resources::{CanvasHandle, CanvasRenderer, ShaderInputUsage};
use crate::types::LoadMode;

/// Draw the elements of one canvas into its target, back to front.
pub(crate) fn record_canvas(
    cmd: &mut RenderCommand<'_>,
    handle: CanvasHandle,
    canvas: &CanvasRenderer,
) -> Result<(), GraphicsError> {
    let renderer = cmd.renderer();
    let elements = renderer.scene.ui.canvas_elements(canvas.canvas);
    if elements.is_empty() {
        return Ok(());
    }
    if !cmd.bind_render_texture(canvas.target, LoadMode::NoClear)? {
        return Ok(());
    }
    if !cmd.bind_material(canvas.program)? {
        log::warn!("Canvas {:?} has no usable program {:?}", handle, canvas.program);
        return Ok(());
    }

    for element in &elements {
        cmd.push_texture(ShaderInputUsage::Texture(0), element.texture)?;
        cmd.update_ui(element.color, element.rect.as_vec4());
        cmd.draw_material();
    }
    cmd.flush();
    Ok(())
}
