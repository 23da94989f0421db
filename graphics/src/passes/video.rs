//! Video decode: upload the newest frame of every active video texture.

use crate::command::RenderCommand;
use crate::error::GraphicsError;
use crate::resources::{VideoTexture, VideoTextureHandle};

/// Copy the next frame of each video into its texture.
///
/// Frames whose size does not match the texture are dropped with a warning.
/// Returns the number of frames uploaded.
pub(crate) fn record_decode(
    cmd: &mut RenderCommand<'_>,
    videos: &[(VideoTextureHandle, VideoTexture)],
) -> Result<u32, GraphicsError> {
    let renderer = cmd.renderer();
    let backend = renderer.backend();
    let mut uploaded = 0;

    for (handle, video) in videos {
        let Some(image) = renderer
            .textures
            .with(video.texture, |texture| texture.image.clone())
        else {
            log::warn!("Video {:?} lost its texture {:?}", handle, video.texture);
            continue;
        };
        let Some(frame) = video.source.lock().next_frame() else {
            continue;
        };

        let info = image.info();
        if frame.width != info.width || frame.height != info.height {
            log::warn!(
                "Video {:?} produced a {}x{} frame for a {}x{} texture",
                handle,
                frame.width,
                frame.height,
                info.width,
                info.height
            );
            continue;
        }
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.rgba.len() != expected {
            log::warn!(
                "Video {:?} frame holds {} bytes, expected {}",
                handle,
                frame.rgba.len(),
                expected
            );
            continue;
        }

        let Some(staging) = video
            .staging
            .get(cmd.frame() as usize % video.staging.len().max(1))
        else {
            continue;
        };
        backend.write_buffer(staging, 0, &frame.rgba)?;
        cmd.copy_buffer_to_image(staging, &image);
        uploaded += 1;
    }
    Ok(uploaded)
}
