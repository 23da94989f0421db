//! Video textures fed by an external frame source.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::GpuBuffer;
use crate::scene::VideoFrameSource;

use super::TextureHandle;

/// Streams frames from a [`VideoFrameSource`] into a texture.
///
/// Each frame is written to the staging buffer of the current flight frame
/// and copied into the texture by the frame's decode command buffer.
#[derive(Clone)]
pub struct VideoTexture {
    pub texture: TextureHandle,
    pub source: Arc<Mutex<Box<dyn VideoFrameSource>>>,
    /// One staging buffer per flight frame.
    pub staging: Vec<Arc<GpuBuffer>>,
    pub active: bool,
}

impl fmt::Debug for VideoTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoTexture")
            .field("texture", &self.texture)
            .field("staging", &self.staging.len())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
