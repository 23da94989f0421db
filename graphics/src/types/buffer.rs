//! Buffer usage flags and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        /// Source of a buffer-to-image copy (staging uploads).
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptor for creating a buffer.
///
/// Every buffer the renderer creates is host-visible; per-frame data is
/// written directly through [`GpuBackend::write_buffer`](crate::backend::GpuBackend::write_buffer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_descriptor() {
        let desc = BufferDescriptor::new(256, BufferUsage::UNIFORM | BufferUsage::COPY_DST)
            .with_label("camera");
        assert_eq!(desc.size, 256);
        assert!(desc.usage.contains(BufferUsage::UNIFORM));
        assert_eq!(desc.label.as_deref(), Some("camera"));
    }
}
