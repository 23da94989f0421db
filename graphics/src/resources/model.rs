//! Indexed geometry.

use std::sync::Arc;

use glam::Vec3;

use crate::backend::GpuBuffer;

/// Vertex and index buffers plus a bounding radius around the model origin.
#[derive(Debug, Clone)]
pub struct Model {
    pub vertex_buffer: Arc<GpuBuffer>,
    pub index_buffer: Arc<GpuBuffer>,
    pub index_count: u32,
    pub vertex_count: u32,
    pub radius: f32,
}

/// Radius of the sphere around the origin enclosing every vertex position.
///
/// Positions are read as three `f32` from the start of each vertex. Strides
/// shorter than 12 bytes yield 0.
pub fn bounding_radius(vertices: &[u8], stride: usize) -> f32 {
    if stride < 12 {
        return 0.0;
    }
    vertices
        .chunks_exact(stride)
        .map(|vertex| {
            let position: [f32; 3] = bytemuck::pod_read_unaligned(&vertex[..12]);
            Vec3::from_array(position).length()
        })
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_radius_from_positions() {
        // Position plus a 4-byte attribute per vertex.
        let vertices: Vec<f32> = vec![1.0, 0.0, 0.0, 9.0, 0.0, -3.0, 4.0, 9.0];
        let bytes = bytemuck::cast_slice(&vertices);
        assert!((bounding_radius(bytes, 16) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_radius_short_stride() {
        assert_eq!(bounding_radius(&[0u8; 16], 8), 0.0);
    }
}
